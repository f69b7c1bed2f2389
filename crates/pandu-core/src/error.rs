//! Error types for the core state engine.

use pandu_config::ConfigError;
use thiserror::Error;

/// Errors returned by core constructors and the request gate.
///
/// Admission denials and missing sessions are not errors; they surface as
/// [`crate::Decision`] values and no-ops respectively.
#[derive(Debug, Error)]
pub enum PanduCoreError {
    /// A memory or rate limit setting is out of range.
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    /// A role name did not match `user` or `assistant`.
    #[error("unknown role: {0}")]
    UnknownRole(String),
    /// The downstream responder failed to produce a reply.
    #[error("responder error: {0}")]
    Responder(String),
    /// Loading configuration failed.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
