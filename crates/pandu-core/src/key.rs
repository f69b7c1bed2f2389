//! Client identity derivation.
//!
//! An [`IdentityKey`] is opaque. The default deriver hashes the network
//! address and user agent into a UUID v5, so two clients behind the same
//! proxy with the same browser share a key. That collision is accepted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Opaque per-client key used by both state stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for IdentityKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Connection-level attributes available when a request arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAttributes {
    /// Peer or forwarded address.
    pub address: Option<IpAddr>,
    /// Raw `User-Agent` header.
    pub user_agent: Option<String>,
}

impl ClientAttributes {
    pub fn new(address: Option<IpAddr>, user_agent: Option<impl Into<String>>) -> Self {
        Self {
            address,
            user_agent: user_agent.map(Into::into),
        }
    }
}

/// Derives a stable identity key for a request. Must be pure.
pub trait KeyDeriver: Send + Sync {
    fn derive(&self, client: &ClientAttributes) -> IdentityKey;
}

impl<F> KeyDeriver for F
where
    F: Fn(&ClientAttributes) -> IdentityKey + Send + Sync,
{
    fn derive(&self, client: &ClientAttributes) -> IdentityKey {
        self(client)
    }
}

/// Hashes address and user agent under a namespace UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAgentDeriver {
    namespace: Uuid,
}

impl AddressAgentDeriver {
    /// Use a deployment-specific namespace so keys differ across installs.
    pub fn with_namespace(namespace: Uuid) -> Self {
        Self { namespace }
    }
}

impl Default for AddressAgentDeriver {
    fn default() -> Self {
        Self::with_namespace(Uuid::new_v5(&Uuid::NAMESPACE_URL, b"urn:pandu:identity"))
    }
}

impl KeyDeriver for AddressAgentDeriver {
    fn derive(&self, client: &ClientAttributes) -> IdentityKey {
        let address = client
            .address
            .map(|address| address.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = client.user_agent.as_deref().unwrap_or("unknown");
        // Unit separator keeps "a|b" + "c" distinct from "a" + "b|c".
        let material = format!("{address}\u{1f}{user_agent}");
        IdentityKey(Uuid::new_v5(&self.namespace, material.as_bytes()).to_string())
    }
}
