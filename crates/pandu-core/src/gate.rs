//! Request gate tying identity, rate limiting and memory together.
//!
//! A chat request runs `derive key -> admit -> context -> respond -> record`.
//! Denied requests never touch memory. Both turns of an exchange are recorded
//! after the responder succeeds; a failed call records nothing.

use crate::diagnostics::Diagnostics;
use crate::error::PanduCoreError;
use crate::guard::RateGuard;
use crate::key::{ClientAttributes, IdentityKey, KeyDeriver};
use crate::memory::{ConversationMemory, Role};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Input handed to the downstream model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequest {
    pub key: IdentityKey,
    /// Rendered history ending in the question marker, or empty.
    pub context: String,
    pub question: String,
}

impl PromptRequest {
    /// Context followed directly by the question.
    pub fn prompt(&self) -> String {
        format!("{}{}", self.context, self.question)
    }
}

/// Produces a reply for a prompt. Implemented by model adapters.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: &PromptRequest) -> Result<String, PanduCoreError>;
}

/// Replies with the full prompt it was given. Useful for inspecting what the
/// model would see.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, request: &PromptRequest) -> Result<String, PanduCoreError> {
        Ok(request.prompt())
    }
}

/// Result of [`ChatGate::handle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateOutcome {
    Answered { reply: String, prompt: String },
    Throttled { retry_after_secs: u64 },
}

pub struct ChatGate {
    memory: Arc<ConversationMemory>,
    guard: Arc<RateGuard>,
    deriver: Arc<dyn KeyDeriver>,
    responder: Arc<dyn Responder>,
}

impl ChatGate {
    pub fn new(
        memory: Arc<ConversationMemory>,
        guard: Arc<RateGuard>,
        deriver: Arc<dyn KeyDeriver>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            memory,
            guard,
            deriver,
            responder,
        }
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    pub fn guard(&self) -> &Arc<RateGuard> {
        &self.guard
    }

    pub fn key_for(&self, client: &ClientAttributes) -> IdentityKey {
        self.deriver.derive(client)
    }

    pub async fn handle(
        &self,
        client: &ClientAttributes,
        question: &str,
    ) -> Result<GateOutcome, PanduCoreError> {
        let key = self.key_for(client);
        let decision = self.guard.admit_now(&key);
        if !decision.allowed {
            let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
            info!("request throttled (retry_after_secs={retry_after_secs})");
            debug!("throttled key (key={key})");
            return Ok(GateOutcome::Throttled { retry_after_secs });
        }

        let request = PromptRequest {
            context: self.memory.context(&key),
            question: question.to_string(),
            key,
        };
        let reply = match self.responder.respond(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("responder failed (error={err})");
                return Err(err);
            }
        };

        self.memory.record(&request.key, Role::User, question);
        let retained = self
            .memory
            .record(&request.key, Role::Assistant, reply.clone());
        debug!(
            "exchange stored (key={}, retained={})",
            request.key, retained
        );
        Ok(GateOutcome::Answered {
            reply,
            prompt: request.prompt(),
        })
    }

    /// Forget the conversation for `client`. Rate state is kept.
    pub fn clear(&self, client: &ClientAttributes) -> bool {
        self.memory.clear(&self.key_for(client))
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::collect(&self.memory, &self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::{EchoResponder, PromptRequest, Responder};
    use crate::key::IdentityKey;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn echo_returns_context_and_question() {
        let request = PromptRequest {
            key: IdentityKey::new("k"),
            context: "User: hi\nCurrent question: ".to_string(),
            question: "and now?".to_string(),
        };
        let reply = EchoResponder.respond(&request).await.expect("reply");
        assert_eq!(reply, "User: hi\nCurrent question: and now?");
    }
}
