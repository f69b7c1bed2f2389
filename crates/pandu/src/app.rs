//! Wiring between configuration, the core stores and the chat loop.

use pandu_config::PanduConfig;
use pandu_core::{
    AddressAgentDeriver, ChatGate, Clock, ConversationMemory, GateOutcome, MemorySettings,
    PanduCoreError, RateGuard, RateGuardSettings, Responder, Sweeper,
};
use std::sync::Arc;
use std::time::Duration;

/// One line of chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Ask(String),
    Clear,
    Status,
    Quit,
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Input::Empty,
            "/clear" => Input::Clear,
            "/status" => Input::Status,
            "/quit" | "/exit" => Input::Quit,
            question => Input::Ask(question.to_string()),
        }
    }
}

/// Shared state assembled from a loaded config.
pub struct App {
    pub gate: ChatGate,
    pub sweeper: Option<Sweeper>,
}

impl App {
    /// Build the stores and gate. Starts a sweeper when the configured
    /// interval is non-zero, which requires a tokio runtime.
    pub fn build(
        config: &PanduConfig,
        clock: Arc<dyn Clock>,
        responder: Arc<dyn Responder>,
    ) -> Result<Self, PanduCoreError> {
        let memory = Arc::new(ConversationMemory::new(
            MemorySettings::from(&config.memory),
            clock.clone(),
        )?);
        let guard = Arc::new(RateGuard::new(
            RateGuardSettings::from(&config.rate_limit),
            clock.clone(),
        )?);
        let sweeper = match config.maintenance.sweep_interval_secs {
            0 => None,
            secs => Some(Sweeper::spawn(
                memory.clone(),
                guard.clone(),
                clock,
                Duration::from_secs(secs),
            )),
        };
        let gate = ChatGate::new(
            memory,
            guard,
            Arc::new(AddressAgentDeriver::default()),
            responder,
        );
        Ok(Self { gate, sweeper })
    }

    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.shutdown().await;
        }
    }
}

/// Text shown to the user for a gate outcome.
pub fn render_outcome(outcome: &GateOutcome) -> String {
    match outcome {
        GateOutcome::Answered { reply, .. } => reply.clone(),
        GateOutcome::Throttled { retry_after_secs } => {
            format!("too many requests; retry in {retry_after_secs}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{App, Input, render_outcome};
    use pandu_config::{MaintenanceConfig, PanduConfig};
    use pandu_core::{ClientAttributes, EchoResponder, GateOutcome, ManualClock};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn parses_commands_and_questions() {
        assert_eq!(Input::parse("  /clear "), Input::Clear);
        assert_eq!(Input::parse("/status"), Input::Status);
        assert_eq!(Input::parse("/exit"), Input::Quit);
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(
            Input::parse(" Apa itu Prambanan? "),
            Input::Ask("Apa itu Prambanan?".to_string())
        );
    }

    #[test]
    fn renders_throttle_message() {
        let outcome = GateOutcome::Throttled {
            retry_after_secs: 42,
        };
        assert_eq!(render_outcome(&outcome), "too many requests; retry in 42s");
    }

    #[tokio::test]
    async fn builds_gate_from_config() {
        let config = PanduConfig::builder()
            .maintenance(MaintenanceConfig {
                sweep_interval_secs: 0,
            })
            .build();
        let app = App::build(
            &config,
            Arc::new(ManualClock::default()),
            Arc::new(EchoResponder),
        )
        .expect("app");
        assert!(app.sweeper.is_none());

        let client = ClientAttributes::default();
        let outcome = app.gate.handle(&client, "halo").await.expect("outcome");
        assert_eq!(render_outcome(&outcome), "halo");
        assert_eq!(app.gate.diagnostics().memory.turns, 2);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn starts_sweeper_when_interval_set() {
        let app = App::build(
            &PanduConfig::default(),
            Arc::new(ManualClock::default()),
            Arc::new(EchoResponder),
        )
        .expect("app");
        assert!(app.sweeper.is_some());
        app.shutdown().await;
    }
}
