//! Rolling per-session conversation memory.
//!
//! Sessions live in an [`ExpiringStateStore`] keyed by client identity. Each
//! session keeps at most `2 * max_exchanges` turns and is evicted once it has
//! been idle for longer than `idle_ttl`.

use crate::clock::{Clock, elapsed, seconds};
use crate::error::PanduCoreError;
use crate::key::IdentityKey;
use crate::store::{ExpiringStateStore, StoreStats};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use pandu_config::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = PanduCoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(PanduCoreError::UnknownRole(other.to_string())),
        }
    }
}

/// One message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Stored session. Never exists without at least one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    turns: VecDeque<Turn>,
    last_activity: DateTime<Utc>,
}

impl ConversationState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            turns: VecDeque::new(),
            last_activity: now,
        }
    }

    /// Append and drop the oldest turns beyond `max_turns`.
    fn push(&mut self, turn: Turn, max_turns: usize) {
        self.last_activity = turn.created_at;
        self.turns.push_back(turn);
        while self.turns.len() > max_turns {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }
}

/// Runtime settings for [`ConversationMemory`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySettings {
    pub max_exchanges: usize,
    pub idle_ttl: Duration,
    pub context_window: usize,
    pub max_turn_chars: Option<usize>,
    pub purge_probability: f64,
    pub user_label: String,
    pub assistant_label: String,
    pub question_marker: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for MemorySettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            max_exchanges: config.max_exchanges,
            idle_ttl: seconds(config.idle_ttl_secs),
            context_window: config.context_window,
            max_turn_chars: config.max_turn_chars,
            purge_probability: config.purge_probability,
            user_label: config.user_label.clone(),
            assistant_label: config.assistant_label.clone(),
            question_marker: config.question_marker.clone(),
        }
    }
}

impl MemorySettings {
    pub fn validate(&self) -> Result<(), PanduCoreError> {
        if self.max_exchanges == 0 {
            return Err(PanduCoreError::InvalidSetting(
                "max_exchanges must be at least 1".to_string(),
            ));
        }
        if self.idle_ttl <= Duration::zero() {
            return Err(PanduCoreError::InvalidSetting(
                "idle_ttl must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.purge_probability) {
            return Err(PanduCoreError::InvalidSetting(format!(
                "memory purge_probability {} is outside [0, 1]",
                self.purge_probability
            )));
        }
        Ok(())
    }

    /// Turn capacity per session.
    pub fn max_turns(&self) -> usize {
        self.max_exchanges.saturating_mul(2)
    }

    fn label(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user_label,
            Role::Assistant => &self.assistant_label,
        }
    }
}

/// Occupancy figures for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub sessions: usize,
    pub turns: usize,
    pub store: StoreStats,
}

/// Conversation memory shared by all request handlers.
pub struct ConversationMemory {
    store: ExpiringStateStore<ConversationState>,
    settings: MemorySettings,
    clock: Arc<dyn Clock>,
}

impl ConversationMemory {
    pub fn new(settings: MemorySettings, clock: Arc<dyn Clock>) -> Result<Self, PanduCoreError> {
        settings.validate()?;
        info!(
            "conversation memory ready (max_exchanges={}, idle_ttl_secs={}, context_window={})",
            settings.max_exchanges,
            settings.idle_ttl.num_seconds(),
            settings.context_window
        );
        Ok(Self {
            store: ExpiringStateStore::new(),
            settings,
            clock,
        })
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    /// Render up to `context_window` recent turns as `"<label>: <text>\n"`
    /// lines followed by the question marker. Empty when no session exists.
    /// Does not refresh the idle timer.
    pub fn context(&self, key: &IdentityKey) -> String {
        let window = self.settings.context_window;
        if window == 0 {
            return String::new();
        }
        self.store
            .read(key, |state| {
                let skip = state.turns.len().saturating_sub(window);
                let mut rendered = String::new();
                for turn in state.turns.iter().skip(skip) {
                    rendered.push_str(self.settings.label(turn.role));
                    rendered.push_str(": ");
                    rendered.push_str(&turn.text);
                    rendered.push('\n');
                }
                rendered.push_str(&self.settings.question_marker);
                rendered
            })
            .unwrap_or_default()
    }

    /// Append a turn stamped with the current time, creating the session if
    /// needed. Returns the number of turns retained afterwards.
    pub fn record(&self, key: &IdentityKey, role: Role, text: impl Into<String>) -> usize {
        let now = self.clock.now();
        let mut text = text.into();
        if let Some(max_chars) = self.settings.max_turn_chars {
            truncate_chars(&mut text, max_chars);
        }
        let text_len = text.len();
        let turn = Turn {
            role,
            text,
            created_at: now,
        };
        let max_turns = self.settings.max_turns();
        let retained = self.store.update_or_create(
            key,
            || ConversationState::new(now),
            |state| {
                state.push(turn, max_turns);
                state.turns.len()
            },
        );
        debug!(
            "recorded turn (key={}, role={}, text_len={}, retained={})",
            key,
            role.as_str(),
            text_len,
            retained
        );
        self.maybe_purge(now);
        retained
    }

    /// Drop the session for `key`. Clearing an absent session is a no-op.
    pub fn clear(&self, key: &IdentityKey) -> bool {
        let removed = self.store.delete(key);
        if removed {
            debug!("cleared session (key={key})");
        }
        removed
    }

    /// Evict sessions idle for longer than `idle_ttl` as of `now`.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.settings.idle_ttl;
        let removed = self
            .store
            .purge_where(|_, state| elapsed(state.last_activity, now) > ttl);
        if removed > 0 {
            info!(
                "evicted idle sessions (removed={}, remaining={})",
                removed,
                self.store.size()
            );
        }
        removed
    }

    /// Snapshot of the turns stored for `key`, oldest first.
    pub fn turns(&self, key: &IdentityKey) -> Vec<Turn> {
        self.store
            .read(key, |state| state.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.store.size()
    }

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats::default();
        self.store.for_each(|_, state| {
            stats.sessions += 1;
            stats.turns += state.turns.len();
        });
        stats.store = self.store.stats();
        stats
    }

    fn maybe_purge(&self, now: DateTime<Utc>) {
        let probability = self.settings.purge_probability;
        if probability > 0.0 && rand::random_bool(probability) {
            self.purge_idle(now);
        }
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(index);
    }
}
