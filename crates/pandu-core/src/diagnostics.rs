use crate::guard::{GuardStats, RateGuard};
use crate::memory::{ConversationMemory, MemoryStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Combined occupancy snapshot of memory and rate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub collected_at: DateTime<Utc>,
    pub memory: MemoryStats,
    pub rate_limit: GuardStats,
}

impl Diagnostics {
    pub fn collect(memory: &ConversationMemory, guard: &RateGuard) -> Self {
        Self {
            collected_at: guard.now(),
            memory: memory.stats(),
            rate_limit: guard.stats(),
        }
    }
}
