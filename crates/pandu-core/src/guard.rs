//! Per-client admission control with temporary blocks.
//!
//! Every key moves through `Fresh -> Counting -> Blocked -> Fresh`. A request
//! that pushes the count over `max_requests` inside one window is denied and
//! starts a block of `block_duration`; every request during the block is
//! denied with the remaining wait. The first request after the block expires
//! starts a new window.
//!
//! The default fixed window resets in discrete steps, so a client can land
//! up to `2 * max_requests` requests around a window boundary in exchange
//! for constant state per key. `RateAlgorithm::SlidingLog` trades a bounded
//! timestamp log for an exact trailing count.

use crate::clock::{Clock, elapsed, seconds};
use crate::error::PanduCoreError;
use crate::key::IdentityKey;
use crate::store::{ExpiringStateStore, StoreStats};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
pub use pandu_config::RateAlgorithm;
use pandu_config::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// Whole seconds until the block lifts; set only on denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    pub fn admitted() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
        }
    }

    pub fn denied(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Counter state for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct RateState {
    window_start: DateTime<Utc>,
    count: u32,
    blocked_until: Option<DateTime<Utc>>,
    /// Request times inside the trailing window; sliding log only.
    log: VecDeque<DateTime<Utc>>,
}

impl RateState {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            blocked_until: None,
            log: VecDeque::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn blocked_until(&self) -> Option<DateTime<Utc>> {
        self.blocked_until
    }

    fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// Run one request through the state machine.
    fn step(&mut self, now: DateTime<Utc>, settings: &RateGuardSettings) -> Decision {
        if let Some(until) = self.blocked_until {
            if now < until {
                return Decision::denied(retry_after_secs(until, now));
            }
            *self = RateState::fresh(now);
        }

        match settings.algorithm {
            RateAlgorithm::FixedWindow => {
                if elapsed(self.window_start, now) >= settings.window {
                    self.window_start = now;
                    self.count = 0;
                }
                self.count = self.count.saturating_add(1);
            }
            RateAlgorithm::SlidingLog => {
                while self
                    .log
                    .front()
                    .is_some_and(|&at| elapsed(at, now) >= settings.window)
                {
                    self.log.pop_front();
                }
                self.log.push_back(now);
                self.window_start = self.log.front().copied().unwrap_or(now);
                self.count = u32::try_from(self.log.len()).unwrap_or(u32::MAX);
            }
        }

        if self.count > settings.max_requests {
            let until = now
                .checked_add_signed(settings.block_duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.blocked_until = Some(until);
            self.log.clear();
            return Decision::denied(retry_after_secs(until, now));
        }
        Decision::admitted()
    }

    /// Whether the entry still carries information worth keeping at `now`.
    fn is_active(&self, now: DateTime<Utc>, settings: &RateGuardSettings) -> bool {
        if self.is_blocked(now) {
            return true;
        }
        if self.blocked_until.is_some() {
            return false;
        }
        let last_seen = match settings.algorithm {
            RateAlgorithm::FixedWindow => Some(self.window_start),
            RateAlgorithm::SlidingLog => self.log.back().copied(),
        };
        last_seen.is_some_and(|at| elapsed(at, now) < settings.window)
    }
}

/// `ceil((until - now) / 1s)`, never less than one for a pending block.
fn retry_after_secs(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

/// Runtime settings for [`RateGuard`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateGuardSettings {
    /// When false every request is admitted and no state is kept.
    pub enabled: bool,
    pub algorithm: RateAlgorithm,
    pub window: Duration,
    pub max_requests: u32,
    pub block_duration: Duration,
    pub purge_probability: f64,
}

impl Default for RateGuardSettings {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for RateGuardSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            algorithm: config.algorithm,
            window: seconds(config.window_secs),
            max_requests: config.max_requests,
            block_duration: seconds(config.block_secs),
            purge_probability: config.purge_probability,
        }
    }
}

impl RateGuardSettings {
    pub fn validate(&self) -> Result<(), PanduCoreError> {
        if self.window <= Duration::zero() {
            return Err(PanduCoreError::InvalidSetting(
                "rate limit window must be positive".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(PanduCoreError::InvalidSetting(
                "max_requests must be at least 1".to_string(),
            ));
        }
        if self.block_duration < Duration::zero() {
            return Err(PanduCoreError::InvalidSetting(
                "block_duration must not be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.purge_probability) {
            return Err(PanduCoreError::InvalidSetting(format!(
                "rate limit purge_probability {} is outside [0, 1]",
                self.purge_probability
            )));
        }
        Ok(())
    }
}

/// Guard occupancy for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStats {
    pub tracked: usize,
    pub blocked: usize,
    pub store: StoreStats,
}

/// Rate guard shared by all request handlers.
pub struct RateGuard {
    store: ExpiringStateStore<RateState>,
    settings: RateGuardSettings,
    clock: Arc<dyn Clock>,
}

impl RateGuard {
    pub fn new(settings: RateGuardSettings, clock: Arc<dyn Clock>) -> Result<Self, PanduCoreError> {
        settings.validate()?;
        if settings.enabled {
            info!(
                "rate guard ready (algorithm={}, window_secs={}, max_requests={}, block_secs={})",
                settings.algorithm.as_str(),
                settings.window.num_seconds(),
                settings.max_requests,
                settings.block_duration.num_seconds()
            );
        } else {
            warn!("rate guard disabled; all requests will be admitted");
        }
        Ok(Self {
            store: ExpiringStateStore::new(),
            settings,
            clock,
        })
    }

    pub fn settings(&self) -> &RateGuardSettings {
        &self.settings
    }

    /// Decide whether a request from `key` arriving at `now` may proceed.
    pub fn admit(&self, key: &IdentityKey, now: DateTime<Utc>) -> Decision {
        if !self.settings.enabled {
            return Decision::admitted();
        }
        let decision = self.store.update_or_create(
            key,
            || RateState::fresh(now),
            |state| state.step(now, &self.settings),
        );
        if let Some(retry_after) = decision.retry_after_secs {
            debug!("request denied (key={key}, retry_after_secs={retry_after})");
        }
        self.maybe_purge(now);
        decision
    }

    /// [`RateGuard::admit`] at the injected clock's current time.
    pub fn admit_now(&self, key: &IdentityKey) -> Decision {
        self.admit(key, self.clock.now())
    }

    /// Remove entries that are neither blocked nor counting within the window.
    pub fn purge_stale(&self, now: DateTime<Utc>) -> usize {
        let removed = self
            .store
            .purge_where(|_, state| !state.is_active(now, &self.settings));
        if removed > 0 {
            info!(
                "evicted stale rate entries (removed={}, remaining={})",
                removed,
                self.store.size()
            );
        }
        removed
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn tracked(&self) -> usize {
        self.store.size()
    }

    pub fn stats(&self) -> GuardStats {
        let now = self.clock.now();
        let mut stats = GuardStats::default();
        self.store.for_each(|_, state| {
            stats.tracked += 1;
            if state.is_blocked(now) {
                stats.blocked += 1;
            }
        });
        stats.store = self.store.stats();
        stats
    }

    fn maybe_purge(&self, now: DateTime<Utc>) {
        let probability = self.settings.purge_probability;
        if probability > 0.0 && rand::random_bool(probability) {
            self.purge_stale(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, RateAlgorithm, RateGuard, RateGuardSettings, retry_after_secs};
    use crate::clock::{Clock, ManualClock};
    use crate::key::IdentityKey;
    use chrono::{DateTime, Duration};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn guard(settings: RateGuardSettings) -> (RateGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let guard = RateGuard::new(settings, clock.clone()).expect("guard");
        (guard, clock)
    }

    fn small(algorithm: RateAlgorithm) -> RateGuardSettings {
        RateGuardSettings {
            algorithm,
            max_requests: 3,
            purge_probability: 0.0,
            ..RateGuardSettings::default()
        }
    }

    #[test]
    fn retry_after_rounds_up() {
        let now = DateTime::UNIX_EPOCH;
        assert_eq!(retry_after_secs(now + Duration::milliseconds(1), now), 1);
        assert_eq!(retry_after_secs(now + Duration::milliseconds(1000), now), 1);
        assert_eq!(retry_after_secs(now + Duration::milliseconds(1001), now), 2);
        assert_eq!(retry_after_secs(now + Duration::seconds(300), now), 300);
    }

    #[test]
    fn rejects_zero_limit() {
        let settings = RateGuardSettings {
            max_requests: 0,
            ..RateGuardSettings::default()
        };
        assert!(RateGuard::new(settings, Arc::new(ManualClock::default())).is_err());
    }

    #[test]
    fn fixed_window_resets_after_window() {
        let (guard, clock) = guard(small(RateAlgorithm::FixedWindow));
        let key = IdentityKey::new("k");
        for _ in 0..3 {
            assert!(guard.admit_now(&key).allowed);
        }
        clock.advance(Duration::seconds(60));
        for _ in 0..3 {
            assert!(guard.admit_now(&key).allowed);
        }
        assert!(!guard.admit_now(&key).allowed);
    }

    #[test]
    fn fixed_window_allows_burst_across_boundary() {
        let (guard, clock) = guard(small(RateAlgorithm::FixedWindow));
        let key = IdentityKey::new("k");
        assert!(guard.admit_now(&key).allowed);
        clock.advance(Duration::seconds(59));
        assert!(guard.admit_now(&key).allowed);
        assert!(guard.admit_now(&key).allowed);
        // Window opened at t=0 resets at t=60: five requests inside two seconds.
        clock.advance(Duration::seconds(1));
        for _ in 0..3 {
            assert!(guard.admit_now(&key).allowed);
        }
    }

    #[test]
    fn sliding_log_counts_trailing_window() {
        let (guard, clock) = guard(small(RateAlgorithm::SlidingLog));
        let key = IdentityKey::new("k");
        assert!(guard.admit_now(&key).allowed);
        clock.advance(Duration::seconds(50));
        assert!(guard.admit_now(&key).allowed);
        assert!(guard.admit_now(&key).allowed);
        // First request falls out of the window at t=60.
        clock.advance(Duration::seconds(10));
        assert!(guard.admit_now(&key).allowed);
        let decision = guard.admit_now(&key);
        assert_eq!(decision, Decision::denied(300));
    }

    #[test]
    fn sliding_log_blocks_boundary_burst() {
        let (guard, clock) = guard(small(RateAlgorithm::SlidingLog));
        let key = IdentityKey::new("k");
        clock.advance(Duration::seconds(59));
        for _ in 0..3 {
            assert!(guard.admit_now(&key).allowed);
        }
        clock.advance(Duration::seconds(1));
        assert!(!guard.admit_now(&key).allowed);
    }

    #[test]
    fn disabled_guard_admits_everything_without_state() {
        let settings = RateGuardSettings {
            enabled: false,
            ..small(RateAlgorithm::FixedWindow)
        };
        let (guard, _) = guard(settings);
        let key = IdentityKey::new("k");
        for _ in 0..50 {
            assert_eq!(guard.admit_now(&key), Decision::admitted());
        }
        assert_eq!(guard.tracked(), 0);
    }

    #[test]
    fn purge_keeps_blocked_and_counting_entries() {
        let (guard, clock) = guard(small(RateAlgorithm::FixedWindow));
        let counting = IdentityKey::new("counting");
        let blocked = IdentityKey::new("blocked");
        let idle = IdentityKey::new("idle");

        guard.admit_now(&idle);
        clock.advance(Duration::seconds(61));
        guard.admit_now(&counting);
        for _ in 0..4 {
            guard.admit_now(&blocked);
        }

        assert_eq!(guard.purge_stale(clock.now()), 1);
        assert_eq!(guard.tracked(), 2);
        let stats = guard.stats();
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.blocked, 1);

        // Past the block and past the window, both entries are stale.
        clock.advance(Duration::seconds(301));
        assert_eq!(guard.purge_stale(clock.now()), 2);
        assert_eq!(guard.tracked(), 0);
    }

    #[test]
    fn certain_purge_probability_sweeps_on_admit() {
        let settings = RateGuardSettings {
            purge_probability: 1.0,
            ..small(RateAlgorithm::FixedWindow)
        };
        let (guard, clock) = guard(settings);
        guard.admit_now(&IdentityKey::new("old"));
        clock.advance(Duration::seconds(120));
        guard.admit_now(&IdentityKey::new("new"));
        assert_eq!(guard.tracked(), 1);
    }
}
