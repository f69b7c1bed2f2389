//! Rate guard integration tests.

use chrono::{DateTime, Duration, Utc};
use pandu_config::{PanduConfig, RateAlgorithm};
use pandu_core::{Decision, IdentityKey, ManualClock, RateGuard, RateGuardSettings};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn guard_with(settings: RateGuardSettings) -> RateGuard {
    RateGuard::new(settings, Arc::new(ManualClock::default())).expect("guard")
}

fn defaults() -> RateGuardSettings {
    RateGuardSettings {
        purge_probability: 0.0,
        ..RateGuardSettings::default()
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::UNIX_EPOCH + Duration::seconds(secs)
}

/// Exactly `max_requests` calls pass; the next one is blocked for the full block.
#[test]
fn admission_boundary() {
    let guard = guard_with(defaults());
    let key = IdentityKey::new("client");
    for second in 0..10 {
        assert_eq!(guard.admit(&key, at(second)), Decision::admitted());
    }
    let denied = guard.admit(&key, at(10));
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_secs, Some(300));
}

/// Blocked at T: denied at T+299s, admitted at T+301s with a fresh window.
#[test]
fn block_expiry_recovery() {
    let guard = guard_with(defaults());
    let key = IdentityKey::new("client");
    for _ in 0..10 {
        guard.admit(&key, at(0));
    }
    let blocked_at = 5;
    assert!(!guard.admit(&key, at(blocked_at)).allowed);

    let still_blocked = guard.admit(&key, at(blocked_at + 299));
    assert_eq!(still_blocked, Decision::denied(1));

    let recovered = at(blocked_at + 301);
    for _ in 0..10 {
        assert!(guard.admit(&key, recovered).allowed);
    }
    assert!(!guard.admit(&key, recovered).allowed);
}

/// Retry hints count down while the block is active.
#[test]
fn retry_after_counts_down() {
    let guard = guard_with(defaults());
    let key = IdentityKey::new("client");
    for _ in 0..11 {
        guard.admit(&key, at(0));
    }
    assert_eq!(guard.admit(&key, at(100)).retry_after_secs, Some(200));
    assert_eq!(guard.admit(&key, at(250)).retry_after_secs, Some(50));
}

/// Keys are throttled independently.
#[test]
fn keys_do_not_share_budgets() {
    let guard = guard_with(defaults());
    let noisy = IdentityKey::new("noisy");
    let polite = IdentityKey::new("polite");
    for _ in 0..11 {
        guard.admit(&noisy, at(0));
    }
    assert!(!guard.admit(&noisy, at(1)).allowed);
    assert!(guard.admit(&polite, at(1)).allowed);
    let stats = guard.stats();
    assert_eq!(stats.tracked, 2);
}

/// Config values flow into the guard.
#[test]
fn configured_limits_apply() {
    let config = PanduConfig::load_from_str(
        r#"{
            rate_limit: {
                algorithm: "sliding_log",
                window_secs: 10,
                max_requests: 2,
                block_secs: 30,
                purge_probability: 0,
            },
        }"#,
    )
    .expect("config");
    let settings = RateGuardSettings::from(&config.rate_limit);
    assert_eq!(settings.algorithm, RateAlgorithm::SlidingLog);
    let guard = guard_with(settings);
    let key = IdentityKey::new("client");
    assert!(guard.admit(&key, at(0)).allowed);
    assert!(guard.admit(&key, at(9)).allowed);
    assert_eq!(guard.admit(&key, at(9)), Decision::denied(30));
}
