//! Concurrent access to shared state.

use chrono::DateTime;
use pandu_core::{
    ConversationMemory, IdentityKey, ManualClock, MemorySettings, RateAlgorithm, RateGuard,
    RateGuardSettings, Role,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Barrier};
use std::thread;

fn run_burst(algorithm: RateAlgorithm, max_requests: u32) -> (usize, usize) {
    let guard = Arc::new(
        RateGuard::new(
            RateGuardSettings {
                algorithm,
                max_requests,
                purge_probability: 0.0,
                ..RateGuardSettings::default()
            },
            Arc::new(ManualClock::default()),
        )
        .expect("guard"),
    );
    let callers = max_requests as usize + 5;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let guard = guard.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                guard
                    .admit(&IdentityKey::new("shared"), DateTime::UNIX_EPOCH)
                    .allowed
            })
        })
        .collect();
    let mut allowed = 0;
    let mut denied = 0;
    for handle in handles {
        if handle.join().expect("join") {
            allowed += 1;
        } else {
            denied += 1;
        }
    }
    (allowed, denied)
}

/// `max + 5` simultaneous requests yield exactly `max` admissions.
#[test]
fn concurrent_admits_are_counted_exactly() {
    for max_requests in [1, 3, 10, 32] {
        for algorithm in [RateAlgorithm::FixedWindow, RateAlgorithm::SlidingLog] {
            assert_eq!(
                run_burst(algorithm, max_requests),
                (max_requests as usize, 5),
                "algorithm={} max_requests={max_requests}",
                algorithm.as_str()
            );
        }
    }
}

/// Parallel writers on separate keys never lose turns or cross sessions.
#[test]
fn concurrent_records_stay_per_key() {
    let memory = Arc::new(
        ConversationMemory::new(
            MemorySettings {
                max_exchanges: 50,
                purge_probability: 0.5,
                ..MemorySettings::default()
            },
            Arc::new(ManualClock::default()),
        )
        .expect("memory"),
    );
    let writers = 8;
    let per_writer = 40;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|writer| {
            let memory = memory.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let key = IdentityKey::new(format!("writer-{writer}"));
                barrier.wait();
                for index in 0..per_writer {
                    memory.record(&key, Role::User, format!("{writer}:{index}"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    assert_eq!(memory.session_count(), writers);
    for writer in 0..writers {
        let turns = memory.turns(&IdentityKey::new(format!("writer-{writer}")));
        assert_eq!(turns.len(), per_writer);
        for (index, turn) in turns.iter().enumerate() {
            assert_eq!(turn.text, format!("{writer}:{index}"));
        }
    }
}
