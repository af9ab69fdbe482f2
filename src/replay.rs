//! Replay set for proposal `jti`s: a time-partitioned set with automatic
//! eviction of entries older than the maximum token TTL, and enough
//! bookkeeping to make approval idempotent — approving the same token
//! twice must return the same committed outcome without a second
//! provisioning call.

use crate::ports::MembershipRef;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

struct Record {
    expires_at: DateTime<Utc>,
    outcome: Option<MembershipRef>,
}

pub struct ReplaySet {
    window: Duration,
    seen: Mutex<HashMap<String, Record>>,
}

/// What the caller should do with a given `jti`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStatus {
    /// First time this `jti` has been seen; proceed with approval.
    Fresh,
    /// Already committed; return this outcome without provisioning again.
    AlreadyCommitted(MembershipRef),
    /// Seen before but not yet committed (e.g. a concurrent approval is
    /// in flight, or a prior attempt failed before recording an outcome).
    InFlight,
}

impl ReplaySet {
    pub fn new(window: Duration) -> Self {
        ReplaySet {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Check a `jti`'s status and, if fresh, reserve it atomically so a
    /// concurrent caller sees `InFlight` rather than also getting `Fresh`.
    pub fn check_and_reserve(&self, jti: &str, now: DateTime<Utc>) -> ReplayStatus {
        let mut seen = self.seen.lock();
        seen.retain(|_, r| r.expires_at > now);
        match seen.get(jti) {
            Some(Record { outcome: Some(m), .. }) => ReplayStatus::AlreadyCommitted(m.clone()),
            Some(Record { outcome: None, .. }) => ReplayStatus::InFlight,
            None => {
                seen.insert(
                    jti.to_string(),
                    Record {
                        expires_at: now + self.window,
                        outcome: None,
                    },
                );
                ReplayStatus::Fresh
            }
        }
    }

    pub fn record_outcome(&self, jti: &str, outcome: MembershipRef, now: DateTime<Utc>) {
        let mut seen = self.seen.lock();
        seen.insert(
            jti.to_string(),
            Record {
                expires_at: now + self.window,
                outcome: Some(outcome),
            },
        );
    }

    /// Release a reservation without recording an outcome, so a failed
    /// provisioning attempt can be retried — the operation's state machine
    /// stays in `Proposed`/`Input-bound` rather than being stuck.
    pub fn release(&self, jti: &str) {
        self.seen.lock().remove(jti);
    }
}
