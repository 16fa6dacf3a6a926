//! Per-identity daily usage counters.
//!
//! `QuotaStore` owns the only shared mutable state in the service: a sharded
//! concurrent map from client identity to its usage record. Records reset
//! lazily — a record whose window has passed is treated as fresh at the next
//! touch, so no background rewrite is needed for correctness. The periodic
//! sweep only reclaims memory.

use dashmap::DashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Immutable quota parameters, fixed at process start.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    pub window: Duration,
}

impl QuotaConfig {
    /// Standard 24-hour window with the given daily limit.
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            window: Duration::from_secs(24 * 60 * 60),
        }
    }

    fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct QuotaRecord {
    count: u32,
    reset_at_ms: u64,
}

impl QuotaRecord {
    fn fresh(now_ms: u64, config: &QuotaConfig) -> Self {
        Self {
            count: 0,
            reset_at_ms: now_ms + config.window_ms(),
        }
    }

    /// A record is stale once its reset time is reached; `now == reset_at`
    /// counts as past the window.
    fn expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

/// Outcome of an admission attempt against the store.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u32,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

/// Read-only view of an identity's current usage.
#[derive(Debug, Clone, Copy)]
pub struct QuotaSnapshot {
    pub used: u32,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

pub struct QuotaStore {
    records: DashMap<String, QuotaRecord>,
    config: QuotaConfig,
}

impl QuotaStore {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> QuotaConfig {
        self.config
    }

    /// Atomic admission attempt for one identity.
    ///
    /// The dashmap entry guard serializes concurrent calls for the same
    /// identity, so two simultaneous requests can never both take the last
    /// slot. A denied attempt does not mutate the count.
    pub fn check_and_consume(&self, identity: &str, now_ms: u64) -> QuotaDecision {
        let mut record = self
            .records
            .entry(identity.to_string())
            .or_insert_with(|| QuotaRecord::fresh(now_ms, &self.config));

        if record.expired(now_ms) {
            *record = QuotaRecord::fresh(now_ms, &self.config);
        }

        if record.count < self.config.daily_limit {
            record.count += 1;
            QuotaDecision {
                allowed: true,
                used: record.count,
                remaining: self.config.daily_limit - record.count,
                reset_at_ms: record.reset_at_ms,
            }
        } else {
            QuotaDecision {
                allowed: false,
                used: record.count,
                remaining: 0,
                reset_at_ms: record.reset_at_ms,
            }
        }
    }

    /// Read-only view with the same lazy-reset semantics as
    /// [`check_and_consume`], but never increments.
    pub fn peek(&self, identity: &str, now_ms: u64) -> QuotaSnapshot {
        match self.records.get(identity) {
            Some(record) if !record.expired(now_ms) => QuotaSnapshot {
                used: record.count,
                remaining: self.config.daily_limit - record.count,
                reset_at_ms: record.reset_at_ms,
            },
            // Absent or expired reads as a full, untouched window.
            _ => QuotaSnapshot {
                used: 0,
                remaining: self.config.daily_limit,
                reset_at_ms: now_ms + self.config.window_ms(),
            },
        }
    }

    /// Remove expired records to bound memory. Returns the number reclaimed.
    ///
    /// `retain` takes the same shard locks as `check_and_consume`, so a sweep
    /// cannot race a concurrent reset-and-reuse of the same identity.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.expired(now_ms));
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn store(limit: u32) -> QuotaStore {
        QuotaStore::new(QuotaConfig::new(limit))
    }

    #[test]
    fn test_limit_then_deny() {
        let store = store(3);
        let now = 1_000;

        for used in 1..=3 {
            let decision = store.check_and_consume("client", now);
            assert!(decision.allowed);
            assert_eq!(decision.used, used);
            assert_eq!(decision.remaining, 3 - used);
        }

        let denied = store.check_and_consume("client", now);
        assert!(!denied.allowed);
        assert_eq!(denied.used, 3);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at_ms, now + DAY_MS);
    }

    #[test]
    fn test_denied_attempt_does_not_count() {
        let store = store(1);
        store.check_and_consume("client", 0);

        for _ in 0..5 {
            let denied = store.check_and_consume("client", 0);
            assert!(!denied.allowed);
            assert_eq!(denied.used, 1);
        }
    }

    #[test]
    fn test_peek_never_mutates() {
        let store = store(10);
        store.check_and_consume("client", 0);

        for _ in 0..4 {
            let snapshot = store.peek("client", 0);
            assert_eq!(snapshot.used, 1);
            assert_eq!(snapshot.remaining, 9);
        }
    }

    #[test]
    fn test_peek_unknown_identity_is_full_quota() {
        let store = store(10);
        let snapshot = store.peek("nobody", 5_000);
        assert_eq!(snapshot.used, 0);
        assert_eq!(snapshot.remaining, 10);
        assert_eq!(snapshot.reset_at_ms, 5_000 + DAY_MS);
        assert!(store.is_empty());
    }

    #[test]
    fn test_lazy_reset_at_exact_boundary() {
        let store = store(2);
        store.check_and_consume("client", 0);
        store.check_and_consume("client", 0);
        assert!(!store.check_and_consume("client", 0).allowed);

        // now == reset_at is past the window
        let decision = store.check_and_consume("client", DAY_MS);
        assert!(decision.allowed);
        assert_eq!(decision.used, 1);
        assert_eq!(decision.reset_at_ms, DAY_MS + DAY_MS);
    }

    #[test]
    fn test_peek_sees_expired_record_as_fresh() {
        let store = store(2);
        store.check_and_consume("client", 0);
        store.check_and_consume("client", 0);

        let snapshot = store.peek("client", DAY_MS + 1);
        assert_eq!(snapshot.used, 0);
        assert_eq!(snapshot.remaining, 2);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = store(5);
        store.check_and_consume("old", 0);
        store.check_and_consume("live", DAY_MS - 1);

        let removed = store.sweep_expired(DAY_MS);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.peek("live", DAY_MS).used, 1);
    }

    #[test]
    fn test_concurrent_consume_admits_exactly_limit() {
        let store = Arc::new(store(10));
        let mut handles = Vec::new();

        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.check_and_consume("shared", 0).allowed
            }));
        }

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|&allowed| allowed)
            .count();
        assert_eq!(admitted, 10);
    }
}
