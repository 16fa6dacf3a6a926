//! Request-facing admission policy over the quota store.

use crate::identity;
use crate::quota::{now_ms, QuotaDecision, QuotaStore};
use serde::Serialize;
use std::sync::Arc;

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Outcome of evaluating one request for admission.
#[derive(Debug, Clone, Copy)]
pub enum Admission {
    /// Privileged identity, never metered.
    Exempt,
    /// Metered identity, slot consumed.
    Allowed(QuotaDecision),
    /// Metered identity, window exhausted. No slot consumed.
    Denied {
        used: u32,
        limit: u32,
        wait_hours: u64,
    },
}

/// Remaining-quota view returned by `GET /limit-info`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaInfo {
    pub remaining: i64,
    pub limit: i64,
    #[serde(rename = "isUnlimited")]
    pub is_unlimited: bool,
}

#[derive(Clone)]
pub struct AdmissionGate {
    store: Arc<QuotaStore>,
}

impl AdmissionGate {
    pub fn new(store: Arc<QuotaStore>) -> Self {
        Self { store }
    }

    pub fn daily_limit(&self) -> u32 {
        self.store.config().daily_limit
    }

    /// Decide whether a request from `identity` may proceed, consuming one
    /// quota slot for metered identities. The slot is consumed on attempt,
    /// not on confirmed upstream success.
    pub fn evaluate(&self, identity: &str) -> Admission {
        self.evaluate_at(identity, now_ms())
    }

    pub fn evaluate_at(&self, identity: &str, now_ms: u64) -> Admission {
        if identity::is_exempt(identity) {
            return Admission::Exempt;
        }

        let decision = self.store.check_and_consume(identity, now_ms);
        if decision.allowed {
            Admission::Allowed(decision)
        } else {
            Admission::Denied {
                used: decision.used,
                limit: self.daily_limit(),
                wait_hours: wait_hours(decision.reset_at_ms, now_ms),
            }
        }
    }

    /// Informational remaining-quota query. Never consumes a slot.
    pub fn remaining_for(&self, identity: &str) -> QuotaInfo {
        self.remaining_for_at(identity, now_ms())
    }

    pub fn remaining_for_at(&self, identity: &str, now_ms: u64) -> QuotaInfo {
        if identity::is_exempt(identity) {
            return QuotaInfo {
                remaining: -1,
                limit: -1,
                is_unlimited: true,
            };
        }

        let snapshot = self.store.peek(identity, now_ms);
        QuotaInfo {
            remaining: i64::from(snapshot.remaining),
            limit: i64::from(self.daily_limit()),
            is_unlimited: false,
        }
    }
}

/// Hours until the window resets, rounded up. Denials always report at least
/// the partial hour that remains.
fn wait_hours(reset_at_ms: u64, now_ms: u64) -> u64 {
    let diff = reset_at_ms.saturating_sub(now_ms);
    diff.div_ceil(HOUR_MS)
}
