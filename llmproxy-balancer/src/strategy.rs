//! Pluggable selection policy over an already-filtered, already-usable
//! slice of candidate keys (§4.3). Candidate filtering (active, not
//! rate-limited, cooldown elapsed, profile diversification) happens
//! upstream in the Key Manager; a strategy only ever picks among keys
//! it is told are eligible.

use llmproxy_core::types::ApiKey;
use rand::Rng;

use crate::connections::ConnectionCounter;

pub trait LoadBalancer: Send + Sync {
    /// Picks one key out of `candidates`. Callers guarantee `candidates`
    /// is non-empty.
    fn select<'a>(&self, candidates: &'a [ApiKey]) -> &'a ApiKey;
}

/// Picks the key with the oldest `last_used`; never-used keys (`None`)
/// sort before any timestamp.
pub struct RoundRobin;

impl LoadBalancer for RoundRobin {
    fn select<'a>(&self, candidates: &'a [ApiKey]) -> &'a ApiKey {
        candidates
            .iter()
            .min_by_key(|k| k.last_used.map(|t| t.timestamp_nanos_opt().unwrap_or(i64::MAX)).unwrap_or(i64::MIN))
            .expect("select called with empty candidate slice")
    }
}

pub struct Random;

impl LoadBalancer for Random {
    fn select<'a>(&self, candidates: &'a [ApiKey]) -> &'a ApiKey {
        let idx = rand::rng().random_range(0..candidates.len());
        &candidates[idx]
    }
}

/// Picks the key with the smallest active-connection count, ties broken
/// by input order (the first minimum found wins).
pub struct LeastConnections {
    counter: ConnectionCounter,
}

impl LeastConnections {
    pub fn new(counter: ConnectionCounter) -> Self {
        Self { counter }
    }
}

impl LoadBalancer for LeastConnections {
    fn select<'a>(&self, candidates: &'a [ApiKey]) -> &'a ApiKey {
        candidates
            .iter()
            .min_by_key(|k| self.counter.get(&k.id))
            .expect("select called with empty candidate slice")
    }
}
