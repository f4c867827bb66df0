//! Process-wide active-connection counter (§4.3). Mutated by whichever
//! component currently holds a key: the Key Manager increments on
//! rotation install, the Proxy Pipeline decrements on every attempt exit
//! path (success, failure, or cancellation).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use tracing::debug;

#[derive(Clone, Default)]
pub struct ConnectionCounter {
    counts: Arc<RwLock<HashMap<String, i64>>>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key_id: &str) {
        let mut counts = self.counts.write().expect("connection counter poisoned");
        *counts.entry(key_id.to_string()).or_insert(0) += 1;
    }

    /// Floored at 0 — a spurious extra decrement (a bug elsewhere) must
    /// never drive a key negative and make it look artificially idle.
    pub fn decrement(&self, key_id: &str) {
        let mut counts = self.counts.write().expect("connection counter poisoned");
        if let Some(count) = counts.get_mut(key_id) {
            *count = (*count - 1).max(0);
        }
    }

    pub fn get(&self, key_id: &str) -> i64 {
        let counts = self.counts.read().expect("connection counter poisoned");
        counts.get(key_id).copied().unwrap_or(0)
    }

    pub fn reset(&self, key_id: &str) {
        let mut counts = self.counts.write().expect("connection counter poisoned");
        counts.remove(key_id);
    }

    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.counts.read().expect("connection counter poisoned").clone()
    }

    fn sweep_idle(&self) {
        let mut counts = self.counts.write().expect("connection counter poisoned");
        let before = counts.len();
        counts.retain(|_, count| *count != 0);
        let removed = before - counts.len();
        if removed > 0 {
            debug!(removed, "connection counter janitor swept idle entries");
        }
    }

    /// Spawns the background sweep described in §4.3: every 5 minutes,
    /// drop map entries sitting at 0 so long-lived processes don't
    /// accumulate one entry per key id that has ever been used.
    pub fn spawn_janitor(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5 * 60));
            loop {
                interval.tick().await;
                self.sweep_idle();
            }
        })
    }
}
