//! Per-agent serialized critical section (SPEC_FULL.md §5).
//!
//! Two concurrent ticks for the same agent must never interleave. The
//! registry of per-agent locks is itself guarded by a `parking_lot::Mutex`
//! for the brief moment it takes to look up or insert an entry — the same
//! "fast sync primitive for a short critical section" the teacher reaches
//! for around its `RiskManager` (`ParkingRwLock` in `main.rs`).

use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OwnedMutexGuard;

#[derive(Clone, Default)]
pub struct AgentLocks {
    locks: Arc<SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for one agent, creating it on first use. Held by
    /// the returned guard for the lifetime of one tick transaction.
    pub async fn acquire(&self, agent_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_agent_locks_serialize() {
        let locks = AgentLocks::new();
        let _guard1 = locks.acquire("agent-1").await;
        let locks2 = locks.clone();
        let handle = tokio::spawn(async move {
            let _guard2 = locks2.acquire("agent-1").await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(_guard1);
        handle.await.unwrap();
    }
}
