//! In-process commitment locks.
//!
//! Prevents a single client from racing itself into a double-spend while a
//! transaction is in flight. The on-chain nullifier set remains the
//! authority; these locks carry no meaning outside this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::error::WalletError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const ACQUIRE_ATTEMPTS: u32 = 3;
const ACQUIRE_SPACING: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
struct LockEntry {
    locked_at: Instant,
    operation: String,
}

#[derive(Debug)]
pub struct LockService {
    entries: Mutex<HashMap<String, LockEntry>>,
    timeout: Duration,
}

impl Default for LockService {
    fn default() -> Self {
        Self::new()
    }
}

impl LockService {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// All-or-nothing: either every commitment is locked or none is.
    /// Expired entries count as free.
    pub fn try_lock(&self, commitments: &[String], operation: &str) -> bool {
        let mut entries = self.entries.lock().expect("lock map poisoned");
        let now = Instant::now();
        let busy = commitments.iter().any(|commitment| {
            entries
                .get(commitment)
                .is_some_and(|entry| now.duration_since(entry.locked_at) < self.timeout)
        });
        if busy {
            return false;
        }
        for commitment in commitments {
            entries.insert(
                commitment.clone(),
                LockEntry {
                    locked_at: now,
                    operation: operation.to_string(),
                },
            );
        }
        true
    }

    /// Idempotent: unlocking an already-free commitment is a no-op.
    pub fn unlock(&self, commitments: &[String]) {
        let mut entries = self.entries.lock().expect("lock map poisoned");
        for commitment in commitments {
            entries.remove(commitment);
        }
    }

    pub fn is_locked(&self, commitment: &str) -> bool {
        let entries = self.entries.lock().expect("lock map poisoned");
        entries
            .get(commitment)
            .is_some_and(|entry| entry.locked_at.elapsed() < self.timeout)
    }

    pub fn holder_operation(&self, commitment: &str) -> Option<String> {
        let entries = self.entries.lock().expect("lock map poisoned");
        entries.get(commitment).map(|entry| entry.operation.clone())
    }

    /// Drop expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().expect("lock map poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.locked_at.elapsed() < self.timeout);
        before - entries.len()
    }

    /// Background sweeper on a one-minute cadence.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                service.sweep();
            }
        })
    }

    /// Acquire with the engine's retry schedule (3 attempts, 1 s apart).
    /// Returns a guard that releases on drop, so every exit path of the
    /// caller releases.
    pub async fn lock_with_retry(
        self: &Arc<Self>,
        commitments: Vec<String>,
        operation: &str,
    ) -> Result<LockGuard, WalletError> {
        for attempt in 0..ACQUIRE_ATTEMPTS {
            if self.try_lock(&commitments, operation) {
                return Ok(LockGuard {
                    service: Arc::clone(self),
                    commitments,
                });
            }
            if attempt + 1 < ACQUIRE_ATTEMPTS {
                tokio::time::sleep(ACQUIRE_SPACING).await;
            }
        }
        Err(WalletError::LockUnavailable(format!(
            "{} commitment(s) still locked after {} attempts",
            commitments.len(),
            ACQUIRE_ATTEMPTS
        )))
    }
}

/// Holds commitments locked until dropped.
#[derive(Debug)]
pub struct LockGuard {
    service: Arc<LockService>,
    commitments: Vec<String>,
}

impl LockGuard {
    pub fn commitments(&self) -> &[String] {
        &self.commitments
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.service.unlock(&self.commitments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn lock_is_all_or_nothing() {
        let service = LockService::new();
        assert!(service.try_lock(&keys(&["a", "b"]), "withdraw"));
        // "b" is held, so the whole second request fails and "c" stays free.
        assert!(!service.try_lock(&keys(&["b", "c"]), "withdraw"));
        assert!(!service.is_locked("c"));
    }

    #[test]
    fn unlock_is_idempotent() {
        let service = LockService::new();
        assert!(service.try_lock(&keys(&["a"]), "deposit"));
        service.unlock(&keys(&["a"]));
        service.unlock(&keys(&["a"]));
        assert!(service.try_lock(&keys(&["a"]), "deposit"));
    }

    #[test]
    fn expired_locks_are_free_and_swept() {
        let service = LockService::with_timeout(Duration::from_millis(0));
        assert!(service.try_lock(&keys(&["a"]), "deposit"));
        // Zero timeout: immediately expired.
        assert!(service.try_lock(&keys(&["a"]), "withdraw"));
        assert_eq!(service.sweep(), 1);
    }

    #[test]
    fn records_holder_operation() {
        let service = LockService::new();
        assert!(service.try_lock(&keys(&["a"]), "withdraw"));
        assert_eq!(service.holder_operation("a").as_deref(), Some("withdraw"));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_releases_on_drop() {
        let service = Arc::new(LockService::new());
        {
            let _guard = service
                .lock_with_retry(keys(&["a"]), "withdraw")
                .await
                .unwrap();
            assert!(service.is_locked("a"));
        }
        assert!(!service.is_locked("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_three_attempts() {
        let service = Arc::new(LockService::new());
        let _held = service
            .lock_with_retry(keys(&["a"]), "withdraw")
            .await
            .unwrap();
        let err = service
            .lock_with_retry(keys(&["a"]), "deposit")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::LockUnavailable(_)));
    }
}
