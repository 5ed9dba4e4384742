//! Per-session mutual exclusion.
//!
//! Requests on the same session id run one at a time; different ids never
//! contend. Each id maps to a `tokio` mutex that lives only while some
//! request holds or waits for it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Default, Clone)]
pub struct SessionLocks {
    locks: Arc<LockMap>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request holds `session_id`.
    pub async fn acquire(&self, session_id: &str) -> SessionLease {
        // A waiter dropped after being handed the lock leaves an entry
        // nobody references.
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
        let mutex = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;
        SessionLease {
            locks: self.locks.clone(),
            session_id: session_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of session ids currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one session id, released on drop.
pub struct SessionLease {
    locks: Arc<LockMap>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: nobody is waiting.
        self.locks
            .remove_if(&self.session_id, |_, m| Arc::strong_count(m) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = SessionLocks::new();
        {
            let _a = locks.acquire("s1").await;
            let _b = locks.acquire("s2").await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_session_waits() {
        let locks = SessionLocks::new();
        let first = locks.acquire("s1").await;

        let l2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _lease = l2.acquire("s1").await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        assert_eq!(locks.len(), 1);

        drop(first);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_entry_is_swept() {
        let locks = SessionLocks::new();
        let first = locks.acquire("s1").await;

        let l2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _lease = l2.acquire("s1").await;
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Released to the waiter, which is cancelled before it runs again
        drop(first);
        waiter.abort();
        let _ = waiter.await;

        let other = locks.acquire("s2").await;
        assert_eq!(locks.len(), 1);
        drop(other);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_contend() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("s1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("s2")).await;
        assert!(b.is_ok());
    }
}
