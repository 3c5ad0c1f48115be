//! Per-ad async mutex.
//!
//! Serialises the read-modify-write of `creditos` so concurrent trackers for
//! the same ad in this process cannot both read the same balance. Replicas
//! sharing one store can still interleave.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct AdLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds the lock for one ad; releasing it prunes the map entry when no one
/// else is waiting.
pub struct AdLockGuard<'a> {
    owner: &'a AdLocks,
    ad_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl AdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, ad_id: &str) -> AdLockGuard<'_> {
        let mutex = self
            .locks
            .entry(ad_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        AdLockGuard {
            owner: self,
            ad_id: ad_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of ads with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for AdLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // map holds one reference; any other means a waiter or holder remains
        self.owner
            .locks
            .remove_if(&self.ad_id, |_, m| Arc::strong_count(m) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_ad_is_serialised() {
        let locks = Arc::new(AdLocks::new());
        let inside = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _g = locks.lock("ad1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_ads_do_not_block() {
        let locks = AdLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
