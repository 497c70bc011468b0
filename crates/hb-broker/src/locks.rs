//! Per-instance admission locks
//!
//! Admission for one instance is serialized while admissions for different
//! instances proceed in parallel. Entries are created on demand and pruned
//! once nobody holds or waits for them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use hb_common::InstanceId;

/// Table of async mutexes keyed by instance ID
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<InstanceId, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive admission rights on `instance_id`
    pub async fn lock(&self, instance_id: &InstanceId) -> InstanceGuard<'_> {
        let mutex = self.locks.entry(instance_id.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        InstanceGuard {
            locks: self,
            instance_id: instance_id.clone(),
            guard: Some(guard),
        }
    }

    /// Number of instances with a live entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no instance is locked or awaited
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held admission rights; released on drop
pub struct InstanceGuard<'a> {
    locks: &'a InstanceLocks,
    instance_id: InstanceId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table itself still references the mutex: nobody waits.
        self.locks
            .locks
            .remove_if(&self.instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_instance_is_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&"i-1".into()).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_instances_do_not_block_each_other() {
        let locks = InstanceLocks::new();
        let _a = locks.lock(&"i-1".into()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&"i-2".into())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_is_pruned_after_release() {
        let locks = InstanceLocks::new();
        {
            let _guard = locks.lock(&"i-1".into()).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
