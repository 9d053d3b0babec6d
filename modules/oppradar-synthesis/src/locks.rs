//! Per-cluster synthesis locks.
//!
//! A cluster has at most one in-flight synthesis attempt. The lock carries a
//! hard timeout as a safety net: a wedged attempt's lock becomes reclaimable
//! once the timeout passes, so a stuck inference call cannot freeze a
//! cluster forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

struct Holder {
    token: u64,
    acquired: Instant,
}

pub struct ClusterLocks {
    hard_timeout: Duration,
    held: Mutex<HashMap<Uuid, Holder>>,
    next_token: Mutex<u64>,
}

impl ClusterLocks {
    pub fn new(hard_timeout: Duration) -> Self {
        Self {
            hard_timeout,
            held: Mutex::new(HashMap::new()),
            next_token: Mutex::new(0),
        }
    }

    pub fn hard_timeout(&self) -> Duration {
        self.hard_timeout
    }

    /// Acquire the lock for a cluster, or `None` when a live attempt holds
    /// it. A holder past the hard timeout is considered wedged and replaced.
    pub fn try_acquire(self: &Arc<Self>, cluster_id: Uuid) -> Option<ClusterLockGuard> {
        let mut held = self.held.lock().expect("cluster lock table poisoned");
        if let Some(holder) = held.get(&cluster_id) {
            if holder.acquired.elapsed() < self.hard_timeout {
                return None;
            }
        }
        let token = {
            let mut next = self.next_token.lock().expect("token counter poisoned");
            *next += 1;
            *next
        };
        held.insert(
            cluster_id,
            Holder {
                token,
                acquired: Instant::now(),
            },
        );
        Some(ClusterLockGuard {
            locks: Arc::clone(self),
            cluster_id,
            token,
        })
    }

    fn release(&self, cluster_id: Uuid, token: u64) {
        let mut held = self.held.lock().expect("cluster lock table poisoned");
        // Only the current holder may release: a reclaimed wedged lock's old
        // guard must not free the new holder's lock.
        if held.get(&cluster_id).is_some_and(|h| h.token == token) {
            held.remove(&cluster_id);
        }
    }
}

pub struct ClusterLockGuard {
    locks: Arc<ClusterLocks>,
    cluster_id: Uuid,
    token: u64,
}

impl Drop for ClusterLockGuard {
    fn drop(&mut self) {
        self.locks.release(self.cluster_id, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let locks = Arc::new(ClusterLocks::new(Duration::from_secs(600)));
        let cluster = Uuid::new_v4();
        let guard = locks.try_acquire(cluster).expect("first acquire");
        assert!(locks.try_acquire(cluster).is_none());
        drop(guard);
        assert!(locks.try_acquire(cluster).is_some());
    }

    #[test]
    fn independent_clusters_lock_independently() {
        let locks = Arc::new(ClusterLocks::new(Duration::from_secs(600)));
        let _a = locks.try_acquire(Uuid::new_v4()).expect("a");
        let _b = locks.try_acquire(Uuid::new_v4()).expect("b");
    }

    #[test]
    fn wedged_lock_is_reclaimable_after_timeout() {
        let locks = Arc::new(ClusterLocks::new(Duration::from_millis(0)));
        let cluster = Uuid::new_v4();
        let wedged = locks.try_acquire(cluster).expect("first");
        // Zero timeout: immediately reclaimable.
        let reclaimed = locks.try_acquire(cluster).expect("reclaim");
        // The stale guard must not release the new holder's lock.
        drop(wedged);
        assert!(locks.try_acquire(cluster).is_none());
        drop(reclaimed);
        assert!(locks.try_acquire(cluster).is_some());
    }
}
