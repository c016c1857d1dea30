//! Per-owner serialization points.
//!
//! Check-in batches and direct guest-mapping edits for one owner must
//! never interleave, while different owners proceed independently.
//! `OwnerLocks` hands out one async mutex per owner id; cloning the
//! set shares the same underlying registry, so a reconciler and a
//! mapping service built from the same set serialize against each
//! other. An owner's slot is dropped again when its last guard
//! releases, keeping the registry bounded by the number of owners with
//! work in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as RegistryMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type Registry = Arc<RegistryMutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

#[derive(Clone, Default)]
pub struct OwnerLocks {
    slots: Registry,
}

impl OwnerLocks {
    /// Wait for exclusive access to the owner's serialization point.
    ///
    /// The returned guard releases on drop and removes the owner's
    /// slot when nothing else is waiting on it.
    pub async fn acquire(&self, owner_id: Uuid) -> OwnerLockGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(owner_id).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        OwnerLockGuard {
            slots: self.slots.clone(),
            owner_id,
            guard: Some(guard),
        }
    }

    /// Number of owners currently holding or awaiting a slot.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct OwnerLockGuard {
    slots: Registry,
    owner_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OwnerLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(&self.owner_id) {
            // A strong count of one means the registry holds the only
            // reference: no other guard is live or waiting.
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.owner_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slot_is_removed_once_the_last_guard_drops() {
        let locks = OwnerLocks::default();
        let owner = Uuid::new_v4();

        let guard = locks.acquire(owner).await;
        assert_eq!(locks.active(), 1);

        drop(guard);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn slot_survives_while_a_second_acquirer_waits() {
        let locks = OwnerLocks::default();
        let owner = Uuid::new_v4();

        let first = locks.acquire(owner).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(owner).await;
            })
        };

        // Let the waiter reach the mutex before releasing.
        tokio::task::yield_now().await;
        drop(first);
        waiter.await.unwrap();

        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_owners_do_not_block_each_other() {
        let locks = OwnerLocks::default();

        let a = locks.acquire(Uuid::new_v4()).await;
        let b = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.active(), 2);

        drop(a);
        drop(b);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn clones_share_one_registry() {
        let locks = OwnerLocks::default();
        let owner = Uuid::new_v4();

        let guard = locks.acquire(owner).await;
        let sibling = locks.clone();
        assert_eq!(sibling.active(), 1);
        assert!(sibling.slots.lock().unwrap().contains_key(&owner));

        drop(guard);
        assert_eq!(sibling.active(), 0);
    }
}
