//! Sharing of in-flight loads between concurrent requesters

use crate::errors::{PoolError, PoolResult};
use crate::key::ResourceKey;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::watch;

/// `None` while loading, then `Some(None)` on failure or `Some(Some(_))`.
type Slot<R> = Option<Option<Arc<R>>>;

/// Settles a [`PendingLoad`] once the underlying load finishes
pub struct LoadCompleter<R> {
    key: ResourceKey,
    tx: watch::Sender<Slot<R>>,
}

impl<R> LoadCompleter<R> {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Wake every waiter with the load result
    pub fn settle(self, outcome: Option<Arc<R>>) {
        self.tx.send_replace(Some(outcome));
    }
}

/// Awaitable placeholder for a load in flight.
///
/// Clones observe the same load. Dropping a clone, for example because its
/// caller was cancelled, has no effect on the load or on other waiters. The
/// settled value is shared by all clones and dropped along with the last one.
pub struct PendingLoad<R> {
    key: ResourceKey,
    rx: watch::Receiver<Slot<R>>,
}

impl<R> Clone for PendingLoad<R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<R> PendingLoad<R> {
    /// Create a placeholder and the completer that resolves it
    pub fn new(key: ResourceKey) -> (LoadCompleter<R>, Self) {
        let (tx, rx) = watch::channel(None);
        (
            LoadCompleter {
                key: key.clone(),
                tx,
            },
            Self { key, rx },
        )
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait for the load to settle.
    ///
    /// A completer dropped without settling counts as a failed load.
    pub async fn wait(mut self) -> PoolResult<Arc<R>> {
        let key = self.key.clone();
        let slot = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PoolError::LoadFailed(key.clone()))?;

        match &*slot {
            Some(Some(resource)) => Ok(Arc::clone(resource)),
            _ => Err(PoolError::LoadFailed(key)),
        }
    }
}

/// Outcome of [`LoadDeduplicator::join_or_register`]
pub enum Join<R> {
    /// A load was already running; wait on it
    Joined(PendingLoad<R>),
    /// No load was running; the caller must start one and settle it
    Leader(LoadCompleter<R>, PendingLoad<R>),
}

/// Memoizes in-flight loads per key.
///
/// At most one registration exists per key. The dedup layer never touches
/// reference counts: every waiter claims its own reference once the load
/// resolves.
pub struct LoadDeduplicator<R> {
    pending: DashMap<ResourceKey, PendingLoad<R>>,
}

impl<R> LoadDeduplicator<R> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    pub fn try_get_pending(&self, key: &ResourceKey) -> Option<PendingLoad<R>> {
        self.pending.get(key).map(|pending| pending.clone())
    }

    pub fn register(&self, key: ResourceKey, pending: PendingLoad<R>) -> PoolResult<()> {
        match self.pending.entry(key) {
            Entry::Occupied(entry) => Err(PoolError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(pending);
                Ok(())
            }
        }
    }

    /// Drop the registration for `key`, returning whether one existed
    pub fn complete(&self, key: &ResourceKey) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Join the load for `key`, or register a new one if none is running
    pub fn join_or_register(&self, key: &ResourceKey) -> Join<R> {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => Join::Joined(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (completer, pending) = PendingLoad::new(key.clone());
                entry.insert(pending.clone());
                Join::Leader(completer, pending)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<R> Default for LoadDeduplicator<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_registration_per_key() {
        let dedup = LoadDeduplicator::<u32>::new();
        let key = ResourceKey::from("a");
        let (_completer, pending) = PendingLoad::new(key.clone());

        dedup.register(key.clone(), pending.clone()).unwrap();
        assert_eq!(
            dedup.register(key.clone(), pending).unwrap_err(),
            PoolError::AlreadyExists(key.clone())
        );
        assert!(dedup.try_get_pending(&key).is_some());

        assert!(dedup.complete(&key));
        assert!(!dedup.complete(&key));
        assert!(dedup.try_get_pending(&key).is_none());
    }

    #[test]
    fn test_join_or_register_elects_one_leader() {
        let dedup = LoadDeduplicator::<u32>::new();
        let key = ResourceKey::from("a");

        assert!(matches!(dedup.join_or_register(&key), Join::Leader(..)));
        assert!(matches!(dedup.join_or_register(&key), Join::Joined(_)));
        assert!(matches!(dedup.join_or_register(&key), Join::Joined(_)));
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test]
    async fn test_all_waiters_see_the_same_resource() {
        let (completer, pending) = PendingLoad::new(ResourceKey::from("a"));
        let follower = pending.clone();

        completer.settle(Some(Arc::new(5u32)));

        let a = pending.wait().await.unwrap();
        let b = follower.wait().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_settled_value_dropped_with_last_waiter() {
        let dedup = LoadDeduplicator::<u32>::new();
        let key = ResourceKey::from("a");
        let Join::Leader(completer, pending) = dedup.join_or_register(&key) else {
            panic!("first caller must lead");
        };

        let value = Arc::new(5u32);
        let watched = Arc::downgrade(&value);
        dedup.complete(&key);
        completer.settle(Some(value));
        assert!(watched.upgrade().is_some());

        let seen = pending.wait().await.unwrap();
        assert!(watched.upgrade().is_some());
        drop(seen);
        assert!(watched.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_failed_or_abandoned_load_is_load_failed() {
        let key = ResourceKey::from("a");

        let (completer, pending) = PendingLoad::<u32>::new(key.clone());
        completer.settle(None);
        assert_eq!(pending.wait().await.unwrap_err(), PoolError::LoadFailed(key.clone()));

        let (completer, pending) = PendingLoad::<u32>::new(key.clone());
        drop(completer);
        assert_eq!(pending.wait().await.unwrap_err(), PoolError::LoadFailed(key));
    }
}
