//! Reference counting of loaded resources

use crate::errors::{PoolError, PoolResult};
use crate::key::ResourceKey;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

type ReleaseFn<R> = Arc<dyn Fn(&ResourceKey, Arc<R>) + Send + Sync>;

/// A loaded resource and the number of outstanding claims on it
pub struct ResourceHandle<R> {
    key: ResourceKey,
    resource: Arc<R>,
    ref_count: usize,
}

impl<R> ResourceHandle<R> {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }
}

/// Maps resource keys to loaded handles and their reference counts.
///
/// A key is present exactly while its count is above zero: the decrement that
/// reaches zero removes the entry and frees the resource before returning.
///
/// # Examples
///
/// ```
/// use asset_pool::{ReferenceTracker, ResourceKey};
/// use std::sync::Arc;
///
/// let tracker = ReferenceTracker::new(|_key, _res: Arc<u32>| {});
/// let key = ResourceKey::from("Audio/Click");
///
/// tracker.add(key.clone(), Arc::new(7)).unwrap();
/// assert_eq!(*tracker.increase(&key).unwrap(), 7);
/// assert_eq!(tracker.ref_count(&key), 2);
///
/// tracker.decrease(&key).unwrap();
/// tracker.decrease(&key).unwrap();
/// assert!(!tracker.contains(&key));
/// ```
pub struct ReferenceTracker<R> {
    entries: DashMap<ResourceKey, ResourceHandle<R>>,
    release_fn: ReleaseFn<R>,
}

impl<R> ReferenceTracker<R> {
    /// Create a tracker that frees resources through `release_fn`
    pub fn new<F>(release_fn: F) -> Self
    where
        F: Fn(&ResourceKey, Arc<R>) + Send + Sync + 'static,
    {
        Self {
            entries: DashMap::new(),
            release_fn: Arc::new(release_fn),
        }
    }

    /// Add a claim to a tracked key and return its resource
    pub fn increase(&self, key: &ResourceKey) -> PoolResult<Arc<R>> {
        match self.entries.get_mut(key) {
            Some(mut handle) => {
                handle.ref_count += 1;
                Ok(Arc::clone(&handle.resource))
            }
            None => Err(PoolError::NotFound(key.clone())),
        }
    }

    /// Start tracking a freshly loaded resource with a count of one
    pub fn add(&self, key: ResourceKey, resource: Arc<R>) -> PoolResult<()> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Err(PoolError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                entry.insert(ResourceHandle {
                    key,
                    resource,
                    ref_count: 1,
                });
                Ok(())
            }
        }
    }

    /// `increase` if the key is tracked, `add` otherwise, as one step.
    ///
    /// When another load already populated the key, `resource` is a duplicate:
    /// it is freed right away and the tracked resource is returned instead.
    pub fn claim(&self, key: &ResourceKey, resource: Arc<R>) -> Arc<R> {
        let (tracked, duplicate) = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let handle = entry.get_mut();
                handle.ref_count += 1;
                (Arc::clone(&handle.resource), Some(resource))
            }
            Entry::Vacant(entry) => {
                entry.insert(ResourceHandle {
                    key: key.clone(),
                    resource: Arc::clone(&resource),
                    ref_count: 1,
                });
                (resource, None)
            }
        };

        if let Some(duplicate) = duplicate {
            if !Arc::ptr_eq(&tracked, &duplicate) {
                tracing::debug!(%key, "releasing duplicate load");
                (self.release_fn)(key, duplicate);
            }
        }
        tracked
    }

    /// [`claim`](Self::claim) on behalf of whoever holds the returned guard.
    ///
    /// The claim is given back when the guard drops. It only ever gives back a
    /// claim on the exact resource it holds, so a guard that outlives a
    /// [`release_all`](Self::release_all) leaves later loads of the key alone.
    pub fn hold(self: &Arc<Self>, key: ResourceKey, resource: Arc<R>) -> HeldClaim<R> {
        let resource = self.claim(&key, resource);
        HeldClaim {
            key,
            resource,
            tracker: Arc::clone(self),
        }
    }

    /// Drop one claim, freeing the resource when none remain.
    ///
    /// Returns the remaining count. An untracked key is logged and reported as
    /// [`PoolError::DoubleRelease`] without touching any state.
    pub fn decrease(&self, key: &ResourceKey) -> PoolResult<usize> {
        let remaining = self.decrement(key, None);
        if remaining.is_err() {
            tracing::warn!(%key, "release of a resource that is not tracked");
        }
        remaining
    }

    /// Decrement `key`, only if it still tracks `expected` when one is given
    fn decrement(&self, key: &ResourceKey, expected: Option<&Arc<R>>) -> PoolResult<usize> {
        let released = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry)
                if expected.is_none_or(|resource| Arc::ptr_eq(resource, &entry.get().resource)) =>
            {
                let handle = entry.get_mut();
                handle.ref_count = handle.ref_count.saturating_sub(1);
                if handle.ref_count > 0 {
                    return Ok(handle.ref_count);
                }
                entry.remove()
            }
            _ => return Err(PoolError::DoubleRelease(key.clone())),
        };

        // Shard lock is released here, the callback may touch the tracker.
        tracing::debug!(%key, "reference count reached zero, releasing");
        (self.release_fn)(&released.key, released.resource);
        Ok(0)
    }

    /// Free every tracked resource regardless of its count
    pub fn release_all(&self) -> usize {
        let keys = self.keys();
        let mut released = 0;
        for key in keys {
            if let Some((key, handle)) = self.entries.remove(&key) {
                (self.release_fn)(&key, handle.resource);
                released += 1;
            }
        }
        released
    }

    pub fn ref_count(&self, key: &ResourceKey) -> usize {
        self.entries.get(key).map_or(0, |handle| handle.ref_count)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of tracked keys with their counts, sorted by key
    pub fn counts(&self) -> Vec<(ResourceKey, usize)> {
        let mut counts: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.ref_count))
            .collect();
        counts.sort();
        counts
    }

    fn keys(&self) -> Vec<ResourceKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// A claim owned by a guard rather than by a caller.
///
/// Keeps its resource tracked for as long as it lives.
pub struct HeldClaim<R> {
    key: ResourceKey,
    resource: Arc<R>,
    tracker: Arc<ReferenceTracker<R>>,
}

impl<R> HeldClaim<R> {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }
}

impl<R> Drop for HeldClaim<R> {
    fn drop(&mut self) {
        if self.tracker.decrement(&self.key, Some(&self.resource)).is_err() {
            tracing::debug!(key = %self.key, "held resource was already released");
        }
    }
}
