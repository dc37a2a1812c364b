//! Typed instance pool over the asset cache

use crate::cache::AssetCache;
use crate::config::TypeConfig;
use crate::errors::{PoolError, PoolResult};
use crate::instance::{InstanceTracker, PoolType};
use crate::key::ResourceKey;
use crate::lifecycle::{self, Poolable, Pooled};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::storage::PoolStorage;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What `return_instance` did with an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// Deactivated and parked for reuse
    Pooled,
    /// Idle storage was full; destroyed and its claim released
    Overflowed,
    /// Not attributable to this pool; destroyed
    Rejected,
}

/// Pool of reusable `T` instances backed by reference-counted resources.
///
/// Every live instance, idle or active, holds one claim on the resource it was
/// created from. Only loads suspend; returns and bookkeeping are synchronous.
pub struct ObjectPool<T: Poolable> {
    config: Arc<TypeConfig>,
    cache: Arc<AssetCache<T::Resource>>,
    instances: Arc<InstanceTracker>,
    storage: PoolStorage<T>,
    metrics: MetricsTracker,
}

impl<T: Poolable> ObjectPool<T> {
    pub fn new(
        config: Arc<TypeConfig>,
        cache: Arc<AssetCache<T::Resource>>,
        instances: Arc<InstanceTracker>,
    ) -> Self {
        Self {
            storage: PoolStorage::new(config.max_pool_size),
            config,
            cache,
            instances,
            metrics: MetricsTracker::new(),
        }
    }

    /// Get an instance, reusing an idle one when available.
    ///
    /// On a miss the backing resource is acquired (possibly loading it) and a
    /// new instance is created. Only this path can suspend or be cancelled.
    pub async fn get(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> PoolResult<Pooled<T>> {
        if let Some(mut instance) = self.storage.try_take() {
            lifecycle::activate(&mut instance, self.attach_point());
            MetricsTracker::bump(&self.metrics.pool_hits);
            MetricsTracker::bump(&self.metrics.total_retrieved);
            return Ok(instance);
        }

        MetricsTracker::bump(&self.metrics.pool_misses);
        let resource = self.cache.acquire(key, cancel).await?;
        let mut instance = self.instantiate(&resource, key)?;
        lifecycle::activate(&mut instance, self.attach_point());
        MetricsTracker::bump(&self.metrics.total_retrieved);
        Ok(instance)
    }

    /// Hand an instance back.
    ///
    /// Never fails: instances that cannot go back to idle storage are
    /// destroyed, and anomalies are logged rather than propagated.
    pub fn return_instance(&self, mut instance: Pooled<T>) -> ReturnOutcome {
        let Some(origin) = self.instances.try_get(instance.id()) else {
            tracing::warn!(
                error = %PoolError::UntrackedReturn(instance.id()),
                key = %instance.key(),
                "destroying instance returned to the wrong pool"
            );
            MetricsTracker::bump(&self.metrics.untracked_returns);
            lifecycle::destroy(instance);
            return ReturnOutcome::Rejected;
        };

        if origin.pool_type != Self::pool_type() {
            let mismatch = PoolError::TypeMismatch {
                expected: Self::pool_type().name(),
                actual: origin.pool_type.name(),
            };
            tracing::warn!(
                error = %mismatch,
                instance = %instance.id(),
                "destroying instance returned to a pool of another type"
            );
            MetricsTracker::bump(&self.metrics.untracked_returns);
            self.discard(instance, &origin.key);
            return ReturnOutcome::Rejected;
        }

        if self.storage.is_full() {
            self.discard(instance, &origin.key);
            return ReturnOutcome::Overflowed;
        }

        lifecycle::deactivate(&mut instance);
        match self.storage.store(instance) {
            Ok(()) => {
                MetricsTracker::bump(&self.metrics.total_returned);
                ReturnOutcome::Pooled
            }
            Err(instance) => {
                // Filled up by a concurrent return since the check above.
                self.discard(instance, &origin.key);
                ReturnOutcome::Overflowed
            }
        }
    }

    /// Create `count` idle instances of `key` ahead of demand.
    ///
    /// The resource is resolved once, and again only if it gets freed midway.
    /// Instances are parked without running the acquire hook; any beyond the
    /// idle capacity are destroyed again.
    pub async fn preload(
        &self,
        key: &ResourceKey,
        count: usize,
        cancel: &CancellationToken,
    ) -> PoolResult<()> {
        if count == 0 {
            return Ok(());
        }

        let mut resource = self.cache.acquire(key, cancel).await?;
        for created in 0..count {
            // The acquire above is the first instance's claim.
            if created > 0 {
                resource = match self.cache.retain(key) {
                    Ok(resource) => resource,
                    // Freed since the last instance, e.g. by `clear_all`.
                    Err(_) => self.cache.acquire(key, cancel).await?,
                };
            }

            let mut instance = self.instantiate(&resource, key)?;
            lifecycle::park(&mut instance);
            if let Err(instance) = self.storage.store(instance) {
                self.discard(instance, key);
            }
        }

        tracing::debug!(pool = Self::pool_type().name(), %key, count, "preloaded instances");
        Ok(())
    }

    /// Destroy every idle instance and forget every active one.
    ///
    /// Releases the claim of each instance this pool created. Active
    /// instances still held by callers are rejected when returned later.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        for instance in self.storage.clear() {
            let key = instance.key().clone();
            self.discard(instance, &key);
            cleared += 1;
        }

        for (_, key) in self.instances.untrack_type(Self::pool_type()) {
            self.cache.release(&key);
            cleared += 1;
        }

        if cleared > 0 {
            tracing::debug!(pool = Self::pool_type().name(), cleared, "pool cleared");
        }
        cleared
    }

    pub fn config(&self) -> &TypeConfig {
        &self.config
    }

    pub fn idle_count(&self) -> usize {
        self.storage.len()
    }

    /// Live instances of this type that are not idle
    pub fn active_count(&self) -> usize {
        self.instances
            .count_type(Self::pool_type())
            .saturating_sub(self.storage.len())
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.metrics
            .get_metrics(self.active_count(), self.idle_count(), self.storage.capacity())
    }

    pub fn pool_type() -> PoolType {
        PoolType::of::<T>()
    }

    fn attach_point(&self) -> Option<&str> {
        self.config.attach_point.as_deref()
    }

    /// Create and track an instance that holds an already taken claim.
    /// On failure the claim is given back.
    fn instantiate(&self, resource: &Arc<T::Resource>, key: &ResourceKey) -> PoolResult<Pooled<T>> {
        match lifecycle::create::<T>(resource, key) {
            Ok(instance) => {
                self.instances.track(instance.id(), key.clone(), Self::pool_type());
                Ok(instance)
            }
            Err(err) => {
                tracing::warn!(error = %err, "instantiation failed");
                self.cache.release(key);
                Err(err)
            }
        }
    }

    fn discard(&self, instance: Pooled<T>, key: &ResourceKey) {
        self.instances.untrack(instance.id());
        lifecycle::destroy(instance);
        self.cache.release(key);
        MetricsTracker::bump(&self.metrics.destroyed);
    }
}
