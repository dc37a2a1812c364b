//! Reference-counted, deduplicating asset cache

use crate::dedup::{Join, LoadCompleter, LoadDeduplicator, PendingLoad};
use crate::errors::{PoolError, PoolResult};
use crate::key::ResourceKey;
use crate::loader::ResourceLoader;
use crate::metrics::{CacheCounters, CacheMetrics};
use crate::reference::{HeldClaim, ReferenceTracker};

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

/// Raw `acquire`/`release` API over the injected loader.
///
/// Each successful [`acquire`](AssetCache::acquire) is one claim that must be
/// matched by one [`release`](AssetCache::release). Concurrent acquires of a
/// key that is not loaded yet share a single call to the loader.
///
/// Loads run as tokio tasks: a waiter that is cancelled stops waiting, but the
/// load itself always runs to completion for whoever else needs it. A finished
/// load keeps one claim of its own until its last waiter has claimed or given
/// up, so a load nobody ends up claiming is still released through the loader.
/// Must be used from within a tokio runtime.
pub struct AssetCache<R: Send + Sync + 'static> {
    loader: Arc<dyn ResourceLoader<Resource = R>>,
    references: Arc<ReferenceTracker<R>>,
    loads: Arc<LoadDeduplicator<HeldClaim<R>>>,
    counters: Arc<CacheCounters>,
}

impl<R: Send + Sync + 'static> AssetCache<R> {
    pub fn new<L>(loader: L) -> Self
    where
        L: ResourceLoader<Resource = R>,
    {
        Self::from_arc(Arc::new(loader))
    }

    pub fn from_arc(loader: Arc<dyn ResourceLoader<Resource = R>>) -> Self {
        let release_loader = Arc::clone(&loader);
        let references = ReferenceTracker::new(move |key: &ResourceKey, resource: Arc<R>| {
            release_loader.release(key, resource);
        });

        Self {
            loader,
            references: Arc::new(references),
            loads: Arc::new(LoadDeduplicator::new()),
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// Obtain a claim on the resource named by `key`, loading it if needed.
    ///
    /// Resolution order is: already tracked, join a load in flight, start a
    /// new load. Fails with [`PoolError::Cancelled`] if `cancel` fires first,
    /// in which case no claim is taken.
    pub async fn acquire(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> PoolResult<Arc<R>> {
        loop {
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }

            if let Ok(resource) = self.references.increase(key) {
                self.counters.reference_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(resource);
            }

            let pending = match self.loads.join_or_register(key) {
                Join::Joined(pending) => {
                    tracing::debug!(%key, "joining load in flight");
                    self.counters.joined_loads.fetch_add(1, Ordering::Relaxed);
                    pending
                }
                Join::Leader(completer, pending) => {
                    self.start_load(completer);
                    pending
                }
            };

            // The load's own claim keeps the key tracked while `held` lives,
            // unless `release_all` ran in between.
            let held = Self::wait(pending, cancel).await?;
            match self.references.increase(held.key()) {
                Ok(resource) => return Ok(resource),
                Err(_) => tracing::debug!(%key, "loaded resource released before claim, retrying"),
            }
        }
    }

    /// Obtain one more claim on an already tracked resource
    pub fn retain(&self, key: &ResourceKey) -> PoolResult<Arc<R>> {
        self.references.increase(key)
    }

    /// Drop one claim. Releasing an untracked key is logged and ignored.
    pub fn release(&self, key: &ResourceKey) {
        let _ = self.references.decrease(key);
    }

    /// Free every tracked resource regardless of outstanding claims
    pub fn release_all(&self) -> usize {
        let released = self.references.release_all();
        if released > 0 {
            tracing::debug!(released, "released all cached resources");
        }
        released
    }

    pub fn loaded_count(&self) -> usize {
        self.references.len()
    }

    pub fn pending_load_count(&self) -> usize {
        self.loads.len()
    }

    pub fn ref_count(&self, key: &ResourceKey) -> usize {
        self.references.ref_count(key)
    }

    pub fn is_loaded(&self, key: &ResourceKey) -> bool {
        self.references.contains(key)
    }

    /// Tracked keys and their counts, sorted by key
    pub fn ref_counts(&self) -> Vec<(ResourceKey, usize)> {
        self.references.counts()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.counters
            .get_metrics(self.loaded_count(), self.pending_load_count())
    }

    fn start_load(&self, completer: LoadCompleter<HeldClaim<R>>) {
        let loader = Arc::clone(&self.loader);
        let references = Arc::clone(&self.references);
        let loads = Arc::clone(&self.loads);
        let counters = Arc::clone(&self.counters);

        counters.physical_loads.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %completer.key(), "loading resource");

        tokio::spawn(async move {
            let key = completer.key().clone();
            let loaded = loader.load(&key).await;
            if loaded.is_none() {
                counters.failed_loads.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%key, "loader returned no resource");
            }

            // Tracked before unregistering, so every acquire sees one or the other.
            let held = loaded
                .map(|resource| Arc::new(references.hold(key.clone(), Arc::new(resource))));
            loads.complete(&key);
            completer.settle(held);
        });
    }

    async fn wait(
        pending: PendingLoad<HeldClaim<R>>,
        cancel: &CancellationToken,
    ) -> PoolResult<Arc<HeldClaim<R>>> {
        let key = pending.key().clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(%key, "acquire cancelled while loading");
                Err(PoolError::Cancelled)
            }
            outcome = pending.wait() => outcome,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Loader that counts calls, can be held on a gate, and fails on demand
    #[derive(Default)]
    pub struct TestLoader {
        pub loads: AtomicUsize,
        pub released: Mutex<Vec<String>>,
        pub missing: Mutex<HashSet<String>>,
        pub gate: Option<Arc<Notify>>,
    }

    impl TestLoader {
        pub fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceLoader for TestLoader {
        type Resource = String;

        async fn load(&self, key: &ResourceKey) -> Option<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.missing.lock().contains(key.as_str()) {
                return None;
            }
            Some(format!("asset:{key}"))
        }

        fn release(&self, key: &ResourceKey, _resource: Arc<String>) {
            self.released.lock().push(key.to_string());
        }
    }

    /// Forwards to a shared [`TestLoader`] so tests keep a handle on it
    pub struct SharedLoader(pub Arc<TestLoader>);

    #[async_trait]
    impl ResourceLoader for SharedLoader {
        type Resource = String;

        async fn load(&self, key: &ResourceKey) -> Option<String> {
            self.0.load(key).await
        }

        fn release(&self, key: &ResourceKey, resource: Arc<String>) {
            self.0.release(key, resource);
        }
    }
}
