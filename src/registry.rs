//! Type-keyed table of instance pools sharing one asset cache

use crate::cache::AssetCache;
use crate::config::TypeConfig;
use crate::errors::{PoolError, PoolResult};
use crate::instance::InstanceTracker;
use crate::key::ResourceKey;
use crate::lifecycle::{self, Poolable, Pooled};
use crate::loader::ResourceLoader;
use crate::metrics::{CacheMetrics, MetricsExporter, PoolMetrics};
use crate::pool::{ObjectPool, ReturnOutcome};

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of one pool
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolStats {
    pub type_name: &'static str,
    pub key: ResourceKey,
    pub idle: usize,
    pub active: usize,
    pub capacity: usize,
    pub persistent: bool,
}

/// Type-independent operations the registry needs on every pool
trait ErasedPool: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn is_persistent(&self) -> bool;
    fn clear(&self) -> usize;
    fn stats(&self) -> PoolStats;
    fn metrics(&self) -> PoolMetrics;
}

impl<T: Poolable> ErasedPool for ObjectPool<T> {
    fn type_name(&self) -> &'static str {
        Self::pool_type().name()
    }

    fn is_persistent(&self) -> bool {
        self.config().persistent
    }

    fn clear(&self) -> usize {
        ObjectPool::clear(self)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            type_name: self.type_name(),
            key: self.config().key.clone(),
            idle: self.idle_count(),
            active: self.active_count(),
            capacity: self.config().max_pool_size,
            persistent: self.is_persistent(),
        }
    }

    fn metrics(&self) -> PoolMetrics {
        ObjectPool::metrics(self)
    }
}

struct PoolEntry {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedPool>,
}

/// Builds a [`PoolRegistry`] from a registration table of per-type configs
pub struct RegistryBuilder<R: Send + Sync + 'static> {
    loader: Arc<dyn ResourceLoader<Resource = R>>,
    configs: HashMap<TypeId, Arc<TypeConfig>>,
}

impl<R: Send + Sync + 'static> RegistryBuilder<R> {
    /// Register the pool configuration of `T`, replacing any earlier entry
    pub fn register<T>(mut self, config: TypeConfig) -> Self
    where
        T: Poolable<Resource = R>,
    {
        self.configs.insert(TypeId::of::<T>(), Arc::new(config));
        self
    }

    pub fn build(self) -> PoolRegistry<R> {
        PoolRegistry {
            configs: self.configs,
            cache: Arc::new(AssetCache::from_arc(self.loader)),
            instances: Arc::new(InstanceTracker::new()),
            pools: RwLock::new(HashMap::new()),
        }
    }
}

/// Owns the asset cache and one lazily created [`ObjectPool`] per type.
///
/// Configuration is fixed when the registry is built. A type without an
/// explicit entry falls back to [`Poolable::type_config`].
///
/// # Examples
///
/// ```
/// use asset_pool::{Poolable, PoolRegistry, ResourceKey, ResourceLoader, TypeConfig};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct Prefabs;
///
/// #[async_trait]
/// impl ResourceLoader for Prefabs {
///     type Resource = String;
///     async fn load(&self, key: &ResourceKey) -> Option<String> {
///         Some(key.to_string())
///     }
/// }
///
/// struct Enemy;
///
/// impl Poolable for Enemy {
///     type Resource = String;
///     fn instantiate(_: &Arc<String>, _: &ResourceKey) -> Option<Self> {
///         Some(Enemy)
///     }
/// }
///
/// let registry = PoolRegistry::builder(Prefabs)
///     .register::<Enemy>(TypeConfig::new("Prefabs/Enemy").with_max_pool_size(4))
///     .build();
///
/// assert_eq!(registry.loaded_count(), 0);
/// assert_eq!(registry.instance_count(), 0);
/// ```
pub struct PoolRegistry<R: Send + Sync + 'static> {
    configs: HashMap<TypeId, Arc<TypeConfig>>,
    cache: Arc<AssetCache<R>>,
    instances: Arc<InstanceTracker>,
    pools: RwLock<HashMap<TypeId, PoolEntry>>,
}

impl<R: Send + Sync + 'static> PoolRegistry<R> {
    pub fn builder<L>(loader: L) -> RegistryBuilder<R>
    where
        L: ResourceLoader<Resource = R>,
    {
        RegistryBuilder {
            loader: Arc::new(loader),
            configs: HashMap::new(),
        }
    }

    /// Registry relying solely on [`Poolable::type_config`]
    pub fn new<L>(loader: L) -> Self
    where
        L: ResourceLoader<Resource = R>,
    {
        Self::builder(loader).build()
    }

    /// The pool for `T`, created on first use
    pub fn pool<T>(&self) -> PoolResult<Arc<ObjectPool<T>>>
    where
        T: Poolable<Resource = R>,
    {
        let type_id = TypeId::of::<T>();
        if let Some(entry) = self.pools.read().get(&type_id) {
            return Self::downcast::<T>(entry);
        }

        let config = self.config_for::<T>()?;
        let mut pools = self.pools.write();
        let entry = pools.entry(type_id).or_insert_with(|| {
            tracing::debug!(
                pool = std::any::type_name::<T>(),
                key = %config.key,
                max_pool_size = config.max_pool_size,
                "creating pool"
            );
            let pool = Arc::new(ObjectPool::<T>::new(
                config,
                Arc::clone(&self.cache),
                Arc::clone(&self.instances),
            ));
            PoolEntry {
                typed: pool.clone(),
                erased: pool,
            }
        });
        Self::downcast::<T>(entry)
    }

    /// Get a `T` created from `key`
    pub async fn get<T>(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> PoolResult<Pooled<T>>
    where
        T: Poolable<Resource = R>,
    {
        let pool = self.pool::<T>()?;
        pool.get(key, cancel).await
    }

    /// Get a `T` created from its configured key
    pub async fn get_configured<T>(&self, cancel: &CancellationToken) -> PoolResult<Pooled<T>>
    where
        T: Poolable<Resource = R>,
    {
        let pool = self.pool::<T>()?;
        let key = pool.config().key.clone();
        pool.get(&key, cancel).await
    }

    pub fn return_instance<T>(&self, instance: Pooled<T>) -> ReturnOutcome
    where
        T: Poolable<Resource = R>,
    {
        match self.pool::<T>() {
            Ok(pool) => pool.return_instance(instance),
            Err(err) => {
                tracing::warn!(error = %err, instance = %instance.id(), "no pool to return to");
                lifecycle::destroy(instance);
                ReturnOutcome::Rejected
            }
        }
    }

    pub async fn preload<T>(
        &self,
        key: &ResourceKey,
        count: usize,
        cancel: &CancellationToken,
    ) -> PoolResult<()>
    where
        T: Poolable<Resource = R>,
    {
        let pool = self.pool::<T>()?;
        pool.preload(key, count, cancel).await
    }

    pub async fn preload_configured<T>(
        &self,
        count: usize,
        cancel: &CancellationToken,
    ) -> PoolResult<()>
    where
        T: Poolable<Resource = R>,
    {
        let pool = self.pool::<T>()?;
        let key = pool.config().key.clone();
        pool.preload(&key, count, cancel).await
    }

    /// Clear the pool of `T` and drop it; the next use builds a fresh one
    pub fn clear_type<T>(&self) -> usize
    where
        T: Poolable<Resource = R>,
    {
        let entry = self.pools.write().remove(&TypeId::of::<T>());
        entry.map_or(0, |entry| entry.erased.clear())
    }

    /// Clear every pool and free every cached resource, whatever its count
    pub fn clear_all(&self) -> usize {
        let entries: Vec<PoolEntry> = self.pools.write().drain().map(|(_, entry)| entry).collect();
        let cleared: usize = entries.iter().map(|entry| entry.erased.clear()).sum();
        let released = self.cache.release_all();
        tracing::debug!(pools = entries.len(), cleared, released, "cleared all pools");
        cleared
    }

    /// Clear the pools whose configuration is not persistent
    pub fn reset_scene(&self) -> usize {
        let entries: Vec<PoolEntry> = {
            let mut pools = self.pools.write();
            let transient: Vec<TypeId> = pools
                .iter()
                .filter(|(_, entry)| !entry.erased.is_persistent())
                .map(|(type_id, _)| *type_id)
                .collect();
            transient
                .into_iter()
                .filter_map(|type_id| pools.remove(&type_id))
                .collect()
        };

        let cleared: usize = entries.iter().map(|entry| entry.erased.clear()).sum();
        tracing::debug!(pools = entries.len(), cleared, "scene reset");
        cleared
    }

    /// Raw claim on a resource, independent of any pool
    pub async fn acquire(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> PoolResult<Arc<R>> {
        self.cache.acquire(key, cancel).await
    }

    pub fn release(&self, key: &ResourceKey) {
        self.cache.release(key);
    }

    pub fn cache(&self) -> &Arc<AssetCache<R>> {
        &self.cache
    }

    pub fn loaded_count(&self) -> usize {
        self.cache.loaded_count()
    }

    /// Live instances across all pools, idle and active
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn pending_load_count(&self) -> usize {
        self.cache.pending_load_count()
    }

    pub fn ref_count(&self, key: &ResourceKey) -> usize {
        self.cache.ref_count(key)
    }

    /// Stats of every existing pool, sorted by type name
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self
            .pools
            .read()
            .values()
            .map(|entry| entry.erased.stats())
            .collect();
        stats.sort_by(|a, b| a.type_name.cmp(b.type_name));
        stats
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Human-readable summary of cache and pool state
    pub fn dump_state(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "loaded={} instances={} pending={}",
            self.loaded_count(),
            self.instance_count(),
            self.pending_load_count()
        );
        for (key, count) in self.cache.ref_counts() {
            let _ = writeln!(out, "  resource {key} refs={count}");
        }
        for stats in self.pool_stats() {
            let _ = writeln!(
                out,
                "  pool {} key={} idle={}/{} active={}{}",
                stats.type_name,
                stats.key,
                stats.idle,
                stats.capacity,
                stats.active,
                if stats.persistent { " persistent" } else { "" }
            );
        }
        out
    }

    /// Prometheus text for the cache and every pool
    pub fn export_metrics_prometheus(&self, tags: Option<&HashMap<String, String>>) -> String {
        let mut output = MetricsExporter::export_cache_prometheus(&self.cache_metrics(), "assets");
        let pools = self.pools.read();
        let mut entries: Vec<&PoolEntry> = pools.values().collect();
        entries.sort_by_key(|entry| entry.erased.type_name());
        for entry in entries {
            output.push_str(&MetricsExporter::export_prometheus(
                &entry.erased.metrics(),
                entry.erased.type_name(),
                tags,
            ));
        }
        output
    }

    fn config_for<T>(&self) -> PoolResult<Arc<TypeConfig>>
    where
        T: Poolable<Resource = R>,
    {
        self.configs
            .get(&TypeId::of::<T>())
            .cloned()
            .or_else(|| T::type_config().map(Arc::new))
            .ok_or(PoolError::NotConfigured(std::any::type_name::<T>()))
    }

    fn downcast<T>(entry: &PoolEntry) -> PoolResult<Arc<ObjectPool<T>>>
    where
        T: Poolable<Resource = R>,
    {
        Arc::clone(&entry.typed)
            .downcast::<ObjectPool<T>>()
            .map_err(|_| PoolError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: entry.erased.type_name(),
            })
    }
}
