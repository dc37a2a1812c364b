//! # asset_pool
//!
//! Resource lifecycle substrate for game runtimes: a reference-counted,
//! deduplicating asset cache and typed instance pools built on top of it.
//!
//! ## Features
//!
//! - Reference-counted resources, freed the moment their last claim is released
//! - One physical load per key, however many requesters arrive while it runs
//! - Per-caller cancellation that never aborts a load other callers share
//! - Bounded per-type idle pools with lifecycle hooks
//! - Pool warm-up/pre-population
//! - Declarative per-type configuration with scene-persistent pools
//! - Metrics, Prometheus export and state dumps
//!
//! ## Concurrency
//!
//! Only loads suspend. Returns, reference counting and pool lookups are
//! synchronous and never hold a lock across an `.await`. Each table carries its
//! own synchronization, so the crate runs on a single-threaded loop as well as
//! on tokio's multi-threaded runtime.
//!
//! ## Quick Start
//!
//! ```rust
//! use asset_pool::{Poolable, PoolRegistry, ResourceKey, ResourceLoader, TypeConfig};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Prefabs;
//!
//! #[async_trait]
//! impl ResourceLoader for Prefabs {
//!     type Resource = String;
//!     async fn load(&self, key: &ResourceKey) -> Option<String> {
//!         Some(format!("prefab:{key}"))
//!     }
//! }
//!
//! struct Bullet;
//!
//! impl Poolable for Bullet {
//!     type Resource = String;
//!     fn instantiate(_: &Arc<String>, _: &ResourceKey) -> Option<Self> {
//!         Some(Bullet)
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = PoolRegistry::builder(Prefabs)
//!     .register::<Bullet>(TypeConfig::new("Prefabs/Bullet").with_max_pool_size(16))
//!     .build();
//!
//! let never = CancellationToken::new();
//! let bullet = registry.get_configured::<Bullet>(&never).await.unwrap();
//! registry.return_instance(bullet);
//!
//! assert_eq!(registry.pool::<Bullet>().unwrap().idle_count(), 1);
//! # });
//! ```

mod cache;
mod config;
mod dedup;
mod errors;
mod instance;
mod key;
mod lifecycle;
mod loader;
mod metrics;
mod pool;
mod reference;
mod registry;
mod storage;

pub use cache::AssetCache;
pub use config::{DEFAULT_MAX_POOL_SIZE, TypeConfig};
pub use dedup::{Join, LoadCompleter, LoadDeduplicator, PendingLoad};
pub use errors::{PoolError, PoolResult};
pub use instance::{InstanceId, InstanceOrigin, InstanceTracker, PoolType};
pub use key::ResourceKey;
pub use lifecycle::{InstanceState, Poolable, Pooled};
pub use loader::ResourceLoader;
pub use metrics::{CacheMetrics, MetricsExporter, PoolMetrics};
pub use pool::{ObjectPool, ReturnOutcome};
pub use reference::{HeldClaim, ReferenceTracker, ResourceHandle};
pub use registry::{PoolRegistry, PoolStats, RegistryBuilder};
pub use storage::PoolStorage;
