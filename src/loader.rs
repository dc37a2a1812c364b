//! Injectable asynchronous resource loading

use crate::key::ResourceKey;
use async_trait::async_trait;
use std::sync::Arc;

/// Source of backing resources (prefabs, clips, textures...).
///
/// The cache calls [`load`](ResourceLoader::load) at most once per key while a
/// load is in flight and [`release`](ResourceLoader::release) exactly once when
/// the last reference to a loaded resource goes away.
///
/// # Examples
///
/// ```
/// use asset_pool::{ResourceKey, ResourceLoader};
/// use async_trait::async_trait;
///
/// struct Prefabs;
///
/// #[async_trait]
/// impl ResourceLoader for Prefabs {
///     type Resource = String;
///
///     async fn load(&self, key: &ResourceKey) -> Option<String> {
///         Some(format!("prefab:{key}"))
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceLoader: Send + Sync + 'static {
    /// The loaded backing object.
    type Resource: Send + Sync + 'static;

    /// Load the resource named by `key`. `None` means the key does not name a
    /// loadable object.
    async fn load(&self, key: &ResourceKey) -> Option<Self::Resource>;

    /// Free a resource whose reference count reached zero.
    fn release(&self, _key: &ResourceKey, _resource: Arc<Self::Resource>) {}
}
