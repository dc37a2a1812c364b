//! Instance creation, activation and destruction

use crate::config::TypeConfig;
use crate::errors::{PoolError, PoolResult};
use crate::instance::InstanceId;
use crate::key::ResourceKey;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Capability of a type whose instances can be pooled.
///
/// Hooks default to no-ops. `on_acquire`/`on_release` run on every
/// activation boundary, `on_create`/`on_destroy` once per instance.
///
/// # Examples
///
/// ```
/// use asset_pool::{Poolable, ResourceKey, TypeConfig};
/// use std::sync::Arc;
///
/// struct Bullet {
///     sprite: Arc<String>,
///     visible: bool,
/// }
///
/// impl Poolable for Bullet {
///     type Resource = String;
///
///     fn instantiate(resource: &Arc<String>, _key: &ResourceKey) -> Option<Self> {
///         Some(Bullet { sprite: Arc::clone(resource), visible: false })
///     }
///
///     fn on_acquire(&mut self) {
///         self.visible = true;
///     }
///
///     fn on_release(&mut self) {
///         self.visible = false;
///     }
///
///     fn type_config() -> Option<TypeConfig> {
///         Some(TypeConfig::new("Prefabs/Bullet").with_max_pool_size(32))
///     }
/// }
/// ```
pub trait Poolable: Send + Sized + 'static {
    /// Backing resource instances are built from
    type Resource: Send + Sync + 'static;

    /// Build a fresh instance, `None` if the resource cannot produce one
    fn instantiate(resource: &Arc<Self::Resource>, key: &ResourceKey) -> Option<Self>;

    fn on_create(&mut self) {}

    /// Instance is handed to a caller
    fn on_acquire(&mut self) {}

    /// Instance goes back to idle storage
    fn on_release(&mut self) {}

    fn on_destroy(&mut self) {}

    /// Re-parent under `attach_point`, or detach on `None`
    fn attach(&mut self, _attach_point: Option<&str>) {}

    /// Declarative pool configuration used when the registry has no explicit entry
    fn type_config() -> Option<TypeConfig> {
        None
    }
}

/// Lifecycle state of a pooled instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub enum InstanceState {
    Created,
    Idle,
    Active,
    Destroyed,
}

/// A pooled instance together with the key it was created from.
///
/// Hand it back with `return_instance` when done. Dropping an active instance
/// instead leaks its reference claim, which is logged.
pub struct Pooled<T> {
    id: InstanceId,
    key: ResourceKey,
    state: InstanceState,
    value: Option<T>,
}

impl<T> Pooled<T> {
    fn new(value: T, key: ResourceKey) -> Self {
        Self {
            id: InstanceId::next(),
            key,
            state: InstanceState::Created,
            value: Some(value),
        }
    }

    /// Wrap a value that did not come from any pool.
    ///
    /// Returning it to a pool is reported as an untracked return and the
    /// value is destroyed.
    pub fn unpooled(value: T, key: impl Into<ResourceKey>) -> Self {
        let mut pooled = Self::new(value, key.into());
        pooled.state = InstanceState::Active;
        pooled
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }
}

impl<T> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Only `destroy` takes the value, and it consumes the wrapper.
        self.value.as_ref().expect("pooled value taken")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("pooled value taken")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if self.value.is_some() && self.state == InstanceState::Active {
            tracing::warn!(
                instance = %self.id,
                key = %self.key,
                "active instance dropped without being returned"
            );
        }
    }
}

/// Instantiate a new instance in the `Created` state
pub(crate) fn create<T: Poolable>(
    resource: &Arc<T::Resource>,
    key: &ResourceKey,
) -> PoolResult<Pooled<T>> {
    let mut value = T::instantiate(resource, key).ok_or_else(|| PoolError::InstantiationFailed {
        key: key.clone(),
        type_name: std::any::type_name::<T>(),
    })?;
    value.on_create();
    Ok(Pooled::new(value, key.clone()))
}

/// `Created | Idle -> Active`
pub(crate) fn activate<T: Poolable>(instance: &mut Pooled<T>, attach_point: Option<&str>) {
    debug_assert!(matches!(instance.state, InstanceState::Created | InstanceState::Idle));
    if let Some(value) = instance.value_mut() {
        value.attach(attach_point);
        value.on_acquire();
    }
    instance.state = InstanceState::Active;
}

/// `Active -> Idle`
pub(crate) fn deactivate<T: Poolable>(instance: &mut Pooled<T>) {
    debug_assert_eq!(instance.state, InstanceState::Active);
    if let Some(value) = instance.value_mut() {
        value.on_release();
        value.attach(None);
    }
    instance.state = InstanceState::Idle;
}

/// `Created -> Idle` without running the acquire hook
pub(crate) fn park<T: Poolable>(instance: &mut Pooled<T>) {
    debug_assert_eq!(instance.state, InstanceState::Created);
    if let Some(value) = instance.value_mut() {
        value.attach(None);
    }
    instance.state = InstanceState::Idle;
}

/// Any state `-> Destroyed`; the value is dropped after its hook ran
pub(crate) fn destroy<T: Poolable>(mut instance: Pooled<T>) {
    if let Some(mut value) = instance.value.take() {
        value.on_destroy();
    }
    instance.state = InstanceState::Destroyed;
}
