//! Attribution of live pooled instances to their resource and pool

use crate::key::ResourceKey;

use dashmap::DashMap;
use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a pooled instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The type a pool was registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolType {
    id: TypeId,
    name: &'static str,
}

impl PoolType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Where a live instance came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOrigin {
    pub key: ResourceKey,
    pub pool_type: PoolType,
}

/// Maps every live instance (idle or active) to its key and pool type.
///
/// Shared by all pools of a registry so an instance can always be attributed
/// back to the reference it holds, long after the request that created it.
#[derive(Default)]
pub struct InstanceTracker {
    live: DashMap<InstanceId, InstanceOrigin>,
}

impl InstanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, id: InstanceId, key: ResourceKey, pool_type: PoolType) {
        if self.live.insert(id, InstanceOrigin { key, pool_type }).is_some() {
            tracing::warn!(instance = %id, "instance tracked twice");
        }
    }

    pub fn untrack(&self, id: InstanceId) -> Option<InstanceOrigin> {
        self.live.remove(&id).map(|(_, origin)| origin)
    }

    pub fn try_get(&self, id: InstanceId) -> Option<InstanceOrigin> {
        self.live.get(&id).map(|origin| origin.clone())
    }

    /// Forget every instance of `pool_type`, returning their origins
    pub fn untrack_type(&self, pool_type: PoolType) -> Vec<(InstanceId, ResourceKey)> {
        let ids: Vec<InstanceId> = self
            .live
            .iter()
            .filter(|entry| entry.pool_type == pool_type)
            .map(|entry| *entry.key())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.untrack(id).map(|origin| (id, origin.key)))
            .collect()
    }

    pub fn count_type(&self, pool_type: PoolType) -> usize {
        self.live
            .iter()
            .filter(|entry| entry.pool_type == pool_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
