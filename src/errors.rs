//! Error types for the asset cache and instance pools

use crate::instance::InstanceId;
use crate::key::ResourceKey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("No resource is tracked for key `{0}`")]
    NotFound(ResourceKey),

    #[error("No pool configuration registered for type `{0}`")]
    NotConfigured(&'static str),

    #[error("Resource `{0}` is already tracked")]
    AlreadyExists(ResourceKey),

    #[error("Loader returned no resource for key `{0}`")]
    LoadFailed(ResourceKey),

    #[error("Could not instantiate `{type_name}` from resource `{key}`")]
    InstantiationFailed {
        key: ResourceKey,
        type_name: &'static str,
    },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Release of untracked resource `{0}`")]
    DoubleRelease(ResourceKey),

    #[error("Instance {0} was not obtained from this pool")]
    UntrackedReturn(InstanceId),

    #[error("Instance tracked as `{actual}` was returned to the `{expected}` pool")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type PoolResult<T> = Result<T, PoolError>;
