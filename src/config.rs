//! Per-type pool configuration

use crate::key::ResourceKey;

/// Idle capacity used when a type does not set one
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;

/// Declarative pool policy for one instance type
///
/// # Examples
///
/// ```
/// use asset_pool::TypeConfig;
///
/// let config = TypeConfig::new("Prefabs/Enemy")
///     .with_max_pool_size(20)
///     .with_persistent(true)
///     .with_attach_point("World/Enemies");
///
/// assert_eq!(config.key.as_str(), "Prefabs/Enemy");
/// assert_eq!(config.max_pool_size, 20);
/// assert!(config.persistent);
/// assert_eq!(config.attach_point.as_deref(), Some("World/Enemies"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct TypeConfig {
    /// Resource instances of this type are created from by default
    pub key: ResourceKey,

    /// Maximum number of idle instances kept for reuse
    pub max_pool_size: usize,

    /// Whether the pool survives a scene reset
    pub persistent: bool,

    /// Where active instances are attached
    pub attach_point: Option<String>,
}

impl TypeConfig {
    /// Create a configuration with default values for `key`
    pub fn new(key: impl Into<ResourceKey>) -> Self {
        Self {
            key: key.into(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            persistent: false,
            attach_point: None,
        }
    }

    /// Set the maximum idle pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use asset_pool::TypeConfig;
    ///
    /// let config = TypeConfig::new("Audio/Source").with_max_pool_size(0);
    /// assert_eq!(config.max_pool_size, 0);
    /// ```
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Keep the pool across scene resets
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Attach active instances under `attach_point`
    pub fn with_attach_point(mut self, attach_point: impl Into<String>) -> Self {
        self.attach_point = Some(attach_point.into());
        self
    }
}
