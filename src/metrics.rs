//! Metrics collection and export for the asset cache and instance pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics data for one instance pool
///
/// # Examples
///
/// ```
/// use asset_pool::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// let exported = metrics.export();
/// assert_eq!(exported["total_retrieved"], "0");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Total instances handed out
    pub total_retrieved: usize,

    /// Total instances returned to idle storage
    pub total_returned: usize,

    /// Gets served from idle storage
    pub pool_hits: usize,

    /// Gets that had to instantiate
    pub pool_misses: usize,

    /// Instances destroyed on overflow, mismatch or clear
    pub destroyed: usize,

    /// Returns of instances the pool could not attribute
    pub untracked_returns: usize,

    /// Current active instances
    pub active_instances: usize,

    /// Current idle instances
    pub idle_instances: usize,

    /// Idle queue capacity
    pub max_capacity: usize,

    /// Idle queue fill ratio (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_retrieved".to_string(), self.total_retrieved.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("pool_hits".to_string(), self.pool_hits.to_string());
        metrics.insert("pool_misses".to_string(), self.pool_misses.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("untracked_returns".to_string(), self.untracked_returns.to_string());
        metrics.insert("active_instances".to_string(), self.active_instances.to_string());
        metrics.insert("idle_instances".to_string(), self.idle_instances.to_string());
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics data for the asset cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct CacheMetrics {
    /// Loads actually executed by the loader
    pub physical_loads: usize,

    /// Acquires served by an already tracked resource
    pub reference_hits: usize,

    /// Acquires that joined a load started by someone else
    pub joined_loads: usize,

    /// Loads for which the loader returned nothing
    pub failed_loads: usize,

    /// Resources currently tracked
    pub loaded_resources: usize,

    /// Loads currently in flight
    pub pending_loads: usize,
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export pool metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use asset_pool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("scene".to_string(), "arena".to_string());
    ///
    /// let metrics = PoolMetrics::default();
    /// let output = MetricsExporter::export_prometheus(&metrics, "Bullet", Some(&tags));
    /// assert!(output.contains("assetpool_instances_active"));
    /// assert!(output.contains("scene=\"arena\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels("pool", pool_name, tags);
        let m = metrics;

        // Gauge metrics
        let gauges = [
            ("assetpool_instances_active", "Current active instances", m.active_instances),
            ("assetpool_instances_idle", "Current idle instances", m.idle_instances),
        ];
        Self::push_all(&mut output, "gauge", &labels, &gauges);

        output.push_str("# HELP assetpool_utilization Idle queue fill ratio\n");
        output.push_str("# TYPE assetpool_utilization gauge\n");
        output.push_str(&format!("assetpool_utilization{{{}}} {:.2}\n", labels, m.utilization));

        // Counter metrics
        let counters = [
            ("assetpool_instances_retrieved_total", "Total instances retrieved", m.total_retrieved),
            ("assetpool_instances_returned_total", "Total instances returned", m.total_returned),
            ("assetpool_pool_hits_total", "Gets served from idle storage", m.pool_hits),
            ("assetpool_pool_misses_total", "Gets that instantiated", m.pool_misses),
            ("assetpool_instances_destroyed_total", "Instances destroyed", m.destroyed),
            ("assetpool_untracked_returns_total", "Rejected returns", m.untracked_returns),
        ];
        Self::push_all(&mut output, "counter", &labels, &counters);

        output
    }

    /// Export cache metrics in Prometheus exposition format
    pub fn export_cache_prometheus(metrics: &CacheMetrics, cache_name: &str) -> String {
        let mut output = String::new();
        let labels = Self::format_labels("cache", cache_name, None);
        let m = metrics;

        let gauges = [
            ("assetpool_resources_loaded", "Resources currently tracked", m.loaded_resources),
            ("assetpool_loads_pending", "Loads in flight", m.pending_loads),
        ];
        Self::push_all(&mut output, "gauge", &labels, &gauges);

        let counters = [
            ("assetpool_loads_total", "Loads executed", m.physical_loads),
            ("assetpool_reference_hits_total", "Acquires served from cache", m.reference_hits),
            ("assetpool_loads_joined_total", "Acquires that joined a load", m.joined_loads),
            ("assetpool_loads_failed_total", "Loads that returned nothing", m.failed_loads),
        ];
        Self::push_all(&mut output, "counter", &labels, &counters);

        output
    }

    /// Append `(name, help, value)` samples of one metric kind
    fn push_all(output: &mut String, kind: &str, labels: &str, samples: &[(&str, &str, usize)]) {
        for (name, help, value) in samples {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} {}\n", name, kind));
            output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }
    }

    fn format_labels(label: &str, name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("{}=\"{}\"", label, name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal pool counters
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_retrieved: AtomicUsize,
    pub total_returned: AtomicUsize,
    pub pool_hits: AtomicUsize,
    pub pool_misses: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub untracked_returns: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, active: usize, idle: usize, capacity: usize) -> PoolMetrics {
        let utilization = if capacity > 0 {
            idle as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_retrieved: self.total_retrieved.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            untracked_returns: self.untracked_returns.load(Ordering::Relaxed),
            active_instances: active,
            idle_instances: idle,
            max_capacity: capacity,
            utilization,
        }
    }
}

/// Internal cache counters
#[derive(Default)]
pub(crate) struct CacheCounters {
    pub physical_loads: AtomicUsize,
    pub reference_hits: AtomicUsize,
    pub joined_loads: AtomicUsize,
    pub failed_loads: AtomicUsize,
}

impl CacheCounters {
    pub fn get_metrics(&self, loaded: usize, pending: usize) -> CacheMetrics {
        CacheMetrics {
            physical_loads: self.physical_loads.load(Ordering::Relaxed),
            reference_hits: self.reference_hits.load(Ordering::Relaxed),
            joined_loads: self.joined_loads.load(Ordering::Relaxed),
            failed_loads: self.failed_loads.load(Ordering::Relaxed),
            loaded_resources: loaded,
            pending_loads: pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_tracks_idle_fill() {
        let tracker = MetricsTracker::new();
        MetricsTracker::bump(&tracker.total_retrieved);

        let metrics = tracker.get_metrics(1, 5, 10);
        assert_eq!(metrics.total_retrieved, 1);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);

        assert_eq!(tracker.get_metrics(0, 0, 0).utilization, 0.0);
    }

    #[test]
    fn test_prometheus_labels_are_stable() {
        let mut tags = HashMap::new();
        tags.insert("b".to_string(), "2".to_string());
        tags.insert("a".to_string(), "1".to_string());

        let metrics = PoolMetrics::default();
        let output = MetricsExporter::export_prometheus(&metrics, "Enemy", Some(&tags));
        assert!(output.contains("assetpool_instances_idle{pool=\"Enemy\",a=\"1\",b=\"2\"} 0"));
    }

    #[test]
    fn test_cache_export() {
        let counters = CacheCounters::default();
        counters.physical_loads.fetch_add(3, Ordering::Relaxed);

        let output = MetricsExporter::export_cache_prometheus(&counters.get_metrics(2, 1), "main");
        assert!(output.contains("assetpool_loads_total{cache=\"main\"} 3"));
        assert!(output.contains("assetpool_resources_loaded{cache=\"main\"} 2"));
    }
}
