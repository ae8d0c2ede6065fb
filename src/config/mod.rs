//! Configuration objects for the pipeline.

use serde::Deserialize;
use std::time::Duration;

/// Tunables of the pipeline and reconciler, deserialized once at process start.
///
/// Every field has a default so a minimal deployment needs no configuration at all.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Hours a staged row is retained in the buffer before being purged, merged or
    /// not. Bounds buffer growth at the cost of an at-most-once-within-window
    /// guarantee.
    #[serde(default = "default_retention_window_hours")]
    pub retention_window_hours: u64,
    /// Seconds between periodic reconciliation runs.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

const fn default_retention_window_hours() -> u64 {
    24
}

const fn default_reconcile_interval_secs() -> u64 {
    30 * 60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retention_window_hours: default_retention_window_hours(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl PipelineConfig {
    /// Retention window as a [`chrono::Duration`] for watermark arithmetic.
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_window_hours as i64)
    }

    /// Reconciliation cadence for the periodic driver.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.retention_window_hours, 24);
        assert_eq!(config.reconcile_interval_secs, 1800);
        assert_eq!(config.retention_window(), chrono::Duration::hours(24));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(1800));
    }

    #[test]
    fn test_overrides() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "retention_window_hours": 48, "reconcile_interval_secs": 60 }"#)
                .unwrap();

        assert_eq!(config.retention_window_hours, 48);
        assert_eq!(config.reconcile_interval_secs, 60);
    }
}
