//! Authoritative holder of the active configuration
//!
//! The store starts empty, becomes loaded on the first successful `load`, and
//! from then on only changes through whole-record swaps. Readers receive value
//! copies, so a snapshot is never mutated underneath them.

use crate::config::{ConfigError, ConfigPatch, Configuration};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Option<Arc<Configuration>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse, validate and install a configuration from the raw source mapping.
    ///
    /// On failure the previously active configuration (if any) stays in place.
    pub fn load(&self, raw: &HashMap<String, String>) -> Result<(), ConfigError> {
        let config = Configuration::from_raw(raw)?;

        info!(
            host_id = %config.host_id,
            interval = config.metrics_interval_seconds,
            enabled_metrics = ?config.enabled_metrics,
            "config loaded"
        );

        *self.current.write() = Some(Arc::new(config));
        Ok(())
    }

    /// Snapshot of the active configuration
    pub fn current(&self) -> Result<Configuration, ConfigError> {
        self.current
            .read()
            .as_deref()
            .cloned()
            .ok_or(ConfigError::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Merge `patch` over the active configuration and swap it in if valid.
    ///
    /// Read, merge, validate and swap all happen under one write guard, so
    /// concurrent reconfigurations never interleave.
    pub fn reconfigure(&self, patch: &ConfigPatch) -> Result<(), ConfigError> {
        let mut guard = self.current.write();
        let current = guard.as_deref().ok_or(ConfigError::NotLoaded)?;

        let candidate = match patch.merge_onto(current) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(error = %e, "config update rejected");
                return Err(e);
            }
        };

        info!(
            host_id = %candidate.host_id,
            metrics_interval = candidate.metrics_interval_seconds,
            enabled_metrics = ?candidate.enabled_metrics,
            "config updated"
        );

        *guard = Some(Arc::new(candidate));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use std::collections::BTreeSet;
    use std::thread;

    fn raw() -> HashMap<String, String> {
        [
            ("AGENT_HOST_ID", "web-01"),
            ("AGENT_METRICS_INTERVAL", "10"),
            ("AGENT_ENABLED_METRICS", "cpu,memory"),
            ("AGENT_COLLECTOR_ENDPOINT", "localhost:1883"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn loaded() -> ConfigStore {
        let store = ConfigStore::new();
        store.load(&raw()).unwrap();
        store
    }

    #[test]
    fn test_unloaded_store() {
        let store = ConfigStore::new();
        assert!(!store.is_loaded());
        assert_eq!(store.current(), Err(ConfigError::NotLoaded));
        assert_eq!(
            store.reconfigure(&ConfigPatch::default()),
            Err(ConfigError::NotLoaded)
        );
    }

    #[test]
    fn test_load_then_current() {
        let store = loaded();
        let config = store.current().unwrap();
        assert_eq!(config.host_id, "web-01");
        assert_eq!(config.metrics_interval_seconds, 10);
        assert_eq!(config.enabled_metrics, BTreeSet::from([Metric::Cpu, Metric::Memory]));
        assert_eq!(config.collector_endpoint, "localhost:1883");
    }

    #[test]
    fn test_failed_load_keeps_previous() {
        let store = loaded();
        let before = store.current().unwrap();

        let mut bad = raw();
        bad.remove("AGENT_COLLECTOR_ENDPOINT");
        assert_eq!(
            store.load(&bad),
            Err(ConfigError::MissingKey("AGENT_COLLECTOR_ENDPOINT"))
        );
        assert_eq!(store.current().unwrap(), before);

        let fresh = ConfigStore::new();
        assert!(fresh.load(&bad).is_err());
        assert!(!fresh.is_loaded());
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let store = loaded();
        let before = store.current().unwrap();
        store.reconfigure(&ConfigPatch::default()).unwrap();
        assert_eq!(store.current().unwrap(), before);
    }

    #[test]
    fn test_single_field_patch() {
        let store = loaded();
        let before = store.current().unwrap();
        store
            .reconfigure(&ConfigPatch { metrics_interval: Some(45), ..Default::default() })
            .unwrap();

        let after = store.current().unwrap();
        assert_eq!(after.metrics_interval_seconds, 45);
        assert_eq!(after.host_id, before.host_id);
        assert_eq!(after.enabled_metrics, before.enabled_metrics);
        assert_eq!(after.collector_endpoint, before.collector_endpoint);
    }

    #[test]
    fn test_invalid_patch_leaves_state_unchanged() {
        let store = loaded();
        let before = store.current().unwrap();

        let negative = ConfigPatch { metrics_interval: Some(-3), ..Default::default() };
        assert!(matches!(store.reconfigure(&negative), Err(ConfigError::Validation(_))));

        let unknown = ConfigPatch {
            host_id: Some("web-02".into()),
            enabled_metrics: Some(vec!["cpu".into(), "temperature".into()]),
            ..Default::default()
        };
        assert!(matches!(store.reconfigure(&unknown), Err(ConfigError::Validation(_))));

        assert_eq!(store.current().unwrap(), before);
    }

    #[test]
    fn test_metric_tokens_are_case_sensitive() {
        for token in ["CPU", "Cpu"] {
            let mut wrong_case = raw();
            wrong_case.insert("AGENT_ENABLED_METRICS".into(), format!("{token},memory"));
            let fresh = ConfigStore::new();
            assert!(matches!(fresh.load(&wrong_case), Err(ConfigError::Validation(_))));
            assert!(!fresh.is_loaded());

            let store = loaded();
            let before = store.current().unwrap();
            let patch = ConfigPatch {
                enabled_metrics: Some(vec![token.to_string()]),
                ..Default::default()
            };
            assert!(matches!(store.reconfigure(&patch), Err(ConfigError::Validation(_))));
            assert_eq!(store.current().unwrap(), before);
        }
    }

    #[test]
    fn test_load_and_reconfigure_trim_alike() {
        let mut padded = raw();
        padded.insert("AGENT_HOST_ID".into(), "  web-01  ".into());
        let store = ConfigStore::new();
        store.load(&padded).unwrap();
        assert_eq!(store.current().unwrap().host_id, "web-01");

        store
            .reconfigure(&ConfigPatch { host_id: Some("  web-02  ".into()), ..Default::default() })
            .unwrap();
        assert_eq!(store.current().unwrap().host_id, "web-02");
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = loaded();
        let snapshot = store.current().unwrap();
        store
            .reconfigure(&ConfigPatch { host_id: Some("web-09".into()), ..Default::default() })
            .unwrap();
        assert_eq!(snapshot.host_id, "web-01");
        assert_eq!(store.current().unwrap().host_id, "web-09");
    }

    #[test]
    fn test_concurrent_reconfigure_and_read() {
        let store = Arc::new(loaded());

        let writers: Vec<_> = (1..=8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    store
                        .reconfigure(&ConfigPatch {
                            host_id: Some(format!("host-{i}")),
                            metrics_interval: Some(i),
                            ..Default::default()
                        })
                        .unwrap();
                })
            })
            .collect();

        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let config = store.current().unwrap();
                    // host id and interval are always written together
                    if config.host_id != "web-01" {
                        assert_eq!(config.host_id, format!("host-{}", config.metrics_interval_seconds));
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        let last = store.current().unwrap();
        assert_eq!(last.host_id, format!("host-{}", last.metrics_interval_seconds));
    }
}
