/*!
Test helpers for the telemetry agent

- Recording sink that keeps every published record for assertions
- Raw configuration mappings shaped like the agent's environment
*/

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use telemetry_agent::{MetricsRecord, RecordSink};

/// Sink that stores records instead of sending them anywhere
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<MetricsRecord>>>,
    failing: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every publish fails, like an unreachable collector
    pub fn failing() -> Self {
        Self { failing: true, ..Self::default() }
    }

    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }

    pub fn last(&self) -> Option<MetricsRecord> {
        self.records.lock().last().cloned()
    }
}

impl RecordSink for RecordingSink {
    fn publish(&self, record: &MetricsRecord) -> Result<()> {
        if self.failing {
            anyhow::bail!("collector unreachable");
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// A complete, valid `AGENT_*` mapping
pub fn valid_raw_config(host_id: &str, interval: &str, metrics: &str) -> HashMap<String, String> {
    [
        ("AGENT_HOST_ID", host_id),
        ("AGENT_METRICS_INTERVAL", interval),
        ("AGENT_ENABLED_METRICS", metrics),
        ("AGENT_COLLECTOR_ENDPOINT", "mqtt://127.0.0.1:1883"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Route agent logs through the test harness output
pub fn init_test_logging() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_records() {
        let sink = RecordingSink::new();
        let shared = sink.clone();
        sink.publish(&MetricsRecord { host_id: "a".into(), ..Default::default() }).unwrap();

        assert_eq!(shared.records().len(), 1);
        assert_eq!(shared.last().unwrap().host_id, "a");
        assert!(RecordingSink::failing().publish(&MetricsRecord::default()).is_err());
    }

    #[test]
    fn test_valid_raw_config_has_all_keys() {
        let raw = valid_raw_config("web-01", "10", "cpu");
        assert_eq!(raw.len(), 4);
        assert_eq!(raw["AGENT_HOST_ID"], "web-01");
    }
}
