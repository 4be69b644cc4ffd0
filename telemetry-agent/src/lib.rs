//! Telemetry Agent - host metrics acquisition and live reconfiguration
//!
//! - `store`: the single authoritative configuration, swapped whole on change
//! - `metrics`: per-pass collection with per-metric failure isolation
//! - `link`: MQTT link carrying records out and reconfiguration requests in
//! - `agent`: the interval-driven collection loop

pub mod agent;
pub mod config;
pub mod link;
pub mod metrics;
pub mod store;

pub use agent::{Agent, RecordSink};
pub use config::{ConfigError, ConfigPatch, Configuration, Metric};
pub use metrics::sampler::{NetworkTotals, SampleError, Sampler, SysinfoSampler};
pub use metrics::{Collection, MetricFailure, MetricsCollector, MetricsRecord};
pub use store::ConfigStore;
