//! Metrics collection for the telemetry agent
//!
//! One [`MetricsCollector::collect`] call is one collection pass:
//! - every capability runs on its own blocking task, bounded by a timeout
//! - a failing metric is logged and reported as a [`MetricFailure`], the rest
//!   of the record is still filled in
//! - a metric whose previous call is still running is not sampled again
//! - cpu / memory / disk / uptime respect the enabled set, network counters
//!   are always sampled

pub mod sampler;

use crate::config::{Configuration, Metric};
use chrono::Utc;
use sampler::{NetworkTotals, SampleError, Sampler};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one collection pass.
///
/// Disabled and failed metrics both stay at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsRecord {
    pub host_id: String,
    /// Unix seconds, taken once at the start of the pass
    pub timestamp: i64,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
    /// Cumulative since boot, not a delta
    pub network_bytes_in: u64,
    pub network_bytes_out: u64,
    pub uptime_seconds: u64,
}

/// Diagnostic event for a metric that could not be sampled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFailure {
    pub metric: Metric,
    pub error: SampleError,
}

/// A record plus the failures observed while building it
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub record: MetricsRecord,
    pub failures: Vec<MetricFailure>,
}

pub struct MetricsCollector {
    sampler: Arc<dyn Sampler>,
    timeout: Duration,
    diagnostics: Option<UnboundedSender<MetricFailure>>,
    in_flight: Arc<[AtomicBool; 5]>,
}

impl MetricsCollector {
    pub fn new(sampler: Arc<dyn Sampler>) -> Self {
        Self {
            sampler,
            timeout: DEFAULT_SAMPLE_TIMEOUT,
            diagnostics: None,
            in_flight: Arc::default(),
        }
    }

    /// Upper bound for a single sampling call.
    ///
    /// A blocking call that overruns keeps its pool thread (and any sampler
    /// lock) until it returns; until then that metric reports
    /// `SampleError::InFlight` instead of stacking another call behind it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forward every per-metric failure to `tx`
    pub fn with_diagnostics(mut self, tx: UnboundedSender<MetricFailure>) -> Self {
        self.diagnostics = Some(tx);
        self
    }

    /// Run one collection pass. Never fails as a whole.
    pub async fn collect(&self, config: &Configuration) -> MetricsRecord {
        self.collect_with_failures(config).await.record
    }

    pub async fn collect_with_failures(&self, config: &Configuration) -> Collection {
        let timestamp = Utc::now().timestamp();
        debug!(host_id = %config.host_id, "collecting metrics");

        let (cpu, memory, disk, network, uptime) = tokio::join!(
            self.sample_enabled(config, Metric::Cpu, |s| s.cpu_usage()),
            self.sample_enabled(config, Metric::Memory, |s| s.memory_usage()),
            self.sample_enabled(config, Metric::Disk, |s| s.disk_usage()),
            self.sample(Metric::Network, |s| s.network_totals()),
            self.sample_enabled(config, Metric::Uptime, |s| s.uptime()),
        );

        let mut failures = Vec::new();
        let cpu = settle(Metric::Cpu, cpu, &mut failures).map(clamp_percent);
        let memory = settle(Metric::Memory, memory, &mut failures).map(clamp_percent);
        let disk = settle(Metric::Disk, disk, &mut failures).map(clamp_percent);
        let network = settle(Metric::Network, Some(network), &mut failures);
        let uptime = settle(Metric::Uptime, uptime, &mut failures);

        for failure in &failures {
            self.report(failure);
        }

        let network = network.unwrap_or_default();
        let record = MetricsRecord {
            host_id: config.host_id.clone(),
            timestamp,
            cpu_usage_percent: cpu.unwrap_or_default(),
            memory_usage_percent: memory.unwrap_or_default(),
            disk_usage_percent: disk.unwrap_or_default(),
            network_bytes_in: network.bytes_in,
            network_bytes_out: network.bytes_out,
            uptime_seconds: uptime.unwrap_or_default(),
        };

        info!(
            host_id = %record.host_id,
            cpu = ?cpu,
            memory = ?memory,
            disk = ?disk,
            uptime = ?uptime,
            failed = failures.len(),
            "collected metrics"
        );

        Collection { record, failures }
    }

    async fn sample_enabled<T, F>(
        &self,
        config: &Configuration,
        metric: Metric,
        read: F,
    ) -> Option<Result<T, SampleError>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Sampler) -> Result<T, SampleError> + Send + 'static,
    {
        if !config.is_enabled(metric) {
            return None;
        }
        Some(self.sample(metric, read).await)
    }

    async fn sample<T, F>(&self, metric: Metric, read: F) -> Result<T, SampleError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Sampler) -> Result<T, SampleError> + Send + 'static,
    {
        let guard = InFlightGuard::acquire(&self.in_flight, metric).ok_or(SampleError::InFlight)?;
        let sampler = self.sampler.clone();
        let task = tokio::task::spawn_blocking(move || {
            // released when the call returns or unwinds, not when the timeout fires
            let _guard = guard;
            read(sampler.as_ref())
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SampleError::Aborted(join_error.to_string())),
            Err(_) => Err(SampleError::TimedOut(self.timeout)),
        }
    }

    fn report(&self, failure: &MetricFailure) {
        warn!(metric = %failure.metric, error = %failure.error, "failed to collect metric");

        if let Some(tx) = &self.diagnostics {
            // nobody listening is fine
            let _ = tx.send(failure.clone());
        }
    }
}

/// Marks a metric as being sampled for as long as the blocking call lives
struct InFlightGuard {
    flags: Arc<[AtomicBool; 5]>,
    slot: usize,
}

impl InFlightGuard {
    fn acquire(flags: &Arc<[AtomicBool; 5]>, metric: Metric) -> Option<Self> {
        let slot = metric as usize;
        if flags[slot].swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self { flags: flags.clone(), slot })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flags[self.slot].store(false, Ordering::Release);
    }
}

fn settle<T>(
    metric: Metric,
    outcome: Option<Result<T, SampleError>>,
    failures: &mut Vec<MetricFailure>,
) -> Option<T> {
    match outcome? {
        Ok(value) => Some(value),
        Err(error) => {
            failures.push(MetricFailure { metric, error });
            None
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
