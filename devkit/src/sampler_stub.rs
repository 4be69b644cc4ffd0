/*!
Scripted sampler for tests without a real host

Each capability returns a scripted value or error and counts its calls, so
tests can check both what ended up in a record and what was sampled at all.
*/

use std::sync::atomic::{AtomicUsize, Ordering};
use telemetry_agent::{Metric, NetworkTotals, SampleError, Sampler};

pub struct ScriptedSampler {
    cpu: Result<f64, SampleError>,
    memory: Result<f64, SampleError>,
    disk: Result<f64, SampleError>,
    network: Result<NetworkTotals, SampleError>,
    uptime: Result<u64, SampleError>,
    calls: [AtomicUsize; 5],
}

impl ScriptedSampler {
    /// Every capability succeeds with zero until scripted otherwise
    pub fn new() -> Self {
        Self {
            cpu: Ok(0.0),
            memory: Ok(0.0),
            disk: Ok(0.0),
            network: Ok(NetworkTotals::default()),
            uptime: Ok(0),
            calls: Default::default(),
        }
    }

    pub fn cpu(mut self, percent: f64) -> Self {
        self.cpu = Ok(percent);
        self
    }

    pub fn memory(mut self, percent: f64) -> Self {
        self.memory = Ok(percent);
        self
    }

    pub fn disk(mut self, percent: f64) -> Self {
        self.disk = Ok(percent);
        self
    }

    pub fn network(mut self, bytes_in: u64, bytes_out: u64) -> Self {
        self.network = Ok(NetworkTotals { bytes_in, bytes_out });
        self
    }

    pub fn uptime(mut self, seconds: u64) -> Self {
        self.uptime = Ok(seconds);
        self
    }

    /// Make one capability fail with `SampleError::Unavailable(reason)`
    pub fn fail(mut self, metric: Metric, reason: &str) -> Self {
        let error = SampleError::Unavailable(reason.to_string());
        match metric {
            Metric::Cpu => self.cpu = Err(error),
            Metric::Memory => self.memory = Err(error),
            Metric::Disk => self.disk = Err(error),
            Metric::Network => self.network = Err(error),
            Metric::Uptime => self.uptime = Err(error),
        }
        self
    }

    /// How many times the capability behind `metric` was invoked
    pub fn calls(&self, metric: Metric) -> usize {
        self.calls[slot(metric)].load(Ordering::SeqCst)
    }

    fn hit<T: Clone>(&self, metric: Metric, scripted: &Result<T, SampleError>) -> Result<T, SampleError> {
        self.calls[slot(metric)].fetch_add(1, Ordering::SeqCst);
        scripted.clone()
    }
}

impl Default for ScriptedSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(metric: Metric) -> usize {
    match metric {
        Metric::Cpu => 0,
        Metric::Memory => 1,
        Metric::Disk => 2,
        Metric::Network => 3,
        Metric::Uptime => 4,
    }
}

impl Sampler for ScriptedSampler {
    fn cpu_usage(&self) -> Result<f64, SampleError> {
        self.hit(Metric::Cpu, &self.cpu)
    }

    fn memory_usage(&self) -> Result<f64, SampleError> {
        self.hit(Metric::Memory, &self.memory)
    }

    fn disk_usage(&self) -> Result<f64, SampleError> {
        self.hit(Metric::Disk, &self.disk)
    }

    fn network_totals(&self) -> Result<NetworkTotals, SampleError> {
        self.hit(Metric::Network, &self.network)
    }

    fn uptime(&self) -> Result<u64, SampleError> {
        self.hit(Metric::Uptime, &self.uptime)
    }
}
