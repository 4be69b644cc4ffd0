//! OS sampling capabilities
//!
//! [`Sampler`] is the seam between the collector and the operating system.
//! Each capability fails independently; the collector decides what a failure
//! means for the record.

use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, Networks, System};

/// Failure of a single sampling capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("{0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("sampler aborted: {0}")]
    Aborted(String),
    #[error("previous call still running")]
    InFlight,
}

/// Cumulative byte counters since boot, summed over every interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkTotals {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Read-only access to the host's current resource usage.
///
/// Calls may block; the collector runs them off the async executor.
pub trait Sampler: Send + Sync {
    /// Instantaneous CPU utilization, percent
    fn cpu_usage(&self) -> Result<f64, SampleError>;

    /// Used virtual memory, percent
    fn memory_usage(&self) -> Result<f64, SampleError>;

    /// Used space on the root filesystem, percent
    fn disk_usage(&self) -> Result<f64, SampleError>;

    fn network_totals(&self) -> Result<NetworkTotals, SampleError>;

    /// Seconds since boot
    fn uptime(&self) -> Result<u64, SampleError>;
}

/// Production sampler backed by `sysinfo`
pub struct SysinfoSampler {
    system: Mutex<System>,
    disks: Mutex<Disks>,
    networks: Mutex<Networks>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // First CPU reading is a baseline; usage is the delta to the next refresh
        system.refresh_cpu_usage();

        Self {
            system: Mutex::new(system),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SysinfoSampler {
    fn cpu_usage(&self) -> Result<f64, SampleError> {
        let mut sys = self.system.lock();
        sys.refresh_cpu_usage();

        if sys.cpus().is_empty() {
            return Err(SampleError::Unavailable("no CPU information".into()));
        }
        Ok(sys.global_cpu_info().cpu_usage() as f64)
    }

    fn memory_usage(&self) -> Result<f64, SampleError> {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return Err(SampleError::Unavailable("memory information unavailable".into()));
        }
        Ok(sys.used_memory() as f64 / total as f64 * 100.0)
    }

    fn disk_usage(&self) -> Result<f64, SampleError> {
        let mut disks = self.disks.lock();
        disks.refresh_list();

        let list = disks.list();
        let root = list
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| list.first())
            .ok_or_else(|| SampleError::Unavailable("no mounted filesystem found".into()))?;

        let total = root.total_space();
        if total == 0 {
            return Err(SampleError::Unavailable(format!(
                "filesystem at {} reports zero size",
                root.mount_point().display()
            )));
        }
        let used = total.saturating_sub(root.available_space());
        Ok(used as f64 / total as f64 * 100.0)
    }

    fn network_totals(&self) -> Result<NetworkTotals, SampleError> {
        let mut networks = self.networks.lock();
        networks.refresh_list();

        Ok(networks
            .list()
            .values()
            .fold(NetworkTotals::default(), |acc, data| NetworkTotals {
                bytes_in: acc.bytes_in.saturating_add(data.total_received()),
                bytes_out: acc.bytes_out.saturating_add(data.total_transmitted()),
            }))
    }

    fn uptime(&self) -> Result<u64, SampleError> {
        match System::uptime() {
            0 => Err(SampleError::Unavailable("uptime unavailable".into())),
            secs => Ok(secs),
        }
    }
}
