//! Collection driver
//!
//! Each cycle reads a fresh configuration snapshot, so a reconfiguration
//! takes effect on the next cycle and never in the middle of one.

use crate::config::{ConfigError, Configuration};
use crate::metrics::{MetricsCollector, MetricsRecord};
use crate::store::ConfigStore;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Destination for collected records
pub trait RecordSink: Send {
    fn publish(&self, record: &MetricsRecord) -> Result<()>;

    /// Called with each cycle's snapshot before collecting
    fn sync_config(&mut self, _config: &Configuration) -> Result<()> {
        Ok(())
    }
}

pub struct Agent<S> {
    store: Arc<ConfigStore>,
    collector: MetricsCollector,
    sink: S,
}

impl<S: RecordSink> Agent<S> {
    pub fn new(store: Arc<ConfigStore>, collector: MetricsCollector, sink: S) -> Self {
        Self { store, collector, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// One collection pass. Returns how long to wait before the next one.
    pub async fn run_cycle(&mut self) -> Result<Duration, ConfigError> {
        let config = self.store.current()?;

        if let Err(e) = self.sink.sync_config(&config) {
            warn!(error = %e, "failed to apply collector settings, keeping previous link");
        }

        let record = self.collector.collect(&config).await;
        if let Err(e) = self.sink.publish(&record) {
            error!(error = %e, "failed to publish metrics");
        }

        Ok(config.interval())
    }

    /// Run cycles until `shutdown` resolves. A pass in progress always completes.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), ConfigError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("starting metrics collection");

        loop {
            let interval = self.run_cycle().await?;

            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping metrics collection");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
