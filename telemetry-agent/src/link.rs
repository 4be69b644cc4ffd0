//! MQTT link to the collector endpoint
//!
//! - Publishes each [`MetricsRecord`] to `telemetry/agents/metrics@v1/{host_id}`
//! - Listens for reconfiguration requests on `telemetry/agents/config@v1/{host_id}`
//! - Answers every request on `telemetry/agents/config-ack@v1/{host_id}`

use crate::agent::RecordSink;
use crate::config::{ConfigPatch, Configuration};
use crate::metrics::MetricsRecord;
use crate::store::ConfigStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;

pub fn metrics_topic(host_id: &str) -> String {
    format!("telemetry/agents/metrics@v1/{}", host_id)
}

pub fn control_topic(host_id: &str) -> String {
    format!("telemetry/agents/config@v1/{}", host_id)
}

pub fn ack_topic(host_id: &str) -> String {
    format!("telemetry/agents/config-ack@v1/{}", host_id)
}

/// Split `host:port`, `mqtt://host:port` or `tcp://host:port` into its parts
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let trimmed = endpoint.trim();
    let addr = trimmed
        .strip_prefix("mqtt://")
        .or_else(|| trimmed.strip_prefix("tcp://"))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in collector endpoint '{}'", endpoint))?;
            (host, port)
        }
        None => (addr, DEFAULT_MQTT_PORT),
    };

    if host.is_empty() {
        bail!("Collector endpoint '{}' has no host", endpoint);
    }
    Ok((host.to_string(), port))
}

/// Reply published after each reconfiguration request
#[derive(Debug, Serialize)]
pub struct ConfigAck {
    pub host_id: String,
    pub status: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConfigAck {
    fn from_outcome(host_id: &str, outcome: &Result<()>) -> Self {
        let (status, error) = match outcome {
            Ok(()) => ("applied", None),
            Err(e) => ("rejected", Some(format!("{:#}", e))),
        };
        ConfigAck {
            host_id: host_id.to_string(),
            status: status.to_string(),
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Decode a control message and apply it to the store
pub fn apply_control_message(store: &ConfigStore, payload: &[u8]) -> Result<()> {
    let patch: ConfigPatch =
        serde_json::from_slice(payload).context("Failed to decode reconfiguration request")?;
    store.reconfigure(&patch)?;
    Ok(())
}

pub struct MqttLink {
    client: AsyncClient,
    store: Arc<ConfigStore>,
    endpoint: String,
    host_id: String,
    event_loop: JoinHandle<()>,
}

impl MqttLink {
    /// Open a link to the endpoint named by `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: &Configuration, store: Arc<ConfigStore>) -> Result<Self> {
        let (host, port) = parse_endpoint(&config.collector_endpoint)?;

        let client_id = format!(
            "telemetry-agent-{}-{}",
            config.host_id,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(KEEP_ALIVE);
        mqtt_options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let event_loop = spawn_event_loop(eventloop, client.clone(), store.clone(), config.host_id.clone());

        info!(endpoint = %config.collector_endpoint, host_id = %config.host_id, "collector link started");

        Ok(MqttLink {
            client,
            store,
            endpoint: config.collector_endpoint.clone(),
            host_id: config.host_id.clone(),
            event_loop,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        let _ = self.client.try_disconnect();
        self.event_loop.abort();
    }
}

impl RecordSink for MqttLink {
    fn publish(&self, record: &MetricsRecord) -> Result<()> {
        let payload = serde_json::to_vec(record).context("Failed to serialize metrics record")?;
        self.client
            .try_publish(metrics_topic(&record.host_id), QoS::AtLeastOnce, false, payload)
            .context("Failed to queue metrics record")?;
        debug!(host_id = %record.host_id, "metrics record queued");
        Ok(())
    }

    fn sync_config(&mut self, config: &Configuration) -> Result<()> {
        if config.collector_endpoint == self.endpoint && config.host_id == self.host_id {
            return Ok(());
        }

        info!(
            endpoint = %config.collector_endpoint,
            host_id = %config.host_id,
            "collector settings changed, reconnecting"
        );
        *self = MqttLink::connect(config, self.store.clone())?;
        Ok(())
    }
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    store: Arc<ConfigStore>,
    host_id: String,
) -> JoinHandle<()> {
    let control = control_topic(&host_id);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    // clean sessions drop subscriptions, so subscribe on every connect
                    if let Err(e) = client.try_subscribe(control.clone(), QoS::AtLeastOnce) {
                        error!(error = %e, topic = %control, "failed to subscribe to control topic");
                    } else {
                        info!(topic = %control, "listening for reconfiguration requests");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == control => {
                    let outcome = apply_control_message(&store, &publish.payload);
                    if let Err(e) = &outcome {
                        let reason = format!("{:#}", e);
                        warn!(error = %reason, "reconfiguration request rejected");
                    }
                    publish_ack(&client, &host_id, &outcome);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    })
}

fn publish_ack(client: &AsyncClient, host_id: &str, outcome: &Result<()>) {
    let ack = ConfigAck::from_outcome(host_id, outcome);
    match serde_json::to_vec(&ack) {
        Ok(payload) => {
            if let Err(e) = client.try_publish(ack_topic(host_id), QoS::AtLeastOnce, false, payload) {
                error!(error = %e, "failed to publish config ack");
            }
        }
        Err(e) => error!(error = %e, "failed to serialize config ack"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::collections::HashMap;

    fn loaded_store() -> ConfigStore {
        let raw: HashMap<String, String> = [
            ("AGENT_HOST_ID", "web-01"),
            ("AGENT_METRICS_INTERVAL", "10"),
            ("AGENT_ENABLED_METRICS", "cpu"),
            ("AGENT_COLLECTOR_ENDPOINT", "127.0.0.1:1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let store = ConfigStore::new();
        store.load(&raw).unwrap();
        store
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("collector:1884").unwrap(), ("collector".into(), 1884));
        assert_eq!(parse_endpoint("mqtt://10.0.0.5:1883/").unwrap(), ("10.0.0.5".into(), 1883));
        assert_eq!(parse_endpoint("tcp://broker").unwrap(), ("broker".into(), DEFAULT_MQTT_PORT));
        assert_eq!(parse_endpoint(" sink ").unwrap(), ("sink".into(), DEFAULT_MQTT_PORT));
        assert!(parse_endpoint("broker:http").is_err());
        assert!(parse_endpoint("mqtt://:1883").is_err());
    }

    #[test]
    fn test_topics() {
        assert_eq!(metrics_topic("web-01"), "telemetry/agents/metrics@v1/web-01");
        assert_eq!(control_topic("web-01"), "telemetry/agents/config@v1/web-01");
        assert_eq!(ack_topic("web-01"), "telemetry/agents/config-ack@v1/web-01");
    }

    #[test]
    fn test_control_message_applies_patch() {
        let store = loaded_store();
        apply_control_message(&store, br#"{"metrics_interval": 60, "enabled_metrics": ["disk", "uptime"]}"#)
            .unwrap();

        let config = store.current().unwrap();
        assert_eq!(config.metrics_interval_seconds, 60);
        assert_eq!(config.host_id, "web-01");
        assert_eq!(config.enabled_metrics.len(), 2);
    }

    #[test]
    fn test_control_message_failures_keep_config() {
        let store = loaded_store();
        let before = store.current().unwrap();

        assert!(apply_control_message(&store, b"not json").is_err());

        let err = apply_control_message(&store, br#"{"enabled_metrics": ["cpu", "fan"]}"#).unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::Validation(_))));

        assert_eq!(store.current().unwrap(), before);
    }

    #[test]
    fn test_config_ack_reports_outcome() {
        let ok = ConfigAck::from_outcome("web-01", &Ok(()));
        assert_eq!(ok.status, "applied");
        assert!(ok.error.is_none());

        let rejected = ConfigAck::from_outcome("web-01", &Err(anyhow::anyhow!("bad interval")));
        assert_eq!(rejected.status, "rejected");
        assert_eq!(rejected.error.as_deref(), Some("bad interval"));
    }

    #[tokio::test]
    async fn test_link_queues_records_without_broker() {
        let store = Arc::new(loaded_store());
        let config = store.current().unwrap();
        let link = MqttLink::connect(&config, store.clone()).unwrap();

        assert_eq!(link.endpoint(), "127.0.0.1:1");
        assert_eq!(link.host_id(), "web-01");

        let record = MetricsRecord { host_id: "web-01".into(), ..Default::default() };
        link.publish(&record).unwrap();
    }

    #[tokio::test]
    async fn test_sync_config_reconnects_on_change() {
        let store = Arc::new(loaded_store());
        let mut link = MqttLink::connect(&store.current().unwrap(), store.clone()).unwrap();

        store
            .reconfigure(&ConfigPatch { collector_endpoint: Some("127.0.0.1:2".into()), ..Default::default() })
            .unwrap();
        link.sync_config(&store.current().unwrap()).unwrap();
        assert_eq!(link.endpoint(), "127.0.0.1:2");
    }
}
