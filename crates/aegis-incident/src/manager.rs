//! Alert manager: deduplicated multi-channel fan-out.
//!
//! Channels are delivered concurrently, each bounded by its own timeout,
//! so a slow sink can neither stall ingestion nor block its peers. A
//! failed channel is recorded on the per-channel result and never fails
//! the dispatch. Durable persistence happens after delivery, off the
//! ingest path.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use aegis_core::clock::SharedClock;
use aegis_core::error::{Error, Result};

use crate::alert::{generic_payload, pagerduty_payload, slack_payload, Alert, AlertSeverity, ChannelKind};
use crate::dedup::AlertDeduplicator;
use crate::store::AlertStore;

/// One channel's delivery outcome.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Channel name
    pub channel: String,
    /// Whether delivery succeeded
    pub success: bool,
    /// Failure detail, when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completion time
    pub timestamp: DateTime<Utc>,
}

/// An alert delivery target.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name (unique within a manager).
    fn name(&self) -> &str;

    /// Channel kind.
    fn kind(&self) -> ChannelKind;

    /// Minimum severity this channel accepts.
    fn min_severity(&self) -> AlertSeverity {
        AlertSeverity::Info
    }

    /// Deliver one alert. Blocking I/O belongs behind this seam.
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Posts a JSON payload somewhere. HTTP clients, queue producers, and test
/// doubles implement this; the core never opens sockets itself.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Post a payload to a URL.
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Channel that formats alerts per its kind and posts via a transport.
pub struct WebhookChannel {
    name: String,
    kind: ChannelKind,
    url: String,
    routing_key: Option<String>,
    min_severity: AlertSeverity,
    transport: Arc<dyn WebhookTransport>,
}

impl std::fmt::Debug for WebhookChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookChannel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .finish()
    }
}

impl WebhookChannel {
    /// Create a webhook channel.
    pub fn new(
        name: impl Into<String>,
        kind: ChannelKind,
        url: impl Into<String>,
        min_severity: AlertSeverity,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            routing_key: None,
            min_severity,
            transport,
        }
    }

    /// Attach a routing key (PagerDuty/Opsgenie style).
    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let payload = match self.kind {
            ChannelKind::Slack | ChannelKind::Teams => slack_payload(alert),
            ChannelKind::PagerDuty | ChannelKind::Opsgenie => {
                pagerduty_payload(alert, self.routing_key.as_deref().unwrap_or_default())
            }
            _ => generic_payload(alert),
        };
        self.transport.post(&self.url, &payload).await
    }
}

/// In-process callback channel, used by tests and embedded consumers.
pub struct CallbackChannel {
    name: String,
    min_severity: AlertSeverity,
    callback: Arc<dyn Fn(&Alert) + Send + Sync>,
}

impl std::fmt::Debug for CallbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackChannel").field("name", &self.name).finish()
    }
}

impl CallbackChannel {
    /// Create a callback channel.
    pub fn new(
        name: impl Into<String>,
        min_severity: AlertSeverity,
        callback: Arc<dyn Fn(&Alert) + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            min_severity,
            callback,
        }
    }
}

#[async_trait]
impl AlertChannel for CallbackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::InProcessCallback
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        (self.callback)(alert);
        Ok(())
    }
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    /// Dedup window in seconds
    pub dedup_window_secs: u64,
    /// Per-channel delivery timeout in seconds
    pub delivery_timeout_secs: u64,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            delivery_timeout_secs: 10,
        }
    }
}

/// Deduplicated multi-channel alert dispatcher.
pub struct AlertManager {
    config: AlertManagerConfig,
    channels: RwLock<Vec<Arc<dyn AlertChannel>>>,
    dedup: AlertDeduplicator,
    store: Option<Arc<dyn AlertStore>>,
    clock: SharedClock,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("config", &self.config)
            .field("channels", &self.channels.read().unwrap().len())
            .finish()
    }
}

impl AlertManager {
    /// Create a manager without persistence.
    pub fn new(config: AlertManagerConfig, clock: SharedClock) -> Self {
        let dedup = AlertDeduplicator::new(config.dedup_window_secs, clock.clone());
        Self {
            config,
            channels: RwLock::new(Vec::new()),
            dedup,
            store: None,
            clock,
        }
    }

    /// Create a manager with default windows.
    pub fn with_defaults(clock: SharedClock) -> Self {
        Self::new(AlertManagerConfig::default(), clock)
    }

    /// Attach a durable alert store; appends happen after delivery.
    pub fn with_store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a channel.
    pub fn add_channel(&self, channel: Arc<dyn AlertChannel>) {
        self.channels.write().unwrap().push(channel);
    }

    /// Remove a channel by name.
    pub fn remove_channel(&self, name: &str) {
        self.channels.write().unwrap().retain(|c| c.name() != name);
    }

    /// Registered channel names.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .read()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Suppression counts recorded by the deduplicator.
    pub fn suppression_counts(&self) -> std::collections::HashMap<String, u64> {
        self.dedup.suppression_counts()
    }

    /// Dispatch an alert to every matching channel. Duplicates within the
    /// dedup window return an empty result set. Channels deliver
    /// concurrently, each bounded by the configured timeout; one channel's
    /// failure never affects another.
    pub async fn send(&self, alert: Alert) -> Vec<DeliveryResult> {
        if !self.dedup.should_send(&alert) {
            debug!(title = %alert.title, "alert suppressed by dedup window");
            return Vec::new();
        }

        let targets: Vec<Arc<dyn AlertChannel>> = self
            .channels
            .read()
            .unwrap()
            .iter()
            .filter(|c| alert.severity.rank() >= c.min_severity().rank())
            .cloned()
            .collect();

        let timeout = Duration::from_secs(self.config.delivery_timeout_secs);
        let mut join_set = JoinSet::new();
        for channel in targets {
            let alert_clone = alert.clone();
            join_set.spawn(async move {
                let name = channel.name().to_string();
                let outcome = tokio::time::timeout(timeout, channel.deliver(&alert_clone)).await;
                let result = match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::DeliveryFailed {
                        channel: name.clone(),
                        reason: format!("timed out after {}s", timeout.as_secs()),
                    }),
                };
                (name, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let now = self.clock.now();
            match joined {
                Ok((name, Ok(()))) => {
                    metrics::counter!("aegis_alerts_delivered_total", "channel" => name.clone())
                        .increment(1);
                    results.push(DeliveryResult {
                        channel: name,
                        success: true,
                        error: None,
                        timestamp: now,
                    });
                }
                Ok((name, Err(e))) => {
                    warn!(channel = %name, error = %e, "alert delivery failed");
                    metrics::counter!("aegis_alerts_failed_total", "channel" => name.clone())
                        .increment(1);
                    results.push(DeliveryResult {
                        channel: name,
                        success: false,
                        error: Some(e.to_string()),
                        timestamp: now,
                    });
                }
                Err(join_error) => {
                    warn!(error = %join_error, "alert delivery task panicked");
                }
            }
        }

        self.dedup.record(&alert);

        // Persistence sits after delivery, never on the ingest path.
        if let Some(store) = &self.store {
            if let Err(e) = store.append(&alert).await {
                warn!(error = %e, "alert persistence failed");
            }
        }

        results
    }
}
