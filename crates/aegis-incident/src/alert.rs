//! Alert model and channel payload formats.
//!
//! Payload builders produce the wire shapes channel adapters post: a
//! Slack-style payload carrying title, message, severity, source, agent,
//! SLO, ISO-8601 timestamp, and metadata; a PagerDuty-style payload adds a
//! routing key and dedup key. Transport itself lives outside the core.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity. `Resolved` always passes severity filters and clears
/// the dedup window for its fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Needs attention
    Warn,
    /// Needs immediate attention
    Critical,
    /// A previously alerting condition recovered
    Resolved,
}

impl AlertSeverity {
    /// Filter rank; Resolved outranks everything so recoveries always land.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Warn => 1,
            Self::Critical => 2,
            Self::Resolved => 3,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
            Self::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

/// Supported channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Slack incoming webhook
    Slack,
    /// PagerDuty Events API
    PagerDuty,
    /// Opsgenie alerts API
    Opsgenie,
    /// Microsoft Teams webhook
    Teams,
    /// Arbitrary JSON webhook
    GenericWebhook,
    /// In-process callback (tests, embedded consumers)
    InProcessCallback,
}

/// An alert bound for external channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Short headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Severity
    pub severity: AlertSeverity,
    /// Emitting system
    pub source: String,
    /// Agent concerned
    pub agent_id: String,
    /// SLO concerned, when applicable
    pub slo_name: String,
    /// Structured context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Raise time
    pub timestamp: DateTime<Utc>,
    /// Explicit dedup key; empty means fingerprint on (agent_id, title)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dedup_key: String,
}

impl Alert {
    /// Create an alert with empty context fields.
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: AlertSeverity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            source: "agent-aegis".to_string(),
            agent_id: String::new(),
            slo_name: String::new(),
            metadata: HashMap::new(),
            timestamp,
            dedup_key: String::new(),
        }
    }

    /// Set the agent id.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Set the SLO name.
    pub fn with_slo(mut self, slo_name: impl Into<String>) -> Self {
        self.slo_name = slo_name.into();
        self
    }

    /// Set the dedup key.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = key.into();
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Slack-style webhook payload.
pub fn slack_payload(alert: &Alert) -> serde_json::Value {
    let mut fields = vec![serde_json::json!({
        "type": "mrkdwn",
        "text": format!("*Severity:* {}", alert.severity)
    })];
    if !alert.agent_id.is_empty() {
        fields.push(serde_json::json!({
            "type": "mrkdwn",
            "text": format!("*Agent:* {}", alert.agent_id)
        }));
    }
    if !alert.slo_name.is_empty() {
        fields.push(serde_json::json!({
            "type": "mrkdwn",
            "text": format!("*SLO:* {}", alert.slo_name)
        }));
    }

    serde_json::json!({
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": alert.title }
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": alert.message }
            },
            { "type": "section", "fields": fields }
        ],
        "title": alert.title,
        "message": alert.message,
        "severity": alert.severity,
        "source": alert.source,
        "agent_id": alert.agent_id,
        "slo_name": alert.slo_name,
        "timestamp": alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        "metadata": alert.metadata,
    })
}

/// PagerDuty-style Events payload; carries routing and dedup keys.
pub fn pagerduty_payload(alert: &Alert, routing_key: &str) -> serde_json::Value {
    let event_action = if alert.severity == AlertSeverity::Resolved {
        "resolve"
    } else {
        "trigger"
    };
    let pd_severity = match alert.severity {
        AlertSeverity::Critical => "critical",
        AlertSeverity::Warn => "warning",
        _ => "info",
    };

    let mut payload = serde_json::json!({
        "event_action": event_action,
        "routing_key": routing_key,
        "payload": {
            "summary": format!("{}: {}", alert.title, alert.message),
            "severity": pd_severity,
            "source": alert.source,
            "component": if alert.agent_id.is_empty() { "agent-aegis" } else { alert.agent_id.as_str() },
            "group": if alert.slo_name.is_empty() { "default" } else { alert.slo_name.as_str() },
            "timestamp": alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            "custom_details": alert.metadata,
        },
    });
    if !alert.dedup_key.is_empty() {
        payload["dedup_key"] = serde_json::json!(alert.dedup_key);
    }
    payload
}

/// Generic JSON payload: the alert itself.
pub fn generic_payload(alert: &Alert) -> serde_json::Value {
    serde_json::json!({
        "title": alert.title,
        "message": alert.message,
        "severity": alert.severity,
        "source": alert.source,
        "agent_id": alert.agent_id,
        "slo_name": alert.slo_name,
        "timestamp": alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        "metadata": alert.metadata,
    })
}
