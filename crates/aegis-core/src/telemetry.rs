//! Push-style telemetry sink interface.
//!
//! Framework integrations (LangChain-style callbacks, agent runtimes,
//! tracing shims) translate their native events into these four calls.
//! The control plane ships one implementation that routes events into the
//! SLI registry, fleet, and cost guard; everything else lives outside the
//! core.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task began executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStart {
    /// Executing agent
    pub agent_id: String,
    /// Task identifier
    pub task_id: String,
    /// Start time
    pub timestamp: DateTime<Utc>,
}

/// A task finished (successfully or not).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnd {
    /// Executing agent
    pub agent_id: String,
    /// Task identifier
    pub task_id: String,
    /// Whether the task met its goal
    pub success: bool,
    /// End-to-end latency in milliseconds
    pub latency_ms: f64,
    /// Total task cost in USD
    pub cost_usd: f64,
    /// Completion time
    pub timestamp: DateTime<Utc>,
}

/// A tool invocation completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Calling agent
    pub agent_id: String,
    /// Tool name
    pub tool: String,
    /// Whether the call selected the right tool and succeeded
    pub success: bool,
    /// Call latency in milliseconds
    pub latency_ms: f64,
    /// Completion time
    pub timestamp: DateTime<Utc>,
}

/// An LLM invocation completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCall {
    /// Calling agent
    pub agent_id: String,
    /// Provider or model identifier
    pub model: String,
    /// Call latency in milliseconds
    pub latency_ms: f64,
    /// Call cost in USD
    pub cost_usd: f64,
    /// Tokens consumed, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Extra provider context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The single seam between agent frameworks and the control plane.
pub trait TelemetrySink: Send + Sync {
    /// A task began.
    fn on_task_start(&self, event: &TaskStart);
    /// A task ended.
    fn on_task_end(&self, event: &TaskEnd);
    /// A tool call completed.
    fn on_tool_call(&self, event: &ToolCall);
    /// An LLM call completed.
    fn on_llm_call(&self, event: &LlmCall);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn on_task_start(&self, _event: &TaskStart) {}
    fn on_task_end(&self, _event: &TaskEnd) {}
    fn on_tool_call(&self, _event: &ToolCall) {}
    fn on_llm_call(&self, _event: &LlmCall) {}
}
