//! Telemetry routing into the control plane.
//!
//! [`PlaneSink`] is the in-tree implementation of the push-style
//! [`TelemetrySink`] seam: framework adapters translate their callbacks
//! into task/tool/LLM events, and the sink routes them into the SLI
//! registry, the fleet, and the cost guard.

use std::sync::Arc;

use tracing::debug;

use aegis_core::telemetry::{LlmCall, TaskEnd, TaskStart, TelemetrySink, ToolCall};
use aegis_guard::guard::CostGuard;
use aegis_slo::indicator::SliKind;
use aegis_slo::registry::SliRegistry;

use crate::registry::FleetManager;

/// Routes telemetry events into SLIs, the fleet, and the cost guard.
pub struct PlaneSink {
    registry: Arc<SliRegistry>,
    fleet: Arc<FleetManager>,
    guard: Arc<CostGuard>,
}

impl std::fmt::Debug for PlaneSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaneSink").finish()
    }
}

impl PlaneSink {
    /// Wire a sink to the three consumers.
    pub fn new(registry: Arc<SliRegistry>, fleet: Arc<FleetManager>, guard: Arc<CostGuard>) -> Self {
        Self {
            registry,
            fleet,
            guard,
        }
    }
}

impl TelemetrySink for PlaneSink {
    fn on_task_start(&self, event: &TaskStart) {
        debug!(agent = %event.agent_id, task = %event.task_id, "task started");
    }

    fn on_task_end(&self, event: &TaskEnd) {
        let agent = event.agent_id.as_str();
        self.registry.record_kind(
            agent,
            |k| matches!(k, SliKind::TaskSuccessRate),
            if event.success { 1.0 } else { 0.0 },
        );
        self.registry.record_kind(
            agent,
            |k| matches!(k, SliKind::ResponseLatency { .. }),
            event.latency_ms,
        );
        if event.cost_usd > 0.0 {
            self.registry
                .record_kind(agent, |k| matches!(k, SliKind::CostPerTask), event.cost_usd);
            self.guard
                .record_cost(agent, &event.task_id, event.cost_usd, None);
        }
        self.fleet.record_event(
            agent,
            event.success,
            Some(event.latency_ms),
            Some(event.cost_usd),
        );
    }

    fn on_tool_call(&self, event: &ToolCall) {
        self.registry.record_kind(
            &event.agent_id,
            |k| matches!(k, SliKind::ToolCallAccuracy),
            if event.success { 1.0 } else { 0.0 },
        );
    }

    fn on_llm_call(&self, event: &LlmCall) {
        // LLM spend is attributed per call so runaway loops trip the guard
        // between tasks, not only at task end.
        if event.cost_usd > 0.0 {
            self.guard
                .record_cost(&event.agent_id, &event.model, event.cost_usd, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::bus::SignalBus;
    use aegis_core::clock::ManualClock;
    use aegis_guard::guard::CostGuardConfig;
    use aegis_slo::indicator::Sli;
    use chrono::Utc;

    fn sink() -> (PlaneSink, Arc<SliRegistry>, Arc<FleetManager>, Arc<CostGuard>) {
        let clock = ManualClock::shared();
        let bus = Arc::new(SignalBus::default());
        let registry = Arc::new(SliRegistry::new());
        registry.register("agent-a", Arc::new(Sli::task_success_rate(clock.clone())));
        registry.register("agent-a", Arc::new(Sli::tool_call_accuracy(clock.clone())));
        registry.register("agent-a", Arc::new(Sli::response_latency_p95(clock.clone())));
        registry.register("agent-a", Arc::new(Sli::cost_per_task(clock.clone())));

        let fleet = Arc::new(FleetManager::with_defaults(clock.clone()));
        fleet.register("agent-a", None, None);
        let guard = Arc::new(CostGuard::new(
            CostGuardConfig {
                anomaly_detection: false,
                ..CostGuardConfig::default()
            },
            bus,
            clock,
        ));
        let sink = PlaneSink::new(registry.clone(), fleet.clone(), guard.clone());
        (sink, registry, fleet, guard)
    }

    #[test]
    fn task_end_routes_everywhere() {
        let (sink, registry, fleet, guard) = sink();
        sink.on_task_end(&TaskEnd {
            agent_id: "agent-a".to_string(),
            task_id: "t1".to_string(),
            success: true,
            latency_ms: 850.0,
            cost_usd: 0.04,
            timestamp: Utc::now(),
        });

        let success = registry.get("agent-a", "task_success_rate").unwrap();
        assert_eq!(success.current_aggregate(), Some(1.0));
        let latency = registry.get("agent-a", "response_latency_p95").unwrap();
        assert_eq!(latency.current_aggregate(), Some(850.0));

        assert_eq!(fleet.agent_health("agent-a").unwrap().event_count, 1);
        assert!((guard.org_spent_month() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn tool_calls_feed_accuracy() {
        let (sink, registry, _, _) = sink();
        for success in [true, true, false, true] {
            sink.on_tool_call(&ToolCall {
                agent_id: "agent-a".to_string(),
                tool: "search".to_string(),
                success,
                latency_ms: 40.0,
                timestamp: Utc::now(),
            });
        }
        let accuracy = registry.get("agent-a", "tool_call_accuracy").unwrap();
        assert_eq!(accuracy.current_aggregate(), Some(0.75));
    }

    #[test]
    fn llm_calls_attribute_spend() {
        let (sink, _, _, guard) = sink();
        sink.on_llm_call(&LlmCall {
            agent_id: "agent-a".to_string(),
            model: "gpt-large".to_string(),
            latency_ms: 1_200.0,
            cost_usd: 0.12,
            tokens: Some(4_000),
            timestamp: Utc::now(),
            metadata: Default::default(),
        });
        assert!((guard.org_spent_month() - 0.12).abs() < 1e-9);
    }

    #[test]
    fn unknown_agent_is_harmless() {
        let (sink, _, _, _) = sink();
        sink.on_task_end(&TaskEnd {
            agent_id: "ghost".to_string(),
            task_id: "t1".to_string(),
            success: false,
            latency_ms: 10.0,
            cost_usd: 0.0,
            timestamp: Utc::now(),
        });
    }
}
