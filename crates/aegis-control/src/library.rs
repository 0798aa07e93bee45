//! Pre-built chaos experiment templates.
//!
//! Templates are immutable named parameter tuples; `instantiate` stamps a
//! concrete [`ChaosExperiment`] for a target agent, optionally overriding
//! name, duration, or blast radius.

use serde::{Deserialize, Serialize};

use aegis_core::clock::SharedClock;
use aegis_core::metric::Comparator;

use crate::chaos::{AbortCondition, ChaosExperiment, Fault};

/// A reusable chaos scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentTemplate {
    /// Stable identifier
    pub template_id: String,
    /// Display name
    pub name: String,
    /// What the scenario exercises
    pub description: String,
    /// Category: tool / llm / agent / cost
    pub category: String,
    /// Faults to inject
    pub faults: Vec<Fault>,
    /// Safety aborts
    pub abort_conditions: Vec<AbortCondition>,
    /// Default duration
    pub duration_secs: u64,
    /// Default blast radius
    pub blast_radius: f64,
    /// Search tags
    pub tags: Vec<String>,
}

/// Optional overrides applied when instantiating a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateOverrides {
    /// Replace the experiment name
    pub name: Option<String>,
    /// Replace the duration
    pub duration_secs: Option<u64>,
    /// Replace the blast radius
    pub blast_radius: Option<f64>,
}

impl ExperimentTemplate {
    /// Stamp a concrete experiment for a target agent.
    pub fn instantiate(
        &self,
        target_agent: &str,
        overrides: TemplateOverrides,
        clock: SharedClock,
    ) -> ChaosExperiment {
        ChaosExperiment::new(
            overrides.name.unwrap_or_else(|| self.name.clone()),
            target_agent,
            self.faults.clone(),
            overrides.duration_secs.unwrap_or(self.duration_secs),
            self.abort_conditions.clone(),
            overrides.blast_radius.unwrap_or(self.blast_radius),
            clock,
        )
    }
}

/// Library of built-in and registered templates.
#[derive(Debug)]
pub struct ChaosLibrary {
    templates: Vec<ExperimentTemplate>,
}

impl ChaosLibrary {
    /// Create a library seeded with the built-in scenarios.
    pub fn new() -> Self {
        Self {
            templates: builtin_templates(),
        }
    }

    /// Register a custom template. An existing template with the same id
    /// is replaced.
    pub fn register(&mut self, template: ExperimentTemplate) {
        self.templates
            .retain(|t| t.template_id != template.template_id);
        self.templates.push(template);
    }

    /// A template by id (cloned; the library copy stays immutable).
    pub fn get(&self, template_id: &str) -> Option<ExperimentTemplate> {
        self.templates
            .iter()
            .find(|t| t.template_id == template_id)
            .cloned()
    }

    /// Templates filtered by category and/or tag.
    pub fn list(&self, category: Option<&str>, tag: Option<&str>) -> Vec<&ExperimentTemplate> {
        self.templates
            .iter()
            .filter(|t| category.map_or(true, |c| t.category == c))
            .filter(|t| tag.map_or(true, |needle| t.tags.iter().any(|have| have == needle)))
            .collect()
    }

    /// Instantiate a template by id.
    pub fn instantiate(
        &self,
        template_id: &str,
        target_agent: &str,
        overrides: TemplateOverrides,
        clock: SharedClock,
    ) -> Option<ChaosExperiment> {
        self.get(template_id)
            .map(|t| t.instantiate(target_agent, overrides, clock))
    }

    /// Distinct categories.
    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self.templates.iter().map(|t| t.category.clone()).collect();
        cats.sort();
        cats.dedup();
        cats
    }
}

impl Default for ChaosLibrary {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_templates() -> Vec<ExperimentTemplate> {
    vec![
        ExperimentTemplate {
            template_id: "tool-timeout".to_string(),
            name: "Tool Timeout Resilience".to_string(),
            description: "Agent behavior when tools take too long to respond.".to_string(),
            category: "tool".to_string(),
            faults: vec![Fault::timeout("*", 30_000, 0.5)],
            abort_conditions: vec![AbortCondition::new("task_success_rate", 0.5, Comparator::Lte)],
            duration_secs: 1_800,
            blast_radius: 1.0,
            tags: vec!["tool".to_string(), "timeout".to_string()],
        },
        ExperimentTemplate {
            template_id: "tool-error-storm".to_string(),
            name: "Tool Error Storm".to_string(),
            description: "Burst of tool errors to exercise error handling.".to_string(),
            category: "tool".to_string(),
            faults: vec![Fault::error("*", "internal_server_error", 0.8)],
            abort_conditions: vec![AbortCondition::new("task_success_rate", 0.3, Comparator::Lte)],
            duration_secs: 900,
            blast_radius: 0.5,
            tags: vec!["tool".to_string(), "error".to_string()],
        },
        ExperimentTemplate {
            template_id: "tool-schema-drift".to_string(),
            name: "Tool Schema Drift".to_string(),
            description: "Unexpected tool output schemas.".to_string(),
            category: "tool".to_string(),
            faults: vec![Fault::tool_schema_drift("*", 0.3)],
            abort_conditions: vec![AbortCondition::new("task_success_rate", 0.6, Comparator::Lte)],
            duration_secs: 1_800,
            blast_radius: 1.0,
            tags: vec!["tool".to_string(), "schema".to_string()],
        },
        ExperimentTemplate {
            template_id: "llm-latency-spike".to_string(),
            name: "LLM Latency Spike".to_string(),
            description: "Provider latency spikes.".to_string(),
            category: "llm".to_string(),
            faults: vec![Fault::latency("*", 15_000, 0.4)],
            abort_conditions: vec![AbortCondition::new("task_success_rate", 0.7, Comparator::Lte)],
            duration_secs: 3_600,
            blast_radius: 1.0,
            tags: vec!["llm".to_string(), "latency".to_string()],
        },
        ExperimentTemplate {
            template_id: "llm-quality-degradation".to_string(),
            name: "LLM Quality Degradation".to_string(),
            description: "Degraded response quality, e.g. a silent model downgrade.".to_string(),
            category: "llm".to_string(),
            faults: vec![Fault::llm_degradation("*", 0.5, 0.6)],
            abort_conditions: vec![AbortCondition::new("hallucination_rate", 0.3, Comparator::Gte)],
            duration_secs: 1_800,
            blast_radius: 1.0,
            tags: vec!["llm".to_string(), "quality".to_string()],
        },
        ExperimentTemplate {
            template_id: "delegation-rejection".to_string(),
            name: "Delegation Rejection".to_string(),
            description: "Downstream agents rejecting delegated tasks.".to_string(),
            category: "agent".to_string(),
            faults: vec![Fault::delegation_reject("*", 0.3)],
            abort_conditions: vec![AbortCondition::new("task_success_rate", 0.5, Comparator::Lte)],
            duration_secs: 1_800,
            blast_radius: 1.0,
            tags: vec!["agent".to_string(), "delegation".to_string()],
        },
        ExperimentTemplate {
            template_id: "credential-expiry".to_string(),
            name: "Credential Expiry".to_string(),
            description: "Credentials expiring mid-execution.".to_string(),
            category: "agent".to_string(),
            faults: vec![Fault::credential_expire("*")],
            abort_conditions: vec![AbortCondition::new("task_success_rate", 0.3, Comparator::Lte)],
            duration_secs: 900,
            blast_radius: 1.0,
            tags: vec!["agent".to_string(), "credentials".to_string()],
        },
        ExperimentTemplate {
            template_id: "cost-explosion".to_string(),
            name: "Cost Explosion".to_string(),
            description: "Sudden cost spikes from a tool or provider.".to_string(),
            category: "cost".to_string(),
            faults: vec![Fault::cost_spike("*", 10.0)],
            abort_conditions: vec![AbortCondition::new("cost_per_task", 5.0, Comparator::Gte)],
            duration_secs: 1_800,
            blast_radius: 1.0,
            tags: vec!["cost".to_string(), "spike".to_string()],
        },
        ExperimentTemplate {
            template_id: "cascading-failure".to_string(),
            name: "Cascading Failure".to_string(),
            description: "Tool errors, LLM degradation, and a cost spike at once.".to_string(),
            category: "agent".to_string(),
            faults: vec![
                Fault::error("*", "internal_error", 0.3),
                Fault::llm_degradation("*", 0.7, 0.3),
                Fault::cost_spike("*", 3.0),
            ],
            abort_conditions: vec![
                AbortCondition::new("task_success_rate", 0.3, Comparator::Lte),
                AbortCondition::new("cost_per_task", 10.0, Comparator::Gte),
            ],
            duration_secs: 900,
            blast_radius: 0.5,
            tags: vec!["cascading".to_string(), "multi-fault".to_string()],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::ExperimentState;
    use aegis_core::clock::ManualClock;

    #[test]
    fn builtins_present_and_filterable() {
        let lib = ChaosLibrary::new();
        assert!(lib.get("tool-error-storm").is_some());
        assert!(lib.get("unknown").is_none());

        let tool_templates = lib.list(Some("tool"), None);
        assert!(tool_templates.len() >= 3);
        let latency = lib.list(None, Some("latency"));
        assert_eq!(latency.len(), 1);

        let cats = lib.categories();
        assert!(cats.contains(&"tool".to_string()));
        assert!(cats.contains(&"cost".to_string()));
    }

    #[test]
    fn instantiate_applies_overrides() {
        let lib = ChaosLibrary::new();
        let clock = ManualClock::shared();
        let exp = lib
            .instantiate(
                "tool-error-storm",
                "agent-a",
                TemplateOverrides {
                    blast_radius: Some(0.1),
                    duration_secs: Some(60),
                    name: None,
                },
                clock,
            )
            .unwrap();
        assert_eq!(exp.target_agent(), "agent-a");
        assert_eq!(exp.blast_radius(), 0.1);
        assert_eq!(exp.state(), ExperimentState::Pending);
    }

    #[test]
    fn templates_stay_immutable_across_instantiation() {
        let lib = ChaosLibrary::new();
        let clock = ManualClock::shared();
        let exp = lib
            .instantiate("tool-timeout", "agent-a", TemplateOverrides::default(), clock)
            .unwrap();
        exp.start().unwrap();

        // The library copy is untouched by the running experiment.
        let template = lib.get("tool-timeout").unwrap();
        assert_eq!(template.duration_secs, 1_800);
        assert_eq!(template.blast_radius, 1.0);
    }

    #[test]
    fn register_replaces_by_id() {
        let mut lib = ChaosLibrary::new();
        let count = lib.list(None, None).len();
        let mut custom = lib.get("tool-timeout").unwrap();
        custom.duration_secs = 42;
        lib.register(custom);
        assert_eq!(lib.list(None, None).len(), count);
        assert_eq!(lib.get("tool-timeout").unwrap().duration_secs, 42);
    }
}
