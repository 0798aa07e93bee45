//! Declarative SLO and rollout spec documents.
//!
//! These are the serde shapes of the hierarchical key-value documents the
//! control plane accepts; file loading and format negotiation live outside
//! the core. Inheritance is a shallow merge: child keys override the
//! parent, lists replace wholesale, labels merge additively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use aegis_core::error::{Error, Result};
use aegis_core::metric::Comparator;
use aegis_core::window::TimeWindow;

use crate::budget::ExhaustionAction;

/// One indicator threshold inside an SLO spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    /// Metric name
    pub metric: String,
    /// Threshold value
    pub threshold: f64,
    /// Comparison direction
    #[serde(default)]
    pub comparison: Comparator,
}

/// Error budget policy block of an SLO spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBudgetPolicy {
    /// Budget size as a failure fraction
    pub total: f64,
    /// Budget window in seconds
    pub window_seconds: u64,
    /// Warn burn-rate threshold
    pub burn_rate_alert: f64,
    /// Critical burn-rate threshold
    pub burn_rate_critical: f64,
    /// Intent on exhaustion
    #[serde(default)]
    pub exhaustion_action: ExhaustionAction,
}

impl Default for ErrorBudgetPolicy {
    fn default() -> Self {
        Self {
            total: 0.01,
            window_seconds: TimeWindow::DAY_30.seconds(),
            burn_rate_alert: 2.0,
            burn_rate_critical: 10.0,
            exhaustion_action: ExhaustionAction::Alert,
        }
    }
}

/// Version-controlled SLO definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloSpec {
    /// Unique SLO name
    pub name: String,
    /// Human-readable description. Empty means unset (inherits).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Agent or service this SLO belongs to. Empty means unset (inherits).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    /// Primary target (fraction for rate SLOs)
    #[serde(default = "default_target")]
    pub target: f64,
    /// Rolling window literal, e.g. "30d". Empty means unset (inherits).
    #[serde(default = "default_window", skip_serializing_if = "String::is_empty")]
    pub window: String,
    /// Indicator thresholds. An empty list inherits; a non-empty list
    /// replaces the parent's wholesale.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<IndicatorSpec>,
    /// Budget policy
    #[serde(default)]
    pub error_budget_policy: ErrorBudgetPolicy,
    /// Free-form labels; merged additively across inheritance
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Parent spec to inherit from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits_from: Option<String>,
}

fn default_target() -> f64 {
    0.99
}

fn default_window() -> String {
    "30d".to_string()
}

impl SloSpec {
    /// Validate field ranges and the window literal.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("SLO spec requires a name"));
        }
        if !(0.0..=1.0).contains(&self.target) {
            return Err(Error::config(format!(
                "SLO '{}' target must be in [0, 1], got {}",
                self.name, self.target
            )));
        }
        TimeWindow::parse(&self.window)?;
        if !(0.0..=1.0).contains(&self.error_budget_policy.total) {
            return Err(Error::config(format!(
                "SLO '{}' budget total must be in [0, 1]",
                self.name
            )));
        }
        Ok(())
    }
}

/// One end of a rollout (name + version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRef {
    /// Deployment name
    pub name: String,
    /// Version string
    pub version: String,
}

/// Metric condition used by rollout analysis and rollback blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    /// Metric name
    pub metric: String,
    /// Threshold value
    pub threshold: f64,
    /// Comparison direction
    #[serde(default)]
    pub comparator: Comparator,
}

/// One step of a rollout spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStepSpec {
    /// Step name
    #[serde(default)]
    pub name: String,
    /// Candidate traffic fraction (0..=1)
    pub weight: f64,
    /// Minimum dwell time at this step
    pub duration_seconds: u64,
    /// Analysis gates that must pass before advancing
    #[serde(default)]
    pub analysis: Vec<ThresholdSpec>,
    /// Whether an explicit approval is required
    #[serde(default)]
    pub manual_gate: bool,
}

/// Declarative rollout definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutSpec {
    /// Strategy name ("canary", "blue_green", "shadow")
    pub strategy: String,
    /// Currently serving version
    pub current: VersionRef,
    /// Candidate version
    pub candidate: VersionRef,
    /// Ordered steps
    pub steps: Vec<RolloutStepSpec>,
    /// Conditions that trigger automatic rollback
    #[serde(default)]
    pub rollback_conditions: Vec<ThresholdSpec>,
}

/// Resolve `inherits_from` chains across a set of SLO specs.
///
/// Shallow merge via JSON objects: child keys override the parent, lists
/// replace, `labels` merge additively. Unknown parents and inheritance
/// cycles are configuration errors.
pub fn resolve_inheritance(specs: &[SloSpec]) -> Result<Vec<SloSpec>> {
    let by_name: BTreeMap<String, &SloSpec> =
        specs.iter().map(|s| (s.name.clone(), s)).collect();

    let mut resolved: BTreeMap<String, SloSpec> = BTreeMap::new();

    fn resolve_one(
        spec: &SloSpec,
        by_name: &BTreeMap<String, &SloSpec>,
        resolved: &mut BTreeMap<String, SloSpec>,
        chain: &mut Vec<String>,
    ) -> Result<SloSpec> {
        if let Some(done) = resolved.get(&spec.name) {
            return Ok(done.clone());
        }
        let parent_name = match &spec.inherits_from {
            None => {
                resolved.insert(spec.name.clone(), spec.clone());
                return Ok(spec.clone());
            }
            Some(p) => p.clone(),
        };
        if chain.contains(&spec.name) {
            return Err(Error::config(format!(
                "inheritance cycle involving SLO '{}'",
                spec.name
            )));
        }
        chain.push(spec.name.clone());

        let parent: &SloSpec = by_name.get(&parent_name).copied().ok_or_else(|| {
            Error::config(format!(
                "SLO '{}' inherits from unknown spec '{parent_name}'",
                spec.name
            ))
        })?;
        let parent = resolve_one(parent, by_name, resolved, chain)?;
        chain.pop();

        let parent_value = serde_json::to_value(&parent)
            .map_err(|e| Error::invariant(format!("spec serialization failed: {e}")))?;
        let child_value = serde_json::to_value(spec)
            .map_err(|e| Error::invariant(format!("spec serialization failed: {e}")))?;

        let mut merged = match (parent_value, child_value) {
            (serde_json::Value::Object(mut p), serde_json::Value::Object(c)) => {
                // Labels merge additively; everything else is child-wins.
                let parent_labels = p.remove("labels");
                for (key, value) in c {
                    if key == "labels" {
                        let mut labels = parent_labels
                            .clone()
                            .and_then(|v| v.as_object().cloned())
                            .unwrap_or_default();
                        if let Some(child_labels) = value.as_object() {
                            for (lk, lv) in child_labels {
                                labels.insert(lk.clone(), lv.clone());
                            }
                        }
                        p.insert("labels".to_string(), serde_json::Value::Object(labels));
                    } else {
                        p.insert(key, value);
                    }
                }
                if !p.contains_key("labels") {
                    if let Some(labels) = parent_labels {
                        p.insert("labels".to_string(), labels);
                    }
                }
                serde_json::Value::Object(p)
            }
            _ => return Err(Error::invariant("spec did not serialize to an object")),
        };

        // The resolved spec stands alone.
        if let Some(obj) = merged.as_object_mut() {
            obj.remove("inherits_from");
        }

        let result: SloSpec = serde_json::from_value(merged)
            .map_err(|e| Error::config(format!("merged spec for '{}' invalid: {e}", spec.name)))?;
        resolved.insert(spec.name.clone(), result.clone());
        Ok(result)
    }

    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut chain = Vec::new();
        out.push(resolve_one(spec, &by_name, &mut resolved, &mut chain)?);
    }
    Ok(out)
}
