//! Service Level Indicators.
//!
//! An SLI measures one aspect of agent reliability (task success rate, tool
//! call accuracy, response latency, ...). The seven built-in variants are
//! cases of [`SliKind`]; custom indicators declare their aggregation and
//! whether the target bounds the aggregate from above or below, which is
//! all the SLO engine needs to orient breach detection.
//!
//! Each indicator serializes its own mutations behind a lock and hands out
//! consistent snapshot copies; an empty window always reads as "unknown"
//! (`None`), never as `0.0`.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use aegis_core::clock::SharedClock;
use aegis_core::error::{Error, Result};
use aegis_core::window::{Sample, SampleWindow, TimeWindow};

/// Whether the target bounds the aggregate from above or below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOrientation {
    /// Good when aggregate <= target (latency, cost, depth, error rates)
    UpperBound,
    /// Good when aggregate >= target (success and compliance rates)
    LowerBound,
}

/// How in-window samples fold into a single aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Arithmetic mean
    Mean,
    /// Nearest-rank percentile (fraction in (0, 1])
    Percentile(f64),
    /// Maximum
    Max,
}

/// The indicator taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SliKind {
    /// Fraction of tasks completed successfully ({0,1} samples, mean)
    TaskSuccessRate,
    /// Fraction of tool calls that selected the correct tool ({0,1}, mean)
    ToolCallAccuracy,
    /// Response latency at a percentile (ms, nearest-rank)
    ResponseLatency {
        /// Percentile as a fraction, e.g. 0.95
        percentile: f64,
    },
    /// Average cost per task (USD, mean)
    CostPerTask,
    /// Fraction of policy checks that passed ({0,1}, mean)
    PolicyCompliance,
    /// Deepest delegation chain observed (int, max)
    DelegationChainDepth,
    /// Fraction of judged outputs flagged as hallucinated ({0,1}, mean)
    HallucinationRate,
    /// User-defined indicator
    Custom {
        /// Indicator name
        name: String,
        /// Breach orientation
        orientation: TargetOrientation,
        /// Aggregation function
        aggregation: Aggregation,
    },
}

impl SliKind {
    /// Default metric name for this kind.
    pub fn default_name(&self) -> String {
        match self {
            Self::TaskSuccessRate => "task_success_rate".to_string(),
            Self::ToolCallAccuracy => "tool_call_accuracy".to_string(),
            Self::ResponseLatency { percentile } => {
                format!("response_latency_p{}", (percentile * 100.0).round() as u32)
            }
            Self::CostPerTask => "cost_per_task".to_string(),
            Self::PolicyCompliance => "policy_compliance".to_string(),
            Self::DelegationChainDepth => "delegation_chain_depth".to_string(),
            Self::HallucinationRate => "hallucination_rate".to_string(),
            Self::Custom { name, .. } => name.clone(),
        }
    }

    /// Breach orientation of this kind.
    pub fn orientation(&self) -> TargetOrientation {
        match self {
            Self::TaskSuccessRate | Self::ToolCallAccuracy | Self::PolicyCompliance => {
                TargetOrientation::LowerBound
            }
            Self::ResponseLatency { .. }
            | Self::CostPerTask
            | Self::DelegationChainDepth
            | Self::HallucinationRate => TargetOrientation::UpperBound,
            Self::Custom { orientation, .. } => *orientation,
        }
    }

    /// Aggregation function of this kind.
    pub fn aggregation(&self) -> Aggregation {
        match self {
            Self::ResponseLatency { percentile } => Aggregation::Percentile(*percentile),
            Self::DelegationChainDepth => Aggregation::Max,
            Self::Custom { aggregation, .. } => *aggregation,
            _ => Aggregation::Mean,
        }
    }
}

/// Read-only summary of an indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliSnapshot {
    /// Indicator name
    pub name: String,
    /// Target value
    pub target: f64,
    /// Window literal (e.g. "30d")
    pub window: String,
    /// Current aggregate, when the window holds samples
    pub aggregate: Option<f64>,
    /// Fraction of samples individually meeting the target
    pub compliance: Option<f64>,
    /// Samples currently in the window
    pub sample_count: usize,
    /// Whether the aggregate meets the oriented target
    pub meeting_target: Option<bool>,
}

/// A single Service Level Indicator with its own sample window.
#[derive(Debug)]
pub struct Sli {
    name: String,
    kind: SliKind,
    target: f64,
    clock: SharedClock,
    samples: Mutex<SampleWindow>,
}

impl Sli {
    /// Create an indicator, validating the target for its kind.
    pub fn new(kind: SliKind, target: f64, window: TimeWindow, clock: SharedClock) -> Result<Self> {
        let name = kind.default_name();
        Self::named(name, kind, target, window, clock)
    }

    /// Create an indicator with an explicit name.
    pub fn named(
        name: impl Into<String>,
        kind: SliKind,
        target: f64,
        window: TimeWindow,
        clock: SharedClock,
    ) -> Result<Self> {
        validate_target(&kind, target)?;
        if let Aggregation::Percentile(p) = kind.aggregation() {
            if !(0.0..=1.0).contains(&p) || p == 0.0 {
                return Err(Error::config(format!(
                    "percentile must be in (0, 1], got {p}"
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            kind,
            target,
            clock,
            samples: Mutex::new(SampleWindow::new(window)),
        })
    }

    fn builtin(kind: SliKind, target: f64, window: TimeWindow, clock: SharedClock) -> Self {
        Self {
            name: kind.default_name(),
            kind,
            target,
            clock,
            samples: Mutex::new(SampleWindow::new(window)),
        }
    }

    /// Task success rate indicator (default target 0.995 over 30 days).
    pub fn task_success_rate(clock: SharedClock) -> Self {
        Self::builtin(SliKind::TaskSuccessRate, 0.995, TimeWindow::DAY_30, clock)
    }

    /// Tool call accuracy indicator (default target 0.999 over 7 days).
    pub fn tool_call_accuracy(clock: SharedClock) -> Self {
        Self::builtin(SliKind::ToolCallAccuracy, 0.999, TimeWindow::DAY_7, clock)
    }

    /// p95 response latency indicator (default target 5000ms over 1 hour).
    pub fn response_latency_p95(clock: SharedClock) -> Self {
        Self::builtin(
            SliKind::ResponseLatency { percentile: 0.95 },
            5_000.0,
            TimeWindow::HOUR_1,
            clock,
        )
    }

    /// Cost per task indicator (default target $0.50 over 24 hours).
    pub fn cost_per_task(clock: SharedClock) -> Self {
        Self::builtin(SliKind::CostPerTask, 0.50, TimeWindow::DAY_1, clock)
    }

    /// Policy compliance indicator (default target 1.0 over 24 hours).
    pub fn policy_compliance(clock: SharedClock) -> Self {
        Self::builtin(SliKind::PolicyCompliance, 1.0, TimeWindow::DAY_1, clock)
    }

    /// Delegation chain depth indicator (default max depth 3 over 24 hours).
    pub fn delegation_chain_depth(clock: SharedClock) -> Self {
        Self::builtin(SliKind::DelegationChainDepth, 3.0, TimeWindow::DAY_1, clock)
    }

    /// Hallucination rate indicator (default target 0.05 over 24 hours).
    pub fn hallucination_rate(clock: SharedClock) -> Self {
        Self::builtin(SliKind::HallucinationRate, 0.05, TimeWindow::DAY_1, clock)
    }

    /// Indicator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Indicator kind.
    pub fn kind(&self) -> &SliKind {
        &self.kind
    }

    /// Target value.
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Breach orientation.
    pub fn orientation(&self) -> TargetOrientation {
        self.kind.orientation()
    }

    /// Aggregation window.
    pub fn window(&self) -> TimeWindow {
        self.samples.lock().unwrap().window()
    }

    /// Record a measurement.
    pub fn record(&self, value: f64) -> Sample {
        self.record_with(value, HashMap::new())
    }

    /// Record a measurement carrying metadata.
    pub fn record_with(
        &self,
        value: f64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Sample {
        let sample = Sample::with_metadata(self.clock.now(), value, metadata);
        let mut window = self.samples.lock().unwrap();
        window.push(sample.clone());
        debug!(indicator = %self.name, value, "sample recorded");
        sample
    }

    /// Consistent copy of the live samples.
    pub fn samples_in_window(&self) -> Vec<Sample> {
        let now = self.clock.now();
        self.samples.lock().unwrap().snapshot(now)
    }

    /// Current aggregate, `None` when the window is empty.
    pub fn current_aggregate(&self) -> Option<f64> {
        let samples = self.samples_in_window();
        aggregate(&samples, self.kind.aggregation())
    }

    /// Fraction of in-window samples individually meeting the target,
    /// `None` when the window is empty.
    pub fn compliance_fraction(&self) -> Option<f64> {
        let samples = self.samples_in_window();
        if samples.is_empty() {
            return None;
        }
        let good = samples
            .iter()
            .filter(|s| sample_is_good(s.value, self.target, self.orientation()))
            .count();
        Some(good as f64 / samples.len() as f64)
    }

    /// Whether the current aggregate meets the oriented target.
    pub fn is_meeting_target(&self) -> Option<bool> {
        self.current_aggregate()
            .map(|agg| sample_is_good(agg, self.target, self.orientation()))
    }

    /// Read-only summary.
    pub fn snapshot(&self) -> SliSnapshot {
        let samples = self.samples_in_window();
        let aggregate_value = aggregate(&samples, self.kind.aggregation());
        let compliance = if samples.is_empty() {
            None
        } else {
            let good = samples
                .iter()
                .filter(|s| sample_is_good(s.value, self.target, self.orientation()))
                .count();
            Some(good as f64 / samples.len() as f64)
        };
        SliSnapshot {
            name: self.name.clone(),
            target: self.target,
            window: self.window().to_string(),
            aggregate: aggregate_value,
            compliance,
            sample_count: samples.len(),
            meeting_target: aggregate_value
                .map(|agg| sample_is_good(agg, self.target, self.orientation())),
        }
    }
}

fn sample_is_good(value: f64, target: f64, orientation: TargetOrientation) -> bool {
    match orientation {
        TargetOrientation::LowerBound => value >= target,
        TargetOrientation::UpperBound => value <= target,
    }
}

fn validate_target(kind: &SliKind, target: f64) -> Result<()> {
    let rate_like = matches!(
        kind,
        SliKind::TaskSuccessRate
            | SliKind::ToolCallAccuracy
            | SliKind::PolicyCompliance
            | SliKind::HallucinationRate
    );
    if rate_like && !(0.0..=1.0).contains(&target) {
        return Err(Error::config(format!(
            "target for '{}' must be in [0, 1], got {target}",
            kind.default_name()
        )));
    }
    if !rate_like && target < 0.0 {
        return Err(Error::config(format!(
            "target for '{}' must be non-negative, got {target}",
            kind.default_name()
        )));
    }
    Ok(())
}

fn aggregate(samples: &[Sample], aggregation: Aggregation) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    match aggregation {
        Aggregation::Mean => {
            let sum: f64 = samples.iter().map(|s| s.value).sum();
            Some(sum / samples.len() as f64)
        }
        Aggregation::Max => samples.iter().map(|s| s.value).fold(None, |acc, v| {
            Some(match acc {
                Some(m) if m >= v => m,
                _ => v,
            })
        }),
        Aggregation::Percentile(p) => {
            let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            // Nearest-rank: rank = ceil(p * n), 1-based.
            let n = values.len();
            let rank = (p * n as f64).ceil() as usize;
            let idx = rank.clamp(1, n) - 1;
            Some(values[idx])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::clock::ManualClock;
    use std::sync::Arc;

    fn clock() -> Arc<ManualClock> {
        ManualClock::shared()
    }

    #[test]
    fn empty_window_is_unknown_not_zero() {
        let sli = Sli::task_success_rate(clock());
        assert_eq!(sli.current_aggregate(), None);
        assert_eq!(sli.compliance_fraction(), None);
        assert_eq!(sli.is_meeting_target(), None);
    }

    #[test]
    fn success_rate_mean_and_compliance() {
        let c = clock();
        let sli = Sli::new(SliKind::TaskSuccessRate, 0.9, TimeWindow::DAY_1, c.clone()).unwrap();
        for _ in 0..9 {
            sli.record(1.0);
        }
        sli.record(0.0);
        assert_eq!(sli.current_aggregate(), Some(0.9));
        // Individual {0,1} samples compared to a 0.9 lower bound: only the
        // successes qualify.
        assert_eq!(sli.compliance_fraction(), Some(0.9));
        assert_eq!(sli.is_meeting_target(), Some(true));
    }

    #[test]
    fn compliance_bounded_by_unit_interval() {
        let c = clock();
        let sli = Sli::response_latency_p95(c.clone());
        for v in [100.0, 4_000.0, 9_000.0] {
            sli.record(v);
        }
        let compliance = sli.compliance_fraction().unwrap();
        assert!((0.0..=1.0).contains(&compliance));
    }

    #[test]
    fn percentile_nearest_rank() {
        let c = clock();
        let sli = Sli::new(
            SliKind::ResponseLatency { percentile: 0.5 },
            1_000.0,
            TimeWindow::HOUR_1,
            c.clone(),
        )
        .unwrap();
        for v in [100.0, 200.0, 300.0, 400.0] {
            sli.record(v);
        }
        // rank = ceil(0.5 * 4) = 2 -> 200.0
        assert_eq!(sli.current_aggregate(), Some(200.0));
    }

    #[test]
    fn percentile_of_single_sample_is_the_sample() {
        let c = clock();
        let sli = Sli::response_latency_p95(c.clone());
        sli.record(123.0);
        assert_eq!(sli.current_aggregate(), Some(123.0));
    }

    #[test]
    fn delegation_depth_uses_max() {
        let c = clock();
        let sli = Sli::delegation_chain_depth(c.clone());
        for v in [1.0, 3.0, 2.0] {
            sli.record(v);
        }
        assert_eq!(sli.current_aggregate(), Some(3.0));
        assert_eq!(sli.is_meeting_target(), Some(true));
        sli.record(5.0);
        assert_eq!(sli.is_meeting_target(), Some(false));
    }

    #[test]
    fn hallucination_rate_is_upper_bounded() {
        let c = clock();
        let sli = Sli::hallucination_rate(c.clone());
        for _ in 0..19 {
            sli.record(0.0);
        }
        sli.record(1.0);
        assert_eq!(sli.current_aggregate(), Some(0.05));
        assert_eq!(sli.is_meeting_target(), Some(true));
    }

    #[test]
    fn samples_expire_with_clock_advance() {
        let c = clock();
        let sli = Sli::new(
            SliKind::TaskSuccessRate,
            0.99,
            TimeWindow::from_secs(60).unwrap(),
            c.clone(),
        )
        .unwrap();
        sli.record(0.0);
        c.advance_secs(30);
        sli.record(1.0);
        assert_eq!(sli.samples_in_window().len(), 2);
        c.advance_secs(31);
        let live = sli.samples_in_window();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].value, 1.0);
        assert_eq!(sli.current_aggregate(), Some(1.0));
    }

    #[test]
    fn custom_indicator_declares_orientation() {
        let c = clock();
        let sli = Sli::new(
            SliKind::Custom {
                name: "context_window_fill".to_string(),
                orientation: TargetOrientation::UpperBound,
                aggregation: Aggregation::Mean,
            },
            0.8,
            TimeWindow::HOUR_1,
            c.clone(),
        )
        .unwrap();
        sli.record(0.5);
        sli.record(0.7);
        assert_eq!(sli.is_meeting_target(), Some(true));
        assert_eq!(sli.name(), "context_window_fill");
    }

    #[test]
    fn invalid_targets_are_rejected() {
        let c = clock();
        assert!(Sli::new(SliKind::TaskSuccessRate, 1.5, TimeWindow::DAY_1, c.clone()).is_err());
        assert!(Sli::new(SliKind::CostPerTask, -0.1, TimeWindow::DAY_1, c.clone()).is_err());
        assert!(Sli::new(
            SliKind::ResponseLatency { percentile: 1.2 },
            100.0,
            TimeWindow::DAY_1,
            c.clone()
        )
        .is_err());
    }
}
