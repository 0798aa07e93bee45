//! Metric comparison primitive shared by analysis gates, rollback
//! conditions, and chaos abort conditions.

use serde::{Deserialize, Serialize};

/// How a live metric value is compared against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    /// Value >= threshold
    Gte,
    /// Value <= threshold
    Lte,
    /// Value > threshold
    Gt,
    /// Value < threshold
    Lt,
    /// Value == threshold (within f64 epsilon)
    Eq,
}

impl Comparator {
    /// Evaluate `value <op> threshold`.
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gte => value >= threshold,
            Comparator::Lte => value <= threshold,
            Comparator::Gt => value > threshold,
            Comparator::Lt => value < threshold,
            Comparator::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl Default for Comparator {
    fn default() -> Self {
        Comparator::Gte
    }
}
