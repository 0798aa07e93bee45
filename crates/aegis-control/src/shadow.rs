//! Shadow sessions: mirrored-traffic comparison of candidate vs. current.
//!
//! A shadow deployment is the degenerate rollout where the candidate takes
//! 0% of live traffic but sees 100% of requests mirrored. Each comparison
//! records output match, similarity, and latency/cost deltas; the
//! aggregated metrics feed the same analysis gates a canary uses.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aegis_core::clock::SharedClock;

/// One mirrored request compared across versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowComparison {
    /// Request id
    pub request_id: String,
    /// Whether the outputs matched
    pub matched: bool,
    /// Similarity score in [0, 1]
    pub similarity: f64,
    /// Current-version latency (ms)
    pub current_latency_ms: f64,
    /// Candidate latency (ms)
    pub candidate_latency_ms: f64,
    /// Current-version cost (USD)
    pub current_cost_usd: f64,
    /// Candidate cost (USD)
    pub candidate_cost_usd: f64,
    /// Comparison time
    pub timestamp: DateTime<Utc>,
}

impl ShadowComparison {
    /// Candidate latency minus current latency.
    pub fn latency_delta_ms(&self) -> f64 {
        self.candidate_latency_ms - self.current_latency_ms
    }

    /// Candidate cost minus current cost.
    pub fn cost_delta_usd(&self) -> f64 {
        self.candidate_cost_usd - self.current_cost_usd
    }
}

/// Aggregated shadow-session results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowSummary {
    /// Session id
    pub session_id: Uuid,
    /// Mirrored requests compared
    pub total_requests: usize,
    /// Fraction of matching outputs
    pub match_rate: f64,
    /// Mean similarity
    pub avg_similarity: f64,
    /// Mean latency delta (ms)
    pub avg_latency_delta_ms: f64,
    /// Mean cost delta (USD)
    pub avg_cost_delta_usd: f64,
    /// Promotion confidence in [0, 1]
    pub confidence: f64,
}

/// A running shadow comparison session.
#[derive(Debug)]
pub struct ShadowSession {
    session_id: Uuid,
    clock: SharedClock,
    started_at: DateTime<Utc>,
    comparisons: Mutex<Vec<ShadowComparison>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
}

impl ShadowSession {
    /// Start a session.
    pub fn new(clock: SharedClock) -> Self {
        let started_at = clock.now();
        Self {
            session_id: Uuid::new_v4(),
            clock,
            started_at,
            comparisons: Mutex::new(Vec::new()),
            ended_at: Mutex::new(None),
        }
    }

    /// Session id.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Session start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record one mirrored-request comparison.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        request_id: impl Into<String>,
        matched: bool,
        similarity: f64,
        current_latency_ms: f64,
        candidate_latency_ms: f64,
        current_cost_usd: f64,
        candidate_cost_usd: f64,
    ) -> ShadowComparison {
        let comparison = ShadowComparison {
            request_id: request_id.into(),
            matched,
            similarity: similarity.clamp(0.0, 1.0),
            current_latency_ms,
            candidate_latency_ms,
            current_cost_usd,
            candidate_cost_usd,
            timestamp: self.clock.now(),
        };
        self.comparisons.lock().unwrap().push(comparison.clone());
        comparison
    }

    /// Aggregate the session so far.
    pub fn summary(&self) -> ShadowSummary {
        let comparisons = self.comparisons.lock().unwrap();
        let n = comparisons.len();
        if n == 0 {
            return ShadowSummary {
                session_id: self.session_id,
                total_requests: 0,
                match_rate: 0.0,
                avg_similarity: 0.0,
                avg_latency_delta_ms: 0.0,
                avg_cost_delta_usd: 0.0,
                confidence: 0.0,
            };
        }
        let match_rate = comparisons.iter().filter(|c| c.matched).count() as f64 / n as f64;
        let avg_similarity = comparisons.iter().map(|c| c.similarity).sum::<f64>() / n as f64;
        let avg_latency_delta_ms =
            comparisons.iter().map(|c| c.latency_delta_ms()).sum::<f64>() / n as f64;
        let avg_cost_delta_usd =
            comparisons.iter().map(|c| c.cost_delta_usd()).sum::<f64>() / n as f64;

        // A candidate that matches, stays similar, and does not regress on
        // latency or cost scores near 1.0.
        let latency_factor = if avg_latency_delta_ms <= 0.0 {
            1.0
        } else {
            (1.0 - avg_latency_delta_ms / 5_000.0).max(0.0)
        };
        let cost_factor = if avg_cost_delta_usd <= 0.0 {
            1.0
        } else {
            (1.0 - avg_cost_delta_usd).max(0.0)
        };
        let confidence = (match_rate + avg_similarity + latency_factor + cost_factor) / 4.0;

        ShadowSummary {
            session_id: self.session_id,
            total_requests: n,
            match_rate,
            avg_similarity,
            avg_latency_delta_ms,
            avg_cost_delta_usd,
            confidence,
        }
    }

    /// The session's aggregates as a metric map for rollout analysis gates.
    pub fn gate_metrics(&self) -> HashMap<String, f64> {
        let summary = self.summary();
        HashMap::from([
            ("shadow_match_rate".to_string(), summary.match_rate),
            ("shadow_similarity".to_string(), summary.avg_similarity),
            (
                "shadow_latency_delta_ms".to_string(),
                summary.avg_latency_delta_ms,
            ),
            (
                "shadow_cost_delta_usd".to_string(),
                summary.avg_cost_delta_usd,
            ),
            ("shadow_confidence".to_string(), summary.confidence),
        ])
    }

    /// Whether the session has been finished.
    pub fn is_finished(&self) -> bool {
        self.ended_at.lock().unwrap().is_some()
    }

    /// End the session.
    pub fn finish(&self) -> ShadowSummary {
        *self.ended_at.lock().unwrap() = Some(self.clock.now());
        self.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::AnalysisCriterion;
    use aegis_core::clock::ManualClock;
    use aegis_core::metric::Comparator;

    #[test]
    fn empty_session_has_zero_confidence() {
        let session = ShadowSession::new(ManualClock::shared());
        let summary = session.summary();
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.confidence, 0.0);
    }

    #[test]
    fn healthy_candidate_scores_high() {
        let session = ShadowSession::new(ManualClock::shared());
        for i in 0..20 {
            session.record(format!("req-{i}"), true, 0.97, 900.0, 850.0, 0.02, 0.018);
        }
        let summary = session.summary();
        assert_eq!(summary.total_requests, 20);
        assert_eq!(summary.match_rate, 1.0);
        assert!(summary.avg_latency_delta_ms < 0.0);
        assert!(summary.confidence > 0.95);
    }

    #[test]
    fn regressing_candidate_scores_low() {
        let session = ShadowSession::new(ManualClock::shared());
        for i in 0..20 {
            session.record(format!("req-{i}"), i % 4 == 0, 0.4, 900.0, 4_900.0, 0.02, 0.9);
        }
        let summary = session.summary();
        assert!(summary.match_rate < 0.3);
        assert!(summary.confidence < 0.5);
    }

    #[test]
    fn gate_metrics_feed_analysis_criteria() {
        let session = ShadowSession::new(ManualClock::shared());
        for i in 0..10 {
            session.record(format!("req-{i}"), true, 0.95, 1_000.0, 1_000.0, 0.02, 0.02);
        }
        let gate = AnalysisCriterion {
            metric: "shadow_confidence".to_string(),
            threshold: 0.8,
            comparator: Comparator::Gte,
        };
        let metrics_map = session.gate_metrics();
        let value = metrics_map.get("shadow_confidence").copied().unwrap();
        assert!(gate.passes(value));
    }
}
