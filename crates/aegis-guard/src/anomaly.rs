//! Statistical anomaly detection over the cost stream.
//!
//! Three independent detectors run over a rolling sample buffer:
//!
//! - **Z-score** against the buffer mean; requires at least 30 samples,
//!   below that it reports insufficient data by staying silent.
//! - **IQR** outlier detection at 1.5x the interquartile range.
//! - **EWMA** with exponentially weighted mean and variance, flagging
//!   deviations beyond `k` EWMA standard deviations.
//!
//! Results are advisory; callers aggregate severity by max.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use aegis_core::signal::Severity;

/// Detection method that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    /// Standard deviations from the rolling mean
    ZScore,
    /// Interquartile-range outlier
    Iqr,
    /// Exponentially weighted moving average deviation
    Ewma,
}

/// A triggered anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Method that flagged the value
    pub method: AnomalyMethod,
    /// Severity, graded by how far outside the expected range the value sits
    pub severity: Severity,
    /// The observed value
    pub value: f64,
    /// Deviation score (z-score, IQR distance, or EWMA deviation)
    pub score: f64,
    /// Lower edge of the expected range
    pub expected_low: f64,
    /// Upper edge of the expected range
    pub expected_high: f64,
    /// Human-readable description
    pub message: String,
}

/// Rolling baseline statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineStats {
    /// Arithmetic mean
    pub mean: f64,
    /// Standard deviation
    pub std_dev: f64,
    /// Median
    pub median: f64,
    /// First quartile
    pub q1: f64,
    /// Third quartile
    pub q3: f64,
    /// Interquartile range
    pub iqr: f64,
    /// Samples in the buffer
    pub sample_count: usize,
    /// Current EWMA
    pub ewma: f64,
}

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Z-score threshold
    pub z_threshold: f64,
    /// Minimum samples before the z-score detector runs
    pub z_min_samples: usize,
    /// IQR multiplier for the outlier fence
    pub iqr_multiplier: f64,
    /// Minimum samples before IQR/EWMA detectors run
    pub min_samples: usize,
    /// EWMA smoothing factor
    pub ewma_alpha: f64,
    /// EWMA deviation threshold in standard deviations
    pub ewma_k: f64,
    /// Rolling buffer size
    pub window_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            z_min_samples: 30,
            iqr_multiplier: 1.5,
            min_samples: 10,
            ewma_alpha: 0.3,
            ewma_k: 3.0,
            window_size: 1_000,
        }
    }
}

/// Multi-method anomaly detector over a rolling buffer.
#[derive(Debug)]
pub struct CostAnomalyDetector {
    config: DetectorConfig,
    data: VecDeque<f64>,
    ewma: f64,
    ewma_var: f64,
    initialized: bool,
    total_anomalies: u64,
}

impl CostAnomalyDetector {
    /// Create a detector from a config.
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            data: VecDeque::new(),
            ewma: 0.0,
            ewma_var: 0.0,
            initialized: false,
            total_anomalies: 0,
        }
    }

    /// Create a detector with default thresholds.
    pub fn with_defaults() -> Self {
        Self::new(DetectorConfig::default())
    }

    /// Ingest a value and return every detector that triggered. The new
    /// value is evaluated against the baseline formed by prior samples,
    /// then folded into the buffer.
    pub fn ingest(&mut self, value: f64) -> Vec<AnomalyResult> {
        let results: Vec<AnomalyResult> = [
            self.check_zscore(value),
            self.check_iqr(value),
            self.check_ewma(value),
        ]
        .into_iter()
        .flatten()
        .collect();

        self.data.push_back(value);
        while self.data.len() > self.config.window_size {
            self.data.pop_front();
        }
        self.update_ewma(value);

        self.total_anomalies += results.len() as u64;
        results
    }

    /// Current baseline statistics.
    pub fn baseline(&self) -> BaselineStats {
        let n = self.data.len();
        if n == 0 {
            return BaselineStats::default();
        }
        let values: Vec<f64> = self.data.iter().copied().collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

        let mut sorted = values;
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let q1 = if n >= 4 { sorted[n / 4] } else { sorted[0] };
        let q3 = if n >= 4 { sorted[3 * n / 4] } else { sorted[n - 1] };

        BaselineStats {
            mean,
            std_dev: variance.sqrt(),
            median,
            q1,
            q3,
            iqr: q3 - q1,
            sample_count: n,
            ewma: self.ewma,
        }
    }

    /// Total anomalies flagged since construction.
    pub fn total_anomalies(&self) -> u64 {
        self.total_anomalies
    }

    /// Samples currently buffered.
    pub fn sample_count(&self) -> usize {
        self.data.len()
    }

    fn update_ewma(&mut self, value: f64) {
        if !self.initialized {
            self.ewma = value;
            self.ewma_var = 0.0;
            self.initialized = true;
            return;
        }
        let alpha = self.config.ewma_alpha;
        let diff = value - self.ewma;
        self.ewma = alpha * value + (1.0 - alpha) * self.ewma;
        self.ewma_var = (1.0 - alpha) * (self.ewma_var + alpha * diff * diff);
    }

    fn check_zscore(&self, value: f64) -> Option<AnomalyResult> {
        // The z-score detector needs a substantial baseline; below the
        // floor it yields insufficient data.
        if self.data.len() < self.config.z_min_samples {
            return None;
        }
        let stats = self.baseline();
        if stats.std_dev == 0.0 {
            return None;
        }
        let z = (value - stats.mean).abs() / stats.std_dev;
        if z <= self.config.z_threshold {
            return None;
        }
        let low = (stats.mean - self.config.z_threshold * stats.std_dev).max(0.0);
        let high = stats.mean + self.config.z_threshold * stats.std_dev;
        Some(AnomalyResult {
            method: AnomalyMethod::ZScore,
            severity: graded_severity(z, self.config.z_threshold),
            value,
            score: z,
            expected_low: low,
            expected_high: high,
            message: format!(
                "z-score {z:.1} exceeds threshold {:.1} (mean {:.4})",
                self.config.z_threshold, stats.mean
            ),
        })
    }

    fn check_iqr(&self, value: f64) -> Option<AnomalyResult> {
        if self.data.len() < self.config.min_samples {
            return None;
        }
        let stats = self.baseline();
        if stats.iqr == 0.0 {
            return None;
        }
        let low = stats.q1 - self.config.iqr_multiplier * stats.iqr;
        let high = stats.q3 + self.config.iqr_multiplier * stats.iqr;
        if value >= low && value <= high {
            return None;
        }
        let distance = if value < low {
            (low - value) / stats.iqr
        } else {
            (value - high) / stats.iqr
        } + self.config.iqr_multiplier;
        Some(AnomalyResult {
            method: AnomalyMethod::Iqr,
            severity: graded_severity(distance, self.config.iqr_multiplier),
            value,
            score: distance,
            expected_low: low.max(0.0),
            expected_high: high,
            message: format!("value outside IQR fence [{low:.4}, {high:.4}]"),
        })
    }

    fn check_ewma(&self, value: f64) -> Option<AnomalyResult> {
        if self.data.len() < self.config.min_samples || self.ewma_var <= 0.0 {
            return None;
        }
        let ewma_std = self.ewma_var.sqrt();
        if ewma_std == 0.0 {
            return None;
        }
        let deviation = (value - self.ewma).abs() / ewma_std;
        if deviation <= self.config.ewma_k {
            return None;
        }
        let low = (self.ewma - self.config.ewma_k * ewma_std).max(0.0);
        let high = self.ewma + self.config.ewma_k * ewma_std;
        Some(AnomalyResult {
            method: AnomalyMethod::Ewma,
            severity: graded_severity(deviation, self.config.ewma_k),
            value,
            score: deviation,
            expected_low: low,
            expected_high: high,
            message: format!(
                "EWMA deviation {deviation:.1} exceeds {:.1} (ewma {:.4})",
                self.config.ewma_k, self.ewma
            ),
        })
    }
}

/// Grade severity by how far the score overshoots the trigger threshold.
fn graded_severity(score: f64, threshold: f64) -> Severity {
    if score > threshold * 2.0 {
        Severity::Critical
    } else if score > threshold * 1.25 {
        Severity::Warn
    } else {
        Severity::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_with(min_z: usize) -> CostAnomalyDetector {
        CostAnomalyDetector::new(DetectorConfig {
            z_min_samples: min_z,
            ..DetectorConfig::default()
        })
    }

    #[test]
    fn insufficient_data_stays_silent() {
        let mut det = CostAnomalyDetector::with_defaults();
        // Below every sample floor: even an extreme value is not judged.
        for v in [0.01, 0.012, 0.011] {
            assert!(det.ingest(v).is_empty());
        }
        assert!(det.ingest(100.0).is_empty());
    }

    #[test]
    fn zscore_requires_thirty_samples() {
        let mut det = detector_with(30);
        for i in 0..29 {
            det.ingest(0.01 + (i % 3) as f64 * 0.001);
        }
        // 29 samples: z-score silent even on a wild value (IQR/EWMA may fire).
        let results = det.ingest(10.0);
        assert!(results.iter().all(|r| r.method != AnomalyMethod::ZScore));
    }

    #[test]
    fn zscore_flags_outlier_with_enough_samples() {
        let mut det = detector_with(30);
        for i in 0..40 {
            det.ingest(0.01 + (i % 5) as f64 * 0.002);
        }
        let results = det.ingest(5.0);
        let z = results
            .iter()
            .find(|r| r.method == AnomalyMethod::ZScore)
            .expect("z-score should flag a 500x outlier");
        assert!(z.score > 3.0);
        assert_eq!(z.severity, Severity::Critical);
    }

    #[test]
    fn iqr_flags_outlier() {
        let mut det = CostAnomalyDetector::with_defaults();
        for i in 0..20 {
            det.ingest(0.10 + (i % 4) as f64 * 0.01);
        }
        let results = det.ingest(2.0);
        assert!(results.iter().any(|r| r.method == AnomalyMethod::Iqr));
    }

    #[test]
    fn ewma_tracks_gradual_drift_without_flagging() {
        let mut det = CostAnomalyDetector::with_defaults();
        let mut flagged = 0;
        for i in 0..100 {
            let v = 0.10 + i as f64 * 0.0005; // slow drift
            flagged += det
                .ingest(v)
                .iter()
                .filter(|r| r.method == AnomalyMethod::Ewma)
                .count();
        }
        assert_eq!(flagged, 0, "gradual drift should not trip EWMA");
    }

    #[test]
    fn steady_stream_produces_no_anomalies() {
        let mut det = CostAnomalyDetector::with_defaults();
        for _ in 0..100 {
            assert!(det.ingest(0.25).is_empty());
        }
        assert_eq!(det.total_anomalies(), 0);
    }

    #[test]
    fn baseline_statistics() {
        let mut det = CostAnomalyDetector::with_defaults();
        for v in [1.0, 2.0, 3.0, 4.0] {
            det.ingest(v);
        }
        let stats = det.baseline();
        assert_eq!(stats.sample_count, 4);
        assert!((stats.mean - 2.5).abs() < 1e-9);
        assert!((stats.median - 2.5).abs() < 1e-9);
        assert!(stats.iqr > 0.0);
    }

    #[test]
    fn buffer_is_bounded() {
        let mut det = CostAnomalyDetector::new(DetectorConfig {
            window_size: 50,
            ..DetectorConfig::default()
        });
        for _ in 0..500 {
            det.ingest(0.1);
        }
        assert_eq!(det.sample_count(), 50);
    }
}
