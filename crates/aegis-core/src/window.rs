//! Time windows and expiring sample buffers.
//!
//! A [`SampleWindow`] keeps samples in recording order and expires entries
//! strictly older than `now - window` whenever it is touched. A sample whose
//! timestamp equals the boundary exactly is retained.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A rolling time window expressed in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    secs: u64,
}

impl TimeWindow {
    /// One hour
    pub const HOUR_1: TimeWindow = TimeWindow { secs: 3_600 };
    /// Six hours
    pub const HOUR_6: TimeWindow = TimeWindow { secs: 21_600 };
    /// One day
    pub const DAY_1: TimeWindow = TimeWindow { secs: 86_400 };
    /// Seven days
    pub const DAY_7: TimeWindow = TimeWindow { secs: 604_800 };
    /// Thirty days
    pub const DAY_30: TimeWindow = TimeWindow { secs: 2_592_000 };

    /// Build a window from whole seconds. Zero-length windows are rejected.
    pub fn from_secs(secs: u64) -> Result<Self> {
        if secs == 0 {
            return Err(Error::config("time window must be greater than 0 seconds"));
        }
        Ok(Self { secs })
    }

    /// Window length in seconds.
    pub fn seconds(&self) -> u64 {
        self.secs
    }

    /// Window length as a chrono duration.
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.secs as i64)
    }

    /// Parse a compact window string such as `"30d"`, `"6h"`, `"15m"` or `"900s"`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (digits, unit) = trimmed.split_at(trimmed.len().saturating_sub(1));
        let value: u64 = digits
            .parse()
            .map_err(|_| Error::config(format!("invalid window literal '{input}'")))?;
        let secs = match unit {
            "s" => value,
            "m" => value * 60,
            "h" => value * 3_600,
            "d" => value * 86_400,
            _ => return Err(Error::config(format!("unknown window unit in '{input}'"))),
        };
        Self::from_secs(secs)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secs % 86_400 == 0 {
            write!(f, "{}d", self.secs / 86_400)
        } else if self.secs % 3_600 == 0 {
            write!(f, "{}h", self.secs / 3_600)
        } else if self.secs % 60 == 0 {
            write!(f, "{}m", self.secs / 60)
        } else {
            write!(f, "{}s", self.secs)
        }
    }
}

/// A single timestamped measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Recording time
    pub timestamp: DateTime<Utc>,
    /// Numeric value
    pub value: f64,
    /// Optional metadata attached by the recorder
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Sample {
    /// Create a sample without metadata.
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            metadata: HashMap::new(),
        }
    }

    /// Create a sample carrying metadata.
    pub fn with_metadata(
        timestamp: DateTime<Utc>,
        value: f64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            timestamp,
            value,
            metadata,
        }
    }
}

/// Bounded-by-time buffer of samples in recording order.
#[derive(Debug)]
pub struct SampleWindow {
    window: TimeWindow,
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    /// Create an empty buffer for the given window.
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// The window this buffer expires against.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Append a sample and prune anything that has aged out relative to it.
    pub fn push(&mut self, sample: Sample) {
        let now = sample.timestamp;
        self.samples.push_back(sample);
        self.prune(now);
    }

    /// Drop samples strictly older than `now - window`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window.duration();
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Copy of the live samples after expiring against `now`.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> Vec<Sample> {
        self.prune(now);
        self.samples.iter().cloned().collect()
    }

    /// Number of buffered samples (pre-prune).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples are buffered.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(base: DateTime<Utc>, offset_secs: i64) -> DateTime<Utc> {
        base + Duration::seconds(offset_secs)
    }

    #[test]
    fn parse_window_literals() {
        assert_eq!(TimeWindow::parse("30d").unwrap(), TimeWindow::DAY_30);
        assert_eq!(TimeWindow::parse("6h").unwrap(), TimeWindow::HOUR_6);
        assert_eq!(TimeWindow::parse("15m").unwrap().seconds(), 900);
        assert_eq!(TimeWindow::parse("900s").unwrap().seconds(), 900);
        assert!(TimeWindow::parse("0s").is_err());
        assert!(TimeWindow::parse("5x").is_err());
        assert!(TimeWindow::parse("").is_err());
    }

    #[test]
    fn window_display_round_trips() {
        for w in [
            TimeWindow::HOUR_1,
            TimeWindow::DAY_7,
            TimeWindow::from_secs(90).unwrap(),
        ] {
            assert_eq!(TimeWindow::parse(&w.to_string()).unwrap(), w);
        }
    }

    #[test]
    fn expires_strictly_older_samples() {
        let base = Utc::now();
        let mut buf = SampleWindow::new(TimeWindow::from_secs(60).unwrap());
        buf.push(Sample::new(ts(base, 0), 1.0));
        buf.push(Sample::new(ts(base, 30), 2.0));

        // Exactly at the boundary: the t=0 sample sits at now - window and
        // must be retained.
        let live = buf.snapshot(ts(base, 60));
        assert_eq!(live.len(), 2);

        // One second past the boundary it expires.
        let live = buf.snapshot(ts(base, 61));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].value, 2.0);
    }

    #[test]
    fn snapshot_preserves_recording_order() {
        let base = Utc::now();
        let mut buf = SampleWindow::new(TimeWindow::HOUR_1);
        for i in 0..5 {
            buf.push(Sample::new(ts(base, i), i as f64));
        }
        let live = buf.snapshot(ts(base, 10));
        let values: Vec<f64> = live.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn empty_window_snapshot() {
        let mut buf = SampleWindow::new(TimeWindow::HOUR_1);
        assert!(buf.snapshot(Utc::now()).is_empty());
        assert!(buf.is_empty());
    }
}
