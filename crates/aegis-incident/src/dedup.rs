//! Alert deduplication and storm protection.
//!
//! [`AlertDeduplicator`] suppresses repeats of the same fingerprint inside
//! a time window; `Resolved` alerts always pass and clear the window for
//! their fingerprint. [`AlertBatcher`] accumulates alerts into digest
//! notifications. Both are thread-safe and clock-injected.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use aegis_core::clock::SharedClock;

use crate::alert::{Alert, AlertSeverity};

/// Fingerprint an alert over the named fields. An explicit `dedup_key`
/// wins over field hashing.
pub fn alert_fingerprint(alert: &Alert, fields: &[&str]) -> String {
    if !alert.dedup_key.is_empty() {
        return alert.dedup_key.clone();
    }
    let mut hasher = Sha256::new();
    for field in fields {
        let value = match *field {
            "title" => alert.title.as_str(),
            "message" => alert.message.as_str(),
            "source" => alert.source.as_str(),
            "agent_id" => alert.agent_id.as_str(),
            "slo_name" => alert.slo_name.as_str(),
            _ => "",
        };
        hasher.update(field.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

/// Suppresses duplicate alerts inside a configurable window.
#[derive(Debug)]
pub struct AlertDeduplicator {
    window: Duration,
    group_by: Vec<&'static str>,
    clock: SharedClock,
    sent: Mutex<HashMap<String, DateTime<Utc>>>,
    counts: Mutex<HashMap<String, u64>>,
}

impl AlertDeduplicator {
    /// Create a deduplicator grouping on `(agent_id, title)`.
    pub fn new(window_secs: u64, clock: SharedClock) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            group_by: vec!["agent_id", "title"],
            clock,
            sent: Mutex::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// True when the alert is novel and should be delivered. `Resolved`
    /// alerts always pass and clear the window for their fingerprint.
    pub fn should_send(&self, alert: &Alert) -> bool {
        let fp = alert_fingerprint(alert, &self.group_by);
        let mut sent = self.sent.lock().unwrap();

        if alert.severity == AlertSeverity::Resolved {
            sent.remove(&fp);
            return true;
        }

        let now = self.clock.now();
        if let Some(last) = sent.get(&fp) {
            if now - *last < self.window {
                *self.counts.lock().unwrap().entry(fp).or_insert(0) += 1;
                metrics::counter!("aegis_alerts_suppressed_total").increment(1);
                return false;
            }
        }
        true
    }

    /// Record that an alert was delivered, starting its window.
    pub fn record(&self, alert: &Alert) {
        let fp = alert_fingerprint(alert, &self.group_by);
        let mut sent = self.sent.lock().unwrap();
        if alert.severity == AlertSeverity::Resolved {
            sent.remove(&fp);
        } else {
            sent.insert(fp, self.clock.now());
        }
    }

    /// Suppression count per fingerprint.
    pub fn suppression_counts(&self) -> HashMap<String, u64> {
        self.counts.lock().unwrap().clone()
    }

    /// Total suppressed alerts.
    pub fn total_suppressed(&self) -> u64 {
        self.counts.lock().unwrap().values().sum()
    }

    /// Drop fingerprints whose window has fully elapsed, bounding the
    /// table by the window.
    pub fn evict_expired(&self) {
        let now = self.clock.now();
        let window = self.window;
        self.sent
            .lock()
            .unwrap()
            .retain(|_, last| now - *last < window);
    }
}

/// Accumulates alerts into digest batches.
#[derive(Debug)]
pub struct AlertBatcher {
    batch_window: Duration,
    max_batch_size: usize,
    clock: SharedClock,
    inner: Mutex<BatchInner>,
}

#[derive(Debug)]
struct BatchInner {
    alerts: Vec<Alert>,
    window_start: DateTime<Utc>,
}

impl AlertBatcher {
    /// Create a batcher.
    pub fn new(batch_window_secs: u64, max_batch_size: usize, clock: SharedClock) -> Self {
        let window_start = clock.now();
        Self {
            batch_window: Duration::seconds(batch_window_secs as i64),
            max_batch_size: max_batch_size.max(1),
            clock,
            inner: Mutex::new(BatchInner {
                alerts: Vec::new(),
                window_start,
            }),
        }
    }

    /// Add an alert to the current batch.
    pub fn add(&self, alert: Alert) {
        let mut inner = self.inner.lock().unwrap();
        if inner.alerts.is_empty() {
            inner.window_start = self.clock.now();
        }
        inner.alerts.push(alert);
    }

    /// True when the batch should be flushed (size or window reached).
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.alerts.is_empty() {
            return false;
        }
        inner.alerts.len() >= self.max_batch_size
            || self.clock.now() - inner.window_start >= self.batch_window
    }

    /// Take the batched alerts, resetting the window.
    pub fn flush(&self) -> Vec<Alert> {
        let mut inner = self.inner.lock().unwrap();
        inner.window_start = self.clock.now();
        std::mem::take(&mut inner.alerts)
    }

    /// Human-readable digest of the current batch.
    pub fn digest(&self) -> String {
        let inner = self.inner.lock().unwrap();
        if inner.alerts.is_empty() {
            return "No alerts in batch.".to_string();
        }
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for alert in &inner.alerts {
            *by_severity.entry(alert.severity.to_string()).or_insert(0) += 1;
        }
        let mut lines = vec![format!("Alert digest ({} alerts):", inner.alerts.len()), String::new()];
        let mut severities: Vec<_> = by_severity.into_iter().collect();
        severities.sort();
        for (severity, count) in severities {
            lines.push(format!("  {severity}: {count}"));
        }
        lines.push(String::new());
        for alert in inner.alerts.iter().take(10) {
            lines.push(format!("  [{}] {}", alert.severity, alert.title));
        }
        if inner.alerts.len() > 10 {
            lines.push(format!("  ... and {} more", inner.alerts.len() - 10));
        }
        lines.join("\n")
    }

    /// Alerts currently batched.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().alerts.len()
    }

    /// True when the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::clock::ManualClock;
    use aegis_core::Clock;

    fn alert(title: &str, severity: AlertSeverity, now: DateTime<Utc>) -> Alert {
        Alert::new(title, "body", severity, now).with_agent("agent-a")
    }

    #[test]
    fn suppresses_within_window_allows_after() {
        let clock = ManualClock::shared();
        let dedup = AlertDeduplicator::new(300, clock.clone());
        let a = alert("breach", AlertSeverity::Critical, clock.now());

        assert!(dedup.should_send(&a));
        dedup.record(&a);

        clock.advance_secs(60);
        assert!(!dedup.should_send(&a));
        assert_eq!(dedup.total_suppressed(), 1);

        clock.advance_secs(300);
        assert!(dedup.should_send(&a));
    }

    #[test]
    fn distinct_fingerprints_do_not_collide() {
        let clock = ManualClock::shared();
        let dedup = AlertDeduplicator::new(300, clock.clone());
        let a = alert("breach", AlertSeverity::Critical, clock.now());
        let b = alert("cost spike", AlertSeverity::Critical, clock.now());
        dedup.record(&a);
        assert!(dedup.should_send(&b));
    }

    #[test]
    fn explicit_dedup_key_wins_over_fields() {
        let clock = ManualClock::shared();
        let dedup = AlertDeduplicator::new(300, clock.clone());
        let a = alert("title one", AlertSeverity::Critical, clock.now()).with_dedup_key("shared");
        let b = alert("title two", AlertSeverity::Critical, clock.now()).with_dedup_key("shared");
        dedup.record(&a);
        assert!(!dedup.should_send(&b));
    }

    #[test]
    fn resolved_passes_and_clears_window() {
        let clock = ManualClock::shared();
        let dedup = AlertDeduplicator::new(300, clock.clone());
        let firing = alert("breach", AlertSeverity::Critical, clock.now());
        dedup.record(&firing);
        assert!(!dedup.should_send(&firing));

        let resolved = alert("breach", AlertSeverity::Resolved, clock.now());
        assert!(dedup.should_send(&resolved));
        dedup.record(&resolved);

        // Window cleared: the next firing alert goes through.
        assert!(dedup.should_send(&firing));
    }

    #[test]
    fn eviction_bounds_the_table() {
        let clock = ManualClock::shared();
        let dedup = AlertDeduplicator::new(300, clock.clone());
        for i in 0..10 {
            let a = alert(&format!("t{i}"), AlertSeverity::Warn, clock.now());
            dedup.record(&a);
        }
        clock.advance_secs(301);
        dedup.evict_expired();
        assert!(dedup.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn batcher_flushes_on_size_and_window() {
        let clock = ManualClock::shared();
        let batcher = AlertBatcher::new(60, 3, clock.clone());
        assert!(!batcher.is_ready());

        batcher.add(alert("a", AlertSeverity::Warn, clock.now()));
        batcher.add(alert("b", AlertSeverity::Warn, clock.now()));
        assert!(!batcher.is_ready());
        batcher.add(alert("c", AlertSeverity::Critical, clock.now()));
        assert!(batcher.is_ready());

        let flushed = batcher.flush();
        assert_eq!(flushed.len(), 3);
        assert!(batcher.is_empty());

        batcher.add(alert("d", AlertSeverity::Info, clock.now()));
        assert!(!batcher.is_ready());
        clock.advance_secs(61);
        assert!(batcher.is_ready());
    }

    #[test]
    fn digest_summarizes_batch() {
        let clock = ManualClock::shared();
        let batcher = AlertBatcher::new(60, 50, clock.clone());
        batcher.add(alert("breach", AlertSeverity::Critical, clock.now()));
        batcher.add(alert("spike", AlertSeverity::Warn, clock.now()));
        let digest = batcher.digest();
        assert!(digest.contains("2 alerts"));
        assert!(digest.contains("[critical] breach"));
    }
}
