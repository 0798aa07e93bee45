//! Error budget accounting and burn-rate alerting.
//!
//! The budget keeps a windowed log of `(timestamp, good)` events and derives
//! everything else from it on read:
//!
//! - `consumed = (bad / total) * elapsed_fraction` where `elapsed_fraction`
//!   is how much of the budget window the log currently spans. A sustained
//!   failure rate equal to `total` exhausts the budget exactly at window
//!   end (burn rate 1.0), a 5x burn exhausts it at 20% of the window.
//! - `burn_rate(w)` is the observed failure rate over the last `w` seconds
//!   divided by the sustainable rate `total`.
//!
//! Because consumption is recomputed from the log, EXHAUSTED is absorbing
//! until the oldest bad events age out of the window.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use aegis_core::clock::SharedClock;
use aegis_core::error::{Error, Result};
use aegis_core::signal::Severity;
use aegis_core::window::TimeWindow;

/// Default warn burn-rate threshold.
pub const DEFAULT_BURN_RATE_WARN: f64 = 2.0;
/// Default critical burn-rate threshold.
pub const DEFAULT_BURN_RATE_CRITICAL: f64 = 10.0;
/// Standard sub-windows for multi-window burn-rate evaluation (secs).
pub const BURN_RATE_WINDOWS: [u64; 4] = [3_600, 21_600, 86_400, 259_200];

/// Downstream intent carried on an exhaustion signal. The budget itself
/// only reports; the delivery engine and circuit breakers react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionAction {
    /// Alert only
    Alert,
    /// Freeze progressive rollouts
    FreezeDeployments,
    /// Open the agent's circuit breaker
    CircuitBreak,
    /// Throttle the agent
    Throttle,
}

impl Default for ExhaustionAction {
    fn default() -> Self {
        ExhaustionAction::Alert
    }
}

impl fmt::Display for ExhaustionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Alert => "alert",
            Self::FreezeDeployments => "freeze_deployments",
            Self::CircuitBreak => "circuit_break",
            Self::Throttle => "throttle",
        };
        write!(f, "{s}")
    }
}

/// A burn-rate alert threshold evaluated over its own sub-window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnRateAlert {
    /// Alert name
    pub name: String,
    /// Burn-rate multiplier that trips the alert
    pub rate: f64,
    /// Severity when firing
    pub severity: Severity,
    /// Sub-window the rate is computed over (secs)
    pub window_secs: u64,
}

impl BurnRateAlert {
    /// Whether this alert fires at the given burn rate.
    pub fn is_firing(&self, current_rate: f64) -> bool {
        current_rate >= self.rate
    }
}

/// Error budget configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBudgetConfig {
    /// Tolerable failure fraction over the window (0..=1)
    pub total: f64,
    /// Budget window in seconds
    pub window_secs: u64,
    /// Warn burn-rate threshold
    pub burn_rate_warn: f64,
    /// Critical burn-rate threshold
    pub burn_rate_critical: f64,
    /// Intent when the budget exhausts
    pub exhaustion_action: ExhaustionAction,
}

impl Default for ErrorBudgetConfig {
    fn default() -> Self {
        Self {
            total: 0.01,
            window_secs: TimeWindow::DAY_30.seconds(),
            burn_rate_warn: DEFAULT_BURN_RATE_WARN,
            burn_rate_critical: DEFAULT_BURN_RATE_CRITICAL,
            exhaustion_action: ExhaustionAction::Alert,
        }
    }
}

/// Serializable budget state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBudgetSnapshot {
    /// Budget size
    pub total: f64,
    /// Consumed fraction (same unit as `total`)
    pub consumed: f64,
    /// Remaining fraction
    pub remaining: f64,
    /// Remaining as percent of total
    pub remaining_percent: f64,
    /// Whether the budget is fully consumed
    pub is_exhausted: bool,
    /// Burn rate over the last hour
    pub burn_rate_1h: f64,
    /// Burn rate over the last six hours
    pub burn_rate_6h: f64,
    /// Exhaustion intent
    pub exhaustion_action: ExhaustionAction,
    /// Names of currently firing alerts
    pub firing_alerts: Vec<String>,
}

/// Windowed error budget.
#[derive(Debug)]
pub struct ErrorBudget {
    config: ErrorBudgetConfig,
    window: TimeWindow,
    clock: SharedClock,
    events: Mutex<VecDeque<(DateTime<Utc>, bool)>>,
}

impl ErrorBudget {
    /// Create a budget from a config.
    pub fn new(config: ErrorBudgetConfig, clock: SharedClock) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.total) {
            return Err(Error::config(format!(
                "error budget total must be in [0, 1], got {}",
                config.total
            )));
        }
        let window = TimeWindow::from_secs(config.window_secs)?;
        Ok(Self {
            config,
            window,
            clock,
            events: Mutex::new(VecDeque::new()),
        })
    }

    /// Create a budget with the given size over the default 30-day window.
    pub fn with_total(total: f64, clock: SharedClock) -> Result<Self> {
        Self::new(
            ErrorBudgetConfig {
                total,
                ..ErrorBudgetConfig::default()
            },
            clock,
        )
    }

    /// Budget size.
    pub fn total(&self) -> f64 {
        self.config.total
    }

    /// Budget window.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Exhaustion intent.
    pub fn exhaustion_action(&self) -> ExhaustionAction {
        self.config.exhaustion_action
    }

    /// Record a good or bad event.
    pub fn record_event(&self, good: bool) {
        let now = self.clock.now();
        let mut events = self.events.lock().unwrap();
        events.push_back((now, good));
        Self::trim(&mut events, now, self.window);
        if !good {
            debug!(consumed = self.consumed_locked(&events, now), "bad event recorded");
        }
    }

    fn trim(events: &mut VecDeque<(DateTime<Utc>, bool)>, now: DateTime<Utc>, window: TimeWindow) {
        let cutoff = now - window.duration();
        while let Some((ts, _)) = events.front() {
            if *ts < cutoff {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    fn consumed_locked(&self, events: &VecDeque<(DateTime<Utc>, bool)>, now: DateTime<Utc>) -> f64 {
        if events.is_empty() {
            return 0.0;
        }
        let bad = events.iter().filter(|(_, good)| !good).count() as f64;
        let total_events = events.len() as f64;
        let oldest = events.front().map(|(ts, _)| *ts).unwrap_or(now);
        let span = (now - oldest).num_milliseconds().max(0) as f64 / 1_000.0;
        let elapsed_fraction = (span / self.window.seconds() as f64).clamp(0.0, 1.0);
        (bad / total_events) * elapsed_fraction
    }

    /// Consumed budget fraction, recomputed from the windowed log.
    pub fn consumed(&self) -> f64 {
        let now = self.clock.now();
        let mut events = self.events.lock().unwrap();
        Self::trim(&mut events, now, self.window);
        self.consumed_locked(&events, now)
    }

    /// Remaining budget fraction.
    pub fn remaining(&self) -> f64 {
        (self.config.total - self.consumed()).max(0.0)
    }

    /// Remaining budget as percent of total.
    pub fn remaining_percent(&self) -> f64 {
        if self.config.total > 0.0 {
            100.0 * self.remaining() / self.config.total
        } else {
            0.0
        }
    }

    /// True when the budget is fully consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= 0.0
    }

    /// Burn rate over the last `sub_window_secs`: the observed failure rate
    /// divided by the sustainable rate. 1.0 consumes the budget exactly
    /// over the full window; 0.0 on an empty sub-window.
    pub fn burn_rate(&self, sub_window_secs: u64) -> f64 {
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(sub_window_secs as i64);
        let mut events = self.events.lock().unwrap();
        Self::trim(&mut events, now, self.window);

        let mut bad = 0usize;
        let mut total = 0usize;
        for (ts, good) in events.iter() {
            if *ts >= cutoff {
                total += 1;
                if !good {
                    bad += 1;
                }
            }
        }
        if total == 0 || self.config.total <= 0.0 {
            return 0.0;
        }
        (bad as f64 / total as f64) / self.config.total
    }

    /// Burn rates over the standard multi-window set (1h/6h/24h/72h),
    /// supporting Google-style multi-window alerts.
    pub fn burn_rates(&self) -> Vec<(u64, f64)> {
        BURN_RATE_WINDOWS
            .iter()
            .map(|&w| (w, self.burn_rate(w)))
            .collect()
    }

    /// The configured alert set: fast warn and critical over 1h, slow warn
    /// at half the warn rate over 6h.
    pub fn alerts(&self) -> Vec<BurnRateAlert> {
        vec![
            BurnRateAlert {
                name: "fast_burn_warn".to_string(),
                rate: self.config.burn_rate_warn,
                severity: Severity::Warn,
                window_secs: 3_600,
            },
            BurnRateAlert {
                name: "fast_burn_critical".to_string(),
                rate: self.config.burn_rate_critical,
                severity: Severity::Critical,
                window_secs: 3_600,
            },
            BurnRateAlert {
                name: "slow_burn_warn".to_string(),
                rate: self.config.burn_rate_warn / 2.0,
                severity: Severity::Warn,
                window_secs: 21_600,
            },
        ]
    }

    /// Alerts currently firing, each evaluated over its own sub-window.
    pub fn firing_alerts(&self) -> Vec<BurnRateAlert> {
        self.alerts()
            .into_iter()
            .filter(|a| a.is_firing(self.burn_rate(a.window_secs)))
            .collect()
    }

    /// Serializable state.
    pub fn snapshot(&self) -> ErrorBudgetSnapshot {
        let consumed = self.consumed();
        ErrorBudgetSnapshot {
            total: self.config.total,
            consumed,
            remaining: self.remaining(),
            remaining_percent: self.remaining_percent(),
            is_exhausted: self.is_exhausted(),
            burn_rate_1h: self.burn_rate(3_600),
            burn_rate_6h: self.burn_rate(21_600),
            exhaustion_action: self.config.exhaustion_action,
            firing_alerts: self.firing_alerts().into_iter().map(|a| a.name).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::clock::ManualClock;
    use std::sync::Arc;

    fn budget(total: f64, window_secs: u64) -> (ErrorBudget, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let config = ErrorBudgetConfig {
            total,
            window_secs,
            ..ErrorBudgetConfig::default()
        };
        let b = ErrorBudget::new(config, clock.clone()).unwrap();
        (b, clock)
    }

    #[test]
    fn empty_budget_is_untouched() {
        let (b, _) = budget(0.01, 86_400);
        assert_eq!(b.consumed(), 0.0);
        assert_eq!(b.remaining(), 0.01);
        assert_eq!(b.burn_rate(3_600), 0.0);
        assert!(!b.is_exhausted());
    }

    #[test]
    fn burn_rate_identity() {
        // Failure rate exactly equal to the budget: burn rate ~= 1.0.
        let (b, clock) = budget(0.01, 86_400);
        for i in 0..1_000 {
            b.record_event(i % 100 != 0); // 1% bad
            clock.advance_secs(1);
        }
        let rate = b.burn_rate(3_600);
        assert!((rate - 1.0).abs() < 0.1, "burn rate {rate} not ~1.0");
    }

    #[test]
    fn five_x_burn_reads_five() {
        let (b, clock) = budget(0.01, 86_400);
        for i in 0..1_000 {
            b.record_event(i % 20 != 0); // 5% bad
            clock.advance_secs(1);
        }
        let rate = b.burn_rate(3_600);
        assert!((rate - 5.0).abs() < 0.5, "burn rate {rate} not ~5.0");
    }

    #[test]
    fn sustained_budget_rate_exhausts_at_window_end() {
        let (b, clock) = budget(0.01, 1_000);
        // 1% failure over the full 1000s window, one event per second.
        for i in 0..=1_000 {
            b.record_event(i % 100 != 0);
            clock.advance_secs(1);
        }
        assert!(b.is_exhausted(), "consumed {} of {}", b.consumed(), b.total());
    }

    #[test]
    fn remaining_stays_within_bounds() {
        let (b, clock) = budget(0.05, 600);
        for i in 0..200 {
            b.record_event(i % 3 != 0);
            clock.advance_secs(5);
        }
        let remaining = b.remaining();
        assert!(remaining >= 0.0 && remaining <= b.total());
    }

    #[test]
    fn exhaustion_recovers_when_bad_events_age_out() {
        let (b, clock) = budget(0.01, 100);
        // Saturate: every event bad across the whole window.
        for _ in 0..100 {
            b.record_event(false);
            clock.advance_secs(1);
        }
        assert!(b.is_exhausted());

        // Stay exhausted while bad events remain in-window, then recover
        // after they age out and only good events remain.
        for _ in 0..50 {
            b.record_event(true);
            clock.advance_secs(1);
            assert!(b.is_exhausted());
        }
        for _ in 0..60 {
            b.record_event(true);
            clock.advance_secs(1);
        }
        assert!(!b.is_exhausted());
    }

    #[test]
    fn firing_alerts_use_their_own_windows() {
        let (b, clock) = budget(0.01, 86_400);
        // 10% failures: burn rate ~10 -> both fast alerts fire.
        for i in 0..600 {
            b.record_event(i % 10 != 0);
            clock.advance_secs(1);
        }
        let names: Vec<String> = b.firing_alerts().into_iter().map(|a| a.name).collect();
        assert!(names.contains(&"fast_burn_warn".to_string()));
        assert!(names.contains(&"fast_burn_critical".to_string()));
    }

    #[test]
    fn multi_window_rates_exposed() {
        let (b, clock) = budget(0.01, 2_592_000);
        for i in 0..100 {
            b.record_event(i % 10 != 0);
            clock.advance_secs(60);
        }
        let rates = b.burn_rates();
        assert_eq!(rates.len(), 4);
        assert_eq!(rates[0].0, 3_600);
        assert!(rates[0].1 > 0.0);
    }

    #[test]
    fn invalid_total_rejected() {
        let clock = ManualClock::shared();
        let config = ErrorBudgetConfig {
            total: 1.5,
            ..ErrorBudgetConfig::default()
        };
        assert!(ErrorBudget::new(config, clock).is_err());
    }
}
