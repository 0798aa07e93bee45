//! Cost guard: hierarchical budget checks with throttle/kill escalation.
//!
//! Check order is fixed: kill switch, per-task limit, agent daily limit,
//! org monthly budget, then allow (with a throttle advisory at high
//! utilization). Refusals are typed returns, never errors.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use aegis_core::bus::SignalBus;
use aegis_core::clock::SharedClock;
use aegis_core::signal::{Severity, Signal, SignalKind};

use crate::anomaly::{CostAnomalyDetector, DetectorConfig};

/// Closed set of reasons returned by [`CostGuard::check_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Allowed
    Ok,
    /// Agent kill switch is set
    Killed,
    /// Estimated cost exceeds the per-task limit
    PerTaskLimit,
    /// Would exceed the agent's daily limit
    DailyLimit,
    /// Would exceed the org monthly budget
    OrgBudget,
    /// Allowed, but the agent is throttled (advisory)
    ThrottledOnly,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Killed => "KILLED",
            Self::PerTaskLimit => "PER_TASK_LIMIT",
            Self::DailyLimit => "DAILY_LIMIT",
            Self::OrgBudget => "ORG_BUDGET",
            Self::ThrottledOnly => "THROTTLED_ONLY",
        };
        write!(f, "{s}")
    }
}

/// Escalation attached to a cost alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    /// Informational alert only
    Alert,
    /// Agent was throttled
    Throttle,
    /// Agent was killed
    Kill,
}

/// A single cost event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    /// Spending agent
    pub agent_id: String,
    /// Task that incurred the cost
    pub task_id: String,
    /// Cost in USD
    pub cost_usd: f64,
    /// Recording time
    pub timestamp: DateTime<Utc>,
    /// Optional cost breakdown (model, tool, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub breakdown: HashMap<String, f64>,
}

/// An alert raised while recording a cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAlert {
    /// Severity
    pub severity: Severity,
    /// Description
    pub message: String,
    /// Agent concerned
    pub agent_id: String,
    /// Observed value
    pub current_value: f64,
    /// Threshold crossed
    pub threshold: f64,
    /// Escalation taken
    pub action: BudgetAction,
    /// Raise time
    pub timestamp: DateTime<Utc>,
}

/// Guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostGuardConfig {
    /// Per-task cost ceiling (USD)
    pub per_task_limit: f64,
    /// Per-agent daily ceiling (USD)
    pub per_agent_daily_limit: f64,
    /// Org-wide monthly ceiling (USD)
    pub org_monthly_budget: f64,
    /// Utilization at which an agent is throttled
    pub throttle_threshold: f64,
    /// Utilization at which the kill switch trips
    pub kill_switch_threshold: f64,
    /// Daily-budget fractions that raise one alert each per day
    pub alert_thresholds: Vec<f64>,
    /// Run anomaly detectors on recorded costs
    pub anomaly_detection: bool,
}

impl Default for CostGuardConfig {
    fn default() -> Self {
        Self {
            per_task_limit: 2.0,
            per_agent_daily_limit: 100.0,
            org_monthly_budget: 5_000.0,
            throttle_threshold: 0.85,
            kill_switch_threshold: 0.95,
            alert_thresholds: vec![0.50, 0.75, 0.90, 0.95],
            anomaly_detection: true,
        }
    }
}

/// Read-only view of an agent budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBudgetSnapshot {
    /// Agent id
    pub agent_id: String,
    /// Daily ceiling
    pub daily_limit_usd: f64,
    /// Per-task ceiling
    pub per_task_limit_usd: f64,
    /// Spend so far today
    pub spent_today_usd: f64,
    /// Remaining today
    pub remaining_today_usd: f64,
    /// Utilization as a fraction of the daily limit
    pub utilization: f64,
    /// Tasks recorded today
    pub task_count_today: u32,
    /// Throttled flag
    pub throttled: bool,
    /// Killed flag
    pub killed: bool,
}

#[derive(Debug)]
struct AgentBudgetState {
    spent_today: f64,
    task_count_today: u32,
    throttled: bool,
    killed: bool,
    /// One flag per configured alert threshold, reset daily.
    crossed: Vec<bool>,
}

impl AgentBudgetState {
    fn new(threshold_count: usize) -> Self {
        Self {
            spent_today: 0.0,
            task_count_today: 0,
            throttled: false,
            killed: false,
            crossed: vec![false; threshold_count],
        }
    }

    fn reset(&mut self) {
        self.spent_today = 0.0;
        self.task_count_today = 0;
        self.throttled = false;
        self.killed = false;
        self.crossed.iter_mut().for_each(|c| *c = false);
    }
}

/// Bound on the retained recent-record buffer.
const RECENT_RECORDS_CAP: usize = 1_000;

#[derive(Debug)]
struct GuardState {
    budgets: HashMap<String, AgentBudgetState>,
    records: VecDeque<CostRecord>,
    org_spent_month: f64,
    current_day: NaiveDate,
    current_month: (i32, u32),
}

/// Cost tracking, budgeting, and anomaly detection for an agent fleet.
#[derive(Debug)]
pub struct CostGuard {
    config: CostGuardConfig,
    clock: SharedClock,
    bus: Arc<SignalBus>,
    state: Mutex<GuardState>,
    detector: Mutex<CostAnomalyDetector>,
    alerts: Mutex<Vec<CostAlert>>,
}

impl CostGuard {
    /// Create a guard.
    pub fn new(config: CostGuardConfig, bus: Arc<SignalBus>, clock: SharedClock) -> Self {
        let now = clock.now();
        use chrono::Datelike;
        Self {
            config,
            bus,
            state: Mutex::new(GuardState {
                budgets: HashMap::new(),
                records: VecDeque::new(),
                org_spent_month: 0.0,
                current_day: now.date_naive(),
                current_month: (now.year(), now.month()),
            }),
            detector: Mutex::new(CostAnomalyDetector::new(DetectorConfig::default())),
            alerts: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Create a guard with default limits.
    pub fn with_defaults(bus: Arc<SignalBus>, clock: SharedClock) -> Self {
        Self::new(CostGuardConfig::default(), bus, clock)
    }

    /// Decide whether a task may proceed. Returns `(allowed, reason)`;
    /// `ThrottledOnly` is allowed-with-advisory.
    pub fn check_task(&self, agent_id: &str, estimated_cost: f64) -> (bool, ReasonCode) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        self.roll_periods(&mut state, now);

        let threshold_count = self.config.alert_thresholds.len();
        let org_spent = state.org_spent_month;
        let budget = state
            .budgets
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentBudgetState::new(threshold_count));

        if budget.killed {
            return (false, ReasonCode::Killed);
        }
        if estimated_cost > self.config.per_task_limit {
            return (false, ReasonCode::PerTaskLimit);
        }
        if budget.spent_today + estimated_cost > self.config.per_agent_daily_limit {
            return (false, ReasonCode::DailyLimit);
        }
        if org_spent + estimated_cost > self.config.org_monthly_budget {
            return (false, ReasonCode::OrgBudget);
        }

        let utilization =
            (budget.spent_today + estimated_cost) / self.config.per_agent_daily_limit.max(f64::MIN_POSITIVE);
        if utilization >= self.config.throttle_threshold {
            budget.throttled = true;
            return (true, ReasonCode::ThrottledOnly);
        }
        (true, ReasonCode::Ok)
    }

    /// Record a task cost, update budgets, and return any alerts raised.
    pub fn record_cost(
        &self,
        agent_id: &str,
        task_id: &str,
        cost_usd: f64,
        breakdown: Option<HashMap<String, f64>>,
    ) -> Vec<CostAlert> {
        let now = self.clock.now();
        let mut raised = Vec::new();

        {
            let mut state = self.state.lock().unwrap();
            self.roll_periods(&mut state, now);

            let threshold_count = self.config.alert_thresholds.len();
            state.org_spent_month += cost_usd;
            state.records.push_back(CostRecord {
                agent_id: agent_id.to_string(),
                task_id: task_id.to_string(),
                cost_usd,
                timestamp: now,
                breakdown: breakdown.unwrap_or_default(),
            });
            while state.records.len() > RECENT_RECORDS_CAP {
                state.records.pop_front();
            }
            let budget = state
                .budgets
                .entry(agent_id.to_string())
                .or_insert_with(|| AgentBudgetState::new(threshold_count));

            budget.spent_today += cost_usd;
            budget.task_count_today += 1;
            let utilization = budget.spent_today / self.config.per_agent_daily_limit.max(f64::MIN_POSITIVE);

            debug!(agent = agent_id, task = task_id, cost_usd, utilization, "cost recorded");
            metrics::counter!("aegis_cost_records_total").increment(1);
            metrics::gauge!("aegis_agent_daily_utilization", "agent" => agent_id.to_string())
                .set(utilization);

            if cost_usd > self.config.per_task_limit {
                raised.push(CostAlert {
                    severity: Severity::Warn,
                    message: format!(
                        "task cost ${cost_usd:.2} exceeded per-task limit ${:.2}",
                        self.config.per_task_limit
                    ),
                    agent_id: agent_id.to_string(),
                    current_value: cost_usd,
                    threshold: self.config.per_task_limit,
                    action: BudgetAction::Alert,
                    timestamp: now,
                });
            }

            // Daily threshold alerts fire once each per daily window.
            for (idx, threshold) in self.config.alert_thresholds.iter().enumerate() {
                if utilization >= *threshold && !budget.crossed[idx] {
                    budget.crossed[idx] = true;
                    raised.push(CostAlert {
                        severity: if *threshold >= 0.90 {
                            Severity::Critical
                        } else {
                            Severity::Warn
                        },
                        message: format!(
                            "agent {agent_id} at {:.0}% of daily budget",
                            utilization * 100.0
                        ),
                        agent_id: agent_id.to_string(),
                        current_value: budget.spent_today,
                        threshold: self.config.per_agent_daily_limit * threshold,
                        action: BudgetAction::Alert,
                        timestamp: now,
                    });
                }
            }

            if !budget.killed && utilization >= self.config.kill_switch_threshold {
                budget.killed = true;
                warn!(agent = agent_id, utilization, "kill switch tripped");
                metrics::counter!("aegis_agents_killed_total").increment(1);
                raised.push(CostAlert {
                    severity: Severity::Critical,
                    message: format!(
                        "agent {agent_id} KILLED at {:.0}% of daily budget",
                        utilization * 100.0
                    ),
                    agent_id: agent_id.to_string(),
                    current_value: budget.spent_today,
                    threshold: self.config.per_agent_daily_limit * self.config.kill_switch_threshold,
                    action: BudgetAction::Kill,
                    timestamp: now,
                });
                self.bus.publish(
                    Signal::new(
                        SignalKind::CostAnomaly,
                        agent_id,
                        Severity::Critical,
                        format!("cost kill switch tripped for agent {agent_id}"),
                        now,
                    )
                    .with_dedup_key(format!("{agent_id}:cost:kill"))
                    .with_metadata("spent_today_usd", serde_json::json!(budget.spent_today)),
                );
            } else if !budget.throttled && utilization >= self.config.throttle_threshold {
                budget.throttled = true;
                info!(agent = agent_id, utilization, "agent throttled");
                raised.push(CostAlert {
                    severity: Severity::Warn,
                    message: format!(
                        "agent {agent_id} THROTTLED at {:.0}% of daily budget",
                        utilization * 100.0
                    ),
                    agent_id: agent_id.to_string(),
                    current_value: budget.spent_today,
                    threshold: self.config.per_agent_daily_limit * self.config.throttle_threshold,
                    action: BudgetAction::Throttle,
                    timestamp: now,
                });
            }
        }

        if self.config.anomaly_detection {
            let results = self.detector.lock().unwrap().ingest(cost_usd);
            for anomaly in results {
                raised.push(CostAlert {
                    severity: anomaly.severity,
                    message: anomaly.message.clone(),
                    agent_id: agent_id.to_string(),
                    current_value: cost_usd,
                    threshold: anomaly.expected_high,
                    action: BudgetAction::Alert,
                    timestamp: now,
                });
                if anomaly.severity >= Severity::Warn {
                    self.bus.publish(
                        Signal::new(
                            SignalKind::CostAnomaly,
                            agent_id,
                            anomaly.severity,
                            anomaly.message,
                            now,
                        )
                        .with_dedup_key(format!("{agent_id}:cost:anomaly"))
                        .with_metadata("cost_usd", serde_json::json!(cost_usd))
                        .with_metadata("score", serde_json::json!(anomaly.score)),
                    );
                }
            }
        }

        self.alerts.lock().unwrap().extend(raised.clone());
        raised
    }

    /// Copy of the bounded recent cost-record buffer.
    pub fn recent_records(&self) -> Vec<CostRecord> {
        self.state.lock().unwrap().records.iter().cloned().collect()
    }

    /// Reset daily spend, flags, and threshold crossings, for one agent or
    /// the whole fleet.
    pub fn reset_daily(&self, agent_id: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        match agent_id {
            Some(id) => {
                if let Some(budget) = state.budgets.get_mut(id) {
                    budget.reset();
                }
            }
            None => {
                for budget in state.budgets.values_mut() {
                    budget.reset();
                }
            }
        }
    }

    /// Org-wide spend this month.
    pub fn org_spent_month(&self) -> f64 {
        self.state.lock().unwrap().org_spent_month
    }

    /// Org-wide remaining budget this month.
    pub fn org_remaining_month(&self) -> f64 {
        (self.config.org_monthly_budget - self.org_spent_month()).max(0.0)
    }

    /// Snapshot of one agent's budget.
    pub fn budget(&self, agent_id: &str) -> Option<AgentBudgetSnapshot> {
        let state = self.state.lock().unwrap();
        state.budgets.get(agent_id).map(|b| AgentBudgetSnapshot {
            agent_id: agent_id.to_string(),
            daily_limit_usd: self.config.per_agent_daily_limit,
            per_task_limit_usd: self.config.per_task_limit,
            spent_today_usd: b.spent_today,
            remaining_today_usd: (self.config.per_agent_daily_limit - b.spent_today).max(0.0),
            utilization: b.spent_today / self.config.per_agent_daily_limit.max(f64::MIN_POSITIVE),
            task_count_today: b.task_count_today,
            throttled: b.throttled,
            killed: b.killed,
        })
    }

    /// All alerts raised so far.
    pub fn alerts(&self) -> Vec<CostAlert> {
        self.alerts.lock().unwrap().clone()
    }

    /// Zero `spent_today` across the fleet when the day rolls over, and the
    /// monthly counter when the month does.
    fn roll_periods(&self, state: &mut GuardState, now: DateTime<Utc>) {
        use chrono::Datelike;
        let today = now.date_naive();
        if today != state.current_day {
            debug!(%today, "daily budget reset");
            state.current_day = today;
            for budget in state.budgets.values_mut() {
                budget.reset();
            }
        }
        let month = (now.year(), now.month());
        if month != state.current_month {
            state.current_month = month;
            state.org_spent_month = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::clock::ManualClock;

    fn guard(daily: f64) -> (CostGuard, Arc<SignalBus>, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let bus = Arc::new(SignalBus::default());
        let config = CostGuardConfig {
            per_task_limit: 60.0,
            per_agent_daily_limit: daily,
            org_monthly_budget: 10_000.0,
            anomaly_detection: false,
            ..CostGuardConfig::default()
        };
        let g = CostGuard::new(config, bus.clone(), clock.clone());
        (g, bus, clock)
    }

    #[test]
    fn kill_switch_scenario() {
        let (g, bus, _) = guard(100.0);

        g.record_cost("agent-a", "t1", 50.0, None);
        g.record_cost("agent-a", "t2", 30.0, None);
        g.record_cost("agent-a", "t3", 14.0, None);

        let budget = g.budget("agent-a").unwrap();
        assert!((budget.spent_today_usd - 94.0).abs() < 1e-9);
        assert!(!budget.killed);
        assert!(budget.throttled);
        assert!(bus.is_empty());

        // One more record pushes utilization to 96% -> killed.
        let alerts = g.record_cost("agent-a", "t4", 2.0, None);
        assert!(alerts.iter().any(|a| a.action == BudgetAction::Kill));
        assert!(g.budget("agent-a").unwrap().killed);

        let signals = bus.drain();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::CostAnomaly);

        let (allowed, reason) = g.check_task("agent-a", 0.5);
        assert!(!allowed);
        assert_eq!(reason, ReasonCode::Killed);
        assert_eq!(reason.to_string(), "KILLED");
    }

    #[test]
    fn kill_flag_set_exactly_once() {
        let (g, bus, _) = guard(100.0);
        g.record_cost("agent-a", "t1", 96.0, None);
        let first_killed = g.budget("agent-a").unwrap().killed;
        assert!(first_killed);
        assert_eq!(bus.drain().len(), 1);

        // Further records raise no second kill alert or signal.
        let alerts = g.record_cost("agent-a", "t2", 1.0, None);
        assert!(alerts.iter().all(|a| a.action != BudgetAction::Kill));
        assert!(bus.is_empty());
    }

    #[test]
    fn check_order_per_task_before_daily() {
        let (g, _, _) = guard(100.0);
        // Estimated cost above the per-task limit refuses even though the
        // daily budget could absorb it.
        let (allowed, reason) = g.check_task("agent-a", 61.0);
        assert!(!allowed);
        assert_eq!(reason, ReasonCode::PerTaskLimit);
    }

    #[test]
    fn daily_limit_refusal() {
        let (g, _, _) = guard(100.0);
        g.record_cost("agent-a", "t1", 80.0, None);
        let (allowed, reason) = g.check_task("agent-a", 25.0);
        assert!(!allowed);
        assert_eq!(reason, ReasonCode::DailyLimit);
    }

    #[test]
    fn org_budget_refusal() {
        let clock = ManualClock::shared();
        let bus = Arc::new(SignalBus::default());
        let config = CostGuardConfig {
            per_task_limit: 100.0,
            per_agent_daily_limit: 100.0,
            org_monthly_budget: 150.0,
            anomaly_detection: false,
            ..CostGuardConfig::default()
        };
        let g = CostGuard::new(config, bus, clock);
        g.record_cost("agent-a", "t1", 80.0, None);
        g.record_cost("agent-b", "t2", 60.0, None);

        // agent-c is fresh but the org pool is nearly gone.
        let (allowed, reason) = g.check_task("agent-c", 20.0);
        assert!(!allowed);
        assert_eq!(reason, ReasonCode::OrgBudget);
    }

    #[test]
    fn throttled_is_advisory() {
        let (g, _, _) = guard(100.0);
        g.record_cost("agent-a", "t1", 86.0, None);
        let (allowed, reason) = g.check_task("agent-a", 1.0);
        assert!(allowed);
        assert_eq!(reason, ReasonCode::ThrottledOnly);
    }

    #[test]
    fn threshold_alerts_fire_once_each() {
        let (g, _, _) = guard(100.0);
        let alerts = g.record_cost("agent-a", "t1", 55.0, None);
        assert_eq!(alerts.len(), 1); // 50% crossing

        let alerts = g.record_cost("agent-a", "t2", 1.0, None);
        assert!(alerts.is_empty()); // still in the 50% band

        let alerts = g.record_cost("agent-a", "t3", 20.0, None);
        assert_eq!(alerts.len(), 1); // 75% crossing

        let records = g.recent_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].task_id, "t1");
    }

    #[test]
    fn daily_reset_clears_flags() {
        let (g, _, clock) = guard(100.0);
        g.record_cost("agent-a", "t1", 96.0, None);
        assert!(g.budget("agent-a").unwrap().killed);

        g.reset_daily(Some("agent-a"));
        let budget = g.budget("agent-a").unwrap();
        assert!(!budget.killed);
        assert!(!budget.throttled);
        assert_eq!(budget.spent_today_usd, 0.0);

        // And the automatic roll at day boundary.
        g.record_cost("agent-a", "t2", 96.0, None);
        assert!(g.budget("agent-a").unwrap().killed);
        clock.advance_secs(86_400 + 60);
        let (allowed, _) = g.check_task("agent-a", 1.0);
        assert!(allowed);
    }

    #[test]
    fn anomaly_alerts_are_advisory() {
        let clock = ManualClock::shared();
        let bus = Arc::new(SignalBus::default());
        let config = CostGuardConfig {
            per_task_limit: 1_000.0,
            per_agent_daily_limit: 100_000.0,
            org_monthly_budget: 1_000_000.0,
            anomaly_detection: true,
            ..CostGuardConfig::default()
        };
        let g = CostGuard::new(config, bus, clock);
        for i in 0..40 {
            g.record_cost("agent-a", &format!("t{i}"), 0.10 + (i % 4) as f64 * 0.01, None);
        }
        let alerts = g.record_cost("agent-a", "spike", 50.0, None);
        assert!(alerts.iter().any(|a| a.action == BudgetAction::Alert));

        // Anomalies never block the next task.
        let (allowed, _) = g.check_task("agent-a", 0.5);
        assert!(allowed);
    }
}
