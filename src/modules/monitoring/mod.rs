//! Monitoring and alerting service.
//!
//! Aggregates task outcomes into system metrics, keeps a bounded history of
//! snapshots, tracks worker records, derives a health state and raises
//! alerts. Every method is infallible: monitoring never fails into the
//! caller's control flow.

mod alerts;
mod events;
mod report;

pub use alerts::{Alert, AlertSeverity};
pub use events::{EventDispatcher, EventHandler, HealthChangeEvent, LoggingHandler, MonitoringEvent, TaskEvent};
pub use report::{AdvancedStats, PerformanceReport, Prediction, Recommendation, TREND_WINDOW, Trend, advanced_stats};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use alerts::AlertLog;

const CRITICAL_BELOW: f64 = 0.5;
const WARNING_BELOW: f64 = 0.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Health for a success rate in `[0, 1]`.
    pub fn from_success_rate(rate: f64) -> Self {
        if rate < CRITICAL_BELOW {
            HealthStatus::Critical
        } else if rate < WARNING_BELOW {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Success,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Busy,
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Busy => "BUSY",
            WorkerStatus::Offline => "OFFLINE",
        })
    }
}

/// Point-in-time system metrics. `success_rate` is a fraction in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_tasks: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub running: u64,
    pub avg_exec_time_ms: f64,
    pub success_rate: f64,
    pub tasks_per_hour: f64,
    pub errors_per_hour: f64,
    pub health: HealthStatus,
    pub last_update: DateTime<Utc>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            total_tasks: 0,
            completed: 0,
            failed: 0,
            pending: 0,
            running: 0,
            avg_exec_time_ms: 0.0,
            success_rate: 0.0,
            tasks_per_hour: 0.0,
            errors_per_hour: 0.0,
            health: HealthStatus::Healthy,
            last_update: Utc::now(),
        }
    }
}

/// Partial update for the externally-owned system counters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemMetricsUpdate {
    pub pending: Option<u64>,
    pub running: Option<u64>,
    pub tasks_per_hour: Option<f64>,
    pub errors_per_hour: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub completed: u64,
    pub failed: u64,
    pub avg_exec_time_ms: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl WorkerRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            status: WorkerStatus::Idle,
            completed: 0,
            failed: 0,
            avg_exec_time_ms: 0.0,
            last_heartbeat: Utc::now(),
            uptime_secs: 0,
        }
    }

    fn merge(&mut self, update: WorkerUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(completed) = update.completed {
            self.completed = completed;
        }
        if let Some(failed) = update.failed {
            self.failed = failed;
        }
        if let Some(avg) = update.avg_exec_time_ms {
            self.avg_exec_time_ms = avg;
        }
        if let Some(heartbeat) = update.last_heartbeat {
            self.last_heartbeat = heartbeat;
        }
        if let Some(uptime) = update.uptime_secs {
            self.uptime_secs = uptime;
        }
    }
}

/// Partial worker update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerUpdate {
    pub name: Option<String>,
    pub status: Option<WorkerStatus>,
    pub completed: Option<u64>,
    pub failed: Option<u64>,
    pub avg_exec_time_ms: Option<f64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub history_capacity: usize,
    pub alert_capacity: usize,
    pub alert_retention_hours: i64,
    pub offline_worker_retention_minutes: i64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            alert_capacity: 100,
            alert_retention_hours: 7 * 24,
            offline_worker_retention_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub alerts_removed: usize,
    pub workers_removed: usize,
}

#[derive(Debug)]
struct MonitorState {
    metrics: MetricsSnapshot,
    history: VecDeque<MetricsSnapshot>,
    workers: HashMap<String, WorkerRecord>,
    alerts: AlertLog,
}

/// Shared handle to the monitoring state. Clones observe the same data.
#[derive(Debug, Clone)]
pub struct MonitoringService {
    config: MonitoringConfig,
    state: Arc<Mutex<MonitorState>>,
    events: EventDispatcher,
}

impl MonitoringService {
    pub fn new(config: MonitoringConfig) -> Self {
        let state = MonitorState {
            metrics: MetricsSnapshot::default(),
            history: VecDeque::with_capacity(config.history_capacity.min(1024)),
            workers: HashMap::new(),
            alerts: AlertLog::new(config.alert_capacity),
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            events: EventDispatcher::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events.register_handler(handler);
        self
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// Records one finished task and re-evaluates health.
    pub fn log_task_execution(
        &self,
        task_id: &str,
        task_type: &str,
        status: TaskStatus,
        duration_ms: f64,
        error: Option<&str>,
    ) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let metrics = &mut state.metrics;
            metrics.total_tasks += 1;
            match status {
                TaskStatus::Success => metrics.completed += 1,
                TaskStatus::Failed => metrics.failed += 1,
            }

            let n = (metrics.completed + metrics.failed) as f64;
            metrics.avg_exec_time_ms = (metrics.avg_exec_time_ms * (n - 1.0) + duration_ms) / n;
            metrics.success_rate = metrics.completed as f64 / metrics.total_tasks as f64;

            if status == TaskStatus::Failed {
                let message = format!(
                    "Task {task_id} ({task_type}) failed: {}",
                    error.unwrap_or("unknown error")
                );
                let metadata = json!({ "taskId": task_id, "taskType": task_type, "error": error });
                self.push_alert(&mut state, AlertSeverity::Error, message, metadata, &mut events);
            }

            self.commit_metrics(&mut state, &mut events);
        }

        events.push(MonitoringEvent::TaskExecuted(TaskEvent {
            task_id: task_id.to_string(),
            task_type: task_type.to_string(),
            status,
            duration_ms,
            error: error.map(str::to_string),
            timestamp: Utc::now(),
        }));
        self.dispatch(events);
    }

    /// Merges externally-owned counters, re-evaluates health and appends a snapshot.
    pub fn update_system_metrics(&self, update: SystemMetricsUpdate) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let metrics = &mut state.metrics;
            if let Some(pending) = update.pending {
                metrics.pending = pending;
            }
            if let Some(running) = update.running {
                metrics.running = running;
            }
            if let Some(tph) = update.tasks_per_hour {
                metrics.tasks_per_hour = tph;
            }
            if let Some(eph) = update.errors_per_hour {
                metrics.errors_per_hour = eph;
            }
            self.commit_metrics(&mut state, &mut events);
        }
        self.dispatch(events);
    }

    /// Upserts a worker record with per-field last-write-wins merge.
    pub fn update_worker_metrics(&self, worker_id: &str, update: WorkerUpdate) {
        let record = {
            let mut state = self.lock();
            let record = state
                .workers
                .entry(worker_id.to_string())
                .or_insert_with(|| WorkerRecord::new(worker_id));
            record.merge(update);
            record.clone()
        };
        self.dispatch(vec![MonitoringEvent::WorkerUpdated(record)]);
    }

    pub fn create_alert(&self, severity: AlertSeverity, message: impl Into<String>, metadata: Value) -> Alert {
        let mut events = Vec::new();
        let alert = {
            let mut state = self.lock();
            self.push_alert(&mut state, severity, message.into(), metadata, &mut events)
        };
        self.dispatch(events);
        alert
    }

    /// Marks an alert acknowledged. Returns false for unknown ids.
    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        let acknowledged = self.lock().alerts.acknowledge(alert_id);
        match acknowledged {
            Some(alert) => {
                self.dispatch(vec![MonitoringEvent::AlertAcknowledged(alert)]);
                true
            }
            None => false,
        }
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.lock().metrics.clone()
    }

    pub fn get_worker_metrics(&self) -> Vec<WorkerRecord> {
        let mut workers: Vec<WorkerRecord> = self.lock().workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub fn get_alerts(&self, include_acknowledged: bool) -> Vec<Alert> {
        self.lock().alerts.list(include_acknowledged)
    }

    /// The most recent `limit` snapshots, oldest first.
    pub fn get_metrics_history(&self, limit: usize) -> Vec<MetricsSnapshot> {
        let state = self.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn get_advanced_stats(&self) -> AdvancedStats {
        advanced_stats(&self.get_metrics_history(TREND_WINDOW))
    }

    pub fn generate_performance_report(&self) -> PerformanceReport {
        let stats = self.get_advanced_stats();
        let workers = self.get_worker_metrics();
        let state = self.lock();
        PerformanceReport::build(&state.metrics, &workers, &stats, state.alerts.open_count())
    }

    pub fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(Utc::now())
    }

    /// Evicts stale alerts and long-offline workers relative to `now`.
    ///
    /// A retention that does not fit a timestamp disables that eviction.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let alert_cutoff = retention_cutoff(
            now,
            chrono::Duration::try_hours(self.config.alert_retention_hours),
        );
        let worker_cutoff = retention_cutoff(
            now,
            chrono::Duration::try_minutes(self.config.offline_worker_retention_minutes),
        );

        let mut state = self.lock();
        let alerts_removed = alert_cutoff.map_or(0, |cutoff| state.alerts.prune_before(cutoff));

        let before = state.workers.len();
        if let Some(cutoff) = worker_cutoff {
            state.workers.retain(|_, worker| {
                !(worker.status == WorkerStatus::Offline && worker.last_heartbeat < cutoff)
            });
        }
        let workers_removed = before - state.workers.len();

        if alerts_removed + workers_removed > 0 {
            log::debug!(
                "monitoring cleanup removed {alerts_removed} alerts and {workers_removed} workers"
            );
        }
        CleanupReport {
            alerts_removed,
            workers_removed,
        }
    }

    fn commit_metrics(&self, state: &mut MonitorState, events: &mut Vec<MonitoringEvent>) {
        self.check_health(state, events);
        state.metrics.last_update = Utc::now();

        while state.history.len() >= self.config.history_capacity.max(1) {
            state.history.pop_front();
        }
        state.history.push_back(state.metrics.clone());
        events.push(MonitoringEvent::MetricsUpdated(state.metrics.clone()));
    }

    fn check_health(&self, state: &mut MonitorState, events: &mut Vec<MonitoringEvent>) {
        let previous = state.metrics.health;
        let current = if state.metrics.total_tasks == 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::from_success_rate(state.metrics.success_rate)
        };
        if previous == current {
            return;
        }
        state.metrics.health = current;

        let severity = match current {
            HealthStatus::Critical => AlertSeverity::Critical,
            HealthStatus::Healthy => AlertSeverity::Info,
            HealthStatus::Warning => AlertSeverity::Warning,
        };
        let message = format!("System health changed from {previous} to {current}");
        let metadata = json!({ "previousHealth": previous, "currentHealth": current });
        self.push_alert(state, severity, message, metadata, events);

        events.push(MonitoringEvent::HealthChanged(HealthChangeEvent {
            previous,
            current,
            timestamp: Utc::now(),
        }));
    }

    fn push_alert(
        &self,
        state: &mut MonitorState,
        severity: AlertSeverity,
        message: String,
        metadata: Value,
        events: &mut Vec<MonitoringEvent>,
    ) -> Alert {
        let alert = Alert::new(severity, message, metadata);
        state.alerts.push(alert.clone());
        events.push(MonitoringEvent::AlertCreated(alert.clone()));
        alert
    }

    fn dispatch(&self, events: Vec<MonitoringEvent>) {
        if self.events.is_empty() {
            return;
        }
        for event in &events {
            self.events.dispatch(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn retention_cutoff(
    now: DateTime<Utc>,
    retention: Option<chrono::Duration>,
) -> Option<DateTime<Utc>> {
    let retention = retention?;
    if retention <= chrono::Duration::zero() {
        log::warn!("ignoring non-positive monitoring retention {retention}");
        return None;
    }
    now.checked_sub_signed(retention)
}

impl Default for MonitoringService {
    fn default() -> Self {
        Self::new(MonitoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health_alerts(monitor: &MonitoringService) -> Vec<Alert> {
        monitor
            .get_alerts(true)
            .into_iter()
            .filter(|alert| alert.message.starts_with("System health"))
            .collect()
    }

    #[test]
    fn running_average_and_success_rate() {
        let monitor = MonitoringService::default();
        monitor.log_task_execution("t1", "sync", TaskStatus::Success, 100.0, None);
        monitor.log_task_execution("t2", "sync", TaskStatus::Success, 300.0, None);
        monitor.log_task_execution("t3", "sync", TaskStatus::Failed, 200.0, Some("boom"));

        let metrics = monitor.get_metrics();
        assert_eq!(metrics.total_tasks, 3);
        assert_eq!(metrics.completed, 2);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.avg_exec_time_ms - 200.0).abs() < 1e-9);
        assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.health, HealthStatus::Warning);

        let errors: Vec<_> = monitor
            .get_alerts(false)
            .into_iter()
            .filter(|a| a.severity == AlertSeverity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].metadata["taskId"], "t3");
        assert_eq!(monitor.history_len(), 3);
    }

    #[test]
    fn crossing_eighty_percent_down_then_up_raises_two_alerts() {
        let monitor = MonitoringService::default();
        for i in 0..8 {
            monitor.log_task_execution(&format!("ok-{i}"), "sync", TaskStatus::Success, 10.0, None);
        }
        assert!(health_alerts(&monitor).is_empty());

        // 8/10 stays healthy, 8/11 drops below 80%.
        monitor.log_task_execution("f1", "sync", TaskStatus::Failed, 10.0, Some("x"));
        monitor.log_task_execution("f2", "sync", TaskStatus::Failed, 10.0, Some("x"));
        assert_eq!(monitor.get_metrics().health, HealthStatus::Healthy);
        monitor.log_task_execution("f3", "sync", TaskStatus::Failed, 10.0, Some("x"));
        assert_eq!(monitor.get_metrics().health, HealthStatus::Warning);

        // 12/15 = 80% is healthy again.
        for i in 0..4 {
            monitor.log_task_execution(&format!("r-{i}"), "sync", TaskStatus::Success, 10.0, None);
        }
        assert_eq!(monitor.get_metrics().health, HealthStatus::Healthy);

        let alerts = health_alerts(&monitor);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].metadata["previousHealth"], "HEALTHY");
        assert_eq!(alerts[1].severity, AlertSeverity::Info);
        assert_eq!(alerts[1].metadata["currentHealth"], "HEALTHY");
    }

    #[test]
    fn entering_critical_raises_critical_alert() {
        let monitor = MonitoringService::default();
        monitor.log_task_execution("f1", "sync", TaskStatus::Failed, 10.0, Some("x"));
        let alerts = health_alerts(&monitor);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn history_is_bounded_fifo() {
        let monitor = MonitoringService::default();
        for i in 0..1500u64 {
            monitor.update_system_metrics(SystemMetricsUpdate {
                pending: Some(i),
                ..Default::default()
            });
        }
        assert_eq!(monitor.history_len(), 1000);

        let history = monitor.get_metrics_history(1000);
        assert_eq!(history.first().map(|s| s.pending), Some(500));
        assert_eq!(history.last().map(|s| s.pending), Some(1499));

        let recent = monitor.get_metrics_history(3);
        assert_eq!(
            recent.iter().map(|s| s.pending).collect::<Vec<_>>(),
            vec![1497, 1498, 1499]
        );
    }

    #[test]
    fn worker_updates_merge_fields() {
        let monitor = MonitoringService::default();
        monitor.update_worker_metrics(
            "w1",
            WorkerUpdate {
                name: Some("worker one".into()),
                completed: Some(3),
                ..Default::default()
            },
        );
        monitor.update_worker_metrics(
            "w1",
            WorkerUpdate {
                status: Some(WorkerStatus::Busy),
                ..Default::default()
            },
        );

        let workers = monitor.get_worker_metrics();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name, "worker one");
        assert_eq!(workers[0].completed, 3);
        assert_eq!(workers[0].status, WorkerStatus::Busy);
        assert_eq!(monitor.history_len(), 0);
    }

    #[test]
    fn cleanup_evicts_old_alerts_and_offline_workers() {
        let monitor = MonitoringService::default();
        monitor.create_alert(AlertSeverity::Info, "old news", Value::Null);
        monitor.update_worker_metrics(
            "gone",
            WorkerUpdate {
                status: Some(WorkerStatus::Offline),
                ..Default::default()
            },
        );
        monitor.update_worker_metrics("alive", WorkerUpdate::default());

        let report = monitor.cleanup_at(Utc::now() + chrono::Duration::days(8));
        assert_eq!(report.alerts_removed, 1);
        assert_eq!(report.workers_removed, 1);
        assert!(monitor.get_alerts(true).is_empty());
        assert_eq!(monitor.get_worker_metrics()[0].id, "alive");

        assert_eq!(monitor.cleanup(), CleanupReport::default());
    }

    #[test]
    fn out_of_range_retention_skips_eviction() {
        let monitor = MonitoringService::new(MonitoringConfig {
            alert_retention_hours: i64::MAX,
            offline_worker_retention_minutes: -5,
            ..Default::default()
        });
        monitor.create_alert(AlertSeverity::Info, "kept", Value::Null);
        monitor.update_worker_metrics(
            "gone",
            WorkerUpdate {
                status: Some(WorkerStatus::Offline),
                ..Default::default()
            },
        );

        let report = monitor.cleanup_at(Utc::now() + chrono::Duration::days(365));
        assert_eq!(report, CleanupReport::default());
        assert_eq!(monitor.get_alerts(true).len(), 1);
        assert_eq!(monitor.get_worker_metrics().len(), 1);
    }

    #[test]
    fn acknowledge_hides_alert() {
        let monitor = MonitoringService::default();
        let alert = monitor.create_alert(AlertSeverity::Warning, "check me", Value::Null);
        assert!(monitor.acknowledge_alert(&alert.id));
        assert!(!monitor.acknowledge_alert("alert-unknown"));
        assert!(monitor.get_alerts(false).is_empty());
        assert_eq!(monitor.get_alerts(true).len(), 1);
    }

    #[test]
    fn report_reflects_state() {
        let monitor = MonitoringService::default();
        monitor.log_task_execution("t1", "sync", TaskStatus::Failed, 40_000.0, Some("slow"));
        monitor.update_system_metrics(SystemMetricsUpdate {
            pending: Some(150),
            ..Default::default()
        });

        let report = monitor.generate_performance_report();
        assert_eq!(report.system_health, HealthStatus::Critical);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.pending_tasks, 150);
        assert!(report.recommendations.contains(&Recommendation::SlowExecution));
        assert!(report.recommendations.contains(&Recommendation::PendingBacklog));
        assert_eq!(report.alerts, 2);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["systemHealth"], "CRITICAL");
    }

    #[test]
    fn handlers_receive_events_after_unlock() {
        struct Reentrant(Mutex<Option<MonitoringService>>, Mutex<usize>);

        impl EventHandler for Reentrant {
            fn handle(&self, _event: &MonitoringEvent) {
                if let Some(monitor) = self.0.lock().unwrap().as_ref() {
                    let _ = monitor.get_metrics();
                }
                *self.1.lock().unwrap() += 1;
            }
        }

        let handler = Arc::new(Reentrant(Mutex::new(None), Mutex::new(0)));
        let monitor = MonitoringService::default().with_handler(handler.clone());
        *handler.0.lock().unwrap() = Some(monitor.clone());

        monitor.log_task_execution("t1", "sync", TaskStatus::Success, 5.0, None);
        // metrics updated + task executed
        assert_eq!(*handler.1.lock().unwrap(), 2);
        *handler.0.lock().unwrap() = None;
    }
}
