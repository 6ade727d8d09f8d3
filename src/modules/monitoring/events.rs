//! Monitoring events and handler dispatch.
//!
//! Events are dispatched after the monitor's state lock is released, so
//! handlers may call back into the monitor.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Alert, HealthStatus, MetricsSnapshot, TaskStatus, WorkerRecord};

#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub duration_ms: f64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HealthChangeEvent {
    pub previous: HealthStatus,
    pub current: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum MonitoringEvent {
    MetricsUpdated(MetricsSnapshot),
    WorkerUpdated(WorkerRecord),
    TaskExecuted(TaskEvent),
    HealthChanged(HealthChangeEvent),
    AlertCreated(Alert),
    AlertAcknowledged(Alert),
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &MonitoringEvent);
}

/// Broadcasts events to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, event: &MonitoringEvent) {
        for handler in &self.handlers {
            handler.handle(event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &MonitoringEvent) {
        match event {
            MonitoringEvent::MetricsUpdated(snapshot) => {
                log::debug!(
                    "metrics: total={} success={:.2}% health={}",
                    snapshot.total_tasks,
                    snapshot.success_rate * 100.0,
                    snapshot.health
                );
            }
            MonitoringEvent::WorkerUpdated(worker) => {
                log::debug!("worker {} ({}) is {}", worker.id, worker.name, worker.status);
            }
            MonitoringEvent::TaskExecuted(task) => match &task.error {
                Some(error) => log::warn!(
                    "task {} ({}) {} after {:.0}ms: {error}",
                    task.task_id,
                    task.task_type,
                    task.status,
                    task.duration_ms
                ),
                None => log::debug!(
                    "task {} ({}) {} in {:.0}ms",
                    task.task_id,
                    task.task_type,
                    task.status,
                    task.duration_ms
                ),
            },
            MonitoringEvent::HealthChanged(change) => {
                log::info!("system health {} -> {}", change.previous, change.current);
            }
            MonitoringEvent::AlertCreated(alert) => {
                log::warn!("[{}] alert {}: {}", alert.severity, alert.id, alert.message);
            }
            MonitoringEvent::AlertAcknowledged(alert) => {
                log::info!("alert {} acknowledged", alert.id);
            }
        }
    }
}
