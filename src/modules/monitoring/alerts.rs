//! Alert records and the bounded alert log.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub metadata: Value,
}

impl Alert {
    pub fn new(severity: AlertSeverity, message: impl Into<String>, metadata: Value) -> Self {
        Self {
            id: format!("alert-{}", Uuid::new_v4()),
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            acknowledged: false,
            metadata,
        }
    }
}

/// Append-only alert list holding at most `capacity` entries.
#[derive(Debug, Clone)]
pub(crate) struct AlertLog {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity.min(128)),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, alert: Alert) {
        while self.alerts.len() >= self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    pub(crate) fn acknowledge(&mut self, id: &str) -> Option<Alert> {
        let alert = self.alerts.iter_mut().find(|alert| alert.id == id)?;
        alert.acknowledged = true;
        Some(alert.clone())
    }

    pub(crate) fn list(&self, include_acknowledged: bool) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|alert| include_acknowledged || !alert.acknowledged)
            .cloned()
            .collect()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.alerts.iter().filter(|alert| !alert.acknowledged).count()
    }

    /// Drops alerts raised before `cutoff`; returns how many were removed.
    pub(crate) fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|alert| alert.timestamp > cutoff);
        before - self.alerts.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.alerts.len()
    }
}
