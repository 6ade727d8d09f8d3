//! Trend analysis and the performance report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::{HealthStatus, MetricsSnapshot, WorkerRecord, WorkerStatus};

/// Snapshots considered by trend analysis.
pub const TREND_WINDOW: usize = 24;
const RECENT_SPAN: usize = 5;

const LOW_SUCCESS_PCT: f64 = 80.0;
const SLOW_EXECUTION_MS: f64 = 30_000.0;
const PENDING_BACKLOG: u64 = 100;
const OFFLINE_WORKER_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    Good,
    Concerning,
    Stable,
    InsufficientData,
}

impl Prediction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prediction::Good => "good",
            Prediction::Concerning => "concerning",
            Prediction::Stable => "stable",
            Prediction::InsufficientData => "insufficient data",
        }
    }
}

impl Serialize for Prediction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trend::Improving => "improving",
            Trend::Declining => "declining",
            Trend::Stable => "stable",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedStats {
    pub trend: Trend,
    pub prediction: Prediction,
    pub recent_success_rate: Option<f64>,
    pub older_success_rate: Option<f64>,
    /// Relative change of the recent mean against the older mean, in percent.
    pub change_pct: Option<f64>,
}

impl AdvancedStats {
    fn insufficient() -> Self {
        Self {
            trend: Trend::Stable,
            prediction: Prediction::InsufficientData,
            recent_success_rate: None,
            older_success_rate: None,
            change_pct: None,
        }
    }
}

/// Compares the last five snapshots against the (up to) five before them.
///
/// `history` is oldest-first; only the last [`TREND_WINDOW`] entries count.
pub fn advanced_stats(history: &[MetricsSnapshot]) -> AdvancedStats {
    let window = &history[history.len().saturating_sub(TREND_WINDOW)..];
    if window.len() < 2 {
        return AdvancedStats::insufficient();
    }

    let split = window.len().saturating_sub(RECENT_SPAN);
    let recent = &window[split..];
    let older = &window[split.saturating_sub(RECENT_SPAN)..split];

    let recent_avg = mean_success(recent);
    let Some(older_avg) = (!older.is_empty()).then(|| mean_success(older)) else {
        return AdvancedStats {
            trend: Trend::Stable,
            prediction: Prediction::Stable,
            recent_success_rate: Some(recent_avg),
            older_success_rate: None,
            change_pct: None,
        };
    };

    let trend = if recent_avg > older_avg {
        Trend::Improving
    } else if recent_avg < older_avg {
        Trend::Declining
    } else {
        Trend::Stable
    };
    let prediction = match trend {
        Trend::Improving => Prediction::Good,
        Trend::Declining => Prediction::Concerning,
        Trend::Stable => Prediction::Stable,
    };
    let change_pct = (older_avg > 0.0).then(|| round2((recent_avg - older_avg) / older_avg * 100.0));

    AdvancedStats {
        trend,
        prediction,
        recent_success_rate: Some(recent_avg),
        older_success_rate: Some(older_avg),
        change_pct,
    }
}

fn mean_success(snapshots: &[MetricsSnapshot]) -> f64 {
    snapshots.iter().map(|s| s.success_rate).sum::<f64>() / snapshots.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    LowSuccessRate,
    SlowExecution,
    PendingBacklog,
    WorkersOffline,
}

impl Recommendation {
    pub fn message(&self) -> &'static str {
        match self {
            Recommendation::LowSuccessRate => {
                "Low success rate. Check the error logs and task configuration."
            }
            Recommendation::SlowExecution => {
                "High execution time. Optimize workers or add more capacity."
            }
            Recommendation::PendingBacklog => "Too many pending tasks. Consider adding workers.",
            Recommendation::WorkersOffline => {
                "Too many workers offline. Check connectivity and resources."
            }
        }
    }
}

impl Serialize for Recommendation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

pub(crate) fn recommendations(metrics: &MetricsSnapshot, workers: &[WorkerRecord]) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if metrics.success_rate * 100.0 < LOW_SUCCESS_PCT {
        out.push(Recommendation::LowSuccessRate);
    }
    if metrics.avg_exec_time_ms > SLOW_EXECUTION_MS {
        out.push(Recommendation::SlowExecution);
    }
    if metrics.pending > PENDING_BACKLOG {
        out.push(Recommendation::PendingBacklog);
    }
    let offline = workers
        .iter()
        .filter(|w| w.status == WorkerStatus::Offline)
        .count();
    if offline as f64 > workers.len() as f64 * OFFLINE_WORKER_RATIO {
        out.push(Recommendation::WorkersOffline);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub timestamp: DateTime<Utc>,
    pub system_health: HealthStatus,
    /// Percent, two decimals.
    pub success_rate: f64,
    /// Milliseconds, two decimals.
    pub average_execution_time: f64,
    pub active_workers: usize,
    pub total_workers: usize,
    pub pending_tasks: u64,
    pub running_tasks: u64,
    pub trend: Trend,
    pub prediction: Prediction,
    pub alerts: usize,
    pub recommendations: Vec<Recommendation>,
}

impl PerformanceReport {
    pub(crate) fn build(
        metrics: &MetricsSnapshot,
        workers: &[WorkerRecord],
        stats: &AdvancedStats,
        open_alerts: usize,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            system_health: metrics.health,
            success_rate: round2(metrics.success_rate * 100.0),
            average_execution_time: round2(metrics.avg_exec_time_ms),
            active_workers: workers
                .iter()
                .filter(|w| w.status != WorkerStatus::Offline)
                .count(),
            total_workers: workers.len(),
            pending_tasks: metrics.pending,
            running_tasks: metrics.running,
            trend: stats.trend,
            prediction: stats.prediction,
            alerts: open_alerts,
            recommendations: recommendations(metrics, workers),
        }
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance report ({})", self.timestamp.to_rfc3339())?;
        writeln!(f, "  health:          {}", self.system_health)?;
        writeln!(f, "  success rate:    {:.2}%", self.success_rate)?;
        writeln!(f, "  avg exec time:   {:.2}ms", self.average_execution_time)?;
        writeln!(f, "  active workers:  {}/{}", self.active_workers, self.total_workers)?;
        writeln!(f, "  pending/running: {}/{}", self.pending_tasks, self.running_tasks)?;
        writeln!(f, "  trend:           {} ({})", self.trend, self.prediction.as_str())?;
        writeln!(f, "  open alerts:     {}", self.alerts)?;
        if self.recommendations.is_empty() {
            write!(f, "  no recommendations")
        } else {
            write!(f, "  recommendations:")?;
            for rec in &self.recommendations {
                write!(f, "\n    - {}", rec.message())?;
            }
            Ok(())
        }
    }
}
