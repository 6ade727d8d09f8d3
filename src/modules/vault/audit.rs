//! Audit trail and environment hygiene checks for the vault.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::MASTER_SECRET_ENV;

/// Environment variable naming the deployment mode.
pub const ENVIRONMENT_ENV: &str = "RPA_ENV";

/// One audited security-relevant action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub user_id: String,
    pub details: Value,
    pub ip: String,
    pub user_agent: String,
}

impl AuditRecord {
    pub fn new(event: impl Into<String>, user_id: impl Into<String>, details: Value) -> Self {
        let ip = detail_or_unknown(&details, "ip");
        let user_agent = detail_or_unknown(&details, "userAgent");
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            user_id: user_id.into(),
            details,
            ip,
            user_agent,
        }
    }
}

fn detail_or_unknown(details: &Value, key: &str) -> String {
    details
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Destination for audit records. Storage is owned by the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Writes audit records as JSON lines to the `audit` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(line) => log::info!(target: "audit", "{line}"),
            Err(err) => log::warn!(target: "audit", "unserializable audit record {}: {err}", record.event),
        }
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, record: &AuditRecord) {
        (**self).record(record);
    }
}

/// Snapshot of the deployment variables relevant to credential safety.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityEnvironment {
    pub master_secret_set: bool,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub is_secure: bool,
    pub warnings: Vec<String>,
}

impl SecurityEnvironment {
    pub fn from_env() -> Self {
        Self {
            master_secret_set: std::env::var(MASTER_SECRET_ENV)
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            environment: std::env::var(ENVIRONMENT_ENV).ok(),
        }
    }

    pub fn check(&self) -> SecurityReport {
        let mut warnings = Vec::new();

        if !self.master_secret_set {
            warnings.push(format!("{MASTER_SECRET_ENV} is not set"));
        }

        if self
            .environment
            .as_deref()
            .is_some_and(|env| env.eq_ignore_ascii_case("development"))
        {
            warnings.push("running in development mode".to_string());
        }

        SecurityReport {
            is_secure: warnings.is_empty(),
            warnings,
        }
    }
}
