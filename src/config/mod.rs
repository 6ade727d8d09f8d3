//! Settings for the resilience layer.
//!
//! Every section has working defaults, so a JSON document only needs the
//! keys it wants to override.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modules::evasion::EvasionConfig;
use crate::modules::fallback::FallbackConfig;
use crate::modules::monitoring::MonitoringConfig;
use crate::modules::recovery::RecoveryConfig;
use crate::modules::vault::VaultConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub recovery: RecoveryConfig,
    pub evasion: EvasionConfig,
    pub fallback: FallbackConfig,
    pub monitoring: MonitoringConfig,
    pub vault: VaultConfig,
}

impl ResilienceConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recovery.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "recovery.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        let backoff = &self.recovery.backoff;
        if backoff.min_delay_ms > backoff.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "recovery.backoff",
                reason: format!(
                    "min_delay_ms ({}) exceeds max_delay_ms ({})",
                    backoff.min_delay_ms, backoff.max_delay_ms
                ),
            });
        }
        if self.fallback.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "fallback.attempt_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        if self.monitoring.history_capacity == 0 || self.monitoring.alert_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "monitoring",
                reason: "history and alert capacities must be positive".into(),
            });
        }
        let retention_hours = self.monitoring.alert_retention_hours;
        if retention_hours <= 0 || chrono::Duration::try_hours(retention_hours).is_none() {
            return Err(ConfigError::Invalid {
                field: "monitoring.alert_retention_hours",
                reason: format!("{retention_hours} is not a positive number of hours"),
            });
        }
        let retention_minutes = self.monitoring.offline_worker_retention_minutes;
        if retention_minutes <= 0 || chrono::Duration::try_minutes(retention_minutes).is_none() {
            return Err(ConfigError::Invalid {
                field: "monitoring.offline_worker_retention_minutes",
                reason: format!("{retention_minutes} is not a positive number of minutes"),
            });
        }
        if !(1..=30).contains(&self.vault.scrypt_log_n) {
            return Err(ConfigError::Invalid {
                field: "vault.scrypt_log_n",
                reason: format!("{} is outside 1..=30", self.vault.scrypt_log_n),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = ResilienceConfig::from_json_str(
            r#"{ "recovery": { "max_attempts": 3 }, "fallback": { "attempt_timeout_ms": 5000 } }"#,
        )
        .unwrap();
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.fallback.attempt_timeout_ms, 5000);
        assert_eq!(config.monitoring, MonitoringConfig::default());
        assert_eq!(config.vault, VaultConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        let err = ResilienceConfig::from_json_str(r#"{ "recovery": { "max_attempts": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "recovery.max_attempts", .. }));

        assert!(matches!(
            ResilienceConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_unrepresentable_retention() {
        let err = ResilienceConfig::from_json_str(
            r#"{ "monitoring": { "alert_retention_hours": 9223372036854775807 } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "monitoring.alert_retention_hours", .. }
        ));

        let err = ResilienceConfig::from_json_str(
            r#"{ "monitoring": { "offline_worker_retention_minutes": 0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "monitoring.offline_worker_retention_minutes", .. }
        ));

        let config = ResilienceConfig::from_json_str(
            r#"{ "monitoring": { "alert_retention_hours": 48 } }"#,
        )
        .unwrap();
        assert_eq!(config.monitoring.alert_retention_hours, 48);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ResilienceConfig::from_json_file("/nonexistent/rpa.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rpa.json"));
    }
}
