//! # rpa-resilience
//!
//! Resilience layer for browser-driven bank data automation.
//!
//! Failed actions are classified against ordered remediation rules and
//! retried once remediated. Browser identities are rotated and stealthed
//! against bot detection. When every access tactic fails, the caller gets a
//! clearly tagged synthetic payload instead of an error. Credentials are
//! sealed at rest with AES-256-GCM under a scrypt-derived key, and every
//! outcome feeds a monitoring service that tracks health and raises alerts.
//!
//! ## Features
//!
//! - First-match error classification with adaptive per-rule success rates
//! - Identity rotation, stealth script injection, ban-signal detection
//! - Shuffled multi-tactic access with synthetic fallback
//! - Authenticated credential envelopes and salted password hashes
//! - Bounded metrics history, health transitions, deduplicated alerts
//!
//! ## Example
//!
//! ```no_run
//! use rpa_resilience::ResilienceLayer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let layer = ResilienceLayer::builder().build()?;
//!
//!     let balance = layer
//!         .run_protected("sync-42", "statement", || async {
//!             Ok::<_, String>(1250.0)
//!         })
//!         .await?;
//!     println!("balance: {balance}");
//!
//!     let outcome = layer.acquire("https://www.itau.com.br/extrato").await?;
//!     println!("via {}: {}", outcome.method.as_str(), outcome.data);
//!
//!     println!("{}", layer.monitoring().generate_performance_report());
//!     Ok(())
//! }
//! ```

mod resilience;

pub mod config;
pub mod modules;

pub use crate::resilience::{
    ResilienceBuilder,
    ResilienceError,
    ResilienceLayer,
    ResilienceResult,
};

pub use crate::config::{ConfigError, ResilienceConfig};

pub use crate::modules::evasion::{
    BanSignalReport,
    BrowserSession,
    DeviceClass,
    EvasionConfig,
    EvasionError,
    EvasionManager,
    Identity,
    InterceptPolicy,
    RiskLevel,
    RotationStatus,
    SessionError,
    SessionResult,
    StealthProfile,
    Viewport,
    detect_ban_signals,
};

pub use crate::modules::fallback::{
    AccessMethod,
    AccessOutcome,
    AccessTactic,
    BrowserTactic,
    DEFAULT_TACTIC_NAMES,
    FallbackConfig,
    FallbackEngine,
    FallbackStatus,
    FnTactic,
    JsonBodyExtractor,
    PageExtractor,
    Preparation,
    TacticError,
    TacticResult,
};

pub use crate::modules::monitoring::{
    AdvancedStats,
    Alert,
    AlertSeverity,
    CleanupReport,
    EventHandler,
    HealthStatus,
    LoggingHandler,
    MetricsSnapshot,
    MonitoringConfig,
    MonitoringEvent,
    MonitoringService,
    PerformanceReport,
    Prediction,
    Recommendation,
    SystemMetricsUpdate,
    TaskStatus,
    Trend,
    WorkerRecord,
    WorkerStatus,
    WorkerUpdate,
};

pub use crate::modules::recovery::{
    Classification,
    ErrorRecoveryEngine,
    FnRemediation,
    RecoveryConfig,
    RecoveryError,
    RecoveryResult,
    Remediation,
    RemediationContext,
    RemediationError,
    RemediationResult,
    RemediationRule,
    RuleError,
    RuleStats,
    StandardRemediations,
    TimeoutBudget,
    standard_rules,
};

pub use crate::modules::timing::{BackoffPolicy, CancelSignal, Cancelled, pause};

pub use crate::modules::vault::{
    AuditRecord,
    AuditSink,
    BankCredentials,
    CredentialValidation,
    CredentialVault,
    EncryptedEnvelope,
    LogAuditSink,
    MASTER_SECRET_ENV,
    MasterSecret,
    SecurityReport,
    VaultConfig,
    VaultError,
    VaultResult,
    generate_session_token,
    sanitize_input,
    validate_bank_credentials,
    validate_session_token,
};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
