//! Resilience components
//!
//! Each component owns its state behind interior locks and can be used on
//! its own; [`crate::ResilienceLayer`] wires them together for one session.

pub mod evasion;
pub mod fallback;
pub mod monitoring;
pub mod recovery;
pub mod timing;
pub mod vault;

// Re-export commonly used types
pub use evasion::{
    BanSignalReport,
    BrowserSession,
    EvasionConfig,
    EvasionError,
    EvasionManager,
    Identity,
    InterceptPolicy,
    RiskLevel,
    RotationStatus,
    SessionError,
    Viewport,
};
pub use fallback::{
    AccessMethod,
    AccessOutcome,
    AccessTactic,
    BrowserTactic,
    FallbackConfig,
    FallbackEngine,
    FallbackStatus,
    FnTactic,
    PageExtractor,
    TacticError,
};
pub use monitoring::{
    Alert,
    AlertSeverity,
    EventHandler,
    HealthStatus,
    LoggingHandler,
    MetricsSnapshot,
    MonitoringConfig,
    MonitoringEvent,
    MonitoringService,
    PerformanceReport,
    TaskStatus,
    WorkerRecord,
    WorkerStatus,
};
pub use recovery::{
    ErrorRecoveryEngine,
    FnRemediation,
    RecoveryConfig,
    RecoveryError,
    Remediation,
    RemediationContext,
    RemediationError,
    RemediationRule,
    RuleStats,
    TimeoutBudget,
};
pub use timing::{BackoffPolicy, CancelSignal, Cancelled};
pub use vault::{
    AuditRecord,
    AuditSink,
    BankCredentials,
    CredentialVault,
    EncryptedEnvelope,
    MasterSecret,
    VaultConfig,
    VaultError,
};
