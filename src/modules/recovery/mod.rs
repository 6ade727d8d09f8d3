//! Error recovery engine.
//!
//! Wraps an async action, classifies its failures against an ordered list
//! of remediation rules (first match wins), runs the matched remediation
//! and retries the action when it succeeded. Each rule keeps a running
//! success rate clamped to `[0, 1]`.

mod remediation;

pub use remediation::{
    ExtendTimeout, FnRemediation, ReloadPage, Remediation, RemediationContext, RemediationError,
    RemediationResult, SwitchIdentity, TimeoutBudget, Wait,
};

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::evasion::{BrowserSession, EvasionManager};
use super::timing::{BackoffPolicy, CancelSignal, Cancelled, pause};

const SUCCESS_REWARD: f64 = 0.1;
const FAILURE_PENALTY: f64 = 0.2;

static NEXT_RULE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern for rule {rule}: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
}

/// Failure returned by [`ErrorRecoveryEngine::execute`]. Always carries the
/// action's last error.
#[derive(Debug, Error)]
pub enum RecoveryError<E> {
    #[error("unrecoverable error: {error}")]
    Unclassified { error: E },
    #[error("remediation {rule} failed ({reason}): {error}")]
    RemediationFailed { rule: String, reason: String, error: E },
    #[error("gave up after {attempts} attempts: {error}")]
    Exhausted { attempts: u32, error: E },
    #[error("recovery cancelled")]
    Cancelled(#[from] Cancelled),
}

impl<E> RecoveryError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            RecoveryError::Unclassified { error }
            | RecoveryError::RemediationFailed { error, .. }
            | RecoveryError::Exhausted { error, .. } => Some(error),
            RecoveryError::Cancelled(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecoveryError::Cancelled(_))
    }
}

pub type RecoveryResult<T, E> = Result<T, RecoveryError<E>>;

/// Pattern-matched remediation with adaptive success tracking.
pub struct RemediationRule {
    id: u64,
    name: String,
    pattern: Regex,
    priority: u32,
    remediation: Arc<dyn Remediation>,
    success_rate: f64,
    last_used: Option<DateTime<Utc>>,
    uses: u64,
    failures: u64,
}

impl RemediationRule {
    /// `pattern` is matched case-insensitively against the error message.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        priority: u32,
        initial_success_rate: f64,
        remediation: Arc<dyn Remediation>,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| RuleError::InvalidPattern {
                rule: name.clone(),
                source,
            })?;

        Ok(Self {
            id: NEXT_RULE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            pattern,
            priority,
            remediation,
            success_rate: initial_success_rate.clamp(0.0, 1.0),
            last_used: None,
            uses: 0,
            failures: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }

    fn record(&mut self, success: bool) {
        self.uses += 1;
        self.last_used = Some(Utc::now());
        if success {
            self.success_rate = (self.success_rate + SUCCESS_REWARD).min(1.0);
        } else {
            self.failures += 1;
            self.success_rate = (self.success_rate - FAILURE_PENALTY).max(0.0);
        }
    }

    fn stats(&self) -> RuleStats {
        RuleStats {
            name: self.name.clone(),
            pattern: self.pattern.as_str().to_string(),
            priority: self.priority,
            remediation: self.remediation.name().to_string(),
            success_rate: self.success_rate,
            last_used: self.last_used,
            uses: self.uses,
            failures: self.failures,
        }
    }
}

impl std::fmt::Debug for RemediationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("priority", &self.priority)
            .field("success_rate", &self.success_rate)
            .finish()
    }
}

/// Read-only view of a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub name: String,
    pub pattern: String,
    pub priority: u32,
    pub remediation: String,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub uses: u64,
    pub failures: u64,
}

/// Collaborators used by the standard rule set. Missing ones degrade to waits.
#[derive(Clone, Default)]
pub struct StandardRemediations {
    pub session: Option<Arc<dyn BrowserSession>>,
    pub evasion: Option<Arc<EvasionManager>>,
    pub timeout_budget: Arc<TimeoutBudget>,
    pub relogin: Option<Arc<dyn Remediation>>,
    pub captcha: Option<Arc<dyn Remediation>>,
}

/// The seven built-in rules, in priority order.
pub fn standard_rules(deps: StandardRemediations) -> Result<Vec<RemediationRule>, RuleError> {
    let secs = Duration::from_secs;

    let reload: Arc<dyn Remediation> = match &deps.session {
        Some(session) => Arc::new(ReloadPage::new(session.clone(), secs(2))),
        None => Arc::new(Wait::new("element-settle", secs(2))),
    };
    let rotate: Arc<dyn Remediation> = match (&deps.session, &deps.evasion) {
        (Some(session), Some(evasion)) => {
            Arc::new(SwitchIdentity::new(session.clone(), evasion.clone()))
        }
        _ => Arc::new(Wait::new("forbidden-backoff", secs(2))),
    };
    let captcha = deps
        .captcha
        .unwrap_or_else(|| Arc::new(Wait::new("captcha-wait", secs(5))));
    let relogin = deps
        .relogin
        .unwrap_or_else(|| Arc::new(Wait::new("session-refresh", secs(3))));

    Ok(vec![
        RemediationRule::new(
            "element-not-found",
            r"element not found|selector.*not found",
            10,
            0.8,
            reload,
        )?,
        RemediationRule::new(
            "timeout",
            r"timeout|exceeded",
            20,
            0.7,
            Arc::new(ExtendTimeout::new(deps.timeout_budget, secs(5), secs(5))),
        )?,
        RemediationRule::new(
            "network",
            r"network.*error|connection.*failed",
            30,
            0.6,
            Arc::new(Wait::new("connection-restart", secs(3))),
        )?,
        RemediationRule::new("captcha", r"captcha|verification", 40, 0.5, captcha)?,
        RemediationRule::new(
            "session-expired",
            r"session.*expired|login.*required",
            50,
            0.9,
            relogin,
        )?,
        RemediationRule::new(
            "rate-limit",
            r"rate.*limit|too.*many.*requests",
            60,
            0.7,
            Arc::new(Wait::new("rate-limit-backoff", secs(10))),
        )?,
        RemediationRule::new("forbidden", r"forbidden|403|unauthorized", 70, 0.6, rotate)?,
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Upper bound on action invocations per `execute` call.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Outcome of classifying and remediating one error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Recovered { rule: String },
    Unmatched,
    RemediationFailed { rule: String, reason: String },
    Cancelled,
}

impl Classification {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Classification::Recovered { .. })
    }
}

#[derive(Debug)]
pub struct ErrorRecoveryEngine {
    config: RecoveryConfig,
    rules: Mutex<Vec<RemediationRule>>,
}

impl ErrorRecoveryEngine {
    pub fn new(config: RecoveryConfig, mut rules: Vec<RemediationRule>) -> Self {
        rules.sort_by_key(|rule| rule.priority);
        Self {
            config,
            rules: Mutex::new(rules),
        }
    }

    /// Engine with the standard rules and no session-bound collaborators.
    pub fn with_standard_rules(config: RecoveryConfig) -> Result<Self, RuleError> {
        Ok(Self::new(config, standard_rules(StandardRemediations::default())?))
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Inserts a rule after every rule of equal or lower priority.
    pub fn add_rule(&self, rule: RemediationRule) {
        let mut rules = self.lock_rules();
        rules.push(rule);
        rules.sort_by_key(|rule| rule.priority);
    }

    /// Runs `action`, remediating and retrying classified failures.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut action: F,
        cancel: &CancelSignal,
    ) -> RecoveryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            cancel.check()?;
            attempt += 1;

            let error = match action().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("action recovered on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let message = error.to_string();
            let Some(rule) = self.matching_rule(&message) else {
                log::error!("unclassified error, not retrying: {message}");
                return Err(RecoveryError::Unclassified { error });
            };

            if attempt >= max_attempts {
                log::error!("rule {rule} still matching after {attempt} attempts: {message}");
                return Err(RecoveryError::Exhausted {
                    attempts: attempt,
                    error,
                });
            }

            match self.handle_error(&message, attempt, cancel).await {
                Classification::Recovered { .. } => {
                    let delay = self.config.backoff.delay_for(attempt);
                    log::debug!("retrying in {}ms", delay.as_millis());
                    pause(delay, cancel).await?;
                }
                Classification::RemediationFailed { rule, reason } => {
                    return Err(RecoveryError::RemediationFailed {
                        rule,
                        reason,
                        error,
                    });
                }
                Classification::Unmatched => return Err(RecoveryError::Unclassified { error }),
                Classification::Cancelled => return Err(RecoveryError::Cancelled(Cancelled)),
            }
        }
    }

    /// Classifies `message`, runs the first matching remediation and updates its rule.
    ///
    /// The rule lock is released while the remediation runs.
    pub async fn handle_error(
        &self,
        message: &str,
        attempt: u32,
        cancel: &CancelSignal,
    ) -> Classification {
        let found = {
            let rules = self.lock_rules();
            rules
                .iter()
                .find(|rule| rule.matches(message))
                .map(|rule| (rule.id, rule.name.clone(), rule.remediation.clone()))
        };
        let Some((rule_id, rule, remediation)) = found else {
            log::warn!("no remediation rule matches: {message}");
            return Classification::Unmatched;
        };

        log::info!("applying remediation {} for rule {rule}", remediation.name());
        let ctx = RemediationContext {
            error_message: message.to_string(),
            attempt,
            cancel: cancel.clone(),
        };
        let result = remediation.remediate(&ctx).await;

        if let Err(RemediationError::Cancelled(_)) = result {
            return Classification::Cancelled;
        }

        self.update_rule(rule_id, result.is_ok());
        match result {
            Ok(()) => Classification::Recovered { rule },
            Err(err) => {
                log::error!("remediation for rule {rule} failed: {err}");
                Classification::RemediationFailed {
                    rule,
                    reason: err.to_string(),
                }
            }
        }
    }

    fn matching_rule(&self, message: &str) -> Option<String> {
        self.lock_rules()
            .iter()
            .find(|rule| rule.matches(message))
            .map(|rule| rule.name.clone())
    }

    /// Names may repeat, so the matched rule is looked up by its id.
    fn update_rule(&self, id: u64, success: bool) {
        let mut rules = self.lock_rules();
        if let Some(rule) = rules.iter_mut().find(|rule| rule.id == id) {
            rule.record(success);
        }
    }

    /// Mean success rate across all rules; zero when there are none.
    pub fn mean_success_rate(&self) -> f64 {
        let rules = self.lock_rules();
        if rules.is_empty() {
            return 0.0;
        }
        rules.iter().map(|rule| rule.success_rate).sum::<f64>() / rules.len() as f64
    }

    /// Highest success rates first. The live rule order is left untouched.
    pub fn top_rules(&self, n: usize) -> Vec<RuleStats> {
        let mut stats = self.rules();
        stats.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
        stats.truncate(n);
        stats
    }

    pub fn recently_used_rules(&self, window: chrono::Duration) -> Vec<RuleStats> {
        let cutoff = Utc::now().checked_sub_signed(window);
        self.rules()
            .into_iter()
            .filter(|rule| {
                rule.last_used
                    .is_some_and(|used| cutoff.is_none_or(|cutoff| used > cutoff))
            })
            .collect()
    }

    /// Rules used within the last hour.
    pub fn rules_used_last_hour(&self) -> Vec<RuleStats> {
        self.recently_used_rules(chrono::Duration::hours(1))
    }

    /// Snapshot of every rule in matching order.
    pub fn rules(&self) -> Vec<RuleStats> {
        self.lock_rules().iter().map(RemediationRule::stats).collect()
    }

    fn lock_rules(&self) -> std::sync::MutexGuard<'_, Vec<RemediationRule>> {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        succeed: bool,
    }

    #[async_trait::async_trait]
    impl Remediation for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn remediate(&self, _ctx: &RemediationContext) -> RemediationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(())
            } else {
                Err(RemediationError::Failed("still broken".into()))
            }
        }
    }

    fn counting(succeed: bool) -> (Arc<AtomicUsize>, Arc<dyn Remediation>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let remediation = Arc::new(Counting {
            calls: calls.clone(),
            succeed,
        });
        (calls, remediation)
    }

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            max_attempts: 5,
            backoff: BackoffPolicy::fixed(Duration::from_millis(10)),
        }
    }

    fn rate(engine: &ErrorRecoveryEngine, name: &str) -> f64 {
        engine
            .rules()
            .into_iter()
            .find(|rule| rule.name == name)
            .map(|rule| rule.success_rate)
            .unwrap()
    }

    #[test]
    fn standard_rules_keep_declared_order() {
        let engine = ErrorRecoveryEngine::with_standard_rules(RecoveryConfig::default()).unwrap();
        let names: Vec<String> = engine.rules().into_iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "element-not-found",
                "timeout",
                "network",
                "captcha",
                "session-expired",
                "rate-limit",
                "forbidden"
            ]
        );
        assert!(engine.rules().iter().all(|r| r.last_used.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_error_is_remediated_and_retried_once() {
        let budget = Arc::new(TimeoutBudget::default());
        let engine = ErrorRecoveryEngine::new(
            fast_config(),
            standard_rules(StandardRemediations {
                timeout_budget: budget.clone(),
                ..Default::default()
            })
            .unwrap(),
        );

        let calls = AtomicUsize::new(0);
        let result: RecoveryResult<&str, String> = engine
            .execute(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if call == 0 {
                            Err("Timeout exceeded after 30s".to_string())
                        } else {
                            Ok("statement")
                        }
                    }
                },
                &CancelSignal::new(),
            )
            .await;

        assert_eq!(result.unwrap(), "statement");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(budget.current(), Duration::from_secs(35));

        let timeout = engine
            .rules()
            .into_iter()
            .find(|rule| rule.name == "timeout")
            .unwrap();
        assert_eq!(timeout.uses, 1);
        assert!((timeout.success_rate - 0.8).abs() < 1e-9);
        assert_eq!(engine.rules_used_last_hour().len(), 1);
    }

    #[tokio::test]
    async fn unmatched_error_runs_no_remediation() {
        let (remediation_calls, remediation) = counting(true);
        let engine = ErrorRecoveryEngine::new(
            fast_config(),
            vec![RemediationRule::new("network", "network.*error", 10, 0.5, remediation).unwrap()],
        );

        let calls = AtomicUsize::new(0);
        let err = engine
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("disk full") }
                },
                &CancelSignal::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RecoveryError::Unclassified { error: "disk full" }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(remediation_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_rate_rises_and_saturates() {
        let (_, remediation) = counting(true);
        let engine = ErrorRecoveryEngine::new(
            fast_config(),
            vec![RemediationRule::new("captcha", "captcha", 10, 0.5, remediation).unwrap()],
        );
        let cancel = CancelSignal::new();

        for n in 1..=7 {
            assert!(engine.handle_error("CAPTCHA shown", 1, &cancel).await.is_recovered());
            let expected = (0.5 + 0.1 * n as f64).min(1.0);
            assert!((rate(&engine, "captcha") - expected).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn failed_remediation_penalises_and_propagates() {
        let (_, remediation) = counting(false);
        let engine = ErrorRecoveryEngine::new(
            fast_config(),
            vec![RemediationRule::new("forbidden", "403|forbidden", 10, 0.1, remediation).unwrap()],
        );

        let err = engine
            .execute(|| async { Err::<(), _>("HTTP 403 Forbidden") }, &CancelSignal::new())
            .await
            .unwrap_err();

        match err {
            RecoveryError::RemediationFailed { rule, error, .. } => {
                assert_eq!(rule, "forbidden");
                assert_eq!(error, "HTTP 403 Forbidden");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rate(&engine, "forbidden"), 0.0);
    }

    #[tokio::test]
    async fn failed_remediation_drops_rate_by_full_penalty() {
        let (_, remediation) = counting(false);
        let engine = ErrorRecoveryEngine::new(
            fast_config(),
            vec![RemediationRule::new("network", "network", 10, 0.7, remediation).unwrap()],
        );

        let outcome = engine.handle_error("network unreachable", 1, &CancelSignal::new()).await;
        assert!(matches!(outcome, Classification::RemediationFailed { .. }));

        let stats = &engine.rules()[0];
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.uses, 1);
        assert_eq!(stats.failures, 1);
        assert!(stats.last_used.is_some());
    }

    #[tokio::test]
    async fn duplicate_rule_names_credit_the_matched_rule() {
        let (alpha_calls, alpha) = counting(true);
        let (beta_calls, beta) = counting(true);
        let engine = ErrorRecoveryEngine::new(
            fast_config(),
            vec![
                RemediationRule::new("net", "alpha", 10, 0.5, alpha).unwrap(),
                RemediationRule::new("net", "beta", 20, 0.5, beta).unwrap(),
            ],
        );

        assert!(engine
            .handle_error("beta failure", 1, &CancelSignal::new())
            .await
            .is_recovered());
        assert_eq!(alpha_calls.load(Ordering::SeqCst), 0);
        assert_eq!(beta_calls.load(Ordering::SeqCst), 1);

        let rules = engine.rules();
        assert_eq!(rules[0].uses, 0);
        assert!((rules[0].success_rate - 0.5).abs() < 1e-9);
        assert_eq!(rules[1].uses, 1);
        assert!((rules[1].success_rate - 0.6).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_error_exhausts_attempts() {
        let (remediation_calls, remediation) = counting(true);
        let engine = ErrorRecoveryEngine::new(
            RecoveryConfig {
                max_attempts: 3,
                ..fast_config()
            },
            vec![RemediationRule::new("network", "connection.*failed", 10, 0.5, remediation).unwrap()],
        );

        let err = engine
            .execute(
                || async { Err::<(), _>("Connection failed") },
                &CancelSignal::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RecoveryError::Exhausted { attempts: 3, .. }));
        assert_eq!(remediation_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_matching_rule_wins_on_priority_ties() {
        let (first_calls, first) = counting(true);
        let (second_calls, second) = counting(true);
        let engine = ErrorRecoveryEngine::new(
            fast_config(),
            vec![
                RemediationRule::new("first", "error", 10, 0.5, first).unwrap(),
                RemediationRule::new("second", "network error", 10, 0.5, second).unwrap(),
            ],
        );

        engine.handle_error("network error", 1, &CancelSignal::new()).await;
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn top_rules_do_not_reorder_live_list() {
        let engine = ErrorRecoveryEngine::with_standard_rules(fast_config()).unwrap();
        let top: Vec<String> = engine.top_rules(3).into_iter().map(|r| r.name).collect();
        assert_eq!(top, vec!["session-expired", "element-not-found", "timeout"]);
        assert_eq!(engine.rules()[0].name, "element-not-found");

        let mean = engine.mean_success_rate();
        assert!((mean - 4.8 / 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let engine = ErrorRecoveryEngine::with_standard_rules(fast_config()).unwrap();
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = engine
            .execute(|| async { Ok::<_, String>(()) }, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
