//! Resilience layer orchestration.
//!
//! Owns one instance of every component for a single browser session and
//! wires them together: protected actions run through the recovery engine,
//! data acquisition degrades through the fallback engine, credentials are
//! unsealed through the vault, and every outcome is reported to monitoring.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::{ConfigError, ResilienceConfig};
use crate::modules::evasion::{
	BanSignalReport, BrowserSession, EvasionError, EvasionManager, Identity, RiskLevel,
};
use crate::modules::fallback::{
	AccessMethod, AccessOutcome, AccessTactic, BrowserTactic, DEFAULT_TACTIC_NAMES,
	FallbackEngine, JsonBodyExtractor, PageExtractor, Preparation,
};
use crate::modules::monitoring::{AlertSeverity, EventHandler, MonitoringService, TaskStatus};
use crate::modules::recovery::{
	ErrorRecoveryEngine, RecoveryError, RecoveryResult, Remediation, RemediationRule, RuleError,
	StandardRemediations, TimeoutBudget, standard_rules,
};
use crate::modules::timing::{CancelSignal, pause};
use crate::modules::vault::{
	AuditSink, BankCredentials, CredentialVault, EncryptedEnvelope, MasterSecret, VaultError,
	validate_bank_credentials,
};

/// Result alias used across the orchestration layer.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum ResilienceError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("remediation rule error: {0}")]
	Rule(#[from] RuleError),
	#[error("vault error: {0}")]
	Vault(#[from] VaultError),
	#[error("evasion error: {0}")]
	Evasion(#[from] EvasionError),
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
	#[error("protected action failed: {0}")]
	Recovery(String),
	#[error("no browser session attached")]
	NoSession,
}

/// Builder for [`ResilienceLayer`].
#[derive(Default)]
pub struct ResilienceBuilder {
	config: ResilienceConfig,
	session: Option<Arc<dyn BrowserSession>>,
	tactics: Vec<Arc<dyn AccessTactic>>,
	browser_extractor: Option<Arc<dyn PageExtractor>>,
	extra_rules: Vec<RemediationRule>,
	relogin: Option<Arc<dyn Remediation>>,
	captcha: Option<Arc<dyn Remediation>>,
	audit_sink: Option<Arc<dyn AuditSink>>,
	master_secret: Option<MasterSecret>,
	handlers: Vec<Arc<dyn EventHandler>>,
	timeout_budget: Option<Arc<TimeoutBudget>>,
}

impl ResilienceBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_config(mut self, config: ResilienceConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_session(mut self, session: Arc<dyn BrowserSession>) -> Self {
		self.session = Some(session);
		self
	}

	pub fn with_tactic(mut self, tactic: Arc<dyn AccessTactic>) -> Self {
		self.tactics.push(tactic);
		self
	}

	/// Registers the five session-backed tactics, extracting data with `extractor`.
	///
	/// The API discovery tactic always parses the page as JSON.
	pub fn with_browser_tactics(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
		self.browser_extractor = Some(extractor);
		self
	}

	pub fn with_rule(mut self, rule: RemediationRule) -> Self {
		self.extra_rules.push(rule);
		self
	}

	pub fn with_relogin(mut self, remediation: Arc<dyn Remediation>) -> Self {
		self.relogin = Some(remediation);
		self
	}

	pub fn with_captcha_solver(mut self, remediation: Arc<dyn Remediation>) -> Self {
		self.captcha = Some(remediation);
		self
	}

	pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
		self.audit_sink = Some(sink);
		self
	}

	/// Overrides the `RPA_ENCRYPTION_KEY` lookup.
	pub fn with_master_secret(mut self, secret: MasterSecret) -> Self {
		self.master_secret = Some(secret);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn with_timeout_budget(mut self, budget: Arc<TimeoutBudget>) -> Self {
		self.timeout_budget = Some(budget);
		self
	}

	pub fn build(self) -> ResilienceResult<ResilienceLayer> {
		self.config.validate()?;
		let config = self.config;

		let evasion = Arc::new(EvasionManager::new(config.evasion.clone()));
		let timeout_budget = self.timeout_budget.unwrap_or_default();

		let mut rules = standard_rules(StandardRemediations {
			session: self.session.clone(),
			evasion: Some(evasion.clone()),
			timeout_budget: timeout_budget.clone(),
			relogin: self.relogin,
			captcha: self.captcha,
		})?;
		rules.extend(self.extra_rules);
		let recovery = ErrorRecoveryEngine::new(config.recovery.clone(), rules);

		let mut fallback = FallbackEngine::new(config.fallback.clone());
		if let (Some(session), Some(extractor)) = (&self.session, &self.browser_extractor) {
			for tactic in browser_tactics(session, &evasion, extractor) {
				fallback.register(tactic);
			}
		}
		for tactic in self.tactics {
			fallback.register(tactic);
		}

		let monitoring = self
			.handlers
			.into_iter()
			.fold(MonitoringService::new(config.monitoring.clone()), |monitor, handler| {
				monitor.with_handler(handler)
			});

		let secret = self.master_secret.unwrap_or_else(MasterSecret::from_env);
		let mut vault = CredentialVault::new(secret, config.vault.clone());
		if let Some(sink) = self.audit_sink {
			vault = vault.with_audit_sink(sink);
		}

		log::debug!(
			"resilience layer ready: {} rules, {} tactics",
			recovery.rules().len(),
			fallback.tactic_names().len()
		);

		Ok(ResilienceLayer {
			config,
			session: self.session,
			session_lock: Mutex::new(()),
			recovery,
			evasion,
			fallback,
			monitoring,
			vault,
			timeout_budget,
			cancel: CancelSignal::new(),
		})
	}
}

fn browser_tactics(
	session: &Arc<dyn BrowserSession>,
	evasion: &Arc<EvasionManager>,
	extractor: &Arc<dyn PageExtractor>,
) -> Vec<Arc<dyn AccessTactic>> {
	let preparations = [
		Preparation::Stealth,
		Preparation::MobileEmulation,
		Preparation::RotateIdentity,
		Preparation::Reuse,
		Preparation::Reuse,
	];

	DEFAULT_TACTIC_NAMES
		.iter()
		.zip(preparations)
		.map(|(name, preparation)| {
			let extractor: Arc<dyn PageExtractor> = if *name == "api-endpoint-discovery" {
				Arc::new(JsonBodyExtractor)
			} else {
				extractor.clone()
			};
			Arc::new(BrowserTactic::new(
				*name,
				preparation,
				session.clone(),
				evasion.clone(),
				extractor,
			)) as Arc<dyn AccessTactic>
		})
		.collect()
}

/// One browser session guarded by every resilience component.
///
/// Calls that drive the session are serialized.
pub struct ResilienceLayer {
	config: ResilienceConfig,
	session: Option<Arc<dyn BrowserSession>>,
	session_lock: Mutex<()>,
	recovery: ErrorRecoveryEngine,
	evasion: Arc<EvasionManager>,
	fallback: FallbackEngine,
	monitoring: MonitoringService,
	vault: CredentialVault,
	timeout_budget: Arc<TimeoutBudget>,
	cancel: CancelSignal,
}

impl std::fmt::Debug for ResilienceLayer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResilienceLayer")
			.field("has_session", &self.session.is_some())
			.field("recovery", &self.recovery)
			.field("fallback", &self.fallback)
			.field("vault", &self.vault)
			.finish()
	}
}

impl ResilienceLayer {
	pub fn builder() -> ResilienceBuilder {
		ResilienceBuilder::new()
	}

	/// Runs `action` under the recovery engine and records the outcome.
	pub async fn run_protected<T, E, F, Fut>(
		&self,
		task_id: &str,
		task_type: &str,
		action: F,
	) -> RecoveryResult<T, E>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: Display,
	{
		let _guard = self.session_lock.lock().await;
		let started = Instant::now();
		let result = self.recovery.execute(action, &self.cancel).await;
		let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

		match &result {
			Ok(_) => {
				self.monitoring
					.log_task_execution(task_id, task_type, TaskStatus::Success, elapsed_ms, None);
			}
			Err(err) => {
				let message = err.to_string();
				self.monitoring.log_task_execution(
					task_id,
					task_type,
					TaskStatus::Failed,
					elapsed_ms,
					Some(&message),
				);
			}
		}
		result
	}

	/// Fetches data for `target` through the fallback tactics.
	pub async fn acquire(&self, target: &str) -> ResilienceResult<AccessOutcome> {
		let url = Url::parse(target)?;
		let _guard = self.session_lock.lock().await;
		let started = Instant::now();
		let outcome = self.fallback.acquire(&url, &self.cancel).await;
		let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

		let task_id = format!("acquire:{}", url.host_str().unwrap_or("unknown"));
		match &outcome.method {
			AccessMethod::Tactic(_) => {
				self.monitoring
					.log_task_execution(&task_id, "fallback", TaskStatus::Success, elapsed_ms, None);
			}
			AccessMethod::Simulation => {
				self.monitoring.log_task_execution(
					&task_id,
					"fallback",
					TaskStatus::Failed,
					elapsed_ms,
					Some("all access tactics failed"),
				);
				self.monitoring.create_alert(
					AlertSeverity::Warning,
					format!("Serving synthetic data for {url}"),
					json!({ "target": url.as_str(), "method": "simulation" }),
				);
			}
			AccessMethod::Error => {
				self.monitoring.log_task_execution(
					&task_id,
					"fallback",
					TaskStatus::Failed,
					elapsed_ms,
					Some("synthetic payload unavailable"),
				);
			}
		}
		Ok(outcome)
	}

	/// Scans the current page for ban signals and alerts on positives.
	pub async fn check_ban(&self) -> ResilienceResult<BanSignalReport> {
		let session = self.session()?;
		let _guard = self.session_lock.lock().await;
		let report = self.evasion.inspect_session(session.as_ref()).await;

		if report.is_banned {
			let severity = match report.risk_level {
				RiskLevel::High => AlertSeverity::Critical,
				RiskLevel::Medium => AlertSeverity::Error,
				RiskLevel::Low => AlertSeverity::Warning,
			};
			self.monitoring.create_alert(
				severity,
				format!("Ban signals detected: {}", report.signals.join(", ")),
				json!({ "signals": report.signals, "riskLevel": report.risk_level }),
			);
		}
		Ok(report)
	}

	pub async fn switch_identity(&self) -> ResilienceResult<Identity> {
		let session = self.session()?;
		let _guard = self.session_lock.lock().await;
		Ok(self
			.evasion
			.switch_identity(session.as_ref(), &self.cancel)
			.await?)
	}

	pub async fn enable_stealth(&self) -> ResilienceResult<()> {
		let session = self.session()?;
		let _guard = self.session_lock.lock().await;
		Ok(self.evasion.enable_stealth_mode(session.as_ref()).await?)
	}

	/// Validates and encrypts credentials for storage.
	pub fn seal_credentials(
		&self,
		user_id: &str,
		credentials: &BankCredentials,
	) -> ResilienceResult<EncryptedEnvelope> {
		let validation = validate_bank_credentials(credentials);
		if !validation.is_valid {
			self.vault.log_audit_event(
				"credentials.rejected",
				user_id,
				json!({ "errors": validation.errors }),
			);
			return Err(VaultError::InvalidCredentials(validation.errors).into());
		}

		let envelope = self.vault.encrypt(credentials)?;
		self.vault.log_audit_event(
			"credentials.sealed",
			user_id,
			json!({ "bankUrl": credentials.bank_url }),
		);
		Ok(envelope)
	}

	/// Decrypts stored credentials. A tamper failure raises a critical alert.
	pub fn unseal_credentials(
		&self,
		user_id: &str,
		envelope: &EncryptedEnvelope,
	) -> ResilienceResult<BankCredentials> {
		match self.vault.decrypt::<BankCredentials>(envelope) {
			Ok(credentials) => {
				self.vault.log_audit_event("credentials.unsealed", user_id, json!({}));
				Ok(credentials)
			}
			Err(err) => {
				if err.is_tamper() {
					self.vault
						.log_audit_event("credentials.tamper_detected", user_id, json!({}));
					self.monitoring.create_alert(
						AlertSeverity::Critical,
						format!("Credential envelope for {user_id} failed authentication"),
						json!({ "userId": user_id }),
					);
				}
				Err(err.into())
			}
		}
	}

	/// Runs monitoring cleanup every `interval` until [`shutdown`](Self::shutdown).
	pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
		let monitoring = self.monitoring.clone();
		let cancel = self.cancel.clone();
		tokio::spawn(async move {
			while pause(interval, &cancel).await.is_ok() {
				monitoring.cleanup();
			}
			log::debug!("monitoring cleanup task stopped");
		})
	}

	/// Cancels in-flight remediation, tactic attempts, and background tasks.
	pub fn shutdown(&self) {
		self.cancel.cancel();
	}

	pub fn cancel_signal(&self) -> &CancelSignal {
		&self.cancel
	}

	pub fn config(&self) -> &ResilienceConfig {
		&self.config
	}

	pub fn recovery(&self) -> &ErrorRecoveryEngine {
		&self.recovery
	}

	pub fn evasion(&self) -> &EvasionManager {
		&self.evasion
	}

	pub fn fallback(&self) -> &FallbackEngine {
		&self.fallback
	}

	pub fn monitoring(&self) -> &MonitoringService {
		&self.monitoring
	}

	pub fn vault(&self) -> &CredentialVault {
		&self.vault
	}

	pub fn timeout_budget(&self) -> &TimeoutBudget {
		&self.timeout_budget
	}

	fn session(&self) -> ResilienceResult<Arc<dyn BrowserSession>> {
		self.session.clone().ok_or(ResilienceError::NoSession)
	}
}

impl<E: Display> From<RecoveryError<E>> for ResilienceError {
	fn from(err: RecoveryError<E>) -> Self {
		ResilienceError::Recovery(err.to_string())
	}
}
