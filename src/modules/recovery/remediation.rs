//! Remediation procedures run after an error has been classified.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::modules::evasion::{BrowserSession, EvasionError, EvasionManager, SessionError};
use crate::modules::timing::{CancelSignal, Cancelled, pause};

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{0}")]
    Failed(String),
}

impl From<EvasionError> for RemediationError {
    fn from(err: EvasionError) -> Self {
        match err {
            EvasionError::Session(err) => RemediationError::Session(err),
            EvasionError::Cancelled(err) => RemediationError::Cancelled(err),
        }
    }
}

pub type RemediationResult = Result<(), RemediationError>;

/// What a remediation knows about the failure it is handling.
#[derive(Debug, Clone)]
pub struct RemediationContext {
    pub error_message: String,
    pub attempt: u32,
    pub cancel: CancelSignal,
}

#[async_trait]
pub trait Remediation: Send + Sync {
    fn name(&self) -> &str;

    async fn remediate(&self, ctx: &RemediationContext) -> RemediationResult;
}

/// Waits out the condition.
#[derive(Debug, Clone)]
pub struct Wait {
    name: &'static str,
    delay: Duration,
}

impl Wait {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self { name, delay }
    }
}

#[async_trait]
impl Remediation for Wait {
    fn name(&self) -> &str {
        self.name
    }

    async fn remediate(&self, ctx: &RemediationContext) -> RemediationResult {
        log::debug!("{}: waiting {}ms", self.name, self.delay.as_millis());
        pause(self.delay, &ctx.cancel).await?;
        Ok(())
    }
}

/// Reloads the current page and lets it settle.
pub struct ReloadPage {
    session: Arc<dyn BrowserSession>,
    settle: Duration,
}

impl ReloadPage {
    pub fn new(session: Arc<dyn BrowserSession>, settle: Duration) -> Self {
        Self { session, settle }
    }
}

#[async_trait]
impl Remediation for ReloadPage {
    fn name(&self) -> &str {
        "reload-page"
    }

    async fn remediate(&self, ctx: &RemediationContext) -> RemediationResult {
        ctx.cancel.check()?;
        self.session.reload().await?;
        pause(self.settle, &ctx.cancel).await?;
        Ok(())
    }
}

/// Shared operation timeout that remediations may extend.
#[derive(Debug)]
pub struct TimeoutBudget {
    current_ms: AtomicU64,
    max_ms: u64,
}

impl TimeoutBudget {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current_ms: AtomicU64::new(initial.as_millis() as u64),
            max_ms: max.as_millis() as u64,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms.load(Ordering::Relaxed))
    }

    /// Adds `by`, saturating at the configured maximum. Returns the new value.
    pub fn extend(&self, by: Duration) -> Duration {
        let by = by.as_millis() as u64;
        let max = self.max_ms;
        let previous = self
            .current_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(by).min(max))
            })
            .unwrap_or_else(|current| current);
        Duration::from_millis(previous.saturating_add(by).min(max))
    }
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(120))
    }
}

/// Gives slow pages more time, then waits.
#[derive(Debug)]
pub struct ExtendTimeout {
    budget: Arc<TimeoutBudget>,
    step: Duration,
    wait: Duration,
}

impl ExtendTimeout {
    pub fn new(budget: Arc<TimeoutBudget>, step: Duration, wait: Duration) -> Self {
        Self { budget, step, wait }
    }
}

#[async_trait]
impl Remediation for ExtendTimeout {
    fn name(&self) -> &str {
        "extend-timeout"
    }

    async fn remediate(&self, ctx: &RemediationContext) -> RemediationResult {
        let extended = self.budget.extend(self.step);
        log::info!("timeout budget extended to {}ms", extended.as_millis());
        pause(self.wait, &ctx.cancel).await?;
        Ok(())
    }
}

/// Rotates the browser identity through the evasion manager.
pub struct SwitchIdentity {
    session: Arc<dyn BrowserSession>,
    evasion: Arc<EvasionManager>,
}

impl SwitchIdentity {
    pub fn new(session: Arc<dyn BrowserSession>, evasion: Arc<EvasionManager>) -> Self {
        Self { session, evasion }
    }
}

#[async_trait]
impl Remediation for SwitchIdentity {
    fn name(&self) -> &str {
        "switch-identity"
    }

    async fn remediate(&self, ctx: &RemediationContext) -> RemediationResult {
        self.evasion
            .switch_identity(self.session.as_ref(), &ctx.cancel)
            .await?;
        Ok(())
    }
}

type RemediationFuture = Pin<Box<dyn Future<Output = RemediationResult> + Send>>;

/// Adapts a closure (relogin, captcha solver, ...) into a [`Remediation`].
pub struct FnRemediation {
    name: String,
    run: Box<dyn Fn(RemediationContext) -> RemediationFuture + Send + Sync>,
}

impl FnRemediation {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(RemediationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RemediationResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move |ctx| Box::pin(run(ctx))),
        }
    }
}

impl std::fmt::Debug for FnRemediation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRemediation").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Remediation for FnRemediation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn remediate(&self, ctx: &RemediationContext) -> RemediationResult {
        (self.run)(ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::evasion::test_support::FakeSession;

    fn ctx() -> RemediationContext {
        RemediationContext {
            error_message: "boom".into(),
            attempt: 1,
            cancel: CancelSignal::new(),
        }
    }

    #[test]
    fn timeout_budget_saturates() {
        let budget = TimeoutBudget::new(Duration::from_secs(30), Duration::from_secs(40));
        assert_eq!(budget.extend(Duration::from_secs(5)), Duration::from_secs(35));
        assert_eq!(budget.extend(Duration::from_secs(10)), Duration::from_secs(40));
        assert_eq!(budget.current(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn reload_page_reloads_session() {
        let session = Arc::new(FakeSession::default());
        let remediation = ReloadPage::new(session.clone(), Duration::from_secs(2));
        remediation.remediate(&ctx()).await.unwrap();
        assert_eq!(session.count("reload"), 1);
    }

    #[tokio::test]
    async fn wait_honours_cancellation() {
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = Wait::new("network", Duration::from_secs(3))
            .remediate(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RemediationError::Cancelled(_)));
    }

    #[tokio::test]
    async fn fn_remediation_sees_context() {
        let remediation = FnRemediation::new("relogin", |ctx: RemediationContext| async move {
            if ctx.error_message == "boom" {
                Ok(())
            } else {
                Err(RemediationError::Failed("unexpected".into()))
            }
        });
        assert_eq!(remediation.name(), "relogin");
        assert!(remediation.remediate(&ctx()).await.is_ok());
    }
}
