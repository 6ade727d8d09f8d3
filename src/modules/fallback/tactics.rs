//! Access tactics the fallback engine can try.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::modules::evasion::{BrowserSession, DeviceClass, EvasionError, EvasionManager, SessionError};
use crate::modules::timing::{CancelSignal, Cancelled};

#[derive(Debug, Error)]
pub enum TacticError {
    #[error("tactic {tactic} timed out after {timeout_ms}ms")]
    Timeout { tactic: String, timeout_ms: u64 },
    #[error("access blocked: {0}")]
    Blocked(String),
    #[error("no data extracted: {0}")]
    Extraction(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("tactic {tactic} crashed: {reason}")]
    Crashed { tactic: String, reason: String },
    #[error("{0}")]
    Other(String),
}

impl From<EvasionError> for TacticError {
    fn from(err: EvasionError) -> Self {
        match err {
            EvasionError::Session(err) => TacticError::Session(err),
            EvasionError::Cancelled(err) => TacticError::Cancelled(err),
        }
    }
}

pub type TacticResult = Result<Value, TacticError>;

/// One way of reaching the target's data.
#[async_trait]
pub trait AccessTactic: Send + Sync {
    fn name(&self) -> &str;

    /// Prior estimate used for status reporting before any attempt.
    fn base_success_probability(&self) -> f64 {
        0.5
    }

    async fn attempt(&self, target: &Url, cancel: &CancelSignal) -> TacticResult;
}

type TacticFuture = Pin<Box<dyn Future<Output = TacticResult> + Send>>;

/// Adapts a closure into an [`AccessTactic`].
pub struct FnTactic {
    name: String,
    probability: f64,
    attempt: Box<dyn Fn(Url, CancelSignal) -> TacticFuture + Send + Sync>,
}

impl FnTactic {
    pub fn new<F, Fut>(name: impl Into<String>, probability: f64, attempt: F) -> Self
    where
        F: Fn(Url, CancelSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TacticResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            probability: probability.clamp(0.0, 1.0),
            attempt: Box::new(move |url, cancel| Box::pin(attempt(url, cancel))),
        }
    }
}

impl std::fmt::Debug for FnTactic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTactic")
            .field("name", &self.name)
            .field("probability", &self.probability)
            .finish()
    }
}

#[async_trait]
impl AccessTactic for FnTactic {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_success_probability(&self) -> f64 {
        self.probability
    }

    async fn attempt(&self, target: &Url, cancel: &CancelSignal) -> TacticResult {
        (self.attempt)(target.clone(), cancel.clone()).await
    }
}

/// Pulls structured data out of a loaded page.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(&self, session: &dyn BrowserSession) -> TacticResult;
}

/// Parses the page content as JSON. Useful for API endpoints opened in the browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBodyExtractor;

#[async_trait]
impl PageExtractor for JsonBodyExtractor {
    async fn extract(&self, session: &dyn BrowserSession) -> TacticResult {
        let content = session.content().await?;
        serde_json::from_str(content.trim())
            .map_err(|err| TacticError::Extraction(format!("page is not JSON: {err}")))
    }
}

/// How a [`BrowserTactic`] prepares the session before navigating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    Stealth,
    MobileEmulation,
    RotateIdentity,
    Reuse,
}

/// Session-backed tactic: prepare, navigate, reject banned pages, extract.
pub struct BrowserTactic {
    name: String,
    probability: f64,
    preparation: Preparation,
    session: Arc<dyn BrowserSession>,
    evasion: Arc<EvasionManager>,
    extractor: Arc<dyn PageExtractor>,
}

impl BrowserTactic {
    pub fn new(
        name: impl Into<String>,
        preparation: Preparation,
        session: Arc<dyn BrowserSession>,
        evasion: Arc<EvasionManager>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Self {
        Self {
            name: name.into(),
            probability: default_probability(preparation),
            preparation,
            session,
            evasion,
            extractor,
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability.clamp(0.0, 1.0);
        self
    }

    async fn prepare(&self, cancel: &CancelSignal) -> Result<(), TacticError> {
        let session = self.session.as_ref();
        match self.preparation {
            Preparation::Stealth => self.evasion.enable_stealth_mode(session).await?,
            Preparation::MobileEmulation => {
                self.evasion.rotate(session, DeviceClass::Mobile, cancel).await?;
            }
            Preparation::RotateIdentity => {
                self.evasion.switch_identity(session, cancel).await?;
            }
            Preparation::Reuse => {}
        }
        Ok(())
    }
}

fn default_probability(preparation: Preparation) -> f64 {
    match preparation {
        Preparation::Stealth => 0.7,
        Preparation::MobileEmulation => 0.6,
        Preparation::RotateIdentity => 0.5,
        Preparation::Reuse => 0.4,
    }
}

impl std::fmt::Debug for BrowserTactic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserTactic")
            .field("name", &self.name)
            .field("preparation", &self.preparation)
            .field("probability", &self.probability)
            .finish()
    }
}

#[async_trait]
impl AccessTactic for BrowserTactic {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_success_probability(&self) -> f64 {
        self.probability
    }

    async fn attempt(&self, target: &Url, cancel: &CancelSignal) -> TacticResult {
        cancel.check()?;
        self.prepare(cancel).await?;

        let session = self.session.as_ref();
        session.navigate(target).await?;

        let report = self.evasion.inspect_session(session).await;
        if report.is_banned {
            return Err(TacticError::Blocked(report.signals.join(", ")));
        }

        self.extractor.extract(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::evasion::test_support::FakeSession;
    use serde_json::json;

    fn target() -> Url {
        Url::parse("https://api.bank.example/accounts").unwrap()
    }

    #[tokio::test]
    async fn fn_tactic_forwards_to_closure() {
        let tactic = FnTactic::new("api-endpoint-discovery", 1.5, |url, _cancel| async move {
            Ok(json!({ "url": url.to_string() }))
        });
        assert_eq!(tactic.base_success_probability(), 1.0);

        let value = tactic.attempt(&target(), &CancelSignal::new()).await.unwrap();
        assert_eq!(value["url"], "https://api.bank.example/accounts");
    }

    #[tokio::test]
    async fn browser_tactic_extracts_json_page() {
        let session = Arc::new(FakeSession::with_page(r#"{"balance": 10}"#, "https://x.example"));
        let tactic = BrowserTactic::new(
            "headless-browser",
            Preparation::Stealth,
            session.clone(),
            Arc::new(EvasionManager::default()),
            Arc::new(JsonBodyExtractor),
        );

        let value = tactic.attempt(&target(), &CancelSignal::new()).await.unwrap();
        assert_eq!(value["balance"], 10);
        assert_eq!(session.count("inject_script"), 1);
        assert_eq!(session.count("navigate"), 1);
    }

    #[tokio::test]
    async fn browser_tactic_rejects_banned_page() {
        let session = Arc::new(FakeSession::with_page("Access denied", "https://x.example"));
        let tactic = BrowserTactic::new(
            "session-reuse",
            Preparation::Reuse,
            session,
            Arc::new(EvasionManager::default()),
            Arc::new(JsonBodyExtractor),
        );

        let err = tactic.attempt(&target(), &CancelSignal::new()).await.unwrap_err();
        assert!(matches!(err, TacticError::Blocked(_)));
    }
}
