//! Evasion manager.
//!
//! Rotates the browser identity a session presents, injects the stealth
//! script before page load, paces interaction like a human operator, and
//! inspects rendered pages for ban signals.

mod ban_signals;
mod identity;

pub use ban_signals::{BAN_PHRASES, BanSignalReport, RiskLevel, detect_ban_signals};
pub use identity::{DeviceClass, Identity, StealthProfile, Viewport, stealth_headers};

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::timing::{CancelSignal, Cancelled, HUMAN_DELAYS_MS, PACING_DELAYS_MS, pause, sample_delay};

/// Errors reported by a browser driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("browser driver error: {0}")]
    Driver(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser session closed")]
    Closed,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Which subresources the session lets through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptPolicy {
    AllowAll,
    BlockImages,
}

/// Opaque handle to an automated browser page.
///
/// Implementations wrap whichever driver the caller runs. Callers must not
/// drive the same session from two tasks at once.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn set_user_agent(&self, user_agent: &str) -> SessionResult<()>;
    async fn set_viewport(&self, viewport: Viewport) -> SessionResult<()>;
    async fn set_extra_headers(&self, headers: &HeaderMap) -> SessionResult<()>;
    async fn set_request_interception(&self, policy: InterceptPolicy) -> SessionResult<()>;
    async fn inject_script_on_new_document(&self, script: &str) -> SessionResult<()>;
    async fn viewport(&self) -> Option<Viewport>;
    async fn move_mouse(&self, x: f64, y: f64) -> SessionResult<()>;
    async fn scroll_to(&self, x: f64, y: f64) -> SessionResult<()>;
    async fn navigate(&self, url: &Url) -> SessionResult<()>;
    async fn reload(&self) -> SessionResult<()>;
    async fn content(&self) -> SessionResult<String>;
    async fn current_url(&self) -> SessionResult<Url>;
}

#[derive(Debug, Error)]
pub enum EvasionError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type EvasionResult<T> = Result<T, EvasionError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvasionConfig {
    pub simulate_human: bool,
    pub mouse_moves: u32,
    pub max_scroll_px: f64,
    pub block_images: bool,
    pub stealth: StealthProfile,
}

impl Default for EvasionConfig {
    fn default() -> Self {
        Self {
            simulate_human: true,
            mouse_moves: 3,
            max_scroll_px: 100.0,
            block_images: false,
            stealth: StealthProfile::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationStatus {
    pub active: bool,
    pub last_rotation: Option<DateTime<Utc>>,
    pub total_rotations: u64,
    pub current_identity: String,
}

#[derive(Debug)]
struct RotationState {
    last_rotation: Option<DateTime<Utc>>,
    total_rotations: u64,
    identity_id: String,
    current: Option<Identity>,
    stealth_enabled: bool,
}

/// Single implementation of identity rotation, stealth, and ban detection.
#[derive(Debug)]
pub struct EvasionManager {
    config: EvasionConfig,
    state: Mutex<RotationState>,
}

impl EvasionManager {
    pub fn new(config: EvasionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RotationState {
                last_rotation: None,
                total_rotations: 0,
                identity_id: pseudo_identity(),
                current: None,
                stealth_enabled: false,
            }),
        }
    }

    pub fn config(&self) -> &EvasionConfig {
        &self.config
    }

    /// Rotates user-agent, viewport, and headers, then moves like a human.
    ///
    /// The rotation is only counted once all three were applied.
    pub async fn switch_identity(
        &self,
        session: &dyn BrowserSession,
        cancel: &CancelSignal,
    ) -> EvasionResult<Identity> {
        self.rotate(session, DeviceClass::Desktop, cancel).await
    }

    pub async fn rotate(
        &self,
        session: &dyn BrowserSession,
        class: DeviceClass,
        cancel: &CancelSignal,
    ) -> EvasionResult<Identity> {
        cancel.check()?;
        let identity = Identity::random(class);
        log::debug!(
            "rotating identity: {}x{} {}",
            identity.viewport.width,
            identity.viewport.height,
            identity.user_agent
        );

        session.set_user_agent(&identity.user_agent).await?;
        session.set_viewport(identity.viewport).await?;
        session.set_extra_headers(&identity.headers).await?;

        {
            let mut state = self.lock_state();
            state.total_rotations += 1;
            state.last_rotation = Some(Utc::now());
            state.identity_id = pseudo_identity();
            state.current = Some(identity.clone());
            log::info!(
                "identity switched to {} (rotation #{})",
                state.identity_id,
                state.total_rotations
            );
        }

        if self.config.simulate_human {
            self.simulate_human_behavior(session, identity.viewport, cancel)
                .await?;
        }

        Ok(identity)
    }

    /// Random mouse moves separated by human-scale delays, then a short scroll.
    pub async fn simulate_human_behavior(
        &self,
        session: &dyn BrowserSession,
        viewport: Viewport,
        cancel: &CancelSignal,
    ) -> EvasionResult<()> {
        for _ in 0..self.config.mouse_moves {
            let (x, y) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_range(0.0..viewport.width.max(1) as f64),
                    rng.gen_range(0.0..viewport.height.max(1) as f64),
                )
            };
            session.move_mouse(x, y).await?;
            pause(sample_delay(HUMAN_DELAYS_MS, 500), cancel).await?;
        }

        let scroll = rand::thread_rng().gen_range(0.0..=self.config.max_scroll_px.max(0.0));
        session.scroll_to(0.0, scroll).await?;
        Ok(())
    }

    /// Installs the stealth script and headers before any page script runs.
    pub async fn enable_stealth_mode(&self, session: &dyn BrowserSession) -> EvasionResult<()> {
        session
            .inject_script_on_new_document(&self.config.stealth.script())
            .await?;

        let language = self.config.stealth.languages.join(",");
        session.set_extra_headers(&stealth_headers(&language)).await?;

        if self.config.block_images {
            session
                .set_request_interception(InterceptPolicy::BlockImages)
                .await?;
        }

        self.lock_state().stealth_enabled = true;
        log::info!("stealth mode enabled");
        Ok(())
    }

    /// Waits for a delay drawn from the pacing set and returns it.
    pub async fn add_random_delay(&self, cancel: &CancelSignal) -> Result<Duration, Cancelled> {
        let delay = sample_delay(PACING_DELAYS_MS, 1000);
        log::debug!("pacing for {}ms", delay.as_millis());
        pause(delay, cancel).await?;
        Ok(delay)
    }

    pub fn detect_ban_signals(&self, content: &str, url: &str) -> BanSignalReport {
        detect_ban_signals(content, url)
    }

    /// Reads the rendered page and scans it. Read failures yield a clean report.
    pub async fn inspect_session(&self, session: &dyn BrowserSession) -> BanSignalReport {
        let content = match session.content().await {
            Ok(content) => content,
            Err(err) => {
                log::warn!("unable to read page content for ban detection: {err}");
                return BanSignalReport::clean();
            }
        };
        let url = match session.current_url().await {
            Ok(url) => url.to_string(),
            Err(err) => {
                log::warn!("unable to read page url for ban detection: {err}");
                String::new()
            }
        };

        let report = detect_ban_signals(&content, &url);
        if report.is_banned {
            log::warn!(
                "ban signals detected ({:?}): {}",
                report.risk_level,
                report.signals.join(", ")
            );
        }
        report
    }

    pub fn rotation_status(&self) -> RotationStatus {
        let state = self.lock_state();
        RotationStatus {
            active: state.stealth_enabled || state.total_rotations > 0,
            last_rotation: state.last_rotation,
            total_rotations: state.total_rotations,
            current_identity: state.identity_id.clone(),
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.lock_state().current.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RotationState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EvasionManager {
    fn default() -> Self {
        Self::new(EvasionConfig::default())
    }
}

fn pseudo_identity() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("Anonymous-{suffix}")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records every driver call; failures can be injected per operation.
    #[derive(Default)]
    pub struct FakeSession {
        pub calls: Mutex<Vec<String>>,
        pub content: Mutex<String>,
        pub url: Mutex<Option<Url>>,
        pub viewport: Mutex<Option<Viewport>>,
        pub fail_on: Mutex<Option<&'static str>>,
    }

    impl FakeSession {
        pub fn with_page(content: &str, url: &str) -> Self {
            let session = Self::default();
            *session.content.lock().unwrap() = content.to_string();
            *session.url.lock().unwrap() = Url::parse(url).ok();
            session
        }

        pub fn fail_on(&self, op: &'static str) {
            *self.fail_on.lock().unwrap() = Some(op);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, op: &str) -> usize {
            self.calls().iter().filter(|call| call.as_str() == op).count()
        }

        fn record(&self, op: &'static str) -> SessionResult<()> {
            self.calls.lock().unwrap().push(op.to_string());
            if *self.fail_on.lock().unwrap() == Some(op) {
                return Err(SessionError::Driver(format!("{op} failed")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn set_user_agent(&self, _user_agent: &str) -> SessionResult<()> {
            self.record("set_user_agent")
        }

        async fn set_viewport(&self, viewport: Viewport) -> SessionResult<()> {
            self.record("set_viewport")?;
            *self.viewport.lock().unwrap() = Some(viewport);
            Ok(())
        }

        async fn set_extra_headers(&self, _headers: &HeaderMap) -> SessionResult<()> {
            self.record("set_extra_headers")
        }

        async fn set_request_interception(&self, _policy: InterceptPolicy) -> SessionResult<()> {
            self.record("set_request_interception")
        }

        async fn inject_script_on_new_document(&self, _script: &str) -> SessionResult<()> {
            self.record("inject_script")
        }

        async fn viewport(&self) -> Option<Viewport> {
            *self.viewport.lock().unwrap()
        }

        async fn move_mouse(&self, _x: f64, _y: f64) -> SessionResult<()> {
            self.record("move_mouse")
        }

        async fn scroll_to(&self, _x: f64, _y: f64) -> SessionResult<()> {
            self.record("scroll_to")
        }

        async fn navigate(&self, url: &Url) -> SessionResult<()> {
            self.record("navigate")?;
            *self.url.lock().unwrap() = Some(url.clone());
            Ok(())
        }

        async fn reload(&self) -> SessionResult<()> {
            self.record("reload")
        }

        async fn content(&self) -> SessionResult<String> {
            self.record("content")?;
            Ok(self.content.lock().unwrap().clone())
        }

        async fn current_url(&self) -> SessionResult<Url> {
            self.record("current_url")?;
            self.url.lock().unwrap().clone().ok_or(SessionError::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeSession;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn switch_identity_applies_all_parts_and_counts() {
        let manager = EvasionManager::default();
        let session = FakeSession::default();
        let before = manager.rotation_status();

        let identity = manager
            .switch_identity(&session, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(session.count("set_user_agent"), 1);
        assert_eq!(session.count("set_viewport"), 1);
        assert_eq!(session.count("set_extra_headers"), 1);
        assert_eq!(session.count("move_mouse"), 3);
        assert_eq!(session.count("scroll_to"), 1);
        assert_eq!(*session.viewport.lock().unwrap(), Some(identity.viewport));

        let after = manager.rotation_status();
        assert_eq!(after.total_rotations, 1);
        assert!(after.active);
        assert!(after.last_rotation.is_some());
        assert_ne!(after.current_identity, before.current_identity);
        assert!(after.current_identity.starts_with("Anonymous-"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rotation_is_not_counted() {
        let manager = EvasionManager::default();
        let session = FakeSession::default();
        session.fail_on("set_viewport");

        let err = manager
            .switch_identity(&session, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EvasionError::Session(_)));
        assert_eq!(manager.rotation_status().total_rotations, 0);
        assert!(manager.current_identity().is_none());
    }

    #[tokio::test]
    async fn cancelled_rotation_touches_nothing() {
        let manager = EvasionManager::default();
        let session = FakeSession::default();
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = manager.switch_identity(&session, &cancel).await.unwrap_err();
        assert!(matches!(err, EvasionError::Cancelled(_)));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn stealth_mode_injects_before_page_load() {
        let manager = EvasionManager::new(EvasionConfig {
            block_images: true,
            ..Default::default()
        });
        let session = FakeSession::default();
        manager.enable_stealth_mode(&session).await.unwrap();

        let calls = session.calls();
        assert_eq!(calls[0], "inject_script");
        assert!(calls.contains(&"set_request_interception".to_string()));
        assert!(manager.rotation_status().active);
    }

    #[tokio::test]
    async fn inspects_rendered_page() {
        let manager = EvasionManager::default();
        let session = FakeSession::with_page(
            "Access denied: suspicious activity, captcha required, too many requests",
            "https://bank.example.com",
        );
        let report = manager.inspect_session(&session).await;
        assert_eq!(report.risk_level, RiskLevel::High);

        session.fail_on("content");
        assert_eq!(manager.inspect_session(&session).await, BanSignalReport::clean());
    }

    #[tokio::test(start_paused = true)]
    async fn random_delay_comes_from_pacing_set() {
        let manager = EvasionManager::default();
        let delay = manager.add_random_delay(&CancelSignal::new()).await.unwrap();
        assert!(PACING_DELAYS_MS.contains(&(delay.as_millis() as u64)));
    }
}
