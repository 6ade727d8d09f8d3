//! Fallback access engine.
//!
//! Tries every registered tactic in a freshly shuffled order and returns
//! the first success. When all tactics fail the caller still gets data: a
//! synthetic payload tagged `method: "simulation"`.

mod synthetic;
mod tactics;

pub use synthetic::{SyntheticAccount, SyntheticTransaction, TransactionKind, bank_name_for};
pub use tactics::{
    AccessTactic, BrowserTactic, FnTactic, JsonBodyExtractor, PageExtractor, Preparation,
    TacticError, TacticResult,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::timing::CancelSignal;

/// Tactic names used by the standard browser-backed set, in declaration order.
pub const DEFAULT_TACTIC_NAMES: &[&str] = &[
    "headless-browser",
    "mobile-emulation",
    "proxy-rotation",
    "session-reuse",
    "api-endpoint-discovery",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Upper bound for one tactic attempt.
    pub attempt_timeout_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessMethod {
    Tactic(String),
    Simulation,
    Error,
}

impl AccessMethod {
    pub fn as_str(&self) -> &str {
        match self {
            AccessMethod::Tactic(name) => name,
            AccessMethod::Simulation => "simulation",
            AccessMethod::Error => "error",
        }
    }
}

impl Serialize for AccessMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessOutcome {
    pub success: bool,
    pub data: Value,
    pub method: AccessMethod,
    pub timestamp: DateTime<Utc>,
}

impl AccessOutcome {
    pub fn is_synthetic(&self) -> bool {
        self.method == AccessMethod::Simulation
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TacticStats {
    pub attempts: u64,
    pub successes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackStatus {
    pub active: bool,
    pub available_tactics: Vec<String>,
    pub last_resurrection: Option<DateTime<Utc>>,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct EngineState {
    stats: HashMap<String, TacticStats>,
    last_resurrection: Option<DateTime<Utc>>,
}

pub struct FallbackEngine {
    tactics: Vec<Arc<dyn AccessTactic>>,
    config: FallbackConfig,
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for FallbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackEngine")
            .field("tactics", &self.tactic_names())
            .field("config", &self.config)
            .finish()
    }
}

impl FallbackEngine {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            tactics: Vec::new(),
            config,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn with_tactic(mut self, tactic: Arc<dyn AccessTactic>) -> Self {
        self.register(tactic);
        self
    }

    pub fn register(&mut self, tactic: Arc<dyn AccessTactic>) {
        self.tactics.push(tactic);
    }

    pub fn tactic_names(&self) -> Vec<String> {
        self.tactics.iter().map(|t| t.name().to_string()).collect()
    }

    /// Runs the tactics in random order. Never fails; see [`AccessMethod`].
    pub async fn acquire(&self, target: &Url, cancel: &CancelSignal) -> AccessOutcome {
        self.lock_state().last_resurrection = Some(Utc::now());

        let mut order: Vec<Arc<dyn AccessTactic>> = self.tactics.clone();
        order.shuffle(&mut rand::thread_rng());

        let timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        for tactic in order {
            let name = tactic.name().to_string();
            log::debug!("fallback attempting tactic {name} for {target}");

            let result = self.run_attempt(tactic, target, cancel, timeout).await;
            self.record(&name, result.is_ok());

            match result {
                Ok(data) => {
                    log::info!("fallback tactic {name} succeeded");
                    return AccessOutcome {
                        success: true,
                        data,
                        method: AccessMethod::Tactic(name),
                        timestamp: Utc::now(),
                    };
                }
                Err(err) => log::warn!("fallback tactic {name} failed: {err}"),
            }
        }

        log::warn!("all fallback tactics failed for {target}; serving synthetic data");
        self.simulate(target)
    }

    /// Runs one attempt on its own task so a panicking tactic counts as a failure.
    async fn run_attempt(
        &self,
        tactic: Arc<dyn AccessTactic>,
        target: &Url,
        cancel: &CancelSignal,
        timeout: Duration,
    ) -> TacticResult {
        let name = tactic.name().to_string();
        let handle = {
            let target = target.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tactic.attempt(&target, &cancel).await })
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                log::error!("fallback tactic {name} crashed: {err}");
                Err(TacticError::Crashed {
                    tactic: name,
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                abort.abort();
                Err(TacticError::Timeout {
                    tactic: name,
                    timeout_ms: self.config.attempt_timeout_ms,
                })
            }
        }
    }

    fn simulate(&self, target: &Url) -> AccessOutcome {
        match serde_json::to_value(synthetic::generate(target)) {
            Ok(data) => AccessOutcome {
                success: true,
                data,
                method: AccessMethod::Simulation,
                timestamp: Utc::now(),
            },
            Err(err) => {
                log::error!("failed to build synthetic payload: {err}");
                AccessOutcome {
                    success: false,
                    data: Value::Null,
                    method: AccessMethod::Error,
                    timestamp: Utc::now(),
                }
            }
        }
    }

    fn record(&self, name: &str, success: bool) {
        let mut state = self.lock_state();
        let stats = state.stats.entry(name.to_string()).or_default();
        stats.attempts += 1;
        if success {
            stats.successes += 1;
        }
    }

    pub fn stats(&self) -> HashMap<String, TacticStats> {
        self.lock_state().stats.clone()
    }

    pub fn status(&self) -> FallbackStatus {
        let state = self.lock_state();
        let (attempts, successes) = state
            .stats
            .values()
            .fold((0u64, 0u64), |(a, s), st| (a + st.attempts, s + st.successes));

        let success_rate = if attempts > 0 {
            successes as f64 / attempts as f64
        } else if self.tactics.is_empty() {
            0.0
        } else {
            self.tactics
                .iter()
                .map(|t| t.base_success_probability())
                .sum::<f64>()
                / self.tactics.len() as f64
        };

        FallbackStatus {
            active: !self.tactics.is_empty(),
            available_tactics: self.tactic_names(),
            last_resurrection: state.last_resurrection,
            success_rate,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FallbackEngine {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}
