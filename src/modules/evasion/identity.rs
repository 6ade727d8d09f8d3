//! Identity pools and the stealth injection script.
//!
//! An [`Identity`] is the user-agent, viewport, and header set a session
//! presents. Pools are fixed; rotation only ever picks from them.

use http::{HeaderMap, HeaderName, HeaderValue};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Linux; Android 13; Pixel 7 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
];

const DESKTOP_VIEWPORTS: &[Viewport] = &[
    Viewport::desktop(1366, 768),
    Viewport::desktop(1920, 1080),
    Viewport::desktop(1440, 900),
    Viewport::desktop(1536, 864),
];

const MOBILE_VIEWPORTS: &[Viewport] = &[Viewport::mobile(412, 915), Viewport::mobile(390, 844)];

const ACCEPT_LANGUAGES: &[&str] = &[
    "pt-BR,pt;q=0.9,en;q=0.8",
    "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7",
];

const BASE_HEADERS: &[(&str, &str)] = &[
    ("accept-encoding", "gzip, deflate, br"),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("upgrade-insecure-requests", "1"),
];

/// Properties removed from `window` and `navigator` before page scripts run.
const AUTOMATION_PROPERTIES: &[&str] = &["webdriver", "selenium", "puppeteer", "cypress", "playwright"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub is_mobile: bool,
}

impl Viewport {
    pub const fn desktop(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            is_mobile: false,
        }
    }

    pub const fn mobile(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            is_mobile: true,
        }
    }
}

/// Browser persona applied to a session as one unit.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub viewport: Viewport,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl Identity {
    /// Draws a fresh identity from the fixed pools.
    pub fn random(class: DeviceClass) -> Self {
        let mut rng = rand::thread_rng();
        let (agents, viewports) = match class {
            DeviceClass::Desktop => (DESKTOP_USER_AGENTS, DESKTOP_VIEWPORTS),
            DeviceClass::Mobile => (MOBILE_USER_AGENTS, MOBILE_VIEWPORTS),
        };

        let user_agent = agents.choose(&mut rng).copied().unwrap_or(DESKTOP_USER_AGENTS[0]);
        let viewport = viewports.choose(&mut rng).copied().unwrap_or(DESKTOP_VIEWPORTS[0]);
        let language = ACCEPT_LANGUAGES.choose(&mut rng).copied().unwrap_or(ACCEPT_LANGUAGES[0]);

        Self {
            user_agent: user_agent.to_string(),
            viewport,
            headers: stealth_headers(language),
        }
    }
}

/// Header set sent alongside every rotated identity.
pub fn stealth_headers(accept_language: &str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(BASE_HEADERS.len() + 1);
    for &(name, value) in BASE_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    let language = HeaderValue::from_str(accept_language)
        .unwrap_or_else(|_| HeaderValue::from_static("pt-BR,pt;q=0.9,en;q=0.8"));
    headers.insert(http::header::ACCEPT_LANGUAGE, language);
    headers
}

/// Navigator values substituted by the stealth script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthProfile {
    pub hardware_concurrency: u32,
    pub device_memory_gb: u32,
    pub languages: Vec<String>,
    pub plugin_count: u32,
}

impl Default for StealthProfile {
    fn default() -> Self {
        Self {
            hardware_concurrency: 8,
            device_memory_gb: 8,
            languages: vec!["pt-BR".into(), "pt".into(), "en-US".into(), "en".into()],
            plugin_count: 5,
        }
    }
}

impl StealthProfile {
    /// Script injected before any page script runs.
    pub fn script(&self) -> String {
        let properties = json_array(AUTOMATION_PROPERTIES.iter().map(|p| p.to_string()));
        let languages = json_array(self.languages.iter().cloned());
        let plugins = json_array((1..=self.plugin_count).map(|n| n.to_string()));

        format!(
            r#"(() => {{
  const proto = Object.getPrototypeOf(navigator);
  for (const prop of {properties}) {{
    try {{ delete window[prop]; }} catch (_) {{}}
    try {{ delete navigator[prop]; }} catch (_) {{}}
    try {{ delete proto[prop]; }} catch (_) {{}}
  }}
  Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
  Object.defineProperty(window, 'chrome', {{ get: () => undefined }});
  Object.defineProperty(navigator, 'plugins', {{ get: () => {plugins} }});
  Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});
  Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {cores} }});
  Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {memory} }});
}})();"#,
            cores = self.hardware_concurrency,
            memory = self.device_memory_gb,
        )
    }
}

fn json_array(items: impl Iterator<Item = String>) -> String {
    serde_json::Value::Array(items.map(serde_json::Value::String).collect()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_identities_come_from_pools() {
        for _ in 0..20 {
            let desktop = Identity::random(DeviceClass::Desktop);
            assert!(DESKTOP_USER_AGENTS.contains(&desktop.user_agent.as_str()));
            assert!(DESKTOP_VIEWPORTS.contains(&desktop.viewport));
            assert!(desktop.headers.contains_key(http::header::ACCEPT_LANGUAGE));

            let mobile = Identity::random(DeviceClass::Mobile);
            assert!(mobile.viewport.is_mobile);
        }
    }

    #[test]
    fn stealth_script_carries_profile_values() {
        let script = StealthProfile::default().script();
        assert!(script.contains("'hardwareConcurrency', { get: () => 8 }"));
        assert!(script.contains("'deviceMemory', { get: () => 8 }"));
        assert!(script.contains(r#"["pt-BR","pt","en-US","en"]"#));
        assert!(script.contains("\"webdriver\""));
        assert!(script.contains("\"playwright\""));
    }
}
