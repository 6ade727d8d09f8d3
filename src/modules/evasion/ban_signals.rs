//! Ban-signal detection over rendered page content.

use serde::{Deserialize, Serialize};

/// Phrases that indicate the target flagged or blocked the session.
pub const BAN_PHRASES: &[&str] = &[
    "access denied",
    "blocked",
    "suspicious activity",
    "captcha",
    "verify you are human",
    "too many requests",
    "rate limit exceeded",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_match_count(matches: usize) -> Self {
        if matches > 3 {
            RiskLevel::High
        } else if matches > 1 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanSignalReport {
    pub is_banned: bool,
    pub signals: Vec<String>,
    pub risk_level: RiskLevel,
}

impl BanSignalReport {
    pub fn clean() -> Self {
        Self {
            is_banned: false,
            signals: Vec::new(),
            risk_level: RiskLevel::Low,
        }
    }
}

/// Case-insensitive substring scan of `content` and `url` against [`BAN_PHRASES`].
pub fn detect_ban_signals(content: &str, url: &str) -> BanSignalReport {
    let content = content.to_lowercase();
    let url = url.to_lowercase();

    let signals: Vec<String> = BAN_PHRASES
        .iter()
        .filter(|phrase| content.contains(**phrase) || url.contains(**phrase))
        .map(|phrase| phrase.to_string())
        .collect();

    BanSignalReport {
        is_banned: !signals.is_empty(),
        risk_level: RiskLevel::from_match_count(signals.len()),
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_phrases_is_high_risk() {
        let page = "Access Denied. Suspicious activity detected. Solve the CAPTCHA. Too many requests.";
        let report = detect_ban_signals(page, "https://bank.example.com/home");
        assert!(report.is_banned);
        assert_eq!(report.signals.len(), 4);
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn two_phrases_is_medium_risk() {
        let report = detect_ban_signals("You have been blocked: too many requests", "https://a.example");
        assert_eq!(report.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn single_phrase_is_low_but_banned() {
        let report = detect_ban_signals("<div>captcha</div>", "https://a.example");
        assert!(report.is_banned);
        assert_eq!(report.risk_level, RiskLevel::Low);
    }

    #[test]
    fn clean_page_reports_nothing() {
        let report = detect_ban_signals("<h1>Saldo disponível</h1>", "https://a.example/extrato");
        assert_eq!(report, BanSignalReport::clean());
    }

    #[test]
    fn url_contributes_signals() {
        let report = detect_ban_signals("", "https://bank.example.com/BLOCKED?reason=x");
        assert_eq!(report.signals, vec!["blocked".to_string()]);
    }
}
