//! Synthetic account data returned when every access tactic failed.
//!
//! Payloads are always tagged `synthetic: true` so downstream consumers can
//! tell them apart from scraped data.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use url::Url;

const UNKNOWN_BANK: &str = "Banco Desconhecido";

const BANK_NAMES: &[(&[&str], &str)] = &[
    (&["itau"], "Itaú"),
    (&["bancodobrasil", "bb."], "Banco do Brasil"),
    (&["santander"], "Santander"),
    (&["nubank"], "Nubank"),
    (&["bradesco"], "Bradesco"),
    (&["caixa"], "Caixa Econômica Federal"),
];

const DESCRIPTIONS: &[&str] = &[
    "Transferência PIX",
    "Pagamento de boleto",
    "Compra no cartão de débito",
    "Depósito",
    "Saque",
    "TED recebida",
    "Tarifa bancária",
    "Rendimento poupança",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyntheticTransaction {
    pub id: String,
    pub date: DateTime<Utc>,
    pub description: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticAccount {
    pub bank_name: String,
    pub balance: f64,
    pub transactions: Vec<SyntheticTransaction>,
    pub last_sync: DateTime<Utc>,
    pub status: &'static str,
    pub synthetic: bool,
}

/// Maps a target URL to a display bank name.
pub fn bank_name_for(target: &Url) -> &'static str {
    let host = target.host_str().unwrap_or_default().to_lowercase();
    let haystack = format!("{host}{}", target.path().to_lowercase());

    BANK_NAMES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| haystack.contains(needle)))
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_BANK)
}

pub fn generate(target: &Url) -> SyntheticAccount {
    generate_at(target, Utc::now())
}

pub fn generate_at(target: &Url, now: DateTime<Utc>) -> SyntheticAccount {
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(5..15);

    let mut transactions: Vec<SyntheticTransaction> = (0..count)
        .map(|_| {
            let age = ChronoDuration::seconds(rng.gen_range(0..30 * 24 * 3600));
            let description = DESCRIPTIONS
                .choose(&mut rng)
                .copied()
                .unwrap_or(DESCRIPTIONS[0]);
            SyntheticTransaction {
                id: format!("txn_{}", rng.gen_range(100_000_000u64..1_000_000_000)),
                date: now - age,
                description: description.to_string(),
                amount: round_cents(rng.gen_range(10.0..1010.0)),
                kind: if rng.gen_bool(0.5) {
                    TransactionKind::Credit
                } else {
                    TransactionKind::Debit
                },
            }
        })
        .collect();
    transactions.sort_by(|a, b| b.date.cmp(&a.date));

    SyntheticAccount {
        bank_name: bank_name_for(target).to_string(),
        balance: round_cents(rng.gen_range(1000.0..11000.0)),
        transactions,
        last_sync: now,
        status: "active",
        synthetic: true,
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn maps_known_banks() {
        assert_eq!(bank_name_for(&url("https://www.itau.com.br/login")), "Itaú");
        assert_eq!(bank_name_for(&url("https://bb.com.br")), "Banco do Brasil");
        assert_eq!(
            bank_name_for(&url("https://www.bancodobrasil.com.br")),
            "Banco do Brasil"
        );
        assert_eq!(bank_name_for(&url("https://app.nubank.com.br")), "Nubank");
        assert_eq!(bank_name_for(&url("https://example.org")), UNKNOWN_BANK);
    }

    #[test]
    fn synthetic_account_is_tagged_and_bounded() {
        let now = Utc::now();
        let account = generate_at(&url("https://www.santander.com.br"), now);

        assert!(account.synthetic);
        assert_eq!(account.bank_name, "Santander");
        assert!((1000.0..11000.0).contains(&account.balance));
        assert!((5..=14).contains(&account.transactions.len()));

        for pair in account.transactions.windows(2) {
            assert!(pair[0].date >= pair[1].date);
        }
        for txn in &account.transactions {
            assert!(txn.id.starts_with("txn_"));
            assert!((10.0..1010.0).contains(&txn.amount));
            assert!(txn.date <= now && txn.date > now - ChronoDuration::days(30));
        }

        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value["synthetic"], true);
        assert_eq!(value["status"], "active");
        assert!(value["transactions"][0]["type"].is_string());
    }
}
