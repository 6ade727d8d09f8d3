//! Credential vault.
//!
//! Seals bank credentials (or any serializable payload) into authenticated
//! envelopes, hashes operator passwords, and performs the structural checks
//! that run before credentials are stored.

mod audit;

pub use audit::{AuditRecord, AuditSink, LogAuditSink, SecurityEnvironment, SecurityReport};

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use once_cell::sync::Lazy;
use rand::RngCore;
use rand::rngs::OsRng;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

/// Environment variable holding the process-wide master secret.
pub const MASTER_SECRET_ENV: &str = "RPA_ENCRYPTION_KEY";

const FALLBACK_SECRET: &str = "insecure-development-key-do-not-use-in-production";
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const PASSWORD_SALT_LEN: usize = 16;
const PASSWORD_HASH_LEN: usize = 64;
const MAX_INPUT_CHARS: usize = 1000;

/// AES-256-GCM with the 16-byte IV layout used by stored envelopes.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

static SESSION_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("valid session token regex"));

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed")]
    Encryption,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// Authentication tag mismatch. Never retry: treat as a compromise signal.
    #[error("envelope failed authentication (tampered data or wrong master secret)")]
    Tampered,
    #[error("credentials rejected: {}", .0.join("; "))]
    InvalidCredentials(Vec<String>),
}

impl VaultError {
    pub fn is_tamper(&self) -> bool {
        matches!(self, VaultError::Tampered)
    }
}

/// Key material used to derive per-envelope encryption keys.
pub struct MasterSecret {
    bytes: Zeroizing<Vec<u8>>,
    fallback: bool,
}

impl MasterSecret {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            bytes: Zeroizing::new(secret.as_ref().to_vec()),
            fallback: false,
        }
    }

    /// Reads [`MASTER_SECRET_ENV`], degrading to a development key when unset.
    pub fn from_env() -> Self {
        match std::env::var(MASTER_SECRET_ENV) {
            Ok(value) if !value.is_empty() => Self::new(value),
            _ => {
                log::warn!(
                    "{MASTER_SECRET_ENV} is not set; using an INSECURE fallback key. Never run production traffic with this configuration."
                );
                Self::insecure_fallback()
            }
        }
    }

    pub fn insecure_fallback() -> Self {
        Self {
            bytes: Zeroizing::new(FALLBACK_SECRET.as_bytes().to_vec()),
            fallback: true,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"<redacted>")
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Scrypt cost parameters. Defaults to N=2^14, r=8, p=1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub scrypt_log_n: u8,
    pub scrypt_r: u32,
    pub scrypt_p: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            scrypt_log_n: 14,
            scrypt_r: 8,
            scrypt_p: 1,
        }
    }
}

impl VaultConfig {
    fn derive(&self, secret: &[u8], salt: &[u8], output: &mut [u8]) -> VaultResult<()> {
        let params = scrypt::Params::new(self.scrypt_log_n, self.scrypt_r, self.scrypt_p, output.len())
            .map_err(|err| VaultError::KeyDerivation(err.to_string()))?;
        scrypt::scrypt(secret, salt, &params, output)
            .map_err(|err| VaultError::KeyDerivation(err.to_string()))
    }
}

/// Sealed payload. All fields are lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub iv: String,
    /// Ciphertext followed by the 16-byte authentication tag.
    pub encrypted_data: String,
    pub salt: String,
}

/// Bank login material as submitted by operators.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankCredentials {
    pub username: String,
    pub password: String,
    pub bank_url: String,
}

impl BankCredentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        bank_url: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            bank_url: bank_url.into(),
        }
    }
}

impl fmt::Debug for BankCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BankCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("bank_url", &self.bank_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Envelope encryption, password hashing, and credential hygiene helpers.
pub struct CredentialVault {
    secret: MasterSecret,
    config: VaultConfig,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("secret", &self.secret)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(secret: MasterSecret, config: VaultConfig) -> Self {
        Self {
            secret,
            config,
            audit: Arc::new(LogAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn from_env(config: VaultConfig) -> Self {
        Self::new(MasterSecret::from_env(), config)
    }

    pub fn uses_fallback_secret(&self) -> bool {
        self.secret.is_fallback()
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> VaultResult<EncryptedEnvelope> {
        let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let cipher = self.cipher(&salt)?;
        let sealed = cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_slice())
            .map_err(|_| VaultError::Encryption)?;

        Ok(EncryptedEnvelope {
            iv: hex::encode(iv),
            encrypted_data: hex::encode(sealed),
            salt: hex::encode(salt),
        })
    }

    pub fn decrypt<T: DeserializeOwned>(&self, envelope: &EncryptedEnvelope) -> VaultResult<T> {
        let salt = decode_field("salt", &envelope.salt)?;
        let iv = decode_field("iv", &envelope.iv)?;
        let sealed = decode_field("encryptedData", &envelope.encrypted_data)?;

        if salt.len() != SALT_LEN {
            return Err(VaultError::MalformedEnvelope(format!(
                "salt must be {SALT_LEN} bytes, got {}",
                salt.len()
            )));
        }
        if iv.len() != IV_LEN {
            return Err(VaultError::MalformedEnvelope(format!(
                "iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        if sealed.len() < TAG_LEN {
            return Err(VaultError::MalformedEnvelope(
                "encryptedData shorter than the authentication tag".into(),
            ));
        }

        let cipher = self.cipher(&salt)?;
        let plaintext = cipher
            .decrypt(Nonce::<U16>::from_slice(&iv), sealed.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| {
                log::error!("credential envelope failed authentication; possible tampering");
                VaultError::Tampered
            })?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Salted scrypt hash stored as `salt:hash`.
    pub fn hash_password(&self, password: &str) -> VaultResult<String> {
        let mut salt = [0u8; PASSWORD_SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let salt_hex = hex::encode(salt);

        let mut hash = [0u8; PASSWORD_HASH_LEN];
        self.config
            .derive(password.as_bytes(), salt_hex.as_bytes(), &mut hash)?;
        Ok(format!("{salt_hex}:{}", hex::encode(hash)))
    }

    /// Timing-safe verification; malformed stored values never verify.
    pub fn verify_password(&self, password: &str, stored: &str) -> bool {
        let Some((salt_hex, hash_hex)) = stored.split_once(':') else {
            return false;
        };
        let Ok(expected) = hex::decode(hash_hex) else {
            return false;
        };
        if expected.is_empty() {
            return false;
        }

        let mut candidate = vec![0u8; expected.len()];
        if self
            .config
            .derive(password.as_bytes(), salt_hex.as_bytes(), &mut candidate)
            .is_err()
        {
            return false;
        }
        bool::from(candidate.as_slice().ct_eq(expected.as_slice()))
    }

    /// Hands an audit record to the configured sink.
    pub fn log_audit_event(&self, event: &str, user_id: &str, details: Value) {
        self.audit.record(&AuditRecord::new(event, user_id, details));
    }

    pub fn check_security_environment(&self) -> SecurityReport {
        let mut report = SecurityEnvironment::from_env().check();
        if self.secret.is_fallback() {
            report.is_secure = false;
            report
                .warnings
                .push("vault is running on the fallback master secret".to_string());
        }
        report
    }

    fn cipher(&self, salt: &[u8]) -> VaultResult<Aes256Gcm16> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        self.config.derive(self.secret.expose(), salt, key.as_mut_slice())?;
        Aes256Gcm16::new_from_slice(key.as_slice())
            .map_err(|err| VaultError::KeyDerivation(err.to_string()))
    }
}

fn decode_field(name: &str, value: &str) -> VaultResult<Vec<u8>> {
    hex::decode(value).map_err(|err| VaultError::MalformedEnvelope(format!("{name}: {err}")))
}

/// Structural checks run before credentials are sealed.
pub fn validate_bank_credentials(credentials: &BankCredentials) -> CredentialValidation {
    let mut errors = Vec::new();

    if credentials.username.trim().chars().count() < 3 {
        errors.push("username must have at least 3 characters".to_string());
    }

    if credentials.password.chars().count() < 6 {
        errors.push("password must have at least 6 characters".to_string());
    }

    if !is_https_url(&credentials.bank_url) {
        errors.push("bank URL must be a well-formed https:// URL".to_string());
    }

    CredentialValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

fn is_https_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| url.scheme() == "https" && url.host_str().is_some())
        .unwrap_or(false)
}

/// Trims, strips angle brackets, and caps free-form input at 1000 characters.
pub fn sanitize_input(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(MAX_INPUT_CHARS)
        .collect()
}

pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn validate_session_token(token: &str) -> bool {
    SESSION_TOKEN_RE.is_match(token)
}
