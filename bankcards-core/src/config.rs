//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "crypto": { "key": "base64:...", "transformation": "AES/ECB/PKCS5Padding" },
//!   "card": { "validity": "36" },
//!   "lockTimeoutMs": 5000,
//!   "sweepIntervalSecs": 86400
//! }
//! ```
//! Every field is optional. Environment variables override the file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::DEFAULT_LOCK_TIMEOUT;
use crate::domain::result::Error;
use crate::services::DEFAULT_SWEEP_INTERVAL;

pub const ENV_CRYPTO_KEY: &str = "BANKCARDS_CRYPTO_KEY";
pub const ENV_CRYPTO_TRANSFORMATION: &str = "BANKCARDS_CRYPTO_TRANSFORMATION";
pub const ENV_CARD_VALIDITY: &str = "BANKCARDS_CARD_VALIDITY";
pub const ENV_LOCK_TIMEOUT_MS: &str = "BANKCARDS_LOCK_TIMEOUT_MS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "BANKCARDS_SWEEP_INTERVAL_SECS";

/// Months a new card stays valid when the setting is missing or malformed
pub const DEFAULT_VALIDITY_MONTHS: u32 = 36;

const SETTINGS_FILE: &str = "settings.json";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    crypto: CryptoSettings,
    #[serde(default)]
    card: CardSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sweep_interval_secs: Option<u64>,
    /// Keys this version does not manage, kept on save
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptoSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transformation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardSettings {
    /// Kept as text; parsed leniently by [`Config::validity_months`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validity: Option<String>,
}

/// Effective configuration after environment overrides
#[derive(Clone, Default)]
pub struct Config {
    pub crypto_key: Option<String>,
    pub crypto_transformation: Option<String>,
    pub card_validity: Option<String>,
    pub lock_timeout_ms: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("crypto_key", &self.crypto_key.as_ref().map(|_| "<redacted>"))
            .field("crypto_transformation", &self.crypto_transformation)
            .field("card_validity", &self.card_validity)
            .field("lock_timeout_ms", &self.lock_timeout_ms)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

fn parse_env_u64(name: &str, value: Option<String>) -> Result<Option<u64>> {
    match value {
        Some(raw) => {
            let parsed = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number, got '{}'", name, raw))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

impl Config {
    /// Load config from the data directory, applying process environment overrides
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_with_env(dir, |name| std::env::var(name).ok())
    }

    /// Load config with an explicit environment lookup
    pub fn load_with_env(dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = Self::read_settings(dir)?;

        Ok(Self {
            crypto_key: env(ENV_CRYPTO_KEY).or(raw.crypto.key),
            crypto_transformation: env(ENV_CRYPTO_TRANSFORMATION).or(raw.crypto.transformation),
            card_validity: env(ENV_CARD_VALIDITY).or(raw.card.validity),
            lock_timeout_ms: parse_env_u64(ENV_LOCK_TIMEOUT_MS, env(ENV_LOCK_TIMEOUT_MS))?
                .or(raw.lock_timeout_ms),
            sweep_interval_secs: parse_env_u64(ENV_SWEEP_INTERVAL_SECS, env(ENV_SWEEP_INTERVAL_SECS))?
                .or(raw.sweep_interval_secs),
        })
    }

    fn read_settings(dir: &Path) -> Result<SettingsFile> {
        let settings_path = dir.join(SETTINGS_FILE);
        if !settings_path.exists() {
            return Ok(SettingsFile::default());
        }
        let content = std::fs::read_to_string(&settings_path)
            .with_context(|| format!("failed to read {}", settings_path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid {}", settings_path.display()))
    }

    /// Save config to the data directory, preserving keys it does not manage
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut settings = Self::read_settings(dir)?;

        settings.crypto.key = self.crypto_key.clone();
        settings.crypto.transformation = self.crypto_transformation.clone();
        settings.card.validity = self.card_validity.clone();
        settings.lock_timeout_ms = self.lock_timeout_ms;
        settings.sweep_interval_secs = self.sweep_interval_secs;

        std::fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(dir.join(SETTINGS_FILE), content)?;
        Ok(())
    }

    /// Configured key material, required for anything touching card numbers
    pub fn crypto_key(&self) -> std::result::Result<&str, Error> {
        match self.crypto_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(Error::Config(format!(
                "no card encryption key configured; set crypto.key in {} or {}",
                SETTINGS_FILE, ENV_CRYPTO_KEY
            ))),
        }
    }

    /// Validity period for new cards, falling back to 36 months
    pub fn validity_months(&self) -> u32 {
        let Some(raw) = self.card_validity.as_deref() else {
            return DEFAULT_VALIDITY_MONTHS;
        };
        match raw.trim().parse::<u32>() {
            Ok(months) if months > 0 => months,
            _ => {
                tracing::warn!(
                    "invalid card validity '{}', using default of {} months",
                    raw,
                    DEFAULT_VALIDITY_MONTHS
                );
                DEFAULT_VALIDITY_MONTHS
            }
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn sweep_interval(&self) -> Duration {
        match self.sweep_interval_secs {
            Some(0) => {
                tracing::warn!("sweep interval of 0 seconds ignored, using default");
                DEFAULT_SWEEP_INTERVAL
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_SWEEP_INTERVAL,
        }
    }
}
