use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Environment variable names for secrets. Secrets never live in the
/// config file; they are resolved through a CredentialProvider at the
/// point of use.
pub mod keys {
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const GMAIL_SENDER_EMAIL: &str = "GMAIL_SENDER_EMAIL";
    pub const GMAIL_APP_PASSWORD: &str = "GMAIL_APP_PASSWORD";
    pub const GMAIL_API_TOKEN: &str = "GMAIL_API_TOKEN";
}

/// Resolves secrets by name. Kept separate from AgentConfig so search
/// parameters and credentials never travel in the same structure.
pub trait CredentialProvider {
    fn try_get(&self, key: &str) -> Option<String>;

    fn get(&self, key: &str) -> Result<String, ConfigError> {
        self.try_get(key)
            .ok_or_else(|| ConfigError::MissingCredential(key.to_string()))
    }
}

/// Reads credentials from the process environment.
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn try_get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

/// A job board to scrape over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    pub base_url: String,
}

/// IMAP job-alert ingestion settings. The account password comes from the
/// credential provider, not from here.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailAlertConfig {
    #[serde(default = "default_imap_server")]
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn default_imap_server() -> String {
    "imap.gmail.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

fn default_lookback_days() -> u32 {
    7
}

/// Retry and throttling knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Minimum spacing between calls to one source, failures or not.
    pub min_call_interval_ms: u64,
    /// Consecutive failures before a source is skipped for the run.
    pub circuit_threshold: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            min_call_interval_ms: 1_500,
            circuit_threshold: 3,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: 0.1,
        }
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }
}

/// Search parameters and pipeline knobs, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    /// Monthly AED floor for outreach eligibility. None disables the gate.
    #[serde(default)]
    pub min_salary_aed: Option<i64>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name signed under outgoing cold emails.
    #[serde(default = "default_applicant_name")]
    pub applicant_name: String,
    /// Base resume / profile file fed to the tailoring service.
    pub profile_path: PathBuf,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub boards: Vec<BoardConfig>,
    #[serde(default)]
    pub email_alerts: Option<EmailAlertConfig>,
    /// Jaro-Winkler floor for the near-duplicate guard; null disables it.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_dedup_threshold: Option<f64>,
    /// Extra title abbreviations folded during normalization.
    #[serde(default)]
    pub title_aliases: HashMap<String, String>,
    /// Extra currency-to-AED rates, merged over the built-in table.
    #[serde(default)]
    pub currency_rates: HashMap<String, f64>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet".to_string()
}

fn default_applicant_name() -> String {
    "Job Applicant".to_string()
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_fuzzy_threshold() -> Option<f64> {
    Some(0.95)
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        let config: AgentConfig = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keywords.is_empty() {
            return Err(ConfigError::Invalid("keywords must not be empty".into()));
        }
        if self.locations.is_empty() {
            return Err(ConfigError::Invalid("locations must not be empty".into()));
        }
        if let Some(t) = self.fuzzy_dedup_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::Invalid(format!(
                    "fuzzy_dedup_threshold must be between 0 and 1, got {t}"
                )));
            }
        }
        if self.boards.is_empty() && self.email_alerts.is_none() {
            return Err(ConfigError::Invalid(
                "at least one source (boards or email_alerts) must be configured".into(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn alias_pairs(&self) -> Vec<(String, String)> {
        self.title_aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
