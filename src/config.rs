//! Configuration loader and validator for the daily digest service.
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub llm: Llm,
    pub whatsapp: WhatsApp,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub timezone: String,
    pub refresh_interval_secs: u64,
    pub default_language: String,
    #[serde(default = "default_readings_limit")]
    pub readings_limit: i64,
}

fn default_readings_limit() -> i64 {
    10
}

/// Chat-completions endpoint used to compose and translate messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Llm {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

/// WhatsApp Cloud API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhatsApp {
    pub base_url: String,
    pub api_version: String,
    pub phone_number_id: String,
    #[serde(default)]
    pub token: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite location inside the data directory.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/farm_digest.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.app
            .timezone
            .parse()
            .map_err(|_| ConfigError::Invalid("app.timezone must be an IANA zone name"))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.app.refresh_interval_secs)
    }

    /// Overlay secrets from the environment; `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.llm.api_key = key;
        }
        if let Some(token) = lookup("WHATSAPP_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.whatsapp.token = token;
        }
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env(|name| std::env::var(name).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    cfg.timezone()?;
    if cfg.app.refresh_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.refresh_interval_secs must be > 0"));
    }
    if cfg.app.default_language.trim().is_empty() {
        return Err(ConfigError::Invalid("app.default_language must be non-empty"));
    }
    if !(1..=100).contains(&cfg.app.readings_limit) {
        return Err(ConfigError::Invalid("app.readings_limit must be within 1..=100"));
    }

    if cfg.llm.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.base_url must be non-empty"));
    }
    if cfg.llm.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.api_key must be non-empty (or set OPENAI_API_KEY)"));
    }
    if cfg.llm.model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.model must be non-empty"));
    }

    if cfg.whatsapp.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("whatsapp.base_url must be non-empty"));
    }
    if cfg.whatsapp.api_version.trim().is_empty() {
        return Err(ConfigError::Invalid("whatsapp.api_version must be non-empty"));
    }
    if cfg.whatsapp.phone_number_id.trim().is_empty() {
        return Err(ConfigError::Invalid("whatsapp.phone_number_id must be non-empty"));
    }
    if cfg.whatsapp.token.trim().is_empty() {
        return Err(ConfigError::Invalid("whatsapp.token must be non-empty (or set WHATSAPP_TOKEN)"));
    }

    Ok(())
}

/// Example configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  timezone: "Asia/Karachi"
  refresh_interval_secs: 60
  default_language: "English"
  readings_limit: 10

llm:
  base_url: "https://api.openai.com/"
  api_key: "YOUR_OPENAI_API_KEY"
  model: "gpt-4o"

whatsapp:
  base_url: "https://graph.facebook.com/"
  api_version: "v20.0"
  phone_number_id: "YOUR_PHONE_NUMBER_ID"
  token: "YOUR_WHATSAPP_TOKEN"
"#
}
