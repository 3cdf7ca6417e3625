//! Configuration loading for the review apps service.
//!
//! Loads layered `.env` files and environment variables, producing a typed
//! [`AppConfig`]. Keys are read with the `REVIEW_APP_` prefix; the bare names
//! are accepted as well so that platform-injected variables keep working.

use std::{
    collections::BTreeMap,
    env,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "REVIEW_APP_";

/// Keys also honoured without the prefix.
const BARE_KEYS: &[&str] = &[
    "PROFILE",
    "PORT",
    "BIND_HOST",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "CF_URL",
    "CF_USERNAME",
    "CF_PASSWORD",
    "CF_BINARY",
    "CF_ORG",
    "BROKER_USERNAME",
    "BROKER_PASSWORD",
    "DATABASE_URL",
    "DB_MAX_CONNECTIONS",
    "DB_ACQUIRE_TIMEOUT_MS",
    "BASE_URL",
    "GITHUB_API_BASE",
    "SERVICE_POLL_INTERVAL_SECONDS",
    "SERVICE_POLL_TIMEOUT_SECONDS",
    "COMMAND_TIMEOUT_SECONDS",
    "HOOK_SECRET",
    "GH_TOKEN",
    "CRYPTO_KEY",
];

/// Application configuration, constructed once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub cf_url: String,
    #[serde(default)]
    pub cf_username: String,
    #[serde(default)]
    pub cf_password: String,
    #[serde(default = "default_cf_binary")]
    pub cf_binary: String,
    #[serde(default)]
    pub broker_username: String,
    #[serde(default)]
    pub broker_password: String,
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,
    #[serde(default = "default_service_poll_interval_seconds")]
    pub service_poll_interval_seconds: u64,
    #[serde(default = "default_service_poll_timeout_seconds")]
    pub service_poll_timeout_seconds: u64,
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
    /// Shared secret for the single-tenant `/hook` endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_secret: Option<String>,
    /// GitHub token used by the single-tenant `/hook` endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gh_token: Option<String>,
    /// Platform organization id targeted by the single-tenant `/hook` endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cf_org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
}

/// Settings for the legacy single-tenant webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleTenantConfig {
    pub hook_secret: String,
    pub github_token: String,
    pub org_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            bind_host: default_bind_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            cf_url: String::new(),
            cf_username: String::new(),
            cf_password: String::new(),
            cf_binary: default_cf_binary(),
            broker_username: String::new(),
            broker_password: String::new(),
            database_url: String::new(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            base_url: String::new(),
            github_api_base: default_github_api_base(),
            service_poll_interval_seconds: default_service_poll_interval_seconds(),
            service_poll_timeout_seconds: default_service_poll_timeout_seconds(),
            command_timeout_seconds: default_command_timeout_seconds(),
            hook_secret: None,
            gh_token: None,
            cf_org: None,
            crypto_key: None,
        }
    }
}

impl AppConfig {
    /// Returns the socket address the HTTP server binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.bind_host, self.port).parse()
    }

    pub fn service_poll_interval(&self) -> Duration {
        Duration::from_secs(self.service_poll_interval_seconds)
    }

    pub fn service_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.service_poll_timeout_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// Single-tenant settings, present only when all three values are configured.
    pub fn single_tenant(&self) -> Option<SingleTenantConfig> {
        match (&self.hook_secret, &self.gh_token, &self.cf_org) {
            (Some(hook_secret), Some(github_token), Some(org_id)) => Some(SingleTenantConfig {
                hook_secret: hook_secret.clone(),
                github_token: github_token.clone(),
                org_id: org_id.clone(),
            }),
            _ => None,
        }
    }

    /// Serializes the configuration with every credential masked.
    pub fn redacted_json(&self) -> Result<String, serde_json::Error> {
        let mut config = self.clone();
        let redacted = "[REDACTED]".to_string();

        if !config.cf_password.is_empty() {
            config.cf_password = redacted.clone();
        }
        if !config.broker_password.is_empty() {
            config.broker_password = redacted.clone();
        }
        if !config.database_url.is_empty() {
            config.database_url = redact_url_credentials(&config.database_url);
        }
        if config.hook_secret.is_some() {
            config.hook_secret = Some(redacted.clone());
        }
        if config.gh_token.is_some() {
            config.gh_token = Some(redacted);
        }
        // Key bytes are never printed, not even masked.
        config.crypto_key = None;

        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("CF_URL", &self.cf_url),
            ("CF_USERNAME", &self.cf_username),
            ("CF_PASSWORD", &self.cf_password),
            ("BROKER_USERNAME", &self.broker_username),
            ("BROKER_PASSWORD", &self.broker_password),
            ("DATABASE_URL", &self.database_url),
            ("BASE_URL", &self.base_url),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing { key });
            }
        }

        url::Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            key: "BASE_URL",
            value: self.base_url.clone(),
            source,
        })?;
        url::Url::parse(&self.github_api_base).map_err(|source| ConfigError::InvalidUrl {
            key: "GITHUB_API_BASE",
            value: self.github_api_base.clone(),
            source,
        })?;

        let single_tenant_keys = [
            self.hook_secret.is_some(),
            self.gh_token.is_some(),
            self.cf_org.is_some(),
        ];
        let configured = single_tenant_keys.iter().filter(|set| **set).count();
        if configured != 0 && configured != single_tenant_keys.len() {
            return Err(ConfigError::PartialSingleTenant);
        }

        if self.service_poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        if let Some(ref key) = self.crypto_key
            && key.len() != 32
        {
            return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
        }

        Ok(())
    }
}

fn redact_url_credentials(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("[REDACTED]"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "[REDACTED]".to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_cf_binary() -> String {
    "cf".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_service_poll_interval_seconds() -> u64 {
    5
}

fn default_service_poll_timeout_seconds() -> u64 {
    30
}

fn default_command_timeout_seconds() -> u64 {
    600 // 10 minutes, covers slow staging during push
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("required setting {key} is missing; set {key} or REVIEW_APP_{key}")]
    Missing { key: &'static str },
    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid URL '{value}' for {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("invalid bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: AddrParseError,
    },
    #[error("HOOK_SECRET, GH_TOKEN and CF_ORG must be configured together")]
    PartialSingleTenant,
    #[error("service poll interval must be positive")]
    InvalidPollInterval,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
}

/// Loads configuration using layered `.env` files and environment variables.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

/// Values gathered from every layer, split by naming style so prefixed keys win.
#[derive(Default)]
struct Layered {
    prefixed: BTreeMap<String, String>,
    bare: BTreeMap<String, String>,
}

impl Layered {
    fn absorb(&mut self, key: &str, value: String) {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            self.prefixed.insert(stripped.to_string(), value);
        } else if BARE_KEYS.contains(&key) {
            self.bare.insert(key.to_string(), value);
        }
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.prefixed.get(key).or_else(|| self.bare.get(key))
    }

    fn take(&mut self, key: &str) -> Option<String> {
        let prefixed = self.prefixed.remove(key);
        let bare = self.bare.remove(key);
        prefixed.or(bare).filter(|v| !v.trim().is_empty())
    }

    fn take_parsed<T: std::str::FromStr>(
        &mut self,
        key: &'static str,
    ) -> Result<Option<T>, ConfigError> {
        self.take(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { key, value })
            })
            .transpose()
    }
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            layered.absorb(&key, value);
        }

        let crypto_key = match layered.take("CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                let decoded = general_purpose::STANDARD
                    .decode(key_str.trim())
                    .map_err(|e| ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    })?;
                Some(decoded)
            }
            None => None,
        };

        let config = AppConfig {
            profile: layered.take("PROFILE").unwrap_or(profile_hint),
            bind_host: layered.take("BIND_HOST").unwrap_or_else(default_bind_host),
            port: layered.take_parsed("PORT")?.unwrap_or_else(default_port),
            log_level: layered.take("LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: layered.take("LOG_FORMAT").unwrap_or_else(default_log_format),
            cf_url: layered.take("CF_URL").unwrap_or_default(),
            cf_username: layered.take("CF_USERNAME").unwrap_or_default(),
            cf_password: layered.take("CF_PASSWORD").unwrap_or_default(),
            cf_binary: layered.take("CF_BINARY").unwrap_or_else(default_cf_binary),
            broker_username: layered.take("BROKER_USERNAME").unwrap_or_default(),
            broker_password: layered.take("BROKER_PASSWORD").unwrap_or_default(),
            database_url: layered.take("DATABASE_URL").unwrap_or_default(),
            db_max_connections: layered
                .take_parsed("DB_MAX_CONNECTIONS")?
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: layered
                .take_parsed("DB_ACQUIRE_TIMEOUT_MS")?
                .unwrap_or_else(default_db_acquire_timeout_ms),
            base_url: layered.take("BASE_URL").unwrap_or_default(),
            github_api_base: layered
                .take("GITHUB_API_BASE")
                .unwrap_or_else(default_github_api_base),
            service_poll_interval_seconds: layered
                .take_parsed("SERVICE_POLL_INTERVAL_SECONDS")?
                .unwrap_or_else(default_service_poll_interval_seconds),
            service_poll_timeout_seconds: layered
                .take_parsed("SERVICE_POLL_TIMEOUT_SECONDS")?
                .unwrap_or_else(default_service_poll_timeout_seconds),
            command_timeout_seconds: layered
                .take_parsed("COMMAND_TIMEOUT_SECONDS")?
                .unwrap_or_else(default_command_timeout_seconds),
            hook_secret: layered.take("HOOK_SECRET"),
            gh_token: layered.take("GH_TOKEN"),
            cf_org: layered.take("CF_ORG"),
            crypto_key,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: format!("{}:{}", config.bind_host, config.port),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(Layered, String), ConfigError> {
        let mut values = Layered::default();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| env::var("PROFILE").ok())
            .or_else(|| values.get("PROFILE").cloned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(&self, path: PathBuf, values: &mut Layered) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    values.absorb(&key, value);
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
