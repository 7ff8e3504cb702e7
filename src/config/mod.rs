//! Configuration loading for stockpile.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `STOCKPILE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "STOCKPILE_";
const SLOT_OVERRIDE_PREFIX: &str = "SLOT_OVERRIDE_";

/// Application configuration derived from `STOCKPILE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    /// Blob storage location, e.g. `file:///var/lib/stockpile` or `mem://`
    #[serde(default = "default_storage_location")]
    pub storage_location: String,
    /// Largest archive accepted by the upload endpoint
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub workers: WorkerPoolsConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

/// Settings for one worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerPoolConfig {
    /// Number of polling loops; 0 selects the built-in default of 2
    pub max_concurrency: usize,
    /// Idle sleep after an empty poll
    pub poll_interval_ms: u64,
    /// Ceiling for the idle back-off
    pub max_poll_interval_ms: u64,
    /// Lease granted on claim and on every renewal
    pub lease_seconds: u64,
}

impl WorkerPoolConfig {
    const fn with_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            poll_interval_ms: 1_000,
            max_poll_interval_ms: 30_000,
            lease_seconds: 300,
        }
    }

    pub fn validate(&self, stage: &'static str) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 || self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(ConfigError::InvalidPollInterval {
                stage,
                poll_ms: self.poll_interval_ms,
                max_ms: self.max_poll_interval_ms,
            });
        }
        if self.lease_seconds < 10 {
            return Err(ConfigError::InvalidLease {
                stage,
                value: self.lease_seconds,
            });
        }
        Ok(())
    }
}

/// One pool per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerPoolsConfig {
    pub export: WorkerPoolConfig,
    pub import: WorkerPoolConfig,
    pub restore: WorkerPoolConfig,
}

impl Default for WorkerPoolsConfig {
    fn default() -> Self {
        Self {
            export: WorkerPoolConfig::with_concurrency(2),
            import: WorkerPoolConfig::with_concurrency(2),
            restore: WorkerPoolConfig::with_concurrency(1),
        }
    }
}

/// Where concurrency slots are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotBackend {
    /// Process-local counters
    Memory,
    /// Slot rows with expiry, shared across instances
    Database,
}

/// Per-operation policy override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SlotOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slots: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_seconds: Option<u64>,
}

/// Concurrency slot policy.
///
/// Overrides come from `STOCKPILE_SLOT_OVERRIDE_<OPERATION>_<SETTING>` where
/// `<OPERATION>` is the operation name upper-cased with `-` replaced by `_`
/// and `<SETTING>` is `MAX_SLOTS` or `RETRY_SECONDS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ConcurrencyConfig {
    pub backend: SlotBackend,
    /// Lifetime of a database slot before it stops counting
    pub slot_ttl_seconds: u64,
    /// Policy for operations without built-in or configured limits
    pub default_max_slots: u32,
    pub default_retry_seconds: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operation_overrides: BTreeMap<String, SlotOverride>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            backend: SlotBackend::Memory,
            slot_ttl_seconds: 3_600,
            default_max_slots: 1,
            default_retry_seconds: 60,
            operation_overrides: BTreeMap::new(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_ttl_seconds == 0 {
            return Err(ConfigError::InvalidSlotTtl);
        }
        if self.default_max_slots == 0 {
            return Err(ConfigError::InvalidSlotCeiling {
                operation: "default".to_string(),
            });
        }
        for (operation, entry) in &self.operation_overrides {
            if entry.max_slots == Some(0) {
                return Err(ConfigError::InvalidSlotCeiling {
                    operation: operation.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            storage_location: default_storage_location(),
            max_upload_bytes: default_max_upload_bytes(),
            workers: WorkerPoolsConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a JSON representation with secrets replaced.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if let Ok(mut url) = Url::parse(&config.database_url)
            && url.password().is_some()
            && url.set_password(Some("[REDACTED]")).is_ok()
        {
            config.database_url = url.to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if (self.profile == "local" || self.profile == "test") && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        let storage = Url::parse(&self.storage_location).map_err(|source| {
            ConfigError::InvalidStorageLocation {
                value: self.storage_location.clone(),
                reason: source.to_string(),
            }
        })?;
        if !matches!(storage.scheme(), "file" | "mem") {
            return Err(ConfigError::InvalidStorageLocation {
                value: self.storage_location.clone(),
                reason: format!("unsupported scheme '{}'", storage.scheme()),
            });
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidUploadLimit);
        }

        self.workers.export.validate("export")?;
        self.workers.import.validate("import")?;
        self.workers.restore.validate("restore")?;
        self.concurrency.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://stockpile.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_storage_location() -> String {
    "file://./data/blobs".to_string()
}

fn default_max_upload_bytes() -> u64 {
    512 * 1024 * 1024
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no operator tokens configured; set STOCKPILE_OPERATOR_TOKEN or STOCKPILE_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid storage location '{value}': {reason}")]
    InvalidStorageLocation { value: String, reason: String },
    #[error("max upload size must be positive")]
    InvalidUploadLimit,
    #[error("{stage} worker poll interval {poll_ms}ms must be positive and not exceed max {max_ms}ms")]
    InvalidPollInterval {
        stage: &'static str,
        poll_ms: u64,
        max_ms: u64,
    },
    #[error("{stage} worker lease must be at least 10 seconds, got {value}")]
    InvalidLease { stage: &'static str, value: u64 },
    #[error("unknown slot backend '{value}'; expected 'memory' or 'database'")]
    InvalidSlotBackend { value: String },
    #[error("slot ttl must be positive")]
    InvalidSlotTtl,
    #[error("slot ceiling for '{operation}' must be at least 1")]
    InvalidSlotCeiling { operation: String },
}

/// Loads configuration from layered env files and process environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Process environment wins over every file.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        Self::from_values(layered, profile_hint)
    }

    /// Builds a config from prefix-stripped key/value pairs.
    pub fn from_values(
        mut layered: BTreeMap<String, String>,
        profile_hint: String,
    ) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or(defaults.api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or(defaults.log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT").unwrap_or(defaults.log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or(defaults.database_url);
        let db_max_connections =
            take_parsed(&mut layered, "DB_MAX_CONNECTIONS").unwrap_or(defaults.db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or(defaults.db_acquire_timeout_ms);
        let storage_location =
            take_string(&mut layered, "STORAGE_LOCATION").unwrap_or(defaults.storage_location);
        let max_upload_bytes =
            take_parsed(&mut layered, "MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes);

        // Comma-separated list, or a single token
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = take_string(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let workers = WorkerPoolsConfig {
            export: take_pool(&mut layered, "EXPORT", defaults.workers.export),
            import: take_pool(&mut layered, "IMPORT", defaults.workers.import),
            restore: take_pool(&mut layered, "RESTORE", defaults.workers.restore),
        };

        let backend = match take_string(&mut layered, "SLOT_BACKEND") {
            None => defaults.concurrency.backend,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "memory" => SlotBackend::Memory,
                "database" => SlotBackend::Database,
                _ => return Err(ConfigError::InvalidSlotBackend { value }),
            },
        };

        let mut operation_overrides: BTreeMap<String, SlotOverride> = BTreeMap::new();
        for (key, value) in &layered {
            let Some(suffix) = key.strip_prefix(SLOT_OVERRIDE_PREFIX) else {
                continue;
            };
            if let Some(operation) = suffix.strip_suffix("_MAX_SLOTS") {
                if let Ok(parsed) = value.trim().parse() {
                    operation_overrides
                        .entry(operation_name(operation))
                        .or_default()
                        .max_slots = Some(parsed);
                }
            } else if let Some(operation) = suffix.strip_suffix("_RETRY_SECONDS")
                && let Ok(parsed) = value.trim().parse()
            {
                operation_overrides
                    .entry(operation_name(operation))
                    .or_default()
                    .retry_seconds = Some(parsed);
            }
        }

        let concurrency = ConcurrencyConfig {
            backend,
            slot_ttl_seconds: take_parsed(&mut layered, "SLOT_TTL_SECONDS")
                .unwrap_or(defaults.concurrency.slot_ttl_seconds),
            default_max_slots: take_parsed(&mut layered, "SLOT_DEFAULT_MAX_SLOTS")
                .unwrap_or(defaults.concurrency.default_max_slots),
            default_retry_seconds: take_parsed(&mut layered, "SLOT_DEFAULT_RETRY_SECONDS")
                .unwrap_or(defaults.concurrency.default_retry_seconds),
            operation_overrides,
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            storage_location,
            max_upload_bytes,
            workers,
            concurrency,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
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

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
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

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    values.remove(key).and_then(|v| v.trim().parse().ok())
}

fn take_pool(
    values: &mut BTreeMap<String, String>,
    stage: &str,
    defaults: WorkerPoolConfig,
) -> WorkerPoolConfig {
    WorkerPoolConfig {
        max_concurrency: take_parsed(values, &format!("WORKER_{stage}_MAX_CONCURRENCY"))
            .unwrap_or(defaults.max_concurrency),
        poll_interval_ms: take_parsed(values, &format!("WORKER_{stage}_POLL_INTERVAL_MS"))
            .unwrap_or(defaults.poll_interval_ms),
        max_poll_interval_ms: take_parsed(values, &format!("WORKER_{stage}_MAX_POLL_INTERVAL_MS"))
            .unwrap_or(defaults.max_poll_interval_ms),
        lease_seconds: take_parsed(values, &format!("WORKER_{stage}_LEASE_SECONDS"))
            .unwrap_or(defaults.lease_seconds),
    }
}

/// `EXPORT_GENERATION` -> `export-generation`
fn operation_name(env_segment: &str) -> String {
    env_segment.to_ascii_lowercase().replace('_', "-")
}
