// crates/entitlement-gate-config/src/config.rs
// ============================================================================
// Module: Entitlement Gate Configuration
// Description: Configuration loading and validation for Entitlement Gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: entitlement-gate-core, entitlement-gate-store-*, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Unknown keys and inconsistent sections fail closed. The bot token may be
//! given inline or, preferably, through an environment variable; it is never
//! included in `Debug` output or error messages.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use entitlement_gate_core::GatewaySettings;
use entitlement_gate_core::LogLevel;
use entitlement_gate_core::ReconcilePolicy;
use entitlement_gate_core::SystemClock;
use entitlement_gate_core::UserId;
use entitlement_gate_store_json::JsonStoreConfig;
use entitlement_gate_store_sqlite::SqliteStoreConfig;
use entitlement_gate_store_sqlite::SqliteStoreMode;
use entitlement_gate_store_sqlite::SqliteSyncMode;
use entitlement_gate_telegram::DEFAULT_API_BASE;
use entitlement_gate_telegram::TelegramGatewayConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "entitlement-gate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "ENTITLEMENT_GATE_CONFIG";
/// Environment variable read for the bot token when `token_env` is unset.
pub const DEFAULT_TOKEN_ENV: &str = "ENTITLEMENT_GATE_BOT_TOKEN";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default gateway request timeout in milliseconds.
const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 10_000;
/// Minimum gateway request timeout in milliseconds.
const MIN_GATEWAY_TIMEOUT_MS: u64 = 100;
/// Maximum gateway request timeout in milliseconds.
const MAX_GATEWAY_TIMEOUT_MS: u64 = 120_000;
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum `SQLite` busy timeout in milliseconds.
const MAX_BUSY_TIMEOUT_MS: u64 = 600_000;
/// Largest accepted UTC offset magnitude, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;
/// Maximum bot token length.
const MAX_TOKEN_LENGTH: usize = 256;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Entitlement Gate configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitlementGateConfig {
    /// Permission gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Durable storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Operator configuration.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Log sink configuration.
    #[serde(default)]
    pub log: LogConfig,
    /// Reconciliation prune policy.
    #[serde(default)]
    pub reconcile: ReconcilePolicy,
    /// Calendar configuration.
    #[serde(default)]
    pub clock: ClockConfig,
}

impl EntitlementGateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.validate()?;
        self.storage.validate()?;
        self.admin.validate()?;
        self.log.validate()?;
        self.clock.validate()
    }

    /// Builds the operator settings for the event gateway.
    #[must_use]
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            admin_ids: self.admin.admin_ids.iter().copied().collect::<BTreeSet<_>>(),
            log_chat_id: self.admin.log_chat_id,
            reconcile: self.reconcile,
        }
    }

    /// Builds the wall clock for the configured calendar.
    #[must_use]
    pub fn clock(&self) -> SystemClock {
        SystemClock::from_offset_minutes(self.clock.utc_offset_minutes)
    }
}

/// Permission gateway configuration.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Bot API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Inline bot token.
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the bot token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Request timeout in milliseconds.
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
    /// User agent for outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Allow cleartext HTTP API bases.
    #[serde(default)]
    pub allow_http: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            token_env: None,
            timeout_ms: default_gateway_timeout_ms(),
            user_agent: default_user_agent(),
            allow_http: false,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_env", &self.token_env)
            .field("timeout_ms", &self.timeout_ms)
            .field("user_agent", &self.user_agent)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

impl GatewayConfig {
    /// Validates gateway configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base.trim();
        let scheme_ok = base.starts_with("https://")
            || (self.allow_http && base.starts_with("http://"));
        if !scheme_ok {
            return Err(ConfigError::Invalid(if base.starts_with("http://") {
                "gateway.api_base uses http without gateway.allow_http".to_string()
            } else {
                "gateway.api_base must be an http(s) url".to_string()
            }));
        }
        validate_timeout_range(
            "gateway.timeout_ms",
            self.timeout_ms,
            MIN_GATEWAY_TIMEOUT_MS,
            MAX_GATEWAY_TIMEOUT_MS,
        )?;
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("gateway.user_agent must be non-empty".to_string()));
        }
        if self.token.is_some() && self.token_env.is_some() {
            return Err(ConfigError::Invalid(
                "gateway.token and gateway.token_env are mutually exclusive".to_string(),
            ));
        }
        if let Some(token) = &self.token {
            validate_token("gateway.token", token)?;
        }
        if let Some(name) = &self.token_env
            && (name.trim().is_empty() || name.contains('='))
        {
            return Err(ConfigError::Invalid("gateway.token_env is not a valid name".to_string()));
        }
        Ok(())
    }

    /// Returns the environment variable consulted for the token.
    #[must_use]
    pub fn token_env_name(&self) -> &str {
        self.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV)
    }

    /// Resolves the bot token through `lookup` for environment access.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no token is configured or the
    /// token is malformed.
    pub fn resolve_token_with<F>(&self, lookup: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = &self.token {
            return Ok(token.trim().to_string());
        }
        let name = self.token_env_name();
        let Some(token) = lookup(name) else {
            return Err(ConfigError::Invalid(format!("bot token missing: set {name}")));
        };
        validate_token(name, &token)?;
        Ok(token.trim().to_string())
    }

    /// Builds the Telegram client configuration, resolving the token through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the token cannot be resolved.
    pub fn telegram_config_with<F>(&self, lookup: F) -> Result<TelegramGatewayConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(TelegramGatewayConfig {
            api_base: self.api_base.trim().to_string(),
            token: self.resolve_token_with(lookup)?,
            timeout_ms: self.timeout_ms,
            user_agent: self.user_agent.clone(),
            allow_http: self.allow_http,
            ..TelegramGatewayConfig::default()
        })
    }

    /// Builds the Telegram client configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the token cannot be resolved.
    pub fn telegram_config(&self) -> Result<TelegramGatewayConfig, ConfigError> {
        self.telegram_config_with(|name| env::var(name).ok())
    }
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// JSON documents in a data directory.
    #[default]
    Json,
    /// `SQLite` database.
    Sqlite,
    /// Process-local in-memory stores.
    Memory,
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Backend type.
    #[serde(rename = "type", default)]
    pub store_type: StorageType,
    /// JSON data directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// JSON connections document name.
    #[serde(default)]
    pub connections_file: Option<String>,
    /// JSON promo code document name.
    #[serde(default)]
    pub promo_codes_file: Option<String>,
    /// JSON accounts document name.
    #[serde(default)]
    pub accounts_file: Option<String>,
    /// `SQLite` database path.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `SQLite` busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_type: StorageType::default(),
            dir: None,
            connections_file: None,
            promo_codes_file: None,
            accounts_file: None,
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StorageConfig {
    /// Validates storage configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let has_json_keys = self.dir.is_some()
            || self.connections_file.is_some()
            || self.promo_codes_file.is_some()
            || self.accounts_file.is_some();
        match self.store_type {
            StorageType::Json => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "json storage must not set path (use dir)".to_string(),
                    ));
                }
                let json = self.json_config();
                validate_store_path("storage.dir", &json.dir)?;
                json.validate().map_err(|err| ConfigError::Invalid(err.to_string()))
            }
            StorageType::Sqlite => {
                if has_json_keys {
                    return Err(ConfigError::Invalid(
                        "sqlite storage must not set json document keys".to_string(),
                    ));
                }
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite storage requires path".to_string())
                })?;
                validate_store_path("storage.path", path)?;
                validate_timeout_range(
                    "storage.busy_timeout_ms",
                    self.busy_timeout_ms,
                    0,
                    MAX_BUSY_TIMEOUT_MS,
                )
            }
            StorageType::Memory => {
                if has_json_keys || self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory storage must not set paths".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Returns the JSON store layout with defaults for unset keys.
    #[must_use]
    pub fn json_config(&self) -> JsonStoreConfig {
        let defaults = JsonStoreConfig::default();
        JsonStoreConfig {
            dir: self.dir.clone().unwrap_or(defaults.dir),
            connections_file: self
                .connections_file
                .clone()
                .unwrap_or(defaults.connections_file),
            promo_codes_file: self.promo_codes_file.clone().unwrap_or(defaults.promo_codes_file),
            accounts_file: self.accounts_file.clone().unwrap_or(defaults.accounts_file),
        }
    }

    /// Returns the `SQLite` store configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no database path is configured.
    pub fn sqlite_config(&self) -> Result<SqliteStoreConfig, ConfigError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| ConfigError::Invalid("sqlite storage requires path".to_string()))?;
        Ok(SqliteStoreConfig {
            path,
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
        })
    }
}

/// Operator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    /// Users allowed to run admin actions.
    #[serde(default)]
    pub admin_ids: Vec<UserId>,
    /// Operator chat receiving connection notices.
    #[serde(default)]
    pub log_chat_id: Option<i64>,
}

impl AdminConfig {
    /// Validates operator configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let unique: BTreeSet<UserId> = self.admin_ids.iter().copied().collect();
        if unique.len() != self.admin_ids.len() {
            return Err(ConfigError::Invalid("admin.admin_ids contains duplicates".to_string()));
        }
        if self.admin_ids.iter().any(|id| id.get() <= 0) {
            return Err(ConfigError::Invalid("admin.admin_ids must be positive".to_string()));
        }
        if self.log_chat_id == Some(0) {
            return Err(ConfigError::Invalid("admin.log_chat_id must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Log sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard events.
    None,
}

/// Log configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Sink selection.
    #[serde(default)]
    pub sink: LogSinkKind,
    /// File path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Minimum level recorded.
    #[serde(default)]
    pub level: LogLevel,
}

impl LogConfig {
    /// Validates log configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (LogSinkKind::File, Some(path)) => validate_store_path("log.path", path),
            (LogSinkKind::File, None) => {
                Err(ConfigError::Invalid("file log sink requires log.path".to_string()))
            }
            (_, Some(_)) => {
                Err(ConfigError::Invalid("log.path is only valid for the file sink".to_string()))
            }
            (_, None) => Ok(()),
        }
    }
}

/// Calendar configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClockConfig {
    /// Offset from UTC, in minutes, of the calendar used for dates.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl ClockConfig {
    /// Validates calendar configuration.
    fn validate(self) -> Result<(), ConfigError> {
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "clock.utc_offset_minutes must be within +/-{MAX_UTC_OFFSET_MINUTES}",
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default Bot API base.
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// Default gateway timeout.
const fn default_gateway_timeout_ms() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_MS
}

/// Default user agent.
fn default_user_agent() -> String {
    format!("entitlement-gate/{}", env!("CARGO_PKG_VERSION"))
}

/// Default `SQLite` busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates store and log paths against security limits.
fn validate_store_path(field: &str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a millisecond value against an inclusive range.
fn validate_timeout_range(
    field: &str,
    value_ms: u64,
    min_ms: u64,
    max_ms: u64,
) -> Result<(), ConfigError> {
    if value_ms < min_ms || value_ms > max_ms {
        return Err(ConfigError::Invalid(format!(
            "{field} must be between {min_ms} and {max_ms} milliseconds",
        )));
    }
    Ok(())
}

/// Validates a bot token without echoing it.
fn validate_token(source: &str, token: &str) -> Result<(), ConfigError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("bot token from {source} is empty")));
    }
    if trimmed.len() > MAX_TOKEN_LENGTH
        || trimmed.chars().any(|ch| ch.is_whitespace() || ch == '/' || ch == '?' || ch == '#')
    {
        return Err(ConfigError::Invalid(format!("bot token from {source} is malformed")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
