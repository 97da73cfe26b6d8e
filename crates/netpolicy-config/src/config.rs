// netpolicy-config/src/config.rs
// ============================================================================
// Module: Netpolicy Configuration
// Description: Configuration loading and validation for the policy server.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: netpolicy-core, netpolicy-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section carries defaults so a minimal file only names the external
//! endpoints and certificate material. Missing or invalid configuration fails
//! closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use netpolicy_core::TagWidth;
use netpolicy_store_sqlite::SqliteStoreConfig;
use netpolicy_store_sqlite::SqliteStoreMode;
use netpolicy_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "netpolicy.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "NETPOLICY_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default request body limit for authenticated routes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
/// Default per-request deadline in milliseconds.
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
/// Maximum per-request deadline in milliseconds.
pub(crate) const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;
/// Default per-source policy quota.
pub(crate) const DEFAULT_MAX_POLICIES_PER_SOURCE: u32 = 50;
/// Default tag width in bytes.
pub(crate) const DEFAULT_TAG_LENGTH: u8 = 2;
/// Default cleanup interval in seconds.
pub(crate) const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 60;
/// Default number of app guids per registry lookup during cleanup.
pub(crate) const DEFAULT_CC_APP_REQUEST_CHUNK_SIZE: i64 = 100;
/// Default ASG sync interval in seconds.
pub(crate) const DEFAULT_ASG_SYNC_INTERVAL_SECONDS: u64 = 60;
/// Default ASG sync cycle timeout in seconds.
pub(crate) const DEFAULT_ASG_SYNC_TIMEOUT_SECONDS: u64 = 30;
/// Default retry deadline for unstable ASG listings in seconds.
pub(crate) const DEFAULT_ASG_SYNC_RETRY_DEADLINE_SECONDS: u64 = 300;
/// Default lock lease ttl in seconds.
pub(crate) const DEFAULT_LOCK_TTL_SECONDS: u64 = 15;
/// Default database busy timeout in seconds.
pub(crate) const DEFAULT_DATABASE_TIMEOUT_SECONDS: u64 = 5;
/// Default pool size.
pub(crate) const DEFAULT_MAX_OPEN_CONNECTIONS: usize = 4;
/// Default time budget for opening the store at startup in seconds.
pub(crate) const DEFAULT_MIGRATION_TIMEOUT_SECONDS: u64 = 60;
/// Default identity server port.
pub(crate) const DEFAULT_UAA_PORT: u16 = 8443;
/// Log levels accepted for `log_level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Netpolicy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NetPolicyConfig {
    /// Instance identifier used as the lock owner.
    #[serde(default)]
    pub uuid: String,
    /// Minimum log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity server client configuration.
    #[serde(default)]
    pub uaa: UaaConfig,
    /// Platform registry client configuration.
    #[serde(default)]
    pub cc: CcConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Policy limits and feature switches.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Stale policy cleanup configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// ASG syncer configuration.
    #[serde(default)]
    pub asg_sync: AsgSyncConfig,
    /// Lock service configuration.
    #[serde(default)]
    pub locket: LocketConfig,
}

impl NetPolicyConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path argument wins, then `NETPOLICY_CONFIG`, then `netpolicy.toml`
    /// in the working directory.
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
        if self.uuid.trim().is_empty() {
            return Err(ConfigError::Invalid("uuid must be set".to_string()));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "log_level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        self.server.validate()?;
        self.uaa.validate()?;
        self.cc.validate()?;
        self.database.validate()?;
        self.policy.validate()?;
        self.cleanup.validate()?;
        self.asg_sync.validate()?;
        self.locket.validate()?;
        Ok(())
    }

    /// Returns the store configuration derived from the database and policy sections.
    #[must_use]
    pub fn store_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            path: PathBuf::from(&self.database.name),
            busy_timeout_ms: self.database.timeout.saturating_mul(1_000),
            journal_mode: self.database.journal_mode,
            sync_mode: self.database.sync_mode,
            max_open_connections: self.database.max_open_connections,
            tag_length: self.policy.tag_length,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// External listener host.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// External listener port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Internal listener host.
    #[serde(default = "default_listen_host")]
    pub internal_listen_host: String,
    /// Internal listener port.
    #[serde(default = "default_internal_listen_port")]
    pub internal_listen_port: u16,
    /// Serve the external listener over TLS.
    #[serde(default)]
    pub enable_tls: bool,
    /// Server certificate in PEM form.
    #[serde(default)]
    pub tls_cert_file: Option<PathBuf>,
    /// Server private key in PEM form.
    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,
    /// CA bundle used to verify internal client certificates.
    #[serde(default)]
    pub tls_ca_file: Option<PathBuf>,
    /// Origins allowed by CORS.
    #[serde(default)]
    pub allowed_cors_domains: Vec<String>,
    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Body limit for authenticated routes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Audit logging configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            internal_listen_host: default_listen_host(),
            internal_listen_port: default_internal_listen_port(),
            enable_tls: false,
            tls_cert_file: None,
            tls_key_file: None,
            tls_ca_file: None,
            allowed_cors_domains: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            audit: AuditConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the external listener address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the host is not an IP address.
    pub fn external_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("server.listen_host", &self.listen_host, self.listen_port)
    }

    /// Returns the internal listener address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the host is not an IP address.
    pub fn internal_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr(
            "server.internal_listen_host",
            &self.internal_listen_host,
            self.internal_listen_port,
        )
    }

    /// Returns the per-request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validates listener configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let external = self.external_addr()?;
        let internal = self.internal_addr()?;
        if external.port() == 0 || internal.port() == 0 {
            return Err(ConfigError::Invalid("listener ports must be non-zero".to_string()));
        }
        if external == internal {
            return Err(ConfigError::Invalid(
                "external and internal listeners must not share an address".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "server.request_timeout_ms must be between 1 and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        required_path("server.tls_cert_file", self.tls_cert_file.as_deref())?;
        required_path("server.tls_key_file", self.tls_key_file.as_deref())?;
        required_path("server.tls_ca_file", self.tls_ca_file.as_deref())?;
        for origin in &self.allowed_cors_domains {
            if origin.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "server.allowed_cors_domains entries must be non-empty".to_string(),
                ));
            }
        }
        self.audit.validate()
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Emit one audit event per request.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Append events to this file instead of stderr.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: None,
        }
    }
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("server.audit.path", &path.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Identity server client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UaaConfig {
    /// Identity server base URL without port.
    #[serde(default)]
    pub url: String,
    /// Identity server port.
    #[serde(default = "default_uaa_port")]
    pub port: u16,
    /// Client id used for the client-credentials grant.
    #[serde(default)]
    pub client: String,
    /// Client secret used for the client-credentials grant.
    #[serde(default)]
    pub client_secret: String,
    /// CA bundle for the identity server.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Disable certificate verification.
    #[serde(default)]
    pub skip_ssl_validation: bool,
}

impl Default for UaaConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            port: DEFAULT_UAA_PORT,
            client: String::new(),
            client_secret: String::new(),
            ca_file: None,
            skip_ssl_validation: false,
        }
    }
}

impl UaaConfig {
    /// Returns the base URL including the port.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.url.trim_end_matches('/'), self.port)
    }

    /// Validates identity client configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_url("uaa.url", &self.url)?;
        if self.client.trim().is_empty() {
            return Err(ConfigError::Invalid("uaa.client must be set".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("uaa.port must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Platform registry client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CcConfig {
    /// Registry base URL.
    #[serde(default)]
    pub url: String,
    /// CA bundle for the registry.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

impl CcConfig {
    /// Validates registry client configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_url("cc.url", &self.url)
    }
}

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseType {
    /// Embedded `SQLite` file.
    #[default]
    Sqlite,
    /// `MySQL`, accepted by the parser and rejected by validation.
    Mysql,
    /// `PostgreSQL`, accepted by the parser and rejected by validation.
    Postgres,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Backend type; only `sqlite` is served.
    #[serde(rename = "type", default)]
    pub db_type: DatabaseType,
    /// Database user, unused by `SQLite`.
    #[serde(default)]
    pub user: String,
    /// Database password, unused by `SQLite`.
    #[serde(default)]
    pub password: String,
    /// Database host, unused by `SQLite`.
    #[serde(default)]
    pub host: String,
    /// Database port, unused by `SQLite`.
    #[serde(default)]
    pub port: u16,
    /// Database file path.
    #[serde(default)]
    pub name: String,
    /// Busy timeout in seconds.
    #[serde(default = "default_database_timeout")]
    pub timeout: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of pooled connections.
    #[serde(default = "default_max_open_connections")]
    pub max_open_connections: usize,
    /// Time budget for opening the store at startup in seconds.
    #[serde(default = "default_migration_timeout_seconds")]
    pub migration_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            user: String::new(),
            password: String::new(),
            host: String::new(),
            port: 0,
            name: String::new(),
            timeout: DEFAULT_DATABASE_TIMEOUT_SECONDS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            migration_timeout_seconds: DEFAULT_MIGRATION_TIMEOUT_SECONDS,
        }
    }
}

impl DatabaseConfig {
    /// Returns the startup time budget.
    #[must_use]
    pub const fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_seconds)
    }

    /// Validates database configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.db_type != DatabaseType::Sqlite {
            return Err(ConfigError::Invalid("database.type must be sqlite".to_string()));
        }
        validate_path_string("database.name", &self.name)?;
        if self.max_open_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_open_connections must be greater than zero".to_string(),
            ));
        }
        if self.migration_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "database.migration_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Policy limits and feature switches.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Tag width in bytes.
    #[serde(default = "default_tag_length")]
    pub tag_length: u8,
    /// Maximum number of policies a restricted subject may own per source.
    #[serde(default = "default_max_policies_per_source")]
    pub max_policies_per_source: u32,
    /// Treat authenticated subjects without network scopes as restricted writers.
    #[serde(default)]
    pub enable_space_developer_self_service: bool,
    /// Include egress policies in the internal policy index.
    #[serde(default)]
    pub enable_experimental_dynamic_egress_policies: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            tag_length: DEFAULT_TAG_LENGTH,
            max_policies_per_source: DEFAULT_MAX_POLICIES_PER_SOURCE,
            enable_space_developer_self_service: false,
            enable_experimental_dynamic_egress_policies: false,
        }
    }
}

impl PolicyConfig {
    /// Returns the validated tag width.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `tag_length` is outside 1..=4.
    pub fn tag_width(&self) -> Result<TagWidth, ConfigError> {
        TagWidth::new(self.tag_length)
            .map_err(|err| ConfigError::Invalid(format!("policy.tag_length: {err}")))
    }

    /// Validates policy configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.tag_width()?;
        Ok(())
    }
}

/// Stale policy cleanup configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Interval between cleanup cycles in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub interval_seconds: u64,
    /// App guids per registry lookup; values below 1 fall back to 100.
    #[serde(default = "default_cc_app_request_chunk_size")]
    pub cc_app_request_chunk_size: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECONDS,
            cc_app_request_chunk_size: DEFAULT_CC_APP_REQUEST_CHUNK_SIZE,
        }
    }
}

impl CleanupConfig {
    /// Returns the cleanup interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Validates cleanup configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "cleanup.interval_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// ASG syncer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AsgSyncConfig {
    /// Interval between sync cycles in seconds.
    #[serde(default = "default_asg_sync_interval_seconds")]
    pub interval_seconds: u64,
    /// Deadline for one sync cycle in seconds.
    #[serde(default = "default_asg_sync_timeout_seconds")]
    pub timeout_seconds: u64,
    /// How long unstable listings are retried after the last success.
    #[serde(default = "default_asg_sync_retry_deadline_seconds")]
    pub retry_deadline_seconds: u64,
    /// Lock lease ttl in seconds.
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
}

impl Default for AsgSyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_ASG_SYNC_INTERVAL_SECONDS,
            timeout_seconds: DEFAULT_ASG_SYNC_TIMEOUT_SECONDS,
            retry_deadline_seconds: DEFAULT_ASG_SYNC_RETRY_DEADLINE_SECONDS,
            lock_ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
        }
    }
}

impl AsgSyncConfig {
    /// Validates syncer configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("asg_sync.interval_seconds", self.interval_seconds),
            ("asg_sync.timeout_seconds", self.timeout_seconds),
            ("asg_sync.retry_deadline_seconds", self.retry_deadline_seconds),
            ("asg_sync.lock_ttl_seconds", self.lock_ttl_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
            }
        }
        Ok(())
    }
}

/// Lock service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocketConfig {
    /// Lock service base URL; an in-process lock is used when unset.
    #[serde(default)]
    pub address: Option<String>,
    /// CA bundle for the lock service.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Client certificate for the lock service.
    #[serde(default)]
    pub client_cert_file: Option<PathBuf>,
    /// Client key for the lock service.
    #[serde(default)]
    pub client_key_file: Option<PathBuf>,
}

impl LocketConfig {
    /// Validates lock service configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let Some(address) = &self.address else {
            return Ok(());
        };
        validate_url("locket.address", address)?;
        required_path("locket.ca_file", self.ca_file.as_deref())?;
        required_path("locket.client_cert_file", self.client_cert_file.as_deref())?;
        required_path("locket.client_key_file", self.client_key_file.as_deref())?;
        Ok(())
    }
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
// SECTION: Defaults
// ============================================================================

/// Default log level.
fn default_log_level() -> String {
    "info".to_string()
}

/// Default listener host.
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

/// Default external listener port.
const fn default_listen_port() -> u16 {
    4002
}

/// Default internal listener port.
const fn default_internal_listen_port() -> u16 {
    4003
}

/// Default per-request deadline.
const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Default body limit.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Audit logging is on unless disabled.
const fn default_audit_enabled() -> bool {
    true
}

/// Default identity server port.
const fn default_uaa_port() -> u16 {
    DEFAULT_UAA_PORT
}

/// Default busy timeout in seconds.
const fn default_database_timeout() -> u64 {
    DEFAULT_DATABASE_TIMEOUT_SECONDS
}

/// Default pool size.
const fn default_max_open_connections() -> usize {
    DEFAULT_MAX_OPEN_CONNECTIONS
}

/// Default startup time budget.
const fn default_migration_timeout_seconds() -> u64 {
    DEFAULT_MIGRATION_TIMEOUT_SECONDS
}

/// Default tag width.
const fn default_tag_length() -> u8 {
    DEFAULT_TAG_LENGTH
}

/// Default per-source quota.
const fn default_max_policies_per_source() -> u32 {
    DEFAULT_MAX_POLICIES_PER_SOURCE
}

/// Default cleanup interval.
const fn default_cleanup_interval_seconds() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECONDS
}

/// Default cleanup chunk size.
const fn default_cc_app_request_chunk_size() -> i64 {
    DEFAULT_CC_APP_REQUEST_CHUNK_SIZE
}

/// Default sync interval.
const fn default_asg_sync_interval_seconds() -> u64 {
    DEFAULT_ASG_SYNC_INTERVAL_SECONDS
}

/// Default sync cycle timeout.
const fn default_asg_sync_timeout_seconds() -> u64 {
    DEFAULT_ASG_SYNC_TIMEOUT_SECONDS
}

/// Default unstable-listing retry deadline.
const fn default_asg_sync_retry_deadline_seconds() -> u64 {
    DEFAULT_ASG_SYNC_RETRY_DEADLINE_SECONDS
}

/// Default lease ttl.
const fn default_lock_ttl_seconds() -> u64 {
    DEFAULT_LOCK_TTL_SECONDS
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

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    let path = Path::new(trimmed);
    for component in path.components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Requires an optional path to be present and well-formed.
fn required_path(field: &str, value: Option<&Path>) -> Result<(), ConfigError> {
    match value {
        Some(path) => validate_path_string(field, &path.to_string_lossy()),
        None => Err(ConfigError::Invalid(format!("{field} must be set"))),
    }
}

/// Requires an http or https URL.
fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be set")));
    }
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ConfigError::Invalid(format!("{field} must include http:// or https://")));
    }
    Ok(())
}

/// Builds a listener address from host and port fields.
fn socket_addr(field: &str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let ip: IpAddr = host
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{field} must be an IP address")))?;
    Ok(SocketAddr::new(ip, port))
}
