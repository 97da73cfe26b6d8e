// netpolicy-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Policy Store
// Description: Durable C2C policy store backed by SQLite WAL.
// Purpose: Persist policies and their group tags with serializable writes.
// Dependencies: netpolicy-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module owns the connection pool, schema, and the C2C policy half of
//! [`SqlitePolicyStore`]. Every mutating call opens a `BEGIN IMMEDIATE`
//! transaction, validates its whole input first, and commits once, so a call
//! either fully applies or leaves the database untouched. A version counter
//! in `store_markers` is bumped on every policy mutation so host agents can
//! skip unchanged snapshots.

// ============================================================================//
// SECTION: Imports
// ============================================================================//

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::TryLockError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use netpolicy_core::GroupRef;
use netpolicy_core::ModelError;
use netpolicy_core::Policy;
use netpolicy_core::PolicyStore;
use netpolicy_core::PortRange;
use netpolicy_core::Protocol;
use netpolicy_core::StoreError;
use netpolicy_core::Tag;
use netpolicy_core::TagRecord;
use netpolicy_core::TagWidth;
use netpolicy_core::TaggedPolicy;
use netpolicy_core::validate_policies;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Deserialize;
use thiserror::Error;

use crate::tags;

// ============================================================================//
// SECTION: Constants
// ============================================================================//

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of pooled connections.
const DEFAULT_MAX_OPEN_CONNECTIONS: usize = 4;
/// Default tag width in bytes.
const DEFAULT_TAG_LENGTH: u8 = 2;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Marker key holding the policy version counter.
pub(crate) const POLICIES_VERSION_KEY: &str = "policies_version";
/// Marker key holding the last applied ASG catalog update.
pub(crate) const ASG_SYNC_MARKER_KEY: &str = "asg_sync_marker";

// ============================================================================//
// SECTION: Config
// ============================================================================//

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` policy store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of pooled connections.
    #[serde(default = "default_max_open_connections")]
    pub max_open_connections: usize,
    /// Tag width in bytes.
    #[serde(default = "default_tag_length")]
    pub tag_length: u8,
}

impl SqliteStoreConfig {
    /// Builds a config with defaults for everything but the path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            tag_length: DEFAULT_TAG_LENGTH,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default pool size.
const fn default_max_open_connections() -> usize {
    DEFAULT_MAX_OPEN_CONNECTIONS
}

/// Returns the default tag width.
const fn default_tag_length() -> u8 {
    DEFAULT_TAG_LENGTH
}

// ============================================================================//
// SECTION: Errors
// ============================================================================//

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid input or stored data.
    #[error("{0}")]
    Invalid(String),
    /// Referenced row does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Write conflicts with stored rows.
    #[error("{0}")]
    Conflict(String),
    /// Tag space exhausted.
    #[error("{0}")]
    TagExhausted(String),
    /// Group already tagged under another type.
    #[error("{0}")]
    TypeConflict(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Db(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Validation(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::TagExhausted(message) => Self::TagExhausted(message),
            SqliteStoreError::TypeConflict(message) => Self::TypeConflict(message),
        }
    }
}

impl From<ModelError> for SqliteStoreError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::Invalid(message) => Self::Invalid(message),
        }
    }
}

// ============================================================================//
// SECTION: Connection Pool
// ============================================================================//

/// Fixed-size pool of `SQLite` connections.
struct ConnectionPool {
    /// Pooled connections, each guarded by its own mutex.
    connections: Vec<Mutex<Connection>>,
    /// Round-robin cursor for the next checkout.
    next: AtomicUsize,
}

impl ConnectionPool {
    /// Checks out a free connection, blocking on one when all are busy.
    fn acquire(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        let count = self.connections.len();
        if count == 0 {
            return Err(SqliteStoreError::Db("connection pool is empty".to_string()));
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;
        for slot in self.connections.iter().cycle().skip(start).take(count) {
            match slot.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Poisoned(_)) => {
                    return Err(SqliteStoreError::Db("mutex poisoned".to_string()));
                }
            }
        }
        let slot = self
            .connections
            .get(start)
            .ok_or_else(|| SqliteStoreError::Db("connection pool is empty".to_string()))?;
        slot.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }
}

// ============================================================================//
// SECTION: Store
// ============================================================================//

/// `SQLite`-backed store for policies, tags, ASGs, and egress entities.
pub struct SqlitePolicyStore {
    /// Validated tag width.
    tag_width: TagWidth,
    /// Shared connection pool.
    pool: ConnectionPool,
}

impl SqlitePolicyStore {
    /// Opens the store, creating the schema on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized, or the configuration is invalid.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let tag_width = TagWidth::new(config.tag_length)?;
        if config.max_open_connections == 0 {
            return Err(SqliteStoreError::Invalid(
                "max_open_connections must be greater than zero".to_string(),
            ));
        }
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut first = open_connection(config)?;
        initialize_schema(&mut first)?;
        let mut connections = Vec::with_capacity(config.max_open_connections);
        connections.push(Mutex::new(first));
        for _ in 1 .. config.max_open_connections {
            connections.push(Mutex::new(open_connection(config)?));
        }
        Ok(Self {
            tag_width,
            pool: ConnectionPool {
                connections,
                next: AtomicUsize::new(0),
            },
        })
    }

    /// Runs `body` inside a `BEGIN IMMEDIATE` transaction and commits on success.
    pub(crate) fn write<T>(
        &self,
        body: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self.pool.acquire()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let value = body(&tx)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(value)
    }

    /// Runs `body` inside a deferred read transaction.
    pub(crate) fn read<T>(
        &self,
        body: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self.pool.acquire()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let value = body(&tx)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(value)
    }

    /// Returns the validated tag width.
    pub(crate) const fn width(&self) -> TagWidth {
        self.tag_width
    }
}

impl PolicyStore for SqlitePolicyStore {
    fn create_policies(&self, policies: &[Policy]) -> Result<(), StoreError> {
        validate_policies(policies)?;
        self.write(|tx| {
            for policy in policies {
                tags::acquire_or_get(tx, &GroupRef::app(policy.source_id.as_str()), self.width())?;
                tags::acquire_or_get(
                    tx,
                    &GroupRef::app(policy.destination_id.as_str()),
                    self.width(),
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO policies (source_id, destination_id, protocol, \
                     start_port, end_port) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        policy.source_id,
                        policy.destination_id,
                        policy.protocol.as_str(),
                        policy.ports.start,
                        policy.ports.end
                    ],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            }
            bump_marker(tx, POLICIES_VERSION_KEY)
        })
        .map_err(StoreError::from)
    }

    fn delete_policies(&self, policies: &[Policy]) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut affected = BTreeSet::new();
            for policy in policies {
                delete_policy_row(tx, policy)?;
                affected.insert(policy.source_id.as_str());
                affected.insert(policy.destination_id.as_str());
            }
            for id in affected {
                tags::release_if_unreferenced(tx, &GroupRef::app(id))?;
            }
            bump_marker(tx, POLICIES_VERSION_KEY)
        })
        .map_err(StoreError::from)
    }

    fn by_guids(
        &self,
        source_ids: &[String],
        destination_ids: &[String],
        in_source_and_dest: bool,
    ) -> Result<Vec<TaggedPolicy>, StoreError> {
        let source_clause = format!("p.source_id IN ({})", placeholders(source_ids.len()));
        let destination_clause =
            format!("p.destination_id IN ({})", placeholders(destination_ids.len()));
        let (clause, values) = if in_source_and_dest {
            if source_ids.is_empty() || destination_ids.is_empty() {
                return Ok(Vec::new());
            }
            (
                format!("{source_clause} AND {destination_clause}"),
                text_values(source_ids.iter().chain(destination_ids)),
            )
        } else {
            let mut clauses = Vec::new();
            if !source_ids.is_empty() {
                clauses.push(source_clause);
            }
            if !destination_ids.is_empty() {
                clauses.push(destination_clause);
            }
            if clauses.is_empty() {
                return Ok(Vec::new());
            }
            (clauses.join(" OR "), text_values(source_ids.iter().chain(destination_ids)))
        };
        self.read(|tx| select_tagged_policies(tx, Some(&clause), values))
            .map_err(StoreError::from)
    }

    fn all(&self) -> Result<Vec<TaggedPolicy>, StoreError> {
        self.read(|tx| select_tagged_policies(tx, None, Vec::new())).map_err(StoreError::from)
    }

    fn last_updated(&self) -> Result<i64, StoreError> {
        self.read(|tx| Ok(read_marker(tx, POLICIES_VERSION_KEY)?.unwrap_or(0)))
            .map_err(StoreError::from)
    }

    fn count_by_source(&self, source_ids: &[String]) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts: BTreeMap<String, u64> =
            source_ids.iter().map(|id| (id.clone(), 0)).collect();
        if source_ids.is_empty() {
            return Ok(counts);
        }
        let sql = format!(
            "SELECT source_id, COUNT(*) FROM policies WHERE source_id IN ({}) GROUP BY source_id",
            placeholders(source_ids.len())
        );
        let rows = self
            .read(|tx| {
                let mut statement =
                    tx.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let rows = statement
                    .query_map(params_from_iter(text_values(source_ids.iter())), |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                Ok(rows)
            })
            .map_err(StoreError::from)?;
        for (source_id, count) in rows {
            counts.insert(source_id, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    fn cleanup_with_live_set(
        &self,
        checked_ids: &BTreeSet<String>,
        live_ids: &BTreeSet<String>,
    ) -> Result<Vec<Policy>, StoreError> {
        let stale: Vec<String> = checked_ids.difference(live_ids).cloned().collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }
        let list = placeholders(stale.len());
        let clause = format!("p.source_id IN ({list}) OR p.destination_id IN ({list})");
        self.write(|tx| {
            let doomed = select_tagged_policies(
                tx,
                Some(&clause),
                text_values(stale.iter().chain(stale.iter())),
            )?;
            let mut affected = BTreeSet::new();
            let mut deleted = Vec::with_capacity(doomed.len());
            for tagged in doomed {
                delete_policy_row(tx, &tagged.policy)?;
                affected.insert(tagged.policy.source_id.clone());
                affected.insert(tagged.policy.destination_id.clone());
                deleted.push(tagged.policy);
            }
            for id in &affected {
                tags::release_if_unreferenced(tx, &GroupRef::app(id.as_str()))?;
            }
            if !deleted.is_empty() {
                bump_marker(tx, POLICIES_VERSION_KEY)?;
            }
            Ok(deleted)
        })
        .map_err(StoreError::from)
    }

    fn check_database(&self) -> Result<(), StoreError> {
        self.read(|tx| {
            tx.query_row("SELECT 1", params![], |row| row.get::<_, i64>(0))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn tags(&self) -> Result<Vec<TagRecord>, StoreError> {
        self.read(tags::live_tags).map_err(StoreError::from)
    }

    fn create_tag(&self, group: &GroupRef) -> Result<Tag, StoreError> {
        if group.id.trim().is_empty() {
            return Err(StoreError::Validation("missing group id".to_string()));
        }
        self.write(|tx| tags::acquire_or_get(tx, group, self.width()).map(|(tag, _)| tag))
            .map_err(StoreError::from)
    }

    fn tag_width(&self) -> TagWidth {
        self.tag_width
    }
}

// ============================================================================//
// SECTION: Query Helpers
// ============================================================================//

/// Raw policy row prior to model conversion.
type PolicyRow = (String, String, String, i64, i64, Option<i64>, Option<i64>);

/// Selects policies with resolved tags, optionally filtered by `clause`.
fn select_tagged_policies(
    tx: &Transaction<'_>,
    clause: Option<&str>,
    values: Vec<Value>,
) -> Result<Vec<TaggedPolicy>, SqliteStoreError> {
    let filter = clause.map(|clause| format!("WHERE {clause}")).unwrap_or_default();
    let sql = format!(
        "SELECT p.source_id, p.destination_id, p.protocol, p.start_port, p.end_port, s.tag, \
         d.tag FROM policies p LEFT JOIN groups s ON s.guid = p.source_id LEFT JOIN groups d ON \
         d.guid = p.destination_id {filter} ORDER BY p.source_id, p.destination_id, p.protocol, \
         p.start_port, p.end_port"
    );
    let mut statement = tx.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows: Vec<PolicyRow> = statement
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let mut policies = rows.into_iter().map(policy_from_row).collect::<Result<Vec<_>, _>>()?;
    policies.sort();
    Ok(policies)
}

/// Converts a raw row into a tagged policy.
fn policy_from_row(row: PolicyRow) -> Result<TaggedPolicy, SqliteStoreError> {
    let (source_id, destination_id, protocol, start, end, source_tag, destination_tag) = row;
    let protocol: Protocol = protocol.parse()?;
    let ports = PortRange::from_wire(start, end)?;
    Ok(TaggedPolicy {
        policy: Policy::new(source_id, destination_id, protocol, ports),
        source_tag: source_tag.map(tag_from_column).transpose()?,
        destination_tag: destination_tag.map(tag_from_column).transpose()?,
    })
}

/// Converts a stored tag column into a [`Tag`].
pub(crate) fn tag_from_column(value: i64) -> Result<Tag, SqliteStoreError> {
    let raw = u32::try_from(value)
        .map_err(|_| SqliteStoreError::Invalid(format!("stored tag {value} out of range")))?;
    Ok(Tag::new(raw)?)
}

/// Deletes one exact policy tuple.
fn delete_policy_row(tx: &Transaction<'_>, policy: &Policy) -> Result<(), SqliteStoreError> {
    tx.execute(
        "DELETE FROM policies WHERE source_id = ?1 AND destination_id = ?2 AND protocol = ?3 AND \
         start_port = ?4 AND end_port = ?5",
        params![
            policy.source_id,
            policy.destination_id,
            policy.protocol.as_str(),
            policy.ports.start,
            policy.ports.end
        ],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Returns `?, ?, ...` with `count` placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Converts strings into bindable text values.
pub(crate) fn text_values<'a>(values: impl Iterator<Item = &'a String>) -> Vec<Value> {
    values.map(|value| Value::Text(value.clone())).collect()
}

/// Reads a marker value.
pub(crate) fn read_marker(
    tx: &Transaction<'_>,
    key: &str,
) -> Result<Option<i64>, SqliteStoreError> {
    tx.query_row("SELECT value FROM store_markers WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Writes a marker value.
pub(crate) fn write_marker(
    tx: &Transaction<'_>,
    key: &str,
    value: i64,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO store_markers (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET \
         value = excluded.value",
        params![key, value],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Increments a counter marker.
pub(crate) fn bump_marker(tx: &Transaction<'_>, key: &str) -> Result<(), SqliteStoreError> {
    let current = read_marker(tx, key)?.unwrap_or(0);
    let next = current
        .checked_add(1)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("marker {key} overflow")))?;
    write_marker(tx, key, next)
}

// ============================================================================//
// SECTION: Setup Helpers
// ============================================================================//

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS store_markers (
                    key TEXT PRIMARY KEY,
                    value INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS groups (
                    tag INTEGER PRIMARY KEY,
                    guid TEXT NOT NULL UNIQUE,
                    type TEXT NOT NULL,
                    retired INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS policies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source_id TEXT NOT NULL,
                    destination_id TEXT NOT NULL,
                    protocol TEXT NOT NULL,
                    start_port INTEGER NOT NULL,
                    end_port INTEGER NOT NULL,
                    UNIQUE (source_id, destination_id, protocol, start_port, end_port)
                );
                CREATE INDEX IF NOT EXISTS idx_policies_destination
                    ON policies (destination_id);
                CREATE TABLE IF NOT EXISTS security_groups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    rules TEXT NOT NULL,
                    staging_default INTEGER NOT NULL,
                    running_default INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS security_group_spaces (
                    security_group_id INTEGER NOT NULL,
                    space_guid TEXT NOT NULL,
                    lifecycle TEXT NOT NULL,
                    PRIMARY KEY (security_group_id, space_guid, lifecycle),
                    FOREIGN KEY (security_group_id) REFERENCES security_groups(id)
                        ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_security_group_spaces_space
                    ON security_group_spaces (space_guid);
                CREATE TABLE IF NOT EXISTS destinations (
                    guid TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL,
                    rules_json TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS egress_policies (
                    guid TEXT PRIMARY KEY,
                    source_id TEXT NOT NULL,
                    source_type TEXT NOT NULL,
                    destination_guid TEXT NOT NULL,
                    app_lifecycle TEXT NOT NULL,
                    FOREIGN KEY (destination_guid) REFERENCES destinations(guid)
                        ON DELETE RESTRICT
                );
                CREATE INDEX IF NOT EXISTS idx_egress_policies_source
                    ON egress_policies (source_id);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}
