// crates/entitlement-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Entitlement Store
// Description: Connection, promo code, and account stores backed by SQLite WAL.
// Purpose: Persist entitlement state with one transaction per mutating call.
// Dependencies: entitlement-gate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteEntitlementStore`] keeps three tables in one database file:
//! `connections` and `promo_codes` preserve insertion order through an
//! autoincrement sequence column, and `accounts` is keyed by user id with the
//! history stored as a JSON array. Every mutating call commits one immediate
//! transaction. Redemption uses `UPDATE ... WHERE used = 0` and code creation
//! uses `INSERT ... ON CONFLICT DO NOTHING`, so the row counts returned by
//! `SQLite` decide races.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use entitlement_gate_core::Account;
use entitlement_gate_core::AccountStore;
use entitlement_gate_core::Connection as GateConnection;
use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::ConnectionStore;
use entitlement_gate_core::PromoCode;
use entitlement_gate_core::PromoCodeStore;
use entitlement_gate_core::PromoCodeValue;
use entitlement_gate_core::PromoPlan;
use entitlement_gate_core::StoreError;
use entitlement_gate_core::StoredDate;
use entitlement_gate_core::SubscriptionSlot;
use entitlement_gate_core::UserId;
use entitlement_gate_core::VerificationStatus;
use entitlement_gate_core::dedupe_connections;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
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
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
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

/// Configuration for the `SQLite` entitlement store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
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
}

impl SqliteStoreConfig {
    /// Returns a config for `path` with default pragmas.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored row cannot be decoded.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store configuration or data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => {
                Self::Store(format!("schema version mismatch: {message}"))
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed connection, promo code, and account store.
///
/// Clones share one database connection.
#[derive(Debug, Clone)]
pub struct SqliteEntitlementStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared database connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteEntitlementStore {
    /// Opens an `SQLite`-backed store, creating the schema when absent.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unsafe, the database
    /// cannot be opened, or the schema version is unsupported.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("sqlite connection mutex poisoned".to_string()))
    }

    /// Loads connections in insertion order.
    fn load_connections(&self) -> Result<Vec<GateConnection>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare(
            "SELECT connection_id, user_id, username FROM connections ORDER BY seq ASC",
        )?;
        let rows = statement.query_map(params![], |row| {
            Ok(GateConnection::new(
                ConnectionId::new(row.get::<_, String>(0)?),
                UserId::new(row.get(1)?),
                row.get::<_, String>(2)?,
            ))
        })?;
        let connections = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(dedupe_connections(connections))
    }

    /// Replaces every connection in one transaction.
    fn replace_connections(
        &self,
        connections: &[GateConnection],
    ) -> Result<Vec<GateConnection>, SqliteStoreError> {
        let deduped = dedupe_connections(connections.iter().cloned());
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM connections", params![])?;
        for connection in &deduped {
            tx.execute(
                "INSERT INTO connections (connection_id, user_id, username) VALUES (?1, ?2, ?3)",
                params![
                    connection.connection_id.as_str(),
                    connection.user_id.get(),
                    connection.username
                ],
            )?;
        }
        tx.commit()?;
        Ok(deduped)
    }

    /// Executes one statement in its own transaction; returns changed rows.
    fn execute_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<usize, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(sql, params)?;
        tx.commit()?;
        Ok(changed)
    }

    /// Loads promo codes in insertion order.
    fn load_promo_codes(&self) -> Result<Vec<PromoCode>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare(
            "SELECT code, subscription_type, expiration_date, used FROM promo_codes ORDER BY seq \
             ASC",
        )?;
        let rows = statement.query_map(params![], |row| {
            Ok(PromoCode {
                code: PromoCodeValue::new(row.get::<_, String>(0)?),
                subscription_type: PromoPlan::from(row.get::<_, String>(1)?),
                expiration_date: StoredDate::from(row.get::<_, String>(2)?),
                used: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Loads accounts, optionally limited to one user.
    fn query_accounts(&self, user_id: Option<UserId>) -> Result<Vec<Account>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare(
            "SELECT user_id, username, registration_date, verification_status, \
             current_subscription, subscription_expiry, operation_history FROM accounts WHERE \
             (?1 IS NULL OR user_id = ?1) ORDER BY user_id ASC",
        )?;
        let rows = statement.query_map(params![user_id.map(UserId::get)], |row| {
            Ok(AccountRow {
                user_id: row.get(0)?,
                username: row.get(1)?,
                registration_date: row.get(2)?,
                verification_status: row.get(3)?,
                current_subscription: row.get(4)?,
                subscription_expiry: row.get(5)?,
                operation_history: row.get(6)?,
            })
        })?;
        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?.into_account()?);
        }
        Ok(accounts)
    }

    /// Upserts one account.
    fn upsert_account(&self, account: &Account) -> Result<(), SqliteStoreError> {
        let history = serde_json::to_string(&account.operation_history)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        self.execute_one(
            "INSERT INTO accounts (user_id, username, registration_date, verification_status, \
             current_subscription, subscription_expiry, operation_history) VALUES (?1, ?2, ?3, \
             ?4, ?5, ?6, ?7) ON CONFLICT(user_id) DO UPDATE SET username = excluded.username, \
             registration_date = excluded.registration_date, verification_status = \
             excluded.verification_status, current_subscription = excluded.current_subscription, \
             subscription_expiry = excluded.subscription_expiry, operation_history = \
             excluded.operation_history",
            params![
                account.user_id.get(),
                account.username,
                String::from(account.registration_date.clone()),
                account.verification_status.as_str(),
                String::from(account.current_subscription.clone()),
                String::from(account.subscription_expiry.clone()),
                history
            ],
        )?;
        Ok(())
    }
}

impl ConnectionStore for SqliteEntitlementStore {
    fn load(&self) -> Result<Vec<GateConnection>, StoreError> {
        Ok(self.load_connections()?)
    }

    fn save(&self, connections: &[GateConnection]) -> Result<Vec<GateConnection>, StoreError> {
        Ok(self.replace_connections(connections)?)
    }

    fn remove(&self, connection_id: &ConnectionId) -> Result<bool, StoreError> {
        let changed = self.execute_one(
            "DELETE FROM connections WHERE connection_id = ?1",
            params![connection_id.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn insert_if_absent(&self, connection: &GateConnection) -> Result<bool, StoreError> {
        let changed = self.execute_one(
            "INSERT INTO connections (connection_id, user_id, username) VALUES (?1, ?2, ?3) ON \
             CONFLICT(connection_id) DO NOTHING",
            params![
                connection.connection_id.as_str(),
                connection.user_id.get(),
                connection.username
            ],
        )?;
        Ok(changed == 1)
    }
}

impl PromoCodeStore for SqliteEntitlementStore {
    fn load(&self) -> Result<Vec<PromoCode>, StoreError> {
        Ok(self.load_promo_codes()?)
    }

    fn insert(&self, promo: &PromoCode) -> Result<bool, StoreError> {
        let changed = self.execute_one(
            "INSERT INTO promo_codes (code, subscription_type, expiration_date, used) VALUES (?1, \
             ?2, ?3, ?4) ON CONFLICT(code) DO NOTHING",
            params![
                promo.code.as_str(),
                promo.subscription_type.label(),
                String::from(promo.expiration_date.clone()),
                promo.used
            ],
        )?;
        Ok(changed == 1)
    }

    fn mark_used(&self, code: &PromoCodeValue) -> Result<bool, StoreError> {
        let changed = self.execute_one(
            "UPDATE promo_codes SET used = 1 WHERE code = ?1 AND used = 0",
            params![code.as_str()],
        )?;
        Ok(changed == 1)
    }
}

impl AccountStore for SqliteEntitlementStore {
    fn get(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        Ok(self.query_accounts(Some(user_id))?.into_iter().next())
    }

    fn put(&self, account: &Account) -> Result<(), StoreError> {
        Ok(self.upsert_account(account)?)
    }

    fn list(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.query_accounts(None)?)
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Raw `accounts` row.
struct AccountRow {
    /// Account key.
    user_id: i64,
    /// Username.
    username: String,
    /// Registration date text.
    registration_date: String,
    /// Verification status label.
    verification_status: String,
    /// Subscription label.
    current_subscription: String,
    /// Expiry date text.
    subscription_expiry: String,
    /// History JSON array.
    operation_history: String,
}

impl AccountRow {
    /// Decodes the row.
    fn into_account(self) -> Result<Account, SqliteStoreError> {
        let verification_status = match self.verification_status.as_str() {
            "Verified" => VerificationStatus::Verified,
            "Not Verified" => VerificationStatus::NotVerified,
            other => {
                return Err(SqliteStoreError::Corrupt(format!(
                    "unknown verification status for user {}: {other}",
                    self.user_id
                )));
            }
        };
        let operation_history: Vec<String> = serde_json::from_str(&self.operation_history)
            .map_err(|err| {
                SqliteStoreError::Corrupt(format!(
                    "history for user {} is not a string array: {err}",
                    self.user_id
                ))
            })?;
        Ok(Account {
            user_id: UserId::new(self.user_id),
            username: self.username,
            registration_date: StoredDate::from(self.registration_date),
            verification_status,
            current_subscription: SubscriptionSlot::from(self.current_subscription),
            subscription_expiry: StoredDate::from(self.subscription_expiry),
            operation_history,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

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
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(SqliteStoreError::Invalid(
            "store path contains an overlong component".to_string(),
        ));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection and applies pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    Ok(connection)
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS connections (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    connection_id TEXT NOT NULL UNIQUE,
                    user_id INTEGER NOT NULL,
                    username TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_connections_user_id ON connections (user_id);
                CREATE TABLE IF NOT EXISTS promo_codes (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    code TEXT NOT NULL UNIQUE,
                    subscription_type TEXT NOT NULL,
                    expiration_date TEXT NOT NULL,
                    used INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS accounts (
                    user_id INTEGER PRIMARY KEY,
                    username TEXT NOT NULL,
                    registration_date TEXT NOT NULL,
                    verification_status TEXT NOT NULL,
                    current_subscription TEXT NOT NULL,
                    subscription_expiry TEXT NOT NULL,
                    operation_history TEXT NOT NULL
                );",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}
