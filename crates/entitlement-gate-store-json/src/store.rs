// crates/entitlement-gate-store-json/src/store.rs
// ============================================================================
// Module: JSON Stores
// Description: Connection, promo code, and account stores over JSON documents.
// Purpose: Implement the core store traits in the legacy on-disk layout.
// Dependencies: entitlement-gate-core, serde
// ============================================================================

//! ## Overview
//! Document layouts:
//! - connections: array of `{connection_id, user_id, username}`
//! - promo codes: array of `{code, subscription_type, expiration_date, used}`
//! - accounts: object keyed by the stringified user id; records omit `user_id`
//!
//! A `null` username in the connections document loads as `user_<id>`.
//! Account keys that are not integers are skipped with a warning. Account
//! keys are written in string order (`"10"` sorts before `"9"`), so the first
//! write reorders a legacy accounts document; lookups never depend on order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use entitlement_gate_core::Account;
use entitlement_gate_core::AccountStore;
use entitlement_gate_core::Connection;
use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::ConnectionStore;
use entitlement_gate_core::GateLog;
use entitlement_gate_core::PromoCode;
use entitlement_gate_core::PromoCodeStore;
use entitlement_gate_core::PromoCodeValue;
use entitlement_gate_core::StoreError;
use entitlement_gate_core::StoredDate;
use entitlement_gate_core::SubscriptionSlot;
use entitlement_gate_core::UserId;
use entitlement_gate_core::VerificationStatus;
use entitlement_gate_core::dedupe_connections;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::document::JsonDocument;
use crate::document::JsonStoreError;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Locations of the three JSON documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonStoreConfig {
    /// Directory holding the documents.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Connections document name.
    #[serde(default = "default_connections_file")]
    pub connections_file: String,
    /// Promo code document name.
    #[serde(default = "default_promo_codes_file")]
    pub promo_codes_file: String,
    /// Accounts document name.
    #[serde(default = "default_accounts_file")]
    pub accounts_file: String,
}

impl Default for JsonStoreConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            connections_file: default_connections_file(),
            promo_codes_file: default_promo_codes_file(),
            accounts_file: default_accounts_file(),
        }
    }
}

impl JsonStoreConfig {
    /// Returns a config rooted at `dir` with default file names.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Validates file names.
    ///
    /// # Errors
    ///
    /// Returns [`JsonStoreError::Invalid`] when a file name is empty or
    /// contains a path separator, or when two documents share a name.
    pub fn validate(&self) -> Result<(), JsonStoreError> {
        let names = [&self.connections_file, &self.promo_codes_file, &self.accounts_file];
        for name in names {
            if name.trim().is_empty() || name.contains('/') || name.contains('\\') {
                return Err(JsonStoreError::Invalid(format!("invalid document name: `{name}`")));
            }
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(JsonStoreError::Invalid("document names must be distinct".to_string()));
        }
        Ok(())
    }
}

/// Default data directory.
fn default_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Default connections document name.
fn default_connections_file() -> String {
    "business_connections.json".to_string()
}

/// Default promo code document name.
fn default_promo_codes_file() -> String {
    "promocodes.json".to_string()
}

/// Default accounts document name.
fn default_accounts_file() -> String {
    "user_data.json".to_string()
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// On-disk connection entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConnectionRecord {
    /// Connection identifier.
    connection_id: ConnectionId,
    /// Owning user.
    user_id: UserId,
    /// Username; older documents may hold `null`.
    #[serde(default)]
    username: Option<String>,
}

impl From<ConnectionRecord> for Connection {
    fn from(record: ConnectionRecord) -> Self {
        let username =
            record.username.unwrap_or_else(|| Account::placeholder_username(record.user_id));
        Self::new(record.connection_id, record.user_id, username)
    }
}

impl From<&Connection> for ConnectionRecord {
    fn from(connection: &Connection) -> Self {
        Self {
            connection_id: connection.connection_id.clone(),
            user_id: connection.user_id,
            username: Some(connection.username.clone()),
        }
    }
}

/// On-disk account entry, keyed externally by user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    /// Last known username.
    #[serde(default)]
    username: Option<String>,
    /// Registration date.
    #[serde(default)]
    registration_date: StoredDate,
    /// Verification state.
    #[serde(default)]
    verification_status: VerificationStatus,
    /// Active plan.
    #[serde(default)]
    current_subscription: SubscriptionSlot,
    /// Subscription end date.
    #[serde(default)]
    subscription_expiry: StoredDate,
    /// History entries.
    #[serde(default)]
    operation_history: Vec<String>,
}

impl AccountRecord {
    /// Rebuilds the account for `user_id`.
    fn into_account(self, user_id: UserId) -> Account {
        Account {
            user_id,
            username: self.username.unwrap_or_else(|| Account::placeholder_username(user_id)),
            registration_date: self.registration_date,
            verification_status: self.verification_status,
            current_subscription: self.current_subscription,
            subscription_expiry: self.subscription_expiry,
            operation_history: self.operation_history,
        }
    }
}

impl From<&Account> for AccountRecord {
    fn from(account: &Account) -> Self {
        Self {
            username: Some(account.username.clone()),
            registration_date: account.registration_date.clone(),
            verification_status: account.verification_status,
            current_subscription: account.current_subscription.clone(),
            subscription_expiry: account.subscription_expiry.clone(),
            operation_history: account.operation_history.clone(),
        }
    }
}

/// Accounts document body, keyed and ordered by the stringified user id.
type AccountMap = BTreeMap<String, AccountRecord>;

// ============================================================================
// SECTION: Store Bundle
// ============================================================================

/// The three JSON stores opened from one config.
#[derive(Debug)]
pub struct JsonStores {
    /// Connection store.
    pub connections: JsonConnectionStore,
    /// Promo code store.
    pub promo_codes: JsonPromoCodeStore,
    /// Account store.
    pub accounts: JsonAccountStore,
}

impl JsonStores {
    /// Opens the stores described by `config`, creating the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`JsonStoreError`] when the config is invalid or the directory
    /// cannot be created.
    pub fn open(config: &JsonStoreConfig, log: &GateLog) -> Result<Self, JsonStoreError> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir).map_err(|err| JsonStoreError::Io(err.to_string()))?;
        Ok(Self {
            connections: JsonConnectionStore::new(
                config.dir.join(&config.connections_file),
                log.clone(),
            ),
            promo_codes: JsonPromoCodeStore::new(
                config.dir.join(&config.promo_codes_file),
                log.clone(),
            ),
            accounts: JsonAccountStore::new(config.dir.join(&config.accounts_file), log.clone()),
        })
    }
}

// ============================================================================
// SECTION: Connection Store
// ============================================================================

/// Connection store over an array document.
#[derive(Debug)]
pub struct JsonConnectionStore {
    /// Backing document.
    document: JsonDocument,
}

impl JsonConnectionStore {
    /// Creates a store over `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, log: GateLog) -> Self {
        Self {
            document: JsonDocument::new(path, log),
        }
    }
}

impl ConnectionStore for JsonConnectionStore {
    fn load(&self) -> Result<Vec<Connection>, StoreError> {
        let records: Vec<ConnectionRecord> = self.document.read()?;
        Ok(dedupe_connections(records.into_iter().map(Connection::from)))
    }

    fn save(&self, connections: &[Connection]) -> Result<Vec<Connection>, StoreError> {
        let deduped = dedupe_connections(connections.iter().cloned());
        let records: Vec<ConnectionRecord> = deduped.iter().map(ConnectionRecord::from).collect();
        self.document.write(&records)?;
        Ok(deduped)
    }

    fn remove(&self, connection_id: &ConnectionId) -> Result<bool, StoreError> {
        let removed = self.document.update(|records: &mut Vec<ConnectionRecord>| {
            let before = records.len();
            records.retain(|record| &record.connection_id != connection_id);
            records.len() != before
        })?;
        Ok(removed)
    }

    fn insert_if_absent(&self, connection: &Connection) -> Result<bool, StoreError> {
        let added = self.document.update(|records: &mut Vec<ConnectionRecord>| {
            if records.iter().any(|record| record.connection_id == connection.connection_id) {
                return false;
            }
            records.push(ConnectionRecord::from(connection));
            true
        })?;
        Ok(added)
    }
}

// ============================================================================
// SECTION: Promo Code Store
// ============================================================================

/// Promo code ledger over an array document.
#[derive(Debug)]
pub struct JsonPromoCodeStore {
    /// Backing document.
    document: JsonDocument,
}

impl JsonPromoCodeStore {
    /// Creates a store over `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, log: GateLog) -> Self {
        Self {
            document: JsonDocument::new(path, log),
        }
    }
}

impl PromoCodeStore for JsonPromoCodeStore {
    fn load(&self) -> Result<Vec<PromoCode>, StoreError> {
        Ok(self.document.read()?)
    }

    fn insert(&self, promo: &PromoCode) -> Result<bool, StoreError> {
        let inserted = self.document.update(|ledger: &mut Vec<PromoCode>| {
            if ledger.iter().any(|entry| entry.code == promo.code) {
                return false;
            }
            ledger.push(promo.clone());
            true
        })?;
        Ok(inserted)
    }

    fn mark_used(&self, code: &PromoCodeValue) -> Result<bool, StoreError> {
        let marked = self.document.update(|ledger: &mut Vec<PromoCode>| {
            match ledger.iter_mut().find(|entry| &entry.code == code && !entry.used) {
                Some(entry) => {
                    entry.used = true;
                    true
                }
                None => false,
            }
        })?;
        Ok(marked)
    }
}

// ============================================================================
// SECTION: Account Store
// ============================================================================

/// Account store over an object document keyed by user id.
#[derive(Debug)]
pub struct JsonAccountStore {
    /// Backing document.
    document: JsonDocument,
    /// Log handle for skipped keys.
    log: GateLog,
}

impl JsonAccountStore {
    /// Creates a store over `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, log: GateLog) -> Self {
        Self {
            document: JsonDocument::new(path, log.clone()),
            log,
        }
    }
}

impl AccountStore for JsonAccountStore {
    fn get(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        let mut accounts: AccountMap = self.document.read()?;
        Ok(accounts.remove(&user_id.to_string()).map(|record| record.into_account(user_id)))
    }

    fn put(&self, account: &Account) -> Result<(), StoreError> {
        self.document.update(|accounts: &mut AccountMap| {
            accounts.insert(account.user_id.to_string(), AccountRecord::from(account));
        })?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Account>, StoreError> {
        let accounts: AccountMap = self.document.read()?;
        let mut listed = Vec::with_capacity(accounts.len());
        for (key, record) in accounts {
            match key.parse::<i64>() {
                Ok(raw) => listed.push(record.into_account(UserId::new(raw))),
                Err(_) => self.log.warn(
                    "account_key_invalid",
                    "skipped account with non-integer key",
                    &[("key", json!(key))],
                ),
            }
        }
        listed.sort_by_key(|account| account.user_id);
        Ok(listed)
    }
}
