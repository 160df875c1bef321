// crates/entitlement-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Entitlement Gate Interfaces
// Description: Backend-agnostic interfaces for durable stores and permissions.
// Purpose: Define the contract surfaces used by the entitlement runtime.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Interfaces describe how the runtime reaches durable collections and the
//! external permission gateway without embedding backend details. Stores own
//! their records outright; the runtime only ever holds copies.
//!
//! Mutating store calls are single-key compare-and-swap where exactly-once
//! semantics matter ([`PromoCodeStore::mark_used`], [`PromoCodeStore::insert`],
//! [`ConnectionStore::insert_if_absent`]).

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::Account;
use crate::core::Connection;
use crate::core::ConnectionId;
use crate::core::PromoCode;
use crate::core::PromoCodeValue;
use crate::core::UserId;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Durable store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Store data is corrupt.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Store data is invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Backend-specific failure.
    #[error("store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Connection Store
// ============================================================================

/// Durable, deduplicated set of connection records.
pub trait ConnectionStore: Send + Sync {
    /// Loads every stored connection, deduplicated by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when storage cannot be read at all. Backends that
    /// degrade corrupt data to an empty set report it through logging instead.
    fn load(&self) -> Result<Vec<Connection>, StoreError>;

    /// Overwrites the stored set and returns what was persisted.
    ///
    /// Duplicate ids keep the last record; order follows first appearance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn save(&self, connections: &[Connection]) -> Result<Vec<Connection>, StoreError>;

    /// Removes the connection with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn remove(&self, connection_id: &ConnectionId) -> Result<bool, StoreError>;

    /// Adds a connection when its id is not yet stored.
    ///
    /// Returns `true` when the record was added.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_if_absent(&self, connection: &Connection) -> Result<bool, StoreError>;
}

// ============================================================================
// SECTION: Promo Code Store
// ============================================================================

/// Durable ledger of issued promo codes.
pub trait PromoCodeStore: Send + Sync {
    /// Loads every promo code in ledger order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when storage cannot be read.
    fn load(&self) -> Result<Vec<PromoCode>, StoreError>;

    /// Appends a promo code unless the code value already exists.
    ///
    /// Returns `false` on collision without modifying the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert(&self, promo: &PromoCode) -> Result<bool, StoreError>;

    /// Marks the first unused entry for `code` as used.
    ///
    /// Returns `false` when no unused entry exists, so exactly one caller can
    /// win for a given entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn mark_used(&self, code: &PromoCodeValue) -> Result<bool, StoreError>;
}

// ============================================================================
// SECTION: Account Store
// ============================================================================

/// Durable per-user entitlement records.
pub trait AccountStore: Send + Sync {
    /// Loads a single account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when storage cannot be read.
    fn get(&self, user_id: UserId) -> Result<Option<Account>, StoreError>;

    /// Overwrites the account keyed by its user id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn put(&self, account: &Account) -> Result<(), StoreError>;

    /// Lists every account ordered by user id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when storage cannot be read.
    fn list(&self) -> Result<Vec<Account>, StoreError>;
}

// ============================================================================
// SECTION: Permission Gateway
// ============================================================================

/// Boundary errors from the permission gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The connection is unknown or revoked.
    #[error("connection invalid: {0}")]
    ConnectionInvalid(String),
    /// The connection lacks the required rights.
    #[error("connection forbidden: {0}")]
    Forbidden(String),
    /// Any other failure (network, malformed response, unexpected status).
    #[error("gateway error: {0}")]
    Other(String),
}

/// External system queried for connection rights.
pub trait PermissionGateway: Send + Sync {
    /// Probes a connection once.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] classified by the gateway's response.
    fn probe_connection(&self, connection_id: &ConnectionId) -> Result<(), GatewayError>;
}
