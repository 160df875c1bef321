// crates/entitlement-gate-core/src/runtime/store.rs
// ============================================================================
// Module: Entitlement Gate In-Memory Stores
// Description: In-memory connection, promo code, and account stores.
// Purpose: Provide deterministic store implementations without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! In-memory implementations of the store interfaces for tests, dry runs, and
//! the `memory` storage backend. Each store guards its collection with a
//! single mutex, so every call is atomic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::Account;
use crate::core::Connection;
use crate::core::ConnectionId;
use crate::core::PromoCode;
use crate::core::PromoCodeValue;
use crate::core::UserId;
use crate::core::dedupe_connections;
use crate::interfaces::AccountStore;
use crate::interfaces::ConnectionStore;
use crate::interfaces::PromoCodeStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Connection Store
// ============================================================================

/// In-memory connection store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConnectionStore {
    /// Connection records in insertion order.
    records: Arc<Mutex<Vec<Connection>>>,
}

impl InMemoryConnectionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with raw records, duplicates included.
    #[must_use]
    pub fn with_records(records: Vec<Connection>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }
}

impl ConnectionStore for InMemoryConnectionStore {
    fn load(&self) -> Result<Vec<Connection>, StoreError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("connection store mutex poisoned".to_string()))?;
        Ok(dedupe_connections(guard.iter().cloned()))
    }

    fn save(&self, connections: &[Connection]) -> Result<Vec<Connection>, StoreError> {
        let deduped = dedupe_connections(connections.iter().cloned());
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("connection store mutex poisoned".to_string()))?;
        guard.clone_from(&deduped);
        drop(guard);
        Ok(deduped)
    }

    fn remove(&self, connection_id: &ConnectionId) -> Result<bool, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("connection store mutex poisoned".to_string()))?;
        let before = guard.len();
        guard.retain(|record| &record.connection_id != connection_id);
        Ok(guard.len() < before)
    }

    fn insert_if_absent(&self, connection: &Connection) -> Result<bool, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("connection store mutex poisoned".to_string()))?;
        if guard.iter().any(|record| record.connection_id == connection.connection_id) {
            return Ok(false);
        }
        guard.push(connection.clone());
        drop(guard);
        Ok(true)
    }
}

// ============================================================================
// SECTION: Promo Code Store
// ============================================================================

/// In-memory promo code ledger.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPromoCodeStore {
    /// Ledger entries in insertion order.
    codes: Arc<Mutex<Vec<PromoCode>>>,
}

impl InMemoryPromoCodeStore {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with entries, duplicates included.
    #[must_use]
    pub fn with_codes(codes: Vec<PromoCode>) -> Self {
        Self {
            codes: Arc::new(Mutex::new(codes)),
        }
    }
}

impl PromoCodeStore for InMemoryPromoCodeStore {
    fn load(&self) -> Result<Vec<PromoCode>, StoreError> {
        let guard = self
            .codes
            .lock()
            .map_err(|_| StoreError::Store("promo code store mutex poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn insert(&self, promo: &PromoCode) -> Result<bool, StoreError> {
        let mut guard = self
            .codes
            .lock()
            .map_err(|_| StoreError::Store("promo code store mutex poisoned".to_string()))?;
        if guard.iter().any(|entry| entry.code == promo.code) {
            return Ok(false);
        }
        guard.push(promo.clone());
        drop(guard);
        Ok(true)
    }

    fn mark_used(&self, code: &PromoCodeValue) -> Result<bool, StoreError> {
        let mut guard = self
            .codes
            .lock()
            .map_err(|_| StoreError::Store("promo code store mutex poisoned".to_string()))?;
        let Some(entry) = guard.iter_mut().find(|entry| &entry.code == code && !entry.used) else {
            return Ok(false);
        };
        entry.used = true;
        drop(guard);
        Ok(true)
    }
}

// ============================================================================
// SECTION: Account Store
// ============================================================================

/// In-memory account store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAccountStore {
    /// Accounts keyed by user id.
    accounts: Arc<Mutex<BTreeMap<UserId, Account>>>,
}

impl InMemoryAccountStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn get(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        let guard = self
            .accounts
            .lock()
            .map_err(|_| StoreError::Store("account store mutex poisoned".to_string()))?;
        Ok(guard.get(&user_id).cloned())
    }

    fn put(&self, account: &Account) -> Result<(), StoreError> {
        self.accounts
            .lock()
            .map_err(|_| StoreError::Store("account store mutex poisoned".to_string()))?
            .insert(account.user_id, account.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Account>, StoreError> {
        let guard = self
            .accounts
            .lock()
            .map_err(|_| StoreError::Store("account store mutex poisoned".to_string()))?;
        Ok(guard.values().cloned().collect())
    }
}
