// crates/entitlement-gate-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Entitlement Store
// Description: Durable store backend using SQLite WAL.
// Purpose: Provide transactional persistence for connections, codes, accounts.
// Dependencies: entitlement-gate-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteEntitlementStore`], a single `SQLite` database
//! implementing all three core store traits. Promo code redemption is a
//! single-row compare-and-swap and code creation relies on a uniqueness
//! constraint, so concurrent processes sharing the database cannot redeem a
//! code twice.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

#[cfg(test)]
mod tests;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteEntitlementStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
