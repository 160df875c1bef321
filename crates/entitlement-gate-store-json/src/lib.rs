// crates/entitlement-gate-store-json/src/lib.rs
// ============================================================================
// Module: JSON Document Stores
// Description: Durable store backends using one JSON document per collection.
// Purpose: Persist connections, promo codes, and accounts in the legacy layout.
// Dependencies: entitlement-gate-core, serde_json
// ============================================================================

//! ## Overview
//! This crate implements the core store traits over three JSON documents:
//! `business_connections.json`, `promocodes.json`, and `user_data.json`.
//! Writes go to a temporary sibling, are fsynced, then renamed into place.
//! Every read-modify-write runs under a per-document mutex. A missing file is
//! an empty collection; a corrupt file is renamed aside and treated as empty.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod document;
pub mod store;


// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use document::JsonDocument;
pub use document::JsonStoreError;
pub use document::MAX_DOCUMENT_BYTES;
pub use store::JsonAccountStore;
pub use store::JsonConnectionStore;
pub use store::JsonPromoCodeStore;
pub use store::JsonStoreConfig;
pub use store::JsonStores;
