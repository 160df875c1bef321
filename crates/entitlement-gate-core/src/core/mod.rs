// crates/entitlement-gate-core/src/core/mod.rs
// ============================================================================
// Module: Entitlement Gate Core Types
// Description: Domain records, identifiers, and calendar helpers.
// Purpose: Group the data model shared by stores, gateways, and runtime services.
// Dependencies: crate::core::{identifiers, model, time}
// ============================================================================

//! ## Overview
//! Core types model the three durable collections (connections, promo codes,
//! accounts) as explicit tagged records. Cross-references between records are
//! by identifier only.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod identifiers;
pub mod model;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::ConnectionId;
pub use identifiers::PromoCodeValue;
pub use identifiers::UserId;
pub use model::Account;
pub use model::Connection;
pub use model::PromoCode;
pub use model::PromoPlan;
pub use model::StoredDate;
pub use model::SubscriptionSlot;
pub use model::SubscriptionType;
pub use model::VerificationStatus;
pub use model::dedupe_connections;
pub use time::Clock;
pub use time::FixedClock;
pub use time::SystemClock;
