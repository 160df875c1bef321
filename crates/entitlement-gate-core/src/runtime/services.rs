// crates/entitlement-gate-core/src/runtime/services.rs
// ============================================================================
// Module: Entitlement Gate Services
// Description: Shared bundle of stores, gateway, clock, and log handle.
// Purpose: Replace ambient globals with one explicit dependency bundle.
// Dependencies: crate::{core, interfaces, log}
// ============================================================================

//! ## Overview
//! [`GateServices`] is cloned into every runtime component. Clones share the
//! same underlying stores.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::Clock;
use crate::interfaces::AccountStore;
use crate::interfaces::ConnectionStore;
use crate::interfaces::PermissionGateway;
use crate::interfaces::PromoCodeStore;
use crate::log::GateLog;
use crate::runtime::store::InMemoryAccountStore;
use crate::runtime::store::InMemoryConnectionStore;
use crate::runtime::store::InMemoryPromoCodeStore;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Dependencies shared by every runtime component.
#[derive(Clone)]
pub struct GateServices {
    /// Connection records.
    pub connections: Arc<dyn ConnectionStore>,
    /// Promo code ledger.
    pub promo_codes: Arc<dyn PromoCodeStore>,
    /// Account records.
    pub accounts: Arc<dyn AccountStore>,
    /// External permission gateway.
    pub gateway: Arc<dyn PermissionGateway>,
    /// Local calendar clock.
    pub clock: Arc<dyn Clock>,
    /// Log handle.
    pub log: GateLog,
}

impl GateServices {
    /// Creates a bundle backed by fresh in-memory stores.
    #[must_use]
    pub fn in_memory(
        gateway: Arc<dyn PermissionGateway>,
        clock: Arc<dyn Clock>,
        log: GateLog,
    ) -> Self {
        Self {
            connections: Arc::new(InMemoryConnectionStore::new()),
            promo_codes: Arc::new(InMemoryPromoCodeStore::new()),
            accounts: Arc::new(InMemoryAccountStore::new()),
            gateway,
            clock,
            log,
        }
    }
}
