// crates/entitlement-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Entitlement Gate Runtime
// Description: Verifier, ledger, reconciliation, and event dispatch services.
// Purpose: Keep connection and entitlement state consistent across events.
// Dependencies: crate::{core, interfaces, log}, rand
// ============================================================================

//! ## Overview
//! Runtime modules hold the stateful logic of the gate. Every component is
//! built from one [`GateServices`] bundle so stores, the permission gateway,
//! the clock, and the log handle are wired once at process start and shared
//! by reference counting.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod accounts;
pub mod connections;
pub mod gateway;
pub mod ledger;
pub mod reconcile;
pub mod services;
pub mod store;
pub mod verifier;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use accounts::AccountBook;
pub use connections::ConnectionRegistry;
pub use gateway::AdminNotice;
pub use gateway::ButtonAction;
pub use gateway::DispatchOutcome;
pub use gateway::EntitlementGateway;
pub use gateway::GatewaySettings;
pub use gateway::InboundEvent;
pub use ledger::CodeSource;
pub use ledger::LedgerError;
pub use ledger::PromoLedger;
pub use ledger::RandomCodeSource;
pub use ledger::Redemption;
pub use ledger::ScriptedCodeSource;
pub use reconcile::ReconcilePolicy;
pub use reconcile::ReconcileReport;
pub use reconcile::Reconciler;
pub use services::GateServices;
pub use store::InMemoryAccountStore;
pub use store::InMemoryConnectionStore;
pub use store::InMemoryPromoCodeStore;
pub use verifier::PermissionVerdict;
pub use verifier::PermissionVerifier;
