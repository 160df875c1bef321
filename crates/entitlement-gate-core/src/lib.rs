// crates/entitlement-gate-core/src/lib.rs
// ============================================================================
// Module: Entitlement Gate Core Library
// Description: Public API surface for the Entitlement Gate core.
// Purpose: Expose domain types, interfaces, log sinks, and runtime services.
// Dependencies: crate::{core, interfaces, log, runtime}
// ============================================================================

//! ## Overview
//! Entitlement Gate core keeps locally persisted connection records consistent
//! with live permission state and grants subscriptions through single-use promo
//! codes. It is backend-agnostic: durable stores and the permission gateway are
//! reached only through the traits in [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod log;
pub mod runtime;


// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AccountStore;
pub use interfaces::ConnectionStore;
pub use interfaces::GatewayError;
pub use interfaces::PermissionGateway;
pub use interfaces::PromoCodeStore;
pub use interfaces::StoreError;
pub use log::FileLogSink;
pub use log::GateLog;
pub use log::GateLogEvent;
pub use log::GateLogSink;
pub use log::LogLevel;
pub use log::MemoryLogSink;
pub use log::NoopLogSink;
pub use log::StderrLogSink;
pub use runtime::AccountBook;
pub use runtime::AdminNotice;
pub use runtime::ButtonAction;
pub use runtime::CodeSource;
pub use runtime::ConnectionRegistry;
pub use runtime::DispatchOutcome;
pub use runtime::EntitlementGateway;
pub use runtime::GateServices;
pub use runtime::GatewaySettings;
pub use runtime::InMemoryAccountStore;
pub use runtime::InMemoryConnectionStore;
pub use runtime::InMemoryPromoCodeStore;
pub use runtime::InboundEvent;
pub use runtime::LedgerError;
pub use runtime::PermissionVerdict;
pub use runtime::PermissionVerifier;
pub use runtime::PromoLedger;
pub use runtime::RandomCodeSource;
pub use runtime::ReconcilePolicy;
pub use runtime::ReconcileReport;
pub use runtime::Reconciler;
pub use runtime::Redemption;
pub use runtime::ScriptedCodeSource;
