// crates/entitlement-gate-config/src/lib.rs
// ============================================================================
// Module: Entitlement Gate Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for entitlement-gate.toml semantics.
// Dependencies: entitlement-gate-core, entitlement-gate-store-*, serde, toml
// ============================================================================

//! ## Overview
//! `entitlement-gate-config` defines the configuration model for the
//! Entitlement Gate binary. Loading is strict and fail-closed: unknown keys,
//! oversized files, and inconsistent sections are rejected before any store or
//! gateway is opened.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;


// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
