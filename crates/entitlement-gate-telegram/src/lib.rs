// crates/entitlement-gate-telegram/src/lib.rs
// ============================================================================
// Module: Telegram Permission Gateway
// Description: Permission gateway over the Telegram Bot API.
// Purpose: Probe business connections and classify Bot API errors.
// Dependencies: entitlement-gate-core, reqwest
// ============================================================================

//! ## Overview
//! [`TelegramPermissionGateway`] implements the core permission gateway by
//! calling `getBusinessConnection` once per probe. Bot API error descriptions
//! are mapped onto the core's invalid, forbidden, and other classes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;


// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::DEFAULT_API_BASE;
pub use client::TelegramGatewayConfig;
pub use client::TelegramGatewayError;
pub use client::TelegramPermissionGateway;
pub use client::classify_api_error;
