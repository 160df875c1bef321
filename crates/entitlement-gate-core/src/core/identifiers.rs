// crates/entitlement-gate-core/src/core/identifiers.rs
// ============================================================================
// Module: Entitlement Gate Identifiers
// Description: Typed identifiers for users, connections, and promo codes.
// Purpose: Provide serializable keys with stable string or integer forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are thin wrappers that serialize transparently. Connection ids
//! are opaque strings issued by the permission gateway; user ids are the
//! messaging platform's integer ids; promo code values are the 8-character
//! tokens handed to users.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of every generated promo code.
pub const PROMO_CODE_LENGTH: usize = 8;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Messaging platform user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a new user identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

/// Opaque connection identifier issued by the permission gateway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new connection identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Promo code token as typed by users.
///
/// # Invariants
/// - Generated codes are [`PROMO_CODE_LENGTH`] characters from `A-Z0-9`.
/// - Values read back from storage or user input are not normalized; lookups
///   compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromoCodeValue(String);

impl PromoCodeValue {
    /// Creates a promo code value without validation.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the value has the generated code shape.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == PROMO_CODE_LENGTH
            && self.0.bytes().all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit())
    }
}

impl fmt::Display for PromoCodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for PromoCodeValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PromoCodeValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
