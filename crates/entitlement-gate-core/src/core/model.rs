// crates/entitlement-gate-core/src/core/model.rs
// ============================================================================
// Module: Entitlement Gate Records
// Description: Connection, account, and promo code records.
// Purpose: Model durable collections as explicit tagged records.
// Dependencies: crate::core::{identifiers, time}, serde, time
// ============================================================================

//! ## Overview
//! Records in this module are the durable state of the gate. Enumerated fields
//! keep their wire labels (`"Not Verified"`, `"1day"`, `"None"`) while values
//! that cannot be interpreted are preserved verbatim so a store round trip
//! never rewrites data it does not understand.
//!
//! Invariants:
//! - A connection id appears at most once after [`dedupe_connections`].
//! - A promo code is expired once midnight of its expiration date has passed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::Date;
use time::PrimitiveDateTime;
use time::Time;

use crate::core::identifiers::ConnectionId;
use crate::core::identifiers::PromoCodeValue;
use crate::core::identifiers::UserId;
use crate::core::time::format_date;
use crate::core::time::parse_date;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// History note appended when a connection grant verifies a user.
pub const CONNECTION_VERIFIED_NOTE: &str = "Business connection verified";

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Delegated access granted by one external account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Opaque connection identifier.
    pub connection_id: ConnectionId,
    /// Owning user identifier.
    pub user_id: UserId,
    /// Username reported when the connection was granted.
    pub username: String,
}

impl Connection {
    /// Creates a connection record.
    #[must_use]
    pub fn new(connection_id: ConnectionId, user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            connection_id,
            user_id,
            username: username.into(),
        }
    }
}

/// Deduplicates connections by id.
///
/// The last record for an id wins; the output keeps the position where each id
/// was first seen.
#[must_use]
pub fn dedupe_connections<I>(connections: I) -> Vec<Connection>
where
    I: IntoIterator<Item = Connection>,
{
    let mut positions: HashMap<ConnectionId, usize> = HashMap::new();
    let mut ordered: Vec<Connection> = Vec::new();
    for connection in connections {
        if let Some(index) = positions.get(&connection.connection_id).copied() {
            ordered[index] = connection;
        } else {
            positions.insert(connection.connection_id.clone(), ordered.len());
            ordered.push(connection);
        }
    }
    ordered
}

// ============================================================================
// SECTION: Enumerations
// ============================================================================

/// Whether a user currently has a connection confirmed valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerificationStatus {
    /// No valid connection has been observed.
    #[default]
    #[serde(rename = "Not Verified")]
    NotVerified,
    /// At least one valid connection has been observed.
    Verified,
}

impl VerificationStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotVerified => "Not Verified",
            Self::Verified => "Verified",
        }
    }
}

/// Subscription plan granted by a promo code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionType {
    /// One day of access.
    #[serde(rename = "1day")]
    OneDay,
    /// Seven days of access.
    #[serde(rename = "7days")]
    SevenDays,
    /// Thirty days of access.
    #[serde(rename = "30days")]
    ThirtyDays,
}

impl SubscriptionType {
    /// All plans in ascending duration.
    pub const ALL: [Self; 3] = [Self::OneDay, Self::SevenDays, Self::ThirtyDays];

    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1day",
            Self::SevenDays => "7days",
            Self::ThirtyDays => "30days",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|plan| plan.as_str() == label)
    }

    /// Returns the plan duration in days.
    #[must_use]
    pub const fn days(self) -> i64 {
        match self {
            Self::OneDay => 1,
            Self::SevenDays => 7,
            Self::ThirtyDays => 30,
        }
    }

    /// Returns the human-readable duration shown to users.
    #[must_use]
    pub const fn display_label(self) -> &'static str {
        match self {
            Self::OneDay => "1 день",
            Self::SevenDays => "7 дней",
            Self::ThirtyDays => "30 дней",
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current subscription slot on an account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionSlot {
    /// No subscription (`"None"`).
    #[default]
    Empty,
    /// Active plan.
    Plan(SubscriptionType),
    /// Stored label that is not a known plan.
    Unrecognized(String),
}

impl From<String> for SubscriptionSlot {
    fn from(value: String) -> Self {
        if value == "None" {
            return Self::Empty;
        }
        SubscriptionType::parse(&value).map_or(Self::Unrecognized(value), Self::Plan)
    }
}

impl From<SubscriptionSlot> for String {
    fn from(value: SubscriptionSlot) -> Self {
        match value {
            SubscriptionSlot::Empty => "None".to_string(),
            SubscriptionSlot::Plan(plan) => plan.as_str().to_string(),
            SubscriptionSlot::Unrecognized(label) => label,
        }
    }
}

/// Plan label stored on a promo code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PromoPlan {
    /// Known plan.
    Known(SubscriptionType),
    /// Label outside the duration table.
    Unrecognized(String),
}

impl PromoPlan {
    /// Returns the known plan, if any.
    #[must_use]
    pub const fn known(&self) -> Option<SubscriptionType> {
        match self {
            Self::Known(plan) => Some(*plan),
            Self::Unrecognized(_) => None,
        }
    }

    /// Returns the stored label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Known(plan) => plan.as_str(),
            Self::Unrecognized(label) => label,
        }
    }
}

impl From<SubscriptionType> for PromoPlan {
    fn from(value: SubscriptionType) -> Self {
        Self::Known(value)
    }
}

impl From<String> for PromoPlan {
    fn from(value: String) -> Self {
        SubscriptionType::parse(&value).map_or(Self::Unrecognized(value), Self::Known)
    }
}

impl From<PromoPlan> for String {
    fn from(value: PromoPlan) -> Self {
        match value {
            PromoPlan::Known(plan) => plan.as_str().to_string(),
            PromoPlan::Unrecognized(label) => label,
        }
    }
}

/// Calendar date stored as `YYYY-MM-DD`, empty, or an unparseable string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StoredDate {
    /// Empty string.
    #[default]
    Empty,
    /// Valid date.
    On(Date),
    /// Stored value that does not parse as a date.
    Malformed(String),
}

impl StoredDate {
    /// Returns the date when the value is valid.
    #[must_use]
    pub const fn date(&self) -> Option<Date> {
        match self {
            Self::On(date) => Some(*date),
            Self::Empty | Self::Malformed(_) => None,
        }
    }
}

impl From<Date> for StoredDate {
    fn from(value: Date) -> Self {
        Self::On(value)
    }
}

impl From<String> for StoredDate {
    fn from(value: String) -> Self {
        if value.is_empty() {
            return Self::Empty;
        }
        parse_date(&value).map_or(Self::Malformed(value), Self::On)
    }
}

impl From<StoredDate> for String {
    fn from(value: StoredDate) -> Self {
        match value {
            StoredDate::Empty => Self::new(),
            StoredDate::On(date) => format_date(date),
            StoredDate::Malformed(raw) => raw,
        }
    }
}

impl fmt::Display for StoredDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::On(date) => f.write_str(&format_date(*date)),
            Self::Malformed(raw) => f.write_str(raw),
        }
    }
}

// ============================================================================
// SECTION: Accounts
// ============================================================================

/// Per-user entitlement and audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account key.
    pub user_id: UserId,
    /// Last known username.
    pub username: String,
    /// Date the account was first created.
    pub registration_date: StoredDate,
    /// Verification state.
    pub verification_status: VerificationStatus,
    /// Active subscription plan.
    pub current_subscription: SubscriptionSlot,
    /// Subscription end date.
    pub subscription_expiry: StoredDate,
    /// Append-only timestamped history.
    pub operation_history: Vec<String>,
}

impl Account {
    /// Creates a default account registered on `today`.
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>, today: Date) -> Self {
        Self {
            user_id,
            username: username.into(),
            registration_date: StoredDate::On(today),
            verification_status: VerificationStatus::NotVerified,
            current_subscription: SubscriptionSlot::Empty,
            subscription_expiry: StoredDate::Empty,
            operation_history: Vec::new(),
        }
    }

    /// Returns the username used when none is known.
    #[must_use]
    pub fn placeholder_username(user_id: UserId) -> String {
        format!("user_{user_id}")
    }

    /// Returns true when the history already records a connection verification.
    #[must_use]
    pub fn has_connection_note(&self) -> bool {
        self.operation_history.iter().any(|entry| {
            entry == CONNECTION_VERIFIED_NOTE
                || entry.ends_with(&format!(": {CONNECTION_VERIFIED_NOTE}"))
        })
    }
}

// ============================================================================
// SECTION: Promo Codes
// ============================================================================

/// Single-use token granting a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    /// Code value.
    pub code: PromoCodeValue,
    /// Plan granted on redemption.
    pub subscription_type: PromoPlan,
    /// Date at whose start the code stops being redeemable.
    pub expiration_date: StoredDate,
    /// Whether the code has been redeemed.
    pub used: bool,
}

impl PromoCode {
    /// Returns true when the code can no longer be redeemed at `now`.
    ///
    /// A code is expired once midnight of its expiration date is strictly
    /// before `now`. Missing or unparseable dates count as expired.
    #[must_use]
    pub fn is_expired(&self, now: PrimitiveDateTime) -> bool {
        self.expiration_date
            .date()
            .is_none_or(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT) < now)
    }
}
