// crates/entitlement-gate-core/src/runtime/verifier.rs
// ============================================================================
// Module: Entitlement Gate Permission Verifier
// Description: Four-way classification of permission gateway probes.
// Purpose: Separate stale records from connections that are not yet authorized.
// Dependencies: crate::{core, interfaces, log}, serde
// ============================================================================

//! ## Overview
//! The verifier issues exactly one gateway probe per call. `Invalid` means the
//! record is garbage and must be pruned; `Forbidden` means rights are missing
//! but may still be granted; `Transient` covers every other failure and is
//! retried on a later pass.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::core::ConnectionId;
use crate::interfaces::GatewayError;
use crate::interfaces::PermissionGateway;
use crate::log::GateLog;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Classified probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionVerdict {
    /// Connection exists with full rights.
    Valid,
    /// Connection is unknown or revoked.
    Invalid,
    /// Connection lacks required rights.
    Forbidden,
    /// Probe failed for another reason.
    Transient,
}

impl PermissionVerdict {
    /// Returns true for [`PermissionVerdict::Valid`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns the snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Forbidden => "forbidden",
            Self::Transient => "transient",
        }
    }
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Classifies permission gateway responses.
#[derive(Clone)]
pub struct PermissionVerifier {
    /// Permission gateway.
    gateway: Arc<dyn PermissionGateway>,
    /// Log handle.
    log: GateLog,
}

impl PermissionVerifier {
    /// Creates a verifier over `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<dyn PermissionGateway>, log: GateLog) -> Self {
        Self {
            gateway,
            log,
        }
    }

    /// Probes a connection once and classifies the answer.
    #[must_use]
    pub fn verify(&self, connection_id: &ConnectionId) -> PermissionVerdict {
        match self.gateway.probe_connection(connection_id) {
            Ok(()) => PermissionVerdict::Valid,
            Err(GatewayError::ConnectionInvalid(detail)) => {
                self.log.info(
                    "permission_invalid",
                    &detail,
                    &[("connection_id", json!(connection_id.as_str()))],
                );
                PermissionVerdict::Invalid
            }
            Err(GatewayError::Forbidden(detail)) => {
                self.log.info(
                    "permission_forbidden",
                    &detail,
                    &[("connection_id", json!(connection_id.as_str()))],
                );
                PermissionVerdict::Forbidden
            }
            Err(GatewayError::Other(detail)) => {
                self.log.error(
                    "permission_check_error",
                    &detail,
                    &[("connection_id", json!(connection_id.as_str()))],
                );
                PermissionVerdict::Transient
            }
        }
    }
}
