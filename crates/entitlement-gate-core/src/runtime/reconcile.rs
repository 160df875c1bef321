// crates/entitlement-gate-core/src/runtime/reconcile.rs
// ============================================================================
// Module: Entitlement Gate Reconciliation
// Description: Sweep stored connections through the permission verifier.
// Purpose: Prune stale connections and sync verification status to accounts.
// Dependencies: crate::{core, runtime}, serde, serde_json
// ============================================================================

//! ## Overview
//! A reconciliation pass verifies every stored connection once. Valid
//! connections are kept and their owners upserted as `Verified`; the rest are
//! pruned or retained according to [`ReconcilePolicy`]. A failure while
//! processing one connection (including a panic) is logged and that connection
//! is pruned; the sweep always reaches the remaining records.
//!
//! Pruning never reverts an account to `Not Verified`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::core::Connection;
use crate::core::ConnectionId;
use crate::runtime::accounts::AccountBook;
use crate::runtime::connections::ConnectionRegistry;
use crate::runtime::services::GateServices;
use crate::runtime::verifier::PermissionVerdict;
use crate::runtime::verifier::PermissionVerifier;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Which non-valid verdicts remove a connection.
///
/// `Invalid` verdicts always prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcilePolicy {
    /// Prune connections that lack rights.
    #[serde(default = "default_prune")]
    pub prune_forbidden: bool,
    /// Prune connections whose probe failed transiently.
    #[serde(default = "default_prune")]
    pub prune_transient: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            prune_forbidden: true,
            prune_transient: true,
        }
    }
}

impl ReconcilePolicy {
    /// Returns true when `verdict` removes the connection.
    #[must_use]
    pub const fn prunes(self, verdict: PermissionVerdict) -> bool {
        match verdict {
            PermissionVerdict::Valid => false,
            PermissionVerdict::Invalid => true,
            PermissionVerdict::Forbidden => self.prune_forbidden,
            PermissionVerdict::Transient => self.prune_transient,
        }
    }
}

/// Default prune flag.
const fn default_prune() -> bool {
    true
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Connections confirmed valid.
    pub active: Vec<Connection>,
    /// Connections removed from the store.
    pub pruned: Vec<ConnectionId>,
    /// Non-valid connections kept for a later retry.
    pub retained: Vec<ConnectionId>,
}

/// Per-connection result of a pass.
enum Disposition {
    /// Keep and count as active.
    Active,
    /// Remove from the store.
    Prune(&'static str),
    /// Keep without counting as active.
    Retain(&'static str),
}

// ============================================================================
// SECTION: Reconciler
// ============================================================================

/// Runs reconciliation passes.
#[derive(Clone)]
pub struct Reconciler {
    /// Shared services.
    services: GateServices,
    /// Non-valid verdict handling.
    policy: ReconcilePolicy,
    /// Permission classification.
    verifier: PermissionVerifier,
    /// Account upserts.
    accounts: AccountBook,
    /// Connection store access.
    registry: ConnectionRegistry,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(services: GateServices, policy: ReconcilePolicy) -> Self {
        Self {
            policy,
            verifier: PermissionVerifier::new(services.gateway.clone(), services.log.clone()),
            accounts: AccountBook::new(services.clone()),
            registry: ConnectionRegistry::new(services.clone()),
            services,
        }
    }

    /// Runs a pass and returns the connections confirmed valid.
    #[must_use]
    pub fn reconcile(&self) -> Vec<Connection> {
        self.sweep().active
    }

    /// Runs a pass and returns the full report.
    #[must_use]
    pub fn sweep(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for connection in self.registry.load() {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.process(&connection)));
            let disposition = match outcome {
                Ok(Ok(disposition)) => disposition,
                Ok(Err(reason)) => {
                    self.log_fault(&connection, &reason);
                    Disposition::Prune("fault")
                }
                Err(_) => {
                    self.log_fault(&connection, "panic while processing connection");
                    Disposition::Prune("fault")
                }
            };
            match disposition {
                Disposition::Active => report.active.push(connection),
                Disposition::Prune(reason) => {
                    self.registry.remove(&connection.connection_id);
                    self.services.log.warn(
                        "connection_pruned",
                        "removed connection during reconciliation",
                        &[
                            ("connection_id", json!(connection.connection_id.as_str())),
                            ("user_id", json!(connection.user_id.get())),
                            ("reason", json!(reason)),
                        ],
                    );
                    report.pruned.push(connection.connection_id);
                }
                Disposition::Retain(reason) => {
                    self.services.log.info(
                        "connection_retained",
                        "kept unverified connection for retry",
                        &[
                            ("connection_id", json!(connection.connection_id.as_str())),
                            ("reason", json!(reason)),
                        ],
                    );
                    report.retained.push(connection.connection_id);
                }
            }
        }
        self.services.log.info(
            "reconcile_complete",
            "loaded active connections",
            &[
                ("active", json!(report.active.len())),
                ("pruned", json!(report.pruned.len())),
                ("retained", json!(report.retained.len())),
            ],
        );
        report
    }

    /// Verifies one connection and applies account side effects.
    fn process(&self, connection: &Connection) -> Result<Disposition, String> {
        if connection.connection_id.as_str().trim().is_empty() {
            return Err("empty connection id".to_string());
        }
        let verdict = self.verifier.verify(&connection.connection_id);
        if verdict.is_valid() {
            self.accounts
                .mark_verified(connection.user_id, &connection.username)
                .map_err(|err| err.to_string())?;
            return Ok(Disposition::Active);
        }
        if self.policy.prunes(verdict) {
            Ok(Disposition::Prune(verdict.as_str()))
        } else {
            Ok(Disposition::Retain(verdict.as_str()))
        }
    }

    /// Logs a per-connection failure.
    fn log_fault(&self, connection: &Connection, reason: &str) {
        self.services.log.error(
            "connection_processing_failed",
            reason,
            &[
                ("connection_id", json!(connection.connection_id.as_str())),
                ("user_id", json!(connection.user_id.get())),
            ],
        );
    }
}
