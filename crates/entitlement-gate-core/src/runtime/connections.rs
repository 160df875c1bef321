// crates/entitlement-gate-core/src/runtime/connections.rs
// ============================================================================
// Module: Entitlement Gate Connection Registry
// Description: Fail-soft access to the connection store.
// Purpose: Degrade storage failures to logged no-ops for event handlers.
// Dependencies: crate::{core, runtime::services}, serde_json
// ============================================================================

//! ## Overview
//! The registry wraps [`crate::interfaces::ConnectionStore`] so callers never
//! see storage errors: unreadable storage loads as an empty set and failed
//! writes are logged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;

use crate::core::Connection;
use crate::core::ConnectionId;
use crate::core::UserId;
use crate::runtime::services::GateServices;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Fail-soft connection store access.
#[derive(Clone)]
pub struct ConnectionRegistry {
    /// Shared services.
    services: GateServices,
}

impl ConnectionRegistry {
    /// Creates a registry.
    #[must_use]
    pub const fn new(services: GateServices) -> Self {
        Self {
            services,
        }
    }

    /// Loads all connections; storage failures yield an empty set.
    #[must_use]
    pub fn load(&self) -> Vec<Connection> {
        match self.services.connections.load() {
            Ok(connections) => {
                self.services.log.debug(
                    "connections_loaded",
                    "loaded connections",
                    &[("count", json!(connections.len()))],
                );
                connections
            }
            Err(err) => {
                self.services.log.warn("connections_load_failed", &err.to_string(), &[]);
                Vec::new()
            }
        }
    }

    /// Loads the connections owned by `user_id`.
    #[must_use]
    pub fn for_user(&self, user_id: UserId) -> Vec<Connection> {
        self.load().into_iter().filter(|connection| connection.user_id == user_id).collect()
    }

    /// Records a granted connection when its id is new.
    ///
    /// Returns whether a record was added.
    #[must_use]
    pub fn grant(&self, connection: &Connection) -> bool {
        match self.services.connections.insert_if_absent(connection) {
            Ok(added) => {
                if added {
                    self.services.log.info(
                        "connection_added",
                        "added connection",
                        &[
                            ("connection_id", json!(connection.connection_id.as_str())),
                            ("user_id", json!(connection.user_id.get())),
                        ],
                    );
                }
                added
            }
            Err(err) => {
                self.services.log.error(
                    "connection_write_failed",
                    &err.to_string(),
                    &[("connection_id", json!(connection.connection_id.as_str()))],
                );
                false
            }
        }
    }

    /// Removes a connection; returns whether anything was removed.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        match self.services.connections.remove(connection_id) {
            Ok(removed) => {
                if removed {
                    self.services.log.warn(
                        "connection_removed",
                        "removed connection",
                        &[("connection_id", json!(connection_id.as_str()))],
                    );
                }
                removed
            }
            Err(err) => {
                self.services.log.error(
                    "connection_write_failed",
                    &err.to_string(),
                    &[("connection_id", json!(connection_id.as_str()))],
                );
                false
            }
        }
    }
}
