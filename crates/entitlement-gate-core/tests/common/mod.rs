// crates/entitlement-gate-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared helpers for entitlement-gate-core tests.
// Purpose: Provide a scripted permission gateway and a wired service harness.
// Dependencies: entitlement-gate-core, time
// ============================================================================

//! ## Overview
//! Provides a deterministic harness: in-memory stores, a fixed clock, a
//! scripted permission gateway, and a capturing log sink.

#![allow(
    dead_code,
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use entitlement_gate_core::Connection;
use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::FixedClock;
use entitlement_gate_core::GateLog;
use entitlement_gate_core::GateServices;
use entitlement_gate_core::GatewayError;
use entitlement_gate_core::InMemoryAccountStore;
use entitlement_gate_core::InMemoryConnectionStore;
use entitlement_gate_core::InMemoryPromoCodeStore;
use entitlement_gate_core::LogLevel;
use entitlement_gate_core::MemoryLogSink;
use entitlement_gate_core::PermissionGateway;
use entitlement_gate_core::UserId;
use time::Date;
use time::Month;

// ============================================================================
// SECTION: Scripted Gateway
// ============================================================================

/// Scripted gateway answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Success response.
    Valid,
    /// `BUSINESS_CONNECTION_INVALID`.
    Invalid,
    /// Missing rights.
    Forbidden,
    /// Network-style failure.
    Network,
    /// Panic inside the gateway call.
    Panic,
}

/// Permission gateway answering from a script.
pub struct ScriptedGateway {
    /// Per-connection answers.
    answers: Mutex<HashMap<String, Probe>>,
    /// One-shot answers consumed before the per-connection answer.
    queued: Mutex<HashMap<String, VecDeque<Probe>>>,
    /// Answer for unscripted connections.
    fallback: Probe,
    /// Probed connection ids in order.
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    /// Creates a gateway answering `fallback` for unscripted ids.
    pub fn new(fallback: Probe) -> Self {
        Self {
            answers: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the answer for one connection id.
    pub fn set(&self, connection_id: &str, probe: Probe) {
        self.answers.lock().unwrap().insert(connection_id.to_string(), probe);
    }

    /// Queues a one-shot answer for one connection id.
    pub fn queue(&self, connection_id: &str, probe: Probe) {
        self.queued
            .lock()
            .unwrap()
            .entry(connection_id.to_string())
            .or_default()
            .push_back(probe);
    }

    /// Returns the probed ids.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PermissionGateway for ScriptedGateway {
    fn probe_connection(&self, connection_id: &ConnectionId) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(connection_id.to_string());
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(connection_id.as_str())
            .and_then(VecDeque::pop_front);
        let scripted = self
            .answers
            .lock()
            .unwrap()
            .get(connection_id.as_str())
            .copied()
            .unwrap_or(self.fallback);
        match queued.unwrap_or(scripted) {
            Probe::Valid => Ok(()),
            Probe::Invalid => Err(GatewayError::ConnectionInvalid(
                "Bad Request: BUSINESS_CONNECTION_INVALID".to_string(),
            )),
            Probe::Forbidden => Err(GatewayError::Forbidden("Forbidden: no rights".to_string())),
            Probe::Network => Err(GatewayError::Other("connection reset".to_string())),
            Probe::Panic => panic!("scripted gateway panic"),
        }
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Wired services plus handles to the concrete test doubles.
pub struct Harness {
    /// Services passed to runtime components.
    pub services: GateServices,
    /// Fixed clock.
    pub clock: Arc<FixedClock>,
    /// Scripted gateway.
    pub gateway: Arc<ScriptedGateway>,
    /// Captured log events.
    pub sink: Arc<MemoryLogSink>,
    /// Connection store handle.
    pub connections: InMemoryConnectionStore,
    /// Promo code store handle.
    pub promo_codes: InMemoryPromoCodeStore,
    /// Account store handle.
    pub accounts: InMemoryAccountStore,
}

/// Builds a calendar date.
pub fn date(year: i32, month: u8, day: u8) -> Date {
    Date::from_calendar_date(year, Month::try_from(month).unwrap(), day).unwrap()
}

/// Builds a harness at noon on the given date with a `Valid` fallback gateway.
pub fn harness_on(year: i32, month: u8, day: u8) -> Harness {
    harness_with(year, month, day, Probe::Valid)
}

/// Builds a harness with an explicit gateway fallback.
pub fn harness_with(year: i32, month: u8, day: u8, fallback: Probe) -> Harness {
    let clock = Arc::new(FixedClock::at_noon(date(year, month, day)));
    let gateway = Arc::new(ScriptedGateway::new(fallback));
    let sink = Arc::new(MemoryLogSink::new());
    let connections = InMemoryConnectionStore::new();
    let promo_codes = InMemoryPromoCodeStore::new();
    let accounts = InMemoryAccountStore::new();
    let services = GateServices {
        connections: Arc::new(connections.clone()),
        promo_codes: Arc::new(promo_codes.clone()),
        accounts: Arc::new(accounts.clone()),
        gateway: gateway.clone(),
        clock: clock.clone(),
        log: GateLog::new(sink.clone(), LogLevel::Debug),
    };
    Harness {
        services,
        clock,
        gateway,
        sink,
        connections,
        promo_codes,
        accounts,
    }
}

/// Builds a connection record.
pub fn connection(id: &str, user: i64, username: &str) -> Connection {
    Connection::new(ConnectionId::new(id), UserId::new(user), username)
}
