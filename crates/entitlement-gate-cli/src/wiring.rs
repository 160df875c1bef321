// crates/entitlement-gate-cli/src/wiring.rs
// ============================================================================
// Module: Entitlement Gate CLI Wiring
// Description: Builds log sinks, stores, and the permission gateway from config.
// Purpose: Keep backend selection out of the command handlers.
// Dependencies: entitlement-gate-config, entitlement-gate-core, store crates, telegram
// ============================================================================

//! ## Overview
//! Commands that never probe connections are wired with [`OfflineGateway`], so
//! they run without a bot token. Commands that reconcile or verify are wired
//! with the Telegram gateway and fail before touching storage when the token
//! is missing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use entitlement_gate_config::EntitlementGateConfig;
use entitlement_gate_config::LogConfig;
use entitlement_gate_config::LogSinkKind;
use entitlement_gate_config::StorageConfig;
use entitlement_gate_config::StorageType;
use entitlement_gate_core::AccountStore;
use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::ConnectionStore;
use entitlement_gate_core::EntitlementGateway;
use entitlement_gate_core::FileLogSink;
use entitlement_gate_core::GateLog;
use entitlement_gate_core::GateLogSink;
use entitlement_gate_core::GateServices;
use entitlement_gate_core::GatewayError;
use entitlement_gate_core::InMemoryAccountStore;
use entitlement_gate_core::InMemoryConnectionStore;
use entitlement_gate_core::InMemoryPromoCodeStore;
use entitlement_gate_core::NoopLogSink;
use entitlement_gate_core::PermissionGateway;
use entitlement_gate_core::PromoCodeStore;
use entitlement_gate_core::StderrLogSink;
use entitlement_gate_store_json::JsonStores;
use entitlement_gate_store_sqlite::SqliteEntitlementStore;
use entitlement_gate_telegram::TelegramPermissionGateway;
use serde_json::json;

use crate::CliError;
use crate::CliResult;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Whether a command needs live permission probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GatewayMode {
    /// Probe through the Telegram Bot API.
    Live,
    /// Never probe; every probe reports a gateway error.
    Offline,
}

/// Gateway used by commands that never verify connections.
pub(crate) struct OfflineGateway;

impl PermissionGateway for OfflineGateway {
    fn probe_connection(&self, _connection_id: &ConnectionId) -> Result<(), GatewayError> {
        Err(GatewayError::Other("permission gateway is offline for this command".to_string()))
    }
}

/// Fully wired runtime for one CLI invocation.
pub(crate) struct Runtime {
    /// Shared services, also held by the gateway.
    pub(crate) services: GateServices,
    /// Event handling service.
    pub(crate) gateway: EntitlementGateway,
}

/// Store handles for one backend.
struct StoreSet {
    /// Connection records.
    connections: Arc<dyn ConnectionStore>,
    /// Promo code ledger.
    promo_codes: Arc<dyn PromoCodeStore>,
    /// Account records.
    accounts: Arc<dyn AccountStore>,
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Builds the log handle for the configured sink.
pub(crate) fn build_log(config: &LogConfig) -> CliResult<GateLog> {
    let sink: Arc<dyn GateLogSink> = match config.sink {
        LogSinkKind::Stderr => Arc::new(StderrLogSink),
        LogSinkKind::None => Arc::new(NoopLogSink),
        LogSinkKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| CliError::new("file log sink requires log.path".to_string()))?;
            let sink = FileLogSink::new(path).map_err(|err| {
                CliError::new(format!("failed to open log file {}: {err}", path.display()))
            })?;
            Arc::new(sink)
        }
    };
    Ok(GateLog::new(sink, config.level))
}

/// Builds the runtime for a command.
pub(crate) fn build_runtime(
    config: &EntitlementGateConfig,
    mode: GatewayMode,
    log: GateLog,
) -> CliResult<Runtime> {
    let gateway = build_gateway(config, mode)?;
    let stores = open_stores(&config.storage, &log)?;
    let services = GateServices {
        connections: stores.connections,
        promo_codes: stores.promo_codes,
        accounts: stores.accounts,
        gateway,
        clock: Arc::new(config.clock()),
        log,
    };
    services.log.debug(
        "runtime_wired",
        "wired entitlement gate runtime",
        &[("live_gateway", json!(mode == GatewayMode::Live))],
    );
    let gateway = EntitlementGateway::new(services.clone(), config.gateway_settings());
    Ok(Runtime {
        services,
        gateway,
    })
}

/// Builds the permission gateway for `mode`.
fn build_gateway(
    config: &EntitlementGateConfig,
    mode: GatewayMode,
) -> CliResult<Arc<dyn PermissionGateway>> {
    match mode {
        GatewayMode::Offline => Ok(Arc::new(OfflineGateway)),
        GatewayMode::Live => {
            let telegram = config
                .gateway
                .telegram_config()
                .map_err(|err| CliError::new(err.to_string()))?;
            let gateway = TelegramPermissionGateway::new(telegram)
                .map_err(|err| CliError::new(err.to_string()))?;
            Ok(Arc::new(gateway))
        }
    }
}

/// Opens the configured storage backend.
fn open_stores(storage: &StorageConfig, log: &GateLog) -> CliResult<StoreSet> {
    match storage.store_type {
        StorageType::Json => {
            let stores = JsonStores::open(&storage.json_config(), log)
                .map_err(|err| CliError::new(err.to_string()))?;
            Ok(StoreSet {
                connections: Arc::new(stores.connections),
                promo_codes: Arc::new(stores.promo_codes),
                accounts: Arc::new(stores.accounts),
            })
        }
        StorageType::Sqlite => {
            let config = storage.sqlite_config().map_err(|err| CliError::new(err.to_string()))?;
            let store = SqliteEntitlementStore::new(config)
                .map_err(|err| CliError::new(err.to_string()))?;
            Ok(StoreSet {
                connections: Arc::new(store.clone()),
                promo_codes: Arc::new(store.clone()),
                accounts: Arc::new(store),
            })
        }
        StorageType::Memory => Ok(StoreSet {
            connections: Arc::new(InMemoryConnectionStore::new()),
            promo_codes: Arc::new(InMemoryPromoCodeStore::new()),
            accounts: Arc::new(InMemoryAccountStore::new()),
        }),
    }
}
