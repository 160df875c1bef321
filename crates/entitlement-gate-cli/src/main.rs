// crates/entitlement-gate-cli/src/main.rs
// ============================================================================
// Module: Entitlement Gate CLI Entry Point
// Description: Command dispatcher for entitlement administration and events.
// Purpose: Provide admin commands and an NDJSON event dispatch loop.
// Dependencies: clap, entitlement-gate-config, entitlement-gate-core, serde, thiserror
// ============================================================================

//! ## Overview
//! The `entitlement-gate` binary loads `entitlement-gate.toml`, wires the
//! configured stores and permission gateway, and runs one command. All command
//! output is JSON on stdout; log events go to the configured sink. The
//! `dispatch` command reads one inbound event per line and writes one outcome
//! per line, after a startup reconciliation pass.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub(crate) mod wiring;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use entitlement_gate_config::EntitlementGateConfig;
use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::EntitlementGateway;
use entitlement_gate_core::GateLog;
use entitlement_gate_core::InboundEvent;
use entitlement_gate_core::SubscriptionType;
use entitlement_gate_core::UserId;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::wiring::GatewayMode;
use crate::wiring::Runtime;
use crate::wiring::build_log;
use crate::wiring::build_runtime;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of one NDJSON event line.
const MAX_EVENT_LINE_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "entitlement-gate", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (defaults to entitlement-gate.toml or `ENTITLEMENT_GATE_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Verify every stored connection and prune stale ones.
    Reconcile,
    /// Connection record utilities.
    Connection {
        /// Selected connection subcommand.
        #[command(subcommand)]
        command: ConnectionCommand,
    },
    /// Promo code utilities.
    Promo {
        /// Selected promo subcommand.
        #[command(subcommand)]
        command: PromoCommand,
    },
    /// Account utilities.
    Account {
        /// Selected account subcommand.
        #[command(subcommand)]
        command: AccountCommand,
    },
    /// Handle NDJSON inbound events and write NDJSON outcomes.
    Dispatch(DispatchCommand),
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the config file.
    Validate,
}

/// Connection subcommands.
#[derive(Subcommand, Debug)]
enum ConnectionCommand {
    /// Record and verify a granted connection.
    Grant(ConnectionGrantCommand),
    /// List stored connections.
    List,
    /// Remove a stored connection.
    Remove(ConnectionRemoveCommand),
}

/// Arguments for recording a granted connection.
#[derive(Args, Debug)]
struct ConnectionGrantCommand {
    /// Connection identifier.
    #[arg(long, value_name = "ID")]
    connection_id: String,
    /// Granting user.
    #[arg(long, value_name = "USER_ID", allow_hyphen_values = true)]
    user_id: i64,
    /// Granting user's username.
    #[arg(long, value_name = "NAME")]
    username: Option<String>,
}

/// Arguments for removing a connection.
#[derive(Args, Debug)]
struct ConnectionRemoveCommand {
    /// Connection identifier.
    #[arg(long, value_name = "ID")]
    connection_id: String,
}

/// Promo code subcommands.
#[derive(Subcommand, Debug)]
enum PromoCommand {
    /// Issue a new promo code.
    Create(PromoCreateCommand),
    /// List the promo code ledger.
    List,
    /// Redeem a promo code for a user.
    Redeem(PromoRedeemCommand),
}

/// Arguments for issuing a promo code.
#[derive(Args, Debug)]
struct PromoCreateCommand {
    /// Subscription plan label (`1day`, `7days`, `30days`).
    #[arg(long, value_name = "PLAN", default_value = "30days")]
    plan: String,
}

/// Arguments for redeeming a promo code.
#[derive(Args, Debug)]
struct PromoRedeemCommand {
    /// Redeeming user.
    #[arg(long, value_name = "USER_ID", allow_hyphen_values = true)]
    user_id: i64,
    /// Code to redeem; surrounding whitespace is ignored.
    #[arg(long, value_name = "CODE")]
    code: String,
}

/// Account subcommands.
#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Show one account.
    Show(AccountShowCommand),
    /// List all accounts.
    List,
}

/// Arguments for showing an account.
#[derive(Args, Debug)]
struct AccountShowCommand {
    /// Account owner.
    #[arg(long, value_name = "USER_ID", allow_hyphen_values = true)]
    user_id: i64,
}

/// Arguments for the dispatch loop.
#[derive(Args, Debug)]
struct DispatchCommand {
    /// NDJSON input file, or `-` for stdin.
    #[arg(long, value_name = "FILE", default_value = "-")]
    input: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a message.
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = EntitlementGateConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    match cli.command {
        Commands::Config {
            command: ConfigCommand::Validate,
        } => command_config_validate(&config),
        Commands::Reconcile => command_reconcile(&config),
        Commands::Connection {
            command,
        } => command_connection(&config, command),
        Commands::Promo {
            command,
        } => command_promo(&config, command),
        Commands::Account {
            command,
        } => command_account(&config, command),
        Commands::Dispatch(command) => command_dispatch(&config, &command),
    }
}

/// Wires the runtime for a command.
fn runtime(config: &EntitlementGateConfig, mode: GatewayMode) -> CliResult<Runtime> {
    let log = build_log(&config.log)?;
    build_runtime(config, mode, log)
}

// ============================================================================
// SECTION: Config and Reconcile Commands
// ============================================================================

/// Executes the config validation command.
fn command_config_validate(config: &EntitlementGateConfig) -> CliResult<ExitCode> {
    write_json(&json!({
        "valid": true,
        "admins": config.admin.admin_ids.len(),
        "log_chat_configured": config.admin.log_chat_id.is_some(),
    }))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes one reconciliation pass and prints the report.
fn command_reconcile(config: &EntitlementGateConfig) -> CliResult<ExitCode> {
    let runtime = runtime(config, GatewayMode::Live)?;
    let report = runtime.gateway.reconciler().sweep();
    write_json(&report)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Connection Commands
// ============================================================================

/// Dispatches connection subcommands.
fn command_connection(
    config: &EntitlementGateConfig,
    command: ConnectionCommand,
) -> CliResult<ExitCode> {
    match command {
        ConnectionCommand::Grant(command) => {
            let runtime = runtime(config, GatewayMode::Live)?;
            let event = InboundEvent::ConnectionGranted {
                connection_id: ConnectionId::new(command.connection_id),
                user_id: UserId::new(command.user_id),
                username: command.username,
            };
            write_json(&runtime.gateway.dispatch(&event))?;
            Ok(ExitCode::SUCCESS)
        }
        ConnectionCommand::List => {
            let runtime = runtime(config, GatewayMode::Offline)?;
            let connections = runtime
                .services
                .connections
                .load()
                .map_err(|err| CliError::new(err.to_string()))?;
            write_json(&connections)?;
            Ok(ExitCode::SUCCESS)
        }
        ConnectionCommand::Remove(command) => {
            let runtime = runtime(config, GatewayMode::Offline)?;
            let connection_id = ConnectionId::new(command.connection_id);
            let removed = runtime
                .services
                .connections
                .remove(&connection_id)
                .map_err(|err| CliError::new(err.to_string()))?;
            if removed {
                runtime.services.log.warn(
                    "connection_removed",
                    "removed connection by operator command",
                    &[("connection_id", json!(connection_id.as_str()))],
                );
            }
            write_json(&json!({
                "connection_id": connection_id,
                "removed": removed,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Promo Commands
// ============================================================================

/// Dispatches promo subcommands.
fn command_promo(config: &EntitlementGateConfig, command: PromoCommand) -> CliResult<ExitCode> {
    let runtime = runtime(config, GatewayMode::Offline)?;
    match command {
        PromoCommand::Create(command) => {
            let plan = SubscriptionType::parse(command.plan.trim()).ok_or_else(|| {
                CliError::new(format!("unknown subscription plan: {}", command.plan))
            })?;
            let promo = runtime
                .gateway
                .ledger()
                .create(plan)
                .map_err(|err| CliError::new(err.to_string()))?;
            write_json(&promo)?;
            Ok(ExitCode::SUCCESS)
        }
        PromoCommand::List => {
            let ledger = runtime
                .services
                .promo_codes
                .load()
                .map_err(|err| CliError::new(err.to_string()))?;
            write_json(&ledger)?;
            Ok(ExitCode::SUCCESS)
        }
        PromoCommand::Redeem(command) => {
            let redemption =
                runtime.gateway.ledger().redeem(UserId::new(command.user_id), command.code.trim());
            write_json(&redemption)?;
            Ok(if redemption.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

// ============================================================================
// SECTION: Account Commands
// ============================================================================

/// Dispatches account subcommands.
fn command_account(config: &EntitlementGateConfig, command: AccountCommand) -> CliResult<ExitCode> {
    let runtime = runtime(config, GatewayMode::Offline)?;
    match command {
        AccountCommand::Show(command) => {
            let user_id = UserId::new(command.user_id);
            let account = runtime
                .services
                .accounts
                .get(user_id)
                .map_err(|err| CliError::new(err.to_string()))?
                .ok_or_else(|| CliError::new(format!("account {} not found", user_id.get())))?;
            write_json(&account)?;
        }
        AccountCommand::List => {
            let accounts =
                runtime.services.accounts.list().map_err(|err| CliError::new(err.to_string()))?;
            write_json(&accounts)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Dispatch Command
// ============================================================================

/// Output line for an input line that is not a valid event.
#[derive(Debug, Serialize)]
struct RejectedLine {
    /// Always `rejected`.
    outcome: &'static str,
    /// One-based input line number.
    line: usize,
    /// Parse failure description.
    error: String,
}

/// Totals for one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DispatchSummary {
    /// Events handed to the gateway.
    handled: usize,
    /// Lines rejected before dispatch.
    rejected: usize,
}

/// Executes the NDJSON dispatch loop.
fn command_dispatch(
    config: &EntitlementGateConfig,
    command: &DispatchCommand,
) -> CliResult<ExitCode> {
    let runtime = runtime(config, GatewayMode::Live)?;
    startup_sweep(&runtime.gateway, &runtime.services.log);
    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    let summary = if command.input == "-" {
        let stdin = std::io::stdin();
        dispatch_stream(&runtime.gateway, &runtime.services.log, stdin.lock(), &mut output)?
    } else {
        let file = File::open(&command.input).map_err(|err| {
            CliError::new(format!("failed to open input {}: {err}", command.input))
        })?;
        dispatch_stream(&runtime.gateway, &runtime.services.log, BufReader::new(file), &mut output)?
    };
    runtime.services.log.info(
        "dispatch_complete",
        "input exhausted",
        &[("handled", json!(summary.handled)), ("rejected", json!(summary.rejected))],
    );
    Ok(ExitCode::SUCCESS)
}

/// Runs the reconciliation pass performed before handling events.
fn startup_sweep(gateway: &EntitlementGateway, log: &GateLog) {
    let report = gateway.reconciler().sweep();
    log.info(
        "startup_sweep_complete",
        "startup reconciliation finished",
        &[
            ("active", json!(report.active.len())),
            ("pruned", json!(report.pruned.len())),
            ("retained", json!(report.retained.len())),
        ],
    );
}

/// Handles every event line in `input`, writing one outcome line each.
///
/// Blank lines are skipped. Malformed, oversized, or non-UTF-8 lines produce a
/// [`RejectedLine`] and the loop continues. At most [`MAX_EVENT_LINE_BYTES`]
/// of a line are buffered; the remainder of an oversized line is discarded.
fn dispatch_stream<R: BufRead, W: Write>(
    gateway: &EntitlementGateway,
    log: &GateLog,
    mut input: R,
    output: &mut W,
) -> CliResult<DispatchSummary> {
    let mut summary = DispatchSummary::default();
    let mut number = 0_usize;
    while let Some(raw) = read_event_line(&mut input)
        .map_err(|err| CliError::new(format!("failed to read input: {err}")))?
    {
        number += 1;
        let parsed = match raw {
            RawLine::Oversized => Err(format!("event line exceeds {MAX_EVENT_LINE_BYTES} bytes")),
            RawLine::Complete(bytes) => match String::from_utf8(bytes) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => serde_json::from_str::<InboundEvent>(line.trim())
                    .map_err(|err| err.to_string()),
                Err(_) => Err("event line is not valid UTF-8".to_string()),
            },
        };
        match parsed {
            Ok(event) => {
                let outcome = gateway.dispatch(&event);
                write_json_line(output, &outcome)?;
                summary.handled += 1;
            }
            Err(error) => {
                log.warn("event_rejected", &error, &[("line", json!(number))]);
                write_json_line(
                    output,
                    &RejectedLine {
                        outcome: "rejected",
                        line: number,
                        error,
                    },
                )?;
                summary.rejected += 1;
            }
        }
    }
    Ok(summary)
}

/// One line read from the event stream.
#[derive(Debug, PartialEq, Eq)]
enum RawLine {
    /// Line bytes without the trailing newline.
    Complete(Vec<u8>),
    /// Line longer than [`MAX_EVENT_LINE_BYTES`]; its bytes were discarded.
    Oversized,
}

/// Reads the next line, buffering at most [`MAX_EVENT_LINE_BYTES`] + 1 bytes.
///
/// Returns `None` at end of input.
fn read_event_line<R: BufRead>(input: &mut R) -> std::io::Result<Option<RawLine>> {
    let mut buffer = Vec::new();
    let limit = u64::try_from(MAX_EVENT_LINE_BYTES + 1).unwrap_or(u64::MAX);
    let read = input.by_ref().take(limit).read_until(b'\n', &mut buffer)?;
    if read == 0 {
        return Ok(None);
    }
    if buffer.last() == Some(&b'\n') {
        buffer.pop();
        return Ok(Some(RawLine::Complete(buffer)));
    }
    if buffer.len() <= MAX_EVENT_LINE_BYTES {
        return Ok(Some(RawLine::Complete(buffer)));
    }
    skip_rest_of_line(input)?;
    Ok(Some(RawLine::Oversized))
}

/// Consumes input up to and including the next newline.
fn skip_rest_of_line<R: BufRead>(input: &mut R) -> std::io::Result<()> {
    loop {
        let (consumed, done) = {
            let available = input.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(position) => (position + 1, true),
                None => (available.len(), false),
            }
        };
        input.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Serializes `value` as one JSON line to `output` and flushes it.
fn write_json_line<W: Write, T: Serialize>(output: &mut W, value: &T) -> CliResult<()> {
    let payload = serde_json::to_string(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
    writeln!(output, "{payload}")
        .and_then(|()| output.flush())
        .map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes `value` as one JSON line to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    write_json_line(&mut output, value)
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
