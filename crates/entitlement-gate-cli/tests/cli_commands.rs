// crates/entitlement-gate-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests running the entitlement-gate binary.
// Purpose: Validate config handling, admin commands, and NDJSON dispatch.
// Dependencies: entitlement-gate-cli binary, tempfile, tiny_http
// ============================================================================

//! ## Overview
//! Runs the compiled binary against temporary config and data directories. A
//! local `tiny_http` server stands in for the Bot API where commands verify
//! connections.

#![allow(
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

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;
use std::process::Stdio;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const TOKEN_ENV: &str = "ENTITLEMENT_GATE_BOT_TOKEN";

fn entitlement_gate_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_entitlement-gate"))
}

/// Writes a config file into `root` and returns its path.
fn write_config(root: &Path, body: &str) -> PathBuf {
    let path = root.join("entitlement-gate.toml");
    fs::write(&path, body).unwrap();
    path
}

/// Config using JSON storage under `root` with no gateway override.
fn json_config(root: &Path) -> PathBuf {
    let data = root.join("data");
    write_config(
        root,
        &format!(
            "[storage]\ndir = {:?}\n\n[admin]\nadmin_ids = [1000]\n\n[log]\nsink = \"none\"\n",
            data.to_string_lossy()
        ),
    )
}

/// Config pointing the gateway at a local fake Bot API.
fn live_config(root: &Path, addr: SocketAddr) -> PathBuf {
    let data = root.join("data");
    write_config(
        root,
        &format!(
            concat!(
                "[gateway]\napi_base = \"http://{addr}\"\nallow_http = true\n",
                "token = \"42:SECRET\"\ntimeout_ms = 5000\n\n",
                "[storage]\ndir = {dir:?}\n\n",
                "[admin]\nadmin_ids = [1000]\n\n",
                "[log]\nsink = \"file\"\npath = {log:?}\n",
            ),
            addr = addr,
            dir = data.to_string_lossy(),
            log = root.join("gate.log").to_string_lossy(),
        ),
    )
}

/// Serves `{"ok": true}` to every request until idle for a few seconds.
fn spawn_fake_bot_api() -> SocketAddr {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    thread::spawn(move || {
        while let Ok(Some(request)) = server.recv_timeout(Duration::from_secs(20)) {
            let header = Header::from_bytes("Content-Type", "application/json").unwrap();
            let body = r#"{"ok": true, "result": {"id": "BC1", "can_reply": true}}"#;
            let _ = request.respond(Response::from_string(body).with_header(header));
        }
    });
    addr
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(entitlement_gate_bin())
        .args(args)
        .arg("--config")
        .arg(config)
        .env_remove(TOKEN_ENV)
        .output()
        .unwrap()
}

fn run_with_stdin(config: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(entitlement_gate_bin())
        .args(args)
        .arg("--config")
        .arg(config)
        .env_remove(TOKEN_ENV)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(stdin.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn stdout_lines(output: &Output) -> Vec<Value> {
    String::from_utf8(output.stdout.clone())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ============================================================================
// SECTION: Config Tests
// ============================================================================

#[test]
fn config_validate_reports_valid_config() {
    let root = TempDir::new().unwrap();
    let config = json_config(root.path());

    let output = run(&config, &["config", "validate"]);

    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["valid"], true);
    assert_eq!(report["admins"], 1);
}

#[test]
fn config_validate_fails_closed_on_invalid_config() {
    let root = TempDir::new().unwrap();
    let config = write_config(root.path(), "[storage]\ntype = \"sqlite\"\n");

    let output = run(&config, &["config", "validate"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sqlite storage requires path"));
}

#[test]
fn live_commands_require_a_bot_token() {
    let root = TempDir::new().unwrap();
    let config = json_config(root.path());

    let output = run(&config, &["reconcile"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(TOKEN_ENV));
}

// ============================================================================
// SECTION: Admin Command Tests
// ============================================================================

#[test]
fn promo_create_redeem_and_account_show() {
    let root = TempDir::new().unwrap();
    let config = json_config(root.path());

    let created = run(&config, &["promo", "create"]);
    assert!(created.status.success());
    let promo = stdout_json(&created);
    let code = promo["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 8);
    assert_eq!(promo["subscription_type"], "30days");
    assert_eq!(promo["used"], false);

    let padded = format!("  {code} ");
    let redeemed = run(&config, &["promo", "redeem", "--user-id", "7", "--code", &padded]);
    assert!(redeemed.status.success());
    let redemption = stdout_json(&redeemed);
    assert_eq!(redemption["success"], true);
    assert_eq!(redemption["plan"], "30days");

    let again = run(&config, &["promo", "redeem", "--user-id", "8", "--code", &code]);
    assert!(!again.status.success());
    let rejection = stdout_json(&again);
    assert_eq!(rejection["success"], false);
    assert_eq!(rejection["message"], "Промокод не найден или был использован.");

    let ledger = stdout_json(&run(&config, &["promo", "list"]));
    assert_eq!(ledger.as_array().unwrap().len(), 1);
    assert_eq!(ledger[0]["used"], true);

    let shown = run(&config, &["account", "show", "--user-id", "7"]);
    assert!(shown.status.success());
    let account = stdout_json(&shown);
    assert_eq!(account["current_subscription"], "30days");
    assert_eq!(account["verification_status"], "Verified");

    let stored = fs::read_to_string(root.path().join("data/promocodes.json")).unwrap();
    assert!(stored.contains(&code));
}

#[test]
fn promo_create_rejects_unknown_plan() {
    let root = TempDir::new().unwrap();
    let config = json_config(root.path());

    let output = run(&config, &["promo", "create", "--plan", "90days"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown subscription plan"));
}

#[test]
fn account_show_reports_missing_account() {
    let root = TempDir::new().unwrap();
    let config = json_config(root.path());

    let output = run(&config, &["account", "show", "--user-id", "404"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("account 404 not found"));
}

#[test]
fn sqlite_backend_serves_offline_commands() {
    let root = TempDir::new().unwrap();
    let db = root.path().join("state/gate.db");
    let config = write_config(
        root.path(),
        &format!(
            "[storage]\ntype = \"sqlite\"\npath = {:?}\n\n[log]\nsink = \"none\"\n",
            db.to_string_lossy()
        ),
    );

    let removed = stdout_json(&run(&config, &["connection", "remove", "--connection-id", "BC9"]));
    assert_eq!(removed["removed"], false);
    assert_eq!(stdout_json(&run(&config, &["account", "list"])), Value::Array(Vec::new()));
    assert_eq!(stdout_json(&run(&config, &["connection", "list"])), Value::Array(Vec::new()));
    assert!(db.exists());
}

// ============================================================================
// SECTION: Live Gateway Tests
// ============================================================================

#[test]
fn connection_grant_then_reconcile_against_fake_api() {
    let root = TempDir::new().unwrap();
    let config = live_config(root.path(), spawn_fake_bot_api());

    let granted = run(
        &config,
        &["connection", "grant", "--connection-id", "BC1", "--user-id", "11", "--username", "al"],
    );
    assert!(granted.status.success());
    let outcome = stdout_json(&granted);
    assert_eq!(outcome["outcome"], "connection_recorded");
    assert_eq!(outcome["verdict"], "valid");

    let listed = stdout_json(&run(&config, &["connection", "list"]));
    assert_eq!(listed[0]["connection_id"], "BC1");

    let report = stdout_json(&run(&config, &["reconcile"]));
    assert_eq!(report["active"].as_array().unwrap().len(), 1);
    assert!(report["pruned"].as_array().unwrap().is_empty());

    let log = fs::read_to_string(root.path().join("gate.log")).unwrap();
    assert!(log.contains("reconcile_complete"));
    assert!(!log.contains("SECRET"));
}

#[test]
fn dispatch_streams_outcomes_for_ndjson_events() {
    let root = TempDir::new().unwrap();
    let config = live_config(root.path(), spawn_fake_bot_api());
    let created = stdout_json(&run(&config, &["promo", "create"]));
    let code = created["code"].as_str().unwrap();

    let input = format!(
        "{}\n{}\nnot json\n{}\n",
        r#"{"type":"connection_granted","connection_id":"BC1","user_id":11,"username":"al"}"#,
        format_args!(r#"{{"type":"text","user_id":11,"text":" {code} "}}"#),
        r#"{"type":"button","user_id":11,"action":"create_promo"}"#,
    );
    let output = run_with_stdin(&config, &["dispatch"], &input);

    assert!(output.status.success());
    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["outcome"], "connection_recorded");
    assert_eq!(lines[1]["outcome"], "promo_redemption");
    assert_eq!(lines[1]["redemption"]["success"], true);
    assert_eq!(lines[2]["outcome"], "rejected");
    assert_eq!(lines[2]["line"], 3);
    assert_eq!(lines[3]["outcome"], "denied");

    let log = fs::read_to_string(root.path().join("gate.log")).unwrap();
    assert!(log.contains("startup_sweep_complete"));
    assert!(log.contains("dispatch_complete"));
}
