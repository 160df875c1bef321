// crates/entitlement-gate-store-json/tests/json_store.rs
// ============================================================================
// Module: JSON Store Tests
// Description: Behavior of the JSON document stores on a real filesystem.
// Purpose: Validate document layout, dedup, quarantine, and exactly-once marks.
// Dependencies: entitlement-gate-store-json, entitlement-gate-core, tempfile
// ============================================================================

//! ## Overview
//! Exercises the JSON stores against temporary directories, including
//! documents written in the legacy layout.

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

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use entitlement_gate_core::Account;
use entitlement_gate_core::AccountStore;
use entitlement_gate_core::Connection;
use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::ConnectionStore;
use entitlement_gate_core::GateLog;
use entitlement_gate_core::LogLevel;
use entitlement_gate_core::MemoryLogSink;
use entitlement_gate_core::PromoCode;
use entitlement_gate_core::PromoCodeStore;
use entitlement_gate_core::PromoCodeValue;
use entitlement_gate_core::PromoPlan;
use entitlement_gate_core::StoredDate;
use entitlement_gate_core::SubscriptionSlot;
use entitlement_gate_core::SubscriptionType;
use entitlement_gate_core::UserId;
use entitlement_gate_core::VerificationStatus;
use entitlement_gate_core::core::time::parse_date;
use entitlement_gate_store_json::JsonStoreConfig;
use entitlement_gate_store_json::JsonStoreError;
use entitlement_gate_store_json::JsonStores;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open(dir: &Path) -> (JsonStores, Arc<MemoryLogSink>) {
    let sink = Arc::new(MemoryLogSink::new());
    let log = GateLog::new(sink.clone(), LogLevel::Debug);
    let stores = JsonStores::open(&JsonStoreConfig::in_dir(dir), &log).unwrap();
    (stores, sink)
}

fn connection(id: &str, user: i64, username: &str) -> Connection {
    Connection::new(ConnectionId::new(id), UserId::new(user), username)
}

fn promo(code: &str, plan: &str, expires: &str) -> PromoCode {
    PromoCode {
        code: PromoCodeValue::new(code),
        subscription_type: PromoPlan::from(plan.to_string()),
        expiration_date: StoredDate::from(expires.to_string()),
        used: false,
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

// ============================================================================
// SECTION: Bootstrap
// ============================================================================

#[test]
fn missing_documents_load_empty() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());

    assert!(stores.connections.load().unwrap().is_empty());
    assert!(stores.promo_codes.load().unwrap().is_empty());
    assert!(stores.accounts.list().unwrap().is_empty());
    assert!(stores.accounts.get(UserId::new(1)).unwrap().is_none());
}

#[test]
fn missing_documents_log_a_warning() {
    let dir = TempDir::new().unwrap();
    let (stores, sink) = open(dir.path());

    assert!(stores.connections.load().unwrap().is_empty());

    let events = sink.events_named("store_missing");
    assert!(!events.is_empty());
    assert!(events.iter().all(|event| event.level == LogLevel::Warn));
}

#[test]
fn invalid_document_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let config = JsonStoreConfig {
        accounts_file: "promocodes.json".to_string(),
        ..JsonStoreConfig::in_dir(dir.path())
    };

    let err = JsonStores::open(&config, &GateLog::disabled()).unwrap_err();

    assert!(matches!(err, JsonStoreError::Invalid(_)));
}

// ============================================================================
// SECTION: Document Layout
// ============================================================================

#[test]
fn connections_document_is_an_array_of_records() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());

    stores.connections.save(&[connection("A", 1, "alice")]).unwrap();

    assert_eq!(
        read_json(&dir.path().join("business_connections.json")),
        json!([{"connection_id": "A", "user_id": 1, "username": "alice"}])
    );
}

#[test]
fn accounts_document_is_keyed_by_user_id() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());
    let today = parse_date("2024-01-01").unwrap();

    stores.accounts.put(&Account::new(UserId::new(42), "bob", today)).unwrap();

    assert_eq!(
        read_json(&dir.path().join("user_data.json")),
        json!({
            "42": {
                "username": "bob",
                "registration_date": "2024-01-01",
                "verification_status": "Not Verified",
                "current_subscription": "None",
                "subscription_expiry": "",
                "operation_history": []
            }
        })
    );
}

#[test]
fn account_keys_are_written_in_string_order() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());
    let date = parse_date("2024-01-01").unwrap();

    stores.accounts.put(&Account::new(UserId::new(9), "nine", date)).unwrap();
    stores.accounts.put(&Account::new(UserId::new(10), "ten", date)).unwrap();

    let raw = fs::read_to_string(dir.path().join("user_data.json")).unwrap();
    assert!(raw.find("\"10\"").unwrap() < raw.find("\"9\"").unwrap());
    let listed = stores.accounts.list().unwrap();
    assert_eq!(listed[0].user_id, UserId::new(9));
    assert_eq!(listed[1].user_id, UserId::new(10));
}

#[test]
fn legacy_documents_load_with_placeholders() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("business_connections.json"),
        r#"[{"connection_id": "A", "user_id": 7, "username": null}]"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("user_data.json"),
        r#"{"7": {"username": null, "registration_date": "2024-01-01",
        "verification_status": "Verified", "current_subscription": "7days",
        "subscription_expiry": "2024-01-08",
        "operation_history": ["2024-01-01 10:00:00: Активирована подписка 7 дней"]},
        "admin": {"username": "x"}}"#,
    )
    .unwrap();
    let (stores, sink) = open(dir.path());

    assert_eq!(stores.connections.load().unwrap(), vec![connection("A", 7, "user_7")]);
    let accounts = stores.accounts.list().unwrap();
    assert_eq!(accounts.len(), 1);
    let account = &accounts[0];
    assert_eq!(account.username, "user_7");
    assert_eq!(account.verification_status, VerificationStatus::Verified);
    assert_eq!(account.current_subscription, SubscriptionSlot::Plan(SubscriptionType::SevenDays));
    assert_eq!(sink.events_named("account_key_invalid").len(), 1);
}

#[test]
fn writes_leave_no_temporary_files() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());

    stores.promo_codes.insert(&promo("ABCDEFGH", "1day", "2024-01-02")).unwrap();
    stores.connections.insert_if_absent(&connection("A", 1, "a")).unwrap();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["business_connections.json", "promocodes.json"]);
}

// ============================================================================
// SECTION: Connections
// ============================================================================

#[test]
fn duplicate_ids_on_disk_load_as_latest_entry() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("business_connections.json"),
        r#"[{"connection_id": "A", "user_id": 1, "username": "old"},
            {"connection_id": "A", "user_id": 1, "username": "new"}]"#,
    )
    .unwrap();
    let (stores, _) = open(dir.path());

    assert_eq!(stores.connections.load().unwrap(), vec![connection("A", 1, "new")]);
}

#[test]
fn insert_and_remove_rewrite_the_document() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());

    assert!(stores.connections.insert_if_absent(&connection("A", 1, "a")).unwrap());
    assert!(!stores.connections.insert_if_absent(&connection("A", 2, "b")).unwrap());
    assert!(stores.connections.insert_if_absent(&connection("B", 2, "b")).unwrap());
    assert!(stores.connections.remove(&ConnectionId::new("A")).unwrap());
    assert!(!stores.connections.remove(&ConnectionId::new("A")).unwrap());

    let (reopened, _) = open(dir.path());
    assert_eq!(reopened.connections.load().unwrap(), vec![connection("B", 2, "b")]);
}

// ============================================================================
// SECTION: Corruption
// ============================================================================

#[test]
fn corrupt_document_is_quarantined_and_loads_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("promocodes.json");
    fs::write(&path, b"[{\"code\": ").unwrap();
    let (stores, sink) = open(dir.path());

    assert!(stores.promo_codes.load().unwrap().is_empty());

    assert!(!path.exists());
    let quarantined: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("promocodes.json.corrupt-"))
        .collect();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(
        fs::read(dir.path().join(&quarantined[0])).unwrap(),
        b"[{\"code\": ".to_vec()
    );
    assert_eq!(sink.events_named("store_corrupt_quarantined").len(), 1);
}

#[test]
fn write_after_quarantine_starts_fresh() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("user_data.json"), b"not json").unwrap();
    let (stores, _) = open(dir.path());
    let today = parse_date("2024-03-01").unwrap();

    stores.accounts.put(&Account::new(UserId::new(5), "eve", today)).unwrap();

    assert_eq!(stores.accounts.list().unwrap().len(), 1);
}

// ============================================================================
// SECTION: Promo Codes
// ============================================================================

#[test]
fn promo_insert_rejects_existing_code() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());

    assert!(stores.promo_codes.insert(&promo("ABCDEFGH", "1day", "2024-01-02")).unwrap());
    assert!(!stores.promo_codes.insert(&promo("ABCDEFGH", "7days", "2024-01-02")).unwrap());

    let ledger = stores.promo_codes.load().unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].subscription_type, PromoPlan::Known(SubscriptionType::OneDay));
}

#[test]
fn unknown_plan_labels_survive_a_rewrite() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("promocodes.json"),
        r#"[{"code": "AAAAAAAA", "subscription_type": "90days",
            "expiration_date": "someday", "used": false}]"#,
    )
    .unwrap();
    let (stores, _) = open(dir.path());

    stores.promo_codes.insert(&promo("BBBBBBBB", "1day", "2024-01-02")).unwrap();

    let document = read_json(&dir.path().join("promocodes.json"));
    assert_eq!(document[0]["subscription_type"], json!("90days"));
    assert_eq!(document[0]["expiration_date"], json!("someday"));
}

#[test]
fn concurrent_mark_used_has_a_single_winner() {
    let dir = TempDir::new().unwrap();
    let (stores, _) = open(dir.path());
    stores.promo_codes.insert(&promo("ABCDEFGH", "1day", "2024-01-02")).unwrap();
    let store = Arc::new(stores.promo_codes);

    let handles: Vec<_> = (0 .. 8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.mark_used(&PromoCodeValue::new("ABCDEFGH")).unwrap())
        })
        .collect();
    let winners =
        handles.into_iter().map(|handle| handle.join().unwrap()).filter(|won| *won).count();

    assert_eq!(winners, 1);
    assert!(store.load().unwrap()[0].used);
}
