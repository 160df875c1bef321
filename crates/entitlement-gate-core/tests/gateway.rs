// crates/entitlement-gate-core/tests/gateway.rs
// ============================================================================
// Module: Entitlement Gateway Dispatch Tests
// Description: Event dispatch through the entitlement gateway service.
// Purpose: Validate handler routing, admin checks, and failure containment.
// Dependencies: entitlement-gate-core, serde_json
// ============================================================================
//! ## Overview
//! Feeds inbound events to [`EntitlementGateway`] and checks outcomes and the
//! resulting store state.

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

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use entitlement_gate_core::Account;
use entitlement_gate_core::AccountStore;
use entitlement_gate_core::ButtonAction;
use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::ConnectionStore;
use entitlement_gate_core::DispatchOutcome;
use entitlement_gate_core::EntitlementGateway;
use entitlement_gate_core::GatewaySettings;
use entitlement_gate_core::InboundEvent;
use entitlement_gate_core::PermissionVerdict;
use entitlement_gate_core::PromoCodeStore;
use entitlement_gate_core::ReconcilePolicy;
use entitlement_gate_core::ScriptedCodeSource;
use entitlement_gate_core::StoreError;
use entitlement_gate_core::SubscriptionType;
use entitlement_gate_core::UserId;
use entitlement_gate_core::VerificationStatus;
use serde_json::json;

use crate::common::Harness;
use crate::common::Probe;
use crate::common::connection;
use crate::common::harness_on;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const ADMIN: i64 = 1000;

fn gateway(harness: &Harness, log_chat_id: Option<i64>) -> EntitlementGateway {
    let settings = GatewaySettings {
        admin_ids: BTreeSet::from([UserId::new(ADMIN)]),
        log_chat_id,
        ..GatewaySettings::default()
    };
    EntitlementGateway::with_code_source(
        harness.services.clone(),
        settings,
        Box::new(ScriptedCodeSource::new(["PROMO001", "PROMO002"])),
    )
}

fn granted(connection_id: &str, user: i64, username: Option<&str>) -> InboundEvent {
    InboundEvent::ConnectionGranted {
        connection_id: ConnectionId::new(connection_id),
        user_id: UserId::new(user),
        username: username.map(str::to_string),
    }
}

fn button(user: i64, action: ButtonAction) -> InboundEvent {
    InboundEvent::Button {
        user_id: UserId::new(user),
        action,
    }
}

fn text(user: i64, text: &str) -> InboundEvent {
    InboundEvent::Text {
        user_id: UserId::new(user),
        text: text.to_string(),
    }
}

/// Account store whose reads always fail.
struct BrokenAccounts;

impl AccountStore for BrokenAccounts {
    fn get(&self, _user_id: UserId) -> Result<Option<Account>, StoreError> {
        Err(StoreError::Corrupt("bad json".to_string()))
    }

    fn put(&self, _account: &Account) -> Result<(), StoreError> {
        Err(StoreError::Io("read-only".to_string()))
    }

    fn list(&self) -> Result<Vec<Account>, StoreError> {
        Err(StoreError::Corrupt("bad json".to_string()))
    }
}

// ============================================================================
// SECTION: Connection Grants
// ============================================================================

#[test]
fn valid_grant_records_connection_and_verifies_user() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, Some(-42));

    let outcome = gateway.dispatch(&granted("BC1", 7, Some("alice")));

    let DispatchOutcome::ConnectionRecorded {
        added,
        verdict,
        notice,
        ..
    } = outcome
    else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(added);
    assert_eq!(verdict, PermissionVerdict::Valid);
    let notice = notice.unwrap();
    assert_eq!(notice.chat_id, -42);
    assert_eq!(notice.username, "alice");
    assert_eq!(harness.connections.load().unwrap(), vec![connection("BC1", 7, "alice")]);
    let account = harness.accounts.get(UserId::new(7)).unwrap().unwrap();
    assert_eq!(account.verification_status, VerificationStatus::Verified);
    assert_eq!(
        account.operation_history,
        vec!["2024-01-01 12:00:00: Business connection verified"]
    );
}

#[test]
fn repeated_grant_does_not_duplicate_history_or_record() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, None);

    gateway.dispatch(&granted("BC1", 7, Some("alice")));
    let outcome = gateway.dispatch(&granted("BC1", 7, Some("alice")));

    assert!(matches!(
        outcome,
        DispatchOutcome::ConnectionRecorded { added: false, notice: None, .. }
    ));
    assert_eq!(harness.connections.load().unwrap().len(), 1);
    let account = harness.accounts.get(UserId::new(7)).unwrap().unwrap();
    assert_eq!(account.operation_history.len(), 1);
}

#[test]
fn forbidden_grant_keeps_connection_without_verifying() {
    let harness = harness_on(2024, 1, 1);
    harness.gateway.set("BC2", Probe::Forbidden);
    let gateway = gateway(&harness, None);

    let outcome = gateway.dispatch(&granted("BC2", 8, None));

    assert!(matches!(
        outcome,
        DispatchOutcome::ConnectionRecorded { verdict: PermissionVerdict::Forbidden, .. }
    ));
    assert_eq!(harness.connections.load().unwrap(), vec![connection("BC2", 8, "user_8")]);
    assert!(harness.accounts.get(UserId::new(8)).unwrap().is_none());
}

#[test]
fn invalid_grant_is_removed_immediately() {
    let harness = harness_on(2024, 1, 1);
    harness.gateway.set("BC3", Probe::Invalid);
    let gateway = gateway(&harness, None);

    gateway.dispatch(&granted("BC3", 8, Some("mallory")));

    assert!(harness.connections.load().unwrap().is_empty());
}

// ============================================================================
// SECTION: Start and Admin Actions
// ============================================================================

#[test]
fn start_greets_admins_with_active_count() {
    let harness = harness_on(2024, 1, 1);
    harness.connections.save(&[connection("A", 1, "a"), connection("B", 2, "b")]).unwrap();
    harness.gateway.set("B", Probe::Invalid);
    let gateway = gateway(&harness, None);

    assert_eq!(
        gateway.dispatch(&InboundEvent::Start {
            user_id: UserId::new(ADMIN)
        }),
        DispatchOutcome::AdminPanel {
            user_id: UserId::new(ADMIN),
            active_connections: 1
        }
    );
    assert_eq!(
        gateway.dispatch(&InboundEvent::Start {
            user_id: UserId::new(5)
        }),
        DispatchOutcome::Welcome {
            user_id: UserId::new(5)
        }
    );
}

#[test]
fn admin_actions_are_denied_to_regular_users() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, None);

    let outcome = gateway.dispatch(&button(5, ButtonAction::CreatePromo));

    assert_eq!(
        outcome,
        DispatchOutcome::Denied {
            user_id: UserId::new(5),
            action: ButtonAction::CreatePromo
        }
    );
    assert!(harness.promo_codes.load().unwrap().is_empty());
}

#[test]
fn admin_creates_thirty_day_promo() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, None);

    let outcome = gateway.dispatch(&button(ADMIN, ButtonAction::CreatePromo));

    let DispatchOutcome::PromoCreated {
        promo, ..
    } = outcome
    else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(promo.code.as_str(), "PROMO001");
    assert_eq!(promo.subscription_type.known(), Some(SubscriptionType::ThirtyDays));
}

#[test]
fn admin_refresh_reports_active_connections() {
    let harness = harness_on(2024, 1, 1);
    harness.connections.save(&[connection("A", 1, "a")]).unwrap();
    let gateway = gateway(&harness, None);

    assert_eq!(
        gateway.dispatch(&button(ADMIN, ButtonAction::RefreshConnections)),
        DispatchOutcome::ActiveConnections {
            user_id: UserId::new(ADMIN),
            count: 1
        }
    );
}

// ============================================================================
// SECTION: Verification Buttons
// ============================================================================

#[test]
fn verify_without_connections_requires_verification() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, None);

    assert_eq!(
        gateway.dispatch(&button(3, ButtonAction::Verify)),
        DispatchOutcome::VerificationRequired {
            user_id: UserId::new(3)
        }
    );
}

#[test]
fn verify_with_valid_connection_passes() {
    let harness = harness_on(2024, 1, 1);
    harness.connections.save(&[connection("A", 3, "c")]).unwrap();
    let gateway = gateway(&harness, None);

    assert_eq!(
        gateway.dispatch(&button(3, ButtonAction::Verify)),
        DispatchOutcome::Verified {
            user_id: UserId::new(3)
        }
    );
}

#[test]
fn verify_falls_back_to_direct_probe_for_retained_connection() {
    let harness = harness_on(2024, 1, 1);
    harness.connections.save(&[connection("A", 3, "c")]).unwrap();
    harness.gateway.queue("A", Probe::Network);
    let settings = GatewaySettings {
        reconcile: ReconcilePolicy {
            prune_forbidden: true,
            prune_transient: false,
        },
        ..GatewaySettings::default()
    };
    let gateway = EntitlementGateway::new(harness.services.clone(), settings);

    let outcome = gateway.dispatch(&button(3, ButtonAction::Verify));

    assert_eq!(
        outcome,
        DispatchOutcome::Verified {
            user_id: UserId::new(3)
        }
    );
    assert_eq!(harness.gateway.calls(), vec!["A", "A", "A"]);
    assert!(!harness.sink.events_named("verification_direct").is_empty());
    let account = harness.accounts.get(UserId::new(3)).unwrap().unwrap();
    assert_eq!(account.verification_status, VerificationStatus::Verified);
}

#[test]
fn verify_reports_insufficient_permissions_when_recheck_fails() {
    let harness = harness_on(2024, 1, 1);
    harness.connections.save(&[connection("A", 3, "c")]).unwrap();
    harness.gateway.queue("A", Probe::Valid);
    harness.gateway.set("A", Probe::Forbidden);
    let gateway = gateway(&harness, None);

    assert_eq!(
        gateway.dispatch(&button(3, ButtonAction::Verify)),
        DispatchOutcome::InsufficientPermissions {
            user_id: UserId::new(3)
        }
    );
}

#[test]
fn check_verification_has_no_fallback() {
    let harness = harness_on(2024, 1, 1);
    harness.connections.save(&[connection("A", 3, "c")]).unwrap();
    harness.gateway.set("A", Probe::Forbidden);
    let gateway = gateway(&harness, None);

    assert_eq!(
        gateway.dispatch(&button(3, ButtonAction::CheckVerification)),
        DispatchOutcome::VerificationRequired {
            user_id: UserId::new(3)
        }
    );
}

#[test]
fn personal_cabinet_creates_default_account() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, None);

    let outcome = gateway.dispatch(&button(11, ButtonAction::PersonalCabinet));

    let DispatchOutcome::AccountSummary {
        account,
    } = outcome
    else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(account.username, "user_11");
    assert_eq!(account.verification_status, VerificationStatus::NotVerified);
    assert!(harness.accounts.get(UserId::new(11)).unwrap().is_some());
}

#[test]
fn presentation_buttons_are_ignored() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, None);
    let event: InboundEvent =
        serde_json::from_value(json!({"type": "button", "user_id": 4, "action": "about_project"}))
            .unwrap();

    assert_eq!(
        gateway.dispatch(&event),
        DispatchOutcome::Ignored {
            user_id: UserId::new(4)
        }
    );
}

// ============================================================================
// SECTION: Promo Text
// ============================================================================

#[test]
fn text_from_unverified_user_is_not_redeemed() {
    let harness = harness_on(2024, 1, 1);
    let gateway = gateway(&harness, None);
    gateway.dispatch(&button(ADMIN, ButtonAction::CreatePromo));

    let outcome = gateway.dispatch(&text(3, "PROMO001"));

    assert_eq!(
        outcome,
        DispatchOutcome::VerificationRequired {
            user_id: UserId::new(3)
        }
    );
    assert!(harness.promo_codes.load().unwrap().iter().all(|promo| !promo.used));
}

#[test]
fn text_from_verified_user_redeems_trimmed_code() {
    let harness = harness_on(2024, 1, 1);
    harness.connections.save(&[connection("A", 3, "c")]).unwrap();
    let gateway = gateway(&harness, None);
    gateway.dispatch(&button(ADMIN, ButtonAction::CreatePromo));

    let outcome = gateway.dispatch(&text(3, "  PROMO001\n"));

    let DispatchOutcome::PromoRedemption {
        redemption, ..
    } = outcome
    else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert!(redemption.success);
    assert_eq!(redemption.expiry.as_deref(), Some("2024-01-31"));
}

// ============================================================================
// SECTION: Failure Containment
// ============================================================================

#[test]
fn handler_failure_becomes_failed_outcome_and_dispatch_continues() {
    let mut harness = harness_on(2024, 1, 1);
    harness.services.accounts = Arc::new(BrokenAccounts);
    let gateway = gateway(&harness, None);

    let failed = gateway.dispatch(&button(2, ButtonAction::PersonalCabinet));
    let next = gateway.dispatch(&InboundEvent::Start {
        user_id: UserId::new(2),
    });

    assert!(matches!(failed, DispatchOutcome::Failed { .. }));
    assert_eq!(
        next,
        DispatchOutcome::Welcome {
            user_id: UserId::new(2)
        }
    );
    assert!(!harness.sink.events_named("dispatch_failed").is_empty());
}

#[test]
fn panicking_gateway_is_contained() {
    let harness = harness_on(2024, 1, 1);
    harness.gateway.set("BOOM", Probe::Panic);
    let gateway = gateway(&harness, None);

    let outcome = gateway.dispatch(&granted("BOOM", 6, Some("x")));

    assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
    assert_eq!(
        gateway.dispatch(&button(6, ButtonAction::Other)),
        DispatchOutcome::Ignored {
            user_id: UserId::new(6)
        }
    );
}

#[test]
fn outcomes_serialize_with_outcome_tag() {
    let value = serde_json::to_value(DispatchOutcome::ActiveConnections {
        user_id: UserId::new(1),
        count: 2,
    })
    .unwrap();

    assert_eq!(value, json!({"outcome": "active_connections", "user_id": 1, "count": 2}));
}
