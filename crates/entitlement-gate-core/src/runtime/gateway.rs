// crates/entitlement-gate-core/src/runtime/gateway.rs
// ============================================================================
// Module: Entitlement Gateway Service
// Description: Inbound event dispatch over stores, verifier, and ledger.
// Purpose: Run one handler at a time and contain handler failures.
// Dependencies: crate::{core, log, runtime}, serde, thiserror
// ============================================================================

//! ## Overview
//! [`EntitlementGateway`] is constructed once at process start. Each call to
//! [`EntitlementGateway::dispatch`] holds the serialization lock for the whole
//! handler, so read-modify-write sequences never interleave within a process.
//! Handler errors and panics become [`DispatchOutcome::Failed`] and the caller
//! continues with the next event.
//!
//! Outcomes are presentation-neutral: the messaging layer decides how to
//! render them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::core::Account;
use crate::core::Connection;
use crate::core::ConnectionId;
use crate::core::PromoCode;
use crate::core::SubscriptionType;
use crate::core::UserId;
use crate::interfaces::StoreError;
use crate::runtime::accounts::AccountBook;
use crate::runtime::connections::ConnectionRegistry;
use crate::runtime::ledger::CodeSource;
use crate::runtime::ledger::LedgerError;
use crate::runtime::ledger::PromoLedger;
use crate::runtime::ledger::RandomCodeSource;
use crate::runtime::ledger::Redemption;
use crate::runtime::reconcile::ReconcilePolicy;
use crate::runtime::reconcile::Reconciler;
use crate::runtime::services::GateServices;
use crate::runtime::verifier::PermissionVerdict;
use crate::runtime::verifier::PermissionVerifier;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Plan issued by the admin promo button.
const ADMIN_PROMO_PLAN: SubscriptionType = SubscriptionType::ThirtyDays;

// ============================================================================
// SECTION: Events
// ============================================================================

/// Button actions understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    /// Start verification with a direct fallback probe.
    Verify,
    /// Re-check verification without the fallback probe.
    CheckVerification,
    /// Show the caller's account.
    PersonalCabinet,
    /// Admin: run reconciliation and report the active count.
    RefreshConnections,
    /// Admin: issue a 30-day promo code.
    CreatePromo,
    /// Presentation-only action.
    #[serde(other)]
    Other,
}

impl ButtonAction {
    /// Returns true for admin-only actions.
    #[must_use]
    pub const fn is_admin_only(self) -> bool {
        matches!(self, Self::RefreshConnections | Self::CreatePromo)
    }

    /// Returns the snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::CheckVerification => "check_verification",
            Self::PersonalCabinet => "personal_cabinet",
            Self::RefreshConnections => "refresh_connections",
            Self::CreatePromo => "create_promo",
            Self::Other => "other",
        }
    }
}

/// Inbound event from the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// An external account granted delegated access.
    ConnectionGranted {
        /// Connection identifier.
        connection_id: ConnectionId,
        /// Granting user.
        user_id: UserId,
        /// Granting user's username, when known.
        #[serde(default)]
        username: Option<String>,
    },
    /// The user opened the bot.
    Start {
        /// Sending user.
        user_id: UserId,
    },
    /// The user pressed a button.
    Button {
        /// Sending user.
        user_id: UserId,
        /// Button action.
        action: ButtonAction,
    },
    /// The user sent free text.
    Text {
        /// Sending user.
        user_id: UserId,
        /// Message text.
        text: String,
    },
}

impl InboundEvent {
    /// Returns the event label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionGranted {
                ..
            } => "connection_granted",
            Self::Start {
                ..
            } => "start",
            Self::Button {
                ..
            } => "button",
            Self::Text {
                ..
            } => "text",
        }
    }

    /// Returns the user the event concerns.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        match self {
            Self::ConnectionGranted {
                user_id, ..
            }
            | Self::Start {
                user_id,
            }
            | Self::Button {
                user_id, ..
            }
            | Self::Text {
                user_id, ..
            } => *user_id,
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Notification for the operator log chat about a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminNotice {
    /// Destination chat.
    pub chat_id: i64,
    /// Granting user.
    pub user_id: UserId,
    /// Granting user's username.
    pub username: String,
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Verification result reported to operators.
    pub verdict: PermissionVerdict,
}

/// Result of handling one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A connection grant was processed.
    ConnectionRecorded {
        /// Granting user.
        user_id: UserId,
        /// Connection identifier.
        connection_id: ConnectionId,
        /// Whether a new record was stored.
        added: bool,
        /// Verification result.
        verdict: PermissionVerdict,
        /// Operator notification, when a log chat is configured.
        #[serde(skip_serializing_if = "Option::is_none")]
        notice: Option<AdminNotice>,
    },
    /// Non-admin greeting.
    Welcome {
        /// Recipient.
        user_id: UserId,
    },
    /// Admin greeting with the active connection count.
    AdminPanel {
        /// Recipient.
        user_id: UserId,
        /// Connections confirmed valid by the startup pass.
        active_connections: usize,
    },
    /// The user holds a valid connection with full rights.
    Verified {
        /// Recipient.
        user_id: UserId,
    },
    /// The user has no valid connection.
    VerificationRequired {
        /// Recipient.
        user_id: UserId,
    },
    /// A connection exists but lacks full rights.
    InsufficientPermissions {
        /// Recipient.
        user_id: UserId,
    },
    /// Account details.
    AccountSummary {
        /// Account snapshot.
        account: Account,
    },
    /// Active connection count after an admin refresh.
    ActiveConnections {
        /// Recipient.
        user_id: UserId,
        /// Connections confirmed valid.
        count: usize,
    },
    /// A promo code was issued.
    PromoCreated {
        /// Recipient.
        user_id: UserId,
        /// Issued code.
        promo: PromoCode,
    },
    /// Result of a promo code redemption.
    PromoRedemption {
        /// Recipient.
        user_id: UserId,
        /// Redemption result.
        redemption: Redemption,
    },
    /// Admin-only action requested by a non-admin.
    Denied {
        /// Recipient.
        user_id: UserId,
        /// Requested action.
        action: ButtonAction,
    },
    /// Presentation-only event with no state change.
    Ignored {
        /// Recipient.
        user_id: UserId,
    },
    /// The handler failed; state may be partially updated.
    Failed {
        /// Recipient.
        user_id: UserId,
        /// Failure description.
        reason: String,
    },
}

/// Handler failures converted into [`DispatchOutcome::Failed`].
#[derive(Debug, Error)]
enum HandlerError {
    /// Durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Promo ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Operator settings for the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Users allowed to run admin actions.
    pub admin_ids: BTreeSet<UserId>,
    /// Operator chat for connection notices.
    pub log_chat_id: Option<i64>,
    /// Reconciliation prune policy.
    pub reconcile: ReconcilePolicy,
}

impl GatewaySettings {
    /// Returns true when `user_id` is an administrator.
    #[must_use]
    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Explicit service object for entitlement handling.
pub struct EntitlementGateway {
    /// Shared services.
    services: GateServices,
    /// Operator settings.
    settings: GatewaySettings,
    /// Account operations.
    accounts: AccountBook,
    /// Connection store access.
    registry: ConnectionRegistry,
    /// Permission classification.
    verifier: PermissionVerifier,
    /// Promo code ledger.
    ledger: PromoLedger,
    /// Reconciliation passes.
    reconciler: Reconciler,
    /// Serializes handlers.
    serial: Mutex<()>,
}

impl EntitlementGateway {
    /// Creates a gateway drawing promo codes from OS entropy.
    #[must_use]
    pub fn new(services: GateServices, settings: GatewaySettings) -> Self {
        Self::with_code_source(services, settings, Box::new(RandomCodeSource::from_entropy()))
    }

    /// Creates a gateway with an explicit promo code source.
    #[must_use]
    pub fn with_code_source(
        services: GateServices,
        settings: GatewaySettings,
        source: Box<dyn CodeSource>,
    ) -> Self {
        Self {
            accounts: AccountBook::new(services.clone()),
            registry: ConnectionRegistry::new(services.clone()),
            verifier: PermissionVerifier::new(services.gateway.clone(), services.log.clone()),
            ledger: PromoLedger::new(services.clone(), source),
            reconciler: Reconciler::new(services.clone(), settings.reconcile),
            services,
            settings,
            serial: Mutex::new(()),
        }
    }

    /// Returns the operator settings.
    #[must_use]
    pub const fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Returns the promo ledger.
    #[must_use]
    pub const fn ledger(&self) -> &PromoLedger {
        &self.ledger
    }

    /// Returns the reconciler.
    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Returns the account book.
    #[must_use]
    pub const fn accounts(&self) -> &AccountBook {
        &self.accounts
    }

    /// Returns the connection registry.
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Handles one inbound event.
    ///
    /// Never fails: errors and panics are logged and reported as
    /// [`DispatchOutcome::Failed`].
    pub fn dispatch(&self, event: &InboundEvent) -> DispatchOutcome {
        let _guard = match self.serial.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let user_id = event.user_id();
        let reason = match catch_unwind(AssertUnwindSafe(|| self.handle(event))) {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "handler panicked".to_string(),
        };
        self.services.log.error(
            "dispatch_failed",
            &reason,
            &[("event", json!(event.kind())), ("user_id", json!(user_id.get()))],
        );
        DispatchOutcome::Failed {
            user_id,
            reason,
        }
    }

    /// Routes an event to its handler.
    fn handle(&self, event: &InboundEvent) -> Result<DispatchOutcome, HandlerError> {
        match event {
            InboundEvent::ConnectionGranted {
                connection_id,
                user_id,
                username,
            } => self
                .on_connection_granted(connection_id, *user_id, username.as_deref())
                .map_err(HandlerError::from),
            InboundEvent::Start {
                user_id,
            } => Ok(self.on_start(*user_id)),
            InboundEvent::Button {
                user_id,
                action,
            } => self.on_button(*user_id, *action),
            InboundEvent::Text {
                user_id,
                text,
            } => Ok(self.on_text(*user_id, text)),
        }
    }

    /// Records a granted connection and verifies it.
    fn on_connection_granted(
        &self,
        connection_id: &ConnectionId,
        user_id: UserId,
        username: Option<&str>,
    ) -> Result<DispatchOutcome, StoreError> {
        let username =
            username.map_or_else(|| Account::placeholder_username(user_id), str::to_string);
        self.services.log.info(
            "connection_granted",
            "new connection",
            &[
                ("connection_id", json!(connection_id.as_str())),
                ("user_id", json!(user_id.get())),
            ],
        );
        let connection = Connection::new(connection_id.clone(), user_id, username.clone());
        let added = self.registry.grant(&connection);
        let verdict = self.verifier.verify(connection_id);
        match verdict {
            PermissionVerdict::Valid => {
                self.accounts.record_connection_verified(user_id, &username)?;
            }
            PermissionVerdict::Invalid => {
                self.registry.remove(connection_id);
            }
            PermissionVerdict::Forbidden | PermissionVerdict::Transient => {}
        }
        let notice = self.settings.log_chat_id.map(|chat_id| AdminNotice {
            chat_id,
            user_id,
            username,
            connection_id: connection_id.clone(),
            verdict,
        });
        Ok(DispatchOutcome::ConnectionRecorded {
            user_id,
            connection_id: connection_id.clone(),
            added,
            verdict,
            notice,
        })
    }

    /// Runs a pass and greets the user.
    fn on_start(&self, user_id: UserId) -> DispatchOutcome {
        let active = self.reconciler.reconcile();
        if self.settings.is_admin(user_id) {
            DispatchOutcome::AdminPanel {
                user_id,
                active_connections: active.len(),
            }
        } else {
            DispatchOutcome::Welcome {
                user_id,
            }
        }
    }

    /// Handles a button press.
    fn on_button(
        &self,
        user_id: UserId,
        action: ButtonAction,
    ) -> Result<DispatchOutcome, HandlerError> {
        if action.is_admin_only() && !self.settings.is_admin(user_id) {
            self.services.log.warn(
                "admin_action_denied",
                "non-admin requested admin action",
                &[("user_id", json!(user_id.get())), ("action", json!(action.as_str()))],
            );
            return Ok(DispatchOutcome::Denied {
                user_id,
                action,
            });
        }
        match action {
            ButtonAction::Verify => Ok(self.check_verification(user_id, true)),
            ButtonAction::CheckVerification => Ok(self.check_verification(user_id, false)),
            ButtonAction::PersonalCabinet => Ok(DispatchOutcome::AccountSummary {
                account: self.accounts.get_or_create(user_id, None)?,
            }),
            ButtonAction::RefreshConnections => Ok(DispatchOutcome::ActiveConnections {
                user_id,
                count: self.reconciler.reconcile().len(),
            }),
            ButtonAction::CreatePromo => Ok(DispatchOutcome::PromoCreated {
                user_id,
                promo: self.ledger.create(ADMIN_PROMO_PLAN)?,
            }),
            ButtonAction::Other => Ok(DispatchOutcome::Ignored {
                user_id,
            }),
        }
    }

    /// Decides whether the user is verified.
    ///
    /// With `direct_fallback`, a user missing from the active set has each
    /// stored connection probed directly; non-valid ones are removed.
    fn check_verification(&self, user_id: UserId, direct_fallback: bool) -> DispatchOutcome {
        self.services.log.info(
            "verification_requested",
            "user triggered verification",
            &[("user_id", json!(user_id.get()))],
        );
        let mut candidates: Vec<Connection> = self
            .reconciler
            .reconcile()
            .into_iter()
            .filter(|connection| connection.user_id == user_id)
            .collect();
        if candidates.is_empty() && direct_fallback {
            candidates = self.direct_verify(user_id);
        }
        if candidates.is_empty() {
            self.services.log.warn(
                "verification_failed",
                "user failed verification",
                &[("user_id", json!(user_id.get()))],
            );
            return DispatchOutcome::VerificationRequired {
                user_id,
            };
        }
        for connection in &candidates {
            let verdict = self.verifier.verify(&connection.connection_id);
            if verdict == PermissionVerdict::Invalid {
                self.registry.remove(&connection.connection_id);
            }
            if !verdict.is_valid() {
                self.services.log.warn(
                    "insufficient_permissions",
                    "user has insufficient permissions",
                    &[("user_id", json!(user_id.get()))],
                );
                return DispatchOutcome::InsufficientPermissions {
                    user_id,
                };
            }
        }
        self.services.log.info(
            "verification_passed",
            "user passed verification",
            &[("user_id", json!(user_id.get()))],
        );
        DispatchOutcome::Verified {
            user_id,
        }
    }

    /// Probes the user's stored connections until one is valid.
    ///
    /// Returns the valid connection, if any; probed non-valid connections are
    /// removed.
    fn direct_verify(&self, user_id: UserId) -> Vec<Connection> {
        for connection in self.registry.for_user(user_id) {
            if self.verifier.verify(&connection.connection_id).is_valid() {
                if let Err(err) = self.accounts.mark_verified(user_id, &connection.username) {
                    self.services.log.error(
                        "account_unreadable",
                        &err.to_string(),
                        &[("user_id", json!(user_id.get()))],
                    );
                }
                self.services.log.info(
                    "verification_direct",
                    "user verified via direct permission check",
                    &[("user_id", json!(user_id.get()))],
                );
                return vec![connection];
            }
            self.registry.remove(&connection.connection_id);
        }
        Vec::new()
    }

    /// Redeems free text as a promo code for verified users.
    fn on_text(&self, user_id: UserId, text: &str) -> DispatchOutcome {
        let active = self.reconciler.reconcile();
        if !active.iter().any(|connection| connection.user_id == user_id) {
            self.services.log.warn(
                "promo_requires_verification",
                "promo code attempted without verification",
                &[("user_id", json!(user_id.get()))],
            );
            return DispatchOutcome::VerificationRequired {
                user_id,
            };
        }
        DispatchOutcome::PromoRedemption {
            user_id,
            redemption: self.ledger.redeem(user_id, text.trim()),
        }
    }
}
