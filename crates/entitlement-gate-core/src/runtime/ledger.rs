// crates/entitlement-gate-core/src/runtime/ledger.rs
// ============================================================================
// Module: Entitlement Gate Promo Ledger
// Description: Promo code issuance and exactly-once redemption.
// Purpose: Grant subscriptions through single-use, short-lived codes.
// Dependencies: crate::{core, interfaces, runtime}, rand, serde, thiserror
// ============================================================================

//! ## Overview
//! Codes are 8 characters from `A-Z0-9`, valid until the start of the day after
//! creation. Redemption resolves the plan first, then consumes the code through
//! the store's compare-and-swap, then applies the entitlement. Every failure a
//! user can trigger reports the same generic message so callers cannot tell a
//! missing code from a used or expired one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::core::Account;
use crate::core::PromoCode;
use crate::core::PromoCodeValue;
use crate::core::PromoPlan;
use crate::core::StoredDate;
use crate::core::SubscriptionSlot;
use crate::core::SubscriptionType;
use crate::core::UserId;
use crate::core::VerificationStatus;
use crate::core::identifiers::PROMO_CODE_LENGTH;
use crate::core::time::date_after_days;
use crate::core::time::format_date;
use crate::core::time::format_timestamp;
use crate::runtime::accounts::AccountBook;
use crate::runtime::services::GateServices;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Characters used in generated codes.
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Maximum draws before code generation gives up.
pub const MAX_CODE_ATTEMPTS: usize = 64;

/// Days a new code stays redeemable.
const CODE_VALIDITY_DAYS: i64 = 1;

/// Message returned for every rejected redemption.
pub const GENERIC_FAILURE_MESSAGE: &str = "Промокод не найден или был использован.";

// ============================================================================
// SECTION: Code Sources
// ============================================================================

/// Produces candidate code values.
pub trait CodeSource: Send {
    /// Returns the next candidate.
    fn next_code(&mut self) -> PromoCodeValue;
}

/// Uniform random codes over [`CODE_ALPHABET`].
#[derive(Debug)]
pub struct RandomCodeSource<R> {
    /// Random number generator.
    rng: R,
}

impl<R: Rng + Send> RandomCodeSource<R> {
    /// Creates a source over `rng`.
    #[must_use]
    pub const fn new(rng: R) -> Self {
        Self {
            rng,
        }
    }
}

impl RandomCodeSource<StdRng> {
    /// Creates a source seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Creates a reproducible source.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng + Send> CodeSource for RandomCodeSource<R> {
    fn next_code(&mut self) -> PromoCodeValue {
        let code: String = (0 .. PROMO_CODE_LENGTH)
            .map(|_| char::from(CODE_ALPHABET[self.rng.gen_range(0 .. CODE_ALPHABET.len())]))
            .collect();
        PromoCodeValue::new(code)
    }
}

/// Replays a fixed list of codes, then falls back to a seeded random source.
pub struct ScriptedCodeSource {
    /// Codes still to be replayed.
    script: VecDeque<PromoCodeValue>,
    /// Source used once the script runs out.
    fallback: RandomCodeSource<StdRng>,
}

impl ScriptedCodeSource {
    /// Creates a source replaying `codes` in order.
    #[must_use]
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: codes.into_iter().map(PromoCodeValue::new).collect(),
            fallback: RandomCodeSource::seeded(0),
        }
    }
}

impl CodeSource for ScriptedCodeSource {
    fn next_code(&mut self) -> PromoCodeValue {
        self.script.pop_front().unwrap_or_else(|| self.fallback.next_code())
    }
}

// ============================================================================
// SECTION: Errors and Results
// ============================================================================

/// Promo ledger failures surfaced to administrators.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger could not be read or written.
    #[error("promo ledger store error: {0}")]
    Store(String),
    /// Every candidate collided with an existing code.
    #[error("no unique promo code after {0} attempts")]
    Exhausted(usize),
}

/// Outcome of a redemption attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    /// Whether the entitlement was granted.
    pub success: bool,
    /// User-facing message.
    pub message: String,
    /// Plan granted on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<SubscriptionType>,
    /// New subscription expiry (`YYYY-MM-DD`) on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
}

impl Redemption {
    /// Generic rejection.
    #[must_use]
    pub fn rejected() -> Self {
        Self {
            success: false,
            message: GENERIC_FAILURE_MESSAGE.to_string(),
            plan: None,
            expiry: None,
        }
    }
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Issues and redeems promo codes.
pub struct PromoLedger {
    /// Shared services.
    services: GateServices,
    /// Account operations.
    accounts: AccountBook,
    /// Candidate code generator.
    source: Mutex<Box<dyn CodeSource>>,
}

impl PromoLedger {
    /// Creates a ledger drawing codes from `source`.
    #[must_use]
    pub fn new(services: GateServices, source: Box<dyn CodeSource>) -> Self {
        Self {
            accounts: AccountBook::new(services.clone()),
            services,
            source: Mutex::new(source),
        }
    }

    /// Issues a new code for `plan`, valid until the start of the next day.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be read or written, or
    /// when no unique code is found within [`MAX_CODE_ATTEMPTS`] draws.
    pub fn create(&self, plan: SubscriptionType) -> Result<PromoCode, LedgerError> {
        let existing: HashSet<PromoCodeValue> = self
            .services
            .promo_codes
            .load()
            .map_err(|err| LedgerError::Store(err.to_string()))?
            .into_iter()
            .map(|promo| promo.code)
            .collect();
        let expiration = date_after_days(self.services.clock.now(), CODE_VALIDITY_DAYS);
        let mut source = match self.source.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for attempt in 1 ..= MAX_CODE_ATTEMPTS {
            let code = source.next_code();
            if existing.contains(&code) {
                self.services.log.debug(
                    "promo_code_collision",
                    "candidate collided with existing code",
                    &[("attempt", json!(attempt))],
                );
                continue;
            }
            let promo = PromoCode {
                code,
                subscription_type: PromoPlan::Known(plan),
                expiration_date: StoredDate::On(expiration),
                used: false,
            };
            let inserted = self
                .services
                .promo_codes
                .insert(&promo)
                .map_err(|err| LedgerError::Store(err.to_string()))?;
            if inserted {
                self.services.log.info(
                    "promo_code_created",
                    "created promo code",
                    &[
                        ("code", json!(promo.code.as_str())),
                        ("subscription_type", json!(plan.as_str())),
                        ("expiration_date", json!(format_date(expiration))),
                    ],
                );
                return Ok(promo);
            }
        }
        Err(LedgerError::Exhausted(MAX_CODE_ATTEMPTS))
    }

    /// Redeems `code` for `user_id`.
    ///
    /// The first unused ledger entry with an exactly matching code is used.
    /// Expired entries, entries with an unknown plan, and redemptions whose
    /// account cannot be read are rejected without consuming the code.
    #[must_use]
    pub fn redeem(&self, user_id: UserId, code: &str) -> Redemption {
        let log = &self.services.log;
        let fields = [("user_id", json!(user_id.get())), ("code", json!(code))];
        let ledger = match self.services.promo_codes.load() {
            Ok(ledger) => ledger,
            Err(err) => {
                log.error("promo_ledger_unreadable", &err.to_string(), &fields);
                return Redemption::rejected();
            }
        };
        let Some(promo) =
            ledger.into_iter().find(|promo| promo.code.as_str() == code && !promo.used)
        else {
            log.warn("promo_code_rejected", "invalid or used promo code", &fields);
            return Redemption::rejected();
        };

        let now = self.services.clock.now();
        if promo.expiration_date.date().is_none() {
            log.error("promo_code_malformed", "invalid expiration date", &fields);
            return Redemption::rejected();
        }
        if promo.is_expired(now) {
            log.warn("promo_code_expired", "promo code expired", &fields);
            return Redemption::rejected();
        }
        let Some(plan) = promo.subscription_type.known() else {
            log.error(
                "promo_code_malformed",
                &format!("invalid subscription type {}", promo.subscription_type.label()),
                &fields,
            );
            return Redemption::rejected();
        };

        let placeholder = Account::placeholder_username(user_id);
        let mut account = match self.accounts.load_or_default(user_id, &placeholder) {
            Ok(account) => account,
            Err(err) => {
                log.error("account_unreadable", &err.to_string(), &fields);
                return Redemption::rejected();
            }
        };

        match self.services.promo_codes.mark_used(&promo.code) {
            Ok(true) => {
                log.info("promo_code_consumed", "promo code marked as used", &fields);
            }
            Ok(false) => {
                log.warn("promo_code_rejected", "promo code consumed concurrently", &fields);
                return Redemption::rejected();
            }
            Err(err) => {
                log.error("promo_ledger_write_failed", &err.to_string(), &fields);
                return Redemption::rejected();
            }
        }

        let expiry = date_after_days(now, plan.days());
        account.current_subscription = SubscriptionSlot::Plan(plan);
        account.subscription_expiry = StoredDate::On(expiry);
        account.operation_history.push(format!(
            "{}: Активирована подписка {}",
            format_timestamp(now),
            plan.display_label()
        ));
        account.verification_status = VerificationStatus::Verified;
        self.accounts.update(&account);

        let expiry = format_date(expiry);
        log.info(
            "subscription_activated",
            "activated subscription",
            &[
                ("user_id", json!(user_id.get())),
                ("subscription_type", json!(plan.as_str())),
                ("expiry", json!(expiry)),
            ],
        );
        Redemption {
            success: true,
            message: format!(
                "Вы ввели промокод! Подписка на {} активирована до {expiry}!",
                plan.display_label()
            ),
            plan: Some(plan),
            expiry: Some(expiry),
        }
    }
}
