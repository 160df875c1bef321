// crates/entitlement-gate-core/src/runtime/accounts.rs
// ============================================================================
// Module: Entitlement Gate Account Book
// Description: Lazy account creation and verification upserts.
// Purpose: Centralize account mutations shared by reconciliation and dispatch.
// Dependencies: crate::{core, interfaces, log, runtime::services}
// ============================================================================

//! ## Overview
//! Accounts are created on first reference with `Not Verified` status and no
//! subscription. Write failures are logged and the in-memory record is still
//! returned so one failed write does not abort the calling handler.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;

use crate::core::Account;
use crate::core::UserId;
use crate::core::VerificationStatus;
use crate::core::model::CONNECTION_VERIFIED_NOTE;
use crate::core::time::format_timestamp;
use crate::interfaces::StoreError;
use crate::runtime::services::GateServices;

// ============================================================================
// SECTION: Account Book
// ============================================================================

/// Account operations over the configured account store.
#[derive(Clone)]
pub struct AccountBook {
    /// Shared services.
    services: GateServices,
}

impl AccountBook {
    /// Creates an account book.
    #[must_use]
    pub const fn new(services: GateServices) -> Self {
        Self {
            services,
        }
    }

    /// Returns the stored account or creates and persists a default one.
    ///
    /// `username` seeds new accounts; `user_{id}` is used when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the account store cannot be read.
    pub fn get_or_create(
        &self,
        user_id: UserId,
        username: Option<&str>,
    ) -> Result<Account, StoreError> {
        if let Some(account) = self.services.accounts.get(user_id)? {
            return Ok(account);
        }
        let username =
            username.map_or_else(|| Account::placeholder_username(user_id), str::to_string);
        let account = Account::new(user_id, username, self.services.clock.today());
        self.update(&account);
        self.services.log.info(
            "account_created",
            "created account",
            &[("user_id", json!(user_id.get()))],
        );
        Ok(account)
    }

    /// Overwrites the account record, logging write failures.
    ///
    /// Returns whether the write succeeded.
    pub fn update(&self, account: &Account) -> bool {
        match self.services.accounts.put(account) {
            Ok(()) => true,
            Err(err) => {
                self.services.log.error(
                    "account_write_failed",
                    &err.to_string(),
                    &[("user_id", json!(account.user_id.get()))],
                );
                false
            }
        }
    }

    /// Marks the user verified and refreshes the username.
    ///
    /// Creates the account as `Verified` when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the account store cannot be read.
    pub fn mark_verified(&self, user_id: UserId, username: &str) -> Result<Account, StoreError> {
        let mut account = self.load_or_default(user_id, username)?;
        account.verification_status = VerificationStatus::Verified;
        username.clone_into(&mut account.username);
        self.update(&account);
        self.services.log.info(
            "account_verified",
            "verification status set to Verified",
            &[("user_id", json!(user_id.get()))],
        );
        Ok(account)
    }

    /// Marks the user verified after a connection grant and records the grant
    /// in the history once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the account store cannot be read.
    pub fn record_connection_verified(
        &self,
        user_id: UserId,
        username: &str,
    ) -> Result<Account, StoreError> {
        let mut account = self.load_or_default(user_id, username)?;
        account.verification_status = VerificationStatus::Verified;
        username.clone_into(&mut account.username);
        if !account.has_connection_note() {
            let stamp = format_timestamp(self.services.clock.now());
            account.operation_history.push(format!("{stamp}: {CONNECTION_VERIFIED_NOTE}"));
        }
        self.update(&account);
        self.services.log.info(
            "account_verified",
            "user verified via connection grant",
            &[("user_id", json!(user_id.get()))],
        );
        Ok(account)
    }

    /// Loads the account or builds an unsaved default one.
    pub(crate) fn load_or_default(&self, user_id: UserId, username: &str) -> Result<Account, StoreError> {
        Ok(self
            .services
            .accounts
            .get(user_id)?
            .unwrap_or_else(|| Account::new(user_id, username, self.services.clock.today())))
    }
}
