// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The superadmin singleton.
//!
//! One operator credential with at most one live session. Each login
//! overwrites the slot's session token; changing credentials ends it.

use std::sync::Arc;

use axum::http::HeaderValue;
use chrono::{DateTime, Duration, Utc};

use super::cookies::{build_cookie, clear_cookie, SUPERADMIN_COOKIE};
use super::error::AuthError;
use crate::config::SuperadminBootstrap;
use crate::crypto::{
    constant_time_eq, generate_token, hash_password, hash_token, verify_password, PasswordPolicy,
};
use crate::storage::{CredentialStore, SuperadminSlot};

#[derive(Clone)]
pub struct SuperadminManager {
    store: Arc<CredentialStore>,
    ttl: Duration,
    secure_cookies: bool,
}

impl SuperadminManager {
    pub fn new(store: Arc<CredentialStore>, ttl: Duration, secure_cookies: bool) -> Self {
        Self {
            store,
            ttl,
            secure_cookies,
        }
    }

    /// Seed the slot from configuration if it has never been written.
    pub fn bootstrap(&self, bootstrap: &SuperadminBootstrap) -> Result<bool, AuthError> {
        let slot = SuperadminSlot::new(
            bootstrap.username.clone(),
            hash_password(&bootstrap.password)?,
            Utc::now(),
        );
        let created = self.store.bootstrap_superadmin_slot(&slot)?;
        if created {
            tracing::info!(username = %bootstrap.username, "Superadmin credentials initialized");
            if bootstrap.uses_default_password() {
                tracing::warn!(
                    "Superadmin uses the default bootstrap password; change it immediately"
                );
            }
        }
        Ok(created)
    }

    fn slot(&self) -> Result<SuperadminSlot, AuthError> {
        self.store
            .load_superadmin_slot()?
            .ok_or_else(|| AuthError::Configuration("superadmin slot missing".to_string()))
    }

    fn credentials_match(slot: &SuperadminSlot, username: &str, password: &str) -> bool {
        let username_ok = constant_time_eq(username.trim().as_bytes(), slot.username.as_bytes());
        let password_ok = verify_password(password, &slot.password_hash);
        username_ok && password_ok
    }

    /// Verify credentials and start a new session, replacing any previous one.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        self.login_at(username, password, Utc::now())
    }

    pub fn login_at(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let Some(slot) = self.store.load_superadmin_slot()? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !Self::credentials_match(&slot, username, password) {
            tracing::warn!("Superadmin login failed");
            return Err(AuthError::InvalidCredentials);
        }
        self.start_session(&slot, now)
    }

    /// Write a new session for credentials checked against `verified`.
    ///
    /// Fails if the stored credentials no longer match `verified`, so a
    /// login that raced a credential change cannot write the old ones back.
    fn start_session(&self, verified: &SuperadminSlot, now: DateTime<Utc>) -> Result<String, AuthError> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let username = self
            .store
            .update_superadmin_slot(|slot| {
                if !slot.same_credentials(verified) {
                    tracing::warn!("Superadmin credentials changed during login");
                    return Err(AuthError::InvalidCredentials);
                }
                slot.session_token_hash = Some(token_hash);
                slot.session_expires_at = Some(now + self.ttl);
                slot.updated_at = now;
                Ok(slot.username.clone())
            })?
            .ok_or(AuthError::InvalidCredentials)?;
        tracing::info!(username = %username, "Superadmin logged in");
        Ok(token)
    }

    /// Username behind a live superadmin token, or `None`.
    pub fn resolve(&self, token: &str) -> Result<Option<String>, AuthError> {
        self.resolve_at(token, Utc::now())
    }

    pub fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Result<Option<String>, AuthError> {
        let Some(slot) = self.store.load_superadmin_slot()? else {
            return Ok(None);
        };
        let (Some(stored), Some(expires_at)) = (&slot.session_token_hash, slot.session_expires_at)
        else {
            return Ok(None);
        };
        if expires_at <= now {
            return Ok(None);
        }
        if !constant_time_eq(hash_token(token).as_bytes(), stored.as_bytes()) {
            return Ok(None);
        }
        Ok(Some(slot.username))
    }

    /// End the session if `token` is the live one.
    pub fn logout(&self, token: &str) -> Result<bool, AuthError> {
        let token_hash = hash_token(token);
        let ended = self
            .store
            .update_superadmin_slot(|slot| {
                let matches = slot
                    .session_token_hash
                    .as_deref()
                    .is_some_and(|stored| constant_time_eq(token_hash.as_bytes(), stored.as_bytes()));
                if matches {
                    slot.clear_session();
                    slot.updated_at = Utc::now();
                }
                Ok::<_, AuthError>(matches.then(|| slot.username.clone()))
            })?
            .flatten();
        match ended {
            Some(username) => {
                tracing::info!(username = %username, "Superadmin logged out");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace username and password after re-checking the current password.
    ///
    /// The live session is cleared, so the operator must log in again. Of two
    /// concurrent changes only the first to commit succeeds.
    pub fn change_credentials(
        &self,
        current_password: &str,
        new_username: Option<&str>,
        new_password: &str,
        policy: &PasswordPolicy,
    ) -> Result<SuperadminSlot, AuthError> {
        let current = self.slot()?;
        if !verify_password(current_password, &current.password_hash) {
            tracing::warn!("Superadmin credential change rejected");
            return Err(AuthError::InvalidCredentials);
        }
        policy.check(new_password)?;

        let new_username = match new_username.map(str::trim) {
            Some("") => return Err(AuthError::BadRequest("Username cannot be empty".to_string())),
            Some(username) => Some(username.to_string()),
            None => None,
        };
        let new_hash = hash_password(new_password)?;

        let slot = self
            .store
            .update_superadmin_slot(|slot| {
                if !slot.same_credentials(&current) {
                    tracing::warn!("Superadmin credentials changed concurrently");
                    return Err(AuthError::InvalidCredentials);
                }
                if let Some(username) = new_username {
                    slot.username = username;
                }
                slot.password_hash = new_hash;
                slot.clear_session();
                slot.updated_at = Utc::now();
                Ok(slot.clone())
            })?
            .ok_or_else(|| AuthError::Configuration("superadmin slot missing".to_string()))?;
        tracing::info!(username = %slot.username, "Superadmin credentials changed");
        Ok(slot)
    }

    pub fn cookie(&self, token: &str) -> Result<HeaderValue, AuthError> {
        build_cookie(
            SUPERADMIN_COOKIE,
            token,
            self.ttl.num_seconds(),
            self.secure_cookies,
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    pub fn clear_cookie(&self) -> Result<HeaderValue, AuthError> {
        clear_cookie(SUPERADMIN_COOKIE, self.secure_cookies)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_SUPERADMIN_PASSWORD, DEFAULT_SUPERADMIN_USERNAME};
    use crate::storage::test_support::temp_store;

    fn manager() -> (SuperadminManager, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let manager = SuperadminManager::new(Arc::new(store), Duration::hours(12), false);
        manager
            .bootstrap(&SuperadminBootstrap {
                username: DEFAULT_SUPERADMIN_USERNAME.to_string(),
                password: DEFAULT_SUPERADMIN_PASSWORD.to_string(),
            })
            .unwrap();
        (manager, dir)
    }

    #[test]
    fn bootstrap_only_writes_once() {
        let (manager, _dir) = manager();
        let again = manager
            .bootstrap(&SuperadminBootstrap {
                username: "other".to_string(),
                password: "other-password".to_string(),
            })
            .unwrap();
        assert!(!again);
        assert!(manager
            .login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
            .is_ok());
    }

    #[test]
    fn login_overwrites_the_previous_session() {
        let (manager, _dir) = manager();
        let first = manager
            .login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
            .unwrap();
        let second = manager
            .login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
            .unwrap();
        assert!(manager.resolve(&first).unwrap().is_none());
        assert_eq!(
            manager.resolve(&second).unwrap().as_deref(),
            Some(DEFAULT_SUPERADMIN_USERNAME)
        );
    }

    #[test]
    fn wrong_credentials_are_generic() {
        let (manager, _dir) = manager();
        assert!(matches!(
            manager.login(DEFAULT_SUPERADMIN_USERNAME, "nope"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            manager.login("root", DEFAULT_SUPERADMIN_PASSWORD),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn session_expires_after_ttl() {
        let (manager, _dir) = manager();
        let now = Utc::now();
        let token = manager
            .login_at(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD, now)
            .unwrap();
        assert!(manager.resolve_at(&token, now + Duration::hours(11)).unwrap().is_some());
        assert!(manager.resolve_at(&token, now + Duration::hours(13)).unwrap().is_none());
    }

    #[test]
    fn change_credentials_invalidates_old_password_and_session() {
        let (manager, _dir) = manager();
        let token = manager
            .login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
            .unwrap();
        let policy = PasswordPolicy::default();

        assert!(matches!(
            manager.change_credentials("wrong", None, "a-much-better-password", &policy),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            manager.change_credentials(DEFAULT_SUPERADMIN_PASSWORD, None, "short", &policy),
            Err(AuthError::WeakPassword { .. })
        ));

        let slot = manager
            .change_credentials(
                DEFAULT_SUPERADMIN_PASSWORD,
                Some("operator"),
                "a-much-better-password",
                &policy,
            )
            .unwrap();
        assert_eq!(slot.username, "operator");
        assert!(manager.resolve(&token).unwrap().is_none());
        assert!(manager
            .login("operator", DEFAULT_SUPERADMIN_PASSWORD)
            .is_err());
        assert!(manager.login("operator", "a-much-better-password").is_ok());
    }

    #[test]
    fn logout_requires_the_live_token() {
        let (manager, _dir) = manager();
        let token = manager
            .login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
            .unwrap();
        assert!(!manager.logout("someone-else").unwrap());
        assert!(manager.logout(&token).unwrap());
        assert!(manager.resolve(&token).unwrap().is_none());
    }

    #[test]
    fn login_checked_before_a_rotation_cannot_commit_after_it() {
        let (manager, _dir) = manager();
        let before = manager.store.load_superadmin_slot().unwrap().unwrap();
        assert!(SuperadminManager::credentials_match(
            &before,
            DEFAULT_SUPERADMIN_USERNAME,
            DEFAULT_SUPERADMIN_PASSWORD
        ));

        manager
            .change_credentials(
                DEFAULT_SUPERADMIN_PASSWORD,
                None,
                "brand-new-password",
                &PasswordPolicy::default(),
            )
            .unwrap();

        assert!(matches!(
            manager.start_session(&before, Utc::now()),
            Err(AuthError::InvalidCredentials)
        ));
        let stored = manager.store.load_superadmin_slot().unwrap().unwrap();
        assert!(verify_password("brand-new-password", &stored.password_hash));
        assert!(stored.session_token_hash.is_none());
    }

    #[test]
    fn concurrent_login_never_reverts_a_rotation() {
        for delay_ms in (0..200).step_by(20) {
            let (manager, _dir) = manager();
            let (changed, _) = std::thread::scope(|scope| {
                let rotate = scope.spawn(|| {
                    manager.change_credentials(
                        DEFAULT_SUPERADMIN_PASSWORD,
                        None,
                        "brand-new-password",
                        &PasswordPolicy::default(),
                    )
                });
                let login = scope.spawn(|| {
                    std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                    manager.login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
                });
                (rotate.join().unwrap(), login.join().unwrap())
            });

            assert!(changed.is_ok(), "rotation failed at {delay_ms} ms");
            assert!(
                manager
                    .login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
                    .is_err(),
                "old password accepted after rotation at {delay_ms} ms"
            );
            assert!(
                manager
                    .login(DEFAULT_SUPERADMIN_USERNAME, "brand-new-password")
                    .is_ok(),
                "new password rejected at {delay_ms} ms"
            );
        }
    }

    #[test]
    fn stale_logout_does_not_end_a_newer_session() {
        let (manager, _dir) = manager();
        let first = manager
            .login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
            .unwrap();
        let second = std::thread::scope(|scope| {
            let logout = scope.spawn(|| manager.logout(&first));
            let login = scope.spawn(|| {
                manager.login(DEFAULT_SUPERADMIN_USERNAME, DEFAULT_SUPERADMIN_PASSWORD)
            });
            logout.join().unwrap().unwrap();
            login.join().unwrap().unwrap()
        });
        assert!(manager.resolve(&first).unwrap().is_none());
        assert!(manager.resolve(&second).unwrap().is_some());
    }
}
