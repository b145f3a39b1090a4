// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Email + password sign-in and password management.
//!
//! Login failures are indistinguishable: unknown email, account without a
//! password and wrong password all return [`AuthError::InvalidCredentials`]
//! after the same scrypt work.

use std::sync::{Arc, OnceLock};

use chrono::Utc;

use super::error::AuthError;
use super::session::{ClientInfo, IssuedSession, SessionManager};
use crate::crypto::{hash_password, verify_password, PasswordPolicy};
use crate::storage::{CredentialStore, User};

/// Hash verified against when there is no real one, to equalize timing.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("timing-equalizer").ok())
        .as_deref()
}

#[derive(Clone)]
pub struct PasswordAuthenticator {
    store: Arc<CredentialStore>,
    sessions: SessionManager,
    policy: PasswordPolicy,
}

impl PasswordAuthenticator {
    pub fn new(store: Arc<CredentialStore>, sessions: SessionManager, policy: PasswordPolicy) -> Self {
        Self {
            store,
            sessions,
            policy,
        }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    pub fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<(User, IssuedSession), AuthError> {
        let user = self.store.find_user_by_email(email)?;
        let stored = user.as_ref().and_then(|u| u.password_hash.as_deref());

        let verified = match stored {
            Some(hash) => verify_password(password, hash),
            None => {
                if let Some(dummy) = dummy_hash() {
                    verify_password(password, dummy);
                }
                false
            }
        };
        let Some(user) = user.filter(|_| verified) else {
            tracing::info!("Password login failed");
            return Err(AuthError::InvalidCredentials);
        };

        let issued = self.sessions.create(&user.id, client)?;
        tracing::info!(user_id = %user.id, "Password login");
        Ok((user, issued))
    }

    /// Set (`Some`) or clear (`None`) a user's password.
    ///
    /// Every existing session of the user is revoked. Returns how many were.
    pub fn set_password(&self, user_id: &str, password: Option<&str>) -> Result<usize, AuthError> {
        let hash = match password {
            Some(password) => {
                self.policy.check(password)?;
                Some(hash_password(password)?)
            }
            None => None,
        };
        let cleared = hash.is_none();
        let revoked = self.store.set_password_hash(user_id, hash, Utc::now())?;
        tracing::info!(user_id = %user_id, cleared, revoked, "Password updated");
        Ok(revoked)
    }

    /// Self-service change. The current password is required once one is set.
    pub fn change_own_password(
        &self,
        user: &User,
        current_password: Option<&str>,
        new_password: &str,
    ) -> Result<usize, AuthError> {
        if let Some(stored) = &user.password_hash {
            let current = current_password.unwrap_or_default();
            if !verify_password(current, stored) {
                return Err(AuthError::InvalidCredentials);
            }
        }
        self.set_password(&user.id, Some(new_password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;
    use crate::storage::NewUser;
    use chrono::Duration;

    fn fixture() -> (PasswordAuthenticator, SessionManager, User, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let store = Arc::new(store);
        let sessions = SessionManager::new(store.clone(), Duration::days(30), false);
        let user = store
            .create_user(
                NewUser {
                    email: "host@example.com".to_string(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        let passwords =
            PasswordAuthenticator::new(store.clone(), sessions.clone(), PasswordPolicy::default());
        (passwords, sessions, user, dir)
    }

    #[test]
    fn login_with_correct_password() {
        let (passwords, _, user, _dir) = fixture();
        passwords.set_password(&user.id, Some("correct horse")).unwrap();
        let (logged_in, session) = passwords
            .login("HOST@example.com", "correct horse", &ClientInfo::default())
            .unwrap();
        assert_eq!(logged_in.id, user.id);
        assert_eq!(session.session.user_id, user.id);
    }

    #[test]
    fn failures_are_generic() {
        let (passwords, _, user, _dir) = fixture();
        // No password set yet
        assert!(matches!(
            passwords.login("host@example.com", "anything", &ClientInfo::default()),
            Err(AuthError::InvalidCredentials)
        ));
        passwords.set_password(&user.id, Some("correct horse")).unwrap();
        let wrong = passwords
            .login("host@example.com", "wrong horse", &ClientInfo::default())
            .unwrap_err();
        let unknown = passwords
            .login("nobody@example.com", "correct horse", &ClientInfo::default())
            .unwrap_err();
        assert_eq!(wrong.public_message(), "Invalid email or password");
        assert_eq!(wrong.public_message(), unknown.public_message());
    }

    #[test]
    fn setting_a_password_revokes_sessions() {
        let (passwords, sessions, user, _dir) = fixture();
        let old = sessions.create(&user.id, &ClientInfo::default()).unwrap();
        assert_eq!(passwords.set_password(&user.id, Some("brand new pass")).unwrap(), 1);
        assert!(sessions.resolve(&old.token).unwrap().is_none());
    }

    #[test]
    fn clearing_a_password_disables_login() {
        let (passwords, _, user, _dir) = fixture();
        passwords.set_password(&user.id, Some("correct horse")).unwrap();
        passwords.set_password(&user.id, None).unwrap();
        assert!(passwords
            .login("host@example.com", "correct horse", &ClientInfo::default())
            .is_err());
    }

    #[test]
    fn policy_applies_when_setting() {
        let (passwords, _, user, _dir) = fixture();
        assert!(matches!(
            passwords.set_password(&user.id, Some("short")),
            Err(AuthError::WeakPassword { min: 8 })
        ));
    }

    #[test]
    fn change_own_password_checks_current() {
        let (passwords, _, user, _dir) = fixture();
        // First password needs no current one
        passwords
            .change_own_password(&user, None, "first password")
            .unwrap();
        let (user, _) = passwords
            .login("host@example.com", "first password", &ClientInfo::default())
            .unwrap();
        assert!(matches!(
            passwords.change_own_password(&user, Some("wrong"), "second password"),
            Err(AuthError::InvalidCredentials)
        ));
        passwords
            .change_own_password(&user, Some("first password"), "second password")
            .unwrap();
    }
}
