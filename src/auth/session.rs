// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cookie-backed user sessions.
//!
//! The raw token lives only in the client's `app_session` cookie; the store
//! keeps its SHA-256 digest. `last_seen_at` is an activity marker and never
//! extends `expires_at`.

use std::sync::Arc;

use axum::http::HeaderValue;
use chrono::{DateTime, Duration, Utc};

use super::cookies::{build_cookie, clear_cookie, SESSION_COOKIE};
use super::error::AuthError;
use crate::crypto::{generate_token, hash_token};
use crate::storage::{AuthSession, CredentialStore};

/// A freshly created session and the raw token for the cookie.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: String,
    pub session: AuthSession,
}

/// Client metadata recorded on a session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<CredentialStore>,
    ttl: Duration,
    secure_cookies: bool,
}

impl SessionManager {
    pub fn new(store: Arc<CredentialStore>, ttl: Duration, secure_cookies: bool) -> Self {
        Self {
            store,
            ttl,
            secure_cookies,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create(&self, user_id: &str, client: &ClientInfo) -> Result<IssuedSession, AuthError> {
        self.create_at(user_id, client, Utc::now())
    }

    pub fn create_at(
        &self,
        user_id: &str,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, AuthError> {
        let token = generate_token();
        let session = AuthSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_hash: hash_token(&token),
            created_at: now,
            last_seen_at: now,
            expires_at: now + self.ttl,
            revoked_at: None,
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
        };
        self.store.insert_session(&session)?;
        tracing::info!(user_id = %user_id, session_id = %session.id, "Session created");
        Ok(IssuedSession { token, session })
    }

    /// Live session for a raw cookie token, or `None`.
    pub fn resolve(&self, token: &str) -> Result<Option<AuthSession>, AuthError> {
        self.resolve_at(token, Utc::now())
    }

    pub fn resolve_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthSession>, AuthError> {
        Ok(self.store.resolve_session(&hash_token(token), now)?)
    }

    /// Revoke the session behind a raw cookie token (logout).
    pub fn revoke_token(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self
            .store
            .revoke_session_by_token(&hash_token(token), Utc::now())?)
    }

    /// Revoke every session of a user. Returns how many were live.
    pub fn revoke_user(&self, user_id: &str) -> Result<usize, AuthError> {
        let revoked = self.store.revoke_user_sessions(user_id, Utc::now())?;
        tracing::info!(user_id = %user_id, revoked, "User sessions revoked");
        Ok(revoked)
    }

    /// `Set-Cookie` value for a new session token.
    pub fn cookie(&self, token: &str) -> Result<HeaderValue, AuthError> {
        build_cookie(
            SESSION_COOKIE,
            token,
            self.ttl.num_seconds(),
            self.secure_cookies,
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    pub fn clear_cookie(&self) -> Result<HeaderValue, AuthError> {
        clear_cookie(SESSION_COOKIE, self.secure_cookies)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;
    use crate::storage::NewUser;

    fn manager() -> (SessionManager, Arc<CredentialStore>, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let store = Arc::new(store);
        (
            SessionManager::new(store.clone(), Duration::days(30), true),
            store,
            dir,
        )
    }

    fn user(store: &CredentialStore) -> String {
        store
            .create_user(
                NewUser {
                    email: "host@example.com".to_string(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap()
            .id
    }

    #[test]
    fn created_session_resolves_until_expiry() {
        let (sessions, store, _dir) = manager();
        let user_id = user(&store);
        let now = Utc::now();
        let issued = sessions
            .create_at(&user_id, &ClientInfo::default(), now)
            .unwrap();
        assert_ne!(issued.token, issued.session.token_hash);

        let resolved = sessions.resolve_at(&issued.token, now).unwrap().unwrap();
        assert_eq!(resolved.user_id, user_id);
        assert!(sessions
            .resolve_at(&issued.token, now + Duration::days(31))
            .unwrap()
            .is_none());
    }

    #[test]
    fn revoked_token_never_resolves() {
        let (sessions, store, _dir) = manager();
        let user_id = user(&store);
        let issued = sessions.create(&user_id, &ClientInfo::default()).unwrap();
        assert!(sessions.revoke_token(&issued.token).unwrap());
        assert!(sessions.resolve(&issued.token).unwrap().is_none());
        assert!(!sessions.revoke_token(&issued.token).unwrap());
    }

    #[test]
    fn revoke_user_kills_every_session() {
        let (sessions, store, _dir) = manager();
        let user_id = user(&store);
        let a = sessions.create(&user_id, &ClientInfo::default()).unwrap();
        let b = sessions.create(&user_id, &ClientInfo::default()).unwrap();
        assert_eq!(sessions.revoke_user(&user_id).unwrap(), 2);
        assert!(sessions.resolve(&a.token).unwrap().is_none());
        assert!(sessions.resolve(&b.token).unwrap().is_none());
    }

    #[test]
    fn unknown_token_is_none() {
        let (sessions, _store, _dir) = manager();
        assert!(sessions.resolve("never-issued").unwrap().is_none());
    }

    #[test]
    fn cookie_carries_ttl_and_secure_flag() {
        let (sessions, _store, _dir) = manager();
        let cookie = sessions.cookie("tok").unwrap();
        let value = cookie.to_str().unwrap();
        assert!(value.starts_with("app_session=tok;"));
        assert!(value.contains(&format!("Max-Age={}", 30 * 24 * 3600)));
        assert!(value.ends_with("; Secure"));
    }
}
