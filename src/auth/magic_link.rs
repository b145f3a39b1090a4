// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Passwordless sign-in via single-use emailed links.
//!
//! Per email the link moves `NONE -> ISSUED -> CONSUMED`, or simply stops
//! working once `expires_at` passes. Issuing a link deletes any unconsumed
//! link for the same email first.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AuthError;
use super::session::{ClientInfo, IssuedSession, SessionManager};
use super::utils::{normalize_email, valid_email};
use crate::crypto::{generate_token, hash_token};
use crate::mailer::{LinkMailer, LinkMessage};
use crate::storage::{CredentialStore, MagicLink, NewUser, User};

/// Frontend route that receives the raw token.
pub const VERIFY_PATH: &str = "/auth/verify";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MagicLinkMode {
    /// Create the account if it does not exist
    Signup,
    /// Require an existing account
    #[default]
    Login,
}

/// Request for a new magic link.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MagicLinkRequest {
    pub email: String,
    #[serde(default)]
    pub mode: MagicLinkMode,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
}

/// Outcome of issuing a link.
#[derive(Debug)]
pub struct IssuedLink {
    pub user_id: String,
    pub delivered: bool,
    /// Only set when delivery failed and the debug fallback is allowed
    pub debug_link: Option<String>,
}

#[derive(Clone)]
pub struct MagicLinkAuthenticator {
    store: Arc<CredentialStore>,
    sessions: SessionManager,
    mailer: Arc<dyn LinkMailer>,
    ttl: Duration,
    base_url: String,
    /// Surface the link in the response when delivery fails
    debug_fallback: bool,
}

impl MagicLinkAuthenticator {
    pub fn new(
        store: Arc<CredentialStore>,
        sessions: SessionManager,
        mailer: Arc<dyn LinkMailer>,
        ttl: Duration,
        base_url: String,
        debug_fallback: bool,
    ) -> Self {
        Self {
            store,
            sessions,
            mailer,
            ttl,
            base_url,
            debug_fallback,
        }
    }

    fn link_url(&self, token: &str) -> String {
        format!("{}{VERIFY_PATH}?token={token}", self.base_url)
    }

    fn find_or_create_user(
        &self,
        request: MagicLinkRequest,
        now: DateTime<Utc>,
    ) -> Result<(User, bool), AuthError> {
        match request.mode {
            MagicLinkMode::Login => self
                .store
                .find_user_by_email(&request.email)?
                .map(|user| (user, false))
                .ok_or(AuthError::NotRegistered),
            MagicLinkMode::Signup => Ok(self.store.upsert_user_by_email(
                NewUser {
                    email: request.email,
                    first_name: request.first_name,
                    last_name: request.last_name,
                    organization_name: request.organization_name,
                    ..Default::default()
                },
                now,
            )?),
        }
    }

    pub async fn issue(&self, request: MagicLinkRequest) -> Result<IssuedLink, AuthError> {
        self.issue_at(request, Utc::now()).await
    }

    pub async fn issue_at(
        &self,
        request: MagicLinkRequest,
        now: DateTime<Utc>,
    ) -> Result<IssuedLink, AuthError> {
        let email = normalize_email(&request.email);
        if !valid_email(&email) {
            return Err(AuthError::BadRequest("Invalid email address".to_string()));
        }
        let mode = request.mode;
        let (user, created) = self.find_or_create_user(request, now)?;

        let token = generate_token();
        let link = MagicLink {
            token_hash: hash_token(&token),
            user_id: user.id.clone(),
            email: user.email_normalized.clone(),
            expires_at: now + self.ttl,
            consumed_at: None,
            created_at: now,
        };
        let replaced = self.store.replace_magic_link(&link)?;
        tracing::info!(
            user_id = %user.id,
            created,
            replaced,
            mode = ?mode,
            "Magic link issued"
        );

        let url = self.link_url(&token);
        let message = LinkMessage {
            to_email: user.email.clone(),
            to_name: Some(user.display_name()).filter(|n| n != &user.email),
            link: url.clone(),
            signup: created || user.email_verified_at.is_none(),
        };
        match self.mailer.send_link(&message).await {
            Ok(()) => Ok(IssuedLink {
                user_id: user.id,
                delivered: true,
                debug_link: None,
            }),
            Err(e) if self.debug_fallback => {
                tracing::warn!(user_id = %user.id, error = %e, "Magic link delivery failed; returning debug link");
                Ok(IssuedLink {
                    user_id: user.id,
                    delivered: false,
                    debug_link: Some(url),
                })
            }
            Err(e) => Err(AuthError::Delivery(e.to_string())),
        }
    }

    /// Consume a raw token and sign the user in.
    pub fn verify(
        &self,
        token: &str,
        client: &ClientInfo,
    ) -> Result<(User, IssuedSession), AuthError> {
        self.verify_at(token, client, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<(User, IssuedSession), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidOrExpiredCredential("magic link"));
        }
        let link = self
            .store
            .consume_magic_link(&hash_token(token), now)?
            .ok_or(AuthError::InvalidOrExpiredCredential("magic link"))?;
        let user = self
            .store
            .get_user(&link.user_id)?
            .ok_or(AuthError::InvalidOrExpiredCredential("magic link"))?;

        let user = if user.email_verified_at.is_none() {
            self.store.mark_email_verified(&user.id, now)?
        } else {
            user
        };
        let issued = self.sessions.create_at(&user.id, client, now)?;
        tracing::info!(user_id = %user.id, "Magic link verified");
        Ok((user, issued))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::AccountRole;
    use crate::mailer::test_support::RecordingMailer;
    use crate::storage::test_support::temp_store;

    struct Fixture {
        links: MagicLinkAuthenticator,
        store: Arc<CredentialStore>,
        mailer: Arc<RecordingMailer>,
        _dir: tempfile::TempDir,
    }

    fn fixture(mailer: RecordingMailer, debug_fallback: bool) -> Fixture {
        let (store, dir) = temp_store();
        let store = Arc::new(store);
        let mailer = Arc::new(mailer);
        let sessions = SessionManager::new(store.clone(), Duration::days(30), false);
        let links = MagicLinkAuthenticator::new(
            store.clone(),
            sessions,
            mailer.clone(),
            Duration::minutes(20),
            "http://localhost:8080".to_string(),
            debug_fallback,
        );
        Fixture {
            links,
            store,
            mailer,
            _dir: dir,
        }
    }

    fn request(email: &str, mode: MagicLinkMode) -> MagicLinkRequest {
        MagicLinkRequest {
            email: email.to_string(),
            mode,
            first_name: Some("Ada".to_string()),
            last_name: None,
            organization_name: None,
        }
    }

    fn token_of(link: &str) -> String {
        link.split("token=").nth(1).unwrap().to_string()
    }

    #[tokio::test]
    async fn signup_then_verify_marks_email_verified() {
        let f = fixture(RecordingMailer::default(), false);
        let issued = f
            .links
            .issue(request("New@Example.com", MagicLinkMode::Signup))
            .await
            .unwrap();
        assert!(issued.delivered);
        assert!(issued.debug_link.is_none());

        let link = f.mailer.last_link().unwrap();
        assert!(link.starts_with("http://localhost:8080/auth/verify?token="));

        let (user, session) = f
            .links
            .verify(&token_of(&link), &ClientInfo::default())
            .unwrap();
        assert_eq!(user.email_normalized, "new@example.com");
        assert_eq!(user.role, AccountRole::Organizer);
        assert!(user.email_verified_at.is_some());
        assert_eq!(session.session.user_id, user.id);
    }

    #[tokio::test]
    async fn link_is_single_use() {
        let f = fixture(RecordingMailer::default(), false);
        f.links
            .issue(request("a@example.com", MagicLinkMode::Signup))
            .await
            .unwrap();
        let token = token_of(&f.mailer.last_link().unwrap());
        assert!(f.links.verify(&token, &ClientInfo::default()).is_ok());
        assert!(matches!(
            f.links.verify(&token, &ClientInfo::default()),
            Err(AuthError::InvalidOrExpiredCredential(_))
        ));
    }

    #[tokio::test]
    async fn new_link_invalidates_the_previous_one() {
        let f = fixture(RecordingMailer::default(), false);
        f.links
            .issue(request("a@example.com", MagicLinkMode::Signup))
            .await
            .unwrap();
        let first = token_of(&f.mailer.last_link().unwrap());
        f.links
            .issue(request("a@example.com", MagicLinkMode::Login))
            .await
            .unwrap();
        let second = token_of(&f.mailer.last_link().unwrap());

        assert!(matches!(
            f.links.verify(&first, &ClientInfo::default()),
            Err(AuthError::InvalidOrExpiredCredential(_))
        ));
        assert!(f.links.verify(&second, &ClientInfo::default()).is_ok());
    }

    #[tokio::test]
    async fn expired_and_unknown_links_look_the_same() {
        let f = fixture(RecordingMailer::default(), false);
        let now = Utc::now();
        f.links
            .issue_at(request("a@example.com", MagicLinkMode::Signup), now)
            .await
            .unwrap();
        let token = token_of(&f.mailer.last_link().unwrap());

        let expired = f
            .links
            .verify_at(&token, &ClientInfo::default(), now + Duration::minutes(21))
            .unwrap_err();
        let unknown = f
            .links
            .verify_at("nope", &ClientInfo::default(), now)
            .unwrap_err();
        assert_eq!(expired.public_message(), unknown.public_message());
        assert_eq!(expired.error_code(), unknown.error_code());
    }

    #[tokio::test]
    async fn login_mode_requires_an_account() {
        let f = fixture(RecordingMailer::default(), false);
        assert!(matches!(
            f.links
                .issue(request("ghost@example.com", MagicLinkMode::Login))
                .await,
            Err(AuthError::NotRegistered)
        ));
        assert!(f.store.find_user_by_email("ghost@example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let f = fixture(RecordingMailer::default(), false);
        assert!(matches!(
            f.links.issue(request("not-an-email", MagicLinkMode::Signup)).await,
            Err(AuthError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn delivery_failure_fails_without_fallback() {
        let f = fixture(RecordingMailer::failing(), false);
        assert!(matches!(
            f.links
                .issue(request("a@example.com", MagicLinkMode::Signup))
                .await,
            Err(AuthError::Delivery(_))
        ));
    }

    #[tokio::test]
    async fn delivery_failure_surfaces_debug_link_when_allowed() {
        let f = fixture(RecordingMailer::failing(), true);
        let issued = f
            .links
            .issue(request("a@example.com", MagicLinkMode::Signup))
            .await
            .unwrap();
        assert!(!issued.delivered);
        let link = issued.debug_link.unwrap();
        assert!(f.links.verify(&token_of(&link), &ClientInfo::default()).is_ok());
    }
}
