// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request identity resolution.
//!
//! An [`AuthResolver`] holds an ordered chain of [`Authenticator`]s:
//!
//! 1. Superadmin session cookie
//! 2. User session cookie
//! 3. Bearer JWT (HS256 / RS256)
//! 4. Static API token (`Authorization: Bearer`, `x-api-token`, `api_token` cookie)
//! 5. Dev bypass (only when explicitly enabled in a development posture)
//!
//! Each authenticator answers `Ok(Some(ctx))` (authenticated), `Ok(None)`
//! (its credential is absent or stale, try the next one) or `Err` (a
//! credential was presented and actively rejected, stop with that error).

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;

use super::bearer::{looks_like_jwt, BearerVerifier};
use super::claims::AuthContext;
use super::cookies::{read_cookie, API_TOKEN_COOKIE, SESSION_COOKIE, SUPERADMIN_COOKIE};
use super::error::AuthError;
use super::session::SessionManager;
use super::superadmin::SuperadminManager;
use super::utils::extract_bearer_token;
use crate::storage::CredentialStore;

/// Alternate header for the static API token.
pub const API_TOKEN_HEADER: &str = "x-api-token";

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthContext>, AuthError>;
}

/// `superadmin_session` cookie.
pub struct SuperadminCookie {
    pub superadmin: SuperadminManager,
}

#[async_trait]
impl Authenticator for SuperadminCookie {
    fn name(&self) -> &'static str {
        "superadmin_cookie"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthContext>, AuthError> {
        let Some(token) = read_cookie(headers, SUPERADMIN_COOKIE) else {
            return Ok(None);
        };
        Ok(self
            .superadmin
            .resolve(&token)?
            .map(|username| AuthContext::superadmin(&username)))
    }
}

/// `app_session` cookie.
pub struct SessionCookie {
    pub sessions: SessionManager,
    pub store: Arc<CredentialStore>,
}

#[async_trait]
impl Authenticator for SessionCookie {
    fn name(&self) -> &'static str {
        "session_cookie"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthContext>, AuthError> {
        let Some(token) = read_cookie(headers, SESSION_COOKIE) else {
            return Ok(None);
        };
        let Some(session) = self.sessions.resolve(&token)? else {
            return Ok(None);
        };
        let Some(user) = self.store.get_user(&session.user_id)? else {
            return Ok(None);
        };
        Ok(Some(AuthContext::for_session(&user, &session)))
    }
}

/// JWT-shaped `Authorization: Bearer` values.
pub struct BearerJwt {
    pub verifier: BearerVerifier,
}

#[async_trait]
impl Authenticator for BearerJwt {
    fn name(&self) -> &'static str {
        "bearer_jwt"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthContext>, AuthError> {
        if !self.verifier.jwt_enabled() {
            return Ok(None);
        }
        match extract_bearer_token(headers) {
            Some(token) if looks_like_jwt(&token) => self.verifier.verify_jwt(&token).await.map(Some),
            _ => Ok(None),
        }
    }
}

/// The static machine token.
pub struct StaticApiToken {
    pub verifier: BearerVerifier,
}

impl StaticApiToken {
    fn candidates(headers: &HeaderMap) -> Vec<String> {
        let header = headers
            .get(API_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        [
            extract_bearer_token(headers),
            header,
            read_cookie(headers, API_TOKEN_COOKIE),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[async_trait]
impl Authenticator for StaticApiToken {
    fn name(&self) -> &'static str {
        "api_token"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthContext>, AuthError> {
        let candidates = Self::candidates(headers);
        if candidates.is_empty() {
            return Ok(None);
        }
        // Checks every candidate so the outcome does not hinge on which one matched.
        let matched = candidates
            .iter()
            .fold(false, |found, c| self.verifier.check_api_token(c) | found);
        if matched {
            Ok(Some(AuthContext::api_token()))
        } else {
            Err(AuthError::Unauthenticated)
        }
    }
}

/// Broad synthetic identity for local development.
pub struct DevBypass;

#[async_trait]
impl Authenticator for DevBypass {
    fn name(&self) -> &'static str {
        "dev_bypass"
    }

    async fn authenticate(&self, _headers: &HeaderMap) -> Result<Option<AuthContext>, AuthError> {
        Ok(Some(AuthContext::dev_bypass()))
    }
}

/// Ordered authenticator chain.
#[derive(Clone)]
pub struct AuthResolver {
    chain: Arc<Vec<Box<dyn Authenticator>>>,
}

impl AuthResolver {
    pub fn new(chain: Vec<Box<dyn Authenticator>>) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }

    /// The standard chain. `dev_bypass` must come from
    /// [`crate::config::AppConfig::dev_bypass_active`].
    pub fn standard(
        superadmin: SuperadminManager,
        sessions: SessionManager,
        store: Arc<CredentialStore>,
        verifier: BearerVerifier,
        dev_bypass: bool,
    ) -> Self {
        let mut chain: Vec<Box<dyn Authenticator>> = vec![
            Box::new(SuperadminCookie { superadmin }),
            Box::new(SessionCookie { sessions, store }),
            Box::new(BearerJwt {
                verifier: verifier.clone(),
            }),
            Box::new(StaticApiToken { verifier }),
        ];
        if dev_bypass {
            tracing::warn!("AUTH_DEV_BYPASS active: unauthenticated requests get full access");
            chain.push(Box::new(DevBypass));
        }
        Self::new(chain)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|a| a.name()).collect()
    }

    /// First authenticator that succeeds wins; the first active rejection stops the chain.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        for authenticator in self.chain.iter() {
            match authenticator.authenticate(headers).await {
                Ok(Some(ctx)) => {
                    tracing::debug!(
                        authenticator = authenticator.name(),
                        actor_id = %ctx.actor_id,
                        "Request authenticated"
                    );
                    return Ok(ctx);
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(authenticator = authenticator.name(), error = %e, "Credential rejected");
                    return Err(e);
                }
            }
        }
        Err(AuthError::Unauthenticated)
    }
}
