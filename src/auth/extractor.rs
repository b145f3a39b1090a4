// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated requests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! async fn me(Auth(ctx): Auth) -> impl IntoResponse {
//!     // Any resolved identity
//! }
//!
//! async fn list_users(Authorized(ctx, ..): Authorized<AdminRoles>) -> impl IntoResponse {
//!     // admin or superadmin
//! }
//!
//! async fn read_audit(SuperadminOnly(ctx): SuperadminOnly) -> impl IntoResponse {
//!     // superadmin session cookie only
//! }
//! ```
//!
//! [`Auth`] reuses the [`AuthContext`] placed in the request extensions by
//! the authenticate middleware and only runs the resolver itself when the
//! route is not behind that middleware.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::claims::{AuthContext, AuthType};
use super::error::AuthError;
use super::middleware::client_info;
use super::roles::Role;
use super::session::ClientInfo;
use crate::state::AppState;

/// Any resolved identity.
pub struct Auth(pub AuthContext);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>().cloned() {
            return Ok(Auth(ctx));
        }
        let ctx = state.resolver.resolve(&parts.headers).await?;
        parts.extensions.insert(ctx.clone());
        Ok(Auth(ctx))
    }
}

/// Caller IP and user agent, recorded on new sessions.
pub struct Client(pub ClientInfo);

impl FromRequestParts<AppState> for Client {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Client(client_info(
            &parts.headers,
            &parts.extensions,
            state.config.trust_proxy_headers,
        )))
    }
}

/// Role set accepted by an [`Authorized`] route.
pub trait RoleGuard {
    const ALLOWED: &'static [Role];
}

/// AI endpoints.
pub struct AiRoles;

impl RoleGuard for AiRoles {
    const ALLOWED: &'static [Role] = &[Role::Organizer, Role::Admin, Role::Superadmin];
}

/// Non-destructive admin endpoints.
pub struct AdminRoles;

impl RoleGuard for AdminRoles {
    const ALLOWED: &'static [Role] = &[Role::Admin, Role::Superadmin];
}

/// Identity holding at least one role of `G`, else 403.
pub struct Authorized<G: RoleGuard>(pub AuthContext, PhantomData<G>);

impl<G: RoleGuard> Authorized<G> {
    pub fn context(&self) -> &AuthContext {
        &self.0
    }
}

impl<G: RoleGuard> FromRequestParts<AppState> for Authorized<G> {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(ctx) = Auth::from_request_parts(parts, state).await?;
        if !ctx.has_any_role(G::ALLOWED) {
            tracing::info!(actor_id = %ctx.actor_id, roles = ?ctx.role_names(), "Role check failed");
            return Err(AuthError::Forbidden);
        }
        Ok(Authorized(ctx, PhantomData))
    }
}

/// Superadmin session only.
///
/// Refuses every other mechanism, including the API token and dev bypass,
/// even though those carry the superadmin role.
pub struct SuperadminOnly(pub AuthContext);

impl FromRequestParts<AppState> for SuperadminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(ctx) = Auth::from_request_parts(parts, state).await?;
        if ctx.auth_type != AuthType::Superadmin {
            tracing::info!(
                actor_id = %ctx.actor_id,
                auth_type = ctx.auth_type.as_str(),
                "Superadmin session required"
            );
            return Err(AuthError::Forbidden);
        }
        Ok(SuperadminOnly(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::test_support::test_state;
    use axum::http::Request;
    use std::collections::BTreeSet;

    fn bare_parts() -> Parts {
        Request::builder()
            .uri("/test")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn parts_with(ctx: AuthContext) -> Parts {
        let mut parts = bare_parts();
        parts.extensions.insert(ctx);
        parts
    }

    fn jwt_context(roles: &[Role]) -> AuthContext {
        let roles: BTreeSet<Role> = roles.iter().copied().collect();
        AuthContext::jwt("user_123".to_string(), None, roles)
    }

    #[tokio::test]
    async fn auth_extractor_requires_credentials() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let result = Auth::from_request_parts(&mut bare_parts(), &state).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn auth_extractor_prefers_extensions() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let mut parts = parts_with(jwt_context(&[Role::Admin]));
        let Auth(ctx) = Auth::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(ctx.actor_id, "user_123");
    }

    #[tokio::test]
    async fn ai_guard_accepts_organizer() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let mut parts = parts_with(jwt_context(&[Role::Organizer]));
        assert!(Authorized::<AiRoles>::from_request_parts(&mut parts, &state).await.is_ok());
    }

    #[tokio::test]
    async fn admin_guard_rejects_organizer_with_403() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let mut parts = parts_with(jwt_context(&[Role::Organizer]));
        let result = Authorized::<AdminRoles>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::Forbidden)));
    }

    #[tokio::test]
    async fn empty_role_set_is_forbidden() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        let mut parts = parts_with(jwt_context(&[]));
        let result = Authorized::<AiRoles>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::Forbidden)));
    }

    #[tokio::test]
    async fn superadmin_only_refuses_other_mechanisms() {
        let (state, _mailer, _dir) = test_state(AppConfig::default());
        for ctx in [
            AuthContext::api_token(),
            AuthContext::dev_bypass(),
            jwt_context(&[Role::Superadmin]),
        ] {
            let mut parts = parts_with(ctx);
            let result = SuperadminOnly::from_request_parts(&mut parts, &state).await;
            assert!(matches!(result, Err(AuthError::Forbidden)));
        }

        let mut parts = parts_with(AuthContext::superadmin("root"));
        assert!(SuperadminOnly::from_request_parts(&mut parts, &state).await.is_ok());
    }
}
