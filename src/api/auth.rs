// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Magic link, password and session endpoints.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{
        cookies::{read_cookie, SESSION_COOKIE},
        magic_link::MagicLinkRequest,
        AccountRole, Auth, AuthContext, AuthType, Client, Role,
    },
    error::ApiError,
    state::AppState,
    storage::{ProfileUpdate, User},
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Public view of a user record.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub role: AccountRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
    pub has_password: bool,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            has_password: user.has_password(),
            id: user.id,
            email: user.email,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
            organization_name: user.organization_name,
            email_verified_at: user.email_verified_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkResponse {
    /// Whether the email left the relay
    pub delivered: bool,
    /// Only when delivery failed and the debug fallback is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_link: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyMagicLinkRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The caller's identity and, for user sessions, the user record.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub actor_id: String,
    pub auth_type: AuthType,
    pub roles: Vec<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    /// Required once a password is set
    pub current_password: Option<String>,
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokedSessionsResponse {
    pub revoked_sessions: usize,
}

/// User record behind a session identity, else 403.
fn session_user(state: &AppState, ctx: &AuthContext) -> Result<User, ApiError> {
    let user_id = ctx.user_id.as_deref().ok_or_else(|| {
        ApiError::new(StatusCode::FORBIDDEN, "Only signed-in users have a profile")
    })?;
    state
        .store
        .get_user(user_id)?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

// ============================================================================
// Handlers
// ============================================================================

/// Issue a magic link.
///
/// `mode = signup` creates the account if needed; `mode = login` requires an
/// existing account. Any earlier unused link for the email stops working.
#[utoipa::path(
    post,
    path = "/v1/auth/magic-link",
    tag = "Auth",
    request_body = MagicLinkRequest,
    responses(
        (status = 202, description = "Link issued", body = MagicLinkResponse),
        (status = 400, description = "Invalid email"),
        (status = 404, description = "Login mode and no such account"),
        (status = 502, description = "Email delivery failed")
    )
)]
pub async fn request_magic_link(
    State(state): State<AppState>,
    Json(request): Json<MagicLinkRequest>,
) -> Result<(StatusCode, Json<MagicLinkResponse>), ApiError> {
    let issued = state.magic_links.issue(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MagicLinkResponse {
            delivered: issued.delivered,
            debug_link: issued.debug_link,
        }),
    ))
}

/// Exchange a magic link token for a session cookie.
#[utoipa::path(
    post,
    path = "/v1/auth/magic-link/verify",
    tag = "Auth",
    request_body = VerifyMagicLinkRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = UserResponse),
        (status = 401, description = "Invalid or expired link")
    )
)]
pub async fn verify_magic_link(
    State(state): State<AppState>,
    Client(client): Client,
    Json(request): Json<VerifyMagicLinkRequest>,
) -> Result<(HeaderMap, Json<UserResponse>), ApiError> {
    let (user, issued) = state.magic_links.verify(&request.token, &client)?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.sessions.cookie(&issued.token)?);
    Ok((headers, Json(user.into())))
}

/// Email + password sign-in.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = UserResponse),
        (status = 401, description = "Invalid email or password")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Client(client): Client,
    Json(request): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<UserResponse>), ApiError> {
    let (user, issued) = state
        .passwords
        .login(&request.email, &request.password, &client)?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.sessions.cookie(&issued.token)?);
    Ok((headers, Json(user.into())))
}

/// Revoke the current session and clear its cookie. Always succeeds.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<(StatusCode, HeaderMap), ApiError> {
    if let Some(token) = read_cookie(&request_headers, SESSION_COOKIE) {
        state.sessions.revoke_token(&token)?;
    }
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.sessions.clear_cookie()?);
    Ok((StatusCode::NO_CONTENT, headers))
}

/// Who am I.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    security(("session_cookie" = []), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "Resolved identity", body = MeResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(
    Auth(ctx): Auth,
    State(state): State<AppState>,
) -> Result<Json<MeResponse>, ApiError> {
    let user = match ctx.user_id.as_deref() {
        Some(user_id) => state.store.get_user(user_id)?.map(UserResponse::from),
        None => None,
    };
    Ok(Json(MeResponse {
        roles: ctx.roles.iter().copied().collect(),
        actor_id: ctx.actor_id,
        auth_type: ctx.auth_type,
        user,
    }))
}

/// Edit the signed-in user's profile. Empty strings clear a field.
#[utoipa::path(
    patch,
    path = "/v1/auth/me",
    tag = "Auth",
    request_body = UpdateProfileRequest,
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not a user session")
    )
)]
pub async fn update_me(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = session_user(&state, &ctx)?;
    let updated = state.store.update_profile(
        &user.id,
        ProfileUpdate {
            first_name: request.first_name,
            last_name: request.last_name,
            organization_name: request.organization_name,
        },
        Utc::now(),
    )?;
    Ok(Json(updated.into()))
}

/// Set or change the signed-in user's password.
///
/// Every session of the user is revoked, including the current one.
#[utoipa::path(
    put,
    path = "/v1/auth/password",
    tag = "Auth",
    request_body = ChangePasswordRequest,
    security(("session_cookie" = [])),
    responses(
        (status = 200, description = "Password changed; cookie cleared", body = RevokedSessionsResponse),
        (status = 400, description = "Password too short"),
        (status = 401, description = "Current password wrong"),
        (status = 403, description = "Not a user session")
    )
)]
pub async fn change_password(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<(HeaderMap, Json<RevokedSessionsResponse>), ApiError> {
    let user = session_user(&state, &ctx)?;
    let revoked_sessions = state.passwords.change_own_password(
        &user,
        request.current_password.as_deref(),
        &request.new_password,
    )?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.sessions.clear_cookie()?);
    Ok((headers, Json(RevokedSessionsResponse { revoked_sessions })))
}
