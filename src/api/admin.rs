// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin endpoints for user, audit and secret management.
//!
//! Listing users, changing roles and revoking sessions accept the `admin`
//! and `superadmin` roles. Password resets, deletion, the audit log and the
//! secret vault require a superadmin session cookie.

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::auth::{RevokedSessionsResponse, UserResponse},
    auth::{AccountRole, AdminRoles, Authorized, SuperadminOnly},
    error::ApiError,
    state::AppState,
    storage::{AuditLogEntry, SecretKey},
};

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetRoleRequest {
    pub role: AccountRole,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPasswordRequest {
    /// `null` clears the password
    pub password: Option<String>,
}

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    /// Maximum number of results (default 100, max 1000)
    pub limit: Option<usize>,
    /// Filter by actor
    pub actor_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Newest first
    pub entries: Vec<AuditLogEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SecretListResponse {
    /// Keys holding a value. Values are never returned.
    pub configured: Vec<SecretKey>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PutSecretRequest {
    pub value: String,
}

fn parse_secret_key(key: &str) -> Result<SecretKey, ApiError> {
    SecretKey::from_str(key).map_err(|_| ApiError::not_found(format!("Unknown secret {key}")))
}

// ============================================================================
// Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/v1/admin/users",
    tag = "Admin",
    security(("session_cookie" = []), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "All users", body = UserListResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn list_users(
    _auth: Authorized<AdminRoles>,
    State(state): State<AppState>,
) -> Result<Json<UserListResponse>, ApiError> {
    let users: Vec<UserResponse> = state
        .store
        .list_users()?
        .into_iter()
        .map(UserResponse::from)
        .collect();
    Ok(Json(UserListResponse {
        total: users.len(),
        users,
    }))
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/{user_id}/role",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User id")),
    request_body = SetRoleRequest,
    security(("session_cookie" = []), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "No such user")
    )
)]
pub async fn set_role(
    auth: Authorized<AdminRoles>,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SetRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.store.set_user_role(&user_id, request.role, Utc::now())?;
    tracing::info!(
        actor_id = %auth.context().actor_id,
        user_id = %user.id,
        role = %user.role,
        "User role changed"
    );
    Ok(Json(user.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/users/{user_id}/sessions",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User id")),
    security(("session_cookie" = []), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokedSessionsResponse),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn revoke_sessions(
    _auth: Authorized<AdminRoles>,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RevokedSessionsResponse>, ApiError> {
    let revoked_sessions = state.sessions.revoke_user(&user_id)?;
    Ok(Json(RevokedSessionsResponse { revoked_sessions }))
}

/// Set or clear a user's password. Revokes all of the user's sessions.
#[utoipa::path(
    put,
    path = "/v1/admin/users/{user_id}/password",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User id")),
    request_body = SetPasswordRequest,
    security(("superadmin_cookie" = [])),
    responses(
        (status = 200, description = "Password updated", body = RevokedSessionsResponse),
        (status = 400, description = "Password too short"),
        (status = 403, description = "Superadmin session required"),
        (status = 404, description = "No such user")
    )
)]
pub async fn set_password(
    _auth: SuperadminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SetPasswordRequest>,
) -> Result<Json<RevokedSessionsResponse>, ApiError> {
    if state.store.get_user(&user_id)?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }
    let revoked_sessions = state
        .passwords
        .set_password(&user_id, request.password.as_deref())?;
    Ok(Json(RevokedSessionsResponse { revoked_sessions }))
}

/// Delete a user with its sessions, OAuth links and magic links.
#[utoipa::path(
    delete,
    path = "/v1/admin/users/{user_id}",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User id")),
    security(("superadmin_cookie" = [])),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Superadmin session required"),
        (status = 404, description = "No such user")
    )
)]
pub async fn delete_user(
    _auth: SuperadminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_user(&user_id)? {
        return Err(ApiError::not_found("User not found"));
    }
    tracing::info!(user_id = %user_id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/admin/audit",
    tag = "Admin",
    params(AuditQueryParams),
    security(("superadmin_cookie" = [])),
    responses(
        (status = 200, description = "Audit entries, newest first", body = AuditLogResponse),
        (status = 403, description = "Superadmin session required")
    )
)]
pub async fn list_audit(
    _auth: SuperadminOnly,
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let entries = state
        .store
        .list_audit_entries(limit, params.actor_id.as_deref())?;
    Ok(Json(AuditLogResponse { entries }))
}

#[utoipa::path(
    get,
    path = "/v1/admin/secrets",
    tag = "Admin",
    security(("superadmin_cookie" = [])),
    responses(
        (status = 200, description = "Configured secret keys", body = SecretListResponse),
        (status = 403, description = "Superadmin session required")
    )
)]
pub async fn list_secrets(
    _auth: SuperadminOnly,
    State(state): State<AppState>,
) -> Result<Json<SecretListResponse>, ApiError> {
    Ok(Json(SecretListResponse {
        configured: state.store.list_secret_keys()?,
    }))
}

/// Store an integration secret, encrypted at rest.
#[utoipa::path(
    put,
    path = "/v1/admin/secrets/{key}",
    tag = "Admin",
    params(("key" = String, Path, description = "Secret key, e.g. openai_api_key")),
    request_body = PutSecretRequest,
    security(("superadmin_cookie" = [])),
    responses(
        (status = 204, description = "Stored"),
        (status = 403, description = "Superadmin session required"),
        (status = 404, description = "Unknown secret key")
    )
)]
pub async fn put_secret(
    _auth: SuperadminOnly,
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<PutSecretRequest>,
) -> Result<StatusCode, ApiError> {
    let key = parse_secret_key(&key)?;
    if request.value.is_empty() {
        return Err(ApiError::bad_request("Secret value cannot be empty"));
    }
    state.store.put_secret(&state.cipher, key, &request.value)?;
    tracing::info!(key = %key, "Secret stored");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/admin/secrets/{key}",
    tag = "Admin",
    params(("key" = String, Path, description = "Secret key")),
    security(("superadmin_cookie" = [])),
    responses(
        (status = 204, description = "Removed"),
        (status = 403, description = "Superadmin session required"),
        (status = 404, description = "Unknown or unset secret")
    )
)]
pub async fn delete_secret(
    _auth: SuperadminOnly,
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let key = parse_secret_key(&key)?;
    if !state.store.delete_secret(key)? {
        return Err(ApiError::not_found(format!("Secret {key} not set")));
    }
    tracing::info!(key = %key, "Secret removed");
    Ok(StatusCode::NO_CONTENT)
}
