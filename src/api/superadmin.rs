// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Superadmin slot endpoints.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{
        cookies::{read_cookie, SUPERADMIN_COOKIE},
        SuperadminOnly,
    },
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SuperadminLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCredentialsRequest {
    pub current_password: String,
    /// Keeps the current username when absent
    pub new_username: Option<String>,
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuperadminResponse {
    pub username: String,
}

/// Sign in to the superadmin slot. Replaces any existing superadmin session.
#[utoipa::path(
    post,
    path = "/v1/superadmin/login",
    tag = "Superadmin",
    request_body = SuperadminLoginRequest,
    responses(
        (status = 200, description = "Signed in; superadmin cookie set", body = SuperadminResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<SuperadminLoginRequest>,
) -> Result<(HeaderMap, Json<SuperadminResponse>), ApiError> {
    let token = state.superadmin.login(&request.username, &request.password)?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.superadmin.cookie(&token)?);
    Ok((
        headers,
        Json(SuperadminResponse {
            username: request.username,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/superadmin/logout",
    tag = "Superadmin",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(
    State(state): State<AppState>,
    request_headers: HeaderMap,
) -> Result<(StatusCode, HeaderMap), ApiError> {
    if let Some(token) = read_cookie(&request_headers, SUPERADMIN_COOKIE) {
        state.superadmin.logout(&token)?;
    }
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.superadmin.clear_cookie()?);
    Ok((StatusCode::NO_CONTENT, headers))
}

/// Rotate the superadmin username and password.
///
/// The current session ends; sign in again with the new credentials.
#[utoipa::path(
    post,
    path = "/v1/superadmin/credentials",
    tag = "Superadmin",
    request_body = ChangeCredentialsRequest,
    security(("superadmin_cookie" = [])),
    responses(
        (status = 200, description = "Credentials changed; cookie cleared", body = SuperadminResponse),
        (status = 400, description = "New password too short"),
        (status = 401, description = "Current password wrong"),
        (status = 403, description = "Superadmin session required")
    )
)]
pub async fn change_credentials(
    SuperadminOnly(_ctx): SuperadminOnly,
    State(state): State<AppState>,
    Json(request): Json<ChangeCredentialsRequest>,
) -> Result<(HeaderMap, Json<SuperadminResponse>), ApiError> {
    let slot = state.superadmin.change_credentials(
        &request.current_password,
        request.new_username.as_deref(),
        &request.new_password,
        state.passwords.policy(),
    )?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.superadmin.clear_cookie()?);
    Ok((
        headers,
        Json(SuperadminResponse {
            username: slot.username,
        }),
    ))
}
