// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth2 authorization code endpoints.
//!
//! The callback is a browser navigation, so failures redirect to the login
//! page with a generic error instead of returning JSON.

use axum::{
    extract::{Path, Query, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::{
        oauth::{CallbackParams, ProviderInfo, SIGN_IN_FAILED_REDIRECT},
        Client,
    },
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StartParams {
    /// Same-origin path to land on after sign-in
    pub redirect: Option<String>,
}

/// Enabled providers.
#[utoipa::path(
    get,
    path = "/v1/auth/oauth/providers",
    tag = "OAuth",
    responses((status = 200, description = "Configured providers", body = Vec<ProviderInfo>))
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    Json(state.oauth.list_providers())
}

/// Redirect to the provider's authorize endpoint.
#[utoipa::path(
    get,
    path = "/v1/auth/oauth/{provider}/start",
    tag = "OAuth",
    params(("provider" = String, Path, description = "Provider id"), StartParams),
    responses(
        (status = 303, description = "Redirect to the provider"),
        (status = 404, description = "Unknown provider")
    )
)]
pub async fn start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<Redirect, ApiError> {
    let url = state.oauth.start(&provider, params.redirect.as_deref())?;
    Ok(Redirect::to(&url))
}

/// Provider redirect target.
#[utoipa::path(
    get,
    path = "/v1/auth/oauth/{provider}/callback",
    tag = "OAuth",
    params(("provider" = String, Path, description = "Provider id"), CallbackParams),
    responses((status = 303, description = "Session cookie set and redirect, or redirect to the login page"))
)]
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Client(client): Client,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = match state.oauth.callback(&provider, params, &client).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "OAuth callback failed");
            return Redirect::to(SIGN_IN_FAILED_REDIRECT).into_response();
        }
    };
    match state.sessions.cookie(&outcome.session.token) {
        Ok(cookie) => {
            let mut headers = HeaderMap::new();
            headers.insert(SET_COOKIE, cookie);
            (headers, Redirect::to(&outcome.redirect_to)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Session cookie could not be built");
            Redirect::to(SIGN_IN_FAILED_REDIRECT).into_response()
        }
    }
}
