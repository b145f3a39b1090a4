// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AI endpoint surface. Only the usage probe lives here; every route in this
//! group sits behind the AI rate limit layer.

use axum::{Extension, Json};

use crate::auth::{rate_limit::RateLimitDecision, AiRoles, Authorized};

/// The caller's usage in the current window, counting this request.
#[utoipa::path(
    get,
    path = "/v1/ai/usage",
    tag = "AI",
    security(("session_cookie" = []), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current window usage", body = RateLimitDecision),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Role not allowed"),
        (status = 429, description = "Rate limit exceeded")
    )
)]
pub async fn usage(
    _auth: Authorized<AiRoles>,
    Extension(decision): Extension<RateLimitDecision>,
) -> Json<RateLimitDecision> {
    Json(decision)
}
