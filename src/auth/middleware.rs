// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Middleware for the protected router.
//!
//! Layer order, outermost first:
//!
//! 1. [`audit_requests`] records every request once the response is known
//! 2. [`authenticate`] resolves the identity or short-circuits with 401
//! 3. [`ai_rate_limit`] (AI routes only) counts the request against the caller
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/v1/auth/me", get(me))
//!     .layer(from_fn_with_state(state.clone(), authenticate))
//!     .layer(from_fn_with_state(state.clone(), audit_requests));
//! ```
//!
//! The resolved [`AuthContext`] travels in the request extensions (read by
//! the extractors) and is copied onto the response extensions so the audit
//! layer can attribute the entry.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::claims::AuthContext;
use super::rate_limit::{limiter_key, RateLimitDecision, AI_SCOPE};
use super::session::ClientInfo;
use super::utils::{extract_client_ip, user_agent};
use crate::state::AppState;
use crate::storage::AuditLogEntry;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller address and user agent.
///
/// Forwarding headers are client-controlled, so they are read only when
/// `trust_proxy` is set. Otherwise the socket peer address is used.
pub fn client_info(headers: &HeaderMap, extensions: &Extensions, trust_proxy: bool) -> ClientInfo {
    let forwarded = trust_proxy.then(|| extract_client_ip(headers)).flatten();
    let ip = forwarded.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    });
    ClientInfo {
        ip,
        user_agent: user_agent(headers),
    }
}

/// Resolve the caller or reject with the resolver's error.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let ctx = match state.resolver.resolve(request.headers()).await {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    request.extensions_mut().insert(ctx.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Enqueue one audit entry per request.
pub async fn audit_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client = client_info(
        request.headers(),
        request.extensions(),
        state.config.trust_proxy_headers,
    );
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let response = next.run(request).await;

    let mut entry = AuditLogEntry::new(method, path, response.status().as_u16());
    if let Some(ctx) = response.extensions().get::<AuthContext>() {
        entry = entry.with_actor(ctx.actor_id.clone(), ctx.role_names(), ctx.auth_type.as_str());
    }
    entry.ip = client.ip;
    entry.user_agent = client.user_agent;
    entry.request_id = Some(request_id);
    entry.duration_ms = started.elapsed().as_millis() as u64;
    state.audit.record(entry);

    response
}

/// Fixed-window limit for the AI scope, keyed by actor (or IP).
///
/// Must run inside [`authenticate`]. The decision is handed to the handler
/// through the request extensions.
pub async fn ai_rate_limit(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let client = client_info(
        request.headers(),
        request.extensions(),
        state.config.trust_proxy_headers,
    );
    let key = limiter_key(request.extensions().get::<AuthContext>(), client.ip.as_deref());
    let decision: RateLimitDecision = match state.limiter.enforce(AI_SCOPE, &key) {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };
    request.extensions_mut().insert(decision);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}
