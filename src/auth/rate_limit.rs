// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-window rate limiting.
//!
//! Counters live in the store and are incremented (or reset) in a single
//! write transaction. A storage failure fails the request; the limiter never
//! fails open.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use utoipa::ToSchema;

use super::claims::AuthContext;
use super::error::AuthError;
use crate::config::RateLimitConfig;
use crate::storage::CredentialStore;

/// Scope of the AI endpoints.
pub const AI_SCOPE: &str = "ai";

/// One in this many checks also sweeps stale rows.
const GC_ODDS: u32 = 100;

/// Counter state after one request was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds
    pub window_start: i64,
    pub retry_after_secs: u64,
}

/// Start of the fixed window containing `now` (unix seconds).
pub fn window_start(now: i64, window_secs: i64) -> i64 {
    now.div_euclid(window_secs) * window_secs
}

/// Resolved actor id, else client IP.
pub fn limiter_key(ctx: Option<&AuthContext>, ip: Option<&str>) -> String {
    match (ctx, ip) {
        (Some(ctx), _) => format!("actor:{}", ctx.actor_id),
        (None, Some(ip)) => format!("ip:{ip}"),
        (None, None) => "ip:unknown".to_string(),
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<CredentialStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<CredentialStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn window_secs(&self) -> i64 {
        self.config.window_secs.max(1) as i64
    }

    /// Count one request for `(scope, key)`.
    pub fn check(&self, scope: &str, key: &str) -> Result<RateLimitDecision, AuthError> {
        let now = Utc::now();
        let decision = self.check_at(scope, key, now.timestamp())?;
        if rand::thread_rng().gen_ratio(1, GC_ODDS) {
            self.collect_garbage(now);
        }
        Ok(decision)
    }

    pub fn check_at(&self, scope: &str, key: &str, now: i64) -> Result<RateLimitDecision, AuthError> {
        let window = self.window_secs();
        let start = window_start(now, window);
        let bucket = self.store.hit_rate_limit(scope, key, start)?;

        let limit = self.config.max_requests;
        let allowed = bucket.count <= limit;
        let retry_after_secs = (start + window - now).max(1) as u64;
        if !allowed {
            tracing::warn!(scope, key, count = bucket.count, limit, "Rate limit exceeded");
        }
        Ok(RateLimitDecision {
            allowed,
            count: bucket.count,
            limit,
            remaining: limit.saturating_sub(bucket.count),
            window_start: start,
            retry_after_secs,
        })
    }

    /// Current usage without counting a request.
    pub fn usage_at(&self, scope: &str, key: &str, now: i64) -> Result<u32, AuthError> {
        let start = window_start(now, self.window_secs());
        Ok(self
            .store
            .get_rate_limit(scope, key)?
            .filter(|bucket| bucket.window_start == start)
            .map_or(0, |bucket| bucket.count))
    }

    /// Sweep stale buckets along with expired sessions, links and OAuth states.
    ///
    /// Best effort: failures are logged.
    pub fn collect_garbage(&self, now: DateTime<Utc>) {
        let cutoff = window_start(now.timestamp(), self.window_secs()) - 2 * self.window_secs();
        let buckets = self.store.purge_rate_limits(cutoff);
        let sessions = self.store.purge_sessions(now);
        let links = self.store.purge_magic_links(now);
        let states = self.store.purge_oauth_states(now);
        match (buckets, sessions, links, states) {
            (Ok(buckets), Ok(sessions), Ok(links), Ok(states)) => {
                tracing::debug!(buckets, sessions, links, states, "Expired rows purged");
            }
            (buckets, sessions, links, states) => {
                let errors: Vec<String> = [
                    buckets.err(),
                    sessions.err(),
                    links.err(),
                    states.err(),
                ]
                .into_iter()
                .flatten()
                .map(|e| e.to_string())
                .collect();
                tracing::warn!(errors = ?errors, "Expired row purge failed");
            }
        }
    }

    /// `Err(RateLimited)` once the limit is exceeded.
    pub fn enforce(&self, scope: &str, key: &str) -> Result<RateLimitDecision, AuthError> {
        let decision = self.check(scope, key)?;
        if !decision.allowed {
            return Err(AuthError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }
        Ok(decision)
    }
}
