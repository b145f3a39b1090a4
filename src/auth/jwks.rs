// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Security
//!
//! - Keys are cached with a configurable TTL (default 10 minutes)
//! - A token whose `kid` is missing from a cache older than
//!   [`MIN_REFRESH_INTERVAL`] triggers one refetch (key rotation)
//! - A failed fetch is never papered over with a stale set; the next
//!   request simply retries
//!
//! Only RSA keys are accepted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::DecodingKey;
use tokio::sync::RwLock;

use super::error::{AuthError, TokenRejection};

/// Unknown `kid`s refetch at most this often.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// JWKS cache entry.
struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// JWKS manager with caching.
#[derive(Clone)]
pub struct JwksManager {
    jwks_url: String,
    cache_ttl: Duration,
    cache: Arc<RwLock<Option<CacheEntry>>>,
    /// Shared outbound client (carries the request timeout)
    client: reqwest::Client,
}

impl JwksManager {
    pub fn new(jwks_url: impl Into<String>, cache_ttl: Duration, client: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_ttl,
            cache: Arc::new(RwLock::new(None)),
            client,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Cached set if younger than `max_age`.
    async fn cached(&self, max_age: Duration) -> Option<JwkSet> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < max_age)
            .map(|entry| entry.jwks.clone())
    }

    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        if let Some(jwks) = self.cached(self.cache_ttl).await {
            return Ok(jwks);
        }
        self.refresh().await
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::UpstreamAuthFailure(format!("JWKS fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::UpstreamAuthFailure(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::UpstreamAuthFailure(format!("JWKS body invalid: {e}")))
    }

    /// Force refresh the JWKS cache.
    pub async fn refresh(&self) -> Result<JwkSet, AuthError> {
        let jwks = self.fetch_jwks().await?;
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        tracing::debug!(keys = jwks.keys.len(), "JWKS refreshed");
        Ok(jwks)
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        self.cached(self.cache_ttl).await.is_some()
    }

    /// Get the RSA decoding key for the given key ID.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let jwks = self.get_jwks().await?;
        if let Some(jwk) = find_key(&jwks, kid) {
            return rsa_decoding_key(jwk);
        }

        // Possibly rotated; refetch unless the set is brand new.
        if self.cached(MIN_REFRESH_INTERVAL).await.is_some() {
            return Err(AuthError::InvalidToken(TokenRejection::NoMatchingKey));
        }
        let jwks = self.refresh().await?;
        let jwk = find_key(&jwks, kid).ok_or(AuthError::InvalidToken(TokenRejection::NoMatchingKey))?;
        rsa_decoding_key(jwk)
    }
}

fn find_key<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
}

fn rsa_decoding_key(jwk: &Jwk) -> Result<DecodingKey, AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .map_err(|_| AuthError::InvalidToken(TokenRejection::NoMatchingKey)),
        _ => Err(AuthError::InvalidToken(TokenRejection::UnsupportedAlgorithm)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub(crate) const TEST_KID: &str = "test-key-1";
    pub(crate) const PRIVATE_PEM: &str = include_str!("testdata/rs256_private.pem");
    const MODULUS: &str = include_str!("testdata/rs256_modulus.txt");

    pub(crate) fn jwks_document() -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "kid": TEST_KID,
                "use": "sig",
                "alg": "RS256",
                "n": MODULUS.trim(),
                "e": "AQAB"
            }]
        })
    }

    /// Serve the test JWKS on an ephemeral port. Returns the URL and a hit counter.
    pub(crate) async fn serve_jwks() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/jwks.json",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(jwks_document())
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/jwks.json"), hits)
    }
}
