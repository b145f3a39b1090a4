// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer credential verification.
//!
//! ## Supported credentials
//!
//! - **HS256 JWT**: signature recomputed with the shared secret and compared
//!   in constant time
//! - **RS256 JWT**: `kid` required, public key resolved through [`JwksManager`]
//! - **Static API token**: a single machine secret compared in constant time
//!
//! Both JWT formats go through the same claim validation: `exp` is required
//! and must lie in the future, `nbf` must not, and `iss` / `aud` are checked
//! when configured.

use std::collections::HashSet;

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, Validation};
use serde_json::Value;
use sha2::Sha256;

use super::claims::{roles_from_claims, AuthContext};
use super::error::{AuthError, TokenRejection};
use super::jwks::JwksManager;
use crate::config::JwtConfig;
use crate::crypto::constant_time_eq;

/// Clock skew tolerated on `nbf`. `exp` gets none.
pub const NBF_LEEWAY_SECS: i64 = 60;

/// Verifies bearer JWTs and the static API token.
#[derive(Clone)]
pub struct BearerVerifier {
    hs256_secret: Option<Vec<u8>>,
    jwks: Option<JwksManager>,
    issuer: Option<String>,
    audience: Option<String>,
    api_token: Option<String>,
}

impl BearerVerifier {
    pub fn new(jwt: &JwtConfig, api_token: Option<String>, client: reqwest::Client) -> Self {
        Self {
            hs256_secret: jwt.secret.as_ref().map(|s| s.as_bytes().to_vec()),
            jwks: jwt
                .jwks_url
                .as_ref()
                .map(|url| JwksManager::new(url.clone(), jwt.jwks_cache_ttl, client)),
            issuer: jwt.issuer.clone(),
            audience: jwt.audience.clone(),
            api_token,
        }
    }

    /// HS256 or RS256 verification is configured.
    pub fn jwt_enabled(&self) -> bool {
        self.hs256_secret.is_some() || self.jwks.is_some()
    }

    pub fn api_token_enabled(&self) -> bool {
        self.api_token.is_some()
    }

    pub fn jwks(&self) -> Option<&JwksManager> {
        self.jwks.as_ref()
    }

    /// Constant-time check of a presented static API token.
    pub fn check_api_token(&self, presented: &str) -> bool {
        match &self.api_token {
            Some(expected) => constant_time_eq(presented.as_bytes(), expected.as_bytes()),
            None => false,
        }
    }

    /// Verify a JWT and map it to an [`AuthContext`].
    pub async fn verify_jwt(&self, token: &str) -> Result<AuthContext, AuthError> {
        self.verify_jwt_at(token, chrono::Utc::now().timestamp()).await
    }

    pub async fn verify_jwt_at(&self, token: &str, now: i64) -> Result<AuthContext, AuthError> {
        let header = decode_header(token)
            .map_err(|_| AuthError::InvalidToken(TokenRejection::Malformed))?;

        let claims = match header.alg {
            Algorithm::HS256 => {
                let secret = self
                    .hs256_secret
                    .as_deref()
                    .ok_or(AuthError::InvalidToken(TokenRejection::UnsupportedAlgorithm))?;
                verify_hs256(token, secret)?
            }
            Algorithm::RS256 => {
                let jwks = self
                    .jwks
                    .as_ref()
                    .ok_or(AuthError::InvalidToken(TokenRejection::UnsupportedAlgorithm))?;
                let kid = header
                    .kid
                    .ok_or(AuthError::InvalidToken(TokenRejection::MissingKeyId))?;
                let key = jwks.decoding_key(&kid).await?;
                decode::<Value>(token, &key, &signature_only(Algorithm::RS256))
                    .map_err(|e| AuthError::InvalidToken(rejection_for(e.kind())))?
                    .claims
            }
            _ => return Err(AuthError::InvalidToken(TokenRejection::UnsupportedAlgorithm)),
        };

        validate_claims(&claims, self.issuer.as_deref(), self.audience.as_deref(), now)
            .map_err(AuthError::InvalidToken)?;
        context_from_claims(&claims).map_err(AuthError::InvalidToken)
    }
}

/// Signature verification only; claims are checked by [`validate_claims`].
fn signature_only(alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

fn rejection_for(kind: &ErrorKind) -> TokenRejection {
    match kind {
        ErrorKind::InvalidSignature => TokenRejection::InvalidSignature,
        ErrorKind::InvalidAlgorithm => TokenRejection::UnsupportedAlgorithm,
        _ => TokenRejection::Malformed,
    }
}

/// Verify an HS256 token and return its payload.
fn verify_hs256(token: &str, secret: &[u8]) -> Result<Value, AuthError> {
    let malformed = AuthError::InvalidToken(TokenRejection::Malformed);
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(malformed);
    };

    let signature =
        Base64UrlUnpadded::decode_vec(signature).map_err(|_| AuthError::InvalidToken(TokenRejection::Malformed))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| AuthError::Configuration("unusable HS256 secret".to_string()))?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::InvalidToken(TokenRejection::InvalidSignature))?;

    let payload = Base64UrlUnpadded::decode_vec(payload).map_err(|_| malformed)?;
    serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken(TokenRejection::Malformed))
}

fn numeric_claim(claims: &Value, name: &str) -> Result<Option<i64>, TokenRejection> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or(TokenRejection::Malformed),
    }
}

/// Standard claim checks shared by both JWT formats.
pub fn validate_claims(
    claims: &Value,
    issuer: Option<&str>,
    audience: Option<&str>,
    now: i64,
) -> Result<(), TokenRejection> {
    let exp = numeric_claim(claims, "exp")?.ok_or(TokenRejection::Malformed)?;
    if exp <= now {
        return Err(TokenRejection::Expired);
    }
    if let Some(nbf) = numeric_claim(claims, "nbf")? {
        if nbf - NBF_LEEWAY_SECS > now {
            return Err(TokenRejection::NotYetValid);
        }
    }

    if let Some(expected) = issuer {
        if claims.get("iss").and_then(Value::as_str) != Some(expected) {
            return Err(TokenRejection::InvalidIssuer);
        }
    }

    if let Some(expected) = audience {
        let matches = match claims.get("aud") {
            Some(Value::String(aud)) => aud == expected,
            Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(expected)),
            _ => false,
        };
        if !matches {
            return Err(TokenRejection::InvalidAudience);
        }
    }
    Ok(())
}

fn context_from_claims(claims: &Value) -> Result<AuthContext, TokenRejection> {
    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(TokenRejection::Malformed)?;
    let email = claims
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(AuthContext::jwt(
        subject.to_string(),
        email,
        roles_from_claims(claims),
    ))
}

/// Three non-empty base64url segments separated by dots.
pub fn looks_like_jwt(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|s| {
            !s.is_empty()
                && s
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}
