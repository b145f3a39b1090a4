// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! `Display` carries the detail for server-side logs. Responses only ever
//! carry [`AuthError::public_message`] and [`AuthError::error_code`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::crypto::PasswordError;
use crate::error::ApiError;
use crate::storage::StoreError;

/// Why a bearer JWT was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Malformed,
    InvalidSignature,
    Expired,
    NotYetValid,
    InvalidIssuer,
    InvalidAudience,
    MissingKeyId,
    NoMatchingKey,
    UnsupportedAlgorithm,
}

impl TokenRejection {
    pub fn error_code(self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed_token",
            TokenRejection::InvalidSignature => "invalid_signature",
            TokenRejection::Expired => "token_expired",
            TokenRejection::NotYetValid => "token_not_yet_valid",
            TokenRejection::InvalidIssuer => "invalid_issuer",
            TokenRejection::InvalidAudience => "invalid_audience",
            TokenRejection::MissingKeyId => "missing_key_id",
            TokenRejection::NoMatchingKey => "no_matching_key",
            TokenRejection::UnsupportedAlgorithm => "unsupported_algorithm",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable credential was presented
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated, but the role set does not satisfy the route
    #[error("insufficient permissions")]
    Forbidden,

    /// Unknown, consumed or expired magic link, OAuth state or session token
    #[error("invalid or expired credential: {0}")]
    InvalidOrExpiredCredential(&'static str),

    /// Password login failed (unknown email or wrong password)
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("bearer token rejected: {0:?}")]
    InvalidToken(TokenRejection),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// OAuth/JWKS network or protocol failure
    #[error("upstream identity provider failure: {0}")]
    UpstreamAuthFailure(String),

    /// Required secret or key material is missing in a production posture
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("email is not registered")]
    NotRegistered,

    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("link delivery failed: {0}")]
    Delivery(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::Forbidden => "forbidden",
            AuthError::InvalidOrExpiredCredential(_) => "invalid_or_expired",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidToken(rejection) => rejection.error_code(),
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::UpstreamAuthFailure(_) => "upstream_auth_failure",
            AuthError::Configuration(_) => "configuration_error",
            AuthError::NotRegistered => "not_registered",
            AuthError::WeakPassword { .. } => "weak_password",
            AuthError::BadRequest(_) => "bad_request",
            AuthError::NotFound(_) => "not_found",
            AuthError::Delivery(_) => "delivery_failed",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated
            | AuthError::InvalidOrExpiredCredential(_)
            | AuthError::InvalidCredentials
            | AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::UpstreamAuthFailure(_) | AuthError::Delivery(_) => StatusCode::BAD_GATEWAY,
            AuthError::NotRegistered | AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::WeakPassword { .. } | AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Configuration(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Unauthenticated => "Authentication required".to_string(),
            AuthError::Forbidden => "Insufficient permissions for this operation".to_string(),
            AuthError::InvalidOrExpiredCredential(_) => "Invalid or expired credential".to_string(),
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthError::InvalidToken(_) => "Invalid bearer token".to_string(),
            AuthError::RateLimited { .. } => "Too many requests, slow down".to_string(),
            AuthError::UpstreamAuthFailure(_) => "Sign-in failed, please try again".to_string(),
            AuthError::Configuration(_) => "Authentication is not configured".to_string(),
            AuthError::NotRegistered => "No account exists for this email".to_string(),
            AuthError::WeakPassword { min } => {
                format!("Password must be at least {min} characters")
            }
            AuthError::BadRequest(msg) => msg.clone(),
            AuthError::NotFound(what) => format!("{what} not found"),
            AuthError::Delivery(_) => "Could not send the sign-in link".to_string(),
            AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort { min } => AuthError::WeakPassword { min },
            PasswordError::Hashing => AuthError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
