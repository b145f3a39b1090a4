// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth2 authorization-code sign-in with PKCE.
//!
//! ## Flow
//!
//! 1. **Start**: mint `state` (and a PKCE verifier when the provider wants
//!    one), persist the state hash, redirect to the authorize endpoint
//! 2. **Callback**: burn the state, exchange the code, read the profile,
//!    upsert the user and the `(provider, subject)` link, open a session
//!
//! A state is consumed before anything else is checked, so it can never be
//! replayed even when the callback fails later on.

use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;
use utoipa::{IntoParams, ToSchema};

use super::error::AuthError;
use super::session::{ClientInfo, IssuedSession, SessionManager};
use super::utils::{normalize_email, sanitize_redirect, valid_email};
use crate::config::OAuthProviderConfig;
use crate::crypto::{generate_token, hash_token};
use crate::storage::{CredentialStore, NewUser, OAuthState, User};

/// Where the browser lands when a callback fails.
pub const SIGN_IN_FAILED_REDIRECT: &str = "/login?error=sign_in_failed";

/// Query parameters of the provider callback.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Public description of an enabled provider.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
    pub start_url: String,
}

/// Identity read from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

/// Result of a successful callback.
#[derive(Debug)]
pub struct CallbackOutcome {
    pub user: User,
    pub session: IssuedSession,
    pub redirect_to: String,
}

/// S256 code challenge for a PKCE verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()))
}

#[derive(Clone)]
pub struct OAuthBroker {
    store: Arc<CredentialStore>,
    sessions: SessionManager,
    providers: Vec<OAuthProviderConfig>,
    base_url: String,
    state_ttl: Duration,
    client: reqwest::Client,
}

impl OAuthBroker {
    pub fn new(
        store: Arc<CredentialStore>,
        sessions: SessionManager,
        providers: Vec<OAuthProviderConfig>,
        base_url: String,
        state_ttl: Duration,
        client: reqwest::Client,
    ) -> Self {
        Self {
            store,
            sessions,
            providers,
            base_url,
            state_ttl,
            client,
        }
    }

    pub fn provider(&self, id: &str) -> Option<&OAuthProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|p| ProviderInfo {
                id: p.id.clone(),
                display_name: p.display_name.clone(),
                start_url: format!("/v1/auth/oauth/{}/start", p.id),
            })
            .collect()
    }

    pub fn redirect_uri(&self, provider_id: &str) -> String {
        format!("{}/v1/auth/oauth/{provider_id}/callback", self.base_url)
    }

    /// Persist a fresh state and return the provider's authorize URL.
    pub fn start(&self, provider_id: &str, redirect_after: Option<&str>) -> Result<String, AuthError> {
        self.start_at(provider_id, redirect_after, Utc::now())
    }

    pub fn start_at(
        &self,
        provider_id: &str,
        redirect_after: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let provider = self
            .provider(provider_id)
            .ok_or_else(|| AuthError::NotFound(format!("OAuth provider {provider_id}")))?;

        let state = generate_token();
        let code_verifier = provider.pkce.then(generate_token);
        self.store.insert_oauth_state(&OAuthState {
            state_hash: hash_token(&state),
            provider: provider.id.clone(),
            code_verifier: code_verifier.clone(),
            redirect_after: sanitize_redirect(redirect_after),
            expires_at: now + self.state_ttl,
            consumed_at: None,
            created_at: now,
        })?;

        let mut url = Url::parse(&provider.authorize_url)
            .map_err(|e| AuthError::Configuration(format!("{} authorize URL: {e}", provider.id)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &provider.client_id)
                .append_pair("redirect_uri", &self.redirect_uri(&provider.id))
                .append_pair("scope", &provider.scopes.join(" "))
                .append_pair("state", &state);
            if let Some(verifier) = &code_verifier {
                query
                    .append_pair("code_challenge", &pkce_challenge(verifier))
                    .append_pair("code_challenge_method", "S256");
            }
        }
        tracing::debug!(provider = %provider.id, pkce = provider.pkce, "OAuth flow started");
        Ok(url.into())
    }

    pub async fn callback(
        &self,
        provider_id: &str,
        params: CallbackParams,
        client: &ClientInfo,
    ) -> Result<CallbackOutcome, AuthError> {
        self.callback_at(provider_id, params, client, Utc::now()).await
    }

    pub async fn callback_at(
        &self,
        provider_id: &str,
        params: CallbackParams,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, AuthError> {
        if let Some(error) = params.error {
            return Err(AuthError::UpstreamAuthFailure(format!(
                "{provider_id} returned {error}: {}",
                params.error_description.unwrap_or_default()
            )));
        }
        let (Some(code), Some(state)) = (params.code, params.state) else {
            return Err(AuthError::BadRequest("Missing code or state".to_string()));
        };

        let stored = self
            .store
            .consume_oauth_state(&hash_token(&state), now)?
            .ok_or(AuthError::InvalidOrExpiredCredential("oauth state"))?;
        if stored.expires_at <= now || stored.provider != provider_id {
            return Err(AuthError::InvalidOrExpiredCredential("oauth state"));
        }
        let provider = self
            .provider(provider_id)
            .ok_or_else(|| AuthError::NotFound(format!("OAuth provider {provider_id}")))?;

        let tokens = self
            .exchange_code(provider, &code, stored.code_verifier.as_deref())
            .await?;
        let profile = self.fetch_profile(provider, &tokens).await?;

        let (user, created) = self.store.upsert_user_by_email(
            NewUser {
                email: profile.email.clone(),
                first_name: profile.given_name.clone(),
                last_name: profile.family_name.clone(),
                email_verified: profile.email_verified,
                ..Default::default()
            },
            now,
        )?;
        self.store.upsert_oauth_account(
            &user.id,
            &provider.id,
            &profile.subject,
            &normalize_email(&profile.email),
            now,
        )?;
        let session = self.sessions.create_at(&user.id, client, now)?;
        tracing::info!(user_id = %user.id, provider = %provider.id, created, "OAuth sign-in");

        Ok(CallbackOutcome {
            user,
            session,
            redirect_to: sanitize_redirect(Some(&stored.redirect_after)),
        })
    }

    /// Exchange the authorization code at the token endpoint.
    async fn exchange_code(
        &self,
        provider: &OAuthProviderConfig,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Value, AuthError> {
        let redirect_uri = self.redirect_uri(&provider.id);
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let response = self
            .client
            .post(&provider.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::UpstreamAuthFailure(format!("token exchange failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::UpstreamAuthFailure(format!(
                "token exchange returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::UpstreamAuthFailure(format!("token response parse failed: {e}")))
    }

    /// Profile from the userinfo endpoint, falling back to the ID token.
    async fn fetch_profile(
        &self,
        provider: &OAuthProviderConfig,
        tokens: &Value,
    ) -> Result<OAuthProfile, AuthError> {
        let access_token = tokens.get("access_token").and_then(Value::as_str);
        let id_token_claims = tokens
            .get("id_token")
            .and_then(Value::as_str)
            .and_then(id_token_payload);

        let claims = match (&provider.userinfo_url, access_token) {
            (Some(url), Some(access_token)) => match self.userinfo(url, access_token).await {
                Ok(claims) => claims,
                Err(e) => match id_token_claims {
                    Some(claims) => {
                        tracing::warn!(provider = %provider.id, error = %e, "Userinfo failed; using ID token");
                        claims
                    }
                    None => return Err(e),
                },
            },
            _ => id_token_claims.ok_or_else(|| {
                AuthError::UpstreamAuthFailure("no userinfo endpoint and no ID token".to_string())
            })?,
        };
        profile_from_claims(&claims)
    }

    async fn userinfo(&self, url: &str, access_token: &str) -> Result<Value, AuthError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::UpstreamAuthFailure(format!("userinfo fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::UpstreamAuthFailure(format!(
                "userinfo returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::UpstreamAuthFailure(format!("userinfo parse failed: {e}")))
    }
}

/// Payload of an ID token. The token came straight from the token endpoint,
/// so its signature is not re-verified here.
fn id_token_payload(id_token: &str) -> Option<Value> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = Base64UrlUnpadded::decode_vec(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn claim_string(claims: &Value, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Subject and a valid email are both required.
pub fn profile_from_claims(claims: &Value) -> Result<OAuthProfile, AuthError> {
    let subject = claim_string(claims, "sub")
        .or_else(|| claim_string(claims, "id"))
        .ok_or_else(|| AuthError::UpstreamAuthFailure("profile has no subject".to_string()))?;
    let email = claim_string(claims, "email")
        .or_else(|| claim_string(claims, "preferred_username"))
        .filter(|e| valid_email(&normalize_email(e)))
        .ok_or_else(|| AuthError::UpstreamAuthFailure("profile has no usable email".to_string()))?;
    let email_verified = match claims.get("email_verified") {
        Some(Value::Bool(verified)) => *verified,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    Ok(OAuthProfile {
        subject,
        email,
        email_verified,
        given_name: claim_string(claims, "given_name"),
        family_name: claim_string(claims, "family_name"),
    })
}
