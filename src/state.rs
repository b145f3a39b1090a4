// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.
//!
//! Everything the handlers and middleware need is built once at startup by
//! [`AppState::build`] and cloned per request. All members are cheap clones
//! around `Arc`s.

use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::{AuditLogger, AuditWorker};
use crate::auth::{
    AuthError, AuthResolver, BearerVerifier, MagicLinkAuthenticator, OAuthBroker,
    PasswordAuthenticator, RateLimiter, SessionManager, SuperadminManager,
};
use crate::config::AppConfig;
use crate::crypto::{PasswordPolicy, SecretCipher};
use crate::mailer::{self, LinkMailer};
use crate::storage::secrets::SecretError;
use crate::storage::CredentialStore;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to build outbound HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("superadmin bootstrap failed: {0}")]
    Bootstrap(#[from] AuthError),

    #[error("secret migration failed: {0}")]
    Secrets(#[from] SecretError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<CredentialStore>,
    pub cipher: Arc<SecretCipher>,
    pub sessions: SessionManager,
    pub superadmin: SuperadminManager,
    pub passwords: PasswordAuthenticator,
    pub magic_links: MagicLinkAuthenticator,
    pub oauth: OAuthBroker,
    pub verifier: BearerVerifier,
    pub resolver: AuthResolver,
    pub limiter: RateLimiter,
    pub audit: AuditLogger,
}

impl AppState {
    /// Wire every component and run the one-time startup steps (superadmin
    /// bootstrap, plaintext secret migration).
    ///
    /// The returned [`AuditWorker`] must be spawned by the caller. A `mailer`
    /// override replaces the one derived from the mail configuration.
    pub fn build(
        config: AppConfig,
        store: Arc<CredentialStore>,
        cipher: SecretCipher,
        mailer: Option<Arc<dyn LinkMailer>>,
    ) -> Result<(Self, AuditWorker), StateError> {
        let client = reqwest::Client::builder()
            .timeout(config.outbound_timeout)
            .build()?;
        let mailer = mailer.unwrap_or_else(|| mailer::from_config(&config.mail, client.clone()));

        let secure = config.cookie_secure;
        let sessions = SessionManager::new(store.clone(), config.session_ttl, secure);
        let superadmin =
            SuperadminManager::new(store.clone(), config.superadmin_session_ttl, secure);
        superadmin.bootstrap(&config.superadmin)?;

        let migrated = store.migrate_plaintext_secrets(&cipher)?;
        if migrated > 0 {
            info!(migrated, "Plaintext secret settings re-encrypted");
        }

        let passwords = PasswordAuthenticator::new(
            store.clone(),
            sessions.clone(),
            PasswordPolicy {
                min_length: config.password_min_length,
            },
        );

        let debug_fallback = !config.is_production() || config.magic_link_debug_fallback;
        if config.is_production() && debug_fallback {
            warn!("Magic link debug fallback enabled in production");
        }
        let magic_links = MagicLinkAuthenticator::new(
            store.clone(),
            sessions.clone(),
            mailer,
            config.magic_link_ttl,
            config.base_url.clone(),
            debug_fallback,
        );

        let oauth = OAuthBroker::new(
            store.clone(),
            sessions.clone(),
            config.oauth_providers.clone(),
            config.base_url.clone(),
            config.oauth_state_ttl,
            client.clone(),
        );

        let verifier = BearerVerifier::new(&config.jwt, config.api_token.clone(), client);
        let resolver = AuthResolver::standard(
            superadmin.clone(),
            sessions.clone(),
            store.clone(),
            verifier.clone(),
            config.dev_bypass_active(),
        );
        info!(chain = ?resolver.names(), "Auth resolver configured");

        let limiter = RateLimiter::new(store.clone(), config.ai_rate_limit);
        let (audit, worker) = AuditLogger::channel(store.clone());

        let state = Self {
            config: Arc::new(config),
            store,
            cipher: Arc::new(cipher),
            sessions,
            superadmin,
            passwords,
            magic_links,
            oauth,
            verifier,
            resolver,
            limiter,
            audit,
        };
        Ok((state, worker))
    }
}
