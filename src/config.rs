// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into a typed
//! [`AppConfig`] and validated before anything else is opened.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_ENV` | `production` selects the production posture | `development` |
//! | `HOST` / `PORT` | Server bind address | `0.0.0.0` / `8080` |
//! | `DATA_DIR` | Directory holding `auth.redb` | `./data` |
//! | `APP_BASE_URL` | Public base URL (redirect URIs, links, CORS) | `http://localhost:8080` |
//! | `ENCRYPTION_KEY` | 64 hex chars for the secret cipher | Required for production |
//! | `AUTH_JWT_SECRET` | HS256 shared secret | - |
//! | `AUTH_JWKS_URL` | RS256 JWKS endpoint | - |
//! | `AUTH_JWT_ISSUER` / `AUTH_JWT_AUDIENCE` | Expected claims | not checked |
//! | `AUTH_API_TOKEN` | Static machine token | - |
//! | `AUTH_DEV_BYPASS` | `true` enables the dev bypass (development only) | `false` |
//! | `COOKIE_SECURE` | Force the `Secure` cookie flag | https base URL |
//! | `TRUST_PROXY_HEADERS` | Take the client IP from `X-Forwarded-For` / `X-Real-IP` | `false` |
//! | `SESSION_TTL_DAYS` | User session lifetime | `30` |
//! | `SUPERADMIN_SESSION_TTL_HOURS` | Superadmin session lifetime | `12` |
//! | `MAGIC_LINK_TTL_MINUTES` | Magic link lifetime | `20` |
//! | `OAUTH_STATE_TTL_MINUTES` | OAuth state lifetime | `10` |
//! | `JWKS_CACHE_TTL_SECONDS` | JWKS cache TTL | `600` |
//! | `PASSWORD_MIN_LENGTH` | Minimum length when setting a password | `8` |
//! | `AI_RATE_LIMIT_WINDOW_SECONDS` / `AI_RATE_LIMIT_MAX_REQUESTS` | AI limiter | `60` / `20` |
//! | `OUTBOUND_HTTP_TIMEOUT_SECONDS` | JWKS/OAuth/mail call timeout | `10` |
//! | `MAIL_RELAY_URL` / `MAIL_RELAY_TOKEN` / `MAIL_FROM` | Magic link delivery | disabled |
//! | `MAGIC_LINK_DEBUG_FALLBACK` | Surface links on delivery failure in production | `false` |
//! | `SUPERADMIN_USERNAME` / `SUPERADMIN_PASSWORD` | First-run superadmin credentials | `superadmin` / `change-me-now` |
//! | `OAUTH_GOOGLE_CLIENT_ID` / `OAUTH_GOOGLE_CLIENT_SECRET` | Google sign-in | disabled |
//! | `OAUTH_MICROSOFT_CLIENT_ID` / `OAUTH_MICROSOFT_CLIENT_SECRET` | Microsoft sign-in | disabled |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::crypto::cipher::SecretCipher;
use crate::crypto::password::DEFAULT_MIN_PASSWORD_LENGTH;

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const DEFAULT_SUPERADMIN_USERNAME: &str = "superadmin";
pub const DEFAULT_SUPERADMIN_PASSWORD: &str = "change-me-now";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("ENCRYPTION_KEY is required in production")]
    MissingEncryptionKey,

    #[error("ENCRYPTION_KEY must be 64 hex characters")]
    InvalidEncryptionKey,

    #[error("production requires AUTH_JWT_SECRET, AUTH_JWKS_URL or AUTH_API_TOKEN")]
    NoAuthMechanism,

    #[error("AUTH_DEV_BYPASS cannot be enabled in production")]
    DevBypassInProduction,
}

/// Deployment posture. Production tightens every fallback into a hard error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posture {
    Development,
    Production,
}

/// Bearer JWT verification settings.
#[derive(Clone, Default)]
pub struct JwtConfig {
    pub secret: Option<String>,
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_cache_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

#[derive(Clone, Default)]
pub struct MailConfig {
    pub relay_url: Option<String>,
    pub relay_token: Option<String>,
    pub from: String,
}

#[derive(Clone)]
pub struct SuperadminBootstrap {
    pub username: String,
    pub password: String,
}

impl SuperadminBootstrap {
    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_SUPERADMIN_PASSWORD
    }
}

/// Static configuration of one OAuth identity provider.
#[derive(Clone)]
pub struct OAuthProviderConfig {
    pub id: String,
    pub display_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: Option<String>,
    pub scopes: Vec<String>,
    pub pkce: bool,
}

impl OAuthProviderConfig {
    pub fn google(client_id: String, client_secret: String) -> Self {
        Self {
            id: "google".to_string(),
            display_name: "Google".to_string(),
            client_id,
            client_secret,
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: Some("https://openidconnect.googleapis.com/v1/userinfo".to_string()),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            pkce: true,
        }
    }

    pub fn microsoft(client_id: String, client_secret: String) -> Self {
        Self {
            id: "microsoft".to_string(),
            display_name: "Microsoft".to_string(),
            client_id,
            client_secret,
            authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
                .to_string(),
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            userinfo_url: Some("https://graph.microsoft.com/oidc/userinfo".to_string()),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            pkce: true,
        }
    }
}

/// Complete service configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub posture: Posture,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Public base URL without trailing slash
    pub base_url: String,
    pub encryption_key: Option<String>,
    pub jwt: JwtConfig,
    pub api_token: Option<String>,
    pub dev_bypass_requested: bool,
    pub cookie_secure: bool,
    /// Only set behind a reverse proxy that overwrites the forwarding headers
    pub trust_proxy_headers: bool,
    pub session_ttl: chrono::Duration,
    pub superadmin_session_ttl: chrono::Duration,
    pub magic_link_ttl: chrono::Duration,
    pub oauth_state_ttl: chrono::Duration,
    pub password_min_length: usize,
    pub ai_rate_limit: RateLimitConfig,
    pub outbound_timeout: Duration,
    pub mail: MailConfig,
    pub magic_link_debug_fallback: bool,
    pub superadmin: SuperadminBootstrap,
    pub oauth_providers: Vec<OAuthProviderConfig>,
}

impl Default for AppConfig {
    /// Development defaults with nothing optional configured.
    fn default() -> Self {
        Self {
            posture: Posture::Development,
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            base_url: "http://localhost:8080".to_string(),
            encryption_key: None,
            jwt: JwtConfig {
                jwks_cache_ttl: Duration::from_secs(600),
                ..Default::default()
            },
            api_token: None,
            dev_bypass_requested: false,
            cookie_secure: false,
            trust_proxy_headers: false,
            session_ttl: chrono::Duration::days(30),
            superadmin_session_ttl: chrono::Duration::hours(12),
            magic_link_ttl: chrono::Duration::minutes(20),
            oauth_state_ttl: chrono::Duration::minutes(10),
            password_min_length: DEFAULT_MIN_PASSWORD_LENGTH,
            ai_rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: 20,
            },
            outbound_timeout: Duration::from_secs(10),
            mail: MailConfig {
                from: "no-reply@localhost".to_string(),
                ..Default::default()
            },
            magic_link_debug_fallback: false,
            superadmin: SuperadminBootstrap {
                username: DEFAULT_SUPERADMIN_USERNAME.to_string(),
                password: DEFAULT_SUPERADMIN_PASSWORD.to_string(),
            },
            oauth_providers: Vec::new(),
        }
    }
}

/// Reads variables through `lookup` so tests do not touch the process environment.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.string(var) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn positive(&self, var: &'static str, default: i64) -> Result<i64, ConfigError> {
        let value: i64 = self.parsed(var, default)?;
        if value <= 0 {
            return Err(ConfigError::Invalid {
                var,
                reason: "must be positive".to_string(),
            });
        }
        Ok(value)
    }

    fn flag(&self, var: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.string(var).map(|v| v.to_lowercase()) {
            None => Ok(None),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(Some(true)),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(Some(false)),
            Some(_) => Err(ConfigError::Invalid {
                var,
                reason: "expected true or false".to_string(),
            }),
        }
    }

    fn provider(
        &self,
        id_var: &'static str,
        secret_var: &'static str,
        preset: fn(String, String) -> OAuthProviderConfig,
    ) -> Result<Option<OAuthProviderConfig>, ConfigError> {
        match (self.string(id_var), self.string(secret_var)) {
            (Some(id), Some(secret)) => Ok(Some(preset(id, secret))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::Invalid {
                var: secret_var,
                reason: format!("required when {id_var} is set"),
            }),
            (None, Some(_)) => Err(ConfigError::Invalid {
                var: id_var,
                reason: format!("required when {secret_var} is set"),
            }),
        }
    }
}

impl AppConfig {
    /// Load and validate from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load and validate from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let defaults = AppConfig::default();

        let posture = match env.string("APP_ENV").map(|v| v.to_lowercase()).as_deref() {
            Some("production") | Some("prod") => Posture::Production,
            _ => Posture::Development,
        };

        let base_url = match env.string("APP_BASE_URL") {
            Some(raw) => {
                Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                    var: "APP_BASE_URL",
                    reason: e.to_string(),
                })?;
                raw.trim_end_matches('/').to_string()
            }
            None => defaults.base_url.clone(),
        };
        let cookie_secure = env
            .flag("COOKIE_SECURE")?
            .unwrap_or(base_url.starts_with("https://"));

        let mut oauth_providers = Vec::new();
        if let Some(google) = env.provider(
            "OAUTH_GOOGLE_CLIENT_ID",
            "OAUTH_GOOGLE_CLIENT_SECRET",
            OAuthProviderConfig::google,
        )? {
            oauth_providers.push(google);
        }
        if let Some(microsoft) = env.provider(
            "OAUTH_MICROSOFT_CLIENT_ID",
            "OAUTH_MICROSOFT_CLIENT_SECRET",
            OAuthProviderConfig::microsoft,
        )? {
            oauth_providers.push(microsoft);
        }

        let config = Self {
            posture,
            host: env.string("HOST").unwrap_or(defaults.host),
            port: env.parsed("PORT", defaults.port)?,
            data_dir: env
                .string(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            base_url,
            encryption_key: env.string("ENCRYPTION_KEY"),
            jwt: JwtConfig {
                secret: env.string("AUTH_JWT_SECRET"),
                jwks_url: env.string("AUTH_JWKS_URL"),
                issuer: env.string("AUTH_JWT_ISSUER"),
                audience: env.string("AUTH_JWT_AUDIENCE"),
                jwks_cache_ttl: Duration::from_secs(
                    env.positive("JWKS_CACHE_TTL_SECONDS", 600)? as u64,
                ),
            },
            api_token: env.string("AUTH_API_TOKEN"),
            dev_bypass_requested: env.flag("AUTH_DEV_BYPASS")?.unwrap_or(false),
            cookie_secure,
            trust_proxy_headers: env.flag("TRUST_PROXY_HEADERS")?.unwrap_or(false),
            session_ttl: chrono::Duration::days(env.positive("SESSION_TTL_DAYS", 30)?),
            superadmin_session_ttl: chrono::Duration::hours(
                env.positive("SUPERADMIN_SESSION_TTL_HOURS", 12)?,
            ),
            magic_link_ttl: chrono::Duration::minutes(env.positive("MAGIC_LINK_TTL_MINUTES", 20)?),
            oauth_state_ttl: chrono::Duration::minutes(
                env.positive("OAUTH_STATE_TTL_MINUTES", 10)?,
            ),
            password_min_length: env.positive(
                "PASSWORD_MIN_LENGTH",
                DEFAULT_MIN_PASSWORD_LENGTH as i64,
            )? as usize,
            ai_rate_limit: RateLimitConfig {
                window_secs: env.positive("AI_RATE_LIMIT_WINDOW_SECONDS", 60)? as u64,
                max_requests: env.positive("AI_RATE_LIMIT_MAX_REQUESTS", 20)? as u32,
            },
            outbound_timeout: Duration::from_secs(
                env.positive("OUTBOUND_HTTP_TIMEOUT_SECONDS", 10)? as u64,
            ),
            mail: MailConfig {
                relay_url: env.string("MAIL_RELAY_URL"),
                relay_token: env.string("MAIL_RELAY_TOKEN"),
                from: env.string("MAIL_FROM").unwrap_or(defaults.mail.from),
            },
            magic_link_debug_fallback: env.flag("MAGIC_LINK_DEBUG_FALLBACK")?.unwrap_or(false),
            superadmin: SuperadminBootstrap {
                username: env
                    .string("SUPERADMIN_USERNAME")
                    .unwrap_or(defaults.superadmin.username),
                password: env
                    .string("SUPERADMIN_PASSWORD")
                    .unwrap_or(defaults.superadmin.password),
            },
            oauth_providers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Enforce the production posture.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(key) = &self.encryption_key {
            SecretCipher::from_hex(key).map_err(|_| ConfigError::InvalidEncryptionKey)?;
        }
        if !self.is_production() {
            return Ok(());
        }
        if self.encryption_key.is_none() {
            return Err(ConfigError::MissingEncryptionKey);
        }
        if self.dev_bypass_requested {
            return Err(ConfigError::DevBypassInProduction);
        }
        if !self.has_bearer_mechanism() {
            return Err(ConfigError::NoAuthMechanism);
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.posture == Posture::Production
    }

    /// JWT secret, JWKS URL or API token configured.
    pub fn has_bearer_mechanism(&self) -> bool {
        self.jwt.secret.is_some() || self.jwt.jwks_url.is_some() || self.api_token.is_some()
    }

    /// The dev bypass needs an explicit opt-in, a development posture and
    /// no bearer mechanism configured at all.
    pub fn dev_bypass_active(&self) -> bool {
        self.dev_bypass_requested && !self.is_production() && !self.has_bearer_mechanism()
    }

    pub fn oauth_provider(&self, id: &str) -> Option<&OAuthProviderConfig> {
        self.oauth_providers.iter().find(|p| p.id == id)
    }

    /// Public URL for a path under the base URL.
    pub fn public_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn oauth_redirect_uri(&self, provider_id: &str) -> String {
        self.public_url(&format!("/v1/auth/oauth/{provider_id}/callback"))
    }

    /// Origin (`scheme://host[:port]`) of the base URL, for CORS.
    pub fn base_origin(&self) -> String {
        Url::parse(&self.base_url)
            .map(|url| url.origin().ascii_serialization())
            .unwrap_or_else(|_| self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn development_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.posture, Posture::Development);
        assert_eq!(config.port, 8080);
        assert_eq!(config.session_ttl, chrono::Duration::days(30));
        assert_eq!(config.superadmin_session_ttl, chrono::Duration::hours(12));
        assert_eq!(config.magic_link_ttl, chrono::Duration::minutes(20));
        assert_eq!(config.oauth_state_ttl, chrono::Duration::minutes(10));
        assert_eq!(config.jwt.jwks_cache_ttl, Duration::from_secs(600));
        assert_eq!(config.password_min_length, 8);
        assert_eq!(
            config.ai_rate_limit,
            RateLimitConfig {
                window_secs: 60,
                max_requests: 20
            }
        );
        assert!(!config.cookie_secure);
        assert!(!config.trust_proxy_headers);
        assert!(!config.dev_bypass_active());
        assert!(config.superadmin.uses_default_password());
    }

    #[test]
    fn production_requires_key_and_mechanism() {
        assert_eq!(
            load(&[("APP_ENV", "production"), ("AUTH_API_TOKEN", "t")]).err(),
            Some(ConfigError::MissingEncryptionKey)
        );
        assert_eq!(
            load(&[("APP_ENV", "production"), ("ENCRYPTION_KEY", KEY)]).err(),
            Some(ConfigError::NoAuthMechanism)
        );
        assert_eq!(
            load(&[
                ("APP_ENV", "production"),
                ("ENCRYPTION_KEY", "short"),
                ("AUTH_API_TOKEN", "t")
            ])
            .err(),
            Some(ConfigError::InvalidEncryptionKey)
        );
        assert!(load(&[
            ("APP_ENV", "production"),
            ("ENCRYPTION_KEY", KEY),
            ("AUTH_JWT_SECRET", "s")
        ])
        .is_ok());
    }

    #[test]
    fn dev_bypass_is_fatal_in_production() {
        assert_eq!(
            load(&[
                ("APP_ENV", "production"),
                ("ENCRYPTION_KEY", KEY),
                ("AUTH_API_TOKEN", "t"),
                ("AUTH_DEV_BYPASS", "true"),
            ])
            .err(),
            Some(ConfigError::DevBypassInProduction)
        );
    }

    #[test]
    fn dev_bypass_needs_explicit_flag_and_no_mechanism() {
        assert!(load(&[("AUTH_DEV_BYPASS", "true")]).unwrap().dev_bypass_active());
        assert!(!load(&[("AUTH_DEV_BYPASS", "true"), ("AUTH_API_TOKEN", "t")])
            .unwrap()
            .dev_bypass_active());
        assert!(matches!(
            load(&[("AUTH_DEV_BYPASS", "maybe")]),
            Err(ConfigError::Invalid { var: "AUTH_DEV_BYPASS", .. })
        ));
    }

    #[test]
    fn https_base_url_implies_secure_cookies() {
        let config = load(&[("APP_BASE_URL", "https://studio.example.com/")]).unwrap();
        assert!(config.cookie_secure);
        assert_eq!(config.base_origin(), "https://studio.example.com");
        assert_eq!(
            config.oauth_redirect_uri("google"),
            "https://studio.example.com/v1/auth/oauth/google/callback"
        );
        let forced = load(&[
            ("APP_BASE_URL", "https://studio.example.com"),
            ("COOKIE_SECURE", "false"),
        ])
        .unwrap();
        assert!(!forced.cookie_secure);
    }

    #[test]
    fn oauth_providers_need_both_halves() {
        let config = load(&[
            ("OAUTH_GOOGLE_CLIENT_ID", "id"),
            ("OAUTH_GOOGLE_CLIENT_SECRET", "secret"),
        ])
        .unwrap();
        assert!(config.oauth_provider("google").is_some());
        assert!(config.oauth_provider("microsoft").is_none());

        assert!(matches!(
            load(&[("OAUTH_MICROSOFT_CLIENT_ID", "id")]),
            Err(ConfigError::Invalid {
                var: "OAUTH_MICROSOFT_CLIENT_SECRET",
                ..
            })
        ));
    }

    #[test]
    fn numeric_values_are_validated() {
        assert!(matches!(
            load(&[("SESSION_TTL_DAYS", "0")]),
            Err(ConfigError::Invalid { var: "SESSION_TTL_DAYS", .. })
        ));
        assert!(matches!(
            load(&[("PORT", "eighty")]),
            Err(ConfigError::Invalid { var: "PORT", .. })
        ));
        let config = load(&[("AI_RATE_LIMIT_MAX_REQUESTS", "5")]).unwrap();
        assert_eq!(config.ai_rate_limit.max_requests, 5);
    }
}
