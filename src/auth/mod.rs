// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Establishes who is making a request and what they may do.
//!
//! ## Sign-in Flows
//!
//! - Magic link: single-use emailed token, exchanged for a session cookie
//! - Password: email + scrypt-hashed password
//! - OAuth2 authorization code with PKCE (Google, Microsoft)
//! - Superadmin: one username/password slot with its own session cookie
//!
//! ## Request Resolution
//!
//! Every protected request runs the [`AuthResolver`] chain: superadmin
//! cookie, session cookie, bearer JWT (HS256 or RS256 via JWKS), static API
//! token, then the dev bypass when explicitly enabled. The result is an
//! [`AuthContext`]; [`Authorized`] and [`SuperadminOnly`] gate routes on it.
//!
//! ## Security
//!
//! - Only SHA-256 digests of session, link and state tokens are stored
//! - Magic links and OAuth states are consumed at most once
//! - Password failures are generic and take the same scrypt work
//! - Token and API key comparisons are constant time
//! - Clock skew tolerance for JWTs is 60 seconds

pub mod bearer;
pub mod claims;
pub mod cookies;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod magic_link;
pub mod middleware;
pub mod oauth;
pub mod password;
pub mod rate_limit;
pub mod resolver;
pub mod roles;
pub mod session;
pub mod superadmin;
pub mod utils;

pub use bearer::BearerVerifier;
pub use claims::{AuthContext, AuthType};
pub use error::{AuthError, TokenRejection};
pub use extractor::{AdminRoles, AiRoles, Auth, Authorized, Client, SuperadminOnly};
pub use jwks::JwksManager;
pub use magic_link::MagicLinkAuthenticator;
pub use oauth::OAuthBroker;
pub use password::PasswordAuthenticator;
pub use rate_limit::RateLimiter;
pub use resolver::AuthResolver;
pub use roles::{AccountRole, Role};
pub use session::{ClientInfo, SessionManager};
pub use superadmin::SuperadminManager;
