// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Webinar Studio - Authentication, Session & Authorization Service
//!
//! Establishes who is making a request to the webinar authoring service and
//! what it may do.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum) and OpenAPI document
//! - `audit` - Non-blocking audit trail writer
//! - `auth` - Authenticators, session manager, resolver chain, RBAC gate
//! - `crypto` - Secret cipher, password hashing, opaque tokens
//! - `mailer` - Magic link delivery
//! - `storage` - Credential store (embedded redb)

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mailer;
pub mod state;
pub mod storage;
