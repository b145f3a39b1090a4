// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The resolved request identity and JWT role mapping.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::roles::Role;
use crate::storage::{AuthSession, User};

/// Mechanism that produced an [`AuthContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Superadmin,
    Session,
    Jwt,
    ApiToken,
    DevBypass,
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::Superadmin => "superadmin",
            AuthType::Session => "session",
            AuthType::Jwt => "jwt",
            AuthType::ApiToken => "api_token",
            AuthType::DevBypass => "dev_bypass",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is making the request and what they may do.
///
/// This is the primary type handlers and collaborators consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthContext {
    /// Stable actor identifier (user id, JWT `sub`, or a fixed service name)
    pub actor_id: String,
    #[schema(value_type = Vec<Role>)]
    pub roles: BTreeSet<Role>,
    pub auth_type: AuthType,
    /// Local user, when the actor is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Session id for cookie sessions (not serialized)
    #[serde(skip)]
    pub session_id: Option<String>,
}

/// Actor id of the static API token.
pub const API_TOKEN_ACTOR: &str = "api-token";

/// Actor id of the dev bypass identity.
pub const DEV_BYPASS_ACTOR: &str = "dev-bypass";

/// Roles granted to the static API token and the dev bypass.
const BROAD_ROLES: [Role; 3] = [Role::Superadmin, Role::Admin, Role::Organizer];

impl AuthContext {
    pub fn for_session(user: &User, session: &AuthSession) -> Self {
        Self {
            actor_id: user.id.clone(),
            roles: BTreeSet::from([user.role.role()]),
            auth_type: AuthType::Session,
            user_id: Some(user.id.clone()),
            email: Some(user.email.clone()),
            session_id: Some(session.id.clone()),
        }
    }

    pub fn superadmin(username: &str) -> Self {
        Self {
            actor_id: format!("superadmin:{username}"),
            roles: BTreeSet::from([Role::Superadmin]),
            auth_type: AuthType::Superadmin,
            user_id: None,
            email: None,
            session_id: None,
        }
    }

    pub fn jwt(subject: String, email: Option<String>, roles: BTreeSet<Role>) -> Self {
        Self {
            actor_id: subject,
            roles,
            auth_type: AuthType::Jwt,
            user_id: None,
            email,
            session_id: None,
        }
    }

    pub fn api_token() -> Self {
        Self::broad(API_TOKEN_ACTOR, AuthType::ApiToken)
    }

    pub fn dev_bypass() -> Self {
        Self::broad(DEV_BYPASS_ACTOR, AuthType::DevBypass)
    }

    fn broad(actor: &str, auth_type: AuthType) -> Self {
        Self {
            actor_id: actor.to_string(),
            roles: BROAD_ROLES.into_iter().collect(),
            auth_type,
            user_id: None,
            email: None,
            session_id: None,
        }
    }

    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        super::roles::require_any_role(&self.roles, allowed)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.as_str().to_string()).collect()
    }
}

/// Claim paths that may carry roles, scanned in this order.
pub const ROLE_CLAIM_PATHS: [&[&str]; 4] = [
    &["roles"],
    &["role"],
    &["groups"],
    &["realm_access", "roles"],
];

fn claim_at<'a>(claims: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(claims, |node, key| node.get(key))
}

/// Map JWT claims to roles. Names are lowercased; unknown names are dropped.
///
/// A claim may be a string (whitespace or comma separated) or an array of
/// strings.
pub fn roles_from_claims(claims: &Value) -> BTreeSet<Role> {
    let mut roles = BTreeSet::new();
    for path in ROLE_CLAIM_PATHS {
        let Some(value) = claim_at(claims, path) else {
            continue;
        };
        let names: Vec<&str> = match value {
            Value::String(s) => s
                .split(|c: char| c == ',' || c.is_whitespace())
                .collect(),
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        roles.extend(names.into_iter().filter_map(Role::parse));
    }
    roles
}
