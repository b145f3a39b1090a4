// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Roles and the role-membership gate.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Role carried by a resolved request context.
///
/// There is no hierarchy: `Admin` does not imply `Organizer`. Routes list
/// every role they accept.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates and runs webinar events
    Organizer,
    /// Manages users
    Admin,
    /// Operator; granted by the superadmin session or the API token, never stored on a user
    Superadmin,
}

impl Role {
    /// Parse role from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_lowercase().as_str() {
            "organizer" => Some(Role::Organizer),
            "admin" => Some(Role::Admin),
            "superadmin" => Some(Role::Superadmin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Organizer => "organizer",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role persisted on a user row. `superadmin` is deliberately absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    #[default]
    Organizer,
    Admin,
}

impl AccountRole {
    pub fn role(self) -> Role {
        match self {
            AccountRole::Organizer => Role::Organizer,
            AccountRole::Admin => Role::Admin,
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role().as_str())
    }
}

/// `true` iff the resolved roles intersect `allowed`.
pub fn require_any_role(roles: &BTreeSet<Role>, allowed: &[Role]) -> bool {
    allowed.iter().any(|role| roles.contains(role))
}
