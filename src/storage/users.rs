// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User records.
//!
//! The normalized (trimmed, lowercased) email is globally unique and indexed
//! in `user_emails`. Deleting a user cascades to its sessions, OAuth links
//! and magic links.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};

use super::{
    get_json_in, magic_links, oauth, put, put_json, remove, sessions, CredentialStore,
    StoreError, StoreResult, StoredTable,
};
use crate::auth::roles::AccountRole;
use crate::auth::utils::normalize_email;

/// Identity record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    /// Email as entered (display form)
    pub email: String,
    /// Trimmed, lowercased email (unique)
    pub email_normalized: String,
    pub role: AccountRole,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    /// `scrypt:<salt>:<digest>`; never leaves the store layer
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub password_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// "First Last", falling back to the email.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            self.email.clone()
        } else {
            name
        }
    }
}

/// Input for creating (or upserting) a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub role: AccountRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
    /// Mark the email verified on creation (trusted OAuth identities)
    pub email_verified: bool,
}

/// Profile edit. `None` leaves a field unchanged; an empty string clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Keep an existing non-empty value; otherwise take the incoming one.
fn fill_if_empty(slot: &mut Option<String>, incoming: Option<String>) {
    if slot.as_deref().map_or(true, str::is_empty) {
        if let Some(value) = non_empty(incoming) {
            *slot = Some(value);
        }
    }
}

fn apply_edit(slot: &mut Option<String>, edit: Option<String>) {
    if let Some(value) = edit {
        *slot = non_empty(Some(value));
    }
}

fn user_id_for_email(txn: &redb::WriteTransaction, email_normalized: &str) -> StoreResult<Option<String>> {
    let t = txn.open_table(StoredTable::UserEmails.definition())?;
    let id = match t.get(email_normalized)? {
        Some(v) => Some(String::from_utf8_lossy(v.value()).into_owned()),
        None => None,
    };
    Ok(id)
}

fn build_user(new: NewUser, now: DateTime<Utc>) -> User {
    let email = new.email.trim().to_string();
    User {
        id: uuid::Uuid::new_v4().to_string(),
        email_normalized: normalize_email(&email),
        email,
        role: new.role,
        first_name: non_empty(new.first_name),
        last_name: non_empty(new.last_name),
        organization_name: non_empty(new.organization_name),
        password_hash: None,
        password_updated_at: None,
        email_verified_at: new.email_verified.then_some(now),
        created_at: now,
        updated_at: now,
    }
}

fn insert_user(txn: &redb::WriteTransaction, user: &User) -> StoreResult<()> {
    put_json(txn, StoredTable::Users, &user.id, user)?;
    put(
        txn,
        StoredTable::UserEmails,
        &user.email_normalized,
        user.id.as_bytes(),
    )
}

fn load_user_in(txn: &redb::WriteTransaction, user_id: &str) -> StoreResult<User> {
    get_json_in(txn, StoredTable::Users, user_id)?
        .ok_or_else(|| StoreError::NotFound(format!("User {user_id}")))
}

impl CredentialStore {
    /// Create a user. Fails with `Conflict` when the email is already registered.
    pub fn create_user(&self, new: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let user = build_user(new, now);
        let write_txn = self.db.begin_write()?;
        if user_id_for_email(&write_txn, &user.email_normalized)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "Email {} already registered",
                user.email_normalized
            )));
        }
        insert_user(&write_txn, &user)?;
        write_txn.commit()?;
        Ok(user)
    }

    /// Insert a user, or merge into the existing record for the same email.
    ///
    /// Existing non-empty name and organization fields are preserved.
    /// Returns the user and whether it was newly created.
    pub fn upsert_user_by_email(
        &self,
        new: NewUser,
        now: DateTime<Utc>,
    ) -> StoreResult<(User, bool)> {
        let email_normalized = normalize_email(&new.email);
        let write_txn = self.db.begin_write()?;
        let result = match user_id_for_email(&write_txn, &email_normalized)? {
            Some(user_id) => {
                let mut user = load_user_in(&write_txn, &user_id)?;
                fill_if_empty(&mut user.first_name, new.first_name);
                fill_if_empty(&mut user.last_name, new.last_name);
                fill_if_empty(&mut user.organization_name, new.organization_name);
                if new.email_verified && user.email_verified_at.is_none() {
                    user.email_verified_at = Some(now);
                }
                user.updated_at = now;
                put_json(&write_txn, StoredTable::Users, &user.id, &user)?;
                (user, false)
            }
            None => {
                let user = build_user(new, now);
                insert_user(&write_txn, &user)?;
                (user, true)
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    pub fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.get_json(StoredTable::Users, user_id)
    }

    pub fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email_normalized = normalize_email(email);
        let user_id: Option<String> = {
            let read_txn = self.db.begin_read()?;
            let t = read_txn.open_table(StoredTable::UserEmails.definition())?;
            let id = match t.get(email_normalized.as_str())? {
                Some(v) => Some(String::from_utf8_lossy(v.value()).into_owned()),
                None => None,
            };
            id
        };
        match user_id {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    /// All users, oldest first.
    pub fn list_users(&self) -> StoreResult<Vec<User>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(StoredTable::Users.definition())?;
        let mut users = Vec::new();
        for entry in t.iter()? {
            let (_, v) = entry?;
            users.push(serde_json::from_slice::<User>(v.value())?);
        }
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    /// Apply a profile edit.
    pub fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        self.modify_user(user_id, now, |user| {
            apply_edit(&mut user.first_name, update.first_name);
            apply_edit(&mut user.last_name, update.last_name);
            apply_edit(&mut user.organization_name, update.organization_name);
        })
    }

    pub fn set_user_role(
        &self,
        user_id: &str,
        role: AccountRole,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        self.modify_user(user_id, now, |user| user.role = role)
    }

    /// Set `email_verified_at` unless already set.
    pub fn mark_email_verified(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<User> {
        self.modify_user(user_id, now, |user| {
            if user.email_verified_at.is_none() {
                user.email_verified_at = Some(now);
            }
        })
    }

    /// Set or clear a password hash and revoke every session of the user
    /// in the same transaction. Returns the number of sessions revoked.
    pub fn set_password_hash(
        &self,
        user_id: &str,
        password_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let mut user = load_user_in(&write_txn, user_id)?;
        user.password_hash = password_hash;
        user.password_updated_at = Some(now);
        user.updated_at = now;
        put_json(&write_txn, StoredTable::Users, &user.id, &user)?;
        let revoked = sessions::revoke_user_sessions_in(&write_txn, user_id, now)?;
        write_txn.commit()?;
        Ok(revoked)
    }

    /// Delete a user and everything hanging off it.
    pub fn delete_user(&self, user_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let Some(user) = get_json_in::<User>(&write_txn, StoredTable::Users, user_id)? else {
            return Ok(false);
        };
        sessions::delete_user_sessions_in(&write_txn, user_id)?;
        oauth::delete_user_accounts_in(&write_txn, user_id)?;
        magic_links::delete_links_for_email_in(&write_txn, &user.email_normalized, true)?;
        remove(&write_txn, StoredTable::UserEmails, &user.email_normalized)?;
        remove(&write_txn, StoredTable::Users, user_id)?;
        write_txn.commit()?;
        Ok(true)
    }

    fn modify_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        edit: impl FnOnce(&mut User),
    ) -> StoreResult<User> {
        let write_txn = self.db.begin_write()?;
        let mut user = load_user_in(&write_txn, user_id)?;
        edit(&mut user);
        user.updated_at = now;
        put_json(&write_txn, StoredTable::Users, &user.id, &user)?;
        write_txn.commit()?;
        Ok(user)
    }
}
