// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Store
//!
//! Durable records for the auth core, backed by an embedded redb database
//! (pure Rust, ACID). Values are JSON documents.
//!
//! ## Table Layout
//!
//! ```text
//! users                    user_id            -> User
//! user_emails              normalized email   -> user_id
//! magic_links              token hash         -> MagicLink
//! magic_links_by_email     email              => {token hash}      (multimap)
//! sessions                 session_id         -> AuthSession
//! session_tokens           token hash         -> session_id
//! sessions_by_user         user_id            => {session_id}      (multimap)
//! oauth_accounts           provider:subject   -> OAuthAccount
//! oauth_accounts_by_user   user_id            => {provider:subject} (multimap)
//! oauth_states             state hash         -> OAuthState
//! settings                 key                -> JSON value
//! rate_limits              scope:key          -> RateLimitBucket
//! audit_log                zero-padded seq    -> AuditLogEntry     (append-only)
//! ```
//!
//! ## Table Policy
//!
//! Every write goes through [`put`] / [`remove`], which consult the table's
//! [`TablePolicy`]. `audit_log` is append-only: overwriting or deleting an
//! existing row fails with [`StoreError::AppendOnly`] regardless of caller.
//!
//! Invariants spanning several rows (link replacement, consume-once, the
//! rate-limit increment-or-reset, password change + session revocation,
//! cascading user deletion) each run inside a single write transaction.

pub mod audit;
pub mod magic_links;
pub mod oauth;
pub mod rate_limits;
pub mod secrets;
pub mod sessions;
pub mod settings;
pub mod users;

use std::path::Path;

use redb::{
    Database, MultimapTableDefinition, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

pub use audit::AuditLogEntry;
pub use magic_links::MagicLink;
pub use oauth::{OAuthAccount, OAuthState};
pub use rate_limits::RateLimitBucket;
pub use secrets::SecretKey;
pub use sessions::AuthSession;
pub use settings::SuperadminSlot;
pub use users::{NewUser, ProfileUpdate, User};

// =============================================================================
// Table Definitions
// =============================================================================

const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const USER_EMAILS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_emails");
const MAGIC_LINKS: TableDefinition<&str, &[u8]> = TableDefinition::new("magic_links");
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const SESSION_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("session_tokens");
const OAUTH_ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("oauth_accounts");
const OAUTH_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("oauth_states");
const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");
const RATE_LIMITS: TableDefinition<&str, &[u8]> = TableDefinition::new("rate_limits");
const AUDIT_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");

const MAGIC_LINKS_BY_EMAIL: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("magic_links_by_email");
const SESSIONS_BY_USER: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("sessions_by_user");
const OAUTH_ACCOUNTS_BY_USER: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("oauth_accounts_by_user");

/// Keyed tables managed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredTable {
    Users,
    UserEmails,
    MagicLinks,
    Sessions,
    SessionTokens,
    OAuthAccounts,
    OAuthStates,
    Settings,
    RateLimits,
    AuditLog,
}

/// Mutation rules enforced for every write to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePolicy {
    Mutable,
    /// Rows may be inserted once and never overwritten or removed.
    AppendOnly,
}

impl StoredTable {
    pub const ALL: [StoredTable; 10] = [
        StoredTable::Users,
        StoredTable::UserEmails,
        StoredTable::MagicLinks,
        StoredTable::Sessions,
        StoredTable::SessionTokens,
        StoredTable::OAuthAccounts,
        StoredTable::OAuthStates,
        StoredTable::Settings,
        StoredTable::RateLimits,
        StoredTable::AuditLog,
    ];

    fn definition(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            StoredTable::Users => USERS,
            StoredTable::UserEmails => USER_EMAILS,
            StoredTable::MagicLinks => MAGIC_LINKS,
            StoredTable::Sessions => SESSIONS,
            StoredTable::SessionTokens => SESSION_TOKENS,
            StoredTable::OAuthAccounts => OAUTH_ACCOUNTS,
            StoredTable::OAuthStates => OAUTH_STATES,
            StoredTable::Settings => SETTINGS,
            StoredTable::RateLimits => RATE_LIMITS,
            StoredTable::AuditLog => AUDIT_LOG,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StoredTable::Users => "users",
            StoredTable::UserEmails => "user_emails",
            StoredTable::MagicLinks => "magic_links",
            StoredTable::Sessions => "sessions",
            StoredTable::SessionTokens => "session_tokens",
            StoredTable::OAuthAccounts => "oauth_accounts",
            StoredTable::OAuthStates => "oauth_states",
            StoredTable::Settings => "settings",
            StoredTable::RateLimits => "rate_limits",
            StoredTable::AuditLog => "audit_log",
        }
    }

    pub fn policy(self) -> TablePolicy {
        match self {
            StoredTable::AuditLog => TablePolicy::AppendOnly,
            _ => TablePolicy::Mutable,
        }
    }
}

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("table {0} is append-only")]
    AppendOnly(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Guarded Row Access
// =============================================================================

/// Insert or overwrite a row, honouring the table policy.
fn put(txn: &WriteTransaction, table: StoredTable, key: &str, value: &[u8]) -> StoreResult<()> {
    let mut t = txn.open_table(table.definition())?;
    if table.policy() == TablePolicy::AppendOnly && t.get(key)?.is_some() {
        return Err(StoreError::AppendOnly(table.name()));
    }
    t.insert(key, value)?;
    Ok(())
}

/// Remove a row, honouring the table policy. Returns whether a row existed.
fn remove(txn: &WriteTransaction, table: StoredTable, key: &str) -> StoreResult<bool> {
    if table.policy() == TablePolicy::AppendOnly {
        return Err(StoreError::AppendOnly(table.name()));
    }
    let mut t = txn.open_table(table.definition())?;
    let existed = t.remove(key)?.is_some();
    Ok(existed)
}

fn put_json<T: Serialize>(
    txn: &WriteTransaction,
    table: StoredTable,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let json = serde_json::to_vec(value)?;
    put(txn, table, key, &json)
}

fn get_json_in<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: StoredTable,
    key: &str,
) -> StoreResult<Option<T>> {
    let t = txn.open_table(table.definition())?;
    let value = match t.get(key)? {
        Some(v) => Some(serde_json::from_slice(v.value())?),
        None => None,
    };
    Ok(value)
}

/// Collect the JSON rows of a table whose decoded value matches `keep`.
fn scan_in<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: StoredTable,
    mut keep: impl FnMut(&T) -> bool,
) -> StoreResult<Vec<(String, T)>> {
    let t = txn.open_table(table.definition())?;
    let mut rows = Vec::new();
    for entry in t.iter()? {
        let (k, v) = entry?;
        let row: T = serde_json::from_slice(v.value())?;
        if keep(&row) {
            rows.push((k.value().to_string(), row));
        }
    }
    Ok(rows)
}

// =============================================================================
// CredentialStore
// =============================================================================

/// Embedded ACID store for every auth record.
pub struct CredentialStore {
    db: Database,
}

impl CredentialStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            for table in StoredTable::ALL {
                let _ = write_txn.open_table(table.definition())?;
            }
            let _ = write_txn.open_multimap_table(MAGIC_LINKS_BY_EMAIL)?;
            let _ = write_txn.open_multimap_table(SESSIONS_BY_USER)?;
            let _ = write_txn.open_multimap_table(OAUTH_ACCOUNTS_BY_USER)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn get_json<T: DeserializeOwned>(&self, table: StoredTable, key: &str) -> StoreResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table.definition())?;
        let value = match t.get(key)? {
            Some(v) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        Ok(value)
    }

    /// Number of rows in a table.
    pub fn count(&self, table: StoredTable) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table.definition())?;
        let len = t.len()?;
        Ok(len)
    }

    /// Raw maintenance write. Subject to the same table policy as every other write.
    pub fn put_raw(&self, table: StoredTable, key: &str, value: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        put(&write_txn, table, key, value)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Raw maintenance delete. Subject to the same table policy as every other write.
    pub fn delete_raw(&self, table: StoredTable, key: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = remove(&write_txn, table, key)?;
        write_txn.commit()?;
        Ok(existed)
    }

    /// Write-read probe used by health checks.
    pub fn health_check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(SETTINGS)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::CredentialStore;
    use tempfile::TempDir;

    /// Open a store in a fresh temporary directory.
    pub(crate) fn temp_store() -> (CredentialStore, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::open(&dir.path().join("auth.redb")).expect("open store");
        (store, dir)
    }
}
