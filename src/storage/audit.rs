// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail of protected-route calls.
//!
//! Rows are keyed by a zero-padded sequence number so key order is
//! insertion order. The `audit_log` table is append-only at the storage
//! layer: once written, a row can be neither overwritten nor deleted.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{put_json, CredentialStore, StoreResult, StoredTable};

/// One protected request, recorded on completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct AuditLogEntry {
    /// Unique entry ID.
    pub id: String,
    /// Resolved actor, if authentication succeeded.
    pub actor_id: Option<String>,
    /// Roles of the actor at request time.
    #[serde(default)]
    pub actor_roles: Vec<String>,
    /// Mechanism that authenticated the actor.
    pub auth_type: Option<String>,
    pub method: String,
    /// Path without query string.
    pub path: String,
    pub status: u16,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(method: impl Into<String>, path: impl Into<String>, status: u16) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: None,
            actor_roles: Vec::new(),
            auth_type: None,
            method: method.into(),
            path: path.into(),
            status,
            ip: None,
            user_agent: None,
            request_id: None,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_actor(
        mut self,
        actor_id: impl Into<String>,
        roles: Vec<String>,
        auth_type: impl Into<String>,
    ) -> Self {
        self.actor_id = Some(actor_id.into());
        self.actor_roles = roles;
        self.auth_type = Some(auth_type.into());
        self
    }
}

fn seq_key(seq: u64) -> String {
    format!("{seq:020}")
}

impl CredentialStore {
    /// Append an entry. Returns its sequence number.
    pub fn append_audit_entry(&self, entry: &AuditLogEntry) -> StoreResult<u64> {
        let write_txn = self.db.begin_write()?;
        let seq = {
            let t = write_txn.open_table(StoredTable::AuditLog.definition())?;
            let last_seq = match t.last()? {
                Some((k, _)) => k.value().parse::<u64>().unwrap_or(0),
                None => 0,
            };
            last_seq + 1
        };
        put_json(&write_txn, StoredTable::AuditLog, &seq_key(seq), entry)?;
        write_txn.commit()?;
        Ok(seq)
    }

    /// Newest entries first, optionally filtered by actor.
    pub fn list_audit_entries(
        &self,
        limit: usize,
        actor_id: Option<&str>,
    ) -> StoreResult<Vec<AuditLogEntry>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(StoredTable::AuditLog.definition())?;
        let mut entries = Vec::new();
        for row in t.iter()?.rev() {
            if entries.len() >= limit {
                break;
            }
            let (_, v) = row?;
            let entry: AuditLogEntry = serde_json::from_slice(v.value())?;
            if actor_id.is_some_and(|a| entry.actor_id.as_deref() != Some(a)) {
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}
