// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User sessions.
//!
//! A session row is keyed by its id; `session_tokens` maps the SHA-256 of
//! the cookie token to that id and `sessions_by_user` indexes ids per user.
//! A session is live iff it is not revoked and `expires_at > now`.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableMultimapTable, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::{
    get_json_in, put, put_json, remove, scan_in, CredentialStore, StoreResult, StoredTable,
    SESSIONS_BY_USER,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl AuthSession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

fn session_id_for_token(txn: &WriteTransaction, token_hash: &str) -> StoreResult<Option<String>> {
    let t = txn.open_table(StoredTable::SessionTokens.definition())?;
    let id = match t.get(token_hash)? {
        Some(v) => Some(String::from_utf8_lossy(v.value()).into_owned()),
        None => None,
    };
    Ok(id)
}

fn user_session_ids(txn: &WriteTransaction, user_id: &str) -> StoreResult<Vec<String>> {
    let m = txn.open_multimap_table(SESSIONS_BY_USER)?;
    let mut ids = Vec::new();
    for entry in m.get(user_id)? {
        ids.push(entry?.value().to_string());
    }
    Ok(ids)
}

fn revoke_in(txn: &WriteTransaction, session_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
    let Some(mut session) = get_json_in::<AuthSession>(txn, StoredTable::Sessions, session_id)?
    else {
        return Ok(false);
    };
    if session.revoked_at.is_some() {
        return Ok(false);
    }
    session.revoked_at = Some(now);
    put_json(txn, StoredTable::Sessions, session_id, &session)?;
    Ok(true)
}

fn delete_in(txn: &WriteTransaction, session: &AuthSession) -> StoreResult<()> {
    remove(txn, StoredTable::SessionTokens, &session.token_hash)?;
    remove(txn, StoredTable::Sessions, &session.id)?;
    let mut m = txn.open_multimap_table(SESSIONS_BY_USER)?;
    m.remove(session.user_id.as_str(), session.id.as_str())?;
    Ok(())
}

/// Revoke every live session of a user. Returns how many were revoked.
pub(super) fn revoke_user_sessions_in(
    txn: &WriteTransaction,
    user_id: &str,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let mut revoked = 0;
    for session_id in user_session_ids(txn, user_id)? {
        if revoke_in(txn, &session_id, now)? {
            revoked += 1;
        }
    }
    Ok(revoked)
}

/// Physically delete every session of a user (account deletion).
pub(super) fn delete_user_sessions_in(txn: &WriteTransaction, user_id: &str) -> StoreResult<()> {
    for session_id in user_session_ids(txn, user_id)? {
        if let Some(session) = get_json_in::<AuthSession>(txn, StoredTable::Sessions, &session_id)? {
            delete_in(txn, &session)?;
        }
    }
    let mut m = txn.open_multimap_table(SESSIONS_BY_USER)?;
    m.remove_all(user_id)?;
    Ok(())
}

impl CredentialStore {
    pub fn insert_session(&self, session: &AuthSession) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        put_json(&write_txn, StoredTable::Sessions, &session.id, session)?;
        put(
            &write_txn,
            StoredTable::SessionTokens,
            &session.token_hash,
            session.id.as_bytes(),
        )?;
        {
            let mut m = write_txn.open_multimap_table(SESSIONS_BY_USER)?;
            m.insert(session.user_id.as_str(), session.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<AuthSession>> {
        self.get_json(StoredTable::Sessions, session_id)
    }

    /// Look up a live session by token hash and refresh `last_seen_at`.
    ///
    /// Unknown, revoked and expired tokens all yield `None`.
    pub fn resolve_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AuthSession>> {
        let write_txn = self.db.begin_write()?;
        let Some(session_id) = session_id_for_token(&write_txn, token_hash)? else {
            write_txn.abort()?;
            return Ok(None);
        };
        let mut session = match get_json_in::<AuthSession>(&write_txn, StoredTable::Sessions, &session_id)? {
            Some(s) if s.is_live(now) => s,
            _ => {
                write_txn.abort()?;
                return Ok(None);
            }
        };

        session.last_seen_at = now;
        put_json(&write_txn, StoredTable::Sessions, &session.id, &session)?;
        write_txn.commit()?;
        Ok(Some(session))
    }

    pub fn revoke_session(&self, session_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let revoked = revoke_in(&write_txn, session_id, now)?;
        write_txn.commit()?;
        Ok(revoked)
    }

    /// Revoke the session a cookie token belongs to (logout).
    pub fn revoke_session_by_token(&self, token_hash: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let revoked = match session_id_for_token(&write_txn, token_hash)? {
            Some(session_id) => revoke_in(&write_txn, &session_id, now)?,
            None => false,
        };
        write_txn.commit()?;
        Ok(revoked)
    }

    pub fn revoke_user_sessions(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let revoked = revoke_user_sessions_in(&write_txn, user_id, now)?;
        write_txn.commit()?;
        Ok(revoked)
    }

    /// Sessions of a user, newest first.
    pub fn list_user_sessions(&self, user_id: &str) -> StoreResult<Vec<AuthSession>> {
        let read_txn = self.db.begin_read()?;
        let m = read_txn.open_multimap_table(SESSIONS_BY_USER)?;
        let t = read_txn.open_table(StoredTable::Sessions.definition())?;
        let mut sessions = Vec::new();
        for entry in m.get(user_id)? {
            let session_id = entry?;
            if let Some(v) = t.get(session_id.value())? {
                sessions.push(serde_json::from_slice::<AuthSession>(v.value())?);
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Delete sessions that are expired or revoked. Returns how many were removed.
    pub fn purge_sessions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let dead = scan_in::<AuthSession>(&write_txn, StoredTable::Sessions, |s| !s.is_live(now))?;
        for (_, session) in &dead {
            delete_in(&write_txn, session)?;
        }
        write_txn.commit()?;
        Ok(dead.len())
    }
}
