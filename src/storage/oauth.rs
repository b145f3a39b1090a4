// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth identity links and in-flight authorization state.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableMultimapTable, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::{
    get_json_in, put_json, remove, scan_in, CredentialStore, StoreResult, StoredTable,
    OAUTH_ACCOUNTS_BY_USER,
};

/// Link between an external identity and a local user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthAccount {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub provider_subject: String,
    /// Normalized email reported by the provider
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthAccount {
    pub fn key(provider: &str, subject: &str) -> String {
        format!("{provider}:{subject}")
    }
}

/// CSRF/PKCE state of one authorization attempt, keyed by the state hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthState {
    pub state_hash: String,
    pub provider: String,
    #[serde(default)]
    pub code_verifier: Option<String>,
    pub redirect_after: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub(super) fn delete_user_accounts_in(txn: &WriteTransaction, user_id: &str) -> StoreResult<()> {
    let keys: Vec<String> = {
        let m = txn.open_multimap_table(OAUTH_ACCOUNTS_BY_USER)?;
        let mut keys = Vec::new();
        for entry in m.get(user_id)? {
            keys.push(entry?.value().to_string());
        }
        keys
    };
    for key in keys {
        remove(txn, StoredTable::OAuthAccounts, &key)?;
    }
    let mut m = txn.open_multimap_table(OAUTH_ACCOUNTS_BY_USER)?;
    m.remove_all(user_id)?;
    Ok(())
}

impl CredentialStore {
    /// Insert or refresh the link for `(provider, subject)`.
    ///
    /// An existing link is re-pointed at `user_id` so the mapping stays current.
    pub fn upsert_oauth_account(
        &self,
        user_id: &str,
        provider: &str,
        subject: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<OAuthAccount> {
        let key = OAuthAccount::key(provider, subject);
        let write_txn = self.db.begin_write()?;
        let account = match get_json_in::<OAuthAccount>(&write_txn, StoredTable::OAuthAccounts, &key)? {
            Some(mut existing) => {
                if existing.user_id != user_id {
                    let mut m = write_txn.open_multimap_table(OAUTH_ACCOUNTS_BY_USER)?;
                    m.remove(existing.user_id.as_str(), key.as_str())?;
                    existing.user_id = user_id.to_string();
                }
                existing.email = email.to_string();
                existing.updated_at = now;
                existing
            }
            None => OAuthAccount {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                provider: provider.to_string(),
                provider_subject: subject.to_string(),
                email: email.to_string(),
                created_at: now,
                updated_at: now,
            },
        };
        put_json(&write_txn, StoredTable::OAuthAccounts, &key, &account)?;
        {
            let mut m = write_txn.open_multimap_table(OAUTH_ACCOUNTS_BY_USER)?;
            m.insert(user_id, key.as_str())?;
        }
        write_txn.commit()?;
        Ok(account)
    }

    pub fn find_oauth_account(
        &self,
        provider: &str,
        subject: &str,
    ) -> StoreResult<Option<OAuthAccount>> {
        self.get_json(StoredTable::OAuthAccounts, &OAuthAccount::key(provider, subject))
    }

    pub fn list_user_oauth_accounts(&self, user_id: &str) -> StoreResult<Vec<OAuthAccount>> {
        let read_txn = self.db.begin_read()?;
        let m = read_txn.open_multimap_table(OAUTH_ACCOUNTS_BY_USER)?;
        let t = read_txn.open_table(StoredTable::OAuthAccounts.definition())?;
        let mut accounts = Vec::new();
        for entry in m.get(user_id)? {
            let key = entry?;
            if let Some(v) = t.get(key.value())? {
                accounts.push(serde_json::from_slice::<OAuthAccount>(v.value())?);
            }
        }
        Ok(accounts)
    }

    pub fn insert_oauth_state(&self, state: &OAuthState) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        put_json(&write_txn, StoredTable::OAuthStates, &state.state_hash, state)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Mark a state consumed if it exists and has not been consumed yet.
    ///
    /// Consumption happens before the caller checks expiry and provider, so a
    /// state is burned even when the callback goes on to fail.
    pub fn consume_oauth_state(
        &self,
        state_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<OAuthState>> {
        let write_txn = self.db.begin_write()?;
        let mut state = match get_json_in::<OAuthState>(&write_txn, StoredTable::OAuthStates, state_hash)? {
            Some(state) if state.consumed_at.is_none() => state,
            _ => {
                write_txn.abort()?;
                return Ok(None);
            }
        };
        state.consumed_at = Some(now);
        put_json(&write_txn, StoredTable::OAuthStates, state_hash, &state)?;
        write_txn.commit()?;
        Ok(Some(state))
    }

    /// Delete expired states. Returns how many were removed.
    pub fn purge_oauth_states(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let expired = scan_in::<OAuthState>(&write_txn, StoredTable::OAuthStates, |s| s.expires_at <= now)?;
        for (hash, _) in &expired {
            remove(&write_txn, StoredTable::OAuthStates, hash)?;
        }
        write_txn.commit()?;
        Ok(expired.len())
    }
}
