// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed key-value settings and the superadmin singleton.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    get_json_in, put_json, remove, CredentialStore, StoreError, StoreResult, StoredTable,
};

/// Settings key of the superadmin singleton row.
const SUPERADMIN_SLOT_KEY: &str = "superadmin";

/// The single operator credential and its (at most one) live session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuperadminSlot {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub session_token_hash: Option<String>,
    #[serde(default)]
    pub session_expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SuperadminSlot {
    pub fn new(username: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            username,
            password_hash,
            session_token_hash: None,
            session_expires_at: None,
            updated_at: now,
        }
    }

    /// Same username and password hash as `other`, ignoring the session.
    pub fn same_credentials(&self, other: &SuperadminSlot) -> bool {
        self.username == other.username && self.password_hash == other.password_hash
    }

    pub fn clear_session(&mut self) {
        self.session_token_hash = None;
        self.session_expires_at = None;
    }
}

impl CredentialStore {
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.get_json(StoredTable::Settings, key)
    }

    pub fn put_setting<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        put_json(&write_txn, StoredTable::Settings, key, value)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = remove(&write_txn, StoredTable::Settings, key)?;
        write_txn.commit()?;
        Ok(existed)
    }

    pub fn load_superadmin_slot(&self) -> StoreResult<Option<SuperadminSlot>> {
        self.get_setting(SUPERADMIN_SLOT_KEY)
    }

    /// Read, modify and write the singleton row in one write transaction.
    ///
    /// `update` sees the committed row as of this transaction. Returning an
    /// error aborts without writing. `Ok(None)` when the slot does not exist.
    pub fn update_superadmin_slot<T, E>(
        &self,
        update: impl FnOnce(&mut SuperadminSlot) -> Result<T, E>,
    ) -> Result<Option<T>, E>
    where
        E: From<StoreError>,
    {
        let write_txn = self.db.begin_write().map_err(StoreError::from)?;
        let Some(mut slot) =
            get_json_in::<SuperadminSlot>(&write_txn, StoredTable::Settings, SUPERADMIN_SLOT_KEY)?
        else {
            write_txn.abort().map_err(StoreError::from)?;
            return Ok(None);
        };
        let outcome = match update(&mut slot) {
            Ok(outcome) => outcome,
            Err(e) => {
                write_txn.abort().map_err(StoreError::from)?;
                return Err(e);
            }
        };
        put_json(&write_txn, StoredTable::Settings, SUPERADMIN_SLOT_KEY, &slot)?;
        write_txn.commit().map_err(StoreError::from)?;
        Ok(Some(outcome))
    }

    /// Write the singleton row only if none exists yet. Returns whether it was written.
    pub fn bootstrap_superadmin_slot(&self, slot: &SuperadminSlot) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        if get_json_in::<SuperadminSlot>(&write_txn, StoredTable::Settings, SUPERADMIN_SLOT_KEY)?
            .is_some()
        {
            write_txn.abort()?;
            return Ok(false);
        }
        put_json(&write_txn, StoredTable::Settings, SUPERADMIN_SLOT_KEY, slot)?;
        write_txn.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;

    #[test]
    fn typed_settings_round_trip() {
        let (store, _dir) = temp_store();
        assert_eq!(store.get_setting::<u32>("retention_days").unwrap(), None);
        store.put_setting("retention_days", &90u32).unwrap();
        assert_eq!(store.get_setting::<u32>("retention_days").unwrap(), Some(90));
        assert!(store.delete_setting("retention_days").unwrap());
        assert_eq!(store.get_setting::<u32>("retention_days").unwrap(), None);
    }

    #[test]
    fn bootstrap_only_writes_once() {
        let (store, _dir) = temp_store();
        let now = Utc::now();
        let slot = SuperadminSlot::new("root".into(), "hash-1".into(), now);
        assert!(store.bootstrap_superadmin_slot(&slot).unwrap());

        let other = SuperadminSlot::new("other".into(), "hash-2".into(), now);
        assert!(!store.bootstrap_superadmin_slot(&other).unwrap());
        assert_eq!(store.load_superadmin_slot().unwrap().unwrap().username, "root");
    }

    #[test]
    fn update_rewrites_the_single_slot() {
        let (store, _dir) = temp_store();
        let now = Utc::now();
        let slot = SuperadminSlot::new("root".into(), "hash".into(), now);
        assert!(store.bootstrap_superadmin_slot(&slot).unwrap());

        for token in ["t1", "t2"] {
            store
                .update_superadmin_slot(|slot| {
                    slot.session_token_hash = Some(token.into());
                    slot.session_expires_at = Some(now);
                    Ok::<_, StoreError>(())
                })
                .unwrap();
        }

        let loaded = store.load_superadmin_slot().unwrap().unwrap();
        assert_eq!(loaded.session_token_hash.as_deref(), Some("t2"));
        assert_eq!(store.count(StoredTable::Settings).unwrap(), 1);
    }

    #[test]
    fn rejected_update_leaves_the_slot_untouched() {
        let (store, _dir) = temp_store();
        let slot = SuperadminSlot::new("root".into(), "hash".into(), Utc::now());
        store.bootstrap_superadmin_slot(&slot).unwrap();

        let result = store.update_superadmin_slot(|slot| {
            slot.password_hash = "other".into();
            Err::<(), _>(StoreError::Conflict("stale".into()))
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.load_superadmin_slot().unwrap().unwrap(), slot);
    }

    #[test]
    fn update_without_a_slot_is_none() {
        let (store, _dir) = temp_store();
        let outcome = store
            .update_superadmin_slot(|_| Ok::<_, StoreError>(1))
            .unwrap();
        assert_eq!(outcome, None);
    }
}
