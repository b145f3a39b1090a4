// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Magic-link tokens, keyed by the SHA-256 of the raw token.
//!
//! Consumed links are kept (with `consumed_at` set) until they expire so a
//! replay hits a known row rather than looking like a fresh token.

use chrono::{DateTime, Utc};
use redb::{ReadableMultimapTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::{
    get_json_in, put_json, remove, scan_in, CredentialStore, StoreResult, StoredTable,
    MAGIC_LINKS_BY_EMAIL,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MagicLink {
    pub token_hash: String,
    pub user_id: String,
    /// Normalized email
    pub email: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MagicLink {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.expires_at > now
    }
}

/// Delete the links issued for an email. Consumed links survive unless
/// `include_consumed` is set. Returns how many rows were deleted.
pub(super) fn delete_links_for_email_in(
    txn: &WriteTransaction,
    email: &str,
    include_consumed: bool,
) -> StoreResult<usize> {
    let hashes: Vec<String> = {
        let m = txn.open_multimap_table(MAGIC_LINKS_BY_EMAIL)?;
        let mut hashes = Vec::new();
        for entry in m.get(email)? {
            hashes.push(entry?.value().to_string());
        }
        hashes
    };

    let mut deleted = 0;
    for hash in hashes {
        let link = get_json_in::<MagicLink>(txn, StoredTable::MagicLinks, &hash)?;
        let doomed = match &link {
            Some(link) => include_consumed || link.consumed_at.is_none(),
            None => true,
        };
        if !doomed {
            continue;
        }
        if remove(txn, StoredTable::MagicLinks, &hash)? {
            deleted += 1;
        }
        let mut m = txn.open_multimap_table(MAGIC_LINKS_BY_EMAIL)?;
        m.remove(email, hash.as_str())?;
    }
    Ok(deleted)
}

impl CredentialStore {
    /// Store a new link after deleting every outstanding (unconsumed) link
    /// for the same email. Returns how many links were replaced.
    pub fn replace_magic_link(&self, link: &MagicLink) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let replaced = delete_links_for_email_in(&write_txn, &link.email, false)?;
        put_json(&write_txn, StoredTable::MagicLinks, &link.token_hash, link)?;
        {
            let mut m = write_txn.open_multimap_table(MAGIC_LINKS_BY_EMAIL)?;
            m.insert(link.email.as_str(), link.token_hash.as_str())?;
        }
        write_txn.commit()?;
        Ok(replaced)
    }

    pub fn get_magic_link(&self, token_hash: &str) -> StoreResult<Option<MagicLink>> {
        self.get_json(StoredTable::MagicLinks, token_hash)
    }

    /// Atomically mark a link consumed.
    ///
    /// Returns the link only if it existed, was unconsumed and unexpired.
    pub fn consume_magic_link(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<MagicLink>> {
        let write_txn = self.db.begin_write()?;
        let mut link = match get_json_in::<MagicLink>(&write_txn, StoredTable::MagicLinks, token_hash)? {
            Some(link) if link.is_usable(now) => link,
            _ => {
                write_txn.abort()?;
                return Ok(None);
            }
        };
        link.consumed_at = Some(now);
        put_json(&write_txn, StoredTable::MagicLinks, token_hash, &link)?;
        write_txn.commit()?;
        Ok(Some(link))
    }

    /// Delete expired links. Returns how many were removed.
    pub fn purge_magic_links(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let expired = scan_in::<MagicLink>(&write_txn, StoredTable::MagicLinks, |l| l.expires_at <= now)?;
        for (hash, link) in &expired {
            remove(&write_txn, StoredTable::MagicLinks, hash)?;
            let mut m = write_txn.open_multimap_table(MAGIC_LINKS_BY_EMAIL)?;
            m.remove(link.email.as_str(), hash.as_str())?;
        }
        write_txn.commit()?;
        Ok(expired.len())
    }
}
