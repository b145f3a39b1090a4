// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-window counters keyed by `scope:key`.

use serde::{Deserialize, Serialize};

use super::{get_json_in, put_json, remove, scan_in, CredentialStore, StoreResult, StoredTable};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitBucket {
    pub scope: String,
    pub key: String,
    /// Unix seconds of the window start
    pub window_start: i64,
    pub count: u32,
}

fn bucket_key(scope: &str, key: &str) -> String {
    format!("{scope}:{key}")
}

impl CredentialStore {
    /// Count one request against `(scope, key)` in the window starting at
    /// `window_start`, resetting to 1 when the stored window differs.
    ///
    /// The read and the write share one write transaction, so concurrent
    /// callers are serialized and no increment is lost.
    pub fn hit_rate_limit(
        &self,
        scope: &str,
        key: &str,
        window_start: i64,
    ) -> StoreResult<RateLimitBucket> {
        let row_key = bucket_key(scope, key);
        let write_txn = self.db.begin_write()?;
        let bucket = match get_json_in::<RateLimitBucket>(&write_txn, StoredTable::RateLimits, &row_key)? {
            Some(mut bucket) if bucket.window_start == window_start => {
                bucket.count = bucket.count.saturating_add(1);
                bucket
            }
            _ => RateLimitBucket {
                scope: scope.to_string(),
                key: key.to_string(),
                window_start,
                count: 1,
            },
        };
        put_json(&write_txn, StoredTable::RateLimits, &row_key, &bucket)?;
        write_txn.commit()?;
        Ok(bucket)
    }

    pub fn get_rate_limit(&self, scope: &str, key: &str) -> StoreResult<Option<RateLimitBucket>> {
        self.get_json(StoredTable::RateLimits, &bucket_key(scope, key))
    }

    /// Delete buckets whose window started before `cutoff` (unix seconds).
    pub fn purge_rate_limits(&self, cutoff: i64) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let stale = scan_in::<RateLimitBucket>(&write_txn, StoredTable::RateLimits, |b| {
            b.window_start < cutoff
        })?;
        for (key, _) in &stale {
            remove(&write_txn, StoredTable::RateLimits, key)?;
        }
        write_txn.commit()?;
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;

    #[test]
    fn increments_within_window_and_resets_on_new_window() {
        let (store, _dir) = temp_store();
        assert_eq!(store.hit_rate_limit("ai", "u1", 600).unwrap().count, 1);
        assert_eq!(store.hit_rate_limit("ai", "u1", 600).unwrap().count, 2);
        assert_eq!(store.hit_rate_limit("ai", "u2", 600).unwrap().count, 1);
        assert_eq!(store.hit_rate_limit("other", "u1", 600).unwrap().count, 1);

        let next = store.hit_rate_limit("ai", "u1", 660).unwrap();
        assert_eq!(next.count, 1);
        assert_eq!(next.window_start, 660);
    }

    #[test]
    fn concurrent_hits_are_not_lost() {
        let (store, _dir) = temp_store();
        let store = std::sync::Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.hit_rate_limit("ai", "u1", 0).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_rate_limit("ai", "u1").unwrap().unwrap().count, 80);
    }

    #[test]
    fn purge_drops_stale_buckets() {
        let (store, _dir) = temp_store();
        store.hit_rate_limit("ai", "old", 0).unwrap();
        store.hit_rate_limit("ai", "new", 120).unwrap();
        assert_eq!(store.purge_rate_limits(60).unwrap(), 1);
        assert!(store.get_rate_limit("ai", "old").unwrap().is_none());
        assert!(store.get_rate_limit("ai", "new").unwrap().is_some());
    }
}
