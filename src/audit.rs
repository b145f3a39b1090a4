// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Audit Trail Writer
//!
//! Request handlers never write audit rows themselves. The audit middleware
//! hands each [`AuditLogEntry`] to an [`AuditLogger`], which enqueues it on a
//! bounded channel without waiting. A single [`AuditWorker`] drains the
//! channel into the append-only `audit_log` table.
//!
//! ## Back-pressure
//!
//! When the queue is full the entry is dropped and a warning is logged; the
//! response is never delayed. Write failures are logged the same way.
//!
//! ## Shutdown
//!
//! The worker stops on `CancellationToken` cancellation after draining what
//! is already queued, following the same pattern as the other background
//! tasks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::{AuditLogEntry, CredentialStore};

/// Entries buffered between the middleware and the worker.
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Non-blocking producer side.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditLogEntry>,
}

impl AuditLogger {
    /// Create a logger and the worker that persists its entries.
    pub fn channel(store: Arc<CredentialStore>) -> (Self, AuditWorker) {
        Self::with_capacity(store, AUDIT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<CredentialStore>, capacity: usize) -> (Self, AuditWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, AuditWorker { rx, store })
    }

    /// Enqueue an entry. Returns `false` if it was dropped.
    pub fn record(&self, entry: AuditLogEntry) -> bool {
        match self.tx.try_send(entry) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(entry)) => {
                warn!(path = %entry.path, "Audit queue full; entry dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                warn!(path = %entry.path, "Audit worker stopped; entry dropped");
                false
            }
        }
    }
}

/// Consumer side; owns the store writes.
pub struct AuditWorker {
    rx: mpsc::Receiver<AuditLogEntry>,
    store: Arc<CredentialStore>,
}

impl AuditWorker {
    /// Persist entries until cancelled, then drain the queue.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(worker.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Audit worker starting");
        loop {
            tokio::select! {
                entry = self.rx.recv() => match entry {
                    Some(entry) => self.persist(&entry),
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Ok(entry) = self.rx.try_recv() {
            self.persist(&entry);
            drained += 1;
        }
        info!(drained, "Audit worker shutting down");
    }

    fn persist(&self, entry: &AuditLogEntry) {
        match self.store.append_audit_entry(entry) {
            Ok(seq) => debug!(seq, path = %entry.path, status = entry.status, "Audit entry written"),
            Err(e) => warn!(error = %e, path = %entry.path, "Audit write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;
    use std::time::Duration;

    #[tokio::test]
    async fn entries_are_persisted_and_drained_on_shutdown() {
        let (store, _dir) = temp_store();
        let store = Arc::new(store);
        let (logger, worker) = AuditLogger::channel(store.clone());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        for i in 0..5u16 {
            assert!(logger.record(AuditLogEntry::new("GET", "/v1/auth/me", 200 + i)));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let entries = store.list_audit_entries(10, None).unwrap();
        assert_eq!(entries.len(), 5);
        // Newest first
        assert_eq!(entries[0].status, 204);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (store, _dir) = temp_store();
        let (logger, _worker) = AuditLogger::with_capacity(Arc::new(store), 1);
        assert!(logger.record(AuditLogEntry::new("GET", "/a", 200)));
        assert!(!logger.record(AuditLogEntry::new("GET", "/b", 200)));
    }

    #[tokio::test]
    async fn stopped_worker_drops_entries() {
        let (store, _dir) = temp_store();
        let (logger, worker) = AuditLogger::channel(Arc::new(store));
        drop(worker);
        assert!(!logger.record(AuditLogEntry::new("GET", "/a", 200)));
    }
}
