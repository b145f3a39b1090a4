// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Integration secrets kept in the settings table, encrypted at rest.
//!
//! Rows live under `secret:<name>` and hold a cipher envelope. A row that
//! does not parse as an envelope predates encryption and is re-encrypted in
//! place by [`CredentialStore::migrate_plaintext_secrets`] at startup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{get_json_in, put_json, CredentialStore, StoreError, StoredTable};
use crate::crypto::cipher::{is_envelope, CipherError, SecretCipher};

const SECRET_PREFIX: &str = "secret:";

/// Secrets the service holds for its integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecretKey {
    SmtpPassword,
    OpenaiApiKey,
    ZoomClientSecret,
    BigmarkerApiKey,
}

impl SecretKey {
    pub const ALL: [SecretKey; 4] = [
        SecretKey::SmtpPassword,
        SecretKey::OpenaiApiKey,
        SecretKey::ZoomClientSecret,
        SecretKey::BigmarkerApiKey,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SecretKey::SmtpPassword => "smtp_password",
            SecretKey::OpenaiApiKey => "openai_api_key",
            SecretKey::ZoomClientSecret => "zoom_client_secret",
            SecretKey::BigmarkerApiKey => "bigmarker_api_key",
        }
    }

    fn settings_key(self) -> String {
        format!("{SECRET_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecretKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

impl CredentialStore {
    pub fn put_secret(
        &self,
        cipher: &SecretCipher,
        key: SecretKey,
        plaintext: &str,
    ) -> Result<(), SecretError> {
        let envelope = cipher.encrypt(plaintext)?;
        self.put_setting(&key.settings_key(), &envelope)?;
        Ok(())
    }

    /// Decrypt a secret. A tampered or foreign-key envelope is an error, never garbage.
    pub fn get_secret(
        &self,
        cipher: &SecretCipher,
        key: SecretKey,
    ) -> Result<Option<String>, SecretError> {
        let Some(envelope) = self.get_setting::<String>(&key.settings_key())? else {
            return Ok(None);
        };
        Ok(Some(cipher.decrypt(&envelope)?))
    }

    pub fn delete_secret(&self, key: SecretKey) -> Result<bool, SecretError> {
        Ok(self.delete_setting(&key.settings_key())?)
    }

    /// Keys that currently hold a value. Values are never listed.
    pub fn list_secret_keys(&self) -> Result<Vec<SecretKey>, SecretError> {
        let mut keys = Vec::new();
        for key in SecretKey::ALL {
            if self.get_setting::<String>(&key.settings_key())?.is_some() {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Re-encrypt every secret still stored as plaintext. Returns how many were migrated.
    pub fn migrate_plaintext_secrets(&self, cipher: &SecretCipher) -> Result<usize, SecretError> {
        let write_txn = self.db.begin_write().map_err(StoreError::from)?;
        let mut migrated = 0;
        for key in SecretKey::ALL {
            let settings_key = key.settings_key();
            let Some(value) = get_json_in::<String>(&write_txn, StoredTable::Settings, &settings_key)?
            else {
                continue;
            };
            if is_envelope(&value) {
                continue;
            }
            let envelope = cipher.encrypt(&value)?;
            put_json(&write_txn, StoredTable::Settings, &settings_key, &envelope)?;
            tracing::info!(secret = %key, "Re-encrypted legacy plaintext secret");
            migrated += 1;
        }
        write_txn.commit().map_err(StoreError::from)?;
        Ok(migrated)
    }
}
