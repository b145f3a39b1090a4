// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Salted, memory-hard password hashing.
//!
//! Stored format: `scrypt:<salt hex>:<digest hex>`.

use super::random_bytes;

const SCHEME: &str = "scrypt";

/// log2(N) = 14, r = 8, p = 1: 16 MiB per hash.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 64;

/// Default minimum length for newly set passwords.
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password must be at least {min} characters")]
    TooShort { min: usize },

    #[error("password hashing failed")]
    Hashing,
}

/// Policy applied when a password is set (never at verify time).
#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_PASSWORD_LENGTH,
        }
    }
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> Result<(), PasswordError> {
        if password.chars().count() < self.min_length {
            return Err(PasswordError::TooShort {
                min: self.min_length,
            });
        }
        Ok(())
    }
}

fn derive(password: &str, salt: &[u8], out: &mut [u8]) -> Result<(), PasswordError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, out.len())
        .map_err(|_| PasswordError::Hashing)?;
    scrypt::scrypt(password.as_bytes(), salt, &params, out).map_err(|_| PasswordError::Hashing)
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = random_bytes(SALT_LEN);
    let mut digest = [0u8; DIGEST_LEN];
    derive(password, &salt, &mut digest)?;
    Ok(format!(
        "{SCHEME}:{}:{}",
        hex::encode(&salt),
        hex::encode(digest)
    ))
}

/// Verify a password against a stored hash.
///
/// Any malformed stored value verifies as `false`.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split(':');
    let (Some(SCHEME), Some(salt_hex), Some(digest_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };
    if salt.is_empty() || !(16..=128).contains(&expected.len()) {
        return false;
    }

    let mut actual = vec![0u8; expected.len()];
    if derive(password, &salt, &mut actual).is_err() {
        return false;
    }
    ring::constant_time::verify_slices_are_equal(&actual, &expected).is_ok()
}
