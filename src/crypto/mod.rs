// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cryptographic Primitives
//!
//! - `cipher` - AES-256-GCM envelope encryption for secrets at rest
//! - `password` - scrypt password hashing and verification
//! - token helpers (this module) - opaque bearer tokens and their digests
//!
//! Raw tokens (session cookies, magic links, OAuth state) are only ever
//! handed to the client. The store keeps the SHA-256 digest, so a leaked
//! database cannot be replayed against the API.

pub mod cipher;
pub mod password;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub use cipher::{CipherError, SecretCipher};
pub use password::{hash_password, verify_password, PasswordError, PasswordPolicy};

/// Entropy of every opaque token minted by the service.
const TOKEN_BYTES: usize = 32;

/// Mint a high-entropy opaque token (base64url, no padding).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Hex SHA-256 digest of a token; this is the only form that is persisted.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Fill `len` random bytes from the OS RNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Compare two secrets without leaking the position of the first mismatch.
///
/// Both sides are digested first so differing lengths do not short-circuit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let a = Sha256::digest(a);
    let b = Sha256::digest(b);
    ring::constant_time::verify_slices_are_equal(a.as_slice(), b.as_slice()).is_ok()
}
