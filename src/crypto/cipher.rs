// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated encryption for secrets persisted at rest.
//!
//! ## Envelope Format
//!
//! ```text
//! <nonce hex (24)>:<auth tag hex (32)>:<ciphertext hex>
//! ```
//!
//! A fresh 96-bit nonce is drawn for every call. Values that do not parse as
//! an envelope are treated as legacy plaintext by the settings migration.

use std::fmt;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

use super::random_bytes;

/// AES-256-GCM tag length in bytes.
const TAG_LEN: usize = 16;

/// Key length in bytes (256 bits).
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption key is required in production")]
    MissingKey,

    #[error("encryption key must be 64 hex characters (256 bits)")]
    InvalidKey,

    #[error("value is not a cipher envelope")]
    MalformedEnvelope,

    #[error("envelope failed authentication")]
    Decryption,

    #[error("encryption failed")]
    Encryption,
}

/// Symmetric cipher for API keys, SMTP credentials and other stored secrets.
pub struct SecretCipher {
    key: LessSafeKey,
    ephemeral: bool,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher")
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Build a cipher from a 64-character hex key.
    pub fn from_hex(key_hex: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|_| CipherError::InvalidKey)?;
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKey);
        }
        Self::from_bytes(&bytes, false)
    }

    /// Generate a throwaway key. Secrets encrypted with it do not survive a restart.
    pub fn ephemeral() -> Result<Self, CipherError> {
        Self::from_bytes(&random_bytes(KEY_LEN), true)
    }

    /// Resolve the cipher for the configured posture.
    ///
    /// Production refuses to start without a valid key; development falls
    /// back to an ephemeral key with a warning.
    pub fn from_config(key_hex: Option<&str>, production: bool) -> Result<Self, CipherError> {
        match key_hex.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Self::from_hex(key),
            None if production => Err(CipherError::MissingKey),
            None => {
                tracing::warn!(
                    "ENCRYPTION_KEY not set; using an ephemeral key. Encrypted secrets will not survive a restart"
                );
                Self::ephemeral()
            }
        }
    }

    fn from_bytes(bytes: &[u8], ephemeral: bool) -> Result<Self, CipherError> {
        let unbound = UnboundKey::new(&AES_256_GCM, bytes).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            ephemeral,
        })
    }

    /// Whether the key was generated for this process only.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Encrypt a secret into a self-describing envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce_bytes = random_bytes(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes)
            .map_err(|_| CipherError::Encryption)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Encryption)?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(&nonce_bytes),
            hex::encode(tag.as_ref()),
            hex::encode(&in_out)
        ))
    }

    /// Decrypt an envelope. Malformed or tampered input fails closed.
    pub fn decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let parts = parse_envelope(envelope).ok_or(CipherError::MalformedEnvelope)?;
        let nonce = Nonce::try_assume_unique_for_key(&parts.nonce)
            .map_err(|_| CipherError::MalformedEnvelope)?;

        let mut in_out = parts.ciphertext;
        in_out.extend_from_slice(&parts.tag);

        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Decryption)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::Decryption)
    }
}

struct EnvelopeParts {
    nonce: Vec<u8>,
    tag: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn parse_envelope(envelope: &str) -> Option<EnvelopeParts> {
    let mut segments = envelope.trim().split(':');
    let nonce = hex::decode(segments.next()?).ok()?;
    let tag = hex::decode(segments.next()?).ok()?;
    let ciphertext = hex::decode(segments.next()?).ok()?;
    if segments.next().is_some() || nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return None;
    }
    Some(EnvelopeParts {
        nonce,
        tag,
        ciphertext,
    })
}

/// Whether a stored value has the shape of a cipher envelope.
pub fn is_envelope(value: &str) -> bool {
    parse_envelope(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn cipher() -> SecretCipher {
        SecretCipher::from_hex(KEY).unwrap()
    }

    fn flip_hex_char(s: &str, index: usize) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        chars[index] = if chars[index] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        let envelope = c.encrypt("smtp-password").unwrap();
        assert!(is_envelope(&envelope));
        assert_eq!(c.decrypt(&envelope).unwrap(), "smtp-password");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let c = cipher();
        let envelope = c.encrypt("").unwrap();
        assert_eq!(c.decrypt(&envelope).unwrap(), "");
    }

    #[test]
    fn nonces_differ_per_call() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    #[test]
    fn tampered_tag_fails() {
        let c = cipher();
        let envelope = c.encrypt("secret").unwrap();
        // nonce (24) + ':' puts the tag at index 25
        let tampered = flip_hex_char(&envelope, 26);
        assert_eq!(c.decrypt(&tampered), Err(CipherError::Decryption));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let c = cipher();
        let envelope = c.encrypt("secret").unwrap();
        let last = envelope.len() - 1;
        let tampered = flip_hex_char(&envelope, last);
        assert_eq!(c.decrypt(&tampered), Err(CipherError::Decryption));
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = cipher().encrypt("secret").unwrap();
        let other = SecretCipher::ephemeral().unwrap();
        assert_eq!(other.decrypt(&envelope), Err(CipherError::Decryption));
    }

    #[test]
    fn plaintext_is_not_an_envelope() {
        assert!(!is_envelope("sk-live-plaintext"));
        assert!(!is_envelope("aa:bb:cc"));
        assert_eq!(
            cipher().decrypt("sk-live-plaintext"),
            Err(CipherError::MalformedEnvelope)
        );
    }

    #[test]
    fn key_validation() {
        assert_eq!(
            SecretCipher::from_hex("abcd").unwrap_err(),
            CipherError::InvalidKey
        );
        assert_eq!(
            SecretCipher::from_hex("zz").unwrap_err(),
            CipherError::InvalidKey
        );
        assert_eq!(
            SecretCipher::from_config(None, true).unwrap_err(),
            CipherError::MissingKey
        );
        let dev = SecretCipher::from_config(None, false).unwrap();
        assert!(dev.is_ephemeral());
        assert!(!SecretCipher::from_config(Some(KEY), true)
            .unwrap()
            .is_ephemeral());
    }
}
