// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Vault
//!
//! Custodial signing keys are stored as `iv:ciphertext` envelopes encrypted
//! under a key derived from two independent factors:
//!
//! - the process-wide master key (configuration, `KEY_VAULT_MASTER_KEY`)
//! - the user's password hash (user record)
//!
//! Losing either factor makes the stored key unrecoverable.
//!
//! ## Logging
//!
//! Nothing in this module logs plaintext keys, the master key, or password
//! hashes. Errors carry only structural descriptions.

pub mod envelope;

use std::fmt;

use alloy::primitives::keccak256;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use envelope::Envelope;

/// Errors raised by the key vault.
///
/// `Decryption` and `KeyMismatch` are kept apart so operators can tell a
/// corrupted record from a wrong password hash or rotated master key.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("key mismatch: ciphertext rejected by derived key (wrong password hash or rotated master key)")]
    KeyMismatch,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// A custodial wallet as persisted on the user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCredential {
    /// Checksum-free lowercase address (`0x` + 40 hex chars).
    pub address: String,
    /// `iv_hex:ciphertext_hex` envelope of the `0x`-prefixed private key.
    pub encrypted_key: String,
}

/// Two-factor envelope encryption for custodial private keys.
pub struct KeyVault {
    master_key: Zeroizing<String>,
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault")
            .field("master_key", &"<redacted>")
            .finish()
    }
}

impl KeyVault {
    /// Create a vault bound to the given master key.
    pub fn new(master_key: impl Into<String>) -> Result<Self, VaultError> {
        let master_key = Zeroizing::new(master_key.into());
        if master_key.is_empty() {
            return Err(VaultError::Validation("master key is empty".to_string()));
        }
        Ok(Self { master_key })
    }

    /// Generate a fresh secp256k1 keypair and seal its private key.
    ///
    /// # Returns
    /// The wallet address and the `iv:ciphertext` envelope of the private key.
    pub fn create_wallet(&self, password_hash: &str) -> Result<WalletCredential, VaultError> {
        let (private_key, address) = generate_keypair();
        let encrypted_key = self.encrypt(&private_key, password_hash)?;

        tracing::info!(address = %address, "Custodial wallet created");

        Ok(WalletCredential {
            address,
            encrypted_key,
        })
    }

    /// Seal an arbitrary private key string under the two-factor key.
    pub fn encrypt(&self, private_key: &str, password_hash: &str) -> Result<String, VaultError> {
        if private_key.is_empty() {
            return Err(VaultError::Validation("private key is empty".to_string()));
        }
        ensure_password_hash(password_hash)?;

        let key = envelope::derive_key(&self.master_key, password_hash)?;
        let sealed = envelope::seal(&key, private_key.as_bytes())?;
        Ok(sealed.encode())
    }

    /// Open an `iv:ciphertext` envelope.
    ///
    /// The format is validated before any key derivation happens. A result
    /// that does not look like `0x` + 64 hex characters is returned anyway
    /// with a warning.
    ///
    /// # Errors
    /// * [`VaultError::Validation`] - malformed envelope or empty password hash
    /// * [`VaultError::Decryption`] - ciphertext is not a whole number of blocks
    /// * [`VaultError::KeyMismatch`] - the derived key does not open the envelope
    pub fn decrypt(
        &self,
        encrypted_key: &str,
        password_hash: &str,
    ) -> Result<Zeroizing<String>, VaultError> {
        let sealed = Envelope::parse(encrypted_key)?;
        ensure_password_hash(password_hash)?;

        let key = envelope::derive_key(&self.master_key, password_hash)?;
        let mut plaintext = envelope::open(&key, &sealed)?;

        let bytes = std::mem::take(&mut *plaintext);
        let private_key = match String::from_utf8(bytes) {
            Ok(s) => Zeroizing::new(s),
            Err(e) => {
                // Valid padding over garbage: the key was wrong.
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                return Err(VaultError::KeyMismatch);
            }
        };

        if !looks_like_private_key(&private_key) {
            tracing::warn!(
                length = private_key.len(),
                "Decrypted key does not have the expected 0x + 64 hex shape"
            );
        }

        Ok(private_key)
    }

    /// Re-seal a credential under a new password hash.
    pub fn rewrap(
        &self,
        credential: &WalletCredential,
        old_password_hash: &str,
        new_password_hash: &str,
    ) -> Result<WalletCredential, VaultError> {
        let private_key = self.decrypt(&credential.encrypted_key, old_password_hash)?;
        let encrypted_key = self.encrypt(&private_key, new_password_hash)?;
        Ok(WalletCredential {
            address: credential.address.clone(),
            encrypted_key,
        })
    }
}

fn ensure_password_hash(password_hash: &str) -> Result<(), VaultError> {
    if password_hash.is_empty() {
        Err(VaultError::Validation("password hash is empty".to_string()))
    } else {
        Ok(())
    }
}

/// `0x` followed by exactly 64 hex characters.
pub fn looks_like_private_key(candidate: &str) -> bool {
    candidate
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Generate a secp256k1 keypair.
///
/// Returns `(0x-prefixed private key hex, 0x-prefixed address)`.
fn generate_keypair() -> (Zeroizing<String>, String) {
    let signing_key = SigningKey::random(&mut OsRng);

    let private_key = Zeroizing::new(format!(
        "0x{}",
        alloy::hex::encode(signing_key.to_bytes())
    ));

    // Uncompressed SEC1 point without the 0x04 tag, keccak'd; last 20 bytes.
    let point = signing_key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let address = format!("0x{}", alloy::hex::encode(&hash[12..]));

    (private_key, address)
}
