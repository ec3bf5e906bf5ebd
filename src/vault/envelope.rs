// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `iv:ciphertext` envelope format and the primitives behind it.
//!
//! ## Key Derivation
//!
//! ```text
//! key = scrypt(sha256(master_key || password_hash), KDF_SALT, N=2^14, r=8, p=1, len=32)
//! ```
//!
//! The envelope carries no salt, so the scrypt salt is fixed for the
//! deployment. Both inputs of the pre-hash are required to reproduce the key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use k256::elliptic_curve::rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use super::VaultError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block / IV size in bytes.
pub const IV_LEN: usize = 16;

/// AES-256 key size in bytes.
pub const KEY_LEN: usize = 32;

const KDF_SALT: &[u8] = b"relational-escrow/key-vault/v1";
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// A parsed `iv:ciphertext` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Strictly parse the `iv_hex:ciphertext_hex` wire form.
    ///
    /// Only structural checks happen here; whether the ciphertext is a whole
    /// number of blocks is checked by [`open`].
    pub fn parse(encoded: &str) -> Result<Self, VaultError> {
        let (iv_hex, ct_hex) = encoded
            .split_once(':')
            .ok_or_else(|| VaultError::Validation("expected `iv:ciphertext`".to_string()))?;

        if ct_hex.contains(':') {
            return Err(VaultError::Validation(
                "expected exactly one `:` separator".to_string(),
            ));
        }
        if iv_hex.len() != IV_LEN * 2 {
            return Err(VaultError::Validation(format!(
                "IV must be {} hex characters, got {}",
                IV_LEN * 2,
                iv_hex.len()
            )));
        }
        if ct_hex.is_empty() {
            return Err(VaultError::Validation("ciphertext is empty".to_string()));
        }

        let mut iv = [0u8; IV_LEN];
        alloy::hex::decode_to_slice(iv_hex, &mut iv)
            .map_err(|e| VaultError::Validation(format!("IV is not valid hex: {e}")))?;
        let ciphertext = alloy::hex::decode(ct_hex)
            .map_err(|e| VaultError::Validation(format!("ciphertext is not valid hex: {e}")))?;

        Ok(Self { iv, ciphertext })
    }

    /// Render the envelope as `iv_hex:ciphertext_hex` (lowercase, no `0x`).
    pub fn encode(&self) -> String {
        format!(
            "{}:{}",
            alloy::hex::encode(self.iv),
            alloy::hex::encode(&self.ciphertext)
        )
    }
}

/// Derive the symmetric key from the master key and a user's password hash.
pub fn derive_key(
    master_key: &str,
    password_hash: &str,
) -> Result<Zeroizing<[u8; KEY_LEN]>, VaultError> {
    let mut hasher = Sha256::new();
    hasher.update(master_key.as_bytes());
    hasher.update(password_hash.as_bytes());
    let mut pre_key: [u8; 32] = hasher.finalize().into();

    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    let result = scrypt::scrypt(&pre_key, KDF_SALT, &params, key.as_mut_slice());
    pre_key.zeroize();
    result.map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    Ok(key)
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Envelope, VaultError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(Envelope { iv, ciphertext })
}

/// Decrypt an envelope. Padding failures surface as [`VaultError::KeyMismatch`].
pub fn open(key: &[u8; KEY_LEN], envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if envelope.ciphertext.len() % IV_LEN != 0 {
        return Err(VaultError::Decryption(format!(
            "ciphertext length {} is not a multiple of the {}-byte block size",
            envelope.ciphertext.len(),
            IV_LEN
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(key, &envelope.iv)
        .map_err(|e| VaultError::Decryption(e.to_string()))?;

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&envelope.ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::KeyMismatch)
}
