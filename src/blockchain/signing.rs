// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial credential -> transaction signer.
//!
//! The decrypted key only lives inside this module for the duration of the
//! conversion; the returned signer owns a copy that zeroizes on drop.

use alloy::signers::local::PrivateKeySigner;

use super::types::ChainError;
use crate::vault::{KeyVault, VaultError, WalletCredential};

/// Errors from turning a stored credential into a signer.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("decrypted key does not control {expected}")]
    AddressMismatch { expected: String },
}

/// Create a signer from a hex private key (with or without `0x`).
///
/// # Returns
/// A `PrivateKeySigner` that can be used to sign transactions.
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, ChainError> {
    let key_bytes = zeroize::Zeroizing::new(
        alloy::hex::decode(private_key_hex)
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?,
    );

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))
}

/// Decrypt a custodial credential and build its signer.
///
/// The signer's address must match the address recorded on the credential,
/// which catches envelopes swapped between user records.
///
/// # Arguments
/// * `vault` - Key vault holding the master key
/// * `credential` - Stored wallet credential
/// * `password_hash` - The user's password hash (second factor)
pub fn signer_for(
    vault: &KeyVault,
    credential: &WalletCredential,
    password_hash: &str,
) -> Result<PrivateKeySigner, SigningError> {
    let private_key = vault.decrypt(&credential.encrypted_key, password_hash)?;
    let signer = signer_from_hex(&private_key)?;

    if !signer
        .address()
        .to_string()
        .eq_ignore_ascii_case(&credential.address)
    {
        return Err(SigningError::AddressMismatch {
            expected: credential.address.clone(),
        });
    }

    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANVIL_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ANVIL_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn test_signer_from_hex() {
        let plain = signer_from_hex(ANVIL_KEY).unwrap();
        let prefixed = signer_from_hex(&format!("0x{ANVIL_KEY}")).unwrap();
        assert_eq!(plain.address(), prefixed.address());
        assert!(plain.address().to_string().eq_ignore_ascii_case(ANVIL_ADDRESS));
    }

    #[test]
    fn test_signer_from_hex_rejects_garbage() {
        assert!(signer_from_hex("zz").is_err());
        assert!(signer_from_hex("00").is_err());
    }

    #[test]
    fn test_signer_for_vault_wallet() {
        let vault = KeyVault::new("master").unwrap();
        let credential = vault.create_wallet("pw").unwrap();
        let signer = signer_for(&vault, &credential, "pw").unwrap();
        assert!(signer
            .address()
            .to_string()
            .eq_ignore_ascii_case(&credential.address));
    }

    #[test]
    fn test_signer_for_detects_swapped_envelope() {
        let vault = KeyVault::new("master").unwrap();
        let credential = WalletCredential {
            address: "0x0000000000000000000000000000000000000001".to_string(),
            encrypted_key: vault.encrypt(&format!("0x{ANVIL_KEY}"), "pw").unwrap(),
        };
        assert!(matches!(
            signer_for(&vault, &credential, "pw"),
            Err(SigningError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_signer_for_wrong_password() {
        let vault = KeyVault::new("master").unwrap();
        let credential = vault.create_wallet("pw").unwrap();
        assert!(matches!(
            signer_for(&vault, &credential, "nope"),
            Err(SigningError::Vault(VaultError::KeyMismatch))
        ));
    }
}
