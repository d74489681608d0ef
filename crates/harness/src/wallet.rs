//! Name-addressed wallets.

use alloy_core::primitives::{Address, B256, keccak256};
use anyhow::{Context, Result};
use k256::ecdsa::SigningKey;

/// A wallet known to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub name: String,
    pub address: Address,
    /// Absent for signers whose key lives with the endpoint.
    pub private_key: Option<B256>,
}

impl Wallet {
    /// Derive a wallet whose private key is `keccak256(name)`.
    ///
    /// The same name always yields the same address.
    pub fn derive(name: &str) -> Result<Self> {
        let private_key = keccak256(name.as_bytes());
        Ok(Self {
            name: name.to_string(),
            address: address_of(&private_key)
                .with_context(|| format!("Failed to derive wallet '{name}'"))?,
            private_key: Some(private_key),
        })
    }

    /// A signer managed by the endpoint, known only by address.
    pub fn external(name: &str, address: Address) -> Self {
        Self {
            name: name.to_string(),
            address,
            private_key: None,
        }
    }
}

/// Ethereum address of a secp256k1 private key.
pub fn address_of(private_key: &B256) -> Result<Address> {
    let signing_key =
        SigningKey::from_slice(private_key.as_slice()).context("Invalid secp256k1 private key")?;
    let point = signing_key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    Ok(Address::from_raw_public_key(&point.as_bytes()[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_key_address() {
        // First default anvil account.
        let key: B256 = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
            .parse()
            .unwrap();
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(address_of(&key).unwrap(), expected);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = Wallet::derive("admin").unwrap();
        let b = Wallet::derive("admin").unwrap();
        let other = Wallet::derive("alice").unwrap();

        assert_eq!(a, b);
        assert_ne!(a.address, other.address);
        assert_eq!(a.private_key, Some(keccak256("admin")));
    }

    #[test]
    fn test_external_signer() {
        let wallet = Wallet::external("deployer", Address::repeat_byte(1));
        assert!(wallet.private_key.is_none());
    }
}
