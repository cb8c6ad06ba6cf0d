//! Keystone (QR-based multi-account hardware) key-ring driver
//!
//! A keystone import carries several derived accounts at once, each with
//! its own BIP-44 path and public key. Like ledger, it is public-key-only.

use crate::chain::ChainInfo;
use crate::crypto::{validate_compressed_pubkey, Bip44Path, DigestMethod, Signature};
use crate::errors::{Result, WalletError};
use crate::keyring::drivers::KeyRingDriver;
use crate::keyring::{fields, KeyRingType};
use crate::security::SecureBytes;
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One derived account read off the device QR payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoneAccount {
    #[serde(rename = "coinType")]
    pub coin_type: u32,
    pub path: Bip44Path,
    /// Compressed secp256k1 public key (hex)
    #[serde(rename = "pubKey")]
    pub pub_key: String,
}

pub struct KeystoneDriver;

impl KeystoneDriver {
    pub fn create_key_ring_vault(
        accounts: &[KeystoneAccount],
        name: &str,
    ) -> Result<(Map<String, Value>, Vec<u8>)> {
        if accounts.is_empty() {
            return Err(WalletError::InvalidKeyFormat(
                "At least one account is required".to_string(),
            ));
        }
        for account in accounts {
            account.path.validate()?;
            validate_compressed_pubkey(&hex::decode(&account.pub_key)?)?;
        }

        let mut insensitive = Map::new();
        insensitive.insert(fields::TYPE.to_string(), json!(KeyRingType::Keystone));
        insensitive.insert(fields::NAME.to_string(), json!(name));
        insensitive.insert(fields::ACCOUNTS.to_string(), serde_json::to_value(accounts)?);

        Ok((insensitive, Vec::new()))
    }

    fn accounts(vault: &Vault) -> Result<Vec<KeystoneAccount>> {
        let value = vault
            .insensitive
            .get(fields::ACCOUNTS)
            .ok_or_else(|| WalletError::InternalError("keystone vault missing accounts".to_string()))?;
        serde_json::from_value(value.clone()).map_err(Into::into)
    }
}

impl KeyRingDriver for KeystoneDriver {
    fn key_ring_type(&self) -> KeyRingType {
        KeyRingType::Keystone
    }

    fn get_pub_key(
        &self,
        vault: &Vault,
        _decrypted: Option<&SecureBytes>,
        coin_type: u32,
        _chain: &ChainInfo,
    ) -> Result<[u8; 33]> {
        let accounts = Self::accounts(vault)?;
        let account = accounts
            .iter()
            .find(|a| a.coin_type == coin_type)
            .ok_or_else(|| WalletError::PubKeyNotFound(format!("coin type {}", coin_type)))?;

        validate_compressed_pubkey(&hex::decode(&account.pub_key)?)
    }

    fn sign(
        &self,
        _vault: &Vault,
        _decrypted: Option<&SecureBytes>,
        _coin_type: u32,
        _message: &[u8],
        _digest_method: DigestMethod,
        _chain: &ChainInfo,
    ) -> Result<Signature> {
        Err(WalletError::SigningNotSupported(
            KeyRingType::Keystone.as_str().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Bip44;
    use crate::crypto::Secp256k1KeyPair;
    use crate::vault::CipherBlob;

    fn sample_account(coin_type: u32) -> KeystoneAccount {
        let pub_key = Secp256k1KeyPair::from_bytes(&[coin_type as u8 + 1; 32])
            .unwrap()
            .public_key_compressed();
        KeystoneAccount {
            coin_type,
            path: Bip44Path::default(),
            pub_key: hex::encode(pub_key),
        }
    }

    fn test_chain() -> ChainInfo {
        ChainInfo {
            chain_id: "testing-1".to_string(),
            chain_name: "Testing".to_string(),
            bip44: Bip44 { coin_type: 118 },
            alternative_bip44s: vec![],
            bech32_prefix: "test".to_string(),
            evm: false,
        }
    }

    #[test]
    fn test_multi_account_lookup() {
        let accounts = vec![sample_account(118), sample_account(60)];
        let (insensitive, _) = KeystoneDriver::create_key_ring_vault(&accounts, "qr").unwrap();
        let vault = Vault {
            kind: "keyRing".to_string(),
            id: "x".to_string(),
            insensitive,
            sensitive: CipherBlob {
                nonce: String::new(),
                ciphertext: String::new(),
            },
        };
        let chain = test_chain();
        let driver = KeystoneDriver;

        let cosmos = driver.get_pub_key(&vault, None, 118, &chain).unwrap();
        let evm = driver.get_pub_key(&vault, None, 60, &chain).unwrap();
        assert_ne!(cosmos, evm);

        assert!(matches!(
            driver.get_pub_key(&vault, None, 529, &chain),
            Err(WalletError::PubKeyNotFound(_))
        ));
    }

    #[test]
    fn test_create_rejects_empty_and_invalid() {
        assert!(KeystoneDriver::create_key_ring_vault(&[], "qr").is_err());

        let bad = KeystoneAccount {
            coin_type: 118,
            path: Bip44Path::default(),
            pub_key: hex::encode([0u8; 33]),
        };
        assert!(matches!(
            KeystoneDriver::create_key_ring_vault(&[bad], "qr"),
            Err(WalletError::InvalidKeyFormat(_))
        ));
    }
}
