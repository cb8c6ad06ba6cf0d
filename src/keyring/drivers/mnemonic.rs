//! Mnemonic (BIP-39 + BIP-44) key-ring driver

use crate::chain::ChainInfo;
use crate::crypto::{Bip44Path, DigestMethod, ExtendedKey, Secp256k1KeyPair, Signature};
use crate::errors::{Result, WalletError};
use crate::keyring::drivers::{require_decrypted, KeyRingDriver};
use crate::keyring::{fields, vault_bip44_path, KeyRingType};
use crate::security::SecureBytes;
use crate::vault::Vault;
use serde_json::{json, Map, Value};
use zeroize::Zeroizing;

pub struct MnemonicDriver;

impl MnemonicDriver {
    /// Build the vault payload for a mnemonic key-ring. The normalized
    /// phrase becomes the sensitive blob; the path and name stay readable.
    pub fn create_key_ring_vault(
        mnemonic: &str,
        bip44_path: Bip44Path,
        name: &str,
    ) -> Result<(Map<String, Value>, Vec<u8>)> {
        bip44_path.validate()?;

        let parsed = bip39::Mnemonic::parse_normalized(mnemonic.trim())
            .map_err(|e| WalletError::InvalidKeyFormat(format!("Invalid mnemonic: {}", e)))?;

        let mut insensitive = Map::new();
        insensitive.insert(fields::TYPE.to_string(), json!(KeyRingType::Mnemonic));
        insensitive.insert(fields::NAME.to_string(), json!(name));
        insensitive.insert(
            fields::BIP44_PATH.to_string(),
            serde_json::to_value(bip44_path)?,
        );

        Ok((insensitive, parsed.to_string().into_bytes()))
    }

    fn derive(
        vault: &Vault,
        decrypted: &SecureBytes,
        coin_type: u32,
    ) -> Result<ExtendedKey> {
        let phrase = std::str::from_utf8(decrypted.expose())
            .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?;
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
            .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));

        let path = vault_bip44_path(vault)?;
        ExtendedKey::from_seed(seed.as_ref())?.derive_bip44(coin_type, &path)
    }
}

impl KeyRingDriver for MnemonicDriver {
    fn key_ring_type(&self) -> KeyRingType {
        KeyRingType::Mnemonic
    }

    fn get_pub_key(
        &self,
        vault: &Vault,
        decrypted: Option<&SecureBytes>,
        coin_type: u32,
        _chain: &ChainInfo,
    ) -> Result<[u8; 33]> {
        let decrypted = require_decrypted(decrypted)?;
        Ok(Self::derive(vault, decrypted, coin_type)?.public_key_compressed())
    }

    fn sign(
        &self,
        vault: &Vault,
        decrypted: Option<&SecureBytes>,
        coin_type: u32,
        message: &[u8],
        digest_method: DigestMethod,
        _chain: &ChainInfo,
    ) -> Result<Signature> {
        let decrypted = require_decrypted(decrypted)?;
        let key = Self::derive(vault, decrypted, coin_type)?;
        let keypair = Secp256k1KeyPair::from_bytes(key.secret_bytes().as_ref())?;
        keypair.sign_digest(&digest_method.hash(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::CipherBlob;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn test_chain() -> ChainInfo {
        ChainInfo {
            chain_id: "testing-1".to_string(),
            chain_name: "Testing".to_string(),
            bip44: crate::chain::Bip44 { coin_type: 118 },
            alternative_bip44s: vec![],
            bech32_prefix: "test".to_string(),
            evm: false,
        }
    }

    fn test_vault(insensitive: Map<String, Value>) -> Vault {
        Vault {
            kind: "keyRing".to_string(),
            id: "test".to_string(),
            insensitive,
            sensitive: CipherBlob {
                nonce: String::new(),
                ciphertext: String::new(),
            },
        }
    }

    #[test]
    fn test_create_rejects_bad_mnemonic() {
        let result =
            MnemonicDriver::create_key_ring_vault("not a mnemonic", Bip44Path::default(), "a");
        assert!(matches!(result, Err(WalletError::InvalidKeyFormat(_))));
    }

    #[test]
    fn test_create_rejects_bad_path() {
        let result = MnemonicDriver::create_key_ring_vault(
            TEST_MNEMONIC,
            Bip44Path::new(0, 5, 0),
            "a",
        );
        assert!(matches!(result, Err(WalletError::InvalidPath(_))));
    }

    #[test]
    fn test_pub_key_and_sign() {
        let (insensitive, sensitive) =
            MnemonicDriver::create_key_ring_vault(TEST_MNEMONIC, Bip44Path::default(), "a")
                .unwrap();
        let vault = test_vault(insensitive);
        let decrypted = SecureBytes::new(sensitive);
        let chain = test_chain();

        let driver = MnemonicDriver;
        let pub_key = driver
            .get_pub_key(&vault, Some(&decrypted), 118, &chain)
            .unwrap();
        assert!(pub_key[0] == 0x02 || pub_key[0] == 0x03);

        // Different coin types give different keys
        let other = driver
            .get_pub_key(&vault, Some(&decrypted), 60, &chain)
            .unwrap();
        assert_ne!(pub_key, other);

        let sig = driver
            .sign(
                &vault,
                Some(&decrypted),
                118,
                b"message",
                DigestMethod::Sha256,
                &chain,
            )
            .unwrap();
        assert_eq!(sig.r.len(), 32);

        // No decrypted material means the store is locked
        assert!(matches!(
            driver.get_pub_key(&vault, None, 118, &chain),
            Err(WalletError::Locked)
        ));
    }
}
