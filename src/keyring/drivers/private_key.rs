//! Raw private-key key-ring driver

use crate::chain::ChainInfo;
use crate::crypto::{DigestMethod, Secp256k1KeyPair, Signature};
use crate::errors::Result;
use crate::keyring::drivers::{require_decrypted, KeyRingDriver};
use crate::keyring::{fields, KeyRingType};
use crate::security::SecureBytes;
use crate::vault::Vault;
use serde_json::{json, Map, Value};

pub struct PrivateKeyDriver;

impl PrivateKeyDriver {
    /// Build the vault payload from a raw 32-byte secret (hex accepted with
    /// or without a 0x prefix).
    pub fn create_key_ring_vault(
        private_key_hex: &str,
        name: &str,
    ) -> Result<(Map<String, Value>, Vec<u8>)> {
        let stripped = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or_else(|| private_key_hex.trim());
        let bytes = hex::decode(stripped)?;

        // Fails on wrong length or out-of-range scalar
        Secp256k1KeyPair::from_bytes(&bytes)?;

        let mut insensitive = Map::new();
        insensitive.insert(fields::TYPE.to_string(), json!(KeyRingType::PrivateKey));
        insensitive.insert(fields::NAME.to_string(), json!(name));

        Ok((insensitive, bytes))
    }
}

impl KeyRingDriver for PrivateKeyDriver {
    fn key_ring_type(&self) -> KeyRingType {
        KeyRingType::PrivateKey
    }

    fn get_pub_key(
        &self,
        _vault: &Vault,
        decrypted: Option<&SecureBytes>,
        _coin_type: u32,
        _chain: &ChainInfo,
    ) -> Result<[u8; 33]> {
        let decrypted = require_decrypted(decrypted)?;
        let keypair = Secp256k1KeyPair::from_bytes(decrypted.expose())?;
        Ok(keypair.public_key_compressed())
    }

    fn sign(
        &self,
        _vault: &Vault,
        decrypted: Option<&SecureBytes>,
        _coin_type: u32,
        message: &[u8],
        digest_method: DigestMethod,
        _chain: &ChainInfo,
    ) -> Result<Signature> {
        let decrypted = require_decrypted(decrypted)?;
        let keypair = Secp256k1KeyPair::from_bytes(decrypted.expose())?;
        keypair.sign_digest(&digest_method.hash(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Bip44;
    use crate::vault::CipherBlob;

    fn test_chain() -> ChainInfo {
        ChainInfo {
            chain_id: "evm-1".to_string(),
            chain_name: "Evm".to_string(),
            bip44: Bip44 { coin_type: 60 },
            alternative_bip44s: vec![],
            bech32_prefix: "evm".to_string(),
            evm: true,
        }
    }

    #[test]
    fn test_create_accepts_prefixed_hex() {
        let key_hex = "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let (insensitive, sensitive) =
            PrivateKeyDriver::create_key_ring_vault(key_hex, "imported").unwrap();
        assert_eq!(sensitive.len(), 32);
        assert_eq!(
            insensitive.get(fields::TYPE),
            Some(&json!(KeyRingType::PrivateKey))
        );
    }

    #[test]
    fn test_create_rejects_garbage() {
        assert!(PrivateKeyDriver::create_key_ring_vault("zz", "a").is_err());
        assert!(PrivateKeyDriver::create_key_ring_vault("0011", "a").is_err());
    }

    #[test]
    fn test_pub_key_ignores_coin_type() {
        let key_hex = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let (insensitive, sensitive) =
            PrivateKeyDriver::create_key_ring_vault(key_hex, "a").unwrap();
        let vault = Vault {
            kind: "keyRing".to_string(),
            id: "x".to_string(),
            insensitive,
            sensitive: CipherBlob {
                nonce: String::new(),
                ciphertext: String::new(),
            },
        };
        let decrypted = SecureBytes::new(sensitive);
        let chain = test_chain();

        let driver = PrivateKeyDriver;
        let a = driver.get_pub_key(&vault, Some(&decrypted), 60, &chain).unwrap();
        let b = driver.get_pub_key(&vault, Some(&decrypted), 118, &chain).unwrap();
        assert_eq!(a, b);
    }
}
