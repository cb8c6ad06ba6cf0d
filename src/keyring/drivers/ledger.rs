//! Ledger (hardware, public-key-only) key-ring driver
//!
//! The vault stores compressed public keys keyed by the device app that
//! produced them. Signing happens on the device in UI-driven flows, never
//! here.

use crate::chain::ChainInfo;
use crate::crypto::{validate_compressed_pubkey, Bip44Path, DigestMethod, Signature};
use crate::errors::{Result, WalletError};
use crate::keyring::drivers::KeyRingDriver;
use crate::keyring::{fields, KeyRingType};
use crate::security::SecureBytes;
use crate::vault::Vault;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Device app name for a coin type.
pub fn app_for_coin_type(coin_type: u32) -> &'static str {
    if coin_type == 60 {
        "Ethereum"
    } else {
        "Cosmos"
    }
}

pub struct LedgerDriver;

impl LedgerDriver {
    /// Build the vault payload. Every supplied public key blob must decode
    /// to a valid compressed secp256k1 point.
    pub fn create_key_ring_vault(
        pub_keys: &BTreeMap<String, Vec<u8>>,
        bip44_path: Bip44Path,
        name: &str,
    ) -> Result<(Map<String, Value>, Vec<u8>)> {
        bip44_path.validate()?;
        if pub_keys.is_empty() {
            return Err(WalletError::InvalidKeyFormat(
                "At least one device public key is required".to_string(),
            ));
        }

        let mut stored = Map::new();
        for (app, blob) in pub_keys {
            let point = validate_compressed_pubkey(blob)?;
            stored.insert(app.clone(), json!(hex::encode(point)));
        }

        let mut insensitive = Map::new();
        insensitive.insert(fields::TYPE.to_string(), json!(KeyRingType::Ledger));
        insensitive.insert(fields::NAME.to_string(), json!(name));
        insensitive.insert(
            fields::BIP44_PATH.to_string(),
            serde_json::to_value(bip44_path)?,
        );
        insensitive.insert(fields::PUB_KEYS.to_string(), Value::Object(stored));

        // No secret material; the sensitive blob is an empty payload
        Ok((insensitive, Vec::new()))
    }
}

impl KeyRingDriver for LedgerDriver {
    fn key_ring_type(&self) -> KeyRingType {
        KeyRingType::Ledger
    }

    fn get_pub_key(
        &self,
        vault: &Vault,
        _decrypted: Option<&SecureBytes>,
        coin_type: u32,
        _chain: &ChainInfo,
    ) -> Result<[u8; 33]> {
        let app = app_for_coin_type(coin_type);
        let pub_key_hex = vault
            .insensitive
            .get(fields::PUB_KEYS)
            .and_then(|v| v.as_object())
            .and_then(|m| m.get(app))
            .and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::PubKeyNotFound(app.to_string()))?;

        validate_compressed_pubkey(&hex::decode(pub_key_hex)?)
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
            KeyRingType::Ledger.as_str().to_string(),
        ))
    }
}
