//! Key-ring model and orchestration
//!
//! A key-ring is the logical account backed by a vault. Its type fixes
//! which operations are legal: only mnemonic/keystone rings finalize coin
//! types, only mnemonic/private-key rings can reveal sensitive data, and
//! hardware rings cannot sign outside interactive device flows.

pub mod drivers;
pub mod migrate;
pub mod service;

pub use service::{KeyRingService, SearchOptions};

use crate::crypto::Bip44Path;
use crate::errors::{Result, WalletError};
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Vault kind namespace used by the key-ring service.
pub const KEYRING_VAULT_KIND: &str = "keyRing";

/// Closed set of key-ring variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyRingType {
    Mnemonic,
    PrivateKey,
    Ledger,
    Keystone,
}

impl KeyRingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRingType::Mnemonic => "mnemonic",
            KeyRingType::PrivateKey => "private-key",
            KeyRingType::Ledger => "ledger",
            KeyRingType::Keystone => "keystone",
        }
    }

    /// Only mnemonic and keystone rings carry ambiguous BIP-44 coin types.
    pub fn supports_coin_type_finalize(&self) -> bool {
        matches!(self, KeyRingType::Mnemonic | KeyRingType::Keystone)
    }

    /// Only rings whose secret material lives in the vault can reveal it.
    pub fn supports_sensitive_export(&self) -> bool {
        matches!(self, KeyRingType::Mnemonic | KeyRingType::PrivateKey)
    }
}

impl std::fmt::Display for KeyRingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived store state visible to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRingStatus {
    Empty,
    Locked,
    Unlocked,
}

/// Summary of one key-ring, readable while locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_ring_type: KeyRingType,
    #[serde(rename = "isSelected")]
    pub is_selected: bool,
}

/// Insensitive metadata field names.
pub(crate) mod fields {
    pub const TYPE: &str = "type";
    pub const NAME: &str = "name";
    pub const BIP44_PATH: &str = "bip44Path";
    pub const PARENT_VAULT_ID: &str = "parentVaultId";
    pub const PUB_KEYS: &str = "pubKeys";
    pub const ACCOUNTS: &str = "accounts";
}

/// Per-chain finalization tag key: `keyRing-{chainIdentifier}-coinType`.
pub fn coin_type_tag(chain_identifier: &str) -> String {
    format!("keyRing-{}-coinType", chain_identifier)
}

pub(crate) fn vault_key_ring_type(vault: &Vault) -> Result<KeyRingType> {
    let value = vault
        .insensitive
        .get(fields::TYPE)
        .ok_or_else(|| WalletError::InternalError("vault missing key-ring type".to_string()))?;
    serde_json::from_value(value.clone()).map_err(Into::into)
}

pub(crate) fn vault_name(vault: &Vault) -> String {
    vault
        .insensitive
        .get(fields::NAME)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn vault_bip44_path(vault: &Vault) -> Result<Bip44Path> {
    let value = vault
        .insensitive
        .get(fields::BIP44_PATH)
        .ok_or_else(|| WalletError::InternalError("vault missing bip44 path".to_string()))?;
    serde_json::from_value(value.clone()).map_err(Into::into)
}

/// Events emitted after committed key-ring mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRingEvent {
    /// Active account set changed; forwarded to injected page providers.
    KeystoreChanged,
    StatusChanged(KeyRingStatus),
    SelectionChanged { vault_id: String },
}

type Observer = Box<dyn Fn(&KeyRingEvent) + Send + Sync>;

/// Plain observer list fired after each committed mutation.
#[derive(Default)]
pub struct Notifier {
    observers: RwLock<Vec<Observer>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Observer) {
        self.observers.write().unwrap().push(observer);
    }

    pub fn notify(&self, event: &KeyRingEvent) {
        for observer in self.observers.read().unwrap().iter() {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_capabilities() {
        assert!(KeyRingType::Mnemonic.supports_coin_type_finalize());
        assert!(KeyRingType::Keystone.supports_coin_type_finalize());
        assert!(!KeyRingType::PrivateKey.supports_coin_type_finalize());
        assert!(!KeyRingType::Ledger.supports_coin_type_finalize());

        assert!(KeyRingType::Mnemonic.supports_sensitive_export());
        assert!(KeyRingType::PrivateKey.supports_sensitive_export());
        assert!(!KeyRingType::Ledger.supports_sensitive_export());
    }

    #[test]
    fn test_type_serde_kebab() {
        assert_eq!(
            serde_json::to_string(&KeyRingType::PrivateKey).unwrap(),
            "\"private-key\""
        );
    }

    #[test]
    fn test_coin_type_tag() {
        assert_eq!(coin_type_tag("cosmoshub"), "keyRing-cosmoshub-coinType");
    }

    #[test]
    fn test_notifier_fires_in_order() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let notifier = Notifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            notifier.subscribe(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        notifier.notify(&KeyRingEvent::KeystoreChanged);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
