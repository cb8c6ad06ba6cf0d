//! One-time legacy keystore migration
//!
//! The prior format is a flat array of entries under `key-store`, each
//! encrypted under one shared password with a per-entry salt. Migration
//! consumes each entry exactly once: a persisted flag keyed by the legacy
//! entry id records the new vault id, so a crashed run resumes without
//! re-importing entries that already made it across.

use crate::chain::chain_identifier;
use crate::crypto::Bip44Path;
use crate::errors::{Result, WalletError};
use crate::keyring::drivers::{LedgerDriver, MnemonicDriver, PrivateKeyDriver};
use crate::keyring::service::KeyRingService;
use crate::keyring::{coin_type_tag, vault_key_ring_type, KeyRingEvent, KEYRING_VAULT_KIND};
use crate::security::SecureBytes;
use crate::storage::KvStore;
use crate::vault::{decrypt_blob, derive_store_key, CipherBlob};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

const KEY_LEGACY_STORE: &str = "key-store";
const KEY_LEGACY_SELECTED: &str = "key-store/selected";
const KEY_MIGRATION_DONE: &str = "migration/v1";

fn entry_flag_key(legacy_id: &str) -> String {
    format!("migration/v1/keyStore/{}", legacy_id)
}

/// Per-entry ciphertext of the legacy format. Unlike the vault store, the
/// KDF salt lives on each entry rather than in a shared password record.
#[derive(Debug, Clone, Deserialize)]
struct LegacyCipher {
    /// KDF salt (base64)
    salt: String,
    /// Nonce for AES-GCM (base64)
    nonce: String,
    /// Ciphertext (base64)
    ciphertext: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "cipherText", default)]
    cipher_text: Option<LegacyCipher>,
    #[serde(default)]
    meta: Map<String, Value>,
    #[serde(rename = "bip44HDPath", default)]
    bip44_hd_path: Option<Bip44Path>,
    /// Finalized coin types of the legacy entry, keyed by chain identifier
    #[serde(rename = "coinTypeForChain", default)]
    coin_type_for_chain: Option<BTreeMap<String, u32>>,
    /// Ledger only: compressed public keys (hex) keyed by device app
    #[serde(rename = "pubKeys", default)]
    pub_keys: Option<BTreeMap<String, String>>,
    #[serde(rename = "disabledChains", default)]
    disabled_chains: Option<Vec<String>>,
}

impl LegacyEntry {
    fn id(&self) -> Option<&str> {
        self.meta.get("__id__").and_then(|v| v.as_str())
    }

    fn name(&self) -> &str {
        self.meta
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("migrated")
    }
}

/// Resets the in-flight flag even when migration errors out mid-batch.
struct MigratingGuard<'a>(&'a AtomicBool);

impl Drop for MigratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl KeyRingService {
    fn legacy_entries(&self) -> Result<Vec<LegacyEntry>> {
        match self.kv.get(KEY_LEGACY_STORE) {
            Some(value) => serde_json::from_value(value).map_err(Into::into),
            None => Ok(Vec::new()),
        }
    }

    fn decrypt_legacy(&self, cipher: &LegacyCipher, password: &str) -> Result<SecureBytes> {
        let salt = base64::engine::general_purpose::STANDARD
            .decode(&cipher.salt)
            .map_err(|e| WalletError::DecryptionFailed(format!("Invalid base64: {}", e)))?;
        let key = derive_store_key(&self.vault_store.kdf_params(), password, &salt)?;
        let blob = CipherBlob {
            nonce: cipher.nonce.clone(),
            ciphertext: cipher.ciphertext.clone(),
        };
        decrypt_blob(&key, &blob).map_err(|_| WalletError::InvalidPassword)
    }

    /// Whether a legacy keystore exists that has not been migrated yet.
    pub fn need_migration(&self) -> bool {
        if self.kv.get(KEY_MIGRATION_DONE).is_some() {
            return false;
        }
        match self.kv.get(KEY_LEGACY_STORE) {
            Some(Value::Array(entries)) => !entries.is_empty(),
            _ => false,
        }
    }

    pub fn is_migrating(&self) -> bool {
        self.migrating.load(Ordering::SeqCst)
    }

    /// Side-effect-free probe of the legacy password: decrypts the first
    /// entry that carries ciphertext.
    pub fn check_legacy_key_ring_password(&self, password: &str) -> Result<()> {
        let entries = self.legacy_entries()?;
        match entries.iter().find_map(|e| e.cipher_text.as_ref()) {
            Some(cipher) => self.decrypt_legacy(cipher, password).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Import every legacy entry into the vault store.
    ///
    /// The password is checked once against the legacy ciphertext before any
    /// state changes; a decrypt failure mid-batch surfaces as
    /// `InvalidPassword` and aborts the batch, but entries flagged by an
    /// earlier successful run stay migrated. The migrated counterpart of the
    /// legacy selected entry is re-selected last.
    pub fn migrate(&self, password: &str) -> Result<()> {
        if self
            .migrating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WalletError::AlreadyMigrating);
        }
        let _guard = MigratingGuard(&self.migrating);

        if !self.need_migration() {
            return Ok(());
        }
        let entries = self.legacy_entries()?;

        self.check_legacy_key_ring_password(password)?;
        if self.vault_store.is_signed_up() {
            self.vault_store.unlock(password)?;
        } else {
            self.vault_store.sign_up(password)?;
        }

        let mut migrated = 0usize;
        for entry in &entries {
            let legacy_id = match entry.id() {
                Some(id) => id,
                None => {
                    warn!("Skipping legacy entry without an id (type {})", entry.kind);
                    continue;
                }
            };
            let flag = entry_flag_key(legacy_id);
            if self.kv.get(&flag).is_some() {
                continue;
            }

            let vault_id = match self.migrate_entry(entry, password)? {
                Some(id) => id,
                None => {
                    // Unknown entry type; flag it so re-runs do not re-warn
                    self.kv.set(&flag, Value::Null)?;
                    continue;
                }
            };

            self.replay_coin_types(&vault_id, entry)?;
            self.apply_disabled_chains(&vault_id, entry)?;

            self.kv.set(&flag, json!(vault_id))?;
            migrated += 1;
        }

        self.reselect_migrated(&entries)?;
        self.kv.set(KEY_MIGRATION_DONE, json!(true))?;

        self.page_notifier.notify(&KeyRingEvent::KeystoreChanged);
        self.ui_notifier
            .notify(&KeyRingEvent::StatusChanged(self.status()));
        info!(
            "Legacy migration finished: {} of {} entries imported this run",
            migrated,
            entries.len()
        );
        Ok(())
    }

    fn migrate_entry(&self, entry: &LegacyEntry, password: &str) -> Result<Option<String>> {
        let (insensitive, sensitive) = match entry.kind.as_str() {
            "mnemonic" => {
                let cipher = entry.cipher_text.as_ref().ok_or_else(|| {
                    WalletError::InvalidKeyFormat("legacy mnemonic entry missing ciphertext".to_string())
                })?;
                let decrypted = self.decrypt_legacy(cipher, password)?;
                let phrase = std::str::from_utf8(decrypted.expose())
                    .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?;
                MnemonicDriver::create_key_ring_vault(
                    phrase,
                    entry.bip44_hd_path.clone().unwrap_or_default(),
                    entry.name(),
                )?
            }
            "privateKey" => {
                let cipher = entry.cipher_text.as_ref().ok_or_else(|| {
                    WalletError::InvalidKeyFormat("legacy key entry missing ciphertext".to_string())
                })?;
                let decrypted = self.decrypt_legacy(cipher, password)?;
                let key_hex = std::str::from_utf8(decrypted.expose())
                    .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?;
                PrivateKeyDriver::create_key_ring_vault(key_hex, entry.name())?
            }
            "ledger" => {
                let mut pub_keys = BTreeMap::new();
                for (app, key_hex) in entry.pub_keys.clone().unwrap_or_default() {
                    pub_keys.insert(app, hex::decode(key_hex)?);
                }
                LedgerDriver::create_key_ring_vault(
                    &pub_keys,
                    entry.bip44_hd_path.clone().unwrap_or_default(),
                    entry.name(),
                )?
            }
            other => {
                warn!("Skipping legacy entry of unknown type {}", other);
                return Ok(None);
            }
        };

        // Only mnemonic rings finalize coin types; prefilled tags on other
        // ring kinds would be inert
        let prefill = entry.kind == "mnemonic";
        let id = self.add_key_ring_vault(insensitive, &sensitive, prefill)?;
        Ok(Some(id))
    }

    /// Replay the legacy per-chain coin-type commitments onto the new vault.
    /// Incompatible entries (unknown chain, coin type the chain no longer
    /// lists, or conflict with an auto-finalized tag) are logged and dropped.
    fn replay_coin_types(&self, vault_id: &str, entry: &LegacyEntry) -> Result<()> {
        let replays = match &entry.coin_type_for_chain {
            Some(replays) if !replays.is_empty() => replays,
            _ => return Ok(()),
        };

        let vault = self
            .vault_store
            .get_vault(KEYRING_VAULT_KIND, vault_id)
            .ok_or_else(|| WalletError::UnknownVault(vault_id.to_string()))?;
        if !vault_key_ring_type(&vault)?.supports_coin_type_finalize() {
            return Ok(());
        }

        let mut tags = Map::new();
        for (chain_key, coin_type) in replays {
            let identifier = chain_identifier(chain_key);
            let chain = self
                .registry
                .chains()
                .iter()
                .find(|c| c.chain_identifier() == identifier);

            let chain = match chain {
                Some(chain) => chain,
                None => {
                    warn!("Dropping legacy coin type for unknown chain {}", chain_key);
                    continue;
                }
            };
            if !chain.is_valid_coin_type(*coin_type) {
                warn!(
                    "Dropping incompatible legacy coin type {} for chain {}",
                    coin_type, chain_key
                );
                continue;
            }

            let tag = coin_type_tag(identifier);
            match vault.insensitive.get(&tag).and_then(|v| v.as_u64()) {
                Some(existing) if existing != u64::from(*coin_type) => {
                    warn!(
                        "Legacy coin type {} for chain {} conflicts with finalized {}",
                        coin_type, chain_key, existing
                    );
                }
                Some(_) => {}
                None => {
                    tags.insert(tag, json!(coin_type));
                }
            }
        }

        if tags.is_empty() {
            return Ok(());
        }
        self.vault_store
            .set_and_merge_insensitive_to_vault(KEYRING_VAULT_KIND, vault_id, tags)
    }

    fn apply_disabled_chains(&self, vault_id: &str, entry: &LegacyEntry) -> Result<()> {
        let disabled = match &entry.disabled_chains {
            Some(disabled) if !disabled.is_empty() => disabled,
            _ => return Ok(()),
        };

        let enabled: Vec<String> = self
            .registry
            .chains()
            .iter()
            .map(|c| c.chain_id.clone())
            .filter(|id| !disabled.contains(id))
            .collect();
        self.set_enabled_chains(vault_id, enabled)
    }

    /// Point the selection at the migrated counterpart of the legacy
    /// selected entry. Entries migrated by a previous run are resolved
    /// through their persisted flag value.
    fn reselect_migrated(&self, entries: &[LegacyEntry]) -> Result<()> {
        let selected = match self
            .kv
            .get(KEY_LEGACY_SELECTED)
            .and_then(|v| v.as_str().map(str::to_string))
        {
            Some(selected) => selected,
            None => return Ok(()),
        };
        if !entries.iter().any(|e| e.id() == Some(selected.as_str())) {
            return Ok(());
        }

        match self
            .kv
            .get(&entry_flag_key(&selected))
            .and_then(|v| v.as_str().map(str::to_string))
        {
            Some(vault_id) => self.select_key_ring(&vault_id),
            None => Ok(()),
        }
    }
}
