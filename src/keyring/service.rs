//! Key-ring orchestration service
//!
//! Coordinates the vault store and the driver strategies: vault lifecycle,
//! per-chain coin-type finalization, signing, search, and notifications.
//! All mutation happens from one background execution context; callers may
//! interleave across await points but never run two handlers in parallel.

use crate::chain::{ChainInfo, ChainRegistry};
use crate::crypto::{bech32_address, eth_address, Bip44Path, DigestMethod, Signature};
use crate::errors::{Result, WalletError};
use crate::keyring::drivers::{
    KeyRingDriver, KeystoneAccount, KeystoneDriver, LedgerDriver, MnemonicDriver,
    PrivateKeyDriver,
};
use crate::keyring::{
    coin_type_tag, fields, vault_bip44_path, vault_key_ring_type, vault_name, KeyInfo,
    KeyRingEvent, KeyRingStatus, KeyRingType, Notifier, KEYRING_VAULT_KIND,
};
use crate::security::{SecureBytes, SecureString};
use crate::storage::KvStore;
use crate::vault::{Vault, VaultStore};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_SELECTED_VAULT: &str = "selectedVaultId";

fn enabled_chains_key(vault_id: &str) -> String {
    format!("enabledChains/{}", vault_id)
}

/// Options for [`KeyRingService::search_key_rings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Search bech32 addresses on every known chain, not just enabled ones.
    pub ignore_chain_enabled: bool,
}

/// One decrypted vault export entry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportedKeyRing {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_ring_type: KeyRingType,
    /// Mnemonic phrase or hex private key
    pub data: String,
}

/// Full export of one key-ring: the secret plus the metadata a re-import
/// needs to reproduce the same keys.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportedKeyRingData {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_ring_type: KeyRingType,
    /// Mnemonic phrase or hex private key
    pub key: String,
    #[serde(rename = "bip44Path", skip_serializing_if = "Option::is_none")]
    pub bip44_path: Option<Bip44Path>,
    /// Finalized coin types keyed by chain identifier
    #[serde(rename = "coinTypeForChain")]
    pub coin_type_for_chain: BTreeMap<String, u32>,
}

pub struct KeyRingService {
    pub(crate) vault_store: Arc<VaultStore>,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) registry: ChainRegistry,
    /// Page-facing observers (`keystore-changed` goes here)
    pub(crate) page_notifier: Notifier,
    /// Internal-UI observers (status, selection)
    pub(crate) ui_notifier: Notifier,
    pub(crate) migrating: AtomicBool,
}

impl KeyRingService {
    pub fn new(
        vault_store: Arc<VaultStore>,
        kv: Arc<dyn KvStore>,
        registry: ChainRegistry,
    ) -> Self {
        Self {
            vault_store,
            kv,
            registry,
            page_notifier: Notifier::new(),
            ui_notifier: Notifier::new(),
            migrating: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn page_notifier(&self) -> &Notifier {
        &self.page_notifier
    }

    pub fn ui_notifier(&self) -> &Notifier {
        &self.ui_notifier
    }

    fn driver_for(key_ring_type: KeyRingType) -> &'static dyn KeyRingDriver {
        match key_ring_type {
            KeyRingType::Mnemonic => &MnemonicDriver,
            KeyRingType::PrivateKey => &PrivateKeyDriver,
            KeyRingType::Ledger => &LedgerDriver,
            KeyRingType::Keystone => &KeystoneDriver,
        }
    }

    // ---- status and lifecycle ------------------------------------------

    pub fn status(&self) -> KeyRingStatus {
        if self.vault_store.get_vaults(KEYRING_VAULT_KIND).is_empty() {
            KeyRingStatus::Empty
        } else if self.vault_store.is_locked() {
            KeyRingStatus::Locked
        } else {
            KeyRingStatus::Unlocked
        }
    }

    pub fn unlock_key_ring(&self, password: &str) -> Result<()> {
        self.vault_store.unlock(password)?;
        self.ui_notifier
            .notify(&KeyRingEvent::StatusChanged(self.status()));
        Ok(())
    }

    pub fn lock_key_ring(&self) {
        self.vault_store.lock();
        self.ui_notifier
            .notify(&KeyRingEvent::StatusChanged(self.status()));
    }

    pub fn check_user_password(&self, password: &str) -> Result<()> {
        self.vault_store.check_user_password(password)
    }

    pub fn change_user_password(&self, old: &str, new: &str) -> Result<()> {
        self.vault_store.change_user_password(old, new)
    }

    /// The currently active vault id. Always resolves to an existing vault
    /// or falls back to the first one; `None` only when zero vaults exist.
    pub fn selected_vault_id(&self) -> Option<String> {
        let vaults = self.vault_store.get_vaults(KEYRING_VAULT_KIND);
        if vaults.is_empty() {
            return None;
        }

        let stored = self
            .kv
            .get(KEY_SELECTED_VAULT)
            .and_then(|v| v.as_str().map(str::to_string));

        match stored {
            Some(id) if vaults.iter().any(|v| v.id == id) => Some(id),
            _ => Some(vaults[0].id.clone()),
        }
    }

    // ---- creation -------------------------------------------------------

    /// Sign up with `password` on first use; otherwise the store must be
    /// unlocked already.
    fn prepare_for_creation(&self, password: Option<&str>) -> Result<()> {
        if !self.vault_store.is_signed_up() {
            let password = password.ok_or(WalletError::NotSignedUp)?;
            self.vault_store.sign_up(password)?;
        } else if self.vault_store.is_locked() {
            return Err(WalletError::Locked);
        }
        Ok(())
    }

    /// Pre-set finalization tags for every chain whose coin type is
    /// unambiguous, so common chains skip the finalize step entirely.
    fn prefill_coin_type_tags(&self, insensitive: &mut Map<String, Value>) {
        for chain in self.registry.chains() {
            if chain.alternative_bip44s.is_empty() {
                insensitive.insert(
                    coin_type_tag(chain.chain_identifier()),
                    json!(chain.bip44.coin_type),
                );
            }
        }
    }

    pub(crate) fn add_key_ring_vault(
        &self,
        mut insensitive: Map<String, Value>,
        sensitive: &[u8],
        prefill_tags: bool,
    ) -> Result<String> {
        if prefill_tags {
            self.prefill_coin_type_tags(&mut insensitive);
        }
        self.vault_store
            .add_vault(KEYRING_VAULT_KIND, insensitive, sensitive)
    }

    fn finish_creation(&self, vault_id: &str) -> Result<()> {
        self.kv.set(KEY_SELECTED_VAULT, json!(vault_id))?;
        self.page_notifier.notify(&KeyRingEvent::KeystoreChanged);
        self.ui_notifier.notify(&KeyRingEvent::SelectionChanged {
            vault_id: vault_id.to_string(),
        });
        Ok(())
    }

    /// `meta` is caller-defined display metadata merged into the insensitive
    /// bag; structured fields win on collision. `parent_vault_id` records
    /// which vault this one was derived from.
    pub fn create_mnemonic_key_ring(
        &self,
        mnemonic: &str,
        bip44_path: Bip44Path,
        name: &str,
        password: Option<&str>,
        meta: Map<String, Value>,
        parent_vault_id: Option<&str>,
    ) -> Result<String> {
        self.prepare_for_creation(password)?;
        let (mut insensitive, sensitive) =
            MnemonicDriver::create_key_ring_vault(mnemonic, bip44_path, name)?;
        for (key, value) in meta {
            insensitive.entry(key).or_insert(value);
        }
        if let Some(parent) = parent_vault_id {
            insensitive.insert(fields::PARENT_VAULT_ID.to_string(), json!(parent));
        }
        let id = self.add_key_ring_vault(insensitive, &sensitive, true)?;
        self.finish_creation(&id)?;
        info!("Created mnemonic key-ring {}", id);
        Ok(id)
    }

    pub fn create_private_key_key_ring(
        &self,
        private_key_hex: &str,
        name: &str,
        password: Option<&str>,
    ) -> Result<String> {
        self.prepare_for_creation(password)?;
        let (insensitive, sensitive) =
            PrivateKeyDriver::create_key_ring_vault(private_key_hex, name)?;
        let id = self.add_key_ring_vault(insensitive, &sensitive, false)?;
        self.finish_creation(&id)?;
        info!("Created private-key key-ring {}", id);
        Ok(id)
    }

    pub fn create_ledger_key_ring(
        &self,
        pub_keys: &BTreeMap<String, Vec<u8>>,
        bip44_path: Bip44Path,
        name: &str,
        password: Option<&str>,
    ) -> Result<String> {
        self.prepare_for_creation(password)?;
        let (insensitive, sensitive) =
            LedgerDriver::create_key_ring_vault(pub_keys, bip44_path, name)?;
        let id = self.add_key_ring_vault(insensitive, &sensitive, false)?;
        self.finish_creation(&id)?;
        info!("Created ledger key-ring {}", id);
        Ok(id)
    }

    pub fn create_keystone_key_ring(
        &self,
        accounts: &[KeystoneAccount],
        name: &str,
        password: Option<&str>,
    ) -> Result<String> {
        self.prepare_for_creation(password)?;
        let (insensitive, sensitive) = KeystoneDriver::create_key_ring_vault(accounts, name)?;
        let id = self.add_key_ring_vault(insensitive, &sensitive, true)?;
        self.finish_creation(&id)?;
        info!("Created keystone key-ring {}", id);
        Ok(id)
    }

    // ---- coin type finalization ----------------------------------------

    fn get_key_ring_vault(&self, vault_id: &str) -> Result<Vault> {
        self.vault_store
            .get_vault(KEYRING_VAULT_KIND, vault_id)
            .ok_or_else(|| WalletError::UnknownVault(vault_id.to_string()))
    }

    /// The coin type used for (vault, chain): the finalized tag if present,
    /// else the chain default. The bool reports whether a tag exists.
    fn resolve_coin_type(&self, vault: &Vault, chain: &ChainInfo) -> (u32, bool) {
        let tag = coin_type_tag(chain.chain_identifier());
        match vault.insensitive.get(&tag).and_then(|v| v.as_u64()) {
            Some(coin_type) => (coin_type as u32, true),
            None => (chain.bip44.coin_type, false),
        }
    }

    /// One-time, irreversible coin-type commitment. Re-finalizing throws
    /// even for the same value so logic errors surface upstream.
    pub fn finalize_key_coin_type(
        &self,
        vault_id: &str,
        chain_id: &str,
        coin_type: u32,
    ) -> Result<()> {
        if self.vault_store.is_locked() {
            return Err(WalletError::Locked);
        }
        let vault = self.get_key_ring_vault(vault_id)?;
        let chain = self.registry.get(chain_id)?;

        let key_ring_type = vault_key_ring_type(&vault)?;
        if !key_ring_type.supports_coin_type_finalize() {
            return Err(WalletError::NotFinalizable(
                key_ring_type.as_str().to_string(),
            ));
        }
        if !chain.is_valid_coin_type(coin_type) {
            return Err(WalletError::CoinTypeMismatch {
                chain_id: chain_id.to_string(),
                coin_type,
            });
        }

        let tag = coin_type_tag(chain.chain_identifier());
        if vault.insensitive.contains_key(&tag) {
            return Err(WalletError::AlreadyFinalized(chain_id.to_string()));
        }

        let mut entries = Map::new();
        entries.insert(tag, json!(coin_type));
        self.vault_store
            .set_and_merge_insensitive_to_vault(KEYRING_VAULT_KIND, vault_id, entries)?;

        info!(
            "Finalized coin type {} for vault {} on {}",
            coin_type, vault_id, chain_id
        );
        Ok(())
    }

    /// Pure predicate; `false` for non-finalizable rings and finalized tags.
    pub fn need_key_coin_type_finalize(&self, vault_id: &str, chain_id: &str) -> Result<bool> {
        let vault = self.get_key_ring_vault(vault_id)?;
        let chain = self.registry.get(chain_id)?;

        let key_ring_type = vault_key_ring_type(&vault)?;
        if !key_ring_type.supports_coin_type_finalize() {
            return Ok(false);
        }
        let tag = coin_type_tag(chain.chain_identifier());
        Ok(!vault.insensitive.contains_key(&tag))
    }

    // ---- cryptographic operations --------------------------------------

    fn decrypted_for(&self, vault: &Vault, key_ring_type: KeyRingType) -> Result<Option<SecureBytes>> {
        if key_ring_type.supports_sensitive_export() {
            Ok(Some(self.vault_store.decrypt(vault)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_pub_key(&self, chain_id: &str, vault_id: &str) -> Result<[u8; 33]> {
        if self.vault_store.is_locked() {
            return Err(WalletError::Locked);
        }
        let vault = self.get_key_ring_vault(vault_id)?;
        let chain = self.registry.get(chain_id)?;
        let key_ring_type = vault_key_ring_type(&vault)?;
        let (coin_type, _) = self.resolve_coin_type(&vault, chain);

        let decrypted = self.decrypted_for(&vault, key_ring_type)?;
        Self::driver_for(key_ring_type).get_pub_key(&vault, decrypted.as_ref(), coin_type, chain)
    }

    /// Sign `message` hashed with `digest_method`.
    ///
    /// When the (vault, chain) coin type is not yet finalized, the coin type
    /// actually used — `nominal_coin_type` if supplied, else the chain
    /// default — is finalized as a side effect of a successful signature.
    /// The first chain interaction permanently commits the derivation path.
    pub fn sign(
        &self,
        chain_id: &str,
        vault_id: &str,
        nominal_coin_type: Option<u32>,
        message: &[u8],
        digest_method: DigestMethod,
    ) -> Result<Signature> {
        if self.vault_store.is_locked() {
            return Err(WalletError::Locked);
        }
        let vault = self.get_key_ring_vault(vault_id)?;
        let chain = self.registry.get(chain_id)?;
        let key_ring_type = vault_key_ring_type(&vault)?;

        let (resolved, finalized) = self.resolve_coin_type(&vault, chain);
        let coin_type = if finalized {
            // A finalized tag always wins over the caller-supplied value
            resolved
        } else {
            match nominal_coin_type {
                Some(nominal) => {
                    if !chain.is_valid_coin_type(nominal) {
                        return Err(WalletError::CoinTypeMismatch {
                            chain_id: chain_id.to_string(),
                            coin_type: nominal,
                        });
                    }
                    nominal
                }
                None => resolved,
            }
        };

        let decrypted = self.decrypted_for(&vault, key_ring_type)?;
        let signature = Self::driver_for(key_ring_type).sign(
            &vault,
            decrypted.as_ref(),
            coin_type,
            message,
            digest_method,
            chain,
        )?;

        if !finalized && key_ring_type.supports_coin_type_finalize() {
            warn!(
                "Implicitly finalizing coin type {} for vault {} on {} (first signature)",
                coin_type, vault_id, chain_id
            );
            self.finalize_key_coin_type(vault_id, chain_id, coin_type)?;
        }

        debug!("Signed {} digest for vault {} on {}", digest_method.as_str(), vault_id, chain_id);
        Ok(signature)
    }

    // ---- lifecycle management ------------------------------------------

    pub fn select_key_ring(&self, vault_id: &str) -> Result<()> {
        if self.vault_store.is_locked() {
            return Err(WalletError::Locked);
        }
        self.get_key_ring_vault(vault_id)?;

        self.kv.set(KEY_SELECTED_VAULT, json!(vault_id))?;
        self.page_notifier.notify(&KeyRingEvent::KeystoreChanged);
        self.ui_notifier.notify(&KeyRingEvent::SelectionChanged {
            vault_id: vault_id.to_string(),
        });
        Ok(())
    }

    /// Delete a vault after re-verifying the password. Deleting the last
    /// vault wipes the whole store: there is no meaningful "signed up with
    /// zero accounts" state.
    pub fn delete_key_ring(&self, vault_id: &str, password: &str) -> Result<()> {
        self.vault_store.check_user_password(password)?;
        self.get_key_ring_vault(vault_id)?;

        let was_selected = self.selected_vault_id().as_deref() == Some(vault_id);

        self.vault_store.remove_vault(KEYRING_VAULT_KIND, vault_id)?;
        self.kv.remove(&enabled_chains_key(vault_id))?;

        let remaining = self.vault_store.get_vaults(KEYRING_VAULT_KIND);
        if remaining.is_empty() {
            self.vault_store.clear_all(password)?;
            self.kv.remove(KEY_SELECTED_VAULT)?;
            info!("Deleted last key-ring; vault store wiped");
        } else if was_selected {
            self.kv.set(KEY_SELECTED_VAULT, json!(remaining[0].id))?;
            self.ui_notifier.notify(&KeyRingEvent::SelectionChanged {
                vault_id: remaining[0].id.clone(),
            });
        }

        self.page_notifier.notify(&KeyRingEvent::KeystoreChanged);
        self.ui_notifier
            .notify(&KeyRingEvent::StatusChanged(self.status()));
        Ok(())
    }

    pub fn change_key_ring_name(&self, vault_id: &str, name: &str) -> Result<()> {
        self.get_key_ring_vault(vault_id)?;

        let mut entries = Map::new();
        entries.insert(fields::NAME.to_string(), json!(name));
        self.vault_store
            .set_and_merge_insensitive_to_vault(KEYRING_VAULT_KIND, vault_id, entries)?;
        self.page_notifier.notify(&KeyRingEvent::KeystoreChanged);
        Ok(())
    }

    // ---- sensitive exports ----------------------------------------------

    /// Reveal a vault's secret material. Password-gated; only mnemonic and
    /// private-key rings have anything to reveal.
    pub fn show_sensitive_key_ring_data(
        &self,
        vault_id: &str,
        password: &str,
    ) -> Result<SecureString> {
        self.vault_store.check_user_password(password)?;
        let vault = self.get_key_ring_vault(vault_id)?;

        let key_ring_type = vault_key_ring_type(&vault)?;
        if !key_ring_type.supports_sensitive_export() {
            return Err(WalletError::NoSensitiveData(
                key_ring_type.as_str().to_string(),
            ));
        }

        let decrypted = self.vault_store.decrypt(&vault)?;
        let data = match key_ring_type {
            KeyRingType::Mnemonic => std::str::from_utf8(decrypted.expose())
                .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?
                .to_string(),
            _ => hex::encode(decrypted.expose()),
        };
        Ok(SecureString::new(data))
    }

    pub fn export_key_ring_vaults(&self, password: &str) -> Result<Vec<ExportedKeyRing>> {
        self.vault_store.check_user_password(password)?;

        let mut exports = Vec::new();
        for vault in self.vault_store.get_vaults(KEYRING_VAULT_KIND) {
            let key_ring_type = vault_key_ring_type(&vault)?;
            if !key_ring_type.supports_sensitive_export() {
                continue;
            }
            let data = self
                .show_sensitive_key_ring_data(&vault.id, password)?
                .expose()
                .to_string();
            exports.push(ExportedKeyRing {
                id: vault.id.clone(),
                name: vault_name(&vault),
                key_ring_type,
                data,
            });
        }
        Ok(exports)
    }

    /// Export every revealable key-ring together with its derivation path
    /// and finalized coin types, so the keys can be reproduced elsewhere.
    pub fn export_key_ring_data(&self, password: &str) -> Result<Vec<ExportedKeyRingData>> {
        self.vault_store.check_user_password(password)?;

        let mut exports = Vec::new();
        for vault in self.vault_store.get_vaults(KEYRING_VAULT_KIND) {
            let key_ring_type = vault_key_ring_type(&vault)?;
            if !key_ring_type.supports_sensitive_export() {
                continue;
            }
            let key = self
                .show_sensitive_key_ring_data(&vault.id, password)?
                .expose()
                .to_string();

            let mut coin_type_for_chain = BTreeMap::new();
            for chain in self.registry.chains() {
                let tag = coin_type_tag(chain.chain_identifier());
                if let Some(coin_type) = vault.insensitive.get(&tag).and_then(|v| v.as_u64()) {
                    coin_type_for_chain
                        .insert(chain.chain_identifier().to_string(), coin_type as u32);
                }
            }

            exports.push(ExportedKeyRingData {
                id: vault.id.clone(),
                name: vault_name(&vault),
                key_ring_type,
                key,
                bip44_path: vault_bip44_path(&vault).ok(),
                coin_type_for_chain,
            });
        }
        Ok(exports)
    }

    // ---- queries --------------------------------------------------------

    pub fn get_key_infos(&self) -> Result<Vec<KeyInfo>> {
        let selected = self.selected_vault_id();
        self.vault_store
            .get_vaults(KEYRING_VAULT_KIND)
            .iter()
            .map(|vault| {
                Ok(KeyInfo {
                    id: vault.id.clone(),
                    name: vault_name(vault),
                    key_ring_type: vault_key_ring_type(vault)?,
                    is_selected: selected.as_deref() == Some(&vault.id),
                })
            })
            .collect()
    }

    // ---- chain enablement ----------------------------------------------

    /// Chains enabled for a vault. Absent bookkeeping means all known
    /// chains are enabled.
    pub fn enabled_chains(&self, vault_id: &str) -> Vec<String> {
        match self.kv.get(&enabled_chains_key(vault_id)) {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => self
                .registry
                .chains()
                .iter()
                .map(|c| c.chain_id.clone())
                .collect(),
        }
    }

    pub fn set_enabled_chains(&self, vault_id: &str, chain_ids: Vec<String>) -> Result<()> {
        self.kv
            .set(&enabled_chains_key(vault_id), serde_json::to_value(chain_ids)?)
    }

    pub fn enable_chain(&self, vault_id: &str, chain_id: &str) -> Result<()> {
        self.registry.get(chain_id)?;
        let mut enabled = self.enabled_chains(vault_id);
        if !enabled.iter().any(|id| id == chain_id) {
            enabled.push(chain_id.to_string());
            self.set_enabled_chains(vault_id, enabled)?;
        }
        Ok(())
    }

    pub fn disable_chain(&self, vault_id: &str, chain_id: &str) -> Result<()> {
        self.registry.get(chain_id)?;
        let mut enabled = self.enabled_chains(vault_id);
        let before = enabled.len();
        enabled.retain(|id| id != chain_id);
        if enabled.len() != before {
            self.set_enabled_chains(vault_id, enabled)?;
        }
        Ok(())
    }

    // ---- search ---------------------------------------------------------

    /// Tiered search over key-rings: display-name substring, then hex
    /// EVM-address substring for hex-looking queries of length >= 8, then
    /// bech32-address substring for non-hex queries of length >= 3. A user
    /// may paste a full address, a partial address, or a name; the search
    /// must not require them to know which.
    pub fn search_key_rings(&self, text: &str, options: SearchOptions) -> Result<Vec<KeyInfo>> {
        if self.vault_store.is_locked() {
            return Err(WalletError::Locked);
        }

        let base = self.get_key_infos()?;
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return Ok(base);
        }

        let mut matched: HashSet<String> = HashSet::new();

        // Tier 1: name substring
        for info in &base {
            if info.name.to_lowercase().contains(&text) {
                matched.insert(info.id.clone());
            }
        }

        let hex_query = text.strip_prefix("0x").unwrap_or(&text);
        let looks_hex = !hex_query.is_empty() && hex_query.bytes().all(|b| b.is_ascii_hexdigit());

        if text.len() >= 8 && looks_hex {
            // Tier 2: EVM address substring
            for info in &base {
                if matched.contains(&info.id) {
                    continue;
                }
                if let Some(address) = self.evm_address_of(&info.id) {
                    if address.contains(hex_query) {
                        matched.insert(info.id.clone());
                    }
                }
            }
        } else if !looks_hex && text.len() >= 3 {
            // Tier 3: bech32 address substring, reserved for non-hex
            // queries; the `1` separator in the query narrows the candidate
            // chains by prefix
            let prefix_hint = text.rsplit_once('1').map(|(prefix, _)| prefix.to_string());

            for info in &base {
                if matched.contains(&info.id) {
                    continue;
                }
                let enabled = if options.ignore_chain_enabled {
                    None
                } else {
                    Some(self.enabled_chains(&info.id))
                };

                'chains: for chain in self.registry.chains() {
                    if let Some(enabled) = &enabled {
                        if !enabled.contains(&chain.chain_id) {
                            continue;
                        }
                    }
                    if let Some(hint) = &prefix_hint {
                        if !chain.bech32_prefix.starts_with(hint.as_str()) {
                            continue;
                        }
                    }
                    if let Some(address) = self.bech32_address_of(&info.id, chain) {
                        if address.contains(&text) {
                            matched.insert(info.id.clone());
                            break 'chains;
                        }
                    }
                }
            }
        }

        // Union of tiers, order-stable relative to the base list
        Ok(base.into_iter().filter(|i| matched.contains(&i.id)).collect())
    }

    fn evm_address_of(&self, vault_id: &str) -> Option<String> {
        let vault = self.vault_store.get_vault(KEYRING_VAULT_KIND, vault_id)?;
        let key_ring_type = vault_key_ring_type(&vault).ok()?;
        let decrypted = self.decrypted_for(&vault, key_ring_type).ok()?;

        let chain = self.registry.chains().iter().find(|c| c.evm)?;
        let pub_key = Self::driver_for(key_ring_type)
            .get_pub_key(&vault, decrypted.as_ref(), 60, chain)
            .ok()?;
        Some(hex::encode(eth_address(&pub_key).ok()?))
    }

    fn bech32_address_of(&self, vault_id: &str, chain: &ChainInfo) -> Option<String> {
        let vault = self.vault_store.get_vault(KEYRING_VAULT_KIND, vault_id)?;
        let key_ring_type = vault_key_ring_type(&vault).ok()?;
        let decrypted = self.decrypted_for(&vault, key_ring_type).ok()?;
        let (coin_type, _) = self.resolve_coin_type(&vault, chain);

        let pub_key = Self::driver_for(key_ring_type)
            .get_pub_key(&vault, decrypted.as_ref(), coin_type, chain)
            .ok()?;
        bech32_address(&chain.bech32_prefix, &pub_key).ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::Bip44;
    use crate::storage::MemoryKvStore;
    use crate::vault::KdfParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    pub(crate) fn test_chains() -> Vec<ChainInfo> {
        vec![
            ChainInfo {
                chain_id: "cosmoshub-4".to_string(),
                chain_name: "Cosmos Hub".to_string(),
                bip44: Bip44 { coin_type: 118 },
                alternative_bip44s: vec![],
                bech32_prefix: "cosmos".to_string(),
                evm: false,
            },
            ChainInfo {
                chain_id: "kava_2222-10".to_string(),
                chain_name: "Kava".to_string(),
                bip44: Bip44 { coin_type: 459 },
                alternative_bip44s: vec![Bip44 { coin_type: 118 }],
                bech32_prefix: "kava".to_string(),
                evm: false,
            },
            ChainInfo {
                chain_id: "evmos_9001-2".to_string(),
                chain_name: "Evmos".to_string(),
                bip44: Bip44 { coin_type: 60 },
                alternative_bip44s: vec![],
                bech32_prefix: "evmos".to_string(),
                evm: true,
            },
        ]
    }

    pub(crate) fn new_service() -> KeyRingService {
        let kv = Arc::new(MemoryKvStore::new());
        let vault_store =
            Arc::new(VaultStore::new(kv.clone(), KdfParams::fast_insecure()).unwrap());
        KeyRingService::new(vault_store, kv, ChainRegistry::new(test_chains()))
    }

    fn create_default_ring(service: &KeyRingService) -> String {
        service
            .create_mnemonic_key_ring(
                TEST_MNEMONIC,
                Bip44Path::default(),
                "wallet-1",
                Some("pw"),
                Map::new(),
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_status_transitions() {
        let service = new_service();
        assert_eq!(service.status(), KeyRingStatus::Empty);

        create_default_ring(&service);
        assert_eq!(service.status(), KeyRingStatus::Unlocked);

        service.lock_key_ring();
        assert_eq!(service.status(), KeyRingStatus::Locked);

        service.unlock_key_ring("pw").unwrap();
        assert_eq!(service.status(), KeyRingStatus::Unlocked);
    }

    #[test]
    fn test_auto_finalize_unambiguous_chains_at_creation() {
        // Scenario: a chain with no alternative coin types is finalized at
        // vault creation without any finalize call
        let service = new_service();
        let id = create_default_ring(&service);

        assert!(!service.need_key_coin_type_finalize(&id, "cosmoshub-4").unwrap());
        assert!(!service.need_key_coin_type_finalize(&id, "evmos_9001-2").unwrap());
        // Ambiguous chain stays pending
        assert!(service.need_key_coin_type_finalize(&id, "kava_2222-10").unwrap());

        let vault = service.get_key_ring_vault(&id).unwrap();
        assert_eq!(
            vault.insensitive.get("keyRing-cosmoshub-coinType"),
            Some(&json!(118))
        );
    }

    #[test]
    fn test_finalize_error_ladder() {
        let service = new_service();
        let id = create_default_ring(&service);

        // Wrong coin type for the chain
        assert!(matches!(
            service.finalize_key_coin_type(&id, "kava_2222-10", 999),
            Err(WalletError::CoinTypeMismatch { .. })
        ));

        service.finalize_key_coin_type(&id, "kava_2222-10", 118).unwrap();
        assert!(!service.need_key_coin_type_finalize(&id, "kava_2222-10").unwrap());

        // Re-finalizing throws, even with the same value
        assert!(matches!(
            service.finalize_key_coin_type(&id, "kava_2222-10", 118),
            Err(WalletError::AlreadyFinalized(_))
        ));
        assert!(matches!(
            service.finalize_key_coin_type(&id, "kava_2222-10", 459),
            Err(WalletError::AlreadyFinalized(_))
        ));

        service.lock_key_ring();
        assert!(matches!(
            service.finalize_key_coin_type(&id, "kava_2222-10", 459),
            Err(WalletError::Locked)
        ));
    }

    #[test]
    fn test_finalize_rejected_for_private_key_ring() {
        let service = new_service();
        create_default_ring(&service);
        let pk_id = service
            .create_private_key_key_ring(
                "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
                "imported",
                None,
            )
            .unwrap();

        assert!(!service.need_key_coin_type_finalize(&pk_id, "kava_2222-10").unwrap());
        assert!(matches!(
            service.finalize_key_coin_type(&pk_id, "kava_2222-10", 118),
            Err(WalletError::NotFinalizable(_))
        ));
    }

    #[test]
    fn test_sign_implies_finalize() {
        let service = new_service();
        let id = create_default_ring(&service);

        assert!(service.need_key_coin_type_finalize(&id, "kava_2222-10").unwrap());

        // First signature with the alternative coin type commits it
        let first = service
            .sign(&id_chain(), &id, Some(118), b"msg", DigestMethod::Sha256)
            .unwrap();
        assert!(!service.need_key_coin_type_finalize(&id, "kava_2222-10").unwrap());

        // A different nominal coin type is ignored once finalized
        let second = service
            .sign(&id_chain(), &id, Some(459), b"msg", DigestMethod::Sha256)
            .unwrap();
        assert_eq!(first, second);

        fn id_chain() -> String {
            "kava_2222-10".to_string()
        }
    }

    #[test]
    fn test_sign_rejects_mismatched_nominal_coin_type() {
        let service = new_service();
        let id = create_default_ring(&service);
        assert!(matches!(
            service.sign(&"kava_2222-10".to_string(), &id, Some(999), b"m", DigestMethod::Sha256),
            Err(WalletError::CoinTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_lock_gating_of_sensitive_operations() {
        let service = new_service();
        let id = create_default_ring(&service);
        service.lock_key_ring();

        assert!(matches!(
            service.get_pub_key("cosmoshub-4", &id),
            Err(WalletError::Locked)
        ));
        assert!(matches!(
            service.sign("cosmoshub-4", &id, None, b"m", DigestMethod::Sha256),
            Err(WalletError::Locked)
        ));
        assert!(matches!(
            service.select_key_ring(&id),
            Err(WalletError::Locked)
        ));
        assert!(matches!(
            service.search_key_rings("wallet", SearchOptions::default()),
            Err(WalletError::Locked)
        ));

        service.unlock_key_ring("pw").unwrap();
        service.get_pub_key("cosmoshub-4", &id).unwrap();
    }

    #[test]
    fn test_selection_and_delete() {
        let service = new_service();
        let first = create_default_ring(&service);
        let second = service
            .create_mnemonic_key_ring(
                TEST_MNEMONIC,
                Bip44Path::new(1, 0, 0),
                "wallet-2",
                None,
                Map::new(),
                None,
            )
            .unwrap();

        // Creation selects the new vault
        assert_eq!(service.selected_vault_id(), Some(second.clone()));

        service.select_key_ring(&first).unwrap();
        assert_eq!(service.selected_vault_id(), Some(first.clone()));

        assert!(matches!(
            service.select_key_ring("missing"),
            Err(WalletError::UnknownVault(_))
        ));

        // Deleting the selected vault re-selects the first remaining
        service.delete_key_ring(&first, "pw").unwrap();
        assert_eq!(service.selected_vault_id(), Some(second.clone()));

        assert!(matches!(
            service.delete_key_ring(&second, "bad"),
            Err(WalletError::InvalidPassword)
        ));
    }

    #[test]
    fn test_delete_last_vault_wipes_store() {
        // Scenario: deleting the only vault empties the store and a
        // subsequent unlock fails
        let service = new_service();
        let id = create_default_ring(&service);

        service.delete_key_ring(&id, "pw").unwrap();
        assert_eq!(service.status(), KeyRingStatus::Empty);
        assert_eq!(service.selected_vault_id(), None);
        assert!(service.unlock_key_ring("pw").is_err());
    }

    #[test]
    fn test_show_sensitive_gating() {
        let service = new_service();
        let id = create_default_ring(&service);

        assert!(matches!(
            service.show_sensitive_key_ring_data(&id, "bad"),
            Err(WalletError::InvalidPassword)
        ));
        let revealed = service.show_sensitive_key_ring_data(&id, "pw").unwrap();
        assert_eq!(revealed.expose(), TEST_MNEMONIC);

        let mut pub_keys = BTreeMap::new();
        pub_keys.insert(
            "Cosmos".to_string(),
            crate::crypto::Secp256k1KeyPair::from_bytes(&[3u8; 32])
                .unwrap()
                .public_key_compressed()
                .to_vec(),
        );
        let hw = service
            .create_ledger_key_ring(&pub_keys, Bip44Path::default(), "hw", None)
            .unwrap();
        assert!(matches!(
            service.show_sensitive_key_ring_data(&hw, "pw"),
            Err(WalletError::NoSensitiveData(_))
        ));
    }

    #[test]
    fn test_export_key_ring_vaults() {
        let service = new_service();
        create_default_ring(&service);
        service
            .create_private_key_key_ring(
                "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
                "imported",
                None,
            )
            .unwrap();

        let exports = service.export_key_ring_vaults("pw").unwrap();
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].data, TEST_MNEMONIC);
        assert_eq!(exports[1].data.len(), 64);
    }

    #[test]
    fn test_export_key_ring_data_includes_derivation_metadata() {
        let service = new_service();
        let id = create_default_ring(&service);
        service.finalize_key_coin_type(&id, "kava_2222-10", 118).unwrap();

        assert!(matches!(
            service.export_key_ring_data("bad"),
            Err(WalletError::InvalidPassword)
        ));

        let exports = service.export_key_ring_data("pw").unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].key, TEST_MNEMONIC);
        assert_eq!(exports[0].bip44_path, Some(Bip44Path::default()));
        // Prefilled unambiguous chains plus the explicit finalization
        assert_eq!(exports[0].coin_type_for_chain.get("cosmoshub"), Some(&118));
        assert_eq!(exports[0].coin_type_for_chain.get("kava_2222"), Some(&118));
        assert_eq!(exports[0].coin_type_for_chain.get("evmos_9001"), Some(&60));
    }

    #[test]
    fn test_create_mnemonic_carries_meta_and_parent() {
        let service = new_service();
        let parent = create_default_ring(&service);

        let mut meta = Map::new();
        meta.insert("source".to_string(), json!("derived"));
        // Caller metadata cannot clobber structured fields
        meta.insert(fields::NAME.to_string(), json!("override"));

        let id = service
            .create_mnemonic_key_ring(
                TEST_MNEMONIC,
                Bip44Path::new(1, 0, 0),
                "child",
                None,
                meta,
                Some(&parent),
            )
            .unwrap();

        let vault = service.get_key_ring_vault(&id).unwrap();
        assert_eq!(vault.insensitive.get("source"), Some(&json!("derived")));
        assert_eq!(
            vault.insensitive.get(fields::PARENT_VAULT_ID),
            Some(&json!(parent))
        );
        assert_eq!(vault.insensitive.get(fields::NAME), Some(&json!("child")));
    }

    #[test]
    fn test_search_tiers() {
        let service = new_service();
        let by_name = create_default_ring(&service);
        let other = service
            .create_mnemonic_key_ring(
                "legal winner thank year wave sausage worth useful legal winner thank yellow",
                Bip44Path::default(),
                "trading",
                None,
                Map::new(),
                None,
            )
            .unwrap();

        // Name tier
        let found = service
            .search_key_rings("wallet", SearchOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, by_name);

        // Hex tier: the canonical address of the abandon mnemonic
        let found = service
            .search_key_rings("9858effd", SearchOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, by_name);

        // Bech32 tier: full cosmos address of the second ring
        let address = service.bech32_address_of(&other, service.registry.get("cosmoshub-4").unwrap()).unwrap();
        let found = service
            .search_key_rings(&address, SearchOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, other);

        // Empty query returns everything, order-stable
        let all = service.search_key_rings("", SearchOptions::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, by_name);

        // No match
        assert!(service
            .search_key_rings("zzzzzz", SearchOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_short_hex_query_matches_names_only() {
        let service = new_service();
        let id = create_default_ring(&service);
        let address = service.evm_address_of(&id).unwrap();

        // Too short for the EVM-address tier, and hex-looking queries never
        // reach the bech32 tier
        let found = service
            .search_key_rings(&address[..6], SearchOptions::default())
            .unwrap();
        assert!(found.is_empty());

        // Eight hex characters reach the EVM-address tier
        let found = service
            .search_key_rings(&address[..8], SearchOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[test]
    fn test_chain_enablement() {
        let service = new_service();
        let id = create_default_ring(&service);

        // All known chains are enabled until bookkeeping says otherwise
        assert_eq!(service.enabled_chains(&id).len(), 3);

        service.disable_chain(&id, "cosmoshub-4").unwrap();
        let enabled = service.enabled_chains(&id);
        assert_eq!(enabled.len(), 2);
        assert!(!enabled.contains(&"cosmoshub-4".to_string()));

        // Both directions are idempotent
        service.disable_chain(&id, "cosmoshub-4").unwrap();
        service.enable_chain(&id, "cosmoshub-4").unwrap();
        service.enable_chain(&id, "cosmoshub-4").unwrap();
        assert_eq!(service.enabled_chains(&id).len(), 3);

        assert!(matches!(
            service.enable_chain(&id, "nope"),
            Err(WalletError::UnknownChain(_))
        ));
    }

    #[test]
    fn test_keystore_changed_notification_on_creation() {
        let service = new_service();
        let page_events = Arc::new(AtomicUsize::new(0));
        {
            let page_events = page_events.clone();
            service.page_notifier().subscribe(Box::new(move |event| {
                if *event == KeyRingEvent::KeystoreChanged {
                    page_events.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        create_default_ring(&service);
        assert_eq!(page_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_requires_password_when_not_signed_up() {
        let service = new_service();
        assert!(matches!(
            service.create_mnemonic_key_ring(
                TEST_MNEMONIC,
                Bip44Path::default(),
                "a",
                None,
                Map::new(),
                None,
            ),
            Err(WalletError::NotSignedUp)
        ));
    }
}
