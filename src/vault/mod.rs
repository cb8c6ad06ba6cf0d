//! Encrypted multi-vault store
//!
//! Stores one record per imported account, keyed by (kind, id). Each vault
//! splits its payload into `insensitive` metadata (readable while locked)
//! and a `sensitive` blob encrypted under a single user password. The
//! decryption key exists only in volatile memory between `unlock` and
//! `lock`.
//!
//! At-rest format: AES-256-GCM with an Argon2id-derived store key. The
//! password verification artifact is the SHA-256 of the derived key, so
//! password checks never touch vault contents.

use crate::errors::{Result, WalletError};
use crate::security::{new_secret, SecretBytes, SecureBytes};
use crate::storage::KvStore;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use rand::RngCore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const VAULT_ID_SIZE: usize = 8;

const KEY_PASSWORD: &str = "password";
const KEY_VAULTS: &str = "vaults";

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn b64_decode(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| WalletError::DecryptionFailed(format!("Invalid base64: {}", e)))
}

/// Argon2id parameters for the store key derivation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MiB
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Weak parameters for unit tests only.
    pub fn fast_insecure() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Encrypted payload of a vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherBlob {
    /// Nonce for AES-GCM (base64)
    pub nonce: String,
    /// Ciphertext (base64)
    pub ciphertext: String,
}

/// One stored account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    /// Namespace, immutable after creation ("keyRing")
    pub kind: String,
    /// Random caller-visible identifier
    pub id: String,
    /// Plaintext metadata readable without decryption
    pub insensitive: Map<String, Value>,
    /// Encrypted secret material
    pub sensitive: CipherBlob,
}

#[derive(Debug, Serialize, Deserialize)]
struct PasswordRecord {
    /// KDF salt (base64)
    salt: String,
    /// SHA-256 of the derived store key (base64)
    verifier: String,
}

/// Password-gated encrypted key-value store for vaults.
pub struct VaultStore {
    kv: Arc<dyn KvStore>,
    kdf: KdfParams,
    vaults: RwLock<Vec<Vault>>,
    session_key: RwLock<Option<SecretBytes>>,
}

impl VaultStore {
    pub fn new(kv: Arc<dyn KvStore>, kdf: KdfParams) -> Result<Self> {
        let vaults = match kv.get(KEY_VAULTS) {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        Ok(Self {
            kv,
            kdf,
            vaults: RwLock::new(vaults),
            session_key: RwLock::new(None),
        })
    }

    pub(crate) fn kdf_params(&self) -> KdfParams {
        self.kdf
    }

    pub fn is_signed_up(&self) -> bool {
        self.kv.get(KEY_PASSWORD).is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.session_key.read().unwrap().is_none()
    }

    /// Derive and persist the password artifacts, then unlock.
    pub fn sign_up(&self, password: &str) -> Result<()> {
        if self.is_signed_up() {
            return Err(WalletError::AlreadySignedUp);
        }

        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = self.derive_key(password, &salt)?;
        let record = PasswordRecord {
            salt: b64(&salt),
            verifier: b64(&Sha256::digest(&key)),
        };
        self.kv.set(KEY_PASSWORD, serde_json::to_value(&record)?)?;

        *self.session_key.write().unwrap() = Some(new_secret(key));
        info!("Vault store signed up");
        Ok(())
    }

    /// Verify the password and hold the store key in memory.
    pub fn unlock(&self, password: &str) -> Result<()> {
        let key = self.verify_password(password)?;
        *self.session_key.write().unwrap() = Some(new_secret(key));
        debug!("Vault store unlocked");
        Ok(())
    }

    /// Discard the in-memory store key.
    pub fn lock(&self) {
        *self.session_key.write().unwrap() = None;
        debug!("Vault store locked");
    }

    /// Side-effect-free password verification.
    pub fn check_user_password(&self, password: &str) -> Result<()> {
        self.verify_password(password).map(|_| ())
    }

    /// Re-encrypt every vault under a key derived from the new password.
    /// The vault list and password record are committed in one batch so a
    /// crash never leaves vaults encrypted under mixed keys.
    pub fn change_user_password(&self, old: &str, new: &str) -> Result<()> {
        let old_key = self.verify_password(old)?;

        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let new_key = self.derive_key(new, &salt)?;

        let mut vaults = self.vaults.write().unwrap();
        let mut reencrypted = Vec::with_capacity(vaults.len());
        for vault in vaults.iter() {
            let plaintext = decrypt_blob(&old_key, &vault.sensitive)?;
            let mut updated = vault.clone();
            updated.sensitive = encrypt_blob(&new_key, plaintext.expose())?;
            reencrypted.push(updated);
        }

        let record = PasswordRecord {
            salt: b64(&salt),
            verifier: b64(&Sha256::digest(&new_key)),
        };
        self.kv.set_batch(vec![
            (
                KEY_PASSWORD.to_string(),
                Some(serde_json::to_value(&record)?),
            ),
            (
                KEY_VAULTS.to_string(),
                Some(serde_json::to_value(&reencrypted)?),
            ),
        ])?;

        *vaults = reencrypted;
        *self.session_key.write().unwrap() = Some(new_secret(new_key));
        info!("User password changed, {} vaults re-encrypted", vaults.len());
        Ok(())
    }

    /// Create a vault with the given plaintext metadata and secret payload.
    pub fn add_vault(
        &self,
        kind: &str,
        insensitive: Map<String, Value>,
        sensitive: &[u8],
    ) -> Result<String> {
        let blob = {
            let guard = self.session_key.read().unwrap();
            let key = guard.as_ref().ok_or(WalletError::Locked)?;
            encrypt_blob(key.expose_secret(), sensitive)?
        };

        let mut id_bytes = [0u8; VAULT_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let id = hex::encode(id_bytes);

        let vault = Vault {
            kind: kind.to_string(),
            id: id.clone(),
            insensitive,
            sensitive: blob,
        };

        let mut vaults = self.vaults.write().unwrap();
        vaults.push(vault);
        self.persist_vaults(&vaults)?;

        debug!("Added vault {}/{}", kind, id);
        Ok(id)
    }

    pub fn get_vault(&self, kind: &str, id: &str) -> Option<Vault> {
        self.vaults
            .read()
            .unwrap()
            .iter()
            .find(|v| v.kind == kind && v.id == id)
            .cloned()
    }

    pub fn get_vaults(&self, kind: &str) -> Vec<Vault> {
        self.vaults
            .read()
            .unwrap()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    pub fn remove_vault(&self, kind: &str, id: &str) -> Result<()> {
        let mut vaults = self.vaults.write().unwrap();
        let before = vaults.len();
        vaults.retain(|v| !(v.kind == kind && v.id == id));
        if vaults.len() == before {
            return Err(WalletError::UnknownVault(id.to_string()));
        }
        self.persist_vaults(&vaults)?;
        debug!("Removed vault {}/{}", kind, id);
        Ok(())
    }

    /// Merge entries into a vault's insensitive metadata.
    pub fn set_and_merge_insensitive_to_vault(
        &self,
        kind: &str,
        id: &str,
        entries: Map<String, Value>,
    ) -> Result<()> {
        let mut vaults = self.vaults.write().unwrap();
        let vault = vaults
            .iter_mut()
            .find(|v| v.kind == kind && v.id == id)
            .ok_or_else(|| WalletError::UnknownVault(id.to_string()))?;

        for (k, v) in entries {
            vault.insensitive.insert(k, v);
        }
        self.persist_vaults(&vaults)
    }

    /// Decrypt a vault's sensitive blob. Fails with `Locked` while locked.
    pub fn decrypt(&self, vault: &Vault) -> Result<SecureBytes> {
        let guard = self.session_key.read().unwrap();
        let key = guard.as_ref().ok_or(WalletError::Locked)?;
        decrypt_blob(key.expose_secret(), &vault.sensitive)
    }

    /// Destructive wipe, gated by a password check.
    pub fn clear_all(&self, password: &str) -> Result<()> {
        self.verify_password(password)?;

        self.kv.set_batch(vec![
            (KEY_PASSWORD.to_string(), None),
            (KEY_VAULTS.to_string(), None),
        ])?;
        self.vaults.write().unwrap().clear();
        *self.session_key.write().unwrap() = None;
        info!("Vault store wiped");
        Ok(())
    }

    fn persist_vaults(&self, vaults: &[Vault]) -> Result<()> {
        self.kv.set(KEY_VAULTS, serde_json::to_value(vaults)?)
    }

    fn verify_password(&self, password: &str) -> Result<Vec<u8>> {
        let record: PasswordRecord = match self.kv.get(KEY_PASSWORD) {
            Some(value) => serde_json::from_value(value)?,
            None => return Err(WalletError::NotSignedUp),
        };

        let salt = b64_decode(&record.salt)?;
        let key = self.derive_key(password, &salt)?;

        let verifier = Sha256::digest(&key);
        if b64(&verifier) != record.verifier {
            return Err(WalletError::InvalidPassword);
        }
        Ok(key)
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Vec<u8>> {
        derive_store_key(&self.kdf, password, salt)
    }
}

/// Argon2id key derivation shared with the legacy keystore reader.
pub(crate) fn derive_store_key(kdf: &KdfParams, password: &str, salt: &[u8]) -> Result<Vec<u8>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| WalletError::EncryptionFailed(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = vec![0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut output)
        .map_err(|e| WalletError::EncryptionFailed(e.to_string()))?;
    Ok(output)
}

pub(crate) fn encrypt_blob(key: &[u8], plaintext: &[u8]) -> Result<CipherBlob> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WalletError::EncryptionFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| WalletError::EncryptionFailed(e.to_string()))?;

    Ok(CipherBlob {
        nonce: b64(&nonce_bytes),
        ciphertext: b64(&ciphertext),
    })
}

pub(crate) fn decrypt_blob(key: &[u8], blob: &CipherBlob) -> Result<SecureBytes> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WalletError::DecryptionFailed(e.to_string()))?;

    let nonce_bytes = b64_decode(&blob.nonce)?;
    let ciphertext = b64_decode(&blob.ciphertext)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| WalletError::DecryptionFailed("AEAD verification failed".to_string()))?;

    Ok(SecureBytes::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use serde_json::json;

    fn new_store() -> (Arc<MemoryKvStore>, VaultStore) {
        let kv = Arc::new(MemoryKvStore::new());
        let store = VaultStore::new(kv.clone(), KdfParams::fast_insecure()).unwrap();
        (kv, store)
    }

    fn meta(name: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("name".to_string(), json!(name));
        m
    }

    #[test]
    fn test_sign_up_once() {
        let (_, store) = new_store();
        store.sign_up("hunter2").unwrap();
        assert!(store.is_signed_up());
        assert!(!store.is_locked());
        assert!(matches!(
            store.sign_up("other"),
            Err(WalletError::AlreadySignedUp)
        ));
    }

    #[test]
    fn test_lock_gating() {
        let (_, store) = new_store();
        store.sign_up("hunter2").unwrap();
        let id = store.add_vault("keyRing", meta("a"), b"secret").unwrap();
        let vault = store.get_vault("keyRing", &id).unwrap();

        store.lock();
        assert!(matches!(store.decrypt(&vault), Err(WalletError::Locked)));
        assert!(matches!(
            store.add_vault("keyRing", meta("b"), b"x"),
            Err(WalletError::Locked)
        ));

        store.unlock("hunter2").unwrap();
        assert_eq!(store.decrypt(&vault).unwrap().expose(), b"secret");
    }

    #[test]
    fn test_wrong_password() {
        let (_, store) = new_store();
        store.sign_up("hunter2").unwrap();
        store.lock();
        assert!(matches!(
            store.unlock("wrong"),
            Err(WalletError::InvalidPassword)
        ));
        assert!(matches!(
            store.check_user_password("wrong"),
            Err(WalletError::InvalidPassword)
        ));
        store.check_user_password("hunter2").unwrap();
    }

    #[test]
    fn test_change_password_reencrypts() {
        let (kv, store) = new_store();
        store.sign_up("old-password").unwrap();
        let id = store.add_vault("keyRing", meta("a"), b"mnemonic words").unwrap();

        store.change_user_password("old-password", "new-password").unwrap();

        // Old password no longer works after a reopen
        let reopened = VaultStore::new(kv, KdfParams::fast_insecure()).unwrap();
        assert!(matches!(
            reopened.unlock("old-password"),
            Err(WalletError::InvalidPassword)
        ));
        reopened.unlock("new-password").unwrap();
        let vault = reopened.get_vault("keyRing", &id).unwrap();
        assert_eq!(reopened.decrypt(&vault).unwrap().expose(), b"mnemonic words");
    }

    #[test]
    fn test_change_password_requires_old() {
        let (_, store) = new_store();
        store.sign_up("old-password").unwrap();
        assert!(matches!(
            store.change_user_password("nope", "new"),
            Err(WalletError::InvalidPassword)
        ));
    }

    #[test]
    fn test_merge_insensitive() {
        let (_, store) = new_store();
        store.sign_up("p").unwrap();
        let id = store.add_vault("keyRing", meta("a"), b"s").unwrap();

        let mut extra = Map::new();
        extra.insert("keyRing-cosmoshub-coinType".to_string(), json!(118));
        store
            .set_and_merge_insensitive_to_vault("keyRing", &id, extra)
            .unwrap();

        let vault = store.get_vault("keyRing", &id).unwrap();
        assert_eq!(vault.insensitive.get("name"), Some(&json!("a")));
        assert_eq!(
            vault.insensitive.get("keyRing-cosmoshub-coinType"),
            Some(&json!(118))
        );
    }

    #[test]
    fn test_remove_unknown_vault() {
        let (_, store) = new_store();
        store.sign_up("p").unwrap();
        assert!(matches!(
            store.remove_vault("keyRing", "nope"),
            Err(WalletError::UnknownVault(_))
        ));
    }

    #[test]
    fn test_clear_all() {
        let (_, store) = new_store();
        store.sign_up("p").unwrap();
        store.add_vault("keyRing", meta("a"), b"s").unwrap();

        assert!(matches!(
            store.clear_all("wrong"),
            Err(WalletError::InvalidPassword)
        ));
        store.clear_all("p").unwrap();
        assert!(!store.is_signed_up());
        assert!(store.get_vaults("keyRing").is_empty());
    }
}
