//! Message types accepted by the router

use crate::crypto::{Bip44Path, DigestMethod};
use crate::keyring::drivers::KeystoneAccount;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Every message a UI or page caller can send to the core.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WalletMsg {
    CreateMnemonicKeyRing {
        mnemonic: String,
        #[serde(default)]
        bip44_path: Bip44Path,
        name: String,
        #[serde(default)]
        password: Option<String>,
        /// Caller-defined display metadata stored alongside the vault
        #[serde(default)]
        meta: Map<String, Value>,
        #[serde(default)]
        parent_vault_id: Option<String>,
    },
    CreatePrivateKeyKeyRing {
        private_key: String,
        name: String,
        #[serde(default)]
        password: Option<String>,
    },
    CreateLedgerKeyRing {
        /// Compressed public keys (hex) keyed by device app
        pub_keys: BTreeMap<String, String>,
        #[serde(default)]
        bip44_path: Bip44Path,
        name: String,
        #[serde(default)]
        password: Option<String>,
    },
    CreateKeystoneKeyRing {
        accounts: Vec<KeystoneAccount>,
        name: String,
        #[serde(default)]
        password: Option<String>,
    },
    FinalizeKeyCoinType {
        vault_id: String,
        chain_id: String,
        coin_type: u32,
    },
    NeedKeyCoinTypeFinalize {
        vault_id: String,
        chain_id: String,
    },
    Sign {
        chain_id: String,
        /// Defaults to the selected vault
        #[serde(default)]
        vault_id: Option<String>,
        #[serde(default)]
        coin_type: Option<u32>,
        /// Message bytes (hex)
        message: String,
        digest_method: DigestMethod,
    },
    GetPubKey {
        chain_id: String,
        #[serde(default)]
        vault_id: Option<String>,
    },
    SelectKeyRing {
        vault_id: String,
    },
    DeleteKeyRing {
        vault_id: String,
        password: String,
    },
    ChangeKeyRingName {
        vault_id: String,
        name: String,
    },
    ShowSensitiveKeyRingData {
        vault_id: String,
        password: String,
    },
    ExportKeyRingVaults {
        password: String,
    },
    ExportKeyRingData {
        password: String,
    },
    CheckLegacyKeyRingPassword {
        password: String,
    },
    UnlockKeyRing {
        password: String,
    },
    LockKeyRing,
    Status,
    GetKeyInfos,
    SearchKeyRings {
        text: String,
        #[serde(default)]
        ignore_chain_enabled: bool,
    },
    ChangeUserPassword {
        old_password: String,
        new_password: String,
    },
}
