//! Message dispatch
//!
//! Internal callers (wallet UI) get direct dispatch. External callers
//! (injected pages) only reach `sign` after an approval interaction
//! resolves in their favor.

use crate::api::msgs::WalletMsg;
use crate::errors::{Result, WalletError};
use crate::interaction::{InteractionEnv, InteractionService};
use crate::keyring::{KeyRingService, SearchOptions};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub struct MsgRouter {
    keyring: Arc<KeyRingService>,
    interaction: Arc<InteractionService>,
}

impl MsgRouter {
    pub fn new(keyring: Arc<KeyRingService>, interaction: Arc<InteractionService>) -> Self {
        Self { keyring, interaction }
    }

    pub fn interaction(&self) -> &Arc<InteractionService> {
        &self.interaction
    }

    pub async fn handle(&self, env: InteractionEnv, msg: WalletMsg) -> Result<Value> {
        match msg {
            WalletMsg::CreateMnemonicKeyRing {
                mnemonic,
                bip44_path,
                name,
                password,
                meta,
                parent_vault_id,
            } => {
                let id = self.keyring.create_mnemonic_key_ring(
                    &mnemonic,
                    bip44_path,
                    &name,
                    password.as_deref(),
                    meta,
                    parent_vault_id.as_deref(),
                )?;
                Ok(json!({ "vaultId": id }))
            }
            WalletMsg::CreatePrivateKeyKeyRing {
                private_key,
                name,
                password,
            } => {
                let id = self.keyring.create_private_key_key_ring(
                    &private_key,
                    &name,
                    password.as_deref(),
                )?;
                Ok(json!({ "vaultId": id }))
            }
            WalletMsg::CreateLedgerKeyRing {
                pub_keys,
                bip44_path,
                name,
                password,
            } => {
                let mut decoded = BTreeMap::new();
                for (app, key_hex) in pub_keys {
                    decoded.insert(app, hex::decode(key_hex)?);
                }
                let id = self.keyring.create_ledger_key_ring(
                    &decoded,
                    bip44_path,
                    &name,
                    password.as_deref(),
                )?;
                Ok(json!({ "vaultId": id }))
            }
            WalletMsg::CreateKeystoneKeyRing {
                accounts,
                name,
                password,
            } => {
                let id = self.keyring.create_keystone_key_ring(
                    &accounts,
                    &name,
                    password.as_deref(),
                )?;
                Ok(json!({ "vaultId": id }))
            }
            WalletMsg::FinalizeKeyCoinType {
                vault_id,
                chain_id,
                coin_type,
            } => {
                self.keyring
                    .finalize_key_coin_type(&vault_id, &chain_id, coin_type)?;
                Ok(Value::Null)
            }
            WalletMsg::NeedKeyCoinTypeFinalize { vault_id, chain_id } => Ok(json!(self
                .keyring
                .need_key_coin_type_finalize(&vault_id, &chain_id)?)),
            WalletMsg::Sign {
                chain_id,
                vault_id,
                coin_type,
                message,
                digest_method,
            } => {
                let vault_id = self.resolve_vault_id(vault_id)?;
                let message = decode_hex(&message)?;

                if !env.is_internal {
                    debug!("External sign request for {} needs approval", chain_id);
                    self.interaction
                        .wait_approve(
                            env,
                            "/sign",
                            "request-sign",
                            json!({
                                "chainId": chain_id,
                                "vaultId": vault_id,
                                "message": hex::encode(&message),
                                "digestMethod": digest_method.as_str(),
                            }),
                        )
                        .await?;
                }

                let signature =
                    self.keyring
                        .sign(&chain_id, &vault_id, coin_type, &message, digest_method)?;
                Ok(json!({
                    "signature": signature.to_hex(),
                    "r": hex::encode(&signature.r),
                    "s": hex::encode(&signature.s),
                    "v": signature.v,
                }))
            }
            WalletMsg::GetPubKey { chain_id, vault_id } => {
                let vault_id = self.resolve_vault_id(vault_id)?;
                let pub_key = self.keyring.get_pub_key(&chain_id, &vault_id)?;
                Ok(json!(hex::encode(pub_key)))
            }
            WalletMsg::SelectKeyRing { vault_id } => {
                self.keyring.select_key_ring(&vault_id)?;
                Ok(Value::Null)
            }
            WalletMsg::DeleteKeyRing { vault_id, password } => {
                self.keyring.delete_key_ring(&vault_id, &password)?;
                Ok(Value::Null)
            }
            WalletMsg::ChangeKeyRingName { vault_id, name } => {
                self.keyring.change_key_ring_name(&vault_id, &name)?;
                Ok(Value::Null)
            }
            WalletMsg::ShowSensitiveKeyRingData { vault_id, password } => {
                let revealed = self
                    .keyring
                    .show_sensitive_key_ring_data(&vault_id, &password)?;
                Ok(json!(revealed.expose()))
            }
            WalletMsg::ExportKeyRingVaults { password } => {
                let exports = self.keyring.export_key_ring_vaults(&password)?;
                serde_json::to_value(exports).map_err(Into::into)
            }
            WalletMsg::ExportKeyRingData { password } => {
                let exports = self.keyring.export_key_ring_data(&password)?;
                serde_json::to_value(exports).map_err(Into::into)
            }
            WalletMsg::CheckLegacyKeyRingPassword { password } => {
                self.keyring.check_legacy_key_ring_password(&password)?;
                Ok(Value::Null)
            }
            WalletMsg::UnlockKeyRing { password } => {
                // The one-time legacy import rides on the first unlock that
                // observes a legacy keystore
                if self.keyring.need_migration() {
                    self.keyring.migrate(&password)?;
                } else {
                    self.keyring.unlock_key_ring(&password)?;
                }
                serde_json::to_value(self.keyring.status()).map_err(Into::into)
            }
            WalletMsg::LockKeyRing => {
                self.keyring.lock_key_ring();
                Ok(Value::Null)
            }
            WalletMsg::Status => serde_json::to_value(self.keyring.status()).map_err(Into::into),
            WalletMsg::GetKeyInfos => {
                serde_json::to_value(self.keyring.get_key_infos()?).map_err(Into::into)
            }
            WalletMsg::SearchKeyRings {
                text,
                ignore_chain_enabled,
            } => {
                let found = self
                    .keyring
                    .search_key_rings(&text, SearchOptions { ignore_chain_enabled })?;
                serde_json::to_value(found).map_err(Into::into)
            }
            WalletMsg::ChangeUserPassword {
                old_password,
                new_password,
            } => {
                self.keyring
                    .change_user_password(&old_password, &new_password)?;
                Ok(Value::Null)
            }
        }
    }

    fn resolve_vault_id(&self, vault_id: Option<String>) -> Result<String> {
        match vault_id {
            Some(id) => Ok(id),
            None => self
                .keyring
                .selected_vault_id()
                .ok_or_else(|| WalletError::UnknownVault("no vault selected".to_string())),
        }
    }
}

fn decode_hex(data: &str) -> Result<Vec<u8>> {
    hex::decode(data.strip_prefix("0x").unwrap_or(data)).map_err(Into::into)
}
