//! Chain registry types
//!
//! The core does not bootstrap a chain registry; the embedding process
//! injects the known chains at construction. The registry also tracks which
//! chains are enabled per vault, which migration and search consume.

use crate::errors::{Result, WalletError};
use serde::{Deserialize, Serialize};

/// BIP-44 parameters of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bip44 {
    #[serde(rename = "coinType")]
    pub coin_type: u32,
}

/// Static description of a supported chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "chainName")]
    pub chain_name: String,
    pub bip44: Bip44,
    /// Alternative coin types the user may have history on. Non-empty means
    /// coin-type selection is ambiguous and must be finalized per vault.
    #[serde(rename = "alternativeBIP44s", default)]
    pub alternative_bip44s: Vec<Bip44>,
    #[serde(rename = "bech32Prefix")]
    pub bech32_prefix: String,
    /// Chains that use keccak256 over an EVM address space (coin type 60)
    #[serde(rename = "evm", default)]
    pub evm: bool,
}

impl ChainInfo {
    /// Chain identifier with any trailing `-<version>` suffix stripped
    /// (`cosmoshub-4` -> `cosmoshub`).
    pub fn chain_identifier(&self) -> &str {
        chain_identifier(&self.chain_id)
    }

    /// Whether `coin_type` is the default or a listed alternative.
    pub fn is_valid_coin_type(&self, coin_type: u32) -> bool {
        self.bip44.coin_type == coin_type
            || self.alternative_bip44s.iter().any(|b| b.coin_type == coin_type)
    }
}

/// Strip a trailing `-<number>` version suffix from a chain id.
pub fn chain_identifier(chain_id: &str) -> &str {
    match chain_id.rsplit_once('-') {
        Some((base, version)) if !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => chain_id,
    }
}

/// In-memory registry of known chains.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: Vec<ChainInfo>,
}

impl ChainRegistry {
    pub fn new(chains: Vec<ChainInfo>) -> Self {
        Self { chains }
    }

    pub fn get(&self, chain_id: &str) -> Result<&ChainInfo> {
        self.chains
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or_else(|| WalletError::UnknownChain(chain_id.to_string()))
    }

    pub fn chains(&self) -> &[ChainInfo] {
        &self.chains
    }
}
