//! Cryptographic utilities: digests, secp256k1 signing, HD derivation

pub mod hd;
pub mod secp;

pub use hd::{Bip44Path, ExtendedKey};
pub use secp::{
    bech32_address, checksum_address, eth_address, keccak256, sha256, validate_compressed_pubkey,
    Secp256k1KeyPair, Signature,
};

use serde::{Deserialize, Serialize};

/// Digest method applied to caller-supplied message bytes before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestMethod {
    Sha256,
    Keccak256,
}

impl DigestMethod {
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        match self {
            DigestMethod::Sha256 => sha256(data),
            DigestMethod::Keccak256 => keccak256(data),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestMethod::Sha256 => "sha256",
            DigestMethod::Keccak256 => "keccak256",
        }
    }
}
