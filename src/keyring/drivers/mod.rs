//! Pluggable key-ring strategies
//!
//! Each driver knows how to build vault payloads for its variant, derive a
//! public key for a coin type, and produce a signature for a digest method.
//! Hardware drivers (ledger, keystone) are public-key-only: signing happens
//! in interactive device flows outside this process.

pub mod keystone;
pub mod ledger;
pub mod mnemonic;
pub mod private_key;

pub use keystone::{KeystoneAccount, KeystoneDriver};
pub use ledger::LedgerDriver;
pub use mnemonic::MnemonicDriver;
pub use private_key::PrivateKeyDriver;

use crate::chain::ChainInfo;
use crate::crypto::{DigestMethod, Signature};
use crate::errors::Result;
use crate::keyring::KeyRingType;
use crate::security::SecureBytes;
use crate::vault::Vault;

/// A driver strategy for one key-ring variant.
///
/// `decrypted` is the vault's sensitive payload, supplied by the service
/// when the store is unlocked; hardware drivers never receive or need it.
pub trait KeyRingDriver: Send + Sync {
    fn key_ring_type(&self) -> KeyRingType;

    /// Deterministically derive the compressed public key for a coin type.
    fn get_pub_key(
        &self,
        vault: &Vault,
        decrypted: Option<&SecureBytes>,
        coin_type: u32,
        chain: &ChainInfo,
    ) -> Result<[u8; 33]>;

    /// Hash `message` with `digest_method` and sign the digest.
    fn sign(
        &self,
        vault: &Vault,
        decrypted: Option<&SecureBytes>,
        coin_type: u32,
        message: &[u8],
        digest_method: DigestMethod,
        chain: &ChainInfo,
    ) -> Result<Signature>;
}

pub(crate) fn require_decrypted<'a>(
    decrypted: Option<&'a SecureBytes>,
) -> Result<&'a SecureBytes> {
    decrypted.ok_or(crate::errors::WalletError::Locked)
}
