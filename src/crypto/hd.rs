//! BIP-32 hierarchical key derivation over secp256k1
//!
//! Implements just the private-key derivation needed for BIP-44 paths
//! (`m/44'/coin_type'/account'/change/address_index`).

use crate::errors::{Result, WalletError};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{NonZeroScalar, Scalar, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroizing;

const HARDENED_BIT: u32 = 0x8000_0000;

/// The non-coin-type components of a BIP-44 path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bip44Path {
    pub account: u32,
    pub change: u32,
    #[serde(rename = "addressIndex")]
    pub address_index: u32,
}

impl Bip44Path {
    pub fn new(account: u32, change: u32, address_index: u32) -> Self {
        Self {
            account,
            change,
            address_index,
        }
    }

    /// Validate path components. `change` must be 0 or 1, and account /
    /// address index must leave room for the hardened bit.
    pub fn validate(&self) -> Result<()> {
        if self.change > 1 {
            return Err(WalletError::InvalidPath(format!(
                "change must be 0 or 1, got {}",
                self.change
            )));
        }
        if self.account >= HARDENED_BIT || self.address_index >= HARDENED_BIT {
            return Err(WalletError::InvalidPath(
                "account/address index out of range".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Bip44Path {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// A BIP-32 extended private key
pub struct ExtendedKey {
    secret: SecretKey,
    chain_code: [u8; 32],
}

impl ExtendedKey {
    /// Creates the master key from a seed (HMAC-SHA512 keyed "Bitcoin seed")
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let mut hmac = Hmac::<Sha512>::new_from_slice(b"Bitcoin seed")
            .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;
        hmac.update(seed);
        let result = Zeroizing::new(hmac.finalize().into_bytes());

        let secret = SecretKey::from_slice(&result[0..32])
            .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&result[32..64]);

        Ok(Self { secret, chain_code })
    }

    /// Derives a child key. An index with the high bit set is hardened.
    pub fn derive_child(&self, index: u32) -> Result<Self> {
        let mut data = Zeroizing::new(Vec::with_capacity(37));

        if index & HARDENED_BIT != 0 {
            data.push(0);
            data.extend_from_slice(&self.secret.to_bytes());
        } else {
            let point = self.secret.public_key().to_encoded_point(true);
            data.extend_from_slice(point.as_bytes());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let mut hmac = Hmac::<Sha512>::new_from_slice(&self.chain_code)
            .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;
        hmac.update(&data);
        let result = Zeroizing::new(hmac.finalize().into_bytes());

        // IL must be a valid non-zero scalar below the curve order
        let tweak = SecretKey::from_slice(&result[0..32])
            .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;

        let tweak_scalar: Scalar = *tweak.to_nonzero_scalar();
        let parent_scalar: Scalar = *self.secret.to_nonzero_scalar();
        let child_scalar = tweak_scalar + parent_scalar;

        let child = Option::<NonZeroScalar>::from(NonZeroScalar::new(child_scalar))
            .ok_or_else(|| WalletError::DerivationFailed("derived zero scalar".to_string()))?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&result[32..64]);

        Ok(Self {
            secret: SecretKey::from(child),
            chain_code,
        })
    }

    /// Derives `m/44'/coin_type'/account'/change/address_index`.
    pub fn derive_bip44(&self, coin_type: u32, path: &Bip44Path) -> Result<Self> {
        path.validate()?;

        self.derive_child(44 | HARDENED_BIT)?
            .derive_child(coin_type | HARDENED_BIT)?
            .derive_child(path.account | HARDENED_BIT)?
            .derive_child(path.change)?
            .derive_child(path.address_index)
    }

    /// Raw 32-byte private key
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes().into())
    }

    /// Compressed public key (33 bytes)
    pub fn public_key_compressed(&self) -> [u8; 33] {
        let point = self.secret.public_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }
}
