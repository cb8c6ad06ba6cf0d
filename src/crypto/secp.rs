//! secp256k1 signing and address derivation
//!
//! Provides:
//! - Key pairs from raw 32-byte secrets
//! - Recoverable ECDSA over caller-supplied digests
//! - EVM address derivation with EIP-55 checksums
//! - Bech32 account addresses for cosmos-style chains

use crate::errors::{Result, WalletError};
use bech32::{ToBase32, Variant};
use k256::{
    ecdsa::SigningKey,
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey, SecretKey,
};
use ripemd::Ripemd160;
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::Keccak256;

/// secp256k1 key pair
pub struct Secp256k1KeyPair {
    signing_key: SigningKey,
}

impl Secp256k1KeyPair {
    /// Create from raw private key bytes (32 bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(WalletError::InvalidKeyFormat(format!(
                "Expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Get the public key (compressed, 33 bytes)
    pub fn public_key_compressed(&self) -> [u8; 33] {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Get the public key (uncompressed, 65 bytes with 0x04 prefix)
    pub fn public_key_uncompressed(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Sign a 32-byte digest, producing a recoverable signature
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;

        Ok(Signature {
            r: signature.r().to_bytes().to_vec(),
            s: signature.s().to_bytes().to_vec(),
            v: recovery_id.to_byte(),
        })
    }
}

/// Recoverable ECDSA signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
    pub v: u8,
}

impl Signature {
    /// Get the full signature bytes (65 bytes: r || s || v)
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut sig = [0u8; 65];
        sig[0..32].copy_from_slice(&self.r);
        sig[32..64].copy_from_slice(&self.s);
        sig[64] = self.v;
        sig
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Compute keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Compute sha256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Validate that a byte blob decodes to a valid compressed secp256k1 point.
pub fn validate_compressed_pubkey(bytes: &[u8]) -> Result<[u8; 33]> {
    if bytes.len() != 33 {
        return Err(WalletError::InvalidKeyFormat(format!(
            "Expected 33-byte compressed point, got {} bytes",
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?;

    let mut out = [0u8; 33];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Derive the EVM address (20 bytes) from a compressed public key.
pub fn eth_address(compressed: &[u8; 33]) -> Result<[u8; 20]> {
    let pubkey = PublicKey::from_sec1_bytes(compressed)
        .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?;
    let uncompressed = pubkey.to_encoded_point(false);

    // Skip the 0x04 prefix and hash the remaining 64 bytes
    let hash = keccak256(&uncompressed.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Ok(address)
}

/// Convert an address to checksummed format (EIP-55)
pub fn checksum_address(address: &[u8; 20]) -> String {
    let addr_hex = hex::encode(address);
    let hash = hex::encode(keccak256(addr_hex.as_bytes()));

    let mut result = String::with_capacity(42);
    result.push_str("0x");

    for (i, c) in addr_hex.chars().enumerate() {
        if c.is_ascii_alphabetic() {
            let hash_char = hash.as_bytes()[i];
            if hash_char >= b'8' {
                result.push(c.to_ascii_uppercase());
            } else {
                result.push(c);
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Derive a bech32 account address: `bech32(prefix, ripemd160(sha256(pub)))`.
pub fn bech32_address(prefix: &str, compressed: &[u8; 33]) -> Result<String> {
    let sha = Sha256::digest(compressed);
    let hash = Ripemd160::digest(sha);

    bech32::encode(prefix, hash.to_base32(), Variant::Bech32)
        .map_err(|e| WalletError::InternalError(format!("bech32 encode: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_and_sign() {
        let private_key =
            hex::decode("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .unwrap();
        let keypair = Secp256k1KeyPair::from_bytes(&private_key).unwrap();

        let digest = keccak256(b"hello");
        let sig = keypair.sign_digest(&digest).unwrap();
        assert_eq!(sig.r.len(), 32);
        assert_eq!(sig.s.len(), 32);
        assert!(sig.v <= 1);
        assert_eq!(sig.to_bytes().len(), 65);
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert!(Secp256k1KeyPair::from_bytes(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_address_checksum() {
        // Test vector from EIP-55
        let addr = hex::decode("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        let mut address = [0u8; 20];
        address.copy_from_slice(&addr);

        assert_eq!(
            checksum_address(&address),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    #[test]
    fn test_validate_compressed_pubkey() {
        let keypair = Secp256k1KeyPair::from_bytes(&[7u8; 32]).unwrap();
        let compressed = keypair.public_key_compressed();
        assert!(validate_compressed_pubkey(&compressed).is_ok());

        let mut junk = compressed;
        junk[0] = 0x05; // invalid SEC1 tag
        assert!(validate_compressed_pubkey(&junk).is_err());
        assert!(validate_compressed_pubkey(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_bech32_address_shape() {
        let keypair = Secp256k1KeyPair::from_bytes(&[9u8; 32]).unwrap();
        let addr = bech32_address("cosmos", &keypair.public_key_compressed()).unwrap();
        assert!(addr.starts_with("cosmos1"));

        let (hrp, _, _) = bech32::decode(&addr).unwrap();
        assert_eq!(hrp, "cosmos");
    }
}
