//! Error types for wallet-core

use thiserror::Error;

/// Main error type for wallet-core operations
#[derive(Error, Debug)]
pub enum WalletError {
    // Vault store errors
    #[error("Vault store is locked")]
    Locked,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Already signed up")]
    AlreadySignedUp,

    #[error("Not signed up")]
    NotSignedUp,

    #[error("Unknown vault: {0}")]
    UnknownVault(String),

    // Key-ring errors
    #[error("Coin type already finalized for chain {0}")]
    AlreadyFinalized(String),

    #[error("Coin type {coin_type} is not valid for chain {chain_id}")]
    CoinTypeMismatch { chain_id: String, coin_type: u32 },

    #[error("Key-ring type {0} does not support coin type finalization")]
    NotFinalizable(String),

    #[error("Public key not found for {0}")]
    PubKeyNotFound(String),

    #[error("Key-ring type {0} cannot sign outside an interactive device flow")]
    SigningNotSupported(String),

    #[error("Key-ring type {0} has no exportable sensitive data")]
    NoSensitiveData(String),

    #[error("Invalid BIP-44 path: {0}")]
    InvalidPath(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    // Migration errors
    #[error("Migration is already running")]
    AlreadyMigrating,

    // Interaction errors
    #[error("Interaction id already in use: {0}")]
    IdInUse(String),

    #[error("Request rejected")]
    RequestRejected,

    // Cryptographic errors
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    // Storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WalletError {
    /// Whether this error is a normal user action (explicit reject or a UI
    /// surface going away) rather than a genuine failure. Callers must
    /// suppress retries and error surfaces for these.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, WalletError::RequestRejected)
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::StorageError(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for WalletError {
    fn from(err: hex::FromHexError) -> Self {
        WalletError::InvalidKeyFormat(format!("Hex decode error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
