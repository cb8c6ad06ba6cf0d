//! wallet-core: multi-chain wallet key management
//!
//! An embeddable core for a multi-chain wallet: an encrypted multi-vault
//! store gated by one user password, pluggable key-ring strategies
//! (mnemonic, private key, ledger, keystone), per-chain BIP-44 coin-type
//! finalization, legacy keystore migration, and an approval broker that
//! suspends callers until a UI surface resolves their request.
//!
//! The embedding process supplies persistence (or uses [`storage::FileKvStore`]),
//! the known-chain registry, and an [`interaction::InteractionTransport`]
//! bridging to its UI surfaces.

pub mod api;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod interaction;
pub mod keyring;
pub mod security;
pub mod storage;
pub mod vault;

pub use api::{MsgRouter, WalletMsg};
pub use chain::{Bip44, ChainInfo, ChainRegistry};
pub use config::Config;
pub use errors::{Result, WalletError};
pub use interaction::{InteractionEnv, InteractionService, InteractionTransport};
pub use keyring::{KeyInfo, KeyRingService, KeyRingStatus, KeyRingType};
pub use vault::{KdfParams, VaultStore};

/// Initialize tracing from `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
