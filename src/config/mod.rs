//! Configuration management for wallet-core
//!
//! Supports loading configuration from:
//! - Environment variables (WALLET_*)
//! - Config file (config.toml)

use crate::errors::{Result, WalletError};
use crate::vault::KdfParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Security configuration
    pub security: SecurityConfig,

    /// Interaction (approval UI) configuration
    pub interaction: InteractionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the persisted key-value document
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/wallet.json"),
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Argon2id memory cost in KiB
    pub kdf_memory_kib: u32,

    /// Argon2id iterations
    pub kdf_iterations: u32,

    /// Argon2id parallelism
    pub kdf_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let kdf = KdfParams::default();
        Self {
            kdf_memory_kib: kdf.memory_kib,
            kdf_iterations: kdf.iterations,
            kdf_parallelism: kdf.parallelism,
        }
    }
}

impl SecurityConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }
}

/// Interaction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    /// UI liveness probe interval in milliseconds
    pub ping_interval_ms: u64,

    /// Route external approval requests through the side panel
    pub side_panel_enabled: bool,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 500,
            side_panel_enabled: false,
        }
    }
}

impl InteractionConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(
            config::Config::try_from(&Config::default())
                .map_err(|e| WalletError::ConfigError(e.to_string()))?,
        );

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        } else {
            builder = builder.add_source(config::File::with_name("config").required(false));
        }

        // Load from environment (WALLET_INTERACTION__PING_INTERVAL_MS, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("WALLET")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| WalletError::ConfigError(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| WalletError::ConfigError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interaction.ping_interval_ms == 0 {
            return Err(WalletError::ConfigError(
                "ping_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.security.kdf_memory_kib < 8 * self.security.kdf_parallelism {
            return Err(WalletError::ConfigError(
                "kdf_memory_kib too small for the configured parallelism".to_string(),
            ));
        }
        Ok(())
    }
}
