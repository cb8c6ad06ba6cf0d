//! Security utilities for handling decrypted key material
//!
//! This module provides:
//! - Memory zeroization to securely erase sensitive data
//! - Wrappers that keep secrets out of Debug/log output

pub mod zeroize;

pub use zeroize::{SecureBytes, SecureString, SecretBytes, new_secret};
