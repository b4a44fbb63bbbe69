//! Kernel configuration module.
//!
//! This module provides configuration loading for the tunestore kernel from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `TUNESTORE_INITIAL_HASH_SIZE`: Initial slot count of each hash index (default: `64`)
//! - `TUNESTORE_BLOCK_SIZE`: Initial arena capacity and growth step in bytes (default: `256`)
//!
//! # Invariants
//!
//! - `initial_hash_size >= 1`
//! - `block_size >= 3`, room for at least one record header

use crate::storage::RECORD_HEADER_SIZE;

/// Kernel configuration.
///
/// # Post-conditions
///
/// Fields are private, so every value outside this module went through
/// `new`, `from_env` or `Default` and satisfies the invariants listed in
/// the module documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    initial_hash_size: usize,
    block_size: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            initial_hash_size: Self::DEFAULT_INITIAL_HASH_SIZE,
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }
}

impl KernelConfig {
    /// Default initial hash index size.
    pub const DEFAULT_INITIAL_HASH_SIZE: usize = 64;
    /// Default arena block size.
    pub const DEFAULT_BLOCK_SIZE: usize = 256;

    const HASH_SIZE_VAR: &'static str = "TUNESTORE_INITIAL_HASH_SIZE";
    const BLOCK_SIZE_VAR: &'static str = "TUNESTORE_BLOCK_SIZE";

    /// Create a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial_hash_size` is zero or `block_size` cannot
    /// hold a record header.
    pub fn new(initial_hash_size: usize, block_size: usize) -> Result<Self, ConfigError> {
        check_minimum(Self::HASH_SIZE_VAR, initial_hash_size, 1)?;
        check_minimum(Self::BLOCK_SIZE_VAR, block_size, RECORD_HEADER_SIZE)?;
        Ok(Self {
            initial_hash_size,
            block_size,
        })
    }

    /// Slot count each hash index starts with and returns to on `clear`.
    #[must_use]
    pub const fn initial_hash_size(&self) -> usize {
        self.initial_hash_size
    }

    /// Arena capacity at creation, and the step it grows by.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not a number, or is below
    /// its minimum.
    pub fn from_env() -> Result<Self, ConfigError> {
        let initial_hash_size = load_usize(
            Self::HASH_SIZE_VAR,
            std::env::var(Self::HASH_SIZE_VAR).ok().as_deref(),
            Self::DEFAULT_INITIAL_HASH_SIZE,
        )?;
        let block_size = load_usize(
            Self::BLOCK_SIZE_VAR,
            std::env::var(Self::BLOCK_SIZE_VAR).ok().as_deref(),
            Self::DEFAULT_BLOCK_SIZE,
        )?;

        Self::new(initial_hash_size, block_size)
    }
}

/// Parse one numeric setting, falling back to `default` when unset.
fn load_usize(name: &str, value: Option<&str>, default: usize) -> Result<usize, ConfigError> {
    match value {
        Some(value) => value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a valid size"),
        }),
        None => Ok(default),
    }
}

fn check_minimum(name: &str, value: usize, minimum: usize) -> Result<(), ConfigError> {
    if value < minimum {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("{value} is below the minimum of {minimum}"),
        });
    }
    Ok(())
}
