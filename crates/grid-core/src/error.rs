//! Core error types.

use thiserror::Error;

/// Errors raised while loading configuration, deriving identities, or
/// checking user input.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid network '{0}', must be one of dev, qa, test, main")]
    InvalidNetwork(String),

    #[error("invalid key type '{0}', must be one of ed25519, sr25519")]
    InvalidKeyType(String),

    #[error("invalid mnemonic or seed: {0}")]
    InvalidMnemonic(String),

    #[error("invalid {kind} url '{url}'")]
    InvalidUrl { kind: &'static str, url: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("account contains {balance} tft, min fee is 2 tft")]
    InsufficientBalance { balance: f64 },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to encode config: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
