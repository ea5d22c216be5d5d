//! grid-core: shared building blocks for the grid client.
//!
//! - [`config`]: client options, per-network endpoint defaults, TOML loading
//! - [`identity`]: the single signing identity a run acts under
//! - [`validation`]: mnemonic, URL and account-balance guards

pub mod config;
pub mod error;
pub mod identity;
pub mod validation;

pub use config::{GridConfig, KeyType, Network};
pub use error::{CoreError, CoreResult};
pub use identity::Identity;
pub use validation::{
    validate_account_balance_for_extrinsics, validate_mnemonic, MIN_BALANCE_FOR_EXTRINSICS,
};
