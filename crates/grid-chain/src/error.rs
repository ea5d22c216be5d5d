//! Chain error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("ContractNotExists: contract {0} does not exist")]
    ContractNotExists(u64),

    #[error("twin not found for public key {0}")]
    TwinNotFound(String),

    #[error("node {0} not found")]
    NodeNotFound(u32),

    #[error("NameExists: name '{0}' is already reserved")]
    NameExists(String),

    #[error("contract {contract_id} is not owned by twin {twin_id}")]
    NotOwner { contract_id: u64, twin_id: u32 },

    #[error("contract {0} is not a node contract")]
    NotNodeContract(u64),

    #[error("extrinsic not yet included in a block")]
    NotYetIncluded,

    #[error("extrinsic rejected: {0}")]
    Rejected(String),

    #[error("substrate connection is closed")]
    Closed,
}

impl ChainError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::NotYetIncluded)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainError::ContractNotExists(_))
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
