//! # grid-chain
//!
//! The on-chain surface the client depends on: twins, balances, and the
//! node / name / rent contracts that authorize resource use on nodes.
//!
//! [`Substrate`] is the seam. [`MemoryChain`] is an in-process ledger
//! implementing it, used by tests and local runs.

pub mod error;
pub mod memory;
pub mod substrate;
pub mod types;

pub use error::{ChainError, ChainResult};
pub use memory::{ChainCalls, ChainOp, MemoryChain};
pub use substrate::Substrate;
pub use types::{
    Balance, BatchCreateContractData, BatchCreateResult, Contract, ContractState, ContractType,
    NameContract, NodeContract, RentContract,
};
