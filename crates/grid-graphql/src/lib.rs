//! # grid-graphql
//!
//! Off-chain contract index. [`GraphQl`] speaks GraphQL over HTTP to one of
//! several endpoints; [`ContractsGetter`] narrows a twin's contracts down to
//! a project or to one named deployment.

pub mod contracts;
pub mod error;
pub mod graphql;

pub use contracts::{
    state_name, Contract, Contracts, ContractsGetter, ContractsIndex, MemoryContractsIndex,
};
pub use error::{GraphQlError, GraphQlResult};
pub use graphql::GraphQl;
