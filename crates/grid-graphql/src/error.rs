//! Contracts index error types.

use grid_node::NodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphQlError {
    #[error("graphql url is required")]
    NoUrls,

    #[error("failed to get a working graphql url: {0}")]
    NoWorkingUrl(String),

    #[error("graphql request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("graphql returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected graphql response: {0}")]
    Response(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not parse contract id: {0}")]
    InvalidContractId(String),

    #[error("could not get deployment {contract_id} from node {node_id}: {source}")]
    Deployment {
        contract_id: u64,
        node_id: u32,
        #[source]
        source: NodeError,
    },

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("could not find any contracts: no {kind} with name {name} found")]
    ContractsNotFound { kind: String, name: String },
}

impl GraphQlError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphQlError::ContractsNotFound { .. })
    }
}

pub type GraphQlResult<T> = Result<T, GraphQlError>;
