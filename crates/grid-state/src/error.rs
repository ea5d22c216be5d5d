//! State cache error types.

use grid_chain::ChainError;
use grid_node::NodeError;
use grid_types::TypesError;
use grid_workloads::WorkloadError;
use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("could not get node client: {node}: {source}")]
    NodeClient {
        node: u32,
        #[source]
        source: NodeError,
    },

    #[error("could not get deployment {contract_id} from node {node}: {source}")]
    FetchDeployment {
        node: u32,
        contract_id: u64,
        #[source]
        source: NodeError,
    },

    #[error("could not get contract {contract_id} from node {node}: {source}")]
    FetchContract {
        node: u32,
        contract_id: u64,
        #[source]
        source: ChainError,
    },

    #[error("contract {0} doesn't have metadata")]
    MissingMetadata(u64),

    #[error("could not get deployment {contract_id} data: {source}")]
    Metadata {
        contract_id: u64,
        #[source]
        source: TypesError,
    },

    #[error("failed to find workload '{0}'")]
    WorkloadNotFound(String),

    #[error("failed to find deployment {name} on node {node}")]
    DeploymentNotFound { name: String, node: u32 },

    #[error("failed to get network {0}")]
    NetworkNotFound(String),

    #[error("failed to get node {node} endpoint: {source}")]
    Endpoint {
        node: u32,
        #[source]
        source: NodeError,
    },

    #[error("failed to get gateway name contract {name}: {source}")]
    NameContract {
        name: String,
        #[source]
        source: ChainError,
    },

    #[error("node {node} of {name} has no subnet in network {network}")]
    MissingSubnet { name: String, node: u32, network: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<StateError>,
    },

    #[error(transparent)]
    Workload(#[from] WorkloadError),
}

impl StateError {
    /// Nothing matching was found, as opposed to a failed lookup.
    pub fn is_not_found(&self) -> bool {
        match self {
            StateError::WorkloadNotFound(_)
            | StateError::DeploymentNotFound { .. }
            | StateError::NetworkNotFound(_) => true,
            StateError::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub(crate) fn context(self, context: impl Into<String>) -> Self {
        StateError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_through_context() {
        let err = StateError::WorkloadNotFound("vm1".into())
            .context("could not get workload from node 11");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "could not get workload from node 11: failed to find workload 'vm1'"
        );
        assert!(!StateError::MissingMetadata(3).is_not_found());
    }
}
