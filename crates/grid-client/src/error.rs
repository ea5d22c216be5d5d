//! Errors surfaced by the client and its deployers.

use grid_chain::ChainError;
use grid_core::CoreError;
use grid_deployer::DeployerError;
use grid_graphql::GraphQlError;
use grid_node::NodeError;
use grid_state::StateError;
use grid_workloads::WorkloadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    GraphQl(#[from] GraphQlError),

    #[error(transparent)]
    Deployer(#[from] DeployerError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("no twin associated with the account with the given mnemonic/seed: {0}")]
    NoTwin(#[source] ChainError),

    #[error("couldn't get node {node} public config: {source}")]
    PublicConfig {
        node: u32,
        #[source]
        source: NodeError,
    },

    #[error("node {0} doesn't contain a public IP in its public config")]
    NoPublicIpv4(u32),

    #[error("node {0} doesn't contain a domain on public config")]
    NoDomain(u32),

    #[error("failed to get node {node} endpoint: {source}")]
    Endpoint {
        node: u32,
        #[source]
        source: NodeError,
    },

    #[error("failed to get public node: {0}")]
    PublicNode(#[source] NodeError),

    #[error("node {node} is not part of network {network}")]
    NodeNotInNetwork { network: String, node: u32 },

    #[error("{error}; cleanup failed: {cleanup}")]
    Cleanup {
        error: Box<ClientError>,
        cleanup: Box<ClientError>,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("{}", join(.0))]
    Multiple(Vec<ClientError>),

    #[error("client is closed")]
    Closed,
}

fn join(errors: &[ClientError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ClientError {
    pub fn context(self, context: impl Into<String>) -> Self {
        ClientError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Fold collected errors: none is success, one stays as is.
    pub fn collect(mut errors: Vec<ClientError>) -> ClientResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ClientError::Multiple(errors)),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Chain(e) | ClientError::NoTwin(e) => e.is_transient(),
            ClientError::Node(e)
            | ClientError::PublicConfig { source: e, .. }
            | ClientError::Endpoint { source: e, .. } => e.is_transient(),
            ClientError::Deployer(e) => e.is_transient(),
            ClientError::Context { source, .. } => source.is_transient(),
            ClientError::Multiple(errors) => {
                !errors.is_empty() && errors.iter().all(ClientError::is_transient)
            }
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub(crate) trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> ClientResult<T>;
}

impl<T, E: Into<ClientError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> ClientResult<T> {
        self.map_err(|e| e.into().context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_and_texts() {
        assert!(ClientError::collect(Vec::new()).is_ok());
        let one = ClientError::collect(vec![ClientError::NoDomain(4)]).unwrap_err();
        assert_eq!(one.to_string(), "node 4 doesn't contain a domain on public config");

        let many = ClientError::collect(vec![ClientError::NoPublicIpv4(1), ClientError::NoDomain(2)]).unwrap_err();
        assert_eq!(
            many.to_string(),
            "node 1 doesn't contain a public IP in its public config; node 2 doesn't contain a domain on public config"
        );

        let wrapped = ClientError::NoDomain(2).context("could not deploy gateway gw");
        assert_eq!(wrapped.to_string(), "could not deploy gateway gw: node 2 doesn't contain a domain on public config");
    }

    #[test]
    fn test_transient() {
        let err = ClientError::Node(NodeError::Unreachable(3)).context("could not reach node");
        assert!(err.is_transient());
        assert!(!ClientError::Closed.is_transient());
    }
}
