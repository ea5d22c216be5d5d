//! Deployer engine error types.

use grid_chain::ChainError;
use grid_node::NodeError;
use grid_types::{Capacity, ResultState, TypesError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("invalid deployment: {0}")]
    Invalid(#[source] TypesError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Node(#[from] NodeError),

    // ── Pre-flight ──────────────────────────────────────────────
    #[error("could not get node {node} data from the grid proxy: {source}")]
    NodeIndex {
        node: u32,
        #[source]
        source: NodeError,
    },

    #[error("could not get farm {farm} data from the grid proxy: {source}")]
    FarmIndex {
        farm: u32,
        #[source]
        source: NodeError,
    },

    #[error("farm {0} not returned from the proxy")]
    FarmNotFound(u32),

    #[error(
        "currently, it's not possible to increase the number of reserved public ips in a deployment, node: {node}, current: {current}, requested: {requested}"
    )]
    PublicIpIncrease { node: u32, current: u32, requested: u32 },

    #[error("farm {0} does not have enough public ips")]
    NotEnoughPublicIps(u32),

    #[error("node {0} cannot deploy a fqdn workload as it does not have a public ipv4 configured")]
    FqdnWithoutIpv4(u32),

    #[error("node {0} cannot deploy a gateway name workload as it does not have a domain configured")]
    NameWithoutDomain(u32),

    #[error("node {node} does not have enough resources. needed: {needed}, free: {free}")]
    NotEnoughResources {
        node: u32,
        needed: Capacity,
        free: Capacity,
    },

    // ── Apply ───────────────────────────────────────────────────
    #[error("failed to get deployment {contract_id} of node {node}: {source}")]
    FetchDeployment {
        node: u32,
        contract_id: u64,
        #[source]
        source: NodeError,
    },

    #[error("failed to delete deployments: {0}")]
    Delete(#[source] ChainError),

    #[error("failed to delete deployment: {contract_id}: {source}")]
    Cancel {
        contract_id: u64,
        #[source]
        source: ChainError,
    },

    #[error("failed to create contracts: {0}")]
    BatchCreate(#[source] ChainError),

    #[error("failed to cancel failed contracts {ids:?}: {source}")]
    CancelFailed {
        ids: Vec<u64>,
        #[source]
        source: ChainError,
    },

    #[error("error sending deployment with contract id {contract_id} to node {node}: {source}")]
    Push {
        node: u32,
        contract_id: u64,
        #[source]
        source: NodeError,
    },

    #[error("failed to update deployment {contract_id}: {source}")]
    UpdateContract {
        contract_id: u64,
        #[source]
        source: ChainError,
    },

    #[error("failed to send deployment update request to node {node}: {source}")]
    UpdatePush {
        node: u32,
        #[source]
        source: NodeError,
    },

    #[error("error waiting deployment on node {node}: {source}")]
    Wait {
        node: u32,
        #[source]
        source: Box<DeployerError>,
    },

    // ── Wait ────────────────────────────────────────────────────
    #[error("workload {name} within deployment {contract_id} failed with error: {message}{}", state_note(.state))]
    Workload {
        name: String,
        contract_id: u64,
        state: ResultState,
        message: String,
    },

    #[error("waiting for deployment {0} timed out")]
    WaitTimeout(u64),

    #[error("deployment was cancelled")]
    Cancelled,

    // ── Revert ──────────────────────────────────────────────────
    #[error("failed to fetch deployment objects to revert deployments: {fetch}; try again: {error}")]
    RevertFetch {
        error: Box<DeployerError>,
        fetch: Box<DeployerError>,
    },

    #[error("failed to revert deployments: {revert}; try again: {error}")]
    Revert {
        error: Box<DeployerError>,
        revert: Box<DeployerError>,
    },

    #[error("{}", join(.0))]
    Multiple(Vec<DeployerError>),
}

fn state_note(state: &ResultState) -> String {
    match state {
        ResultState::Error => String::new(),
        other => format!(" (state: {other})"),
    }
}

fn join(errors: &[DeployerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DeployerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DeployerError::Chain(e)
            | DeployerError::Delete(e)
            | DeployerError::BatchCreate(e)
            | DeployerError::UpdateContract { source: e, .. } => e.is_transient(),
            DeployerError::Node(e)
            | DeployerError::FetchDeployment { source: e, .. }
            | DeployerError::Push { source: e, .. }
            | DeployerError::UpdatePush { source: e, .. } => e.is_transient(),
            DeployerError::Wait { source, .. } => source.is_transient(),
            DeployerError::Cancelled => true,
            DeployerError::Multiple(errors) => {
                !errors.is_empty() && errors.iter().all(DeployerError::is_transient)
            }
            _ => false,
        }
    }

    /// Fold collected errors: none is success, one stays as is.
    pub fn collect(mut errors: Vec<DeployerError>) -> DeployerResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(DeployerError::Multiple(errors)),
        }
    }
}

pub type DeployerResult<T> = Result<T, DeployerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_error_text() {
        let err = DeployerError::Workload {
            name: "vm".to_string(),
            contract_id: 12,
            state: ResultState::Error,
            message: "flist not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "workload vm within deployment 12 failed with error: flist not found"
        );

        let err = DeployerError::Workload {
            name: "vm".to_string(),
            contract_id: 12,
            state: ResultState::Deleted,
            message: String::new(),
        };
        assert!(err.to_string().ends_with("(state: deleted)"));
    }

    #[test]
    fn test_capacity_error_text() {
        let err = DeployerError::NotEnoughResources {
            node: 4,
            needed: Capacity { mru: 2, ..Default::default() },
            free: Capacity { mru: 1, sru: 10, ..Default::default() },
        };
        assert_eq!(
            err.to_string(),
            "node 4 does not have enough resources. needed: [mru: 2, sru: 0, hru: 0], free: [mru: 1, sru: 10, hru: 0]"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(DeployerError::Cancelled.is_transient());
        assert!(DeployerError::Node(NodeError::Unreachable(3)).is_transient());
        assert!(!DeployerError::WaitTimeout(1).is_transient());
        assert!(DeployerError::collect(Vec::new()).is_ok());
        let multi = DeployerError::Multiple(vec![DeployerError::Cancelled, DeployerError::WaitTimeout(2)]);
        assert!(!multi.is_transient());
        assert_eq!(multi.to_string(), "deployment was cancelled; waiting for deployment 2 timed out");
    }
}
