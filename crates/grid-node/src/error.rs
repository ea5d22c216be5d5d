//! Node access error types.

use grid_chain::ChainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("rmb call '{cmd}' to twin {twin} timed out")]
    Timeout { twin: u32, cmd: String },

    #[error("twin {0} is unreachable")]
    Unreachable(u32),

    #[error("'{cmd}' failed on twin {twin}: {message}")]
    Remote { twin: u32, cmd: String, message: String },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("failed to decode '{cmd}' response: {source}")]
    Decode {
        cmd: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("grid proxy request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("grid proxy returned status {status}: {body}")]
    ProxyStatus { status: u16, body: String },

    #[error("node {0} not returned from the grid proxy")]
    NodeNotFound(u32),

    #[error("farm {0} not returned from the proxy")]
    FarmNotFound(u32),

    #[error("could not find a publicly accessible ipv4 or ipv6: {0}")]
    NoAccessibleInterface(String),

    #[error("could not find any node with options: {0}")]
    NoNodesMatching(String),

    #[error("could not find any node with free ssd pools: {ssd_gb} GB and free hdd pools: {hdd_gb} GB")]
    NoStorage { ssd_gb: u64, hdd_gb: u64 },

    #[error("no nodes with public IPv4")]
    NoPublicNode,

    #[error("no free wireguard port left on node {0}")]
    NoFreeWgPort(u32),

    #[error("could not reach node {node}: {source}")]
    NodeDown {
        node: u32,
        #[source]
        source: Box<NodeError>,
    },
}

impl NodeError {
    /// Timeouts and unreachable peers may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Timeout { .. } | NodeError::Unreachable(_) => true,
            NodeError::Http(e) => e.is_timeout() || e.is_connect(),
            NodeError::Chain(e) => e.is_transient(),
            NodeError::NodeDown { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
