//! Process-wide cache of node clients.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use grid_chain::Substrate;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::NodeClient;
use crate::error::{NodeError, NodeResult};
use crate::rmb::RmbClient;

/// Maps node ids to clients, resolving each node's twin on chain once.
///
/// Concurrent first lookups of the same node share one chain query.
pub struct NodeClientPool {
    chain: Arc<dyn Substrate>,
    bus: Arc<dyn RmbClient>,
    timeout: Duration,
    clients: DashMap<u32, Arc<OnceCell<NodeClient>>>,
}

impl NodeClientPool {
    pub fn new(chain: Arc<dyn Substrate>, bus: Arc<dyn RmbClient>, timeout: Duration) -> Self {
        Self {
            chain,
            bus,
            timeout,
            clients: DashMap::new(),
        }
    }

    pub async fn get_node_client(&self, node_id: u32) -> NodeResult<NodeClient> {
        let cell = self.clients.entry(node_id).or_default().clone();
        let client = cell
            .get_or_try_init(|| async {
                let twin = self.chain.get_node_twin(node_id).await?;
                debug!(node_id, twin_id = twin, "resolved node twin");
                Ok::<_, NodeError>(NodeClient::new(twin, self.bus.clone(), self.timeout))
            })
            .await?;
        Ok(client.clone())
    }

    /// Number of nodes with a resolved client.
    pub fn len(&self) -> usize {
        self.clients.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fail with the first node that does not answer `system.version`.
pub async fn are_nodes_up(pool: &NodeClientPool, nodes: &[u32]) -> NodeResult<()> {
    for &node in nodes {
        let client = pool.get_node_client(node).await?;
        client
            .is_node_up()
            .await
            .map_err(|e| NodeError::NodeDown { node, source: Box::new(e) })?;
    }
    Ok(())
}
