//! In-process cache of what this client deployed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use grid_chain::Substrate;
use grid_node::NodeClientPool;
use grid_types::IpNet;
use tracing::debug;

/// Subnets a network holds, per node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSubnets {
    pub subnets: BTreeMap<u32, IpNet>,
}

impl NetworkSubnets {
    pub fn node_subnet(&self, node_id: u32) -> Option<IpNet> {
        self.subnets.get(&node_id).copied()
    }
}

/// Contract ids known per node and subnets known per network.
///
/// Shared between facades; every accessor takes `&self`.
pub struct State {
    pub(crate) chain: Arc<dyn Substrate>,
    pub(crate) pool: Arc<NodeClientPool>,
    current_node_deployments: DashMap<u32, Vec<u64>>,
    networks: DashMap<String, NetworkSubnets>,
}

impl State {
    pub fn new(chain: Arc<dyn Substrate>, pool: Arc<NodeClientPool>) -> Self {
        Self {
            chain,
            pool,
            current_node_deployments: DashMap::new(),
            networks: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &Arc<NodeClientPool> {
        &self.pool
    }

    // ── Contracts ───────────────────────────────────────────────

    pub fn store_contract_ids(&self, node_id: u32, ids: &[u64]) {
        let mut known = self.current_node_deployments.entry(node_id).or_default();
        for &id in ids {
            if id != 0 && !known.contains(&id) {
                known.push(id);
            }
        }
    }

    pub fn remove_contract_ids(&self, node_id: u32, ids: &[u64]) {
        if let Some(mut known) = self.current_node_deployments.get_mut(&node_id) {
            known.retain(|id| !ids.contains(id));
        }
    }

    /// Drop `ids` from whichever nodes hold them.
    pub fn forget_contracts(&self, ids: &[u64]) {
        for mut entry in self.current_node_deployments.iter_mut() {
            entry.value_mut().retain(|id| !ids.contains(id));
        }
        self.current_node_deployments.retain(|_, known| !known.is_empty());
        debug!(count = ids.len(), "forgot contracts");
    }

    pub fn contract_ids(&self, node_id: u32) -> Vec<u64> {
        self.current_node_deployments
            .get(&node_id)
            .map(|known| known.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of node id → contract ids.
    pub fn current_node_deployments(&self) -> HashMap<u32, Vec<u64>> {
        self.current_node_deployments
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Record the node → contract map a facade ended up with.
    pub fn store_node_deployments(&self, contracts: &HashMap<u32, u64>) {
        for (&node, &id) in contracts {
            self.store_contract_ids(node, &[id]);
        }
    }

    // ── Networks ────────────────────────────────────────────────

    /// Known subnets of `name`; empty for an unknown network.
    pub fn network(&self, name: &str) -> NetworkSubnets {
        self.networks
            .get(name)
            .map(|n| n.value().clone())
            .unwrap_or_default()
    }

    pub fn node_subnet(&self, network: &str, node_id: u32) -> Option<IpNet> {
        self.networks.get(network).and_then(|n| n.node_subnet(node_id))
    }

    pub fn set_node_subnet(&self, network: &str, node_id: u32, subnet: IpNet) {
        self.networks
            .entry(network.to_string())
            .or_default()
            .subnets
            .insert(node_id, subnet);
    }

    /// Replace all subnets of `network`.
    pub fn update_network_subnets(&self, network: &str, subnets: &HashMap<u32, IpNet>) {
        let subnets = subnets.iter().map(|(k, v)| (*k, *v)).collect();
        self.networks
            .insert(network.to_string(), NetworkSubnets { subnets });
    }

    pub fn delete_network(&self, network: &str) {
        self.networks.remove(network);
    }
}
