//! Rebuilding user-facing structs from what the nodes hold.
//!
//! Every loader looks only at contracts already recorded in the [`State`].
//! Deployment names come from the metadata the node returns, or from the
//! contract's on-chain `deployment_data` when the node returns none.

use std::collections::HashMap;

use grid_node::NodeClient;
use grid_types::{Deployment, DeploymentData, Workload, WorkloadType};
use grid_workloads::{
    endpoint_host, Disk, GatewayFqdnProxy, GatewayNameProxy, K8sCluster, Qsfs, Vm, VmDeployment,
    ZNet, Zdb,
};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::state::State;

impl State {
    async fn node_client(&self, node_id: u32) -> StateResult<NodeClient> {
        self.pool
            .get_node_client(node_id)
            .await
            .map_err(|source| StateError::NodeClient { node: node_id, source })
    }

    /// Fetch a deployment and make sure its metadata is set.
    async fn fetch_deployment(
        &self,
        client: &NodeClient,
        node_id: u32,
        contract_id: u64,
    ) -> StateResult<(Deployment, DeploymentData)> {
        let mut dl = client
            .deployment_get(contract_id)
            .await
            .map_err(|source| StateError::FetchDeployment { node: node_id, contract_id, source })?;

        if dl.metadata.trim().is_empty() {
            let contract = self
                .chain
                .get_contract(contract_id)
                .await
                .map_err(|source| StateError::FetchContract { node: node_id, contract_id, source })?;
            dl.metadata = contract
                .node_contract()
                .map(|c| c.deployment_data.clone())
                .unwrap_or_default();
            if dl.metadata.trim().is_empty() {
                return Err(StateError::MissingMetadata(contract_id));
            }
            debug!(node_id, contract_id, "using on-chain deployment data");
        }

        let data = DeploymentData::parse(&dl.metadata)
            .map_err(|source| StateError::Metadata { contract_id, source })?;
        Ok((dl, data))
    }

    /// The deployment named `deployment_name` among the node's known
    /// contracts.
    pub async fn get_deployment(&self, node_id: u32, deployment_name: &str) -> StateResult<Deployment> {
        let ids = self.contract_ids(node_id);
        if ids.is_empty() {
            return Err(StateError::DeploymentNotFound {
                name: deployment_name.to_string(),
                node: node_id,
            });
        }
        let client = self.node_client(node_id).await?;
        for contract_id in ids {
            let (dl, data) = self.fetch_deployment(&client, node_id, contract_id).await?;
            if data.name == deployment_name {
                return Ok(dl);
            }
        }
        Err(StateError::DeploymentNotFound {
            name: deployment_name.to_string(),
            node: node_id,
        })
    }

    /// Workload `name` inside the deployment named `deployment_name`.
    pub async fn get_workload_in_deployment(
        &self,
        node_id: u32,
        name: &str,
        deployment_name: &str,
    ) -> StateResult<(Workload, Deployment)> {
        let ids = self.contract_ids(node_id);
        if ids.is_empty() {
            return Err(StateError::DeploymentNotFound {
                name: deployment_name.to_string(),
                node: node_id,
            });
        }
        let client = self.node_client(node_id).await?;
        for contract_id in ids {
            let (dl, data) = self.fetch_deployment(&client, node_id, contract_id).await?;
            if data.name != deployment_name {
                continue;
            }
            if let Some(wl) = dl.workloads.iter().find(|w| w.name == name).cloned() {
                return Ok((wl, dl));
            }
        }
        Err(StateError::WorkloadNotFound(name.to_string()))
    }

    async fn workload_on(&self, node_id: u32, name: &str, deployment_name: &str) -> StateResult<(Workload, Deployment)> {
        self.get_workload_in_deployment(node_id, name, deployment_name)
            .await
            .map_err(|e| e.context(format!("could not get workload from node {node_id}")))
    }

    // ── Single workloads ────────────────────────────────────────

    pub async fn load_disk_from_grid(&self, node_id: u32, name: &str, deployment_name: &str) -> StateResult<Disk> {
        let (wl, _) = self.workload_on(node_id, name, deployment_name).await?;
        Ok(Disk::from_workload(&wl)?)
    }

    pub async fn load_zdb_from_grid(&self, node_id: u32, name: &str, deployment_name: &str) -> StateResult<Zdb> {
        let (wl, _) = self.workload_on(node_id, name, deployment_name).await?;
        Ok(Zdb::from_workload(&wl)?)
    }

    pub async fn load_qsfs_from_grid(&self, node_id: u32, name: &str, deployment_name: &str) -> StateResult<Qsfs> {
        let (wl, _) = self.workload_on(node_id, name, deployment_name).await?;
        Ok(Qsfs::from_workload(&wl)?)
    }

    pub async fn load_vm_from_grid(&self, node_id: u32, name: &str, deployment_name: &str) -> StateResult<Vm> {
        let (wl, dl) = self.workload_on(node_id, name, deployment_name).await?;
        Ok(Vm::from_workload(&wl, &dl, node_id)?)
    }

    pub async fn load_gateway_fqdn_from_grid(
        &self,
        node_id: u32,
        name: &str,
        deployment_name: &str,
    ) -> StateResult<GatewayFqdnProxy> {
        let (wl, dl) = self.workload_on(node_id, name, deployment_name).await?;
        let mut gw = GatewayFqdnProxy::from_workload(&wl)?;
        gw.node_id = node_id;
        gw.contract_id = dl.contract_id;
        gw.node_deployment_id = HashMap::from([(node_id, dl.contract_id)]);
        gw.solution_type = DeploymentData::parse(&dl.metadata)
            .map(|d| d.project_name)
            .unwrap_or_default();
        Ok(gw)
    }

    /// A name gateway lives in a deployment of the same name.
    pub async fn load_gateway_name_from_grid(&self, node_id: u32, name: &str) -> StateResult<GatewayNameProxy> {
        let (wl, dl) = self.workload_on(node_id, name, name).await?;
        let name_contract_id = self
            .chain
            .get_contract_id_by_name_registration(name)
            .await
            .map_err(|source| StateError::NameContract { name: name.to_string(), source })?;
        let mut gw = GatewayNameProxy::from_workload(&wl)?;
        gw.node_id = node_id;
        gw.name_contract_id = name_contract_id;
        gw.contract_id = dl.contract_id;
        gw.node_deployment_id = HashMap::from([(node_id, dl.contract_id)]);
        gw.solution_type = DeploymentData::parse(&dl.metadata)
            .map(|d| d.project_name)
            .unwrap_or_default();
        Ok(gw)
    }

    // ── Composites ──────────────────────────────────────────────

    /// Merge the `name` network workloads of every known node. Records
    /// the subnets in the cache.
    pub async fn load_network_from_grid(&self, name: &str) -> StateResult<ZNet> {
        let mut member_deployments: HashMap<u32, Deployment> = HashMap::new();
        for (node_id, ids) in self.current_node_deployments() {
            let client = self.node_client(node_id).await?;
            for contract_id in ids {
                let (mut dl, _) = self
                    .fetch_deployment(&client, node_id, contract_id)
                    .await
                    .map_err(|e| e.context(format!("could not get network deployment {contract_id} from node {node_id}")))?;
                let has_network = dl
                    .workloads
                    .iter()
                    .any(|w| w.workload_type() == WorkloadType::Network && w.name == name);
                if has_network {
                    dl.workloads.retain(|w| w.workload_type() == WorkloadType::Network && w.name == name);
                    member_deployments.insert(node_id, dl);
                    break;
                }
            }
        }
        if member_deployments.is_empty() {
            return Err(StateError::NetworkNotFound(name.to_string()));
        }

        let mut znet = ZNet::from_deployments(&member_deployments)?;
        if znet.add_wg_access && znet.public_node_id != 0 {
            let client = self.node_client(znet.public_node_id).await?;
            let endpoint = client
                .get_node_endpoint()
                .await
                .map_err(|source| StateError::Endpoint { node: znet.public_node_id, source })?;
            znet.access_wg_config = znet
                .access_config(&endpoint_host(&endpoint))?
                .unwrap_or_default();
        }
        self.update_network_subnets(&znet.name, &znet.nodes_ip_range);
        debug!(network = name, count = znet.nodes.len(), "loaded network");
        Ok(znet)
    }

    /// All machines, disks, zdbs and qsfs of the deployment `name`.
    pub async fn load_deployment_from_grid(&self, node_id: u32, name: &str) -> StateResult<VmDeployment> {
        let dl = self.get_deployment(node_id, name).await?;
        let mut out = VmDeployment::from_zos_deployment(&dl, node_id)?;
        if out.network_name.is_empty() {
            return Ok(out);
        }
        let network = out.network_name.clone();
        self.load_network_from_grid(&network)
            .await
            .map_err(|e| e.context(format!("failed to load network {network}")))?;
        out.ip_range = self
            .node_subnet(&network, node_id)
            .map(|s| s.to_string())
            .unwrap_or_default();
        Ok(out)
    }

    /// A cluster spread over `node_ids`, each holding a deployment named
    /// `deployment_name`. Node subnets come from the cluster's network.
    pub async fn load_k8s_from_grid(&self, node_ids: &[u32], deployment_name: &str) -> StateResult<K8sCluster> {
        let mut deployments = HashMap::new();
        for &node_id in node_ids {
            let dl = self
                .get_deployment(node_id, deployment_name)
                .await
                .map_err(|e| e.context(format!("could not get deployment {deployment_name}")))?;
            deployments.insert(node_id, dl);
        }
        let mut cluster = K8sCluster::from_deployments(&deployments)?;

        let network = cluster.network_name.clone();
        self.load_network_from_grid(&network)
            .await
            .map_err(|e| e.context(format!("failed to load network {network}")))?;
        let members: Vec<(String, u32)> = cluster.all_nodes().map(|n| (n.name.clone(), n.node_id)).collect();
        for (member, node_id) in members {
            let subnet = self.node_subnet(&network, node_id).ok_or_else(|| StateError::MissingSubnet {
                name: member,
                node: node_id,
                network: network.clone(),
            })?;
            cluster.nodes_ip_range.insert(node_id, subnet);
        }
        Ok(cluster)
    }
}
