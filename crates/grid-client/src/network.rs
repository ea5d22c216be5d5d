//! Network facade: turns a [`ZNet`] into one deployment per member node
//! and keeps the state cache's subnet view in step.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use futures::future::join_all;
use grid_deployer::{BatchSolutionProviders, SolutionProviders};
use grid_node::{get_public_node, NodeError};
use grid_types::{Deployment, WorkloadType};
use grid_workloads::znet::random_mycelium_key;
use grid_workloads::{endpoint_host, ZNet};
use tracing::{debug, info, warn};

use crate::client::GridClient;
use crate::error::{ClientError, ClientResult, ResultExt};

pub struct NetworkDeployer<'a> {
    client: &'a GridClient,
}

type Probe = (u32, ClientResult<(Option<IpAddr>, Vec<u16>)>);

impl<'a> NetworkDeployer<'a> {
    pub(crate) fn new(client: &'a GridClient) -> Self {
        Self { client }
    }

    /// Balance, shape and stale attributes. A public node that stopped
    /// answering is forgotten so a new one gets picked.
    pub async fn validate(&self, znet: &mut ZNet) -> ClientResult<()> {
        self.client.validate_balance().await?;
        znet.validate()?;
        znet.invalidate_broken_attributes(self.client.chain().as_ref())
            .await?;
        if znet.public_node_id != 0 && !self.is_up(znet.public_node_id).await {
            warn!(node_id = znet.public_node_id, network = %znet.name, "public node is down, picking another");
            znet.public_node_id = 0;
        }
        Ok(())
    }

    async fn is_up(&self, node: u32) -> bool {
        match self.client.pool().get_node_client(node).await {
            Ok(client) => client.is_node_up().await.is_ok(),
            Err(_) => false,
        }
    }

    /// Public endpoint (`None` for hidden nodes) and used WireGuard ports.
    async fn probe(&self, node: u32) -> ClientResult<(Option<IpAddr>, Vec<u16>)> {
        let client = self
            .client
            .pool()
            .get_node_client(node)
            .await
            .context(format!("could not get node {node} client"))?;
        let endpoint = match client.get_node_endpoint().await {
            Ok(ip) => Some(ip),
            Err(NodeError::NoAccessibleInterface(_)) => None,
            Err(source) => return Err(ClientError::Endpoint { node, source }),
        };
        let ports = client
            .network_list_wg_ports()
            .await
            .context(format!("failed to get node {node} used ports"))?;
        Ok((endpoint, ports))
    }

    /// Fill what the grid should not re-pick: subnets the state already
    /// knows, and fresh keys for nodes asking for mycelium.
    fn prefill(&self, znet: &mut ZNet) {
        for &node in &znet.nodes {
            if znet.nodes_ip_range.contains_key(&node) {
                continue;
            }
            if let Some(subnet) = self.client.state().node_subnet(&znet.name, node) {
                znet.nodes_ip_range.insert(node, subnet);
            }
        }
        for key in znet.mycelium_keys.values_mut() {
            if key.is_empty() {
                *key = random_mycelium_key();
            }
        }
    }

    /// Build deployments for every network in `znets`, probing each node
    /// once. Networks that fail to generate are reported and skipped.
    async fn generate_deployments(
        &self,
        znets: &mut [&mut ZNet],
    ) -> (HashMap<u32, Vec<Deployment>>, Vec<ClientError>) {
        let mut errors = Vec::new();
        let mut nodes = BTreeSet::new();
        for znet in znets.iter_mut() {
            self.prefill(znet);
            nodes.extend(znet.nodes.iter().copied());
            if znet.public_node_id != 0 {
                nodes.insert(znet.public_node_id);
            }
        }

        let mut endpoints: HashMap<u32, Option<IpAddr>> = HashMap::new();
        let mut used_ports: HashMap<u32, Vec<u16>> = HashMap::new();
        let probes: Vec<Probe> = join_all(nodes.iter().map(|&node| async move { (node, self.probe(node).await) })).await;
        for (node, probe) in probes {
            match probe {
                Ok((endpoint, ports)) => {
                    endpoints.insert(node, endpoint);
                    used_ports.insert(node, ports);
                }
                Err(e) => errors.push(e),
            }
        }

        let mut public_node = nodes
            .iter()
            .copied()
            .find(|node| matches!(endpoints.get(node), Some(Some(ip)) if ip.is_ipv4()))
            .unwrap_or(0);
        let needs_public = znets.iter().any(|z| z.add_wg_access || z.nodes.len() > 1);
        if public_node == 0 && needs_public {
            match get_public_node(self.client.index().as_ref(), self.client.pool(), &[]).await {
                Ok(node) => {
                    public_node = node;
                    match self.probe(node).await {
                        Ok((endpoint, ports)) => {
                            endpoints.insert(node, endpoint);
                            used_ports.insert(node, ports);
                        }
                        Err(e) => errors.push(e),
                    }
                }
                Err(e) => errors.push(ClientError::PublicNode(e)),
            }
        }
        debug!(public_node, nodes = ?nodes, "network nodes probed");

        let twin_id = self.client.twin_id();
        let mut deployments: HashMap<u32, Vec<Deployment>> = HashMap::new();
        for znet in znets.iter_mut() {
            match znet.generate_deployments(&endpoints, &mut used_ports, public_node, twin_id) {
                Ok(dls) => {
                    for (node, dl) in dls {
                        deployments.entry(node).or_default().push(dl);
                    }
                }
                Err(e) => errors.push(ClientError::from(e).context(format!("failed to generate network {}", znet.name))),
            }
        }
        (deployments, errors)
    }

    /// Deploy or update one network.
    ///
    /// The network record is updated with whatever contracts are live
    /// afterwards, even when the deploy fails.
    pub async fn deploy(&self, znet: &mut ZNet) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.validate(znet).await?;
        let _guard = self.client.lock_network(&znet.name).await;

        let (deployments, errors) = self.generate_deployments(&mut [&mut *znet]).await;
        ClientError::collect(errors).context("could not generate deployments data")?;
        let new: HashMap<u32, Deployment> = deployments
            .into_iter()
            .filter_map(|(node, dls)| dls.into_iter().next().map(|dl| (node, dl)))
            .collect();
        let solution_providers: SolutionProviders = new.keys().map(|&node| (node, None)).collect();

        let old = znet.node_deployment_id.clone();
        let outcome = self
            .client
            .deployer()
            .deploy(&old, new, &solution_providers)
            .await;
        self.client.track_contracts(&old, &outcome.current);
        znet.node_deployment_id = outcome.current;
        self.client
            .state()
            .update_network_subnets(&znet.name, &self.live_subnets(znet));
        outcome
            .result
            .context(format!("could not deploy network {}", znet.name))?;

        self.read_nodes_config(znet).await?;
        info!(network = %znet.name, nodes = ?znet.nodes, public_node = znet.public_node_id, "network deployed");
        Ok(())
    }

    /// Deploy several networks through one batched contract call. Invalid
    /// networks are skipped and reported with the rest.
    pub async fn batch_deploy(&self, znets: &mut [ZNet]) -> ClientResult<()> {
        self.client.ensure_open()?;
        let mut errors = Vec::new();
        let mut valid: Vec<&mut ZNet> = Vec::new();
        for znet in znets.iter_mut() {
            match self.validate(znet).await {
                Ok(()) => valid.push(znet),
                Err(e) => errors.push(e.context(format!("network {} is invalid", znet.name))),
            }
        }
        if valid.is_empty() {
            return ClientError::collect(errors);
        }

        let names: Vec<String> = valid.iter().map(|z| z.name.clone()).collect();
        let _guards = self.client.lock_networks(names.iter().map(String::as_str)).await;
        let (deployments, generate_errors) = self.generate_deployments(&mut valid).await;
        errors.extend(generate_errors);
        if deployments.is_empty() {
            return ClientError::collect(errors);
        }

        let outcome = self
            .client
            .deployer()
            .batch_deploy(deployments, &BatchSolutionProviders::new())
            .await;
        if let Err(e) = outcome.result {
            errors.push(e.into());
        }

        for znet in valid {
            let live: HashMap<u32, u64> = outcome
                .deployments
                .iter()
                .flat_map(|(&node, dls)| dls.iter().map(move |dl| (node, dl)))
                .filter(|(_, dl)| dl.contract_id != 0 && deployment_name(dl).as_deref() == Some(znet.name.as_str()))
                .map(|(node, dl)| (node, dl.contract_id))
                .collect();
            if live.is_empty() {
                continue;
            }
            let old = std::mem::take(&mut znet.node_deployment_id);
            self.client.track_contracts(&old, &live);
            znet.node_deployment_id = live;
            self.client
                .state()
                .update_network_subnets(&znet.name, &self.live_subnets(znet));
            if let Err(e) = self.read_nodes_config(znet).await {
                errors.push(e);
            }
        }
        ClientError::collect(errors)
    }

    /// Cancel every contract of the network and forget it.
    pub async fn cancel(&self, znet: &mut ZNet) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.client.validate_balance().await?;
        let contracts: Vec<(u32, u64)> = znet.node_deployment_id.iter().map(|(&n, &c)| (n, c)).collect();
        for (node, contract_id) in contracts {
            self.client
                .deployer()
                .cancel(contract_id)
                .await
                .context(format!("could not cancel network {}, contract {contract_id}", znet.name))?;
            znet.node_deployment_id.remove(&node);
            self.client.state().remove_contract_ids(node, &[contract_id]);
        }
        self.client.state().delete_network(&znet.name);
        reset(znet);
        info!(network = %znet.name, "network cancelled");
        Ok(())
    }

    /// Cancel all contracts of several networks with batched calls.
    pub async fn batch_cancel(&self, znets: &mut [ZNet]) -> ClientResult<()> {
        self.client.ensure_open()?;
        let ids: Vec<u64> = znets
            .iter()
            .flat_map(|z| z.node_deployment_id.values().copied())
            .filter(|&id| id != 0)
            .collect();
        self.client
            .batch_cancel_contracts(&ids)
            .await
            .context("failed to cancel network contracts")?;
        for znet in znets.iter_mut() {
            self.client.state().delete_network(&znet.name);
            znet.node_deployment_id.clear();
            reset(znet);
        }
        Ok(())
    }

    /// Refresh the computed fields from the node deployments.
    pub async fn sync(&self, znet: &mut ZNet) -> ClientResult<()> {
        self.client
            .chain()
            .delete_invalid_contracts(&mut znet.node_deployment_id)
            .await?;
        if znet.node_deployment_id.is_empty() {
            self.client.state().delete_network(&znet.name);
            reset(znet);
            return Ok(());
        }
        let deployments = self
            .client
            .deployer()
            .get_deployments(&znet.node_deployment_id)
            .await
            .context("could not get network deployment objects")?;
        let remote = ZNet::from_deployments(&deployments)?;

        let relay_only = remote.public_node_id != 0 && !znet.nodes.contains(&remote.public_node_id);
        znet.nodes = remote
            .nodes
            .iter()
            .copied()
            .filter(|&node| !(relay_only && node == remote.public_node_id))
            .collect();
        znet.description = remote.description;
        znet.keys = remote.keys;
        znet.wg_port = remote.wg_port;
        znet.nodes_ip_range = remote.nodes_ip_range;
        znet.node_deployment_id = remote.node_deployment_id;
        znet.mycelium_keys = remote.mycelium_keys;
        znet.add_wg_access = remote.add_wg_access;
        znet.external_ip = remote.external_ip;
        znet.external_sk = remote.external_sk;
        znet.public_node_id = remote.public_node_id;
        self.refresh_access_config(znet).await?;
        self.client
            .state()
            .update_network_subnets(&znet.name, &self.live_subnets(znet));
        Ok(())
    }

    async fn read_nodes_config(&self, znet: &mut ZNet) -> ClientResult<()> {
        let deployments = self
            .client
            .deployer()
            .get_deployments(&znet.node_deployment_id)
            .await
            .context("could not read node's data")?;
        znet.read_nodes_config(&deployments)?;
        Ok(())
    }

    async fn refresh_access_config(&self, znet: &mut ZNet) -> ClientResult<()> {
        if !znet.add_wg_access || znet.public_node_id == 0 {
            znet.access_wg_config.clear();
            return Ok(());
        }
        let client = self.client.pool().get_node_client(znet.public_node_id).await?;
        let endpoint = client
            .get_node_endpoint()
            .await
            .map_err(|source| ClientError::Endpoint { node: znet.public_node_id, source })?;
        znet.access_wg_config = znet.access_config(&endpoint_host(&endpoint))?.unwrap_or_default();
        Ok(())
    }

    fn live_subnets(&self, znet: &ZNet) -> HashMap<u32, grid_types::IpNet> {
        znet.nodes_ip_range
            .iter()
            .filter(|(node, _)| znet.node_deployment_id.get(node).is_some_and(|&c| c != 0))
            .map(|(&node, &subnet)| (node, subnet))
            .collect()
    }
}

fn deployment_name(dl: &Deployment) -> Option<String> {
    dl.by_type(&[WorkloadType::Network])
        .first()
        .map(|wl| wl.name.clone())
}

/// Drop everything the grid assigned to a cancelled network.
fn reset(znet: &mut ZNet) {
    znet.keys.clear();
    znet.wg_port.clear();
    znet.nodes_ip_range.clear();
    znet.access_wg_config.clear();
    znet.external_ip = None;
    znet.external_sk = None;
    znet.public_node_id = 0;
}
