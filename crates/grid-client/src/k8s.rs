//! Kubernetes facade: a master and its workers as machines on one
//! network, one deployment per node.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use grid_deployer::{BatchSolutionProviders, SolutionProviders};
use grid_types::{Deployment, DeploymentData, IpNet, Workload};
use grid_workloads::{machine_host_ids, K8sCluster, K8sNode};
use tracing::{debug, info, warn};

use crate::client::GridClient;
use crate::error::{ClientError, ClientResult, ResultExt};

pub struct K8sDeployer<'a> {
    client: &'a GridClient,
}

impl<'a> K8sDeployer<'a> {
    pub(crate) fn new(client: &'a GridClient) -> Self {
        Self { client }
    }

    /// Every member node must already be part of the cluster's network.
    fn assign_nodes_ip_range(&self, cluster: &mut K8sCluster) -> ClientResult<()> {
        let mut ranges = HashMap::new();
        for node in cluster.node_ids() {
            let subnet = self
                .client
                .state()
                .node_subnet(&cluster.network_name, node)
                .ok_or_else(|| ClientError::NodeNotInNetwork {
                    network: cluster.network_name.clone(),
                    node,
                })?;
            ranges.insert(node, subnet);
        }
        cluster.nodes_ip_range = ranges;
        Ok(())
    }

    pub async fn validate(&self, cluster: &mut K8sCluster) -> ClientResult<()> {
        self.assign_nodes_ip_range(cluster)?;
        self.client.validate_balance().await?;
        cluster.validate()?;
        cluster.validate_ip_ranges()?;
        cluster.validate_checksum().await?;
        self.client.nodes_up(&cluster.node_ids()).await
    }

    /// Host ids in use on each member node, inside its subnet. Ids held
    /// by the cluster's own current machines are left out so an update
    /// keeps them.
    async fn used_hosts(&self, cluster: &K8sCluster) -> ClientResult<HashMap<u32, Vec<u8>>> {
        let mut previous = HashMap::new();
        for (&node, &contract_id) in &cluster.node_deployment_id {
            match self
                .client
                .deployer()
                .get_deployments(&HashMap::from([(node, contract_id)]))
                .await
            {
                Ok(found) => previous.extend(found),
                Err(error) => warn!(node_id = node, contract_id, %error, "could not read current cluster deployment"),
            }
        }
        let mut used = HashMap::new();
        for node in cluster.node_ids() {
            let Some(subnet) = cluster.nodes_ip_range.get(&node) else {
                continue;
            };
            let client = self.client.pool().get_node_client(node).await?;
            let listed = client
                .network_list_private_ips(&cluster.network_name)
                .await
                .context(format!("could not list private ips of node {node}"))?;
            let own = previous
                .get(&node)
                .map(|dl| machine_host_ids(dl, &cluster.network_name))
                .unwrap_or_default();
            let mut hosts = hosts_in(&listed, subnet);
            hosts.retain(|host| !own.contains(host));
            used.insert(node, hosts);
        }
        Ok(used)
    }

    async fn generate_deployments(
        &self,
        cluster: &mut K8sCluster,
        taken: &HashMap<u32, Vec<u8>>,
    ) -> ClientResult<HashMap<u32, Deployment>> {
        let mut used = self.used_hosts(cluster).await?;
        for (node, hosts) in taken {
            used.entry(*node).or_default().extend(hosts.iter().copied());
        }
        cluster.assign_node_ips(&used)?;
        let metadata = cluster.generate_metadata()?;
        let twin_id = self.client.twin_id();
        Ok(cluster
            .zos_workloads()
            .into_iter()
            .map(|(node, workloads)| (node, cluster_deployment(twin_id, workloads, &metadata)))
            .collect())
    }

    pub async fn deploy(&self, cluster: &mut K8sCluster) -> ClientResult<()> {
        self.client.ensure_open()?;
        cluster
            .invalidate_broken_attributes(self.client.chain().as_ref())
            .await?;
        self.validate(cluster).await?;
        let _guard = self.client.lock_network(&cluster.network_name).await;

        let new = self.generate_deployments(cluster, &HashMap::new()).await?;
        let solution_providers: SolutionProviders = new.keys().map(|&node| (node, None)).collect();
        let old = cluster.node_deployment_id.clone();
        let outcome = self
            .client
            .deployer()
            .deploy(&old, new, &solution_providers)
            .await;
        self.client.track_contracts(&old, &outcome.current);
        cluster.node_deployment_id = outcome.current;
        outcome
            .result
            .context(format!("could not deploy k8s cluster {}", cluster.master.name))?;

        self.sync(cluster).await?;
        info!(
            cluster = %cluster.master.name,
            master = %cluster.master.ip,
            workers = cluster.workers.len(),
            "k8s cluster deployed"
        );
        Ok(())
    }

    pub async fn batch_deploy(&self, clusters: &mut [K8sCluster]) -> ClientResult<()> {
        self.client.ensure_open()?;
        for cluster in clusters.iter_mut() {
            self.validate(cluster).await?;
        }
        let names: Vec<String> = clusters.iter().map(|c| c.network_name.clone()).collect();
        let _guards = self.client.lock_networks(names.iter().map(String::as_str)).await;

        let mut taken: HashMap<String, HashMap<u32, Vec<u8>>> = HashMap::new();
        let mut grouped: HashMap<u32, Vec<Deployment>> = HashMap::new();
        for cluster in clusters.iter_mut() {
            let network_taken = taken.entry(cluster.network_name.clone()).or_default();
            let deployments = self.generate_deployments(cluster, network_taken).await?;
            for member in cluster.all_nodes() {
                if let Ok(ip) = member.ip.parse::<Ipv4Addr>() {
                    network_taken.entry(member.node_id).or_default().push(ip.octets()[3]);
                }
            }
            for (node, dl) in deployments {
                grouped.entry(node).or_default().push(dl);
            }
        }

        let outcome = self
            .client
            .deployer()
            .batch_deploy(grouped, &BatchSolutionProviders::new())
            .await;
        let mut errors = Vec::new();
        if let Err(e) = outcome.result {
            errors.push(ClientError::from(e));
        }
        for cluster in clusters.iter_mut() {
            let live: HashMap<u32, u64> = outcome
                .deployments
                .iter()
                .flat_map(|(&node, dls)| dls.iter().map(move |dl| (node, dl)))
                .filter(|(_, dl)| {
                    dl.contract_id != 0
                        && DeploymentData::parse(&dl.metadata).is_ok_and(|m| m.name == cluster.master.name)
                })
                .map(|(node, dl)| (node, dl.contract_id))
                .collect();
            if live.is_empty() {
                continue;
            }
            self.client.state().store_node_deployments(&live);
            cluster.node_deployment_id = live;
            if let Err(e) = self.sync(cluster).await {
                errors.push(e);
            }
        }
        ClientError::collect(errors)
    }

    /// Cancel the contract on every member node.
    pub async fn cancel(&self, cluster: &mut K8sCluster) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.client.validate_balance().await?;
        let contracts: Vec<(u32, u64)> = cluster.node_deployment_id.iter().map(|(&n, &c)| (n, c)).collect();
        for (node, contract_id) in contracts {
            self.client
                .deployer()
                .cancel(contract_id)
                .await
                .context(format!("could not cancel k8s cluster {}, contract {contract_id}", cluster.master.name))?;
            self.client.state().remove_contract_ids(node, &[contract_id]);
            cluster.node_deployment_id.remove(&node);
        }
        for member in std::iter::once(&mut cluster.master).chain(cluster.workers.iter_mut()) {
            clear_computed(member);
        }
        info!(cluster = %cluster.master.name, "k8s cluster cancelled");
        Ok(())
    }

    /// Reload members from the nodes. Workers keep the order the caller
    /// gave them; workers found only on the grid are appended.
    pub async fn sync(&self, cluster: &mut K8sCluster) -> ClientResult<()> {
        self.client
            .chain()
            .delete_invalid_contracts(&mut cluster.node_deployment_id)
            .await?;
        if cluster.node_deployment_id.is_empty() {
            for member in std::iter::once(&mut cluster.master).chain(cluster.workers.iter_mut()) {
                clear_computed(member);
            }
            return Ok(());
        }
        let mut deployments = self
            .client
            .deployer()
            .get_deployments(&cluster.node_deployment_id)
            .await
            .context("failed to get k8s deployments")?;
        for dl in deployments.values_mut() {
            dl.workloads.retain(|wl| wl.result.state.is_okay());
        }
        let remote = K8sCluster::from_deployments(&deployments)?;
        debug!(cluster = %remote.master.name, workers = remote.workers.len(), "k8s cluster reloaded");

        cluster.master = remote.master;
        let mut workers = Vec::with_capacity(remote.workers.len());
        for mine in &cluster.workers {
            if let Some(theirs) = remote.workers.iter().find(|w| w.name == mine.name) {
                workers.push(theirs.clone());
            }
        }
        for theirs in remote.workers {
            if !workers.iter().any(|w: &K8sNode| w.name == theirs.name) {
                workers.push(theirs);
            }
        }
        cluster.workers = workers;
        cluster.token = remote.token;
        cluster.ssh_key = remote.ssh_key;
        cluster.flist = remote.flist;
        if !remote.network_name.is_empty() {
            cluster.network_name = remote.network_name;
        }
        cluster.node_deployment_id = remote.node_deployment_id;
        Ok(())
    }
}

fn cluster_deployment(twin_id: u32, workloads: Vec<Workload>, metadata: &str) -> Deployment {
    let mut dl = Deployment::new_grid_deployment(twin_id, workloads);
    dl.metadata = metadata.to_string();
    dl
}

fn hosts_in(ips: &[String], subnet: &IpNet) -> Vec<u8> {
    ips.iter()
        .filter_map(|ip| ip.parse::<Ipv4Addr>().ok())
        .filter(|ip| subnet.contains(&IpAddr::V4(*ip)))
        .map(|ip| ip.octets()[3])
        .collect()
}

fn clear_computed(member: &mut K8sNode) {
    member.computed_ip.clear();
    member.computed_ip6.clear();
    member.planetary_ip.clear();
    member.mycelium_ip.clear();
    member.console_url.clear();
}
