//! Kubernetes (k3s) clusters: one master and any number of workers, each a
//! machine with its own data disk, joined through one overlay network.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use grid_chain::Substrate;
use grid_types::metadata::KIND_K8S;
use grid_types::{
    Deployment, DeploymentData, IpNet, MachineCapacity, MachineInterface, MachineMount,
    MachineNetwork, MyceliumIp, Workload, WorkloadData, WorkloadType, ZMachine, ZMount, GIGABYTE,
    MEGABYTE,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ResultExt, WorkloadError, WorkloadsResult};
use crate::flist::{validate_flist, validate_flist_extension};
use crate::name::validate_name;
use crate::vm::{
    assign_host_ip, machine_result, public_ip_of, public_ip_workload, validate_mycelium_seed,
    FIRST_HOST_ID,
};

pub const K3S_ENTRYPOINT: &str = "/sbin/zinit init";
pub const K3S_DATA_DIR: &str = "/mydisk";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sNode {
    pub name: String,
    pub node_id: u32,
    pub disk_size_gb: u64,
    #[serde(default)]
    pub public_ip: bool,
    #[serde(default)]
    pub public_ip6: bool,
    #[serde(default)]
    pub planetary: bool,
    #[serde(default)]
    pub mycelium_ip_seed: Vec<u8>,
    /// Private overlay IP; assigned on deploy when empty.
    #[serde(default)]
    pub ip: String,
    pub cpu: u8,
    pub memory_mb: u64,

    // Computed
    #[serde(default)]
    pub computed_ip: String,
    #[serde(default)]
    pub computed_ip6: String,
    #[serde(default)]
    pub planetary_ip: String,
    #[serde(default)]
    pub mycelium_ip: String,
    #[serde(default)]
    pub console_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sCluster {
    pub master: K8sNode,
    #[serde(default)]
    pub workers: Vec<K8sNode>,
    pub token: String,
    pub network_name: String,
    pub flist: String,
    #[serde(default)]
    pub flist_checksum: String,
    #[serde(default)]
    pub solution_type: String,
    #[serde(default)]
    pub ssh_key: String,

    // Computed
    #[serde(default)]
    pub nodes_ip_range: HashMap<u32, IpNet>,
    #[serde(default)]
    pub node_deployment_id: HashMap<u32, u64>,
}

impl K8sNode {
    pub fn disk_name(&self) -> String {
        format!("{}disk", self.name)
    }

    pub fn public_ip_name(&self) -> String {
        format!("{}ip", self.name)
    }

    /// Rebuild a cluster member from its machine workload inside `dl`.
    pub fn from_workload(wl: &Workload, dl: &Deployment, node_id: u32) -> WorkloadsResult<Self> {
        let data = wl.zmachine()?;
        let result = machine_result(wl)?;
        let (flags, public) = public_ip_of(dl, &data.network.public_ip)
            .context("failed to get public ip workload")?;
        let disk_size_gb = data
            .mounts
            .first()
            .and_then(|m| dl.get(&m.name).ok())
            .and_then(|disk| disk.zmount().ok())
            .map(|z| z.size / GIGABYTE)
            .unwrap_or_default();

        Ok(Self {
            name: wl.name.clone(),
            node_id,
            disk_size_gb,
            public_ip: flags.v4,
            public_ip6: flags.v6,
            planetary: data.network.planetary,
            mycelium_ip_seed: data
                .network
                .mycelium
                .as_ref()
                .map(|m| m.hex_seed.clone())
                .unwrap_or_default(),
            ip: data
                .network
                .interfaces
                .first()
                .map(|i| i.ip.to_string())
                .unwrap_or_default(),
            cpu: data.compute_capacity.cpu,
            memory_mb: data.compute_capacity.memory / MEGABYTE,
            computed_ip: public.ip.map(|ip| ip.to_string()).unwrap_or_default(),
            computed_ip6: public.ipv6.map(|ip| ip.to_string()).unwrap_or_default(),
            planetary_ip: result.planetary_ip,
            mycelium_ip: result.mycelium_ip,
            console_url: result.console_url,
        })
    }

    fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("node name is invalid")?;
        if self.node_id == 0 {
            return Err(WorkloadError::invalid(format!(
                "node ID of {} should be a positive integer not zero",
                self.name
            )));
        }
        validate_mycelium_seed(&self.mycelium_ip_seed)
    }
}

impl K8sCluster {
    /// Master first, then workers in order.
    pub fn all_nodes(&self) -> impl Iterator<Item = &K8sNode> {
        std::iter::once(&self.master).chain(self.workers.iter())
    }

    /// Distinct node ids hosting the cluster, sorted.
    pub fn node_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.all_nodes().map(|n| n.node_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn validate_token(&self) -> WorkloadsResult<()> {
        if self.token.len() < 6 {
            return Err(WorkloadError::invalid("token must be at least 6 characters"));
        }
        if self.token.len() > 15 {
            return Err(WorkloadError::invalid("token must be at most 15 characters"));
        }
        let re = Regex::new(r"^[a-zA-Z0-9]+$")?;
        if !re.is_match(&self.token) {
            return Err(WorkloadError::invalid("token should be alphanumeric"));
        }
        Ok(())
    }

    pub fn validate_names(&self) -> WorkloadsResult<()> {
        let mut seen = std::collections::HashSet::new();
        for node in self.all_nodes() {
            if !seen.insert(node.name.as_str()) {
                return Err(WorkloadError::invalid(format!(
                    "k8s workers and master must have unique names: {} occurred more than once",
                    node.name
                )));
            }
        }
        Ok(())
    }

    /// Every member's node has a subnet in the network, and any requested
    /// IP lies inside it.
    pub fn validate_ip_ranges(&self) -> WorkloadsResult<()> {
        if !self.nodes_ip_range.contains_key(&self.master.node_id) {
            return Err(WorkloadError::invalid(format!(
                "the master node {} does not exist in the network's ip ranges",
                self.master.node_id
            )));
        }
        for worker in &self.workers {
            if !self.nodes_ip_range.contains_key(&worker.node_id) {
                return Err(WorkloadError::invalid(format!(
                    "the node with id {} in worker {} does not exist in the network's ip ranges",
                    worker.node_id, worker.name
                )));
            }
        }
        for node in self.all_nodes() {
            if node.ip.is_empty() {
                continue;
            }
            let inside = node
                .ip
                .parse::<IpAddr>()
                .ok()
                .zip(self.nodes_ip_range.get(&node.node_id))
                .is_some_and(|(ip, subnet)| subnet.contains(&ip));
            if !inside {
                return Err(WorkloadError::invalid(format!(
                    "ip {} of {} is not inside the ip range of node {}",
                    node.ip, node.name, node.node_id
                )));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.network_name).context("network name is invalid")?;
        validate_flist_extension(&self.flist)?;
        self.validate_token()?;
        self.validate_names()?;
        for node in self.all_nodes() {
            node.validate()?;
        }
        Ok(())
    }

    /// Check the flist against its published md5 when a checksum is set.
    pub async fn validate_checksum(&self) -> WorkloadsResult<()> {
        validate_flist(&self.flist, &self.flist_checksum)
            .await
            .context(format!("failed to validate flist of k8s master '{}'", self.master.name))
    }

    /// Project defaults to `kubernetes/<master>`.
    pub fn generate_metadata(&mut self) -> WorkloadsResult<String> {
        if self.solution_type.is_empty() {
            self.solution_type = format!("kubernetes/{}", self.master.name);
        }
        Ok(DeploymentData::new(KIND_K8S, &self.master.name, &self.solution_type).to_json()?)
    }

    /// Give members without an IP a host id in their node's subnet,
    /// avoiding `used` host ids per node and those handed to siblings.
    /// `used` must not list the ids this cluster's machines held before.
    pub fn assign_node_ips(&mut self, used: &HashMap<u32, Vec<u8>>) -> WorkloadsResult<()> {
        let mut taken = used.clone();
        let ranges = self.nodes_ip_range.clone();
        let members = std::iter::once(&mut self.master).chain(self.workers.iter_mut());
        for node in members {
            let subnet = ranges.get(&node.node_id).ok_or_else(|| {
                WorkloadError::invalid(format!(
                    "the node with id {} in {} does not exist in the network's ip ranges",
                    node.node_id, node.name
                ))
            })?;
            let node_used = taken.entry(node.node_id).or_default();
            let ip = assign_host_ip(&node.name, &node.ip, subnet, node_used, FIRST_HOST_ID)?;
            node.ip = ip.to_string();
        }
        Ok(())
    }

    fn node_workloads(&self, node: &K8sNode, is_worker: bool) -> Vec<Workload> {
        let disk = node.disk_name();
        let mut workloads = vec![Workload::new(
            disk.clone(),
            WorkloadData::ZMount(ZMount {
                size: node.disk_size_gb * GIGABYTE,
            }),
        )];

        let mut public_ip = String::new();
        if node.public_ip || node.public_ip6 {
            public_ip = node.public_ip_name();
            workloads.push(public_ip_workload(public_ip.clone(), node.public_ip, node.public_ip6));
        }

        let k3s_url = if is_worker {
            format!("https://{}:6443", self.master.ip)
        } else {
            String::new()
        };
        let env = BTreeMap::from([
            ("SSH_KEY".to_string(), self.ssh_key.clone()),
            ("K3S_TOKEN".to_string(), self.token.clone()),
            ("K3S_DATA_DIR".to_string(), K3S_DATA_DIR.to_string()),
            ("K3S_FLANNEL_IFACE".to_string(), "eth0".to_string()),
            ("K3S_NODE_NAME".to_string(), node.name.clone()),
            ("K3S_URL".to_string(), k3s_url),
        ]);

        let interfaces = node
            .ip
            .parse::<IpAddr>()
            .map(|ip| {
                vec![MachineInterface {
                    network: self.network_name.clone(),
                    ip,
                }]
            })
            .unwrap_or_default();
        let machine = ZMachine {
            flist: self.flist.clone(),
            network: MachineNetwork {
                public_ip,
                planetary: node.planetary,
                mycelium: (!node.mycelium_ip_seed.is_empty()).then(|| MyceliumIp {
                    network: self.network_name.clone(),
                    hex_seed: node.mycelium_ip_seed.clone(),
                }),
                interfaces,
            },
            size: 0,
            compute_capacity: MachineCapacity {
                cpu: node.cpu,
                memory: node.memory_mb * MEGABYTE,
            },
            mounts: vec![MachineMount {
                name: disk,
                mountpoint: K3S_DATA_DIR.to_string(),
            }],
            entrypoint: K3S_ENTRYPOINT.to_string(),
            env,
            corex: false,
            gpu: Vec::new(),
        };
        workloads.push(Workload::new(node.name.clone(), WorkloadData::ZMachine(machine)));
        workloads
    }

    /// Workloads grouped by the node they run on.
    pub fn zos_workloads(&self) -> BTreeMap<u32, Vec<Workload>> {
        let mut by_node: BTreeMap<u32, Vec<Workload>> = BTreeMap::new();
        by_node
            .entry(self.master.node_id)
            .or_default()
            .extend(self.node_workloads(&self.master, false));
        for worker in &self.workers {
            by_node
                .entry(worker.node_id)
                .or_default()
                .extend(self.node_workloads(worker, true));
        }
        by_node
    }

    /// Rebuild a cluster from the deployments on its nodes. The member
    /// without a `K3S_URL` is the master.
    pub fn from_deployments(deployments: &HashMap<u32, Deployment>) -> WorkloadsResult<Self> {
        let mut cluster = K8sCluster::default();
        let mut master_found = false;
        let mut nodes: Vec<&u32> = deployments.keys().collect();
        nodes.sort_unstable();

        for node_id in nodes {
            let Some(dl) = deployments.get(node_id) else {
                continue;
            };
            cluster.node_deployment_id.insert(*node_id, dl.contract_id);
            if cluster.solution_type.is_empty() {
                if let Ok(data) = DeploymentData::parse(&dl.metadata) {
                    cluster.solution_type = data.project_name;
                }
            }
            for wl in dl.by_type(&[WorkloadType::ZMachine]) {
                let data = wl.zmachine()?;
                let member = K8sNode::from_workload(wl, dl, *node_id)?;
                let env = &data.env;
                cluster.token = env.get("K3S_TOKEN").cloned().unwrap_or_default();
                cluster.ssh_key = env.get("SSH_KEY").cloned().unwrap_or_default();
                cluster.flist = data.flist.clone();
                if let Some(iface) = data.network.interfaces.first() {
                    cluster.network_name = iface.network.clone();
                }
                if env.get("K3S_URL").is_none_or(String::is_empty) {
                    master_found = true;
                    cluster.master = member;
                } else {
                    cluster.workers.push(member);
                }
            }
        }
        if !master_found {
            return Err(WorkloadError::invalid("failed to get master node for k8s cluster"));
        }
        Ok(cluster)
    }

    /// Forget nodes whose contracts are gone. A master on such a node is
    /// reset.
    pub async fn invalidate_broken_attributes(&mut self, chain: &dyn Substrate) -> WorkloadsResult<()> {
        let mut stale = Vec::new();
        for (&node, &contract_id) in &self.node_deployment_id {
            let valid = chain
                .is_valid_contract(contract_id)
                .await
                .context(format!("could not get node {node} contract {contract_id}"))?;
            if !valid {
                stale.push(node);
            }
        }
        for node in stale {
            if let Some(contract_id) = self.node_deployment_id.remove(&node) {
                warn!(node_id = node, contract_id, cluster = %self.master.name, "dropping invalid k8s contract");
            }
            self.nodes_ip_range.remove(&node);
            if self.master.node_id == node {
                self.master = K8sNode::default();
            }
        }
        Ok(())
    }
}
