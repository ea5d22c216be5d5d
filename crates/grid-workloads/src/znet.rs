//! Private overlay networks.
//!
//! A network spans a `/16` range. Each member node owns a `/24` subnet,
//! a WireGuard key and a listen port. Nodes with a public endpoint form a
//! full mesh; nodes without one (hidden) reach the rest through a public
//! node, which also terminates the optional external user access.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use grid_chain::Substrate;
use grid_types::metadata::{KIND_NETWORK, METADATA_VERSION};
use grid_types::{
    Deployment, DeploymentData, IpNet, Mycelium, Network, NetworkMetaData, Peer, UserAccess,
    Workload, WorkloadData, WorkloadType, MYCELIUM_KEY_LEN,
};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ResultExt, WorkloadError, WorkloadsResult};
use crate::name::validate_name;
use crate::wireguard::{generate_wg_config, wg_ip, WgKey};

/// WireGuard ports are drawn from `[1024, 32767]`.
pub const WG_PORT_RANGE: std::ops::Range<u16> = 1024..32768;

/// Project name of networks created without one.
pub const DEFAULT_NETWORK_PROJECT: &str = "Network";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZNet {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<u32>,
    pub ip_range: IpNet,
    #[serde(default)]
    pub add_wg_access: bool,
    #[serde(default)]
    pub mycelium_keys: HashMap<u32, Vec<u8>>,
    #[serde(default)]
    pub solution_type: String,

    // Computed
    #[serde(default)]
    pub access_wg_config: String,
    #[serde(default)]
    pub external_ip: Option<IpNet>,
    #[serde(default)]
    pub external_sk: Option<WgKey>,
    #[serde(default)]
    pub public_node_id: u32,
    #[serde(default)]
    pub nodes_ip_range: HashMap<u32, IpNet>,
    #[serde(default)]
    pub node_deployment_id: HashMap<u32, u64>,
    #[serde(default)]
    pub wg_port: HashMap<u32, u16>,
    #[serde(default)]
    pub keys: HashMap<u32, WgKey>,
}

/// Random 32-byte mycelium network key.
pub fn random_mycelium_key() -> Vec<u8> {
    let mut key = vec![0u8; MYCELIUM_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Host part of a WireGuard endpoint; IPv6 gets brackets.
pub fn endpoint_host(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

fn next_free_octet(used: &[u8], cur: &mut u8) -> WorkloadsResult<()> {
    while *cur < 255 && used.contains(cur) {
        *cur += 1;
    }
    if *cur == 255 {
        return Err(WorkloadError::NoFreeSubnet);
    }
    Ok(())
}

impl ZNet {
    pub fn new(name: impl Into<String>, nodes: Vec<u32>, ip_range: IpNet) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            nodes,
            ip_range,
            add_wg_access: false,
            mycelium_keys: HashMap::new(),
            solution_type: String::new(),
            access_wg_config: String::new(),
            external_ip: None,
            external_sk: None,
            public_node_id: 0,
            nodes_ip_range: HashMap::new(),
            node_deployment_id: HashMap::new(),
            wg_port: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub fn with_wg_access(mut self) -> Self {
        self.add_wg_access = true;
        self
    }

    pub fn with_mycelium_key(mut self, node: u32, key: Vec<u8>) -> Self {
        self.mycelium_keys.insert(node, key);
        self
    }

    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("network name is invalid")?;
        if self.nodes.is_empty() {
            return Err(WorkloadError::invalid(format!(
                "number of nodes in znet: {}, should be nonzero positive number",
                self.name
            )));
        }
        if self.ip_range.prefix != 16 || self.ip_range.octets().is_none() {
            return Err(WorkloadError::invalid(format!(
                "subnet in ip range {} should be 16",
                self.ip_range
            )));
        }
        for (node, key) in &self.mycelium_keys {
            if !key.is_empty() && key.len() != MYCELIUM_KEY_LEN {
                return Err(WorkloadError::invalid(format!(
                    "invalid mycelium key length {} must be {MYCELIUM_KEY_LEN} or empty",
                    key.len()
                )));
            }
            if !self.nodes.contains(node) {
                return Err(WorkloadError::invalid(format!(
                    "invalid node {node} for mycelium key, must be included in the network nodes {:?}",
                    self.nodes
                )));
            }
        }
        Ok(())
    }

    /// Project defaults to `Network`.
    pub fn generate_metadata(&mut self) -> WorkloadsResult<String> {
        if self.solution_type.is_empty() {
            self.solution_type = DEFAULT_NETWORK_PROJECT.to_string();
        }
        Ok(DeploymentData::new(KIND_NETWORK, &self.name, &self.solution_type).to_json()?)
    }

    /// The network workload one node runs.
    pub fn zos_workload(
        &self,
        subnet: IpNet,
        key: &WgKey,
        port: u16,
        peers: Vec<Peer>,
        metadata: &str,
        mycelium_key: &[u8],
    ) -> Workload {
        let mycelium = (!mycelium_key.is_empty()).then(|| Mycelium {
            hex_key: mycelium_key.to_vec(),
            peers: Vec::new(),
        });
        Workload::new(
            self.name.clone(),
            WorkloadData::Network(Network {
                ip_range: self.ip_range,
                subnet,
                wireguard_private_key: key.to_base64(),
                wireguard_listen_port: port,
                peers,
                mycelium,
            }),
        )
        .with_description(self.description.clone())
        .with_metadata(metadata)
    }

    fn subnet_of(&self, node: u32) -> WorkloadsResult<IpNet> {
        self.nodes_ip_range
            .get(&node)
            .copied()
            .ok_or_else(|| WorkloadError::invalid(format!("node {node} has no subnet in network {}", self.name)))
    }

    fn key_of(&self, node: u32) -> WorkloadsResult<&WgKey> {
        self.keys
            .get(&node)
            .ok_or_else(|| WorkloadError::invalid(format!("node {node} has no wireguard key in network {}", self.name)))
    }

    fn port_of(&self, node: u32) -> WorkloadsResult<u16> {
        self.wg_port
            .get(&node)
            .copied()
            .ok_or_else(|| WorkloadError::invalid(format!("node {node} has no wireguard port in network {}", self.name)))
    }

    /// Give every node in `nodes` a `/24`. Existing assignments are kept;
    /// new ones take the lowest free third octet from 2. Nodes outside
    /// `nodes` lose theirs.
    pub fn assign_nodes_ips(&mut self, nodes: &[u32]) -> WorkloadsResult<()> {
        let [a, b, _, _] = self.ip_range.octets().ok_or_else(|| {
            WorkloadError::invalid(format!("subnet in ip range {} should be 16", self.ip_range))
        })?;
        let mut ips = HashMap::new();
        let mut used = Vec::new();
        for (node, subnet) in &self.nodes_ip_range {
            if nodes.contains(node) {
                if let Some([_, _, c, _]) = subnet.octets() {
                    used.push(c);
                }
                ips.insert(*node, *subnet);
            }
        }

        let mut cur = 2u8;
        if self.add_wg_access {
            match self.external_ip.and_then(|ip| ip.octets()) {
                Some([_, _, c, _]) => used.push(c),
                None => {
                    next_free_octet(&used, &mut cur)?;
                    used.push(cur);
                    self.external_ip = Some(IpNet::v4(a, b, cur, 0, 24));
                }
            }
        }
        for node in nodes {
            if ips.contains_key(node) {
                continue;
            }
            next_free_octet(&used, &mut cur)?;
            used.push(cur);
            ips.insert(*node, IpNet::v4(a, b, cur, 0, 24));
        }
        self.nodes_ip_range = ips;
        Ok(())
    }

    pub fn assign_nodes_wg_keys(&mut self, nodes: &[u32]) {
        for node in nodes {
            self.keys.entry(*node).or_insert_with(WgKey::generate);
        }
    }

    /// Pick a listen port for nodes that do not have one yet, avoiding the
    /// ports already in use on the node and those picked in this run.
    pub fn assign_nodes_wg_ports(&mut self, nodes: &[u32], used: &mut HashMap<u32, Vec<u16>>) {
        let mut rng = rand::thread_rng();
        for node in nodes {
            if self.wg_port.contains_key(node) {
                continue;
            }
            let taken = used.entry(*node).or_default();
            let port = loop {
                let candidate = rng.gen_range(WG_PORT_RANGE);
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.push(port);
            debug!(node_id = node, port, network = %self.name, "assigned wireguard port");
            self.wg_port.insert(*node, port);
        }
    }

    /// User WireGuard config for external access through the public node.
    pub fn access_config(&self, public_endpoint: &str) -> WorkloadsResult<Option<String>> {
        let (Some(external_ip), Some(sk)) = (self.external_ip, &self.external_sk) else {
            return Ok(None);
        };
        if !self.add_wg_access || self.public_node_id == 0 {
            return Ok(None);
        }
        Ok(Some(generate_wg_config(
            &wg_ip(&external_ip).ip.to_string(),
            &sk.to_base64(),
            &self.key_of(self.public_node_id)?.public_key(),
            &format!("{public_endpoint}:{}", self.port_of(self.public_node_id)?),
            &self.ip_range.to_string(),
        )))
    }

    fn metadata_json(&self) -> WorkloadsResult<String> {
        let metadata = NetworkMetaData {
            version: METADATA_VERSION,
            user_accesses: vec![UserAccess {
                subnet: self.external_ip.map(|ip| ip.to_string()).unwrap_or_default(),
                private_key: self.external_sk.as_ref().map(WgKey::to_base64).unwrap_or_default(),
                node_id: self.public_node_id,
            }],
        };
        Ok(metadata.to_json()?)
    }

    /// Build one deployment per participating node.
    ///
    /// `endpoints` maps every member node (and the candidate public node)
    /// to its public endpoint, `None` for nodes without one. A member
    /// missing from the map fails the whole network. `public_node` is used
    /// as relay when hidden nodes or user access need one and no member
    /// has an IPv4 endpoint.
    pub fn generate_deployments(
        &mut self,
        endpoints: &HashMap<u32, Option<IpAddr>>,
        used_ports: &mut HashMap<u32, Vec<u16>>,
        public_node: u32,
        twin_id: u32,
    ) -> WorkloadsResult<BTreeMap<u32, Deployment>> {
        let mut hosts: HashMap<u32, String> = HashMap::new();
        let mut hidden = Vec::new();
        let mut accessible = Vec::new();
        let mut ipv4_node = 0;

        for &node in &self.nodes {
            match endpoints.get(&node) {
                None => return Err(WorkloadError::MissingEndpoint(self.name.clone())),
                Some(None) => hidden.push(node),
                Some(Some(ip)) => {
                    accessible.push(node);
                    if ip.is_ipv4() {
                        ipv4_node = node;
                    }
                    hosts.insert(node, endpoint_host(ip));
                }
            }
        }

        let needs_relay = self.add_wg_access || (!hidden.is_empty() && hidden.len() + accessible.len() > 1);
        if needs_relay {
            let relay = if self.public_node_id != 0 {
                self.public_node_id
            } else if ipv4_node != 0 {
                ipv4_node
            } else {
                public_node
            };
            if !hosts.contains_key(&relay) {
                match endpoints.get(&relay) {
                    Some(Some(ip)) if relay != 0 => {
                        hosts.insert(relay, endpoint_host(ip));
                    }
                    _ => return Err(WorkloadError::NoPublicNode(self.name.clone())),
                }
            }
            if !accessible.contains(&relay) {
                accessible.push(relay);
            }
            self.public_node_id = relay;
        }

        let all_nodes: Vec<u32> = hidden.iter().chain(accessible.iter()).copied().collect();
        self.assign_nodes_ips(&all_nodes).context("could not assign node ips")?;
        self.assign_nodes_wg_keys(&all_nodes);
        self.assign_nodes_wg_ports(&all_nodes, used_ports);

        let mut unreachable_ranges = Vec::new();
        for &node in &hidden {
            let subnet = self.subnet_of(node)?;
            unreachable_ranges.push(subnet);
            unreachable_ranges.push(wg_ip(&subnet));
        }
        if self.add_wg_access {
            if let Some(external) = self.external_ip {
                unreachable_ranges.push(external);
                unreachable_ranges.push(wg_ip(&external));
            }
            if self.external_sk.is_none() {
                self.external_sk = Some(WgKey::generate());
            }
            let public_host = hosts.get(&self.public_node_id).cloned().unwrap_or_default();
            self.access_wg_config = self.access_config(&public_host)?.unwrap_or_default();
        } else {
            self.access_wg_config.clear();
        }
        debug!(
            network = %self.name,
            public_node = self.public_node_id,
            ?hidden,
            ?accessible,
            "generating network deployments"
        );

        let metadata = self.metadata_json()?;
        let deployment_metadata = self.generate_metadata()?;
        let endpoint_of = |node: u32| -> WorkloadsResult<String> {
            let host = hosts.get(&node).cloned().unwrap_or_default();
            Ok(format!("{host}:{}", self.port_of(node)?))
        };

        let mut deployments = BTreeMap::new();
        for &node in &accessible {
            let mut peers = Vec::new();
            for &peer in &accessible {
                if peer == node {
                    continue;
                }
                let subnet = self.subnet_of(peer)?;
                let mut allowed_ips = vec![subnet, wg_ip(&subnet)];
                if peer == self.public_node_id {
                    allowed_ips.extend(unreachable_ranges.iter().copied());
                }
                peers.push(Peer {
                    subnet,
                    wireguard_public_key: self.key_of(peer)?.public_key(),
                    allowed_ips,
                    endpoint: endpoint_of(peer)?,
                });
            }

            if node == self.public_node_id {
                if self.add_wg_access {
                    if let (Some(external), Some(sk)) = (self.external_ip, &self.external_sk) {
                        peers.push(Peer {
                            subnet: external,
                            wireguard_public_key: sk.public_key(),
                            allowed_ips: vec![external, wg_ip(&external)],
                            endpoint: String::new(),
                        });
                    }
                }
                for &peer in &hidden {
                    let subnet = self.subnet_of(peer)?;
                    peers.push(Peer {
                        subnet,
                        wireguard_public_key: self.key_of(peer)?.public_key(),
                        allowed_ips: vec![subnet, wg_ip(&subnet)],
                        endpoint: String::new(),
                    });
                }
            }
            deployments.insert(node, self.node_deployment(node, peers, &metadata, &deployment_metadata, twin_id)?);
        }

        for &node in &hidden {
            let mut peers = Vec::new();
            if self.public_node_id != 0 {
                peers.push(Peer {
                    subnet: self.subnet_of(node)?,
                    wireguard_public_key: self.key_of(self.public_node_id)?.public_key(),
                    allowed_ips: vec![self.ip_range, IpNet::v4(100, 64, 0, 0, 16)],
                    endpoint: endpoint_of(self.public_node_id)?,
                });
            }
            deployments.insert(node, self.node_deployment(node, peers, &metadata, &deployment_metadata, twin_id)?);
        }
        Ok(deployments)
    }

    fn node_deployment(
        &self,
        node: u32,
        peers: Vec<Peer>,
        metadata: &str,
        deployment_metadata: &str,
        twin_id: u32,
    ) -> WorkloadsResult<Deployment> {
        let mycelium_key = self.mycelium_keys.get(&node).map(Vec::as_slice).unwrap_or_default();
        let workload = self.zos_workload(
            self.subnet_of(node)?,
            self.key_of(node)?,
            self.port_of(node)?,
            peers,
            metadata,
            mycelium_key,
        );
        let mut dl = Deployment::new_grid_deployment(twin_id, vec![workload]);
        dl.metadata = deployment_metadata.to_string();
        Ok(dl)
    }

    fn apply_metadata(&mut self, metadata: &str) -> WorkloadsResult<()> {
        let metadata = NetworkMetaData::parse(metadata)?;
        let Some(access) = metadata.first_access() else {
            return Ok(());
        };
        self.public_node_id = access.node_id;
        if !access.subnet.is_empty() {
            self.external_ip = Some(access.subnet.parse()?);
        }
        if !access.private_key.is_empty() {
            let key = WgKey::parse(&access.private_key).context("failed to parse user access private key")?;
            if !key.is_zero() {
                self.external_sk = Some(key);
            }
        }
        Ok(())
    }

    /// Rebuild the network as seen from one node's workload.
    pub fn from_workload(wl: &Workload, node_id: u32) -> WorkloadsResult<Self> {
        let data = wl.network()?;
        let mut znet = ZNet::new(wl.name.clone(), vec![node_id], data.ip_range);
        znet.description = wl.description.clone();
        znet.nodes_ip_range.insert(node_id, data.subnet);
        if !data.wireguard_private_key.is_empty() {
            znet.keys.insert(node_id, WgKey::parse(&data.wireguard_private_key)?);
        }
        if data.wireguard_listen_port != 0 {
            znet.wg_port.insert(node_id, data.wireguard_listen_port);
        }
        if let Some(mycelium) = &data.mycelium {
            znet.mycelium_keys.insert(node_id, mycelium.hex_key.clone());
        }
        znet.apply_metadata(&wl.metadata)
            .context(format!("failed to parse network metadata from workload {}", wl.name))?;
        znet.add_wg_access = znet.external_ip.is_some();
        Ok(znet)
    }

    /// Reload keys, ports, subnets and user access from the network
    /// workloads currently on the nodes.
    pub fn read_nodes_config(&mut self, deployments: &HashMap<u32, Deployment>) -> WorkloadsResult<()> {
        let mut keys = HashMap::new();
        let mut ports = HashMap::new();
        let mut ranges = HashMap::new();
        let mut access = false;
        for (&node, dl) in deployments {
            for wl in dl.by_type(&[WorkloadType::Network]) {
                let data = wl.network()?;
                ports.insert(node, data.wireguard_listen_port);
                keys.insert(
                    node,
                    WgKey::parse(&data.wireguard_private_key)
                        .context("could not parse wg private key from workload object")?,
                );
                ranges.insert(node, data.subnet);
                let metadata = NetworkMetaData::parse(&wl.metadata)?;
                if metadata.first_access().is_some_and(|a| !a.subnet.is_empty()) {
                    access = true;
                    self.apply_metadata(&wl.metadata)?;
                }
            }
        }
        self.keys = keys;
        self.wg_port = ports;
        self.nodes_ip_range = ranges;
        self.add_wg_access = access;
        if !access {
            self.access_wg_config.clear();
        }
        Ok(())
    }

    /// Rebuild a network from the deployments of all its nodes.
    pub fn from_deployments(deployments: &HashMap<u32, Deployment>) -> WorkloadsResult<Self> {
        let mut members: Vec<u32> = deployments
            .iter()
            .filter(|(_, dl)| !dl.by_type(&[WorkloadType::Network]).is_empty())
            .map(|(node, _)| *node)
            .collect();
        members.sort_unstable();
        let (first, first_dl, wl) = members
            .first()
            .and_then(|node| {
                let dl = deployments.get(node)?;
                let wl = dl.by_type(&[WorkloadType::Network]).into_iter().next()?;
                Some((*node, dl, wl))
            })
            .ok_or_else(|| WorkloadError::invalid("no network workloads found"))?;
        let mut znet = ZNet::from_workload(wl, first)?;
        if let Ok(data) = DeploymentData::parse(&first_dl.metadata) {
            znet.solution_type = data.project_name;
        }
        znet.read_nodes_config(deployments)?;
        for &node in &members {
            let Some(dl) = deployments.get(&node) else {
                continue;
            };
            znet.node_deployment_id.insert(node, dl.contract_id);
            for wl in dl.by_type(&[WorkloadType::Network]) {
                if let Some(mycelium) = &wl.network()?.mycelium {
                    znet.mycelium_keys.insert(node, mycelium.hex_key.clone());
                }
            }
        }
        znet.nodes = members;
        Ok(znet)
    }

    /// Forget nodes whose contracts are gone, and anything outside the
    /// current range.
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
                warn!(node_id = node, contract_id, network = %self.name, "dropping invalid network contract");
            }
            self.nodes_ip_range.remove(&node);
            self.keys.remove(&node);
            self.wg_port.remove(&node);
        }

        let range = self.ip_range;
        if self.external_ip.is_some_and(|ip| !range.contains(&ip.ip)) {
            self.external_ip = None;
        }
        self.nodes_ip_range.retain(|_, subnet| range.contains(&subnet.ip));
        if !self.add_wg_access {
            self.external_ip = None;
        }
        Ok(())
    }
}
