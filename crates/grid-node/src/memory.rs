//! In-process node fleet.
//!
//! `MemoryGrid` plays both the message bus (every node answers the
//! `zos.*` commands) and the node index. Nodes provision workloads
//! instantly unless told otherwise; tests can make nodes unreachable,
//! make workloads fail, keep them in `init`, or delay readiness.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grid_chain::{ContractState, Substrate};
use grid_types::{
    Capacity, Deployment, GatewayProxyResult, PublicIpResult, QsfsResult, ResultState, Workload,
    WorkloadData, WorkloadResult, ZMachineResult, ZdbResult,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{NodeError, NodeResult};
use crate::index::{
    Farm, FarmFilter, FarmPublicIp, IndexPublicConfig, Limit, Node, NodeFilter, NodeIndex,
    RentInfo,
};
use crate::rmb::RmbClient;
use crate::types::{Gpu, PoolMetrics, PublicConfig, Statistics, UserStatistics, Version};

const ZDB_PORT: u32 = 9900;

const NODE_FEATURES: &[&str] = &[
    "zmount",
    "volume",
    "network",
    "network-light",
    "zdb",
    "zmachine",
    "zmachine-light",
    "ipv4",
    "ip",
    "gateway-name-proxy",
    "gateway-fqdn-proxy",
    "qsfs",
    "zlogs",
    "mycelium",
];

/// Static description of a simulated node.
#[derive(Debug, Clone, Default)]
pub struct SimNode {
    pub node_id: u32,
    pub farm_id: u32,
    pub twin_id: u32,
    pub total: Capacity,
    pub public_config: Option<PublicConfig>,
    pub interfaces: HashMap<String, Vec<IpAddr>>,
    pub pools: Vec<PoolMetrics>,
    pub gpus: Vec<Gpu>,
    pub rented_by: Option<u32>,
    pub country: String,
    pub certification_type: String,
}

impl SimNode {
    pub fn new(node_id: u32, farm_id: u32, twin_id: u32) -> Self {
        Self {
            node_id,
            farm_id,
            twin_id,
            country: "Belgium".to_string(),
            certification_type: "Diy".to_string(),
            ..Default::default()
        }
    }

    /// Total capacity; memory and disks in bytes.
    pub fn with_capacity(mut self, cru: u64, mru: u64, sru: u64, hru: u64) -> Self {
        self.total = Capacity { cru, mru, sru, hru, ipv4u: 0 };
        self
    }

    pub fn with_public_config(mut self, config: PublicConfig) -> Self {
        self.public_config = Some(config);
        self
    }

    pub fn with_interface(mut self, name: &str, ips: Vec<IpAddr>) -> Self {
        self.interfaces.insert(name.to_string(), ips);
        self
    }

    pub fn with_pool(mut self, pool: PoolMetrics) -> Self {
        self.pools.push(pool);
        self
    }

    pub fn with_gpu(mut self, gpu: Gpu) -> Self {
        self.gpus.push(gpu);
        self
    }

    pub fn rented_by(mut self, twin_id: u32) -> Self {
        self.rented_by = Some(twin_id);
        self
    }

    fn index_public_config(&self) -> IndexPublicConfig {
        let Some(cfg) = &self.public_config else {
            return IndexPublicConfig::default();
        };
        fn show<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(ToString::to_string).unwrap_or_default()
        }
        IndexPublicConfig {
            domain: cfg.domain.clone(),
            gw4: show(&cfg.gw4),
            gw6: show(&cfg.gw6),
            ipv4: show(&cfg.ipv4),
            ipv6: show(&cfg.ipv6),
        }
    }
}

struct Stored {
    deployment: Deployment,
    /// Per workload: when it turns ready. `None` never does.
    ready_at: HashMap<String, Option<Instant>>,
    /// Per workload: farm IP it holds.
    public_ips: HashMap<String, String>,
}

struct NodeState {
    spec: SimNode,
    reachable: bool,
    stuck_in_init: bool,
    failing: HashMap<String, String>,
    /// Per workload name: provisioning delay overriding the fleet's.
    delays: HashMap<String, Duration>,
    reserved_wg_ports: Vec<u16>,
    deployments: BTreeMap<u64, Stored>,
}

impl NodeState {
    fn used(&self) -> Capacity {
        let mut used = Capacity::default();
        for stored in self.deployments.values() {
            used += stored.deployment.capacity();
        }
        used
    }

    fn to_index_node(&self) -> Node {
        let spec = &self.spec;
        Node {
            node_id: spec.node_id,
            farm_id: spec.farm_id,
            twin_id: spec.twin_id,
            country: spec.country.clone(),
            city: String::new(),
            total_resources: spec.total,
            used_resources: self.used(),
            public_config: spec.index_public_config(),
            rent_info: RentInfo {
                rentable: spec.rented_by.is_none(),
                rented: spec.rented_by.is_some(),
                renter: u64::from(spec.rented_by.unwrap_or_default()),
                ..Default::default()
            },
            certification_type: spec.certification_type.clone(),
            status: if self.reachable { "up" } else { "down" }.to_string(),
            num_gpu: spec.gpus.len() as u32,
            healthy: self.reachable,
        }
    }
}

#[derive(Default)]
struct Fleet {
    nodes: BTreeMap<u32, NodeState>,
    farms: BTreeMap<u32, Farm>,
    calls: HashMap<String, usize>,
    provision_delay: Duration,
}

/// Simulated fleet of nodes plus the index listing them.
pub struct MemoryGrid {
    chain: Option<Arc<dyn Substrate>>,
    twins: HashMap<u32, u32>,
    fleet: Mutex<Fleet>,
}

impl Default for MemoryGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self {
            chain: None,
            twins: HashMap::new(),
            fleet: Mutex::new(Fleet::default()),
        }
    }

    /// Check pushed deployments against their contracts on `chain`.
    pub fn attach_chain(mut self, chain: Arc<dyn Substrate>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Add a farm owning `public_ips` (CIDR strings).
    pub fn with_farm(mut self, farm_id: u32, name: &str, public_ips: &[&str]) -> Self {
        let farm = Farm {
            name: name.to_string(),
            farm_id,
            twin_id: farm_id,
            public_ips: public_ips
                .iter()
                .enumerate()
                .map(|(i, ip)| FarmPublicIp {
                    id: i.to_string(),
                    ip: ip.to_string(),
                    gateway: String::new(),
                    contract_id: 0,
                })
                .collect(),
            ..Default::default()
        };
        self.fleet.get_mut().farms.insert(farm_id, farm);
        self
    }

    pub fn with_node(mut self, node: SimNode) -> Self {
        self.twins.insert(node.twin_id, node.node_id);
        let fleet = self.fleet.get_mut();
        fleet.farms.entry(node.farm_id).or_insert_with(|| Farm {
            name: format!("farm-{}", node.farm_id),
            farm_id: node.farm_id,
            twin_id: node.farm_id,
            ..Default::default()
        });
        fleet.nodes.insert(
            node.node_id,
            NodeState {
                spec: node,
                reachable: true,
                stuck_in_init: false,
                failing: HashMap::new(),
                delays: HashMap::new(),
                reserved_wg_ports: Vec::new(),
                deployments: BTreeMap::new(),
            },
        );
        self
    }

    /// `(node_id, twin_id)` of every node, for seeding a chain.
    pub fn node_twins(&self) -> Vec<(u32, u32)> {
        let mut pairs: Vec<(u32, u32)> = self.twins.iter().map(|(t, n)| (*n, *t)).collect();
        pairs.sort_unstable();
        pairs
    }

    // ── Failure injection ───────────────────────────────────────

    pub async fn set_reachable(&self, node_id: u32, reachable: bool) {
        if let Some(node) = self.fleet.lock().await.nodes.get_mut(&node_id) {
            node.reachable = reachable;
        }
    }

    /// Workloads named `workload` on `node_id` fail with `message` when provisioned.
    pub async fn fail_workload(&self, node_id: u32, workload: &str, message: &str) {
        if let Some(node) = self.fleet.lock().await.nodes.get_mut(&node_id) {
            node.failing.insert(workload.to_string(), message.to_string());
        }
    }

    /// Workloads provisioned on `node_id` from now on stay in `init`.
    pub async fn set_stuck_in_init(&self, node_id: u32, stuck: bool) {
        if let Some(node) = self.fleet.lock().await.nodes.get_mut(&node_id) {
            node.stuck_in_init = stuck;
        }
    }

    /// Time between a push and its workloads reporting a final state.
    pub async fn set_provision_delay(&self, delay: Duration) {
        self.fleet.lock().await.provision_delay = delay;
    }

    /// Workloads named `workload` on `node_id` turn ready `delay` after
    /// their push.
    pub async fn set_workload_delay(&self, node_id: u32, workload: &str, delay: Duration) {
        if let Some(node) = self.fleet.lock().await.nodes.get_mut(&node_id) {
            node.delays.insert(workload.to_string(), delay);
        }
    }

    pub async fn reserve_wg_ports(&self, node_id: u32, ports: &[u16]) {
        if let Some(node) = self.fleet.lock().await.nodes.get_mut(&node_id) {
            node.reserved_wg_ports.extend_from_slice(ports);
        }
    }

    // ── Inspection ──────────────────────────────────────────────

    /// How many times `cmd` reached any node.
    pub async fn calls(&self, cmd: &str) -> usize {
        self.fleet.lock().await.calls.get(cmd).copied().unwrap_or_default()
    }

    /// Deployments held by `node_id`, as last pushed.
    pub async fn deployments_on(&self, node_id: u32) -> Vec<Deployment> {
        self.fleet
            .lock()
            .await
            .nodes
            .get(&node_id)
            .map(|n| n.deployments.values().map(|s| s.deployment.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn farm(&self, farm_id: u32) -> Option<Farm> {
        self.fleet.lock().await.farms.get(&farm_id).cloned()
    }

    // ── Node side ───────────────────────────────────────────────

    /// Contract checks the node runs before accepting a push.
    async fn verify_contract(&self, node_id: u32, dl: &Deployment) -> Result<(), String> {
        if dl.contract_id == 0 {
            return Err("deployment has no contract id".to_string());
        }
        if !dl
            .signature_requirement
            .signatures
            .iter()
            .any(|s| s.twin_id == dl.twin_id)
        {
            return Err("deployment is not signed by its owner".to_string());
        }
        let Some(chain) = &self.chain else {
            return Ok(());
        };
        let contract = chain
            .get_contract(dl.contract_id)
            .await
            .map_err(|e| e.to_string())?;
        if contract.state != ContractState::Created {
            return Err(format!("contract {} is not active", dl.contract_id));
        }
        let Some(node_contract) = contract.node_contract() else {
            return Err(format!("contract {} is not a node contract", dl.contract_id));
        };
        if node_contract.node_id != node_id {
            return Err(format!("contract {} belongs to another node", dl.contract_id));
        }
        if contract.twin_id != dl.twin_id {
            return Err("contract owner does not match deployment twin".to_string());
        }
        let hash = dl.challenge_hash_hex();
        if node_contract.deployment_hash != hash {
            return Err(format!(
                "contract hash mismatch: expected {}, got {}",
                node_contract.deployment_hash, hash
            ));
        }
        Ok(())
    }

    /// Name contracts registered for the gateway names in `dl`.
    async fn registered_names(&self, dl: &Deployment) -> HashMap<String, bool> {
        let mut names = HashMap::new();
        for wl in &dl.workloads {
            if let WorkloadData::GatewayNameProxy(gw) = &wl.data {
                let registered = match &self.chain {
                    Some(chain) => chain.get_contract_id_by_name_registration(&gw.name).await.is_ok(),
                    None => true,
                };
                names.insert(gw.name.clone(), registered);
            }
        }
        names
    }

    async fn handle(&self, twin: u32, cmd: &str, payload: Value) -> NodeResult<Value> {
        let node_id = *self.twins.get(&twin).ok_or(NodeError::Unreachable(twin))?;

        // Checks that need the chain run before the fleet is locked.
        let mut pushed: Option<(Deployment, HashMap<String, bool>)> = None;
        if cmd == "zos.deployment.deploy" || cmd == "zos.deployment.update" {
            let dl: Deployment = decode(cmd, payload.clone())?;
            if let Err(message) = self.verify_contract(node_id, &dl).await {
                return Err(remote(twin, cmd, message));
            }
            let names = self.registered_names(&dl).await;
            pushed = Some((dl, names));
        }

        let mut guard = self.fleet.lock().await;
        let Fleet {
            nodes,
            farms,
            calls,
            provision_delay,
        } = &mut *guard;
        *calls.entry(cmd.to_string()).or_default() += 1;

        let node = nodes.get_mut(&node_id).ok_or(NodeError::Unreachable(twin))?;
        if !node.reachable {
            return Err(NodeError::Unreachable(twin));
        }
        debug!(node_id, cmd, "memory grid call");
        let fail = |message: String| remote(twin, cmd, message);

        match cmd {
            "zos.deployment.deploy" => {
                let (dl, names) = pushed.ok_or_else(|| NodeError::UnknownCommand(cmd.to_string()))?;
                deploy(node, farms, dl, &names, *provision_delay).map_err(fail)?;
                Ok(Value::Null)
            }
            "zos.deployment.update" => {
                let (dl, names) = pushed.ok_or_else(|| NodeError::UnknownCommand(cmd.to_string()))?;
                update(node, farms, dl, &names, *provision_delay).map_err(fail)?;
                Ok(Value::Null)
            }
            "zos.deployment.get" => {
                let id = contract_arg(cmd, &payload)?;
                let stored = node
                    .deployments
                    .get(&id)
                    .ok_or_else(|| fail(format!("deployment {id} not found")))?;
                Ok(serde_json::to_value(observed(stored))?)
            }
            "zos.deployment.changes" => {
                let id = contract_arg(cmd, &payload)?;
                let stored = node
                    .deployments
                    .get(&id)
                    .ok_or_else(|| fail(format!("deployment {id} not found")))?;
                Ok(serde_json::to_value(observed(stored).workloads)?)
            }
            "zos.deployment.delete" => {
                let id = contract_arg(cmd, &payload)?;
                let stored = node
                    .deployments
                    .remove(&id)
                    .ok_or_else(|| fail(format!("deployment {id} not found")))?;
                release_ips(farms, stored.public_ips.values());
                Ok(Value::Null)
            }
            "zos.deployment.list" => {
                let all: Vec<Deployment> = node.deployments.values().map(observed).collect();
                Ok(serde_json::to_value(all)?)
            }
            "zos.network.list_private_ips" => {
                #[derive(Deserialize)]
                struct Args {
                    network_name: String,
                }
                let args: Args = decode(cmd, payload)?;
                Ok(json!(private_ips(node, &args.network_name)))
            }
            "zos.network.list_wg_ports" => {
                let mut ports = node.reserved_wg_ports.clone();
                for stored in node.deployments.values() {
                    for wl in &stored.deployment.workloads {
                        if let WorkloadData::Network(net) = &wl.data {
                            ports.push(net.wireguard_listen_port);
                        }
                    }
                }
                Ok(json!(ports))
            }
            "zos.network.list_public_ips" => {
                let ips: Vec<&String> = node
                    .deployments
                    .values()
                    .flat_map(|s| s.public_ips.values())
                    .collect();
                Ok(json!(ips))
            }
            "zos.network.interfaces" => Ok(json!(node.spec.interfaces)),
            "zos.network.public_config_get" => match &node.spec.public_config {
                Some(cfg) => Ok(serde_json::to_value(cfg)?),
                None => Err(fail("no public config".to_string())),
            },
            "zos.network.public_config_set" => {
                let cfg: PublicConfig = decode(cmd, payload)?;
                node.spec.public_config = Some(cfg);
                Ok(Value::Null)
            }
            "zos.network.has_ipv6" => Ok(json!(node
                .spec
                .public_config
                .as_ref()
                .is_some_and(|c| c.ipv6.is_some()))),
            "zos.system.version" => Ok(serde_json::to_value(Version {
                zos: "v3.10.0".to_string(),
                zinit: "v0.2.14".to_string(),
            })?),
            "zos.system.node_features_get" => Ok(json!(NODE_FEATURES)),
            "zos.statistics.get" => {
                let workloads = node
                    .deployments
                    .values()
                    .map(|s| s.deployment.workloads.len() as u64)
                    .sum();
                Ok(serde_json::to_value(Statistics {
                    total: node.spec.total,
                    used: node.used(),
                    system: Capacity::default(),
                    users: UserStatistics {
                        deployments: node.deployments.len() as u64,
                        workloads,
                    },
                })?)
            }
            "zos.storage.pools" => Ok(serde_json::to_value(&node.spec.pools)?),
            "zos.gpu.list" => Ok(serde_json::to_value(&node.spec.gpus)?),
            other => Err(NodeError::UnknownCommand(other.to_string())),
        }
    }
}

fn remote(twin: u32, cmd: &str, message: String) -> NodeError {
    NodeError::Remote {
        twin,
        cmd: cmd.to_string(),
        message,
    }
}

fn decode<T: DeserializeOwned>(cmd: &str, payload: Value) -> NodeResult<T> {
    serde_json::from_value(payload).map_err(|source| NodeError::Decode {
        cmd: cmd.to_string(),
        source,
    })
}

fn contract_arg(cmd: &str, payload: &Value) -> NodeResult<u64> {
    #[derive(Deserialize)]
    struct Args {
        contract_id: u64,
    }
    let args: Args = decode(cmd, payload.clone())?;
    Ok(args.contract_id)
}

/// The deployment as a caller sees it now: workloads not yet ready read `init`.
fn observed(stored: &Stored) -> Deployment {
    let now = Instant::now();
    let mut dl = stored.deployment.clone();
    for wl in &mut dl.workloads {
        let ready = match stored.ready_at.get(&wl.name) {
            Some(Some(at)) => *at <= now,
            Some(None) => false,
            None => true,
        };
        if !ready {
            wl.result = WorkloadResult::default();
        }
    }
    dl
}

/// `node.deployments` must not hold `dl` itself.
fn check_capacity(node: &NodeState, dl: &Deployment) -> Result<(), String> {
    let used = node.used() + dl.capacity();
    let total = node.spec.total;
    if used.cru > total.cru || used.mru > total.mru || used.hru > total.hru || used.sru > 2 * total.sru {
        return Err(format!("not enough capacity on node {}", node.spec.node_id));
    }
    Ok(())
}

fn deploy(
    node: &mut NodeState,
    farms: &mut BTreeMap<u32, Farm>,
    dl: Deployment,
    names: &HashMap<String, bool>,
    delay: Duration,
) -> Result<(), String> {
    if node.deployments.contains_key(&dl.contract_id) {
        return Err(format!(
            "deployment with contract id {} already exists",
            dl.contract_id
        ));
    }
    dl.valid().map_err(|e| e.to_string())?;
    check_capacity(node, &dl)?;

    let contract_id = dl.contract_id;
    let mut stored = Stored {
        deployment: dl,
        ready_at: HashMap::new(),
        public_ips: HashMap::new(),
    };
    for i in 0..stored.deployment.workloads.len() {
        provision(node, farms, &mut stored, i, names, delay);
    }
    debug!(node_id = node.spec.node_id, contract_id, "deployment provisioned");
    node.deployments.insert(contract_id, stored);
    Ok(())
}

fn update(
    node: &mut NodeState,
    farms: &mut BTreeMap<u32, Farm>,
    dl: Deployment,
    names: &HashMap<String, bool>,
    delay: Duration,
) -> Result<(), String> {
    let contract_id = dl.contract_id;
    let Some(old) = node.deployments.remove(&contract_id) else {
        return Err(format!("deployment {contract_id} not found"));
    };
    let restore = |node: &mut NodeState, old: Stored, msg: String| -> Result<(), String> {
        node.deployments.insert(contract_id, old);
        Err(msg)
    };

    if dl.version != old.deployment.version + 1 {
        let msg = format!(
            "invalid version: expected {}, got {}",
            old.deployment.version + 1,
            dl.version
        );
        return restore(node, old, msg);
    }
    if let Err(e) = dl.valid() {
        return restore(node, old, e.to_string());
    }
    if let Err(msg) = check_capacity(node, &dl) {
        return restore(node, old, msg);
    }
    let old_by_name: HashMap<&str, &Workload> = old
        .deployment
        .workloads
        .iter()
        .map(|w| (w.name.as_str(), w))
        .collect();
    for wl in &dl.workloads {
        if let Some(prev) = old_by_name.get(wl.name.as_str()) {
            if prev.version == wl.version && prev.challenge_hash() != wl.challenge_hash() {
                let msg = format!("workload {} changed without a version bump", wl.name);
                return restore(node, old, msg);
            }
        }
    }

    let mut stored = Stored {
        deployment: dl,
        ready_at: HashMap::new(),
        public_ips: HashMap::new(),
    };
    let mut kept_ips = HashMap::new();
    for i in 0..stored.deployment.workloads.len() {
        let name = stored.deployment.workloads[i].name.clone();
        let unchanged = old_by_name
            .get(name.as_str())
            .filter(|prev| prev.version == stored.deployment.workloads[i].version);
        if let Some(prev) = unchanged {
            stored.deployment.workloads[i].result = prev.result.clone();
            let ready = old.ready_at.get(&name).copied().unwrap_or(None);
            stored.ready_at.insert(name.clone(), ready);
            if let Some(ip) = old.public_ips.get(&name) {
                kept_ips.insert(name, ip.clone());
            }
        }
    }
    let released: Vec<&String> = old
        .public_ips
        .iter()
        .filter(|(name, _)| !kept_ips.contains_key(*name))
        .map(|(_, ip)| ip)
        .collect();
    release_ips(farms, released.into_iter());
    stored.public_ips = kept_ips;

    for i in 0..stored.deployment.workloads.len() {
        if !stored.ready_at.contains_key(&stored.deployment.workloads[i].name) {
            provision(node, farms, &mut stored, i, names, delay);
        }
    }
    debug!(
        node_id = node.spec.node_id,
        contract_id,
        version = stored.deployment.version,
        "deployment updated"
    );
    node.deployments.insert(contract_id, stored);
    Ok(())
}

fn release_ips<'a>(farms: &mut BTreeMap<u32, Farm>, ips: impl Iterator<Item = &'a String>) {
    for ip in ips {
        for farm in farms.values_mut() {
            for entry in farm.public_ips.iter_mut().filter(|e| &e.ip == ip) {
                entry.contract_id = 0;
            }
        }
    }
}

fn allocate_ip(farms: &mut BTreeMap<u32, Farm>, farm_id: u32, contract_id: u64) -> Option<FarmPublicIp> {
    let farm = farms.get_mut(&farm_id)?;
    let entry = farm.public_ips.iter_mut().find(|e| e.contract_id == 0)?;
    entry.contract_id = contract_id;
    Some(entry.clone())
}

fn private_ips(node: &NodeState, network: &str) -> Vec<String> {
    let mut ips = Vec::new();
    for stored in node.deployments.values() {
        for wl in &stored.deployment.workloads {
            if let WorkloadData::ZMachine(vm) | WorkloadData::ZMachineLight(vm) = &wl.data {
                ips.extend(
                    vm.network
                        .interfaces
                        .iter()
                        .filter(|i| i.network == network)
                        .map(|i| i.ip.to_string()),
                );
            }
        }
    }
    ips
}

/// Produce the result of workload `index` and record when it turns ready.
fn provision(
    node: &NodeState,
    farms: &mut BTreeMap<u32, Farm>,
    stored: &mut Stored,
    index: usize,
    names: &HashMap<String, bool>,
    delay: Duration,
) {
    let contract_id = stored.deployment.contract_id;
    let spec = &node.spec;
    let wl = &mut stored.deployment.workloads[index];
    let ready_at = if node.stuck_in_init {
        None
    } else {
        Some(Instant::now() + node.delays.get(&wl.name).copied().unwrap_or(delay))
    };
    stored.ready_at.insert(wl.name.clone(), ready_at);

    if let Some(message) = node.failing.get(&wl.name) {
        wl.result = WorkloadResult::error(message.clone());
        return;
    }

    let result = match &wl.data {
        WorkloadData::ZMachine(vm) | WorkloadData::ZMachineLight(vm) => {
            let ip = vm
                .network
                .interfaces
                .first()
                .map(|i| i.ip.to_string())
                .unwrap_or_default();
            let planetary_ip = if vm.network.planetary {
                format!("300:{:x}:{:x}::{:x}", spec.node_id, contract_id, index + 2)
            } else {
                String::new()
            };
            let mycelium_ip = match &vm.network.mycelium {
                Some(m) => format!("400:{:x}::{}", spec.node_id, hex_suffix(&m.hex_seed)),
                None => String::new(),
            };
            let data = ZMachineResult {
                id: format!("{}-{}-{}", spec.node_id, contract_id, wl.name),
                ip,
                planetary_ip,
                mycelium_ip,
                console_url: String::new(),
            };
            to_ok(&data)
        }
        WorkloadData::PublicIp(ip) => {
            let mut data = PublicIpResult::default();
            let mut failed = None;
            if ip.v4 {
                match allocate_ip(farms, spec.farm_id, contract_id) {
                    Some(entry) => {
                        data.ip = entry.ip.parse().ok();
                        data.gateway = entry.gateway.parse().ok();
                        stored.public_ips.insert(wl.name.clone(), entry.ip);
                    }
                    None => failed = Some("no free public ips in farm".to_string()),
                }
            }
            if ip.v6 {
                data.ipv6 = spec.public_config.as_ref().and_then(|c| c.ipv6);
            }
            match failed {
                Some(msg) => WorkloadResult::error(msg),
                None => to_ok(&data),
            }
        }
        WorkloadData::PublicIpv4(_) => match allocate_ip(farms, spec.farm_id, contract_id) {
            Some(entry) => {
                let data = PublicIpResult {
                    ip: entry.ip.parse().ok(),
                    ..Default::default()
                };
                stored.public_ips.insert(wl.name.clone(), entry.ip);
                to_ok(&data)
            }
            None => WorkloadResult::error("no free public ips in farm"),
        },
        WorkloadData::GatewayNameProxy(gw) => {
            let domain = spec
                .public_config
                .as_ref()
                .map(|c| c.domain.clone())
                .unwrap_or_default();
            if domain.is_empty() {
                WorkloadResult::error("node does not support gateways")
            } else if !names.get(&gw.name).copied().unwrap_or(false) {
                WorkloadResult::error(format!("no name contract for '{}'", gw.name))
            } else {
                to_ok(&GatewayProxyResult {
                    fqdn: format!("{}.{}", gw.name, domain),
                })
            }
        }
        WorkloadData::GatewayFqdnProxy(gw) => {
            let has_ipv4 = spec.public_config.as_ref().is_some_and(|c| c.ipv4.is_some());
            if has_ipv4 {
                to_ok(&GatewayProxyResult {
                    fqdn: gw.fqdn.clone(),
                })
            } else {
                WorkloadResult::error("node does not have a public ipv4")
            }
        }
        WorkloadData::Zdb(_) => {
            let ips = spec
                .interfaces
                .get("zos")
                .map(|ips| ips.iter().map(IpAddr::to_string).collect())
                .unwrap_or_default();
            to_ok(&ZdbResult {
                namespace: format!("{}-{}", contract_id, wl.name),
                ips,
                port: ZDB_PORT,
            })
        }
        WorkloadData::Qsfs(_) => to_ok(&QsfsResult {
            path: format!("/mnt/{}", wl.name),
            metrics_endpoint: format!("http://[300:{:x}::1]:9100/metrics", spec.node_id),
        }),
        WorkloadData::ZMount(_) | WorkloadData::Volume(_) => {
            WorkloadResult::ok(json!({ "volume_id": format!("{}-{}", contract_id, wl.name) }))
        }
        WorkloadData::Network(_) | WorkloadData::NetworkLight(_) | WorkloadData::ZLogs(_) => {
            WorkloadResult::ok(Value::Null)
        }
    };
    wl.result = result;
    if wl.result.state == ResultState::Error {
        debug!(node_id = spec.node_id, contract_id, workload = %wl.name, error = %wl.result.error, "workload failed");
    }
}

fn to_ok<T: serde::Serialize>(data: &T) -> WorkloadResult {
    WorkloadResult::ok(serde_json::to_value(data).unwrap_or(Value::Null))
}

fn hex_suffix(seed: &[u8]) -> String {
    seed.iter()
        .take(2)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

fn node_matches(node: &NodeState, farms: &BTreeMap<u32, Farm>, f: &NodeFilter) -> bool {
    let spec = &node.spec;
    let record = node.to_index_node();
    let free = record.free_resources();
    let cfg = spec.public_config.as_ref();

    if f.status.as_ref().is_some_and(|s| *s != record.status) {
        return false;
    }
    if f.free_mru.is_some_and(|v| free.mru < v)
        || f.free_sru.is_some_and(|v| free.sru < v)
        || f.free_hru.is_some_and(|v| free.hru < v)
        || f.total_cru.is_some_and(|v| spec.total.cru < v)
    {
        return false;
    }
    if f.country.as_ref().is_some_and(|c| *c != spec.country) {
        return false;
    }
    if !f.farm_ids.is_empty() && !f.farm_ids.contains(&spec.farm_id) {
        return false;
    }
    if let Some(min) = f.free_ips {
        let free_ips = farms.get(&spec.farm_id).map(Farm::free_public_ips).unwrap_or(0);
        if (free_ips as u64) < min {
            return false;
        }
    }
    if f.ipv4.is_some_and(|want| want != cfg.is_some_and(|c| c.ipv4.is_some()))
        || f.ipv6.is_some_and(|want| want != cfg.is_some_and(|c| c.ipv6.is_some()))
        || f.domain.is_some_and(|want| want != cfg.is_some_and(|c| !c.domain.is_empty()))
    {
        return false;
    }
    if f.rentable.is_some_and(|want| want != spec.rented_by.is_none()) {
        return false;
    }
    if f.rented_by.is_some_and(|twin| spec.rented_by != Some(twin)) {
        return false;
    }
    if f
        .available_for
        .is_some_and(|twin| spec.rented_by.is_some_and(|renter| renter != twin))
    {
        return false;
    }
    if f
        .certification_type
        .as_ref()
        .is_some_and(|c| *c != spec.certification_type)
    {
        return false;
    }
    if f.has_gpu.is_some_and(|want| want != !spec.gpus.is_empty()) {
        return false;
    }
    if f.healthy.is_some_and(|want| want != node.reachable) {
        return false;
    }
    if f.node_id.is_some_and(|id| id != spec.node_id) || f.excluded.contains(&spec.node_id) {
        return false;
    }
    true
}

fn page<T>(items: Vec<T>, limit: Limit) -> Vec<T> {
    let size = limit.size.max(1) as usize;
    let skip = (limit.page.max(1) as usize - 1) * size;
    items.into_iter().skip(skip).take(size).collect()
}

#[async_trait]
impl RmbClient for MemoryGrid {
    async fn call(&self, twin: u32, cmd: &str, payload: Value) -> NodeResult<Value> {
        self.handle(twin, cmd, payload).await
    }
}

#[async_trait]
impl NodeIndex for MemoryGrid {
    async fn nodes(&self, filter: &NodeFilter, limit: Limit) -> NodeResult<Vec<Node>> {
        let fleet = self.fleet.lock().await;
        let matching: Vec<Node> = fleet
            .nodes
            .values()
            .filter(|n| node_matches(n, &fleet.farms, filter))
            .map(NodeState::to_index_node)
            .collect();
        Ok(page(matching, limit))
    }

    async fn node(&self, node_id: u32) -> NodeResult<Node> {
        self.fleet
            .lock()
            .await
            .nodes
            .get(&node_id)
            .map(NodeState::to_index_node)
            .ok_or(NodeError::NodeNotFound(node_id))
    }

    async fn farms(&self, filter: &FarmFilter, limit: Limit) -> NodeResult<Vec<Farm>> {
        let fleet = self.fleet.lock().await;
        let matching: Vec<Farm> = fleet
            .farms
            .values()
            .filter(|f| filter.farm_id.is_none_or(|id| id == f.farm_id))
            .filter(|f| filter.twin_id.is_none_or(|id| id == f.twin_id))
            .filter(|f| filter.free_ips.is_none_or(|n| f.free_public_ips() as u64 >= n))
            .cloned()
            .collect();
        Ok(page(matching, limit))
    }
}
