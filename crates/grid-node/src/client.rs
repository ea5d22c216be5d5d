//! Typed RPC client for one node.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use grid_types::{is_public_ip, Deployment, Workload};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{NodeError, NodeResult};
use crate::rmb::RmbClient;
use crate::types::{Gpu, PoolMetrics, PublicConfig, Statistics, Version};

/// Lowest WireGuard port handed out (ports below are privileged).
pub const MIN_WG_PORT: u16 = 1024;
/// Highest WireGuard port handed out (start of the ephemeral range).
pub const MAX_WG_PORT: u16 = 32767;

const RANDOM_PORT_DRAWS: usize = 1000;

/// Node RPC client bound to the node's twin.
///
/// Every call runs under the client's timeout; cloning is cheap.
#[derive(Clone)]
pub struct NodeClient {
    node_twin: u32,
    bus: Arc<dyn RmbClient>,
    timeout: Duration,
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("node_twin", &self.node_twin)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NodeClient {
    pub fn new(node_twin: u32, bus: Arc<dyn RmbClient>, timeout: Duration) -> Self {
        Self { node_twin, bus, timeout }
    }

    pub fn twin(&self) -> u32 {
        self.node_twin
    }

    async fn call<T: DeserializeOwned>(&self, cmd: &str, payload: Value) -> NodeResult<T> {
        debug!(twin_id = self.node_twin, cmd, "rmb call");
        let reply = tokio::time::timeout(self.timeout, self.bus.call(self.node_twin, cmd, payload))
            .await
            .map_err(|_| NodeError::Timeout {
                twin: self.node_twin,
                cmd: cmd.to_string(),
            })??;
        serde_json::from_value(reply).map_err(|source| NodeError::Decode {
            cmd: cmd.to_string(),
            source,
        })
    }

    async fn call_unit(&self, cmd: &str, payload: Value) -> NodeResult<()> {
        let _: Value = self.call(cmd, payload).await?;
        Ok(())
    }

    fn payload<T: Serialize>(value: &T) -> NodeResult<Value> {
        Ok(serde_json::to_value(value)?)
    }

    // ── Deployments ──────────────────────────────────────────────

    /// Push a new deployment. Its contract must already exist on chain.
    pub async fn deployment_deploy(&self, dl: &Deployment) -> NodeResult<()> {
        self.call_unit("zos.deployment.deploy", Self::payload(dl)?).await
    }

    pub async fn deployment_update(&self, dl: &Deployment) -> NodeResult<()> {
        self.call_unit("zos.deployment.update", Self::payload(dl)?).await
    }

    pub async fn deployment_get(&self, contract_id: u64) -> NodeResult<Deployment> {
        self.call("zos.deployment.get", json!({ "contract_id": contract_id }))
            .await
    }

    pub async fn deployment_delete(&self, contract_id: u64) -> NodeResult<()> {
        self.call_unit("zos.deployment.delete", json!({ "contract_id": contract_id }))
            .await
    }

    pub async fn deployment_list(&self) -> NodeResult<Vec<Deployment>> {
        self.call("zos.deployment.list", Value::Null).await
    }

    /// Current state of every workload of a deployment.
    pub async fn deployment_changes(&self, contract_id: u64) -> NodeResult<Vec<Workload>> {
        self.call("zos.deployment.changes", json!({ "contract_id": contract_id }))
            .await
    }

    // ── Network ──────────────────────────────────────────────────

    /// Private IPs already taken on `network_name`.
    pub async fn network_list_private_ips(&self, network_name: &str) -> NodeResult<Vec<String>> {
        self.call(
            "zos.network.list_private_ips",
            json!({ "network_name": network_name }),
        )
        .await
    }

    pub async fn network_list_wg_ports(&self) -> NodeResult<Vec<u16>> {
        self.call("zos.network.list_wg_ports", Value::Null).await
    }

    pub async fn network_list_public_ips(&self) -> NodeResult<Vec<String>> {
        self.call("zos.network.list_public_ips", Value::Null).await
    }

    pub async fn network_list_interfaces(&self) -> NodeResult<HashMap<String, Vec<IpAddr>>> {
        self.call("zos.network.interfaces", Value::Null).await
    }

    pub async fn network_get_public_config(&self) -> NodeResult<PublicConfig> {
        self.call("zos.network.public_config_get", Value::Null).await
    }

    pub async fn network_set_public_config(&self, cfg: &PublicConfig) -> NodeResult<()> {
        self.call_unit("zos.network.public_config_set", Self::payload(cfg)?)
            .await
    }

    pub async fn has_public_ipv6(&self) -> NodeResult<bool> {
        self.call("zos.network.has_ipv6", Value::Null).await
    }

    // ── System ───────────────────────────────────────────────────

    pub async fn system_version(&self) -> NodeResult<Version> {
        self.call("zos.system.version", Value::Null).await
    }

    pub async fn system_get_node_features(&self) -> NodeResult<Vec<String>> {
        self.call("zos.system.node_features_get", Value::Null).await
    }

    pub async fn statistics(&self) -> NodeResult<Statistics> {
        self.call("zos.statistics.get", Value::Null).await
    }

    pub async fn pools(&self) -> NodeResult<Vec<PoolMetrics>> {
        self.call("zos.storage.pools", Value::Null).await
    }

    pub async fn gpus(&self) -> NodeResult<Vec<Gpu>> {
        self.call("zos.gpu.list", Value::Null).await
    }

    // ── Helpers ──────────────────────────────────────────────────

    pub async fn is_node_up(&self) -> NodeResult<()> {
        self.system_version().await.map(|_| ())
    }

    /// Draw a WireGuard port that is neither used on the node nor in `used`.
    pub async fn get_node_free_wg_port(&self, node_id: u32, used: &[u16]) -> NodeResult<u16> {
        let node_used = self.network_list_wg_ports().await?;
        debug!(node_id, ?node_used, "reserved wireguard ports");
        let port = pick_free_port(&node_used, used).ok_or(NodeError::NoFreeWgPort(node_id))?;
        debug!(node_id, port, "selected wireguard port");
        Ok(port)
    }

    /// Publicly reachable address of the node.
    ///
    /// The public config's IPv4 wins, then its IPv6, then the first public
    /// address on the `zos` interface.
    pub async fn get_node_endpoint(&self) -> NodeResult<IpAddr> {
        if let Ok(cfg) = self.network_get_public_config().await {
            let candidate = cfg.ipv4.or(cfg.ipv6);
            if let Some(net) = candidate {
                if is_public_ip(&net.ip) {
                    return Ok(net.ip);
                }
            }
        }

        let ifaces = self.network_list_interfaces().await?;
        let zos = ifaces
            .get("zos")
            .ok_or_else(|| NodeError::NoAccessibleInterface("no zos interface".to_string()))?;
        zos.iter().copied().find(is_public_ip).ok_or_else(|| {
            NodeError::NoAccessibleInterface(
                "no public ipv4 or ipv6 on zos interface found".to_string(),
            )
        })
    }
}

/// Random draws first; a crowded range falls back to the lowest free port.
fn pick_free_port(node_used: &[u16], used: &[u16]) -> Option<u16> {
    let taken: HashSet<u16> = node_used.iter().chain(used).copied().collect();
    let free = |port: &u16| !taken.contains(port);
    let mut rng = rand::thread_rng();
    for _ in 0..RANDOM_PORT_DRAWS {
        let port = rng.gen_range(MIN_WG_PORT..=MAX_WG_PORT);
        if free(&port) {
            return Some(port);
        }
    }
    (MIN_WG_PORT..=MAX_WG_PORT).find(free)
}
