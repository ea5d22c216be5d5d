//! Node selection on top of the node index.
//!
//! Candidates come from the index page by page; each candidate is then
//! checked against the live node, either by a ping or by fitting the
//! requested disks into its storage pools.

use std::collections::HashSet;
use std::net::IpAddr;

use futures::future::join_all;
use grid_types::{is_public_ip, IpNet, GIGABYTE};
use tracing::{debug, warn};

use crate::error::{NodeError, NodeResult};
use crate::index::{Limit, Node, NodeFilter, NodeIndex};
use crate::pool::NodeClientPool;
use crate::types::{DeviceType, PoolMetrics};

/// Index page size used when walking candidates.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Pages fetched concurrently per wave.
const PAGE_FANOUT: usize = 4;

/// Disks a deployment will ask the node to provision, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageRequest {
    pub ssd: Vec<u64>,
    pub hdd: Vec<u64>,
    /// VM root filesystems. Provisioned on ssd after every zmount.
    pub rootfs: Vec<u64>,
}

impl StorageRequest {
    pub fn is_empty(&self) -> bool {
        self.ssd.is_empty() && self.hdd.is_empty() && self.rootfs.is_empty()
    }

    /// Ssd disks largest first, followed by the root filesystems.
    fn ssd_order(&self) -> Vec<u64> {
        let mut ssd = self.ssd.clone();
        ssd.sort_unstable_by(|a, b| b.cmp(a));
        ssd.extend(&self.rootfs);
        ssd
    }

    fn hdd_order(&self) -> Vec<u64> {
        let mut hdd = self.hdd.clone();
        hdd.sort_unstable_by(|a, b| b.cmp(a));
        hdd
    }
}

/// Paging and result-size knobs of [`filter_nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLimit {
    pub page_size: u64,
    /// Stop once this many nodes passed. `None` walks every page and
    /// `Some(0)` asks for nothing.
    pub limit: Option<usize>,
}

impl Default for FilterLimit {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            limit: None,
        }
    }
}

impl FilterLimit {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }
}

/// Nodes matching `filter` that answer and can hold `storage`.
///
/// Results keep index order across pages. With storage requested, a node
/// passes only if every disk fits into its pools (see [`has_enough_storage`]);
/// otherwise a node passes when it answers `system.version`.
pub async fn filter_nodes(
    index: &dyn NodeIndex,
    pool: &NodeClientPool,
    filter: &NodeFilter,
    storage: &StorageRequest,
    limit: FilterLimit,
) -> NodeResult<Vec<Node>> {
    if limit.limit == Some(0) {
        return Ok(Vec::new());
    }
    let page_size = limit.page_size.max(1);
    let check_storage = !storage.is_empty() || filter.free_sru.is_some() || filter.free_hru.is_some();
    let ssd = storage.ssd_order();
    let hdd = storage.hdd_order();

    let mut found: Vec<Node> = Vec::new();
    let mut seen_any = false;
    let mut next_page = 1u64;

    'pages: loop {
        let wave: Vec<u64> = (next_page..next_page + PAGE_FANOUT as u64).collect();
        next_page += PAGE_FANOUT as u64;

        let pages = join_all(wave.iter().map(|&page| {
            index.nodes(filter, Limit { page, size: page_size })
        }))
        .await;

        for page in pages {
            let nodes = page?;
            let last_page = (nodes.len() as u64) < page_size;
            seen_any |= !nodes.is_empty();

            let checks = join_all(nodes.iter().map(|node| async {
                if check_storage {
                    node_fits(pool, node.node_id, &ssd, &hdd).await
                } else {
                    node_answers(pool, node.node_id).await
                }
            }))
            .await;

            for (node, ok) in nodes.into_iter().zip(checks) {
                if !ok {
                    continue;
                }
                found.push(node);
                if limit.limit.is_some_and(|l| found.len() >= l) {
                    break 'pages;
                }
            }
            if last_page {
                break 'pages;
            }
        }
    }

    debug!(count = found.len(), filter = %filter, "filtered nodes");

    if !seen_any {
        return Err(NodeError::NoNodesMatching(filter.to_string()));
    }
    if found.is_empty() {
        if check_storage {
            return Err(NodeError::NoStorage {
                ssd_gb: filter.free_sru.unwrap_or_default() / GIGABYTE,
                hdd_gb: filter.free_hru.unwrap_or_default() / GIGABYTE,
            });
        }
        if limit.limit.is_none() {
            return Err(NodeError::NoNodesMatching(filter.to_string()));
        }
    }
    Ok(found)
}

async fn node_answers(pool: &NodeClientPool, node_id: u32) -> bool {
    let client = match pool.get_node_client(node_id).await {
        Ok(client) => client,
        Err(error) => {
            debug!(node_id, %error, "failed to get node client");
            return false;
        }
    };
    match client.is_node_up().await {
        Ok(()) => true,
        Err(error) => {
            debug!(node_id, %error, "failed to ping node");
            false
        }
    }
}

async fn node_fits(pool: &NodeClientPool, node_id: u32, ssd: &[u64], hdd: &[u64]) -> bool {
    let client = match pool.get_node_client(node_id).await {
        Ok(client) => client,
        Err(error) => {
            debug!(node_id, %error, "failed to get node client");
            return false;
        }
    };
    match client.pools().await {
        Ok(pools) => {
            has_enough_storage(&pools, ssd, DeviceType::Ssd)
                && has_enough_storage(&pools, hdd, DeviceType::Hdd)
        }
        Err(error) => {
            debug!(node_id, %error, "failed to get node pools");
            false
        }
    }
}

/// Whether `disks`, provisioned in order, fit the pools of `device`.
///
/// Each disk goes to the pool with the most free space at that moment,
/// which is how the node itself places them.
pub fn has_enough_storage(pools: &[PoolMetrics], disks: &[u64], device: DeviceType) -> bool {
    if disks.is_empty() {
        return true;
    }
    let mut free: Vec<u64> = pools
        .iter()
        .filter(|p| p.device_type == device)
        .map(PoolMetrics::free)
        .collect();
    if free.is_empty() {
        return false;
    }
    for &disk in disks {
        let Some(largest) = free.iter_mut().max() else {
            return false;
        };
        if *largest < disk {
            return false;
        }
        *largest -= disk;
    }
    true
}

/// Pick a node with a routable public IPv4, preferring `preferred`.
pub async fn get_public_node(
    index: &dyn NodeIndex,
    pool: &NodeClientPool,
    preferred: &[u32],
) -> NodeResult<u32> {
    let mut nodes = match filter_nodes(
        index,
        pool,
        &NodeFilter::public_ipv4(),
        &StorageRequest::default(),
        FilterLimit::with_limit(DEFAULT_PAGE_SIZE as usize),
    )
    .await
    {
        Ok(nodes) => nodes,
        Err(NodeError::NoNodesMatching(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let listed: HashSet<u32> = nodes.iter().map(|n| n.node_id).collect();
    for &node_id in preferred {
        if listed.contains(&node_id) {
            continue;
        }
        match index.node(node_id).await {
            Ok(node) if node.is_up() && !node.public_config.ipv4.is_empty() => nodes.push(node),
            Ok(_) => {}
            Err(error) => warn!(node_id, %error, "failed to get node from the grid proxy"),
        }
    }

    // stable partition: preferred first, index order otherwise
    let preferred: HashSet<u32> = preferred.iter().copied().collect();
    nodes.sort_by_key(|n| !preferred.contains(&n.node_id));

    for node in &nodes {
        let ipv4 = &node.public_config.ipv4;
        let ip: IpAddr = match ipv4.parse::<IpNet>() {
            Ok(net) => net.ip,
            Err(error) => {
                debug!(node_id = node.node_id, ipv4 = %ipv4, %error, "could not parse public ip");
                continue;
            }
        };
        if !is_public_ip(&ip) {
            debug!(node_id = node.node_id, ipv4 = %ipv4, "public ip is private");
            continue;
        }
        debug!(node_id = node.node_id, ipv4 = %ipv4, "selected public node");
        return Ok(node.node_id);
    }
    Err(NodeError::NoPublicNode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(device_type: DeviceType, size: u64, used: u64) -> PoolMetrics {
        PoolMetrics {
            name: format!("{device_type:?}-{size}"),
            device_type,
            size,
            used,
        }
    }

    #[test]
    fn test_has_enough_storage_first_fit_decreasing() {
        let pools = vec![
            pool(DeviceType::Ssd, 100, 0),
            pool(DeviceType::Ssd, 60, 0),
            pool(DeviceType::Hdd, 1000, 0),
        ];
        // 70 -> pool A (30 left), 50 -> pool B (10 left), 25 -> pool A (5 left)
        assert!(has_enough_storage(&pools, &[70, 50, 25], DeviceType::Ssd));
        assert!(!has_enough_storage(&pools, &[70, 50, 40], DeviceType::Ssd));
        assert!(has_enough_storage(&pools, &[], DeviceType::Ssd));
        assert!(!has_enough_storage(&pools[..2], &[1], DeviceType::Hdd));
    }

    #[test]
    fn test_rootfs_goes_after_payload_disks() {
        let request = StorageRequest {
            ssd: vec![10, 30, 20],
            hdd: vec![5, 50],
            rootfs: vec![2, 1],
        };
        assert_eq!(request.ssd_order(), vec![30, 20, 10, 2, 1]);
        assert_eq!(request.hdd_order(), vec![50, 5]);
        assert!(!request.is_empty());
    }
}
