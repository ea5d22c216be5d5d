//! Node index (grid proxy) seam and its record types.

use std::fmt;

use async_trait::async_trait;
use grid_types::{Capacity, GIGABYTE};
use serde::{Deserialize, Serialize};

use crate::error::NodeResult;

pub const STATUS_UP: &str = "up";

/// Public network config as the index reports it (plain strings).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPublicConfig {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub gw4: String,
    #[serde(default)]
    pub gw6: String,
    #[serde(default)]
    pub ipv4: String,
    #[serde(default)]
    pub ipv6: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentInfo {
    #[serde(default)]
    pub dedicated_farm: bool,
    #[serde(default)]
    pub rentable: bool,
    #[serde(default)]
    pub rented: bool,
    #[serde(default)]
    pub renter: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: u32,
    pub farm_id: u32,
    pub twin_id: u32,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(rename = "total_resources", default)]
    pub total_resources: Capacity,
    #[serde(rename = "used_resources", default)]
    pub used_resources: Capacity,
    #[serde(default)]
    pub public_config: IndexPublicConfig,
    #[serde(rename = "rent", default)]
    pub rent_info: RentInfo,
    #[serde(default)]
    pub certification_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "num_gpu", default)]
    pub num_gpu: u32,
    #[serde(default)]
    pub healthy: bool,
}

impl Node {
    pub fn is_up(&self) -> bool {
        self.status == STATUS_UP
    }

    /// Free capacity. SSD counts twice its total since the node overcommits it.
    pub fn free_resources(&self) -> Capacity {
        let total = &self.total_resources;
        let used = &self.used_resources;
        Capacity {
            cru: total.cru.saturating_sub(used.cru),
            mru: total.mru.saturating_sub(used.mru),
            hru: total.hru.saturating_sub(used.hru),
            sru: (2 * total.sru).saturating_sub(used.sru),
            ipv4u: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmPublicIp {
    #[serde(default)]
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub contract_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub name: String,
    pub farm_id: u32,
    pub twin_id: u32,
    #[serde(default)]
    pub certification_type: String,
    #[serde(default)]
    pub dedicated: bool,
    #[serde(default)]
    pub public_ips: Vec<FarmPublicIp>,
}

impl Farm {
    pub fn free_public_ips(&self) -> usize {
        self.public_ips.iter().filter(|ip| ip.contract_id == 0).count()
    }
}

/// Node search criteria. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFilter {
    pub status: Option<String>,
    pub free_mru: Option<u64>,
    pub free_sru: Option<u64>,
    pub free_hru: Option<u64>,
    pub total_cru: Option<u64>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub farm_ids: Vec<u32>,
    pub free_ips: Option<u64>,
    pub ipv4: Option<bool>,
    pub ipv6: Option<bool>,
    pub domain: Option<bool>,
    pub rentable: Option<bool>,
    pub rented_by: Option<u32>,
    pub available_for: Option<u32>,
    pub certification_type: Option<String>,
    pub has_gpu: Option<bool>,
    pub healthy: Option<bool>,
    pub node_id: Option<u32>,
    pub excluded: Vec<u32>,
}

impl NodeFilter {
    /// Nodes that are up and report a public IPv4.
    pub fn public_ipv4() -> Self {
        Self {
            status: Some(STATUS_UP.to_string()),
            ipv4: Some(true),
            ..Default::default()
        }
    }

    /// Query string pairs in the grid proxy's spelling.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(v) = &self.status {
            q.push(("status", v.clone()));
        }
        if let Some(v) = self.free_mru {
            q.push(("free_mru", v.to_string()));
        }
        if let Some(v) = self.free_sru {
            q.push(("free_sru", v.to_string()));
        }
        if let Some(v) = self.free_hru {
            q.push(("free_hru", v.to_string()));
        }
        if let Some(v) = self.total_cru {
            q.push(("total_cru", v.to_string()));
        }
        if let Some(v) = &self.country {
            q.push(("country", v.clone()));
        }
        if let Some(v) = &self.region {
            q.push(("region", v.clone()));
        }
        if !self.farm_ids.is_empty() {
            q.push(("farm_ids", join(&self.farm_ids)));
        }
        if let Some(v) = self.free_ips {
            q.push(("free_ips", v.to_string()));
        }
        if let Some(v) = self.ipv4 {
            q.push(("ipv4", v.to_string()));
        }
        if let Some(v) = self.ipv6 {
            q.push(("ipv6", v.to_string()));
        }
        if let Some(v) = self.domain {
            q.push(("domain", v.to_string()));
        }
        if let Some(v) = self.rentable {
            q.push(("rentable", v.to_string()));
        }
        if let Some(v) = self.rented_by {
            q.push(("rented_by", v.to_string()));
        }
        if let Some(v) = self.available_for {
            q.push(("available_for", v.to_string()));
        }
        if let Some(v) = &self.certification_type {
            q.push(("certification_type", v.clone()));
        }
        if let Some(v) = self.has_gpu {
            q.push(("has_gpu", v.to_string()));
        }
        if let Some(v) = self.healthy {
            q.push(("healthy", v.to_string()));
        }
        if let Some(v) = self.node_id {
            q.push(("node_id", v.to_string()));
        }
        if !self.excluded.is_empty() {
            q.push(("excluded", join(&self.excluded)));
        }
        q
    }
}

fn join(ids: &[u32]) -> String {
    ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

impl fmt::Display for NodeFilter {
    /// Human summary used in "no node found" errors.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.farm_ids.is_empty() {
            parts.push(format!("farm ids: {:?}", self.farm_ids));
        }
        if let Some(v) = self.free_mru {
            parts.push(format!("mru: {} GB", v / GIGABYTE));
        }
        if let Some(v) = self.free_sru {
            parts.push(format!("sru: {} GB", v / GIGABYTE));
        }
        if let Some(v) = self.free_hru {
            parts.push(format!("hru: {} GB", v / GIGABYTE));
        }
        if let Some(v) = self.free_ips {
            parts.push(format!("free ips: {v}"));
        }
        if let Some(v) = self.domain {
            parts.push(format!("domain: {v}"));
        }
        if let Some(v) = self.ipv4 {
            parts.push(format!("ipv4: {v}"));
        }
        if let Some(v) = &self.country {
            parts.push(format!("country: {v}"));
        }
        if let Some(v) = self.available_for {
            parts.push(format!("available for: {v}"));
        }
        f.write_str(&parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    /// One-based page number.
    pub page: u64,
    pub size: u64,
}

impl Default for Limit {
    fn default() -> Self {
        Self { page: 1, size: 50 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FarmFilter {
    pub farm_id: Option<u32>,
    pub twin_id: Option<u32>,
    pub free_ips: Option<u64>,
}

/// Paginated node / farm catalog.
#[async_trait]
pub trait NodeIndex: Send + Sync {
    /// One page of matching nodes, in index order.
    async fn nodes(&self, filter: &NodeFilter, limit: Limit) -> NodeResult<Vec<Node>>;

    async fn node(&self, node_id: u32) -> NodeResult<Node>;

    async fn farms(&self, filter: &FarmFilter, limit: Limit) -> NodeResult<Vec<Farm>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_resources_doubles_ssd() {
        let node = Node {
            total_resources: Capacity { cru: 8, mru: 16, sru: 100, hru: 1000, ipv4u: 0 },
            used_resources: Capacity { cru: 2, mru: 4, sru: 150, hru: 0, ipv4u: 0 },
            ..Default::default()
        };
        let free = node.free_resources();
        assert_eq!(free.cru, 6);
        assert_eq!(free.mru, 12);
        assert_eq!(free.sru, 50);
        assert_eq!(free.hru, 1000);
    }

    #[test]
    fn test_filter_rendering() {
        let filter = NodeFilter {
            free_mru: Some(4 * GIGABYTE),
            farm_ids: vec![1, 2],
            ipv4: Some(true),
            ..Default::default()
        };
        assert_eq!(filter.to_string(), "farm ids: [1, 2], mru: 4 GB, ipv4: true");
        let q = filter.query_pairs();
        assert!(q.contains(&("farm_ids", "1,2".to_string())));
        assert!(q.contains(&("free_mru", (4 * GIGABYTE).to_string())));
    }

    #[test]
    fn test_node_json() {
        let raw = r#"{"nodeId":11,"farmId":1,"twinId":29,"country":"Belgium","total_resources":{"cru":4,"sru":1000,"hru":0,"mru":8},"used_resources":{"cru":0,"sru":0,"hru":0,"mru":0},"publicConfig":{"domain":"gw.dev.grid.tf","gw4":"","gw6":"","ipv4":"185.1.1.2/24","ipv6":""},"rent":{"rented":false,"renter":0},"status":"up","healthy":true}"#;
        let node: Node = serde_json::from_str(raw).unwrap();
        assert_eq!(node.node_id, 11);
        assert!(node.is_up());
        assert_eq!(node.public_config.domain, "gw.dev.grid.tf");
        assert_eq!(node.total_resources.sru, 1000);
    }
}
