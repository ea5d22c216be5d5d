//! HTTP client for the grid proxy node index.

use std::time::Duration;

use async_trait::async_trait;
use grid_types::Capacity;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{NodeError, NodeResult};
use crate::index::{Farm, FarmFilter, IndexPublicConfig, Limit, Node, NodeFilter, NodeIndex, RentInfo};

const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// `/nodes/{id}` nests the capacity under `capacity`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeWithNestedCapacity {
    node_id: u32,
    farm_id: u32,
    twin_id: u32,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    capacity: NestedCapacity,
    #[serde(default)]
    public_config: IndexPublicConfig,
    #[serde(rename = "rent", default)]
    rent_info: RentInfo,
    #[serde(default)]
    certification_type: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "num_gpu", default)]
    num_gpu: u32,
    #[serde(default)]
    healthy: bool,
}

#[derive(Debug, Default, Deserialize)]
struct NestedCapacity {
    #[serde(default)]
    total_resources: Capacity,
    #[serde(default)]
    used_resources: Capacity,
}

impl From<NodeWithNestedCapacity> for Node {
    fn from(n: NodeWithNestedCapacity) -> Self {
        Node {
            node_id: n.node_id,
            farm_id: n.farm_id,
            twin_id: n.twin_id,
            country: n.country,
            city: n.city,
            total_resources: n.capacity.total_resources,
            used_resources: n.capacity.used_resources,
            public_config: n.public_config,
            rent_info: n.rent_info,
            certification_type: n.certification_type,
            status: n.status,
            num_gpu: n.num_gpu,
            healthy: n.healthy,
        }
    }
}

/// [`NodeIndex`] over the grid proxy REST API.
pub struct GridProxyClient {
    base_url: String,
    http: reqwest::Client,
}

impl GridProxyClient {
    pub fn new(base_url: impl Into<String>) -> NodeResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(PROXY_TIMEOUT).build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> NodeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, ?query, "grid proxy request");
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NodeError::ProxyStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    /// Liveness probe.
    pub async fn ping(&self) -> NodeResult<()> {
        let _: serde_json::Value = self.get("/ping", &[]).await?;
        Ok(())
    }
}

fn limit_pairs(limit: Limit) -> [(&'static str, String); 2] {
    [("page", limit.page.to_string()), ("size", limit.size.to_string())]
}

#[async_trait]
impl NodeIndex for GridProxyClient {
    async fn nodes(&self, filter: &NodeFilter, limit: Limit) -> NodeResult<Vec<Node>> {
        let mut query = filter.query_pairs();
        query.extend(limit_pairs(limit));
        self.get("/nodes", &query).await
    }

    async fn node(&self, node_id: u32) -> NodeResult<Node> {
        let path = format!("/nodes/{node_id}");
        match self.get::<NodeWithNestedCapacity>(&path, &[]).await {
            Ok(node) => Ok(node.into()),
            Err(NodeError::ProxyStatus { status: 404, .. }) => Err(NodeError::NodeNotFound(node_id)),
            Err(e) => Err(e),
        }
    }

    async fn farms(&self, filter: &FarmFilter, limit: Limit) -> NodeResult<Vec<Farm>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(id) = filter.farm_id {
            query.push(("farm_id", id.to_string()));
        }
        if let Some(twin) = filter.twin_id {
            query.push(("twin_id", twin.to_string()));
        }
        if let Some(ips) = filter.free_ips {
            query.push(("free_ips", ips.to_string()));
        }
        query.extend(limit_pairs(limit));
        self.get("/farms", &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_capacity_node() {
        let raw = r#"{"nodeId":14,"farmId":1,"twinId":22,"capacity":{"total_resources":{"cru":8,"sru":512,"hru":0,"mru":16},"used_resources":{"cru":1,"sru":12,"hru":0,"mru":2}},"publicConfig":{"domain":"","gw4":"","gw6":"","ipv4":"","ipv6":""},"status":"up"}"#;
        let node: Node = serde_json::from_str::<NodeWithNestedCapacity>(raw).unwrap().into();
        assert_eq!(node.node_id, 14);
        assert_eq!(node.total_resources.mru, 16);
        assert_eq!(node.used_resources.sru, 12);
        assert!(node.public_config.ipv4.is_empty());
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = GridProxyClient::new("https://gridproxy.dev.grid.tf/").unwrap();
        assert_eq!(client.base_url(), "https://gridproxy.dev.grid.tf");
    }
}
