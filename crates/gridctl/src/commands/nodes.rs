use anyhow::Context;
use clap::Args;
use grid_core::GridConfig;
use grid_node::index::STATUS_UP;
use grid_node::{GridProxyClient, Limit, Node, NodeFilter, NodeIndex};
use grid_types::GIGABYTE;
use tracing::debug;

#[derive(Args, Debug, Default)]
pub struct NodesArgs {
    /// Include nodes that are down.
    #[arg(long)]
    pub all: bool,
    /// Free memory, in GB.
    #[arg(long)]
    pub free_mru_gb: Option<u64>,
    /// Free SSD, in GB.
    #[arg(long)]
    pub free_sru_gb: Option<u64>,
    /// Free HDD, in GB.
    #[arg(long)]
    pub free_hru_gb: Option<u64>,
    /// Total cores.
    #[arg(long)]
    pub cru: Option<u64>,
    #[arg(long)]
    pub country: Option<String>,
    /// Comma-separated farm ids.
    #[arg(long, value_delimiter = ',')]
    pub farm_ids: Vec<u32>,
    /// Free public IPs in the node's farm.
    #[arg(long)]
    pub free_ips: Option<u64>,
    /// Only nodes with a public IPv4.
    #[arg(long)]
    pub ipv4: bool,
    /// Only nodes with a gateway domain.
    #[arg(long)]
    pub domain: bool,
    /// Only nodes with a GPU.
    #[arg(long)]
    pub gpu: bool,
    /// Only nodes available to this twin.
    #[arg(long)]
    pub available_for: Option<u32>,
    #[arg(long, default_value = "1")]
    pub page: u64,
    #[arg(long, default_value = "50")]
    pub size: u64,
}

impl NodesArgs {
    pub fn filter(&self) -> NodeFilter {
        NodeFilter {
            status: (!self.all).then(|| STATUS_UP.to_string()),
            free_mru: self.free_mru_gb.map(|gb| gb * GIGABYTE),
            free_sru: self.free_sru_gb.map(|gb| gb * GIGABYTE),
            free_hru: self.free_hru_gb.map(|gb| gb * GIGABYTE),
            total_cru: self.cru,
            country: self.country.clone(),
            farm_ids: self.farm_ids.clone(),
            free_ips: self.free_ips,
            ipv4: self.ipv4.then_some(true),
            domain: self.domain.then_some(true),
            has_gpu: self.gpu.then_some(true),
            available_for: self.available_for,
            ..Default::default()
        }
    }

    fn limit(&self) -> Limit {
        Limit {
            page: self.page.max(1),
            size: self.size,
        }
    }
}

pub async fn run(config: &GridConfig, args: &NodesArgs, json: bool) -> anyhow::Result<String> {
    let url = config
        .proxy_urls
        .first()
        .context("no grid proxy url configured")?;
    let proxy = GridProxyClient::new(url.as_str())?;
    let filter = args.filter();
    debug!(proxy = %proxy.base_url(), %filter, "searching nodes");

    let nodes = proxy
        .nodes(&filter, args.limit())
        .await
        .with_context(|| format!("failed to query nodes from {url}"))?;
    render(&nodes, json)
}

fn render(nodes: &[Node], json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(nodes)?);
    }
    if nodes.is_empty() {
        return Ok("no nodes found".to_string());
    }
    let lines: Vec<String> = nodes
        .iter()
        .map(|n| {
            let free = n.free_resources();
            format!(
                "{:>6}  farm {:<5} {:<12} cru {:<3} mru {:>4} GB  sru {:>5} GB  {}",
                n.node_id,
                n.farm_id,
                n.country,
                n.total_resources.cru,
                free.mru / GIGABYTE,
                free.sru / GIGABYTE,
                n.status,
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults_to_up_nodes() {
        let args = NodesArgs {
            free_mru_gb: Some(4),
            ipv4: true,
            farm_ids: vec![1, 2],
            ..Default::default()
        };
        let filter = args.filter();
        assert_eq!(filter.status.as_deref(), Some("up"));
        assert_eq!(filter.free_mru, Some(4 * GIGABYTE));
        assert_eq!(filter.ipv4, Some(true));
        assert_eq!(filter.domain, None);
        assert_eq!(filter.farm_ids, vec![1, 2]);

        let all = NodesArgs { all: true, ..Default::default() };
        assert_eq!(all.filter().status, None);
    }

    #[test]
    fn test_render_plain_lists_one_line_per_node() {
        let nodes = vec![
            Node { node_id: 11, farm_id: 1, status: "up".into(), ..Default::default() },
            Node { node_id: 12, farm_id: 1, status: "up".into(), ..Default::default() },
        ];
        let out = render(&nodes, false).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().next().unwrap().trim_start().starts_with("11"));
        assert_eq!(render(&[], false).unwrap(), "no nodes found");
    }
}
