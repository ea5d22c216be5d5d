use std::sync::Arc;
use std::time::Duration;

use grid_chain::{MemoryChain, Substrate};
use grid_core::{Identity, KeyType};
use grid_node::{
    filter_nodes, get_public_node, DeviceType, FilterLimit, MemoryGrid, NodeClientPool, NodeError,
    NodeFilter, NodeIndex, PoolMetrics, PublicConfig, SimNode, StorageRequest,
};
use grid_types::{
    Deployment, IpNet, PublicIp, ResultState, Workload, WorkloadData, ZMount, GIGABYTE,
};

const TWIN: u32 = 7;

struct Fixture {
    identity: Identity,
    chain: Arc<MemoryChain>,
    grid: Arc<MemoryGrid>,
    pool: NodeClientPool,
}

fn fixture(nodes: Vec<SimNode>) -> Fixture {
    let identity = Identity::from_seed([3u8; 32], KeyType::Ed25519).unwrap();
    let mut chain = MemoryChain::new().with_twin(identity.public_key(), TWIN, 100_000_000);
    let mut grid = MemoryGrid::new().with_farm(1, "freefarm", &["185.206.122.33/24", "185.206.122.34/24"]);
    for node in nodes {
        chain = chain.with_node(node.node_id, node.twin_id);
        grid = grid.with_node(node);
    }
    let chain = Arc::new(chain);
    let grid = Arc::new(grid.attach_chain(chain.clone()));
    let pool = NodeClientPool::new(chain.clone(), grid.clone(), Duration::from_secs(5));
    Fixture { identity, chain, grid, pool }
}

fn node(id: u32) -> SimNode {
    SimNode::new(id, 1, 100 + id).with_capacity(8, 16 * GIGABYTE, 500 * GIGABYTE, 0)
}

async fn contracted(f: &Fixture, node_id: u32, workloads: Vec<Workload>) -> Deployment {
    let mut dl = Deployment::new_grid_deployment(TWIN, workloads);
    dl.sign(TWIN, &f.identity).unwrap();
    let hash = dl.challenge_hash_hex();
    dl.contract_id = f
        .chain
        .create_node_contract(&f.identity, node_id, "", &hash, dl.count_public_ips(), None)
        .await
        .unwrap();
    dl
}

fn disk(name: &str, gb: u64) -> Workload {
    Workload::new(name, WorkloadData::ZMount(ZMount { size: gb * GIGABYTE }))
}

#[tokio::test]
async fn test_deploy_then_changes_report_ok() {
    let f = fixture(vec![node(1)]);
    let dl = contracted(&f, 1, vec![disk("data", 10)]).await;
    let client = f.pool.get_node_client(1).await.unwrap();

    client.deployment_deploy(&dl).await.unwrap();
    let changes = client.deployment_changes(dl.contract_id).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].result.state, ResultState::Ok);

    // A second push of the same contract is refused.
    let err = client.deployment_deploy(&dl).await.unwrap_err();
    assert!(matches!(err, NodeError::Remote { .. }), "{err}");
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn test_hash_mismatch_rejected() {
    let f = fixture(vec![node(1)]);
    let mut dl = contracted(&f, 1, vec![disk("data", 10)]).await;
    dl.workloads.push(disk("extra", 1));
    dl.sign(TWIN, &f.identity).unwrap();

    let client = f.pool.get_node_client(1).await.unwrap();
    let err = client.deployment_deploy(&dl).await.unwrap_err();
    assert!(err.to_string().contains("contract hash mismatch"), "{err}");
}

#[tokio::test]
async fn test_public_ip_allocated_from_farm() {
    let f = fixture(vec![node(1)]);
    let ip = Workload::new("ip", WorkloadData::PublicIp(PublicIp { v4: true, v6: false }));
    let dl = contracted(&f, 1, vec![ip]).await;
    let client = f.pool.get_node_client(1).await.unwrap();
    client.deployment_deploy(&dl).await.unwrap();

    let farm = f.grid.farm(1).await.unwrap();
    assert_eq!(farm.free_public_ips(), 1);
    assert_eq!(client.network_list_public_ips().await.unwrap(), vec!["185.206.122.33/24"]);

    client.deployment_delete(dl.contract_id).await.unwrap();
    assert_eq!(f.grid.farm(1).await.unwrap().free_public_ips(), 2);
}

#[tokio::test]
async fn test_stuck_and_failing_workloads() {
    let f = fixture(vec![node(1), node(2)]);
    f.grid.set_stuck_in_init(1, true).await;
    f.grid.fail_workload(2, "data", "disk exploded").await;

    let stuck = contracted(&f, 1, vec![disk("data", 1)]).await;
    let c1 = f.pool.get_node_client(1).await.unwrap();
    c1.deployment_deploy(&stuck).await.unwrap();
    let changes = c1.deployment_changes(stuck.contract_id).await.unwrap();
    assert_eq!(changes[0].result.state, ResultState::Init);

    let failing = contracted(&f, 2, vec![disk("data", 1)]).await;
    let c2 = f.pool.get_node_client(2).await.unwrap();
    c2.deployment_deploy(&failing).await.unwrap();
    let changes = c2.deployment_changes(failing.contract_id).await.unwrap();
    assert_eq!(changes[0].result.state, ResultState::Error);
    assert_eq!(changes[0].result.error, "disk exploded");
}

#[tokio::test]
async fn test_unreachable_node() {
    let f = fixture(vec![node(1)]);
    f.grid.set_reachable(1, false).await;
    let client = f.pool.get_node_client(1).await.unwrap();
    let err = client.system_version().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(f.grid.node(1).await.unwrap().status, "down");
}

#[tokio::test]
async fn test_filter_by_storage_pools() {
    let small = node(1).with_pool(PoolMetrics {
        name: "ssd0".into(),
        device_type: DeviceType::Ssd,
        size: 20 * GIGABYTE,
        used: 0,
    });
    let big = node(2).with_pool(PoolMetrics {
        name: "ssd0".into(),
        device_type: DeviceType::Ssd,
        size: 200 * GIGABYTE,
        used: 0,
    });
    let f = fixture(vec![small, big]);

    let filter = NodeFilter {
        free_sru: Some(50 * GIGABYTE),
        ..Default::default()
    };
    let storage = StorageRequest {
        ssd: vec![50 * GIGABYTE],
        ..Default::default()
    };
    let nodes = filter_nodes(f.grid.as_ref(), &f.pool, &filter, &storage, FilterLimit::default())
        .await
        .unwrap();
    assert_eq!(nodes.iter().map(|n| n.node_id).collect::<Vec<_>>(), vec![2]);

    let storage = StorageRequest {
        ssd: vec![500 * GIGABYTE],
        ..Default::default()
    };
    let err = filter_nodes(f.grid.as_ref(), &f.pool, &filter, &storage, FilterLimit::default())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "could not find any node with free ssd pools: 50 GB and free hdd pools: 0 GB"
    );
}

#[tokio::test]
async fn test_filter_pages_and_pings() {
    let f = fixture((1..=7).map(node).collect());
    f.grid.set_reachable(3, false).await;

    let limit = FilterLimit {
        page_size: 2,
        limit: Some(4),
    };
    let nodes = filter_nodes(
        f.grid.as_ref(),
        &f.pool,
        &NodeFilter::default(),
        &StorageRequest::default(),
        limit,
    )
    .await
    .unwrap();
    assert_eq!(nodes.iter().map(|n| n.node_id).collect::<Vec<_>>(), vec![1, 2, 4, 5]);

    let filter = NodeFilter {
        farm_ids: vec![9],
        ..Default::default()
    };
    let err = filter_nodes(f.grid.as_ref(), &f.pool, &filter, &StorageRequest::default(), FilterLimit::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "could not find any node with options: farm ids: [9]");
}

#[tokio::test]
async fn test_filter_with_zero_limit_returns_nothing() {
    let f = fixture((1..=3).map(node).collect());
    let nodes = filter_nodes(
        f.grid.as_ref(),
        &f.pool,
        &NodeFilter::default(),
        &StorageRequest::default(),
        FilterLimit::with_limit(0),
    )
    .await
    .unwrap();
    assert!(nodes.is_empty());
    assert_eq!(f.grid.calls("zos.system.version").await, 0);
}

#[tokio::test]
async fn test_public_node_prefers_preferred() {
    let public = |id: u32, ip: &str| {
        node(id).with_public_config(PublicConfig {
            ipv4: Some(ip.parse::<IpNet>().unwrap()),
            ..Default::default()
        })
    };
    let f = fixture(vec![
        public(1, "10.0.0.5/24"),
        public(2, "185.1.1.2/24"),
        public(3, "185.1.1.3/24"),
        node(4),
    ]);

    let index: &dyn NodeIndex = f.grid.as_ref();
    assert_eq!(get_public_node(index, &f.pool, &[]).await.unwrap(), 2);
    assert_eq!(get_public_node(index, &f.pool, &[3]).await.unwrap(), 3);
    // A private address never qualifies, even when preferred.
    assert_eq!(get_public_node(index, &f.pool, &[1]).await.unwrap(), 2);
}

#[tokio::test]
async fn test_no_public_node() {
    let f = fixture(vec![node(1)]);
    let err = get_public_node(f.grid.as_ref(), &f.pool, &[1]).await.unwrap_err();
    assert_eq!(err.to_string(), "no nodes with public IPv4");
}
