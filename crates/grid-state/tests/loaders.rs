use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use grid_chain::{MemoryChain, Substrate};
use grid_core::{Identity, KeyType};
use grid_deployer::{Deployer, SolutionProviders};
use grid_node::{MemoryGrid, NodeClientPool, SimNode};
use grid_state::State;
use grid_types::{Deployment, IpNet, GIGABYTE};
use grid_workloads::{Disk, K8sCluster, K8sNode, Vm, VmDeployment, ZNet};

const TWIN: u32 = 7;

struct Harness {
    chain: Arc<MemoryChain>,
    deployer: Deployer,
    state: State,
}

fn harness(nodes: &[u32]) -> Harness {
    let identity = Arc::new(Identity::from_seed([9u8; 32], KeyType::Ed25519).unwrap());
    let mut chain = MemoryChain::new().with_twin(identity.public_key(), TWIN, 100_000_000);
    let mut grid = MemoryGrid::new().with_farm(1, "freefarm", &[]);
    for &id in nodes {
        chain = chain.with_node(id, 100 + id);
        grid = grid.with_node(
            SimNode::new(id, 1, 100 + id).with_capacity(16, 64 * GIGABYTE, 500 * GIGABYTE, 0),
        );
    }
    let chain = Arc::new(chain);
    let grid = Arc::new(grid.attach_chain(chain.clone()));
    let pool = Arc::new(NodeClientPool::new(chain.clone(), grid.clone(), Duration::from_secs(5)));
    let deployer = Deployer::new(identity, TWIN, chain.clone(), pool.clone(), grid);
    let state = State::new(chain.clone(), pool);
    Harness { chain, deployer, state }
}

fn endpoint(node: u32) -> Option<IpAddr> {
    Some(IpAddr::V4(Ipv4Addr::new(185, 206, 122, node as u8)))
}

async fn deploy(h: &Harness, deployments: HashMap<u32, Deployment>) -> HashMap<u32, u64> {
    let current = h
        .deployer
        .deploy(&HashMap::new(), deployments, &SolutionProviders::new())
        .await
        .into_result()
        .unwrap();
    h.state.store_node_deployments(&current);
    current
}

async fn deploy_network(h: &Harness, nodes: Vec<u32>) -> ZNet {
    let mut net = ZNet::new("net", nodes.clone(), IpNet::v4(10, 20, 0, 0, 16));
    let endpoints = nodes.iter().map(|&n| (n, endpoint(n))).collect();
    let dls = net
        .generate_deployments(&endpoints, &mut HashMap::new(), 0, TWIN)
        .unwrap();
    net.node_deployment_id = deploy(h, dls.into_iter().collect()).await;
    net
}

fn vm(name: &str, ip: &str) -> Vm {
    Vm {
        name: name.into(),
        node_id: 1,
        network_name: "net".into(),
        flist: "https://hub.grid.tf/tf-official-apps/base:latest.flist".into(),
        cpu: 1,
        memory_mb: 512,
        planetary: true,
        ip: ip.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_load_network_records_subnets() {
    let h = harness(&[1, 2]);
    let deployed = deploy_network(&h, vec![1, 2]).await;

    let loaded = h.state.load_network_from_grid("net").await.unwrap();
    assert_eq!(loaded.nodes, vec![1, 2]);
    assert_eq!(loaded.nodes_ip_range, deployed.nodes_ip_range);
    assert_eq!(loaded.wg_port, deployed.wg_port);
    assert_eq!(loaded.node_deployment_id, deployed.node_deployment_id);
    assert_eq!(h.state.node_subnet("net", 1), deployed.nodes_ip_range.get(&1).copied());

    let err = h.state.load_network_from_grid("other").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_load_deployment_and_single_workloads() {
    let h = harness(&[1]);
    let net = deploy_network(&h, vec![1]).await;

    let mut bundle = VmDeployment::new("web", 1, "net")
        .with_disk(Disk::new("data", 2))
        .with_vm(vm("vm1", "10.20.2.2"));
    let dl = bundle.zos_deployment(TWIN).unwrap();
    deploy(&h, HashMap::from([(1, dl)])).await;

    let loaded = h.state.load_deployment_from_grid(1, "web").await.unwrap();
    assert_eq!(loaded.solution_type, "vm/web");
    assert_eq!(loaded.ip_range, net.nodes_ip_range[&1].to_string());
    assert_eq!(loaded.vms.len(), 1);
    assert_eq!(loaded.vms[0].ip, "10.20.2.2");
    assert!(!loaded.vms[0].planetary_ip.is_empty());

    let disk = h.state.load_disk_from_grid(1, "data", "web").await.unwrap();
    assert_eq!(disk.size_gb, 2);
    let machine = h.state.load_vm_from_grid(1, "vm1", "web").await.unwrap();
    assert_eq!(machine.cpu, 1);

    let missing = h.state.load_vm_from_grid(1, "nope", "web").await.unwrap_err();
    assert!(missing.is_not_found());
    assert_eq!(
        missing.to_string(),
        "could not get workload from node 1: failed to find workload 'nope'"
    );
}

#[tokio::test]
async fn test_empty_node_metadata_falls_back_to_chain() {
    let h = harness(&[1]);
    let mut bundle = VmDeployment::new("web", 1, "");
    bundle.disks.push(Disk::new("data", 1));
    let mut dl = bundle.zos_deployment(TWIN).unwrap();
    let metadata = dl.metadata.clone();
    dl.metadata.clear();

    // the contract carries the metadata even though the node copy is empty
    let identity = Identity::from_seed([9u8; 32], KeyType::Ed25519).unwrap();
    let contract_id = h
        .chain
        .create_node_contract(&identity, 1, &metadata, &dl.challenge_hash_hex(), 0, None)
        .await
        .unwrap();
    dl.contract_id = contract_id;
    dl.sign(TWIN, &identity).unwrap();
    let client = h.state.pool().get_node_client(1).await.unwrap();
    client.deployment_deploy(&dl).await.unwrap();
    h.state.store_contract_ids(1, &[contract_id]);

    let disk = h.state.load_disk_from_grid(1, "data", "web").await.unwrap();
    assert_eq!(disk.size_gb, 1);
}

#[tokio::test]
async fn test_load_k8s_cluster() {
    let h = harness(&[1, 2]);
    let net = deploy_network(&h, vec![1, 2]).await;

    let member = |name: &str, node_id: u32| K8sNode {
        name: name.into(),
        node_id,
        disk_size_gb: 5,
        cpu: 2,
        memory_mb: 1024,
        ..Default::default()
    };
    let mut cluster = K8sCluster {
        master: member("master", 1),
        workers: vec![member("worker", 2)],
        token: "token123".into(),
        network_name: "net".into(),
        flist: "https://hub.grid.tf/tf-official-apps/threefoldtech-k3s-latest.flist".into(),
        nodes_ip_range: net.nodes_ip_range.clone(),
        ..Default::default()
    };
    cluster.assign_node_ips(&HashMap::new()).unwrap();
    let metadata = cluster.generate_metadata().unwrap();
    let deployments = cluster
        .zos_workloads()
        .into_iter()
        .map(|(node, wls)| {
            let mut dl = Deployment::new_grid_deployment(TWIN, wls);
            dl.metadata = metadata.clone();
            (node, dl)
        })
        .collect();
    let current = deploy(&h, deployments).await;

    let loaded = h.state.load_k8s_from_grid(&[1, 2], "master").await.unwrap();
    assert_eq!(loaded.master.name, "master");
    assert_eq!(loaded.workers[0].name, "worker");
    assert_eq!(loaded.token, "token123");
    assert_eq!(loaded.node_deployment_id, current);
    assert_eq!(loaded.nodes_ip_range, net.nodes_ip_range);
}
