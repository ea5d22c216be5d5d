use std::sync::Arc;

use grid_chain::{MemoryChain, Substrate};
use grid_client::{ClientError, GridClient};
use grid_core::{GridConfig, Identity, Network};
use grid_graphql::MemoryContractsIndex;
use grid_node::{DeviceType, MemoryGrid, PoolMetrics, PublicConfig, SimNode};
use grid_types::{Backend, IpNet, GIGABYTE};
use grid_workloads::{
    GatewayFqdnProxy, GatewayNameProxy, K8sCluster, K8sNode, Vm, VmDeployment, WorkloadError, ZNet,
};

const TWIN: u32 = 11;
const SEED: [u8; 32] = [9u8; 32];

struct Harness {
    client: GridClient,
    chain: Arc<MemoryChain>,
    grid: Arc<MemoryGrid>,
}

async fn harness(nodes: Vec<SimNode>) -> Harness {
    let config = GridConfig::new(Network::Dev, hex_seed());
    let identity = Identity::from_seed(SEED, config.key_type).unwrap();
    let mut chain = MemoryChain::new().with_twin(identity.public_key(), TWIN, 100_000_000);
    let mut grid = MemoryGrid::new().with_farm(1, "freefarm", &["185.206.122.33/24"]);
    for node in nodes {
        chain = chain.with_node(node.node_id, node.twin_id);
        grid = grid.with_node(node);
    }
    let chain = Arc::new(chain);
    let grid = Arc::new(grid.attach_chain(chain.clone()));
    let contracts = Arc::new(MemoryContractsIndex::new(chain.clone()));
    let client = GridClient::new(config, chain.clone(), grid.clone(), grid.clone(), contracts)
        .await
        .unwrap();
    Harness { client, chain, grid }
}

fn hex_seed() -> String {
    "09".repeat(32)
}

fn node(id: u32) -> SimNode {
    SimNode::new(id, 1, 100 + id)
        .with_capacity(8, 16 * GIGABYTE, 500 * GIGABYTE, 0)
        .with_pool(PoolMetrics {
            name: "ssd0".into(),
            device_type: DeviceType::Ssd,
            size: 500 * GIGABYTE,
            used: 0,
        })
}

fn public_node(id: u32, last_octet: u8) -> SimNode {
    node(id).with_public_config(PublicConfig {
        iface_type: "macvlan".into(),
        ipv4: Some(format!("185.206.122.{last_octet}/24").parse().unwrap()),
        ipv6: None,
        gw4: Some("185.206.122.1".parse().unwrap()),
        gw6: None,
        domain: "gent01.dev.grid.tf".into(),
    })
}

fn range() -> IpNet {
    IpNet::v4(10, 20, 0, 0, 16)
}

fn vm(name: &str) -> Vm {
    Vm {
        name: name.into(),
        flist: "https://hub.grid.tf/tf-official-apps/base:latest.flist".into(),
        entrypoint: "/sbin/zinit init".into(),
        cpu: 2,
        memory_mb: 4096,
        rootfs_size_mb: 10 * 1024,
        planetary: true,
        ..Default::default()
    }
}

fn k8s_member(name: &str, node_id: u32) -> K8sNode {
    K8sNode {
        name: name.into(),
        node_id,
        disk_size_gb: 5,
        planetary: true,
        cpu: 2,
        memory_mb: 2048,
        ..Default::default()
    }
}

async fn deployed_network(h: &Harness, name: &str, nodes: Vec<u32>) -> ZNet {
    let mut znet = ZNet::new(name, nodes, range());
    h.client.networks().deploy(&mut znet).await.unwrap();
    znet
}

// ── Networks ────────────────────────────────────────────────────

#[tokio::test]
async fn test_network_deploy_records_subnets() {
    let h = harness(vec![node(1)]).await;
    let znet = deployed_network(&h, "net1", vec![1]).await;

    assert_eq!(znet.node_deployment_id.len(), 1);
    let subnet: IpNet = "10.20.2.0/24".parse().unwrap();
    assert_eq!(znet.nodes_ip_range.get(&1), Some(&subnet));
    assert_eq!(h.client.state().node_subnet("net1", 1), Some(subnet));
    assert_eq!(h.client.state().contract_ids(1), vec![znet.node_deployment_id[&1]]);
    assert!(znet.access_wg_config.is_empty());
}

#[tokio::test]
async fn test_network_with_hidden_node_relays_through_public_member() {
    let h = harness(vec![public_node(1, 10), node(2)]).await;
    let mut znet = ZNet::new("mesh", vec![1, 2], range()).with_wg_access();
    h.client.networks().deploy(&mut znet).await.unwrap();

    assert_eq!(znet.public_node_id, 1);
    assert_eq!(znet.node_deployment_id.len(), 2);
    assert!(znet.access_wg_config.contains("Endpoint = 185.206.122.10:"));

    let redeployed_ports = znet.wg_port.clone();
    h.client.networks().deploy(&mut znet).await.unwrap();
    assert_eq!(znet.wg_port, redeployed_ports);
    assert_eq!(h.chain.calls().await.create_node, 2);
}

#[tokio::test]
async fn test_network_cancel_forgets_everything() {
    let h = harness(vec![node(1)]).await;
    let mut znet = deployed_network(&h, "net1", vec![1]).await;

    h.client.networks().cancel(&mut znet).await.unwrap();
    assert!(znet.node_deployment_id.is_empty());
    assert!(znet.nodes_ip_range.is_empty());
    assert!(h.client.state().node_subnet("net1", 1).is_none());
    assert!(h.chain.active_contracts().await.is_empty());
}

#[tokio::test]
async fn test_network_sync_drops_contracts_cancelled_elsewhere() {
    let h = harness(vec![node(1)]).await;
    let mut znet = deployed_network(&h, "net1", vec![1]).await;

    let contract_id = znet.node_deployment_id[&1];
    h.chain.cancel_contract(h.client.identity(), contract_id).await.unwrap();
    h.client.networks().sync(&mut znet).await.unwrap();
    assert!(znet.node_deployment_id.is_empty());
    assert!(znet.keys.is_empty());
}

#[tokio::test]
async fn test_network_batch_deploy_and_batch_cancel() {
    let h = harness(vec![node(1), node(2)]).await;
    let mut nets = vec![ZNet::new("neta", vec![1], range()), ZNet::new("netb", vec![2], range())];
    h.client.networks().batch_deploy(&mut nets).await.unwrap();

    assert_eq!(h.chain.calls().await.batch_create, 1);
    assert!(nets.iter().all(|n| n.node_deployment_id.len() == 1));
    assert!(h.client.state().node_subnet("netb", 2).is_some());

    h.client.networks().batch_cancel(&mut nets).await.unwrap();
    assert_eq!(h.chain.calls().await.batch_cancel, 1);
    assert!(h.chain.active_contracts().await.is_empty());
    assert!(h.client.state().node_subnet("neta", 1).is_none());
}

// ── VM deployments ──────────────────────────────────────────────

#[tokio::test]
async fn test_vm_gets_first_host_and_planetary_ip() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut dl = VmDeployment::new("vm1", 1, "net1").with_vm(vm("vm1"));
    h.client.deployments().deploy(&mut dl).await.unwrap();

    assert_ne!(dl.contract_id, 0);
    assert_eq!(dl.node_deployment_id.get(&1), Some(&dl.contract_id));
    assert_eq!(dl.ip_range, "10.20.2.0/24");
    let machine = &dl.vms[0];
    assert_eq!(machine.ip, "10.20.2.2");
    assert!(machine.planetary_ip.starts_with("300:"));
    assert_eq!(h.chain.active_contracts().await.len(), 2);
}

#[tokio::test]
async fn test_second_vm_on_node_takes_next_host() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut first = VmDeployment::new("first", 1, "net1").with_vm(vm("first"));
    h.client.deployments().deploy(&mut first).await.unwrap();
    let mut second = VmDeployment::new("second", 1, "net1").with_vm(vm("second"));
    h.client.deployments().deploy(&mut second).await.unwrap();

    assert_eq!(first.vms[0].ip, "10.20.2.2");
    assert_eq!(second.vms[0].ip, "10.20.2.3");
}

#[tokio::test]
async fn test_vm_update_keeps_contract_and_ip() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut dl = VmDeployment::new("vm1", 1, "net1").with_vm(vm("vm1"));
    h.client.deployments().deploy(&mut dl).await.unwrap();
    let contract_id = dl.contract_id;

    dl.vms[0].memory_mb = 8192;
    h.client.deployments().deploy(&mut dl).await.unwrap();
    assert_eq!(dl.contract_id, contract_id);
    assert_eq!(dl.vms[0].ip, "10.20.2.2");
    assert_eq!(dl.vms[0].memory_mb, 8192);
    assert_eq!(h.chain.calls().await.update_node, 1);
}

#[tokio::test]
async fn test_vm_cannot_take_an_ip_held_by_another_deployment() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut first = VmDeployment::new("first", 1, "net1").with_vm(vm("first"));
    h.client.deployments().deploy(&mut first).await.unwrap();
    assert_eq!(first.vms[0].ip, "10.20.2.2");

    let mut taken = vm("second");
    taken.ip = "10.20.2.2".into();
    let mut second = VmDeployment::new("second", 1, "net1").with_vm(taken);
    let err = h.client.deployments().deploy(&mut second).await.unwrap_err();
    assert!(
        matches!(err, ClientError::Workload(WorkloadError::IpTaken { ref vm, .. }) if vm == "second"),
        "{err}"
    );
    assert_eq!(h.chain.active_contracts().await.len(), 2);
}

#[tokio::test]
async fn test_vm_siblings_cannot_request_the_same_ip() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut a = vm("a");
    a.ip = "10.20.2.7".into();
    let mut b = vm("b");
    b.ip = "10.20.2.7".into();
    let mut dl = VmDeployment::new("pair", 1, "net1").with_vm(a).with_vm(b);
    let err = h.client.deployments().deploy(&mut dl).await.unwrap_err();
    assert!(matches!(err, ClientError::Workload(WorkloadError::IpTaken { .. })), "{err}");
    assert_eq!(dl.contract_id, 0);
}

#[tokio::test]
async fn test_vm_on_node_outside_network_is_rejected() {
    let h = harness(vec![node(1), node(2)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut dl = VmDeployment::new("vm1", 2, "net1").with_vm(vm("vm1"));
    let err = h.client.deployments().deploy(&mut dl).await.unwrap_err();
    assert!(matches!(err, ClientError::NodeNotInNetwork { node: 2, .. }), "{err}");
    assert_eq!(h.chain.active_contracts().await.len(), 1);
}

#[tokio::test]
async fn test_vm_cancel_clears_computed_fields() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;
    let mut dl = VmDeployment::new("vm1", 1, "net1").with_vm(vm("vm1"));
    h.client.deployments().deploy(&mut dl).await.unwrap();
    let contract_id = dl.contract_id;

    h.client.deployments().cancel(&mut dl).await.unwrap();
    assert_eq!(dl.contract_id, 0);
    assert!(dl.vms[0].planetary_ip.is_empty());
    assert!(!h.chain.get_contract(contract_id).await.unwrap().is_created());
    assert!(!h.client.state().contract_ids(1).contains(&contract_id));
}

#[tokio::test]
async fn test_vm_batch_deploy_hands_out_distinct_ips() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut dls = vec![
        VmDeployment::new("vma", 1, "net1").with_vm(vm("vma")),
        VmDeployment::new("vmb", 1, "net1").with_vm(vm("vmb")),
    ];
    h.client.deployments().batch_deploy(&mut dls).await.unwrap();

    assert!(dls.iter().all(|dl| dl.contract_id != 0));
    assert_eq!(dls[0].vms[0].ip, "10.20.2.2");
    assert_eq!(dls[1].vms[0].ip, "10.20.2.3");
}

#[tokio::test]
async fn test_vm_batch_deploy_keeps_each_solution_provider() {
    let h = harness(vec![node(1)]).await;
    deployed_network(&h, "net1", vec![1]).await;

    let mut first = VmDeployment::new("vma", 1, "net1").with_vm(vm("vma"));
    first.solution_provider = Some(3);
    let mut second = VmDeployment::new("vmb", 1, "net1").with_vm(vm("vmb"));
    second.solution_provider = Some(7);
    let mut dls = vec![first, second];
    h.client.deployments().batch_deploy(&mut dls).await.unwrap();

    let mut providers = Vec::new();
    for dl in &dls {
        providers.push(h.chain.get_contract(dl.contract_id).await.unwrap().solution_provider_id);
    }
    assert_eq!(providers, vec![Some(3), Some(7)]);
}

// ── Gateways ────────────────────────────────────────────────────

fn name_gateway(backend: &str) -> GatewayNameProxy {
    GatewayNameProxy {
        node_id: 2,
        name: "foo".into(),
        backends: vec![Backend(backend.into())],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_gateway_name_update_keeps_contracts() {
    let h = harness(vec![public_node(2, 20)]).await;
    let mut gw = name_gateway("http://1.1.1.1");
    h.client.gateway_names().deploy(&mut gw).await.unwrap();

    assert_eq!(gw.fqdn, "foo.gent01.dev.grid.tf");
    let (name_contract, node_contract) = (gw.name_contract_id, gw.contract_id);
    assert_ne!(name_contract, 0);
    assert_ne!(node_contract, 0);

    gw.backends = vec![Backend("http://2.2.2.2".into())];
    h.client.gateway_names().deploy(&mut gw).await.unwrap();
    assert_eq!(gw.name_contract_id, name_contract);
    assert_eq!(gw.contract_id, node_contract);
    assert_eq!(gw.backends[0].0, "http://2.2.2.2");

    let calls = h.chain.calls().await;
    assert_eq!(calls.create_name, 1);
    assert_eq!(calls.create_node, 1);
    assert_eq!(calls.update_node, 1);
}

#[tokio::test]
async fn test_gateway_name_cancel_releases_both_contracts() {
    let h = harness(vec![public_node(2, 20)]).await;
    let mut gw = name_gateway("http://1.1.1.1");
    h.client.gateway_names().deploy(&mut gw).await.unwrap();

    h.client.gateway_names().cancel(&mut gw).await.unwrap();
    assert_eq!(gw.contract_id, 0);
    assert_eq!(gw.name_contract_id, 0);
    assert!(h.chain.active_contracts().await.is_empty());
}

#[tokio::test]
async fn test_gateway_name_failure_releases_new_name_contract() {
    let h = harness(vec![public_node(2, 20)]).await;
    h.grid.fail_workload(2, "foo", "proxy refused").await;

    let mut gw = name_gateway("http://1.1.1.1");
    let err = h.client.gateway_names().deploy(&mut gw).await.unwrap_err();
    assert!(err.to_string().contains("proxy refused"), "{err}");
    assert_eq!(gw.name_contract_id, 0);
    assert!(h.chain.active_contracts().await.is_empty());
}

#[tokio::test]
async fn test_gateway_name_needs_domain() {
    let mut bare = node(2);
    bare.public_config = Some(PublicConfig {
        ipv4: Some("185.206.122.20/24".parse().unwrap()),
        ..Default::default()
    });
    let h = harness(vec![bare]).await;
    let err = h.client.gateway_names().deploy(&mut name_gateway("http://1.1.1.1")).await.unwrap_err();
    assert!(matches!(err, ClientError::NoDomain(2)), "{err}");
}

#[tokio::test]
async fn test_gateway_fqdn_needs_public_ipv4() {
    let mut no_ipv4 = node(3);
    no_ipv4.public_config = Some(PublicConfig {
        domain: "gent01.dev.grid.tf".into(),
        ..Default::default()
    });
    let h = harness(vec![no_ipv4, public_node(4, 40)]).await;

    let mut gw = GatewayFqdnProxy {
        node_id: 3,
        name: "site".into(),
        fqdn: "site.example.com".into(),
        backends: vec![Backend("http://1.1.1.1".into())],
        ..Default::default()
    };
    let err = h.client.gateway_fqdns().deploy(&mut gw).await.unwrap_err();
    assert!(matches!(err, ClientError::NoPublicIpv4(3)), "{err}");
    assert_eq!(
        err.to_string(),
        "node 3 doesn't contain a public IP in its public config"
    );

    gw.node_id = 4;
    h.client.gateway_fqdns().deploy(&mut gw).await.unwrap();
    assert_ne!(gw.contract_id, 0);
    assert_eq!(gw.fqdn, "site.example.com");
}

// ── Kubernetes and plans ────────────────────────────────────────

#[tokio::test]
async fn test_k8s_plan_deploys_network_and_members() {
    let h = harness(vec![public_node(1, 10), node(2)]).await;
    let cluster = K8sCluster {
        master: k8s_member("master1", 1),
        workers: vec![k8s_member("worker1", 2)],
        token: "tokentoken".into(),
        flist: "https://hub.grid.tf/tf-official-apps/k3s-latest.flist".into(),
        ssh_key: "ssh-ed25519 AAAA user@host".into(),
        ..Default::default()
    };
    let plan = h.client.deploy_k8s_with_network(cluster).await.unwrap();

    assert_eq!(plan.network.name, "master1network");
    assert_eq!(plan.network.node_deployment_id.len(), 2);
    let cluster = &plan.cluster;
    assert_eq!(cluster.node_deployment_id.len(), 2);
    let master_subnet = plan.network.nodes_ip_range[&1];
    assert!(master_subnet.contains(&cluster.master.ip.parse().unwrap()));
    assert_eq!(cluster.workers.len(), 1);
    assert_eq!(cluster.workers[0].name, "worker1");
    assert!(cluster.workers[0].planetary_ip.starts_with("300:"));
}

#[tokio::test]
async fn test_k8s_update_keeps_member_ips() {
    let h = harness(vec![public_node(1, 10), node(2)]).await;
    let cluster = K8sCluster {
        master: k8s_member("master1", 1),
        workers: vec![k8s_member("worker1", 2)],
        token: "tokentoken".into(),
        flist: "https://hub.grid.tf/tf-official-apps/k3s-latest.flist".into(),
        ..Default::default()
    };
    let mut plan = h.client.deploy_k8s_with_network(cluster).await.unwrap();
    let master_ip = plan.cluster.master.ip.clone();
    let worker_ip = plan.cluster.workers[0].ip.clone();
    let contracts = plan.cluster.node_deployment_id.clone();

    plan.cluster.workers[0].memory_mb = 4096;
    h.client.k8s().deploy(&mut plan.cluster).await.unwrap();
    assert_eq!(plan.cluster.master.ip, master_ip);
    assert_eq!(plan.cluster.workers[0].ip, worker_ip);
    assert_eq!(plan.cluster.workers[0].memory_mb, 4096);
    assert_eq!(plan.cluster.node_deployment_id, contracts);
}

#[tokio::test]
async fn test_k8s_cancel_removes_member_contracts() {
    let h = harness(vec![public_node(1, 10), node(2)]).await;
    let cluster = K8sCluster {
        master: k8s_member("master1", 1),
        workers: vec![k8s_member("worker1", 2)],
        token: "tokentoken".into(),
        flist: "https://hub.grid.tf/tf-official-apps/k3s-latest.flist".into(),
        ..Default::default()
    };
    let mut plan = h.client.deploy_k8s_with_network(cluster).await.unwrap();

    h.client.k8s().cancel(&mut plan.cluster).await.unwrap();
    assert!(plan.cluster.node_deployment_id.is_empty());
    assert!(plan.cluster.master.planetary_ip.is_empty());
    assert_eq!(h.chain.active_contracts().await.len(), 2);
}

#[tokio::test]
async fn test_vm_plan_picks_a_node() {
    let h = harness(vec![node(5)]).await;
    let plan = h.client.deploy_vm_with_network(vm("web"), None, None).await.unwrap();

    assert_eq!(plan.network.name, "webnetwork");
    let machine = plan.vm().unwrap();
    assert_eq!(machine.node_id, 5);
    assert_eq!(machine.ip, "10.20.2.2");
    let known = h.client.state().contract_ids(5);
    assert_eq!(known.len(), 2);
    assert!(known.contains(&plan.deployment.contract_id));
}

#[tokio::test]
async fn test_vm_plan_failure_cancels_network() {
    let h = harness(vec![node(1)]).await;
    h.grid.fail_workload(1, "web", "image pull failed").await;

    let mut machine = vm("web");
    machine.node_id = 1;
    let err = h.client.deploy_vm_with_network(machine, None, None).await.unwrap_err();
    assert!(err.to_string().contains("image pull failed"), "{err}");
    assert!(h.chain.active_contracts().await.is_empty());
    assert!(h.client.state().node_subnet("webnetwork", 1).is_none());
}

// ── Client lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_by_project_name() {
    let h = harness(vec![node(1), public_node(2, 20)]).await;
    let mut znet = ZNet::new("net1", vec![1], range());
    znet.solution_type = "proj-A".into();
    h.client.networks().deploy(&mut znet).await.unwrap();

    let mut dl = VmDeployment::new("vm1", 1, "net1").with_vm(vm("vm1"));
    dl.solution_type = "proj-A".into();
    h.client.deployments().deploy(&mut dl).await.unwrap();

    let mut gw = name_gateway("http://1.1.1.1");
    gw.solution_type = "proj-A".into();
    h.client.gateway_names().deploy(&mut gw).await.unwrap();
    assert_eq!(h.chain.active_contracts().await.len(), 4);

    h.client.cancel_by_project_name("proj-A").await.unwrap();
    assert_eq!(h.chain.calls().await.batch_cancel, 1);
    assert!(h.chain.active_contracts().await.is_empty());
    assert!(h.client.state().contract_ids(1).is_empty());
    let left = h
        .client
        .contracts()
        .list_contracts_of_project_name("proj-A", false)
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn test_unknown_twin_is_rejected() {
    let chain = Arc::new(MemoryChain::new());
    let grid = Arc::new(MemoryGrid::new());
    let contracts = Arc::new(MemoryContractsIndex::new(chain.clone()));
    let config = GridConfig::new(Network::Dev, hex_seed());
    let err = GridClient::new(config, chain, grid.clone(), grid, contracts)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoTwin(_)), "{err}");
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let h = harness(vec![node(1)]).await;
    h.client.close().await;
    h.client.close().await;
    assert!(h.client.is_closed());

    let mut znet = ZNet::new("net1", vec![1], range());
    let err = h.client.networks().deploy(&mut znet).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}
