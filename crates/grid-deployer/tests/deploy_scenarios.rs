use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use grid_chain::{ChainError, ChainOp, ContractState, MemoryChain, Substrate};
use grid_core::{Identity, KeyType};
use grid_deployer::{BatchSolutionProviders, Deployer, DeployerError, SolutionProviders};
use grid_node::{MemoryGrid, NodeClientPool, PublicConfig, SimNode};
use grid_types::{
    Deployment, GatewayFqdnProxy, IpNet, PublicIp, ResultState, Workload, WorkloadData, ZMount,
    GIGABYTE,
};
use tokio::sync::watch;
use tokio::time::Instant;

const TWIN: u32 = 7;

struct Harness {
    identity: Arc<Identity>,
    chain: Arc<MemoryChain>,
    grid: Arc<MemoryGrid>,
    pool: Arc<NodeClientPool>,
}

impl Harness {
    fn deployer(&self) -> Deployer {
        Deployer::new(
            self.identity.clone(),
            TWIN,
            self.chain.clone(),
            self.pool.clone(),
            self.grid.clone(),
        )
    }

    async fn contract_state(&self, contract_id: u64) -> ContractState {
        self.chain.get_contract(contract_id).await.unwrap().state
    }
}

fn harness(nodes: Vec<SimNode>) -> Harness {
    let identity = Arc::new(Identity::from_seed([5u8; 32], KeyType::Sr25519).unwrap());
    let mut chain = MemoryChain::new().with_twin(identity.public_key(), TWIN, 100_000_000);
    let mut grid = MemoryGrid::new().with_farm(1, "freefarm", &["185.206.122.33/24", "185.206.122.34/24"]);
    for node in nodes {
        chain = chain.with_node(node.node_id, node.twin_id);
        grid = grid.with_node(node);
    }
    let chain = Arc::new(chain);
    let grid = Arc::new(grid.attach_chain(chain.clone()));
    let pool = Arc::new(NodeClientPool::new(chain.clone(), grid.clone(), Duration::from_secs(5)));
    Harness { identity, chain, grid, pool }
}

fn node(id: u32) -> SimNode {
    SimNode::new(id, 1, 100 + id).with_capacity(8, 16 * GIGABYTE, 500 * GIGABYTE, 1000 * GIGABYTE)
}

fn disk(name: &str, gb: u64) -> Workload {
    Workload::new(name, WorkloadData::ZMount(ZMount { size: gb * GIGABYTE }))
}

fn ip(name: &str) -> Workload {
    Workload::new(name, WorkloadData::PublicIp(PublicIp { v4: true, v6: false }))
}

fn dl(workloads: Vec<Workload>) -> Deployment {
    Deployment::new_grid_deployment(TWIN, workloads)
}

fn none() -> SolutionProviders {
    SolutionProviders::new()
}

#[tokio::test]
async fn test_create_then_identical_redeploy_is_noop() {
    let h = harness(vec![node(1)]);
    let deployer = h.deployer();

    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("data", 10)]))]), &none())
        .await
        .into_result()
        .unwrap();
    let contract_id = current[&1];

    let on_node = h.grid.deployments_on(1).await;
    assert_eq!(on_node.len(), 1);
    let contract = h.chain.get_contract(contract_id).await.unwrap();
    assert_eq!(
        contract.node_contract().unwrap().deployment_hash,
        on_node[0].challenge_hash_hex()
    );

    let again = deployer
        .deploy(&current, HashMap::from([(1, dl(vec![disk("data", 10)]))]), &none())
        .await
        .into_result()
        .unwrap();
    assert_eq!(again, current);
    let calls = h.chain.calls().await;
    assert_eq!(calls.batch_create, 1);
    assert_eq!(calls.update_node, 0);
    assert_eq!(calls.batch_cancel, 0);
    assert_eq!(h.grid.calls("zos.deployment.update").await, 0);
}

#[tokio::test]
async fn test_update_bumps_only_changed_workloads() {
    let h = harness(vec![node(1)]);
    let deployer = h.deployer();
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("a", 1), disk("b", 2)]))]), &none())
        .await
        .into_result()
        .unwrap();

    let next = dl(vec![disk("a", 1), disk("b", 5), disk("c", 3)]);
    let after = deployer
        .deploy(&current, HashMap::from([(1, next)]), &none())
        .await
        .into_result()
        .unwrap();
    assert_eq!(after, current);

    let on_node = h.grid.deployments_on(1).await.remove(0);
    assert_eq!(on_node.version, 1);
    assert_eq!(on_node.get("a").unwrap().version, 0);
    assert_eq!(on_node.get("b").unwrap().version, 1);
    assert_eq!(on_node.get("c").unwrap().version, 1);
    assert!(on_node.workloads.iter().all(|w| w.result.state == ResultState::Ok));

    let contract = h.chain.get_contract(current[&1]).await.unwrap();
    assert_eq!(contract.node_contract().unwrap().deployment_hash, on_node.challenge_hash_hex());

    // Renaming a workload is an update too.
    let renamed = dl(vec![disk("a", 1), disk("b", 5), disk("d", 3)]);
    deployer
        .deploy(&current, HashMap::from([(1, renamed)]), &none())
        .await
        .into_result()
        .unwrap();
    let on_node = h.grid.deployments_on(1).await.remove(0);
    assert_eq!(on_node.version, 2);
    assert_eq!(on_node.get("b").unwrap().version, 1);
    assert_eq!(on_node.get("d").unwrap().version, 2);
    assert!(on_node.get("c").is_err());
}

#[tokio::test]
async fn test_capacity_shortfall_rejected_before_any_chain_write() {
    let h = harness(vec![SimNode::new(1, 1, 101).with_capacity(4, 8 * GIGABYTE, 100 * GIGABYTE, 0)]);
    let outcome = h
        .deployer()
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("big", 300)]))]), &none())
        .await;

    assert!(outcome.current.is_empty());
    let err = outcome.result.unwrap_err();
    assert!(matches!(err, DeployerError::NotEnoughResources { node: 1, .. }), "{err}");
    assert_eq!(
        err.to_string(),
        format!(
            "node 1 does not have enough resources. needed: [mru: 0, sru: {}, hru: 0], free: [mru: {}, sru: {}, hru: 0]",
            300 * GIGABYTE,
            8 * GIGABYTE,
            200 * GIGABYTE
        )
    );
    assert_eq!(h.chain.calls().await.batch_create, 0);
}

#[tokio::test]
async fn test_public_ip_growth_rejected_on_update() {
    let h = harness(vec![node(1)]);
    let deployer = h.deployer();
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![ip("ip1")]))]), &none())
        .await
        .into_result()
        .unwrap();

    let outcome = deployer
        .deploy(&current, HashMap::from([(1, dl(vec![ip("ip1"), ip("ip2")]))]), &none())
        .await;
    assert_eq!(outcome.current, current);
    let err = outcome.result.unwrap_err();
    assert_eq!(
        err.to_string(),
        "currently, it's not possible to increase the number of reserved public ips in a deployment, node: 1, current: 1, requested: 2"
    );
    assert_eq!(h.chain.calls().await.update_node, 0);
}

#[tokio::test]
async fn test_farm_without_enough_public_ips() {
    let h = harness(vec![node(1)]);
    let outcome = h
        .deployer()
        .deploy(
            &HashMap::new(),
            HashMap::from([(1, dl(vec![ip("a"), ip("b"), ip("c")]))]),
            &none(),
        )
        .await;
    let err = outcome.result.unwrap_err();
    assert_eq!(err.to_string(), "farm 1 does not have enough public ips");
}

#[tokio::test]
async fn test_fqdn_gateway_needs_public_ipv4() {
    let h = harness(vec![node(1)]);
    let gw = Workload::new(
        "gw",
        WorkloadData::GatewayFqdnProxy(GatewayFqdnProxy {
            fqdn: "app.example.com".to_string(),
            ..Default::default()
        }),
    );
    let outcome = h
        .deployer()
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![gw]))]), &none())
        .await;
    assert_eq!(
        outcome.result.unwrap_err().to_string(),
        "node 1 cannot deploy a fqdn workload as it does not have a public ipv4 configured"
    );
}

#[tokio::test]
async fn test_fqdn_gateway_on_public_node() {
    let public = node(1).with_public_config(PublicConfig {
        ipv4: Some(IpNet::v4(185, 206, 122, 40, 24)),
        ..Default::default()
    });
    let h = harness(vec![public]);
    let gw = Workload::new(
        "gw",
        WorkloadData::GatewayFqdnProxy(GatewayFqdnProxy {
            fqdn: "app.example.com".to_string(),
            ..Default::default()
        }),
    );
    h.deployer()
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![gw]))]), &none())
        .await
        .into_result()
        .unwrap();
}

#[tokio::test]
async fn test_dead_node_deletion() {
    let h = harness(vec![node(1)]);
    let deployer = h.deployer();
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("data", 1)]))]), &none())
        .await
        .into_result()
        .unwrap();
    let contract_id = current[&1];

    h.grid.set_reachable(1, false).await;
    let after = deployer
        .deploy(&current, HashMap::new(), &none())
        .await
        .into_result()
        .unwrap();
    assert!(after.is_empty());
    assert_eq!(h.contract_state(contract_id).await, ContractState::Deleted);
    assert_eq!(h.chain.calls().await.batch_cancel, 1);
}

#[tokio::test]
async fn test_delete_falls_back_to_single_cancels() {
    let h = harness(vec![node(1), node(2)]);
    let deployer = h.deployer();
    let current = deployer
        .deploy(
            &HashMap::new(),
            HashMap::from([(1, dl(vec![disk("a", 1)])), (2, dl(vec![disk("b", 1)]))]),
            &none(),
        )
        .await
        .into_result()
        .unwrap();

    // Contract on node 2 disappeared behind our back.
    h.chain.expire_contract(current[&2]).await;
    let after = deployer
        .deploy(&current, HashMap::new(), &none())
        .await
        .into_result()
        .unwrap();
    assert!(after.is_empty());
    assert_eq!(h.contract_state(current[&1]).await, ContractState::Deleted);
    assert_eq!(h.chain.calls().await.cancel, 2);
}

#[tokio::test]
async fn test_batch_cancel_failure_aborts_reconcile() {
    let h = harness(vec![node(1), node(2)]);
    let deployer = h.deployer().with_revert_on_failure(false);
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("a", 1)]))]), &none())
        .await
        .into_result()
        .unwrap();

    h.chain
        .fail_next(ChainOp::BatchCancel, ChainError::Rejected("pool is full".to_string()))
        .await;
    let outcome = deployer
        .deploy(&current, HashMap::from([(2, dl(vec![disk("b", 1)]))]), &none())
        .await;
    assert_eq!(outcome.current, current);
    assert!(matches!(outcome.result, Err(DeployerError::Delete(_))));
    assert_eq!(h.chain.calls().await.batch_create, 1);
}

#[tokio::test]
async fn test_workload_error_fails_create_and_cancels_contract() {
    let h = harness(vec![node(1)]);
    h.grid.fail_workload(1, "data", "disk is broken").await;
    let outcome = h
        .deployer()
        .with_revert_on_failure(false)
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("data", 1)]))]), &none())
        .await;

    assert!(outcome.current.is_empty());
    let err = outcome.result.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("workload data within deployment"), "{message}");
    assert!(message.contains("disk is broken"), "{message}");
    assert!(!err.is_transient());

    let contracts = h.chain.list_contracts(TWIN, &[ContractState::Created]).await;
    assert!(contracts.is_empty());
}

#[tokio::test]
async fn test_revert_of_fresh_deployments_restores_empty_state() {
    let h = harness(vec![node(1), node(2)]);
    h.grid.fail_workload(2, "b", "flist not found").await;

    let outcome = h
        .deployer()
        .deploy(
            &HashMap::new(),
            HashMap::from([(1, dl(vec![disk("a", 1)])), (2, dl(vec![disk("b", 1)]))]),
            &none(),
        )
        .await;

    assert!(outcome.current.is_empty());
    assert!(outcome.result.unwrap_err().to_string().contains("flist not found"));
    assert!(h.chain.list_contracts(TWIN, &[ContractState::Created]).await.is_empty());
}

#[tokio::test]
async fn test_revert_of_failed_update_restores_old_content() {
    let h = harness(vec![node(1)]);
    let deployer = h.deployer();
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("a", 1)]))]), &none())
        .await
        .into_result()
        .unwrap();

    h.grid.fail_workload(1, "b", "no space").await;
    let outcome = deployer
        .deploy(&current, HashMap::from([(1, dl(vec![disk("a", 1), disk("b", 1)]))]), &none())
        .await;
    assert_eq!(outcome.current, current);
    assert!(outcome.result.unwrap_err().to_string().contains("no space"));

    let on_node = h.grid.deployments_on(1).await.remove(0);
    assert_eq!(on_node.version, 2);
    assert_eq!(on_node.workloads.len(), 1);
    assert_eq!(on_node.get("a").unwrap().version, 0);
    assert_eq!(h.contract_state(current[&1]).await, ContractState::Created);
}

#[tokio::test]
async fn test_revert_without_old_deployments_reports_both_errors() {
    let h = harness(vec![node(1), node(2)]);
    let deployer = h.deployer();
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("a", 1)]))]), &none())
        .await
        .into_result()
        .unwrap();

    h.grid.set_reachable(1, false).await;
    h.grid.fail_workload(2, "b", "boom").await;
    let outcome = deployer
        .deploy(
            &current,
            HashMap::from([(1, dl(vec![disk("a", 1)])), (2, dl(vec![disk("b", 1)]))]),
            &none(),
        )
        .await;
    let err = outcome.result.unwrap_err();
    assert!(matches!(err, DeployerError::RevertFetch { .. }), "{err}");
    assert!(err
        .to_string()
        .starts_with("failed to fetch deployment objects to revert deployments:"));
}

#[tokio::test(start_paused = true)]
async fn test_wait_succeeds_after_provision_delay() {
    let h = harness(vec![node(1)]);
    h.grid.set_provision_delay(Duration::from_secs(20)).await;

    let start = Instant::now();
    h.deployer()
        .deploy(
            &HashMap::new(),
            HashMap::from([(1, dl(vec![disk("a", 1), disk("b", 1), disk("c", 1)]))]),
            &none(),
        )
        .await
        .into_result()
        .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(20));
    assert!(elapsed <= Duration::from_secs(30 + 40), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_wait_window_resets_on_each_ready_workload() {
    let h = harness(vec![node(1)]);
    h.grid.set_workload_delay(1, "a", Duration::from_secs(3 * 60)).await;
    h.grid.set_workload_delay(1, "b", Duration::from_secs(6 * 60)).await;
    h.grid.set_workload_delay(1, "c", Duration::from_secs(9 * 60)).await;

    let start = Instant::now();
    h.deployer()
        .deploy(
            &HashMap::new(),
            HashMap::from([(1, dl(vec![disk("a", 1), disk("b", 1), disk("c", 1)]))]),
            &none(),
        )
        .await
        .into_result()
        .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(9 * 60), "{elapsed:?}");
    assert!(elapsed <= Duration::from_secs(9 * 60 + 40), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_four_minutes_after_last_progress() {
    let h = harness(vec![node(1)]);
    h.grid.set_workload_delay(1, "a", Duration::from_secs(2 * 60)).await;
    h.grid.set_workload_delay(1, "b", Duration::from_secs(60 * 60)).await;

    let start = Instant::now();
    let outcome = h
        .deployer()
        .deploy(
            &HashMap::new(),
            HashMap::from([(1, dl(vec![disk("a", 1), disk("b", 1)]))]),
            &none(),
        )
        .await;
    let err = outcome.result.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");

    // `a` turns ok at 2 min and is seen within one 40 s poll; the stall
    // window counts from there.
    let elapsed = start.elapsed();
    assert!(elapsed > Duration::from_secs(2 * 60 + 4 * 60), "{elapsed:?}");
    assert!(elapsed <= Duration::from_secs(2 * 60 + 40 + 4 * 60 + 40), "{elapsed:?}");
    assert!(outcome.current.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_update_times_out_and_keeps_contract() {
    let h = harness(vec![node(1)]);
    let deployer = h.deployer().with_revert_on_failure(false);
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("a", 1)]))]), &none())
        .await
        .into_result()
        .unwrap();
    let contract_id = current[&1];

    h.grid.set_stuck_in_init(1, true).await;
    let start = Instant::now();
    let outcome = deployer
        .deploy(&current, HashMap::from([(1, dl(vec![disk("a", 1), disk("b", 1)]))]), &none())
        .await;

    assert_eq!(outcome.current, current);
    let err = outcome.result.unwrap_err();
    assert!(
        err.to_string().ends_with(&format!("waiting for deployment {contract_id} timed out")),
        "{err}"
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(4 * 60), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(6 * 60), "{elapsed:?}");
    assert_eq!(h.contract_state(contract_id).await, ContractState::Created);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_wait() {
    let h = harness(vec![node(1)]);
    h.grid.set_stuck_in_init(1, true).await;
    let (tx, rx) = watch::channel(false);
    let deployer = h.deployer().with_revert_on_failure(false).with_shutdown(rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let _ = tx.send(true);
    });
    let start = Instant::now();
    let outcome = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("a", 1)]))]), &none())
        .await;
    let err = outcome.result.unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert!(err.to_string().contains("deployment was cancelled"));
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn test_batch_deploy_cancels_failed_items() {
    let h = harness(vec![node(1), node(2)]);
    h.grid.fail_workload(2, "bad", "cannot mount").await;

    let outcome = h
        .deployer()
        .batch_deploy(
            HashMap::from([
                (1, vec![dl(vec![disk("a", 1)]), dl(vec![disk("b", 1)])]),
                (2, vec![dl(vec![disk("bad", 1)])]),
            ]),
            &BatchSolutionProviders::new(),
        )
        .await;

    assert!(outcome.result.unwrap_err().to_string().contains("cannot mount"));
    assert_eq!(outcome.deployments[&1].len(), 2);
    assert!(outcome.deployments[&1].iter().all(|d| d.contract_id != 0));
    assert_eq!(outcome.deployments[&2][0].contract_id, 0);

    let live = h.chain.list_contracts(TWIN, &[ContractState::Created]).await;
    assert_eq!(live.len(), 2);
    assert_eq!(h.chain.calls().await.batch_create, 1);
}

#[tokio::test]
async fn test_batch_deploy_keeps_solution_provider_per_deployment() {
    let h = harness(vec![node(1), node(2)]);

    let outcome = h
        .deployer()
        .batch_deploy(
            HashMap::from([
                (1, vec![dl(vec![disk("a", 1)]), dl(vec![disk("b", 1)])]),
                (2, vec![dl(vec![disk("c", 1)])]),
            ]),
            &BatchSolutionProviders::from([(1, vec![Some(3), Some(7)]), (2, vec![None])]),
        )
        .await;
    outcome.result.unwrap();

    let mut providers = Vec::new();
    for d in &outcome.deployments[&1] {
        providers.push(h.chain.get_contract(d.contract_id).await.unwrap().solution_provider_id);
    }
    assert_eq!(providers, vec![Some(3), Some(7)]);
    let on_two = outcome.deployments[&2][0].contract_id;
    assert_eq!(h.chain.get_contract(on_two).await.unwrap().solution_provider_id, None);
}

#[tokio::test]
async fn test_batch_create_stopping_early_skips_later_items() {
    let h = harness(vec![node(1), node(2), node(3)]);
    h.chain.fail_batch_create_at(1).await;

    let outcome = h
        .deployer()
        .batch_deploy(
            HashMap::from([
                (1, vec![dl(vec![disk("a", 1)])]),
                (2, vec![dl(vec![disk("b", 1)])]),
                (3, vec![dl(vec![disk("c", 1)])]),
            ]),
            &BatchSolutionProviders::new(),
        )
        .await;

    assert!(matches!(outcome.result, Err(DeployerError::BatchCreate(_))));
    assert_ne!(outcome.deployments[&1][0].contract_id, 0);
    assert_eq!(outcome.deployments[&2][0].contract_id, 0);
    assert_eq!(outcome.deployments[&3][0].contract_id, 0);
    assert_eq!(h.grid.calls("zos.deployment.deploy").await, 1);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = harness(vec![node(1)]);
    let deployer = h.deployer();
    let current = deployer
        .deploy(&HashMap::new(), HashMap::from([(1, dl(vec![disk("a", 1)]))]), &none())
        .await
        .into_result()
        .unwrap();

    deployer.cancel(current[&1]).await.unwrap();
    deployer.cancel(current[&1]).await.unwrap();
    deployer.cancel(0).await.unwrap();
    assert_eq!(h.contract_state(current[&1]).await, ContractState::Deleted);
}

#[tokio::test]
async fn test_solution_provider_recorded_on_contract() {
    let h = harness(vec![node(1)]);
    let current = h
        .deployer()
        .deploy(
            &HashMap::new(),
            HashMap::from([(1, dl(vec![disk("a", 1)]))]),
            &HashMap::from([(1, Some(42))]),
        )
        .await
        .into_result()
        .unwrap();
    let contract = h.chain.get_contract(current[&1]).await.unwrap();
    assert_eq!(contract.solution_provider_id, Some(42));
}
