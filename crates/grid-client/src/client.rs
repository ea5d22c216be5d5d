//! The client handle: identity, chain, node pool, deployer and state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use grid_chain::Substrate;
use grid_core::validation::validate_account_balance_for_extrinsics;
use grid_core::{GridConfig, Identity};
use grid_deployer::Deployer;
use grid_graphql::{ContractsGetter, ContractsIndex};
use grid_node::{are_nodes_up, NodeClientPool, NodeIndex, RmbClient};
use grid_state::State;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult, ResultExt};
use crate::gateway::{GatewayFqdnDeployer, GatewayNameDeployer};
use crate::k8s::K8sDeployer;
use crate::network::NetworkDeployer;
use crate::vm::DeploymentDeployer;

/// Most contracts cancelled by one batch call.
pub const MAX_BATCH_CANCEL: usize = 400;

pub struct GridClient {
    config: GridConfig,
    identity: Arc<Identity>,
    twin_id: u32,
    chain: Arc<dyn Substrate>,
    pool: Arc<NodeClientPool>,
    index: Arc<dyn NodeIndex>,
    deployer: Deployer,
    state: State,
    contracts: ContractsGetter,
    network_locks: DashMap<String, Arc<Mutex<()>>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl GridClient {
    /// Validate `config`, derive the identity, resolve its twin and check
    /// the account can pay for extrinsics.
    pub async fn new(
        config: GridConfig,
        chain: Arc<dyn Substrate>,
        bus: Arc<dyn RmbClient>,
        index: Arc<dyn NodeIndex>,
        contracts_index: Arc<dyn ContractsIndex>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let identity = Arc::new(Identity::from_mnemonic_or_seed(&config.mnemonic, config.key_type)?);
        let twin_id = chain
            .get_twin_by_pub_key(&identity.public_key())
            .await
            .map_err(ClientError::NoTwin)?;
        let balance = chain.get_balance(&identity).await?;
        validate_account_balance_for_extrinsics(balance.free)?;

        let pool = Arc::new(NodeClientPool::new(chain.clone(), bus, config.rmb_timeout()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let deployer = Deployer::new(
            identity.clone(),
            twin_id,
            chain.clone(),
            pool.clone(),
            index.clone(),
        )
        .with_shutdown(shutdown_rx);
        let state = State::new(chain.clone(), pool.clone());
        let contracts = ContractsGetter::new(twin_id, contracts_index, pool.clone());

        info!(
            twin_id,
            network = %config.network,
            session = %config.session_id(),
            "grid client ready"
        );
        Ok(Self {
            config,
            identity,
            twin_id,
            chain,
            pool,
            index,
            deployer,
            state,
            contracts,
            network_locks: DashMap::new(),
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn twin_id(&self) -> u32 {
        self.twin_id
    }

    pub fn chain(&self) -> &Arc<dyn Substrate> {
        &self.chain
    }

    pub fn pool(&self) -> &Arc<NodeClientPool> {
        &self.pool
    }

    pub fn index(&self) -> &Arc<dyn NodeIndex> {
        &self.index
    }

    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn contracts(&self) -> &ContractsGetter {
        &self.contracts
    }

    // ── Facades ─────────────────────────────────────────────────

    pub fn networks(&self) -> NetworkDeployer<'_> {
        NetworkDeployer::new(self)
    }

    pub fn deployments(&self) -> DeploymentDeployer<'_> {
        DeploymentDeployer::new(self)
    }

    pub fn gateway_names(&self) -> GatewayNameDeployer<'_> {
        GatewayNameDeployer::new(self)
    }

    pub fn gateway_fqdns(&self) -> GatewayFqdnDeployer<'_> {
        GatewayFqdnDeployer::new(self)
    }

    pub fn k8s(&self) -> K8sDeployer<'_> {
        K8sDeployer::new(self)
    }

    // ── Account-wide operations ─────────────────────────────────

    /// Cancel every node and name contract tagged with `project`.
    pub async fn cancel_by_project_name(&self, project: &str) -> ClientResult<()> {
        self.ensure_open()?;
        let contracts = self
            .contracts
            .list_contracts_of_project_name(project, false)
            .await
            .context(format!("could not load contracts for project {project}"))?;
        let ids = contracts.ids()?;
        if ids.is_empty() {
            info!(project, "no contracts to cancel");
            return Ok(());
        }
        self.batch_cancel_contracts(&ids)
            .await
            .context(format!("failed to cancel contracts for project {project}"))?;
        info!(project, count = ids.len(), "project contracts cancelled");
        Ok(())
    }

    /// Cancel `ids` in chunks and drop them from the state cache.
    pub async fn batch_cancel_contracts(&self, ids: &[u64]) -> ClientResult<()> {
        for chunk in ids.chunks(MAX_BATCH_CANCEL) {
            self.chain.batch_cancel_contract(&self.identity, chunk).await?;
            self.state.forget_contracts(chunk);
            debug!(count = chunk.len(), "contracts batch cancelled");
        }
        Ok(())
    }

    /// Stop in-flight waits and close the chain connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        self.chain.close().await;
        info!(twin_id = self.twin_id, "grid client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Shared by the facades ───────────────────────────────────

    pub(crate) fn ensure_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    pub(crate) async fn validate_balance(&self) -> ClientResult<()> {
        let balance = self.chain.get_balance(&self.identity).await?;
        validate_account_balance_for_extrinsics(balance.free)?;
        Ok(())
    }

    pub(crate) async fn nodes_up(&self, nodes: &[u32]) -> ClientResult<()> {
        are_nodes_up(&self.pool, nodes).await?;
        Ok(())
    }

    /// Serialize IP allocation and deployment on one network.
    pub(crate) async fn lock_network(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .network_locks
            .entry(name.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Lock several networks in a fixed order.
    pub(crate) async fn lock_networks<'n>(
        &self,
        names: impl IntoIterator<Item = &'n str>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let mut names: Vec<&str> = names.into_iter().collect();
        names.sort_unstable();
        names.dedup();
        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            guards.push(self.lock_network(name).await);
        }
        guards
    }

    /// Record contract moves in the state cache: contracts in `old` that
    /// are no longer live are dropped, live ones are stored.
    pub(crate) fn track_contracts(&self, old: &HashMap<u32, u64>, current: &HashMap<u32, u64>) {
        for (&node, &contract_id) in old {
            if current.get(&node) != Some(&contract_id) {
                self.state.remove_contract_ids(node, &[contract_id]);
            }
        }
        self.state.store_node_deployments(current);
    }
}

impl std::fmt::Debug for GridClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridClient")
            .field("network", &self.config.network)
            .field("twin_id", &self.twin_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
