//! Reconciling the deployments a twin holds with the ones it wants.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use grid_chain::{BatchCreateContractData, Substrate};
use grid_core::Identity;
use grid_node::{NodeClient, NodeClientPool, NodeIndex};
use grid_types::{same_workload_names, Deployment};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{DeployerError, DeployerResult};
use crate::versions::{assign_versions, match_old_versions};
use crate::wait::{wait_deployment, WaitPolicy};

/// Node id to optional solution provider id.
pub type SolutionProviders = HashMap<u32, Option<u64>>;

/// Node id to the solution provider of each deployment on that node, in
/// the order the deployments are given.
pub type BatchSolutionProviders = HashMap<u32, Vec<Option<u64>>>;

/// What a reconcile left behind.
///
/// `current` maps each node to the contract live on it once the call
/// returned, whether or not `result` is an error.
#[derive(Debug)]
pub struct DeployOutcome {
    pub current: HashMap<u32, u64>,
    pub result: DeployerResult<()>,
}

impl DeployOutcome {
    pub fn into_result(self) -> DeployerResult<HashMap<u32, u64>> {
        self.result.map(|()| self.current)
    }
}

/// Outcome of [`Deployer::batch_deploy`].
///
/// Every input deployment comes back under its node; its `contract_id`
/// is non-zero only if it was created and reached ready.
#[derive(Debug)]
pub struct BatchDeployOutcome {
    pub deployments: HashMap<u32, Vec<Deployment>>,
    pub result: DeployerResult<()>,
}

/// A deployment created on chain and pushed to its node, or the reason it
/// was not.
struct Placed {
    node: u32,
    deployment: Deployment,
    error: Option<DeployerError>,
}

/// Drives contracts and node deployments for one twin.
pub struct Deployer {
    identity: Arc<Identity>,
    twin_id: u32,
    pub(crate) chain: Arc<dyn Substrate>,
    pool: Arc<NodeClientPool>,
    pub(crate) index: Arc<dyn NodeIndex>,
    revert_on_failure: bool,
    wait_policy: WaitPolicy,
    shutdown: watch::Receiver<bool>,
}

impl Deployer {
    pub fn new(
        identity: Arc<Identity>,
        twin_id: u32,
        chain: Arc<dyn Substrate>,
        pool: Arc<NodeClientPool>,
        index: Arc<dyn NodeIndex>,
    ) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self {
            identity,
            twin_id,
            chain,
            pool,
            index,
            revert_on_failure: true,
            wait_policy: WaitPolicy::default(),
            shutdown,
        }
    }

    /// Roll back to the previous deployments when a reconcile fails.
    pub fn with_revert_on_failure(mut self, revert: bool) -> Self {
        self.revert_on_failure = revert;
        self
    }

    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Abort waits once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn twin_id(&self) -> u32 {
        self.twin_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn pool(&self) -> &Arc<NodeClientPool> {
        &self.pool
    }

    // ── Public operations ───────────────────────────────────────

    /// Move from the contracts in `old` to the deployments in `new`.
    ///
    /// Nodes only in `old` are cancelled, nodes only in `new` get a fresh
    /// contract, nodes in both are updated in place. With revert enabled a
    /// failure re-applies the previous deployments.
    pub async fn deploy(
        &self,
        old: &HashMap<u32, u64>,
        new: HashMap<u32, Deployment>,
        solution_providers: &SolutionProviders,
    ) -> DeployOutcome {
        let old_deployments = self.get_deployments(old).await;
        match &old_deployments {
            Ok(old_deployments) => {
                if let Err(e) = self.validate(old_deployments, &new).await {
                    return DeployOutcome {
                        current: old.clone(),
                        result: Err(e),
                    };
                }
            }
            Err(e) => warn!(error = %e, "could not fetch old deployments, skipping validation"),
        }

        let outcome = self.reconcile(old, new, solution_providers).await;
        let error = match outcome.result {
            Ok(()) => return outcome,
            Err(error) if !self.revert_on_failure => {
                return DeployOutcome {
                    current: outcome.current,
                    result: Err(error),
                };
            }
            Err(error) => error,
        };

        warn!(error = %error, "deployment failed, reverting to previous state");
        let old_deployments = match old_deployments {
            Ok(old_deployments) => old_deployments,
            Err(fetch) => {
                return DeployOutcome {
                    current: outcome.current,
                    result: Err(DeployerError::RevertFetch {
                        error: Box::new(error),
                        fetch: Box::new(fetch),
                    }),
                };
            }
        };

        let reverted = self
            .reconcile(&outcome.current, old_deployments, solution_providers)
            .await;
        let result = match reverted.result {
            Ok(()) => Err(error),
            Err(revert) => Err(DeployerError::Revert {
                error: Box::new(error),
                revert: Box::new(revert),
            }),
        };
        DeployOutcome {
            current: reverted.current,
            result,
        }
    }

    /// Cancel one contract; an already removed contract counts as cancelled.
    pub async fn cancel(&self, contract_id: u64) -> DeployerResult<()> {
        self.chain
            .ensure_contract_canceled(&self.identity, contract_id)
            .await
            .map_err(|source| DeployerError::Cancel { contract_id, source })?;
        info!(contract_id, "contract cancelled");
        Ok(())
    }

    /// Fetch the deployment behind each node's contract.
    pub async fn get_deployments(
        &self,
        contracts: &HashMap<u32, u64>,
    ) -> DeployerResult<HashMap<u32, Deployment>> {
        let fetches = contracts.iter().map(|(&node, &contract_id)| async move {
            let client = self.pool.get_node_client(node).await?;
            let dl = client
                .deployment_get(contract_id)
                .await
                .map_err(|source| DeployerError::FetchDeployment {
                    node,
                    contract_id,
                    source,
                })?;
            Ok::<_, DeployerError>((node, dl))
        });
        Ok(try_join_all(fetches).await?.into_iter().collect())
    }

    /// Create many independent deployments with one batched chain call.
    ///
    /// Deployments that fail after their contract was created get the
    /// contract cancelled again; the rest stay live.
    pub async fn batch_deploy(
        &self,
        deployments: HashMap<u32, Vec<Deployment>>,
        solution_providers: &BatchSolutionProviders,
    ) -> BatchDeployOutcome {
        let ordered: BTreeMap<u32, Vec<Deployment>> = deployments.into_iter().collect();
        let mut items = Vec::new();
        for (node, dls) in ordered {
            let sps = solution_providers.get(&node);
            items.extend(dls.into_iter().enumerate().map(|(i, dl)| {
                let sp = sps.and_then(|sps| sps.get(i)).copied().flatten();
                (node, dl, sp)
            }));
        }

        let mut grouped: HashMap<u32, Vec<Deployment>> = HashMap::new();
        let (placed, mut errors) = match self.create_and_push(items.clone()).await {
            Ok(placed) => placed,
            Err(e) => {
                for (node, dl, _) in items {
                    grouped.entry(node).or_default().push(dl);
                }
                return BatchDeployOutcome {
                    deployments: grouped,
                    result: Err(e),
                };
            }
        };

        for p in placed {
            if let Some(e) = p.error {
                errors.push(e);
            }
            grouped.entry(p.node).or_default().push(p.deployment);
        }
        BatchDeployOutcome {
            deployments: grouped,
            result: DeployerError::collect(errors),
        }
    }

    // ── Reconcile ───────────────────────────────────────────────

    async fn reconcile(
        &self,
        old: &HashMap<u32, u64>,
        new: HashMap<u32, Deployment>,
        solution_providers: &SolutionProviders,
    ) -> DeployOutcome {
        let mut current = old.clone();

        // Delete
        let doomed: BTreeMap<u32, u64> = old
            .iter()
            .filter(|(node, _)| !new.contains_key(node))
            .map(|(&node, &id)| (node, id))
            .collect();
        if !doomed.is_empty() {
            if let Err(e) = self.delete_contracts(&doomed).await {
                return DeployOutcome {
                    current,
                    result: Err(e),
                };
            }
            for node in doomed.keys() {
                current.remove(node);
            }
        }

        let mut new: BTreeMap<u32, Deployment> = new.into_iter().collect();

        // Create
        let fresh: Vec<u32> = new.keys().filter(|n| !old.contains_key(n)).copied().collect();
        if !fresh.is_empty() {
            let items = fresh
                .iter()
                .filter_map(|node| new.remove(node).map(|dl| (*node, dl)))
                .map(|(node, dl)| (node, dl, solution_providers.get(&node).copied().flatten()))
                .collect();
            let (placed, mut errors) = match self.create_and_push(items).await {
                Ok(placed) => placed,
                Err(e) => {
                    return DeployOutcome {
                        current,
                        result: Err(e),
                    };
                }
            };
            for p in placed {
                if p.deployment.contract_id != 0 {
                    current.insert(p.node, p.deployment.contract_id);
                }
                if let Some(e) = p.error {
                    errors.push(e);
                }
            }
            if let Err(e) = DeployerError::collect(errors) {
                return DeployOutcome {
                    current,
                    result: Err(e),
                };
            }
        }

        // Update
        let updates = new.into_iter().filter_map(|(node, dl)| {
            let contract_id = *old.get(&node)?;
            Some(async move {
                let result = self.update_one(node, contract_id, dl).await;
                (node, result)
            })
        });
        let mut errors = Vec::new();
        for (node, result) in join_all(updates).await {
            if let Err(e) = result {
                warn!(node_id = node, error = %e, "deployment update failed");
                errors.push(e);
            }
        }
        DeployOutcome {
            current,
            result: DeployerError::collect(errors),
        }
    }

    /// Cancel all of `doomed` in one call, one by one if some are gone already.
    async fn delete_contracts(&self, doomed: &BTreeMap<u32, u64>) -> DeployerResult<()> {
        let ids: Vec<u64> = doomed.values().copied().collect();
        match self.chain.batch_cancel_contract(&self.identity, &ids).await {
            Ok(()) => {
                info!(?ids, "contracts cancelled");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(error = %e, "batch cancel hit a missing contract, cancelling one by one");
                for &contract_id in &ids {
                    self.cancel(contract_id).await?;
                }
                Ok(())
            }
            Err(e) => Err(DeployerError::Delete(e)),
        }
    }

    async fn update_one(&self, node: u32, contract_id: u64, mut dl: Deployment) -> DeployerResult<()> {
        let client = self.pool.get_node_client(node).await?;
        let old = client
            .deployment_get(contract_id)
            .await
            .map_err(|source| DeployerError::FetchDeployment {
                node,
                contract_id,
                source,
            })?;

        match_old_versions(&old, &mut dl);
        if old.challenge_hash() == dl.challenge_hash() && same_workload_names(&old, &dl) {
            debug!(node_id = node, contract_id, "deployment unchanged, skipping update");
            return Ok(());
        }
        assign_versions(&old, &mut dl);

        dl.contract_id = contract_id;
        dl.sign(self.twin_id, &self.identity)?;
        dl.valid().map_err(DeployerError::Invalid)?;

        let hash = dl.challenge_hash_hex();
        self.chain
            .update_node_contract(&self.identity, contract_id, "", &hash)
            .await
            .map_err(|source| DeployerError::UpdateContract { contract_id, source })?;
        client
            .deployment_update(&dl)
            .await
            .map_err(|source| DeployerError::UpdatePush { node, source })?;
        info!(node_id = node, contract_id, version = dl.version, "deployment updated");

        self.wait(&client, node, contract_id, &dl).await
    }

    // ── Create ──────────────────────────────────────────────────

    /// Sign, contract, push and wait for `items`.
    ///
    /// An `Err` means nothing was created. Otherwise every item comes back;
    /// items that failed after contract creation have been cancelled (their
    /// `contract_id` reset to zero) unless the cancel itself failed, which
    /// is reported in the second element.
    async fn create_and_push(
        &self,
        items: Vec<(u32, Deployment, Option<u64>)>,
    ) -> DeployerResult<(Vec<Placed>, Vec<DeployerError>)> {
        let prepared = items.into_iter().map(|(node, mut dl, sp)| async move {
            dl.sign(self.twin_id, &self.identity)?;
            dl.valid().map_err(DeployerError::Invalid)?;
            let data = BatchCreateContractData {
                node,
                body: dl.metadata.clone(),
                hash: dl.challenge_hash_hex(),
                public_ips: dl.count_public_ips(),
                solution_provider_id: sp,
            };
            Ok::<_, DeployerError>((node, dl, data))
        });
        let prepared = try_join_all(prepared).await?;

        let nodes: BTreeSet<u32> = prepared.iter().map(|(node, _, _)| *node).collect();
        let mut clients: HashMap<u32, NodeClient> = HashMap::new();
        for node in nodes {
            clients.insert(node, self.pool.get_node_client(node).await?);
        }

        let data = prepared.iter().map(|(_, _, data)| data.clone()).collect();
        let created = self
            .chain
            .batch_create_contract(&self.identity, data)
            .await
            .map_err(DeployerError::BatchCreate)?;
        let mut extra = Vec::new();
        if let Some(e) = &created.error {
            warn!(failed_index = ?created.failed_index, error = %e, "batch contract creation stopped early");
            extra.push(DeployerError::BatchCreate(e.clone()));
        }

        let pushes = prepared
            .into_iter()
            .enumerate()
            .map(|(i, (node, mut dl, _))| {
                let contract_id = created.contracts.get(i).copied();
                let client = clients.get(&node).cloned();
                async move {
                    let (Some(contract_id), Some(client)) = (contract_id, client) else {
                        return Placed {
                            node,
                            deployment: dl,
                            error: None,
                        };
                    };
                    dl.contract_id = contract_id;
                    info!(node_id = node, contract_id, "contract created");
                    let error = self.push_and_wait(&client, node, &dl).await.err();
                    Placed {
                        node,
                        deployment: dl,
                        error,
                    }
                }
            });
        let mut placed = join_all(pushes).await;

        let failed: Vec<u64> = placed
            .iter()
            .filter(|p| p.error.is_some() && p.deployment.contract_id != 0)
            .map(|p| p.deployment.contract_id)
            .collect();
        if !failed.is_empty() {
            match self.chain.batch_cancel_contract(&self.identity, &failed).await {
                Ok(()) => {
                    info!(ids = ?failed, "cancelled contracts of failed deployments");
                    for p in placed.iter_mut().filter(|p| p.error.is_some()) {
                        p.deployment.contract_id = 0;
                    }
                }
                Err(source) => extra.push(DeployerError::CancelFailed { ids: failed, source }),
            }
        }
        Ok((placed, extra))
    }

    async fn push_and_wait(&self, client: &NodeClient, node: u32, dl: &Deployment) -> DeployerResult<()> {
        client
            .deployment_deploy(dl)
            .await
            .map_err(|source| DeployerError::Push {
                node,
                contract_id: dl.contract_id,
                source,
            })?;
        self.wait(client, node, dl.contract_id, dl).await
    }

    async fn wait(&self, client: &NodeClient, node: u32, contract_id: u64, dl: &Deployment) -> DeployerResult<()> {
        wait_deployment(
            client,
            contract_id,
            &dl.workload_versions(),
            &self.wait_policy,
            self.shutdown.clone(),
        )
        .await
        .map_err(|source| DeployerError::Wait {
            node,
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_into_result() {
        let current = HashMap::from([(1, 10)]);
        let ok = DeployOutcome {
            current: current.clone(),
            result: Ok(()),
        };
        assert_eq!(ok.into_result().unwrap(), current);

        let failed = DeployOutcome {
            current,
            result: Err(DeployerError::WaitTimeout(10)),
        };
        assert!(failed.into_result().is_err());
    }
}
