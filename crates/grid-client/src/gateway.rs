//! Gateway facades. A name proxy also holds a name contract reserving
//! its label; an FQDN proxy needs a gateway node with a public IPv4.

use std::collections::HashMap;

use grid_deployer::{BatchSolutionProviders, SolutionProviders};
use grid_node::PublicConfig;
use grid_types::{Deployment, DeploymentData, Workload};
use grid_workloads::{GatewayFqdnProxy, GatewayNameProxy};
use tracing::{info, warn};

use crate::client::GridClient;
use crate::error::{ClientError, ClientResult, ResultExt};

fn gateway_deployment(twin_id: u32, workload: Workload, metadata: String) -> Deployment {
    let mut dl = Deployment::new_grid_deployment(twin_id, vec![workload]);
    dl.metadata = metadata;
    dl
}

async fn public_config(client: &GridClient, node: u32) -> ClientResult<PublicConfig> {
    let node_client = client.pool().get_node_client(node).await?;
    node_client
        .network_get_public_config()
        .await
        .map_err(|source| ClientError::PublicConfig { node, source })
}

/// Contract of the deployment named `name` in a batch outcome.
fn batch_contract(deployments: &HashMap<u32, Vec<Deployment>>, node: u32, name: &str) -> u64 {
    deployments
        .get(&node)
        .into_iter()
        .flatten()
        .find(|dl| DeploymentData::parse(&dl.metadata).is_ok_and(|m| m.name == name))
        .map(|dl| dl.contract_id)
        .unwrap_or(0)
}

/// The workload named `name` in the node's deployment, if it is ok.
async fn live_workload(
    client: &GridClient,
    contracts: &HashMap<u32, u64>,
    node: u32,
    name: &str,
) -> ClientResult<Option<Workload>> {
    let mut deployments = client
        .deployer()
        .get_deployments(contracts)
        .await
        .context("failed to get gateway deployment")?;
    let Some(dl) = deployments.remove(&node) else {
        return Ok(None);
    };
    Ok(dl
        .workloads
        .into_iter()
        .find(|wl| wl.name == name && wl.result.state.is_okay()))
}

// ── Name proxies ────────────────────────────────────────────────

pub struct GatewayNameDeployer<'a> {
    client: &'a GridClient,
}

impl<'a> GatewayNameDeployer<'a> {
    pub(crate) fn new(client: &'a GridClient) -> Self {
        Self { client }
    }

    pub async fn validate(&self, gw: &GatewayNameProxy) -> ClientResult<()> {
        self.client.validate_balance().await?;
        gw.validate()?;
        let cfg = public_config(self.client, gw.node_id).await?;
        if cfg.domain.is_empty() {
            return Err(ClientError::NoDomain(gw.node_id));
        }
        self.client.nodes_up(&[gw.node_id]).await
    }

    /// Keep a valid name contract or create one. Returns whether it was
    /// created here.
    async fn ensure_name_contract(&self, gw: &mut GatewayNameProxy) -> ClientResult<bool> {
        let chain = self.client.chain();
        let identity = self.client.identity();
        gw.name_contract_id = chain
            .invalidate_name_contract(identity, gw.name_contract_id, &gw.name)
            .await?;
        if gw.name_contract_id != 0 {
            return Ok(false);
        }
        gw.name_contract_id = chain
            .create_name_contract(identity, &gw.name)
            .await
            .context(format!("failed to create name contract {}", gw.name))?;
        info!(name = %gw.name, contract_id = gw.name_contract_id, "name contract created");
        Ok(true)
    }

    /// Cancel a name contract created for a deploy that failed.
    async fn release_name(&self, gw: &mut GatewayNameProxy) -> ClientResult<()> {
        self.client
            .chain()
            .ensure_contract_canceled(self.client.identity(), gw.name_contract_id)
            .await?;
        gw.name_contract_id = 0;
        Ok(())
    }

    pub async fn deploy(&self, gw: &mut GatewayNameProxy) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.validate(gw).await?;
        let created = self.ensure_name_contract(gw).await?;

        let metadata = gw.generate_metadata()?;
        let dl = gateway_deployment(self.client.twin_id(), gw.zos_workload(), metadata);
        let new = HashMap::from([(gw.node_id, dl)]);
        let solution_providers: SolutionProviders = HashMap::from([(gw.node_id, None)]);

        let old = gw.node_deployment_id.clone();
        let outcome = self
            .client
            .deployer()
            .deploy(&old, new, &solution_providers)
            .await;
        self.client.track_contracts(&old, &outcome.current);
        gw.node_deployment_id = outcome.current;
        gw.contract_id = gw.node_deployment_id.get(&gw.node_id).copied().unwrap_or(0);
        if let Err(e) = outcome.result {
            let error = ClientError::from(e).context(format!("could not deploy gateway {}", gw.name));
            if created {
                if let Err(cleanup) = self.release_name(gw).await {
                    return Err(ClientError::Cleanup {
                        error: Box::new(error),
                        cleanup: Box::new(cleanup),
                    });
                }
            }
            return Err(error);
        }

        self.sync(gw).await?;
        info!(gateway = %gw.name, node_id = gw.node_id, fqdn = %gw.fqdn, "name gateway deployed");
        Ok(())
    }

    pub async fn batch_deploy(&self, gws: &mut [GatewayNameProxy]) -> ClientResult<()> {
        self.client.ensure_open()?;
        for gw in gws.iter() {
            self.validate(gw).await?;
        }
        let mut created = Vec::with_capacity(gws.len());
        let mut grouped: HashMap<u32, Vec<Deployment>> = HashMap::new();
        for gw in gws.iter_mut() {
            created.push(self.ensure_name_contract(gw).await?);
            let metadata = gw.generate_metadata()?;
            grouped
                .entry(gw.node_id)
                .or_default()
                .push(gateway_deployment(self.client.twin_id(), gw.zos_workload(), metadata));
        }

        let outcome = self
            .client
            .deployer()
            .batch_deploy(grouped, &BatchSolutionProviders::new())
            .await;
        let mut errors = Vec::new();
        if let Err(e) = outcome.result {
            errors.push(ClientError::from(e));
        }
        for (gw, created) in gws.iter_mut().zip(created) {
            let contract_id = batch_contract(&outcome.deployments, gw.node_id, &gw.name);
            if contract_id == 0 {
                if created {
                    if let Err(cleanup) = self.release_name(gw).await {
                        errors.push(cleanup.context(format!("could not release name {}", gw.name)));
                    }
                }
                continue;
            }
            gw.contract_id = contract_id;
            gw.node_deployment_id = HashMap::from([(gw.node_id, contract_id)]);
            self.client.state().store_contract_ids(gw.node_id, &[contract_id]);
            if let Err(e) = self.sync(gw).await {
                errors.push(e);
            }
        }
        ClientError::collect(errors)
    }

    /// Cancel the node contract, then the name contract.
    pub async fn cancel(&self, gw: &mut GatewayNameProxy) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.client.validate_balance().await?;
        if let Some(contract_id) = gw.node_deployment_id.get(&gw.node_id).copied() {
            self.client
                .deployer()
                .cancel(contract_id)
                .await
                .context(format!("could not cancel gateway {}", gw.name))?;
            self.client.state().remove_contract_ids(gw.node_id, &[contract_id]);
            gw.node_deployment_id.remove(&gw.node_id);
        }
        gw.contract_id = 0;

        self.client
            .chain()
            .ensure_contract_canceled(self.client.identity(), gw.name_contract_id)
            .await
            .context(format!("could not cancel name contract {}", gw.name_contract_id))?;
        gw.name_contract_id = 0;
        gw.fqdn.clear();
        info!(gateway = %gw.name, "name gateway cancelled");
        Ok(())
    }

    /// Drop contracts that are gone, then reload the proxy if the node
    /// reports it ok.
    pub async fn sync(&self, gw: &mut GatewayNameProxy) -> ClientResult<()> {
        let chain = self.client.chain();
        chain.delete_invalid_contracts(&mut gw.node_deployment_id).await?;
        if gw.name_contract_id != 0 && !chain.is_valid_contract(gw.name_contract_id).await? {
            warn!(name = %gw.name, contract_id = gw.name_contract_id, "name contract is gone");
            gw.name_contract_id = 0;
        }
        let Some(contract_id) = gw.node_deployment_id.get(&gw.node_id).copied() else {
            gw.contract_id = 0;
            gw.fqdn.clear();
            return Ok(());
        };
        gw.contract_id = contract_id;

        match live_workload(self.client, &gw.node_deployment_id, gw.node_id, &gw.name).await? {
            Some(wl) => {
                let remote = GatewayNameProxy::from_workload(&wl)?;
                gw.backends = remote.backends;
                gw.tls_passthrough = remote.tls_passthrough;
                gw.network = remote.network;
                gw.description = remote.description;
                gw.fqdn = remote.fqdn;
            }
            None => gw.fqdn.clear(),
        }
        Ok(())
    }
}

// ── FQDN proxies ────────────────────────────────────────────────

pub struct GatewayFqdnDeployer<'a> {
    client: &'a GridClient,
}

impl<'a> GatewayFqdnDeployer<'a> {
    pub(crate) fn new(client: &'a GridClient) -> Self {
        Self { client }
    }

    /// The gateway node must expose a public IPv4 for the FQDN's A record.
    pub async fn validate(&self, gw: &GatewayFqdnProxy) -> ClientResult<()> {
        self.client.validate_balance().await?;
        gw.validate()?;
        let cfg = public_config(self.client, gw.node_id).await?;
        if cfg.ipv4.is_none() {
            return Err(ClientError::NoPublicIpv4(gw.node_id));
        }
        self.client.nodes_up(&[gw.node_id]).await
    }

    pub async fn deploy(&self, gw: &mut GatewayFqdnProxy) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.validate(gw).await?;

        let metadata = gw.generate_metadata()?;
        let dl = gateway_deployment(self.client.twin_id(), gw.zos_workload(), metadata);
        let new = HashMap::from([(gw.node_id, dl)]);
        let solution_providers: SolutionProviders = HashMap::from([(gw.node_id, None)]);

        let old = gw.node_deployment_id.clone();
        let outcome = self
            .client
            .deployer()
            .deploy(&old, new, &solution_providers)
            .await;
        self.client.track_contracts(&old, &outcome.current);
        gw.node_deployment_id = outcome.current;
        gw.contract_id = gw.node_deployment_id.get(&gw.node_id).copied().unwrap_or(0);
        outcome
            .result
            .context(format!("could not deploy gateway {}", gw.name))?;

        self.sync(gw).await?;
        info!(gateway = %gw.name, node_id = gw.node_id, fqdn = %gw.fqdn, "fqdn gateway deployed");
        Ok(())
    }

    pub async fn batch_deploy(&self, gws: &mut [GatewayFqdnProxy]) -> ClientResult<()> {
        self.client.ensure_open()?;
        let mut grouped: HashMap<u32, Vec<Deployment>> = HashMap::new();
        for gw in gws.iter_mut() {
            self.validate(gw).await?;
            let metadata = gw.generate_metadata()?;
            grouped
                .entry(gw.node_id)
                .or_default()
                .push(gateway_deployment(self.client.twin_id(), gw.zos_workload(), metadata));
        }

        let outcome = self
            .client
            .deployer()
            .batch_deploy(grouped, &BatchSolutionProviders::new())
            .await;
        let mut errors = Vec::new();
        if let Err(e) = outcome.result {
            errors.push(ClientError::from(e));
        }
        for gw in gws.iter_mut() {
            let contract_id = batch_contract(&outcome.deployments, gw.node_id, &gw.name);
            if contract_id == 0 {
                continue;
            }
            gw.contract_id = contract_id;
            gw.node_deployment_id = HashMap::from([(gw.node_id, contract_id)]);
            self.client.state().store_contract_ids(gw.node_id, &[contract_id]);
            if let Err(e) = self.sync(gw).await {
                errors.push(e);
            }
        }
        ClientError::collect(errors)
    }

    pub async fn cancel(&self, gw: &mut GatewayFqdnProxy) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.client.validate_balance().await?;
        if let Some(contract_id) = gw.node_deployment_id.get(&gw.node_id).copied() {
            self.client
                .deployer()
                .cancel(contract_id)
                .await
                .context(format!("could not cancel gateway {}", gw.name))?;
            self.client.state().remove_contract_ids(gw.node_id, &[contract_id]);
            gw.node_deployment_id.remove(&gw.node_id);
        }
        gw.contract_id = 0;
        info!(gateway = %gw.name, "fqdn gateway cancelled");
        Ok(())
    }

    pub async fn sync(&self, gw: &mut GatewayFqdnProxy) -> ClientResult<()> {
        self.client
            .chain()
            .delete_invalid_contracts(&mut gw.node_deployment_id)
            .await?;
        let Some(contract_id) = gw.node_deployment_id.get(&gw.node_id).copied() else {
            gw.contract_id = 0;
            return Ok(());
        };
        gw.contract_id = contract_id;

        if let Some(wl) = live_workload(self.client, &gw.node_deployment_id, gw.node_id, &gw.name).await? {
            let remote = GatewayFqdnProxy::from_workload(&wl)?;
            gw.fqdn = remote.fqdn;
            gw.backends = remote.backends;
            gw.tls_passthrough = remote.tls_passthrough;
            gw.network = remote.network;
            gw.description = remote.description;
        }
        Ok(())
    }
}
