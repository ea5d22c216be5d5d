//! Deployment facade: a [`VmDeployment`] (disks, zdbs, qsfs and VMs) on
//! one node, attached to a network the client deployed before.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use grid_deployer::{BatchSolutionProviders, SolutionProviders};
use grid_types::{Deployment, DeploymentData, IpNet};
use grid_workloads::vm::FIRST_HOST_ID;
use grid_workloads::{machine_host_ids, validate_flist, VmDeployment};
use tracing::{debug, info, warn};

use crate::client::GridClient;
use crate::error::{ClientError, ClientResult, ResultExt};

pub struct DeploymentDeployer<'a> {
    client: &'a GridClient,
}

impl<'a> DeploymentDeployer<'a> {
    pub(crate) fn new(client: &'a GridClient) -> Self {
        Self { client }
    }

    /// Machines default to the deployment's node and network.
    fn fill_defaults(dl: &mut VmDeployment) {
        for vm in &mut dl.vms {
            if vm.node_id == 0 {
                vm.node_id = dl.node_id;
            }
            if vm.network_name.is_empty() {
                vm.network_name = dl.network_name.clone();
            }
        }
    }

    pub async fn validate(&self, dl: &mut VmDeployment) -> ClientResult<()> {
        Self::fill_defaults(dl);
        self.client.validate_balance().await?;
        dl.validate()?;
        for vm in &dl.vms {
            validate_flist(&vm.flist, &vm.flist_checksum)
                .await
                .context(format!("failed to validate flist of vm '{}'", vm.name))?;
        }
        self.client.nodes_up(&[dl.node_id]).await
    }

    /// Host ids the deployment's machines hold on the node right now.
    async fn previous_host_ids(&self, dl: &VmDeployment) -> Vec<u8> {
        let contract_id = match dl.contract_id {
            0 => dl.node_deployment_id.get(&dl.node_id).copied().unwrap_or(0),
            id => id,
        };
        if contract_id == 0 {
            return Vec::new();
        }
        match self
            .client
            .deployer()
            .get_deployments(&HashMap::from([(dl.node_id, contract_id)]))
            .await
        {
            Ok(previous) => previous
                .get(&dl.node_id)
                .map(|old| machine_host_ids(old, &dl.network_name))
                .unwrap_or_default(),
            Err(error) => {
                warn!(node_id = dl.node_id, contract_id, %error, "could not read current deployment");
                Vec::new()
            }
        }
    }

    /// Give machines without an IP the lowest free host id in the node's
    /// subnet. Requested IPs must be free, except the ones this
    /// deployment's machines already hold. `taken` carries host ids
    /// handed out earlier in the same call and is extended with the new
    /// ones.
    async fn assign_ips(&self, dl: &mut VmDeployment, taken: &mut Vec<u8>) -> ClientResult<()> {
        if dl.vms.is_empty() {
            return Ok(());
        }
        let subnet = self
            .client
            .state()
            .node_subnet(&dl.network_name, dl.node_id)
            .ok_or_else(|| ClientError::NodeNotInNetwork {
                network: dl.network_name.clone(),
                node: dl.node_id,
            })?;
        let node = self.client.pool().get_node_client(dl.node_id).await?;
        let listed = node
            .network_list_private_ips(&dl.network_name)
            .await
            .context(format!("could not list private ips of node {}", dl.node_id))?;

        let own = self.previous_host_ids(dl).await;
        let mut used = used_hosts(&listed, &subnet);
        used.retain(|host| !own.contains(host));
        used.extend(taken.iter().copied());
        for vm in &mut dl.vms {
            let ip = vm.assign_private_ip(&subnet, &mut used, FIRST_HOST_ID)?;
            debug!(vm = %vm.name, %ip, node_id = dl.node_id, "assigned private ip");
            vm.ip = ip.to_string();
        }
        *taken = used;
        dl.ip_range = subnet.to_string();
        Ok(())
    }

    /// Deploy or update the deployment, then reload what the node
    /// assigned.
    pub async fn deploy(&self, dl: &mut VmDeployment) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.validate(dl).await?;
        let _guard = self.client.lock_network(&dl.network_name).await;

        self.assign_ips(dl, &mut Vec::new()).await?;
        let zos = dl.zos_deployment(self.client.twin_id())?;
        let new = HashMap::from([(dl.node_id, zos)]);
        let solution_providers: SolutionProviders = HashMap::from([(dl.node_id, dl.solution_provider)]);

        let old = dl.node_deployment_id.clone();
        let outcome = self
            .client
            .deployer()
            .deploy(&old, new, &solution_providers)
            .await;
        self.client.track_contracts(&old, &outcome.current);
        dl.node_deployment_id = outcome.current;
        dl.contract_id = dl.node_deployment_id.get(&dl.node_id).copied().unwrap_or(0);
        outcome.result.context(format!("could not deploy {}", dl.name))?;

        self.sync(dl).await?;
        info!(deployment = %dl.name, node_id = dl.node_id, contract_id = dl.contract_id, "deployment deployed");
        Ok(())
    }

    /// Create many deployments with one batched contract call.
    pub async fn batch_deploy(&self, dls: &mut [VmDeployment]) -> ClientResult<()> {
        self.client.ensure_open()?;
        for dl in dls.iter_mut() {
            self.validate(dl).await?;
        }
        let names: Vec<String> = dls.iter().map(|dl| dl.network_name.clone()).collect();
        let _guards = self.client.lock_networks(names.iter().map(String::as_str)).await;

        let mut taken: HashMap<(String, u32), Vec<u8>> = HashMap::new();
        let mut grouped: HashMap<u32, Vec<Deployment>> = HashMap::new();
        let mut solution_providers = BatchSolutionProviders::new();
        for dl in dls.iter_mut() {
            let used = taken.entry((dl.network_name.clone(), dl.node_id)).or_default();
            self.assign_ips(dl, used).await?;
            grouped
                .entry(dl.node_id)
                .or_default()
                .push(dl.zos_deployment(self.client.twin_id())?);
            solution_providers
                .entry(dl.node_id)
                .or_default()
                .push(dl.solution_provider);
        }

        let outcome = self
            .client
            .deployer()
            .batch_deploy(grouped, &solution_providers)
            .await;
        let mut errors = Vec::new();
        if let Err(e) = outcome.result {
            errors.push(ClientError::from(e));
        }
        for dl in dls.iter_mut() {
            let contract_id = outcome
                .deployments
                .get(&dl.node_id)
                .into_iter()
                .flatten()
                .find(|zos| DeploymentData::parse(&zos.metadata).is_ok_and(|m| m.name == dl.name))
                .map(|zos| zos.contract_id)
                .unwrap_or(0);
            if contract_id == 0 {
                continue;
            }
            dl.contract_id = contract_id;
            dl.node_deployment_id = HashMap::from([(dl.node_id, contract_id)]);
            self.client.state().store_contract_ids(dl.node_id, &[contract_id]);
            if let Err(e) = self.sync(dl).await {
                errors.push(e);
            }
        }
        ClientError::collect(errors)
    }

    /// Cancel the deployment's contract and clear the computed fields.
    pub async fn cancel(&self, dl: &mut VmDeployment) -> ClientResult<()> {
        self.client.ensure_open()?;
        self.client.validate_balance().await?;
        let contract_id = match dl.contract_id {
            0 => dl.node_deployment_id.get(&dl.node_id).copied().unwrap_or(0),
            id => id,
        };
        self.client
            .deployer()
            .cancel(contract_id)
            .await
            .context(format!("could not cancel deployment {}", dl.name))?;
        self.client.state().remove_contract_ids(dl.node_id, &[contract_id]);
        dl.nullify();
        info!(deployment = %dl.name, contract_id, "deployment cancelled");
        Ok(())
    }

    /// Reload the computed fields from the node. A deployment whose
    /// contract is gone is cleared instead.
    pub async fn sync(&self, dl: &mut VmDeployment) -> ClientResult<()> {
        if dl.contract_id != 0 && !self.client.chain().is_valid_contract(dl.contract_id).await? {
            self.client.state().remove_contract_ids(dl.node_id, &[dl.contract_id]);
            dl.contract_id = 0;
        }
        if dl.contract_id == 0 {
            dl.nullify();
            return Ok(());
        }
        dl.node_deployment_id = HashMap::from([(dl.node_id, dl.contract_id)]);
        let Some(mut remote) = self
            .client
            .deployer()
            .get_deployments(&dl.node_deployment_id)
            .await
            .context("failed to get deployments to update local state")?
            .remove(&dl.node_id)
        else {
            return Ok(());
        };
        remote.workloads.retain(|wl| wl.result.state.is_okay());

        let mut fresh = VmDeployment::from_zos_deployment(&remote, dl.node_id)?;
        fresh.match_order(dl);
        dl.disks = fresh.disks;
        dl.zdbs = fresh.zdbs;
        dl.qsfs = fresh.qsfs;
        dl.vms = fresh.vms;
        if let Some(subnet) = self.client.state().node_subnet(&dl.network_name, dl.node_id) {
            dl.ip_range = subnet.to_string();
        }
        Ok(())
    }
}

/// Host ids of `ips` that fall inside `subnet`.
fn used_hosts(ips: &[String], subnet: &IpNet) -> Vec<u8> {
    ips.iter()
        .filter_map(|ip| ip.parse::<Ipv4Addr>().ok())
        .filter(|ip| subnet.contains(&IpAddr::V4(*ip)))
        .map(|ip| ip.octets()[3])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_hosts_inside_subnet_only() {
        let subnet: IpNet = "10.20.2.0/24".parse().unwrap();
        let listed = vec![
            "10.20.2.2".to_string(),
            "10.20.3.4".to_string(),
            "300:1::2".to_string(),
            "10.20.2.9".to_string(),
        ];
        assert_eq!(used_hosts(&listed, &subnet), vec![2, 9]);
    }
}
