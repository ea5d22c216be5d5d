//! Composite flows: a dedicated network plus what runs on it.

use grid_node::{filter_nodes, FilterLimit, NodeFilter, StorageRequest};
use grid_node::index::STATUS_UP;
use grid_types::{IpNet, MEGABYTE};
use grid_workloads::{K8sCluster, Vm, VmDeployment, ZNet};
use tracing::{info, warn};

use crate::client::GridClient;
use crate::error::{ClientError, ClientResult};

/// A machine deployed on its own network.
#[derive(Debug, Clone)]
pub struct VmPlan {
    pub network: ZNet,
    pub deployment: VmDeployment,
}

impl VmPlan {
    /// The reloaded machine.
    pub fn vm(&self) -> Option<&Vm> {
        self.deployment.vms.first()
    }
}

/// A cluster deployed on its own network.
#[derive(Debug, Clone)]
pub struct K8sPlan {
    pub network: ZNet,
    pub cluster: K8sCluster,
}

/// `10.20.0.0/16`, the range of networks created by plans.
fn default_range() -> IpNet {
    IpNet::v4(10, 20, 0, 0, 16)
}

/// Smallest node that can hold `vm`.
fn vm_filter(vm: &Vm) -> NodeFilter {
    NodeFilter {
        status: Some(STATUS_UP.to_string()),
        free_mru: Some(vm.memory_mb * MEGABYTE),
        total_cru: Some(u64::from(vm.cpu)),
        free_ips: vm.public_ip.then_some(1),
        has_gpu: (!vm.gpus.is_empty()).then_some(true),
        ..Default::default()
    }
}

impl GridClient {
    async fn pick_node(&self, vm: &Vm, filter: Option<NodeFilter>) -> ClientResult<u32> {
        let filter = filter.unwrap_or_else(|| vm_filter(vm));
        let rootfs = (vm.rootfs_size_mb * MEGABYTE).max(vm.min_root_size());
        let storage = StorageRequest {
            rootfs: vec![rootfs],
            ..Default::default()
        };
        let nodes = filter_nodes(
            self.index().as_ref(),
            self.pool(),
            &filter,
            &storage,
            FilterLimit::with_limit(1),
        )
        .await?;
        let node = nodes.first().map(|n| n.node_id).ok_or_else(|| {
            ClientError::Node(grid_node::NodeError::NoNodesMatching(format!("{filter:?}")))
        })?;
        info!(vm = %vm.name, node_id = node, "picked node");
        Ok(node)
    }

    /// Cancel `network` after a failed follow-up deploy, keeping both
    /// errors if that fails too.
    async fn unwind_network(&self, network: &mut ZNet, error: ClientError) -> ClientError {
        warn!(network = %network.name, %error, "deploy failed, cancelling network");
        match self.networks().cancel(network).await {
            Ok(()) => error,
            Err(cleanup) => ClientError::Cleanup {
                error: Box::new(error),
                cleanup: Box::new(cleanup),
            },
        }
    }

    /// Deploy `vm` on a network of its own.
    ///
    /// A node is picked when `vm.node_id` is 0. The network defaults to
    /// `<vm name>network` over `10.20.0.0/16` and is cancelled again when
    /// the machine fails to deploy.
    pub async fn deploy_vm_with_network(
        &self,
        mut vm: Vm,
        network_name: Option<&str>,
        filter: Option<NodeFilter>,
    ) -> ClientResult<VmPlan> {
        self.ensure_open()?;
        if vm.node_id == 0 {
            vm.node_id = self.pick_node(&vm, filter).await?;
        }
        let network_name = network_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}network", vm.name));
        vm.network_name = network_name.clone();

        let mut network = ZNet::new(network_name.clone(), vec![vm.node_id], default_range());
        network.solution_type = format!("vm/{}", vm.name);
        if !vm.mycelium_ip_seed.is_empty() {
            network.mycelium_keys.insert(vm.node_id, Vec::new());
        }
        self.networks().deploy(&mut network).await?;

        let mut deployment = VmDeployment::new(vm.name.clone(), vm.node_id, network_name).with_vm(vm);
        if let Err(error) = self.deployments().deploy(&mut deployment).await {
            return Err(self.unwind_network(&mut network, error).await);
        }
        Ok(VmPlan { network, deployment })
    }

    /// Deploy `cluster` on a network spanning its nodes.
    ///
    /// The network is named after the cluster's `network_name`, or
    /// `<master name>network` when that is empty.
    pub async fn deploy_k8s_with_network(&self, mut cluster: K8sCluster) -> ClientResult<K8sPlan> {
        self.ensure_open()?;
        if cluster.network_name.is_empty() {
            cluster.network_name = format!("{}network", cluster.master.name);
        }
        let mut network = ZNet::new(cluster.network_name.clone(), cluster.node_ids(), default_range());
        network.solution_type = format!("kubernetes/{}", cluster.master.name);
        for member in cluster.all_nodes() {
            if !member.mycelium_ip_seed.is_empty() {
                network.mycelium_keys.insert(member.node_id, Vec::new());
            }
        }
        self.networks().deploy(&mut network).await?;

        if let Err(error) = self.k8s().deploy(&mut cluster).await {
            return Err(self.unwind_network(&mut network, error).await);
        }
        Ok(K8sPlan { network, cluster })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_types::GIGABYTE;

    #[test]
    fn test_vm_filter_asks_for_what_the_vm_needs() {
        let vm = Vm {
            name: "vm".into(),
            cpu: 2,
            memory_mb: 4096,
            public_ip: true,
            ..Default::default()
        };
        let filter = vm_filter(&vm);
        assert_eq!(filter.status.as_deref(), Some("up"));
        assert_eq!(filter.free_mru, Some(4 * GIGABYTE));
        assert_eq!(filter.total_cru, Some(2));
        assert_eq!(filter.free_ips, Some(1));
        assert_eq!(filter.has_gpu, None);
    }
}
