//! Pre-flight checks run before any chain write.

use std::collections::{BTreeSet, HashMap};

use grid_node::{FarmFilter, Limit, Node};
use grid_types::{Capacity, Deployment, WorkloadType};
use tracing::debug;

use crate::deployer::Deployer;
use crate::error::{DeployerError, DeployerResult};

impl Deployer {
    /// Reject a change the target nodes or farms cannot take.
    ///
    /// Checks per node: deployment shape, public IPv4 count against the
    /// existing contract and the farm's free addresses, gateway
    /// prerequisites, and free memory, SSD and HDD.
    pub async fn validate(
        &self,
        old: &HashMap<u32, Deployment>,
        new: &HashMap<u32, Deployment>,
    ) -> DeployerResult<()> {
        let node_ids: BTreeSet<u32> = old.keys().chain(new.keys()).copied().collect();
        let mut nodes: HashMap<u32, Node> = HashMap::new();
        for &node_id in &node_ids {
            let node = self
                .index
                .node(node_id)
                .await
                .map_err(|source| DeployerError::NodeIndex { node: node_id, source })?;
            nodes.insert(node_id, node);
        }

        let mut farm_ips: HashMap<u32, i64> = HashMap::new();
        for node in nodes.values() {
            if farm_ips.contains_key(&node.farm_id) {
                continue;
            }
            let filter = FarmFilter {
                farm_id: Some(node.farm_id),
                ..Default::default()
            };
            let farms = self
                .index
                .farms(&filter, Limit { page: 1, size: 1 })
                .await
                .map_err(|source| DeployerError::FarmIndex { farm: node.farm_id, source })?;
            let farm = farms
                .first()
                .ok_or(DeployerError::FarmNotFound(node.farm_id))?;
            farm_ips.insert(node.farm_id, farm.free_public_ips() as i64);
        }

        // Addresses held by the deployments being replaced come back to their farm.
        for (node_id, dl) in old {
            if let Some(node) = nodes.get(node_id) {
                *farm_ips.entry(node.farm_id).or_default() += i64::from(dl.count_public_ips());
            }
        }

        let mut targets: Vec<(&u32, &Deployment)> = new.iter().collect();
        targets.sort_by_key(|(node_id, _)| **node_id);
        for (&node_id, dl) in targets {
            dl.valid().map_err(DeployerError::Invalid)?;
            let Some(node) = nodes.get(&node_id) else {
                continue;
            };

            let mut total = node.total_resources;
            let requested = dl.count_public_ips();
            if let Some(old_dl) = old.get(&node_id) {
                let released = old_dl.capacity();
                total.mru += released.mru;
                total.sru += released.sru;
                total.hru += released.hru;

                let contract = self.chain.get_contract(old_dl.contract_id).await?;
                let current = contract.public_ips_count();
                if requested > current {
                    return Err(DeployerError::PublicIpIncrease {
                        node: node_id,
                        current,
                        requested,
                    });
                }
            }

            let free_ips = farm_ips.entry(node.farm_id).or_default();
            *free_ips -= i64::from(requested);
            if *free_ips < 0 {
                return Err(DeployerError::NotEnoughPublicIps(node.farm_id));
            }

            if !dl.by_type(&[WorkloadType::GatewayFqdnProxy]).is_empty()
                && node.public_config.ipv4.is_empty()
            {
                return Err(DeployerError::FqdnWithoutIpv4(node_id));
            }
            if !dl.by_type(&[WorkloadType::GatewayNameProxy]).is_empty()
                && node.public_config.domain.is_empty()
            {
                return Err(DeployerError::NameWithoutDomain(node_id));
            }

            let used = node.used_resources;
            let free = Capacity {
                mru: total.mru.saturating_sub(used.mru),
                sru: (2 * total.sru).saturating_sub(used.sru),
                hru: total.hru.saturating_sub(used.hru),
                ..Default::default()
            };
            let needed = dl.capacity();
            if needed.mru > free.mru || needed.sru > free.sru || needed.hru > free.hru {
                return Err(DeployerError::NotEnoughResources {
                    node: node_id,
                    needed: Capacity {
                        cru: 0,
                        ipv4u: 0,
                        ..needed
                    },
                    free,
                });
            }
            debug!(node_id, %needed, %free, "node capacity checked");
        }
        Ok(())
    }
}
