//! Twin-scoped contract listings and project lookups.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use grid_chain::{ContractState, ContractType, MemoryChain};
use grid_node::NodeClientPool;
use grid_types::{DeploymentData, WorkloadType};
use grid_types::metadata::{KIND_GATEWAY_FQDN, KIND_GATEWAY_NAME, KIND_VM};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{GraphQlError, GraphQlResult};
use crate::graphql::GraphQl;

/// A contract as the index reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(rename = "contractID")]
    pub contract_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "deploymentData", default)]
    pub deployment_data: String,
    /// Node and rent contracts.
    #[serde(rename = "nodeID", default)]
    pub node_id: u32,
    /// Name contracts.
    #[serde(default)]
    pub name: String,
}

impl Contract {
    pub fn id(&self) -> GraphQlResult<u64> {
        self.contract_id
            .parse()
            .map_err(|_| GraphQlError::InvalidContractId(self.contract_id.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contracts {
    #[serde(rename = "nameContracts", default)]
    pub name_contracts: Vec<Contract>,
    #[serde(rename = "nodeContracts", default)]
    pub node_contracts: Vec<Contract>,
    #[serde(rename = "rentContracts", default)]
    pub rent_contracts: Vec<Contract>,
}

impl Contracts {
    pub fn len(&self) -> usize {
        self.name_contracts.len() + self.node_contracts.len() + self.rent_contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of node and name contracts, node contracts first.
    pub fn ids(&self) -> GraphQlResult<Vec<u64>> {
        self.node_contracts
            .iter()
            .chain(&self.name_contracts)
            .map(Contract::id)
            .collect()
    }
}

pub fn state_name(state: ContractState) -> &'static str {
    match state {
        ContractState::Created => "Created",
        ContractState::GracePeriod => "GracePeriod",
        ContractState::Deleted => "Deleted",
    }
}

/// Source of a twin's contracts.
#[async_trait]
pub trait ContractsIndex: Send + Sync {
    async fn list_contracts_by_twin_id(
        &self,
        twin_id: u32,
        states: &[ContractState],
    ) -> GraphQlResult<Contracts>;
}

#[async_trait]
impl ContractsIndex for GraphQl {
    /// One `totalCount` query per contract kind, then one query fetching
    /// all of them.
    async fn list_contracts_by_twin_id(
        &self,
        twin_id: u32,
        states: &[ContractState],
    ) -> GraphQlResult<Contracts> {
        let state = format!(
            "[{}]",
            states.iter().map(|s| state_name(*s)).collect::<Vec<_>>().join(", ")
        );
        let options = format!("(where: {{twinID_eq: {twin_id}, state_in: {state}}}, orderBy: twinID_ASC)");

        let name_count = self.item_total_count("nameContracts", &options).await?;
        let node_count = self.item_total_count("nodeContracts", &options).await?;
        let rent_count = self.item_total_count("rentContracts", &options).await?;

        let body = format!(
            r#"query getContracts($nameContractsCount: Int!, $nodeContractsCount: Int!, $rentContractsCount: Int!){{
            nameContracts(where: {{twinID_eq: {twin_id}, state_in: {state}}}, limit: $nameContractsCount) {{
              contractID
              state
              name
            }}
            nodeContracts(where: {{twinID_eq: {twin_id}, state_in: {state}}}, limit: $nodeContractsCount) {{
              contractID
              deploymentData
              state
              nodeID
            }}
            rentContracts(where: {{twinID_eq: {twin_id}, state_in: {state}}}, limit: $rentContractsCount) {{
              contractID
              state
              nodeID
            }}
          }}"#
        );
        let data = self
            .query(
                &body,
                json!({
                    "nameContractsCount": name_count,
                    "nodeContractsCount": node_count,
                    "rentContractsCount": rent_count,
                }),
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }
}

/// [`ContractsIndex`] read straight from an in-process chain.
pub struct MemoryContractsIndex {
    chain: Arc<MemoryChain>,
}

impl MemoryContractsIndex {
    pub fn new(chain: Arc<MemoryChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl ContractsIndex for MemoryContractsIndex {
    async fn list_contracts_by_twin_id(
        &self,
        twin_id: u32,
        states: &[ContractState],
    ) -> GraphQlResult<Contracts> {
        let mut out = Contracts::default();
        for c in self.chain.list_contracts(twin_id, states).await {
            let mut contract = Contract {
                contract_id: c.contract_id.to_string(),
                state: state_name(c.state).to_string(),
                ..Default::default()
            };
            match c.contract_type {
                ContractType::Node(node) => {
                    contract.node_id = node.node_id;
                    contract.deployment_data = node.deployment_data;
                    out.node_contracts.push(contract);
                }
                ContractType::Name(name) => {
                    contract.name = name.name;
                    out.name_contracts.push(contract);
                }
                ContractType::Rent(rent) => {
                    contract.node_id = rent.node_id;
                    out.rent_contracts.push(contract);
                }
            }
        }
        Ok(out)
    }
}

/// Contract lookups for one twin.
pub struct ContractsGetter {
    twin_id: u32,
    index: Arc<dyn ContractsIndex>,
    pool: Arc<NodeClientPool>,
}

impl ContractsGetter {
    pub fn new(twin_id: u32, index: Arc<dyn ContractsIndex>, pool: Arc<NodeClientPool>) -> Self {
        Self { twin_id, index, pool }
    }

    pub async fn list_contracts_by_twin_id(&self, states: &[ContractState]) -> GraphQlResult<Contracts> {
        self.index.list_contracts_by_twin_id(self.twin_id, states).await
    }

    /// Live node contracts whose metadata names `project`, plus (unless
    /// `no_gateways`) the name contracts backing their name gateways.
    pub async fn list_contracts_of_project_name(
        &self,
        project: &str,
        no_gateways: bool,
    ) -> GraphQlResult<Contracts> {
        let all = self
            .list_contracts_by_twin_id(&[ContractState::Created, ContractState::GracePeriod])
            .await?;

        let mut contracts = Contracts::default();
        for contract in all.node_contracts {
            match DeploymentData::parse(&contract.deployment_data) {
                Ok(data) if data.project_name == project => contracts.node_contracts.push(contract),
                Ok(_) => {}
                Err(error) => warn!(
                    metadata = %contract.deployment_data,
                    id = %contract.contract_id,
                    %error,
                    "got contract with invalid metadata"
                ),
            }
        }
        if no_gateways {
            return Ok(contracts);
        }

        let gateway_names = self.name_gateways_within(&contracts.node_contracts).await?;
        contracts.name_contracts = all
            .name_contracts
            .into_iter()
            .filter(|c| gateway_names.iter().any(|n| *n == c.name))
            .collect();
        debug!(project, count = contracts.len(), "listed project contracts");
        Ok(contracts)
    }

    async fn name_gateways_within(&self, node_contracts: &[Contract]) -> GraphQlResult<Vec<String>> {
        let mut names = Vec::new();
        for contract in node_contracts {
            let contract_id = contract.id()?;
            let client = self.pool.get_node_client(contract.node_id).await?;
            let dl = client
                .deployment_get(contract_id)
                .await
                .map_err(|source| GraphQlError::Deployment {
                    contract_id,
                    node_id: contract.node_id,
                    source,
                })?;
            names.extend(
                dl.workloads
                    .iter()
                    .filter(|w| w.workload_type() == WorkloadType::GatewayNameProxy)
                    .map(|w| w.name.clone()),
            );
        }
        Ok(names)
    }

    /// Node id → contract id of the `kind` deployment called `name` in
    /// `project`. VMs and gateways live on one node, so the first match wins.
    pub async fn get_node_contracts_by_type_and_name(
        &self,
        project: &str,
        kind: &str,
        name: &str,
    ) -> GraphQlResult<HashMap<u32, u64>> {
        let contracts = self.list_contracts_of_project_name(project, false).await?;
        let single = [KIND_VM, KIND_GATEWAY_FQDN, KIND_GATEWAY_NAME].contains(&kind);

        let mut ids = HashMap::new();
        for contract in &contracts.node_contracts {
            let data = match DeploymentData::parse(&contract.deployment_data) {
                Ok(data) => data,
                Err(error) => {
                    warn!(id = %contract.contract_id, %error, "got contract with invalid metadata");
                    continue;
                }
            };
            if data.kind != kind || data.name != name {
                continue;
            }
            ids.insert(contract.node_id, contract.id()?);
            if single {
                break;
            }
        }
        if ids.is_empty() {
            return Err(GraphQlError::ContractsNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contracts_json() {
        let raw = r#"{
            "nameContracts": [{"contractID": "12", "state": "Created", "name": "foo"}],
            "nodeContracts": [{"contractID": "10", "state": "Created", "nodeID": 11, "deploymentData": "{}"}],
            "rentContracts": []
        }"#;
        let contracts: Contracts = serde_json::from_str(raw).unwrap();
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts.node_contracts[0].node_id, 11);
        assert_eq!(contracts.ids().unwrap(), vec![10, 12]);
    }

    #[test]
    fn test_bad_contract_id() {
        let c = Contract {
            contract_id: "x1".to_string(),
            ..Default::default()
        };
        assert!(matches!(c.id(), Err(GraphQlError::InvalidContractId(_))));
    }
}
