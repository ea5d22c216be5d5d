use anyhow::Context;
use grid_chain::ContractState;
use grid_core::GridConfig;
use grid_graphql::{Contracts, ContractsIndex, GraphQl};
use grid_types::DeploymentData;
use tracing::{debug, warn};

pub async fn run(
    config: &GridConfig,
    twin_id: u32,
    project: Option<&str>,
    json: bool,
) -> anyhow::Result<String> {
    let graphql = GraphQl::new(config.graphql_urls.clone())?;
    let contracts = graphql
        .list_contracts_by_twin_id(twin_id, &[ContractState::Created, ContractState::GracePeriod])
        .await
        .with_context(|| format!("failed to list contracts of twin {twin_id}"))?;
    debug!(twin_id, count = contracts.len(), "listed contracts");

    let contracts = match project {
        Some(project) => of_project(contracts, project),
        None => contracts,
    };
    render(&contracts, json)
}

/// Node contracts whose metadata names `project`.
fn of_project(all: Contracts, project: &str) -> Contracts {
    let node_contracts = all
        .node_contracts
        .into_iter()
        .filter(|c| match DeploymentData::parse(&c.deployment_data) {
            Ok(data) => data.project_name == project,
            Err(error) => {
                warn!(id = %c.contract_id, %error, "skipping contract with invalid metadata");
                false
            }
        })
        .collect();
    Contracts {
        node_contracts,
        ..Default::default()
    }
}

fn render(contracts: &Contracts, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(contracts)?);
    }
    let mut lines = Vec::with_capacity(contracts.len());
    for c in &contracts.node_contracts {
        lines.push(format!("node  {:>8}  node {:<6} {}", c.contract_id, c.node_id, c.state));
    }
    for c in &contracts.name_contracts {
        lines.push(format!("name  {:>8}  {:<11} {}", c.contract_id, c.name, c.state));
    }
    for c in &contracts.rent_contracts {
        lines.push(format!("rent  {:>8}  node {:<6} {}", c.contract_id, c.node_id, c.state));
    }
    if lines.is_empty() {
        return Ok("no contracts found".to_string());
    }
    Ok(lines.join("\n"))
}
