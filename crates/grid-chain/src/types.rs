//! On-chain records.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractState {
    Created,
    GracePeriod,
    Deleted,
}

/// Node contract body: authorizes one deployment with a given hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeContract {
    pub node_id: u32,
    pub deployment_hash: String,
    pub deployment_data: String,
    pub public_ips_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameContract {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentContract {
    pub node_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractType {
    Node(NodeContract),
    Name(NameContract),
    Rent(RentContract),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: u64,
    pub twin_id: u32,
    pub state: ContractState,
    pub contract_type: ContractType,
    pub solution_provider_id: Option<u64>,
}

impl Contract {
    pub fn is_created(&self) -> bool {
        self.state == ContractState::Created
    }

    pub fn node_contract(&self) -> Option<&NodeContract> {
        match &self.contract_type {
            ContractType::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn name_contract(&self) -> Option<&NameContract> {
        match &self.contract_type {
            ContractType::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Declared public IPv4 count; zero for non-node contracts.
    pub fn public_ips_count(&self) -> u32 {
        self.node_contract().map_or(0, |n| n.public_ips_count)
    }
}

/// One item of a batched node-contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCreateContractData {
    pub node: u32,
    /// Deployment metadata stored as the contract's deployment data.
    pub body: String,
    /// Hex-encoded deployment challenge hash.
    pub hash: String,
    pub public_ips: u32,
    pub solution_provider_id: Option<u64>,
}

/// Result of a batched creation. Items at and after `failed_index` were not
/// created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCreateResult {
    pub contracts: Vec<u64>,
    pub failed_index: Option<usize>,
    pub error: Option<crate::error::ChainError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Free balance in chain units (10^7 per TFT).
    pub free: u128,
    pub reserved: u128,
}
