//! The chain operations the client needs.

use std::collections::HashMap;

use async_trait::async_trait;
use grid_core::Identity;
use tracing::{debug, warn};

use crate::error::ChainResult;
use crate::types::{Balance, BatchCreateContractData, BatchCreateResult, Contract};

/// Contract, twin and balance operations against the grid chain.
///
/// Write calls act as the twin owning `identity`.
#[async_trait]
pub trait Substrate: Send + Sync {
    async fn get_twin_by_pub_key(&self, public_key: &[u8]) -> ChainResult<u32>;

    async fn get_node_twin(&self, node_id: u32) -> ChainResult<u32>;

    async fn get_balance(&self, identity: &Identity) -> ChainResult<Balance>;

    /// TFT price in mUSD.
    async fn get_tft_price(&self) -> ChainResult<u64>;

    async fn create_node_contract(
        &self,
        identity: &Identity,
        node_id: u32,
        body: &str,
        hash: &str,
        public_ips: u32,
        solution_provider_id: Option<u64>,
    ) -> ChainResult<u64>;

    async fn batch_create_contract(
        &self,
        identity: &Identity,
        data: Vec<BatchCreateContractData>,
    ) -> ChainResult<BatchCreateResult>;

    async fn update_node_contract(
        &self,
        identity: &Identity,
        contract_id: u64,
        body: &str,
        hash: &str,
    ) -> ChainResult<u64>;

    async fn create_name_contract(&self, identity: &Identity, name: &str) -> ChainResult<u64>;

    async fn cancel_contract(&self, identity: &Identity, contract_id: u64) -> ChainResult<()>;

    /// Cancel all ids atomically.
    async fn batch_cancel_contract(&self, identity: &Identity, ids: &[u64]) -> ChainResult<()>;

    async fn get_contract(&self, contract_id: u64) -> ChainResult<Contract>;

    async fn get_contract_id_by_name_registration(&self, name: &str) -> ChainResult<u64>;

    /// Release the connection. Later calls fail with [`ChainError::Closed`].
    async fn close(&self);

    /// Cancel a contract, treating an already removed one as cancelled.
    async fn ensure_contract_canceled(&self, identity: &Identity, contract_id: u64) -> ChainResult<()> {
        if contract_id == 0 {
            return Ok(());
        }
        match self.cancel_contract(identity, contract_id).await {
            Err(e) if e.is_not_found() => {
                debug!(contract_id, "contract already cancelled");
                Ok(())
            }
            other => other,
        }
    }

    /// A contract exists and is in the created state.
    async fn is_valid_contract(&self, contract_id: u64) -> ChainResult<bool> {
        match self.get_contract(contract_id).await {
            Ok(contract) => Ok(contract.is_created()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop entries whose contract is no longer valid.
    async fn delete_invalid_contracts(&self, contracts: &mut HashMap<u32, u64>) -> ChainResult<()> {
        let mut invalid = Vec::new();
        for (&node, &contract_id) in contracts.iter() {
            if !self.is_valid_contract(contract_id).await? {
                invalid.push(node);
            }
        }
        for node in invalid {
            if let Some(contract_id) = contracts.remove(&node) {
                warn!(node_id = node, contract_id, "dropping invalid contract");
            }
        }
        Ok(())
    }

    /// Check `contract_id` is a live name contract for `name`. Returns it
    /// when valid and 0 when a new one is needed; a contract held under
    /// another name is cancelled.
    async fn invalidate_name_contract(
        &self,
        identity: &Identity,
        contract_id: u64,
        name: &str,
    ) -> ChainResult<u64> {
        if contract_id == 0 {
            return Ok(0);
        }
        let contract = match self.get_contract(contract_id).await {
            Ok(contract) => contract,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        if !contract.is_created() {
            return Ok(0);
        }
        match contract.name_contract() {
            Some(n) if n.name == name => Ok(contract_id),
            _ => {
                self.ensure_contract_canceled(identity, contract_id).await?;
                Ok(0)
            }
        }
    }
}
