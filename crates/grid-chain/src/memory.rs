//! In-process chain ledger.
//!
//! `MemoryChain` keeps twins, balances, nodes and contracts in memory and
//! implements [`Substrate`] over them. It records how many calls of each
//! kind it served and can be told to fail specific calls, which is what
//! the deployer scenarios assert against.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use grid_core::Identity;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ChainError, ChainResult};
use crate::substrate::Substrate;
use crate::types::{
    Balance, BatchCreateContractData, BatchCreateResult, Contract, ContractState, ContractType,
    NameContract, NodeContract, RentContract,
};

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainCalls {
    pub create_node: usize,
    pub batch_create: usize,
    pub update_node: usize,
    pub create_name: usize,
    pub cancel: usize,
    pub batch_cancel: usize,
}

/// Calls that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainOp {
    CreateNode,
    BatchCreate,
    UpdateNode,
    CreateName,
    Cancel,
    BatchCancel,
}

#[derive(Default)]
struct Ledger {
    twins_by_key: HashMap<[u8; 32], u32>,
    balances: HashMap<u32, u128>,
    node_twins: HashMap<u32, u32>,
    contracts: BTreeMap<u64, Contract>,
    names: HashMap<String, u64>,
    next_contract_id: u64,
    tft_price: u64,
    calls: ChainCalls,
    failures: HashMap<ChainOp, ChainError>,
    batch_create_fail_at: Option<usize>,
}

pub struct MemoryChain {
    ledger: Mutex<Ledger>,
    closed: AtomicBool,
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChain {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                next_contract_id: 1,
                tft_price: 10,
                ..Default::default()
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a twin for `public_key` holding `balance` units.
    pub fn with_twin(mut self, public_key: [u8; 32], twin_id: u32, balance: u128) -> Self {
        let ledger = self.ledger.get_mut();
        ledger.twins_by_key.insert(public_key, twin_id);
        ledger.balances.insert(twin_id, balance);
        self
    }

    pub fn with_node(mut self, node_id: u32, twin_id: u32) -> Self {
        self.ledger.get_mut().node_twins.insert(node_id, twin_id);
        self
    }

    /// Seed a rent contract so `node_id` counts as rented by `twin_id`.
    pub fn with_rent_contract(mut self, twin_id: u32, node_id: u32) -> Self {
        let ledger = self.ledger.get_mut();
        let id = ledger.next_contract_id;
        ledger.next_contract_id += 1;
        ledger.contracts.insert(
            id,
            Contract {
                contract_id: id,
                twin_id,
                state: ContractState::Created,
                contract_type: ContractType::Rent(RentContract { node_id }),
                solution_provider_id: None,
            },
        );
        self
    }

    pub async fn set_balance(&self, twin_id: u32, balance: u128) {
        self.ledger.lock().await.balances.insert(twin_id, balance);
    }

    /// Make the next call of `op` fail with `error`.
    pub async fn fail_next(&self, op: ChainOp, error: ChainError) {
        self.ledger.lock().await.failures.insert(op, error);
    }

    /// Make the next batch creation stop at item `index`.
    pub async fn fail_batch_create_at(&self, index: usize) {
        self.ledger.lock().await.batch_create_fail_at = Some(index);
    }

    /// Mark a contract deleted without going through a cancel call.
    pub async fn expire_contract(&self, contract_id: u64) {
        let mut ledger = self.ledger.lock().await;
        if let Some(contract) = ledger.contracts.get_mut(&contract_id) {
            contract.state = ContractState::Deleted;
        }
    }

    pub async fn calls(&self) -> ChainCalls {
        self.ledger.lock().await.calls
    }

    /// Contracts of `twin_id` in any of `states`, ordered by id.
    pub async fn list_contracts(&self, twin_id: u32, states: &[ContractState]) -> Vec<Contract> {
        self.ledger
            .lock()
            .await
            .contracts
            .values()
            .filter(|c| c.twin_id == twin_id && states.contains(&c.state))
            .cloned()
            .collect()
    }

    /// Live contracts of any owner.
    pub async fn active_contracts(&self) -> Vec<Contract> {
        self.ledger
            .lock()
            .await
            .contracts
            .values()
            .filter(|c| c.is_created())
            .cloned()
            .collect()
    }

    fn check_open(&self) -> ChainResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChainError::Closed);
        }
        Ok(())
    }
}

impl Ledger {
    fn twin_of(&self, identity: &Identity) -> ChainResult<u32> {
        let key = identity.public_key();
        self.twins_by_key
            .get(&key)
            .copied()
            .ok_or_else(|| ChainError::TwinNotFound(hex_key(&key)))
    }

    fn take_failure(&mut self, op: ChainOp) -> ChainResult<()> {
        match self.failures.remove(&op) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn insert_node_contract(
        &mut self,
        twin_id: u32,
        data: &BatchCreateContractData,
    ) -> ChainResult<u64> {
        if !self.node_twins.contains_key(&data.node) {
            return Err(ChainError::NodeNotFound(data.node));
        }
        let id = self.next_contract_id;
        self.next_contract_id += 1;
        self.contracts.insert(
            id,
            Contract {
                contract_id: id,
                twin_id,
                state: ContractState::Created,
                contract_type: ContractType::Node(NodeContract {
                    node_id: data.node,
                    deployment_hash: data.hash.clone(),
                    deployment_data: data.body.clone(),
                    public_ips_count: data.public_ips,
                }),
                solution_provider_id: data.solution_provider_id,
            },
        );
        Ok(id)
    }

    fn owned_live(&self, twin_id: u32, contract_id: u64) -> ChainResult<&Contract> {
        let contract = self
            .contracts
            .get(&contract_id)
            .filter(|c| c.state != ContractState::Deleted)
            .ok_or(ChainError::ContractNotExists(contract_id))?;
        if contract.twin_id != twin_id {
            return Err(ChainError::NotOwner { contract_id, twin_id });
        }
        Ok(contract)
    }

    fn delete(&mut self, contract_id: u64) {
        if let Some(contract) = self.contracts.get_mut(&contract_id) {
            contract.state = ContractState::Deleted;
            if let ContractType::Name(NameContract { name }) = &contract.contract_type {
                self.names.remove(name);
            }
        }
    }
}

fn hex_key(key: &[u8; 32]) -> String {
    hex::encode(key)
}

#[async_trait]
impl Substrate for MemoryChain {
    async fn get_twin_by_pub_key(&self, public_key: &[u8]) -> ChainResult<u32> {
        self.check_open()?;
        let key: [u8; 32] = public_key
            .try_into()
            .map_err(|_| ChainError::Rejected("public key must be 32 bytes".to_string()))?;
        let ledger = self.ledger.lock().await;
        ledger
            .twins_by_key
            .get(&key)
            .copied()
            .ok_or_else(|| ChainError::TwinNotFound(hex_key(&key)))
    }

    async fn get_node_twin(&self, node_id: u32) -> ChainResult<u32> {
        self.check_open()?;
        let ledger = self.ledger.lock().await;
        ledger
            .node_twins
            .get(&node_id)
            .copied()
            .ok_or(ChainError::NodeNotFound(node_id))
    }

    async fn get_balance(&self, identity: &Identity) -> ChainResult<Balance> {
        self.check_open()?;
        let ledger = self.ledger.lock().await;
        let twin = ledger.twin_of(identity)?;
        Ok(Balance {
            free: ledger.balances.get(&twin).copied().unwrap_or_default(),
            reserved: 0,
        })
    }

    async fn get_tft_price(&self) -> ChainResult<u64> {
        self.check_open()?;
        Ok(self.ledger.lock().await.tft_price)
    }

    async fn create_node_contract(
        &self,
        identity: &Identity,
        node_id: u32,
        body: &str,
        hash: &str,
        public_ips: u32,
        solution_provider_id: Option<u64>,
    ) -> ChainResult<u64> {
        self.check_open()?;
        let mut ledger = self.ledger.lock().await;
        ledger.calls.create_node += 1;
        ledger.take_failure(ChainOp::CreateNode)?;
        let twin = ledger.twin_of(identity)?;
        let id = ledger.insert_node_contract(
            twin,
            &BatchCreateContractData {
                node: node_id,
                body: body.to_string(),
                hash: hash.to_string(),
                public_ips,
                solution_provider_id,
            },
        )?;
        info!(contract_id = id, node_id, twin_id = twin, "node contract created");
        Ok(id)
    }

    async fn batch_create_contract(
        &self,
        identity: &Identity,
        data: Vec<BatchCreateContractData>,
    ) -> ChainResult<BatchCreateResult> {
        self.check_open()?;
        let mut ledger = self.ledger.lock().await;
        ledger.calls.batch_create += 1;
        ledger.take_failure(ChainOp::BatchCreate)?;
        let twin = ledger.twin_of(identity)?;
        let fail_at = ledger.batch_create_fail_at.take();

        let mut contracts = Vec::with_capacity(data.len());
        for (index, item) in data.iter().enumerate() {
            if fail_at == Some(index) {
                return Ok(BatchCreateResult {
                    contracts,
                    failed_index: Some(index),
                    error: Some(ChainError::Rejected(format!(
                        "batch item {index} failed on node {}",
                        item.node
                    ))),
                });
            }
            match ledger.insert_node_contract(twin, item) {
                Ok(id) => contracts.push(id),
                Err(e) => {
                    return Ok(BatchCreateResult {
                        contracts,
                        failed_index: Some(index),
                        error: Some(e),
                    });
                }
            }
        }
        info!(twin_id = twin, count = contracts.len(), "batch of node contracts created");
        Ok(BatchCreateResult { contracts, failed_index: None, error: None })
    }

    async fn update_node_contract(
        &self,
        identity: &Identity,
        contract_id: u64,
        body: &str,
        hash: &str,
    ) -> ChainResult<u64> {
        self.check_open()?;
        let mut ledger = self.ledger.lock().await;
        ledger.calls.update_node += 1;
        ledger.take_failure(ChainOp::UpdateNode)?;
        let twin = ledger.twin_of(identity)?;
        ledger.owned_live(twin, contract_id)?;

        let contract = ledger
            .contracts
            .get_mut(&contract_id)
            .ok_or(ChainError::ContractNotExists(contract_id))?;
        match &mut contract.contract_type {
            ContractType::Node(node) => {
                node.deployment_hash = hash.to_string();
                if !body.is_empty() {
                    node.deployment_data = body.to_string();
                }
            }
            _ => return Err(ChainError::NotNodeContract(contract_id)),
        }
        debug!(contract_id, hash, "node contract updated");
        Ok(contract_id)
    }

    async fn create_name_contract(&self, identity: &Identity, name: &str) -> ChainResult<u64> {
        self.check_open()?;
        let mut ledger = self.ledger.lock().await;
        ledger.calls.create_name += 1;
        ledger.take_failure(ChainOp::CreateName)?;
        let twin = ledger.twin_of(identity)?;
        if ledger.names.contains_key(name) {
            return Err(ChainError::NameExists(name.to_string()));
        }
        let id = ledger.next_contract_id;
        ledger.next_contract_id += 1;
        ledger.contracts.insert(
            id,
            Contract {
                contract_id: id,
                twin_id: twin,
                state: ContractState::Created,
                contract_type: ContractType::Name(NameContract { name: name.to_string() }),
                solution_provider_id: None,
            },
        );
        ledger.names.insert(name.to_string(), id);
        info!(contract_id = id, name, "name contract created");
        Ok(id)
    }

    async fn cancel_contract(&self, identity: &Identity, contract_id: u64) -> ChainResult<()> {
        self.check_open()?;
        let mut ledger = self.ledger.lock().await;
        ledger.calls.cancel += 1;
        ledger.take_failure(ChainOp::Cancel)?;
        let twin = ledger.twin_of(identity)?;
        ledger.owned_live(twin, contract_id)?;
        ledger.delete(contract_id);
        info!(contract_id, "contract cancelled");
        Ok(())
    }

    async fn batch_cancel_contract(&self, identity: &Identity, ids: &[u64]) -> ChainResult<()> {
        self.check_open()?;
        let mut ledger = self.ledger.lock().await;
        ledger.calls.batch_cancel += 1;
        ledger.take_failure(ChainOp::BatchCancel)?;
        let twin = ledger.twin_of(identity)?;
        for &id in ids {
            ledger.owned_live(twin, id)?;
        }
        for &id in ids {
            ledger.delete(id);
        }
        info!(count = ids.len(), "contracts cancelled");
        Ok(())
    }

    async fn get_contract(&self, contract_id: u64) -> ChainResult<Contract> {
        self.check_open()?;
        self.ledger
            .lock()
            .await
            .contracts
            .get(&contract_id)
            .cloned()
            .ok_or(ChainError::ContractNotExists(contract_id))
    }

    async fn get_contract_id_by_name_registration(&self, name: &str) -> ChainResult<u64> {
        self.check_open()?;
        Ok(self.ledger.lock().await.names.get(name).copied().unwrap_or_default())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
