//! # grid-node
//!
//! Everything that talks to nodes or looks them up.
//!
//! ```text
//! NodeClientPool ── node id → twin (chain, once) → NodeClient
//! NodeClient ────── zos.* commands over an RmbClient, per-call timeout
//! NodeIndex ─────── paginated node / farm catalog (GridProxyClient over HTTP)
//! filter ────────── index pages → ping or storage-pool fit → nodes
//! MemoryGrid ────── in-process fleet implementing RmbClient + NodeIndex
//! ```

pub mod client;
pub mod error;
pub mod filter;
pub mod index;
pub mod memory;
pub mod pool;
pub mod proxy;
pub mod rmb;
pub mod types;

pub use client::{NodeClient, MAX_WG_PORT, MIN_WG_PORT};
pub use error::{NodeError, NodeResult};
pub use filter::{filter_nodes, get_public_node, has_enough_storage, FilterLimit, StorageRequest};
pub use index::{Farm, FarmFilter, FarmPublicIp, IndexPublicConfig, Limit, Node, NodeFilter, NodeIndex};
pub use memory::{MemoryGrid, SimNode};
pub use pool::{are_nodes_up, NodeClientPool};
pub use proxy::GridProxyClient;
pub use rmb::RmbClient;
pub use types::{DeviceType, Gpu, PoolMetrics, PublicConfig, Statistics, Version};
