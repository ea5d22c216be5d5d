//! # grid-client
//!
//! The user facing client. [`GridClient`] owns the identity, the chain
//! connection, the node pool, the deployer and the state cache; typed
//! facades turn networks, VM deployments, gateways and k8s clusters into
//! node deployments and back.
//!
//! ```text
//!   GridClient ──► networks()      ──┐
//!              ──► deployments()   ──┤
//!              ──► gateway_names() ──┼──► Deployer ──► Substrate / NodeClient
//!              ──► gateway_fqdns() ──┤        │
//!              ──► k8s()           ──┘        ▼
//!                                           State
//! ```
//!
//! [`plans`] chains facades for the common "network plus machine" case.

pub mod client;
pub mod error;
pub mod gateway;
pub mod k8s;
pub mod network;
pub mod plans;
pub mod vm;

pub use client::{GridClient, MAX_BATCH_CANCEL};
pub use error::{ClientError, ClientResult};
pub use gateway::{GatewayFqdnDeployer, GatewayNameDeployer};
pub use k8s::K8sDeployer;
pub use network::NetworkDeployer;
pub use plans::{K8sPlan, VmPlan};
pub use vm::DeploymentDeployer;
