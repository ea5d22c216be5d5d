//! # grid-workloads
//!
//! The user-facing side of the workload model: what a caller describes,
//! and how it becomes (and is rebuilt from) node workloads.
//!
//! ```text
//! ZNet            overlay network ── one `network` workload per node
//! VmDeployment    one node deployment
//!   ├── Disk          zmount
//!   ├── Zdb           zdb
//!   ├── Vm            zmachine + ip + zlogs
//!   └── Qsfs          qsfs
//! K8sCluster      master + workers, each zmachine + zmount (+ ip)
//! GatewayNameProxy / GatewayFqdnProxy   ingress
//! ```
//!
//! Every type validates itself, generates its workloads, and can be
//! reconstructed from a deployment fetched back from a node.

pub mod deployment;
pub mod disk;
pub mod error;
pub mod flist;
pub mod gateway;
pub mod k8s;
pub mod name;
pub mod qsfs;
pub mod vm;
pub mod wireguard;
pub mod zdb;
pub mod zlog;
pub mod znet;

pub use deployment::VmDeployment;
pub use disk::Disk;
pub use error::{WorkloadError, WorkloadsResult};
pub use flist::validate_flist;
pub use gateway::{GatewayFqdnProxy, GatewayNameProxy};
pub use k8s::{K8sCluster, K8sNode};
pub use name::validate_name;
pub use qsfs::{Qsfs, QsfsMetadata};
pub use vm::{assign_host_ip, machine_host_ids, Mount, Vm};
pub use wireguard::{generate_wg_config, WgKey};
pub use zdb::Zdb;
pub use zlog::Zlog;
pub use znet::{endpoint_host, ZNet};
