//! # grid-types
//!
//! The node-side data model: what a node accepts, how it is hashed, and
//! how it is signed.
//!
//! ```text
//! Deployment (version, twin, contract, metadata, signatures)
//!   └── Workload[] (name, version, type+data, result)
//!         ├── zmount / volume / zdb / qsfs   storage
//!         ├── zmachine / zmachine-light      compute
//!         ├── ip / ipv4                      public addresses
//!         ├── network / network-light        overlay membership
//!         ├── gateway-name-proxy / -fqdn     ingress
//!         └── zlogs                          log streaming
//! ```
//!
//! A deployment's challenge hash is the MD5 of its canonical serialization.
//! Workload names and results never enter the hash.

pub mod capacity;
pub mod challenge;
pub mod deployment;
pub mod encoding;
pub mod error;
pub mod gateway;
pub mod ipnet;
pub mod machine;
pub mod metadata;
pub mod network;
pub mod public_ip;
pub mod qsfs;
pub mod workload;
pub mod zdb;
pub mod zlogs;
pub mod zmount;

pub use capacity::{Capacity, GIGABYTE, MEGABYTE};
pub use challenge::{Challenge, ChallengeWriter};
pub use deployment::{
    same_workload_names, Deployment, Signature, SignatureRequest, SignatureRequirement,
};
pub use error::{TypesError, TypesResult};
pub use gateway::{Backend, GatewayFqdnProxy, GatewayNameProxy, GatewayProxyResult};
pub use ipnet::{is_public_ip, IpNet};
pub use machine::{
    MachineCapacity, MachineInterface, MachineMount, MachineNetwork, MyceliumIp, ZMachine,
    ZMachineResult, MYCELIUM_IP_SEED_LEN,
};
pub use metadata::{DeploymentData, NetworkMetaData, UserAccess};
pub use network::{Mycelium, Network, NetworkLight, Peer, MYCELIUM_KEY_LEN};
pub use public_ip::{PublicIp, PublicIpResult, PublicIpv4};
pub use qsfs::{QsfsResult, QuantumSafeFs};
pub use workload::{ResultState, Workload, WorkloadData, WorkloadResult, WorkloadType};
pub use zdb::{Zdb, ZdbMode, ZdbResult};
pub use zlogs::ZLogs;
pub use zmount::{Volume, ZMount};
