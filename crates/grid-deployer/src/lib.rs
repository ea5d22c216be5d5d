//! # grid-deployer
//!
//! Turns "these deployments should exist on these nodes" into chain
//! contracts and node pushes.
//!
//! ```text
//! Deployer::deploy(old contracts, new deployments)
//!   ├── validate ──── proxy node + farm data, contract IP counts
//!   ├── delete ────── batch cancel contracts of dropped nodes
//!   ├── create ────── sign → batch create contracts → push + wait (concurrent)
//!   │                 └── cancel contracts whose deployment failed
//!   ├── update ────── match versions → bump changed workloads → update contract → push + wait
//!   └── revert ────── on failure, reconcile back to the old deployments
//! ```
//!
//! Waiting polls `deployment.changes` with exponential backoff (3s, ×1.25,
//! capped at 40s) and gives up after four minutes without progress.

pub mod deployer;
pub mod error;
pub mod validation;
pub mod versions;
pub mod wait;

pub use deployer::{
    BatchDeployOutcome, BatchSolutionProviders, DeployOutcome, Deployer, SolutionProviders,
};
pub use error::{DeployerError, DeployerResult};
pub use versions::{assign_versions, match_old_versions};
pub use wait::{wait_deployment, WaitPolicy};
