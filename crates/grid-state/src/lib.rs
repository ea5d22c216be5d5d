//! # grid-state
//!
//! What this client knows it deployed, kept for the length of a run.
//!
//! ```text
//! State
//!   ├── node id → contract ids        filled by the facades on success
//!   ├── network → node id → subnet    read by VM / k8s IP allocation
//!   └── load_*_from_grid              fetch from nodes, rebuild user structs
//! ```
//!
//! Nothing is persisted; the chain and the nodes stay the source of truth.

pub mod error;
pub mod loader;
pub mod state;

pub use error::{StateError, StateResult};
pub use state::{NetworkSubnets, State};
