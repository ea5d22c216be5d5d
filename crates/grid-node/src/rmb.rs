//! Message bus transport seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::NodeResult;

/// Request/response channel to the twin of a node.
///
/// Implementations deliver `cmd` with a JSON `payload` and return the JSON
/// reply. Deadlines are applied by the caller.
#[async_trait]
pub trait RmbClient: Send + Sync {
    async fn call(&self, twin: u32, cmd: &str, payload: Value) -> NodeResult<Value>;
}
