//! JSON metadata embedded in deployments and network workloads.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{TypesError, TypesResult};

/// Current metadata format version.
pub const METADATA_VERSION: u32 = 3;

pub const KIND_VM: &str = "vm";
pub const KIND_K8S: &str = "kubernetes";
pub const KIND_GATEWAY_NAME: &str = "Gateway Name";
pub const KIND_GATEWAY_FQDN: &str = "Gateway Fqdn";
pub const KIND_NETWORK: &str = "network";
pub const KIND_ZDB: &str = "ZDB";
pub const KIND_QSFS: &str = "QSFS";

/// Deployment-level metadata: what the deployment is and which project
/// it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentData {
    #[serde(default)]
    pub version: u32,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "projectName", default)]
    pub project_name: String,
}

impl DeploymentData {
    pub fn new(kind: &str, name: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            version: METADATA_VERSION,
            kind: kind.to_string(),
            name: name.into(),
            project_name: project_name.into(),
        }
    }

    pub fn to_json(&self) -> TypesResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(metadata: &str) -> TypesResult<Self> {
        serde_json::from_str(metadata)
            .map_err(|e| TypesError::InvalidMetadata(format!("'{metadata}': {e}")))
    }
}

/// External WireGuard access attached to a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccess {
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub node_id: u32,
}

/// Metadata stored on every network workload so the overlay can be
/// rebuilt from any member node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkMetaData {
    pub version: u32,
    pub user_accesses: Vec<UserAccess>,
}

impl<'de> Deserialize<'de> for NetworkMetaData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            version: u32,
            #[serde(default)]
            user_accesses: Vec<UserAccess>,
            // Pre-v3 single access layout.
            #[serde(default)]
            ip: String,
            #[serde(default)]
            priv_key: String,
            #[serde(default)]
            node_id: u32,
        }

        let raw = Raw::deserialize(deserializer)?;
        let mut user_accesses = raw.user_accesses;
        if !raw.ip.is_empty() || !raw.priv_key.is_empty() || raw.node_id != 0 {
            user_accesses = vec![UserAccess {
                subnet: raw.ip,
                private_key: raw.priv_key,
                node_id: raw.node_id,
            }];
        }
        Ok(NetworkMetaData { version: raw.version, user_accesses })
    }
}

impl NetworkMetaData {
    pub fn to_json(&self) -> TypesResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse workload metadata; an empty string yields empty metadata.
    pub fn parse(metadata: &str) -> TypesResult<Self> {
        if metadata.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(metadata)
            .map_err(|e| TypesError::InvalidMetadata(format!("network metadata: {e}")))
    }

    pub fn first_access(&self) -> Option<&UserAccess> {
        self.user_accesses.first()
    }
}
