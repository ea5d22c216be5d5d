//! Quantum-safe filesystem workload data.

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::challenge::{Challenge, ChallengeWriter};
use crate::encoding::hex_bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encryption {
    #[serde(default)]
    pub algorithm: String,
    #[serde(with = "hex_bytes", default)]
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZdbBackend {
    pub address: String,
    pub namespace: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumSafeConfig {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub encryption: Encryption,
    #[serde(default)]
    pub backends: Vec<ZdbBackend>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumSafeMeta {
    #[serde(rename = "type", default)]
    pub meta_type: String,
    #[serde(default)]
    pub config: QuantumSafeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZdbGroup {
    #[serde(default)]
    pub backends: Vec<ZdbBackend>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumCompression {
    #[serde(default)]
    pub algorithm: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumSafeFsConfig {
    pub minimal_shards: u32,
    pub expected_shards: u32,
    #[serde(default)]
    pub redundant_groups: u32,
    #[serde(default)]
    pub redundant_nodes: u32,
    #[serde(default)]
    pub max_zdb_data_dir_size: u32,
    #[serde(default)]
    pub encryption: Encryption,
    #[serde(default)]
    pub meta: QuantumSafeMeta,
    #[serde(default)]
    pub groups: Vec<ZdbGroup>,
    #[serde(default)]
    pub compression: QuantumCompression,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumSafeFs {
    /// Local cache size in bytes.
    pub cache: u64,
    pub config: QuantumSafeFsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QsfsResult {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub metrics_endpoint: String,
}

impl QuantumSafeFs {
    pub fn capacity(&self) -> Capacity {
        Capacity { sru: self.cache, ..Default::default() }
    }
}

impl Challenge for ZdbBackend {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.address).write(&self.namespace).write(&self.password);
    }
}

impl Challenge for Encryption {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.algorithm).write(hex::encode(&self.key));
    }
}

impl Challenge for QuantumSafeFs {
    fn challenge(&self, w: &mut ChallengeWriter) {
        let c = &self.config;
        w.write(self.cache)
            .write(c.minimal_shards)
            .write(c.expected_shards)
            .write(c.redundant_groups)
            .write(c.redundant_nodes)
            .write(c.max_zdb_data_dir_size);
        c.encryption.challenge(w);
        w.write(&c.meta.meta_type).write(&c.meta.config.prefix);
        c.meta.config.encryption.challenge(w);
        c.meta.config.backends.challenge(w);
        for group in &c.groups {
            group.backends.challenge(w);
        }
        w.write(&c.compression.algorithm);
    }
}
