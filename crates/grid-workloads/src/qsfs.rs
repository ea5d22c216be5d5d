//! Quantum-safe filesystems backed by zdb groups.

use grid_types::qsfs::{
    Encryption, QuantumCompression, QuantumSafeConfig, QuantumSafeFsConfig, QuantumSafeMeta,
    ZdbBackend, ZdbGroup,
};
use grid_types::{QsfsResult, QuantumSafeFs, Workload, WorkloadData, MEGABYTE};
use serde::{Deserialize, Serialize};

use crate::error::{ResultExt, WorkloadError, WorkloadsResult};
use crate::name::validate_name;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QsfsMetadata {
    #[serde(rename = "type", default)]
    pub meta_type: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub encryption_algorithm: String,
    /// Hex encoded.
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default)]
    pub backends: Vec<ZdbBackend>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qsfs {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Cache size in MB.
    pub cache: u64,
    pub minimal_shards: u32,
    pub expected_shards: u32,
    #[serde(default)]
    pub redundant_groups: u32,
    #[serde(default)]
    pub redundant_nodes: u32,
    #[serde(default)]
    pub max_zdb_data_dir_size: u32,
    #[serde(default)]
    pub encryption_algorithm: String,
    /// Hex encoded.
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default)]
    pub compression_algorithm: String,
    #[serde(default)]
    pub metadata: QsfsMetadata,
    #[serde(default)]
    pub groups: Vec<Vec<ZdbBackend>>,

    // Computed
    #[serde(default)]
    pub metrics_endpoint: String,
}

impl Qsfs {
    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("qsfs name is invalid")?;
        if self.minimal_shards > self.expected_shards {
            return Err(WorkloadError::invalid(
                "minimal shards can't be greater than expected shards",
            ));
        }
        Ok(())
    }

    pub fn from_workload(wl: &Workload) -> WorkloadsResult<Self> {
        let data = wl.qsfs()?;
        let result: QsfsResult = if wl.result.data.is_null() {
            QsfsResult::default()
        } else {
            wl.result.unmarshal()?
        };
        let config = &data.config;
        let meta = &config.meta;
        Ok(Self {
            name: wl.name.clone(),
            description: wl.description.clone(),
            cache: data.cache / MEGABYTE,
            minimal_shards: config.minimal_shards,
            expected_shards: config.expected_shards,
            redundant_groups: config.redundant_groups,
            redundant_nodes: config.redundant_nodes,
            max_zdb_data_dir_size: config.max_zdb_data_dir_size,
            encryption_algorithm: config.encryption.algorithm.clone(),
            encryption_key: hex::encode(&config.encryption.key),
            compression_algorithm: config.compression.algorithm.clone(),
            metadata: QsfsMetadata {
                meta_type: meta.meta_type.clone(),
                prefix: meta.config.prefix.clone(),
                encryption_algorithm: meta.config.encryption.algorithm.clone(),
                encryption_key: hex::encode(&meta.config.encryption.key),
                backends: meta.config.backends.clone(),
            },
            groups: config.groups.iter().map(|g| g.backends.clone()).collect(),
            metrics_endpoint: result.metrics_endpoint,
        })
    }

    pub fn zos_workload(&self) -> WorkloadsResult<Workload> {
        let key = hex::decode(&self.encryption_key)?;
        let meta_key = hex::decode(&self.metadata.encryption_key)?;
        let data = QuantumSafeFs {
            cache: self.cache * MEGABYTE,
            config: QuantumSafeFsConfig {
                minimal_shards: self.minimal_shards,
                expected_shards: self.expected_shards,
                redundant_groups: self.redundant_groups,
                redundant_nodes: self.redundant_nodes,
                max_zdb_data_dir_size: self.max_zdb_data_dir_size,
                encryption: Encryption {
                    algorithm: self.encryption_algorithm.clone(),
                    key,
                },
                meta: QuantumSafeMeta {
                    meta_type: self.metadata.meta_type.clone(),
                    config: QuantumSafeConfig {
                        prefix: self.metadata.prefix.clone(),
                        encryption: Encryption {
                            algorithm: self.metadata.encryption_algorithm.clone(),
                            key: meta_key,
                        },
                        backends: self.metadata.backends.clone(),
                    },
                },
                groups: self
                    .groups
                    .iter()
                    .map(|backends| ZdbGroup { backends: backends.clone() })
                    .collect(),
                compression: QuantumCompression {
                    algorithm: self.compression_algorithm.clone(),
                },
            },
        };
        Ok(Workload::new(self.name.clone(), WorkloadData::Qsfs(data))
            .with_description(self.description.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qsfs() -> Qsfs {
        Qsfs {
            name: "qs".into(),
            cache: 1024,
            minimal_shards: 2,
            expected_shards: 4,
            encryption_algorithm: "AES".into(),
            encryption_key: "4d778ba3216e4da4231540c92a55f06157cabba802f9b68fb0f78375d2e825af".into(),
            compression_algorithm: "snappy".into(),
            metadata: QsfsMetadata {
                meta_type: "zdb".into(),
                prefix: "hamada".into(),
                encryption_algorithm: "AES".into(),
                encryption_key: "4d778ba3216e4da4231540c92a55f06157cabba802f9b68fb0f78375d2e825af".into(),
                backends: vec![ZdbBackend {
                    address: "[::1]:9900".into(),
                    namespace: "ns".into(),
                    password: "pw".into(),
                }],
            },
            groups: vec![vec![ZdbBackend {
                address: "[::2]:9900".into(),
                namespace: "ns2".into(),
                password: "pw".into(),
            }]],
            ..Default::default()
        }
    }

    #[test]
    fn test_qsfs_roundtrip() {
        let q = qsfs();
        let wl = q.zos_workload().unwrap();
        assert_eq!(wl.capacity().sru, 1024 * MEGABYTE);
        assert_eq!(Qsfs::from_workload(&wl).unwrap(), q);
    }

    #[test]
    fn test_shards() {
        let mut q = qsfs();
        q.minimal_shards = 5;
        assert_eq!(
            q.validate().unwrap_err().to_string(),
            "minimal shards can't be greater than expected shards"
        );
    }

    #[test]
    fn test_bad_key() {
        let mut q = qsfs();
        q.encryption_key = "zz".into();
        assert!(matches!(q.zos_workload(), Err(WorkloadError::Hex(_))));
    }
}
