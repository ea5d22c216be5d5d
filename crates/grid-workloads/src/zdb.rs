//! 0-DB namespaces.

use grid_types::{Workload, WorkloadData, ZdbMode, ZdbResult, GIGABYTE};
use serde::{Deserialize, Serialize};

use crate::error::{ResultExt, WorkloadError, WorkloadsResult};
use crate::name::validate_name;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zdb {
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub public: bool,
    pub size_gb: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: ZdbMode,

    // Computed
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub namespace: String,
}

impl Zdb {
    pub fn from_workload(wl: &Workload) -> WorkloadsResult<Self> {
        let data = wl.zdb()?;
        let result: ZdbResult = if wl.result.data.is_null() {
            ZdbResult::default()
        } else {
            wl.result.unmarshal()?
        };
        Ok(Self {
            name: wl.name.clone(),
            password: data.password.clone(),
            public: data.public,
            size_gb: data.size / GIGABYTE,
            description: wl.description.clone(),
            mode: data.mode,
            ips: result.ips,
            port: result.port,
            namespace: result.namespace,
        })
    }

    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("zdb name is invalid")?;
        if self.size_gb == 0 {
            return Err(WorkloadError::invalid(
                "zdb size should be a positive integer not zero",
            ));
        }
        Ok(())
    }

    pub fn zos_workload(&self) -> Workload {
        Workload::new(
            self.name.clone(),
            WorkloadData::Zdb(grid_types::Zdb {
                size: self.size_gb * GIGABYTE,
                mode: self.mode,
                password: self.password.clone(),
                public: self.public,
            }),
        )
        .with_description(self.description.clone())
    }
}
