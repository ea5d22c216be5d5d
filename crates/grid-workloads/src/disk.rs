//! Disks: `zmount` workloads sized in GB.

use grid_types::{Workload, WorkloadData, ZMount, GIGABYTE};
use serde::{Deserialize, Serialize};

use crate::error::{ResultExt, WorkloadsResult};
use crate::name::validate_name;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub size_gb: u64,
    #[serde(default)]
    pub description: String,
}

impl Disk {
    pub fn new(name: impl Into<String>, size_gb: u64) -> Self {
        Self {
            name: name.into(),
            size_gb,
            description: String::new(),
        }
    }

    pub fn from_workload(wl: &Workload) -> WorkloadsResult<Self> {
        let data = wl.zmount()?;
        Ok(Self {
            name: wl.name.clone(),
            size_gb: data.size / GIGABYTE,
            description: wl.description.clone(),
        })
    }

    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("disk name is invalid")
    }

    pub fn zos_workload(&self) -> Workload {
        Workload::new(
            self.name.clone(),
            WorkloadData::ZMount(ZMount {
                size: self.size_gb * GIGABYTE,
            }),
        )
        .with_description(self.description.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_workload() {
        let disk = Disk::new("data", 10);
        let wl = disk.zos_workload();
        assert_eq!(wl.zmount().unwrap().size, 10 * GIGABYTE);
        assert_eq!(wl.capacity().sru, 10 * GIGABYTE);
        assert_eq!(Disk::from_workload(&wl).unwrap(), disk);
    }

    #[test]
    fn test_invalid_name() {
        let err = Disk::new("bad name", 1).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "disk name is invalid: unsupported character in workload name"
        );
    }
}
