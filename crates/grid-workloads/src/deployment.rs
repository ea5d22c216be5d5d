//! A bundle of disks, zdbs, qsfs and VMs living in one node deployment.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use grid_types::metadata::KIND_VM;
use grid_types::{Deployment, DeploymentData, Workload, WorkloadType};
use serde::{Deserialize, Serialize};

use crate::disk::Disk;
use crate::error::{ResultExt, WorkloadsResult};
use crate::name::validate_name;
use crate::qsfs::Qsfs;
use crate::vm::Vm;
use crate::zdb::Zdb;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDeployment {
    pub name: String,
    pub node_id: u32,
    #[serde(default)]
    pub solution_type: String,
    #[serde(default)]
    pub solution_provider: Option<u64>,
    pub network_name: String,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub zdbs: Vec<Zdb>,
    #[serde(default)]
    pub vms: Vec<Vm>,
    #[serde(default)]
    pub qsfs: Vec<Qsfs>,

    // Computed
    #[serde(default)]
    pub node_deployment_id: HashMap<u32, u64>,
    #[serde(default)]
    pub contract_id: u64,
    #[serde(default)]
    pub ip_range: String,
}

impl VmDeployment {
    pub fn new(name: impl Into<String>, node_id: u32, network_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id,
            network_name: network_name.into(),
            ..Default::default()
        }
    }

    pub fn with_vm(mut self, vm: Vm) -> Self {
        self.vms.push(vm);
        self
    }

    pub fn with_disk(mut self, disk: Disk) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_zdb(mut self, zdb: Zdb) -> Self {
        self.zdbs.push(zdb);
        self
    }

    pub fn with_qsfs(mut self, qsfs: Qsfs) -> Self {
        self.qsfs.push(qsfs);
        self
    }

    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("deployment name is invalid")?;
        for disk in &self.disks {
            disk.validate()?;
        }
        for zdb in &self.zdbs {
            zdb.validate()?;
        }
        for qsfs in &self.qsfs {
            qsfs.validate()?;
        }
        for vm in &self.vms {
            vm.validate().context(format!("vm '{}' is invalid", vm.name))?;
        }
        Ok(())
    }

    /// Project defaults to `vm/<name>`.
    pub fn generate_metadata(&mut self) -> WorkloadsResult<String> {
        if self.solution_type.is_empty() {
            self.solution_type = format!("vm/{}", self.name);
        }
        Ok(DeploymentData::new(KIND_VM, &self.name, &self.solution_type).to_json()?)
    }

    /// Workloads in order: disks, zdbs, vms (with their ips and logs), qsfs.
    pub fn zos_workloads(&self) -> WorkloadsResult<Vec<Workload>> {
        let mut workloads: Vec<Workload> = Vec::new();
        workloads.extend(self.disks.iter().map(Disk::zos_workload));
        workloads.extend(self.zdbs.iter().map(Zdb::zos_workload));
        for vm in &self.vms {
            workloads.extend(vm.zos_workloads());
        }
        for qsfs in &self.qsfs {
            workloads.push(qsfs.zos_workload()?);
        }
        Ok(workloads)
    }

    /// The node deployment for `twin_id`, metadata included.
    pub fn zos_deployment(&mut self, twin_id: u32) -> WorkloadsResult<Deployment> {
        let workloads = self.zos_workloads()?;
        let mut dl = Deployment::new_grid_deployment(twin_id, workloads);
        dl.metadata = self.generate_metadata()?;
        dl.contract_id = self.contract_id;
        Ok(dl)
    }

    /// Host ids already taken by machines with a set IP.
    pub fn used_host_ids(&self) -> Vec<u8> {
        self.vms
            .iter()
            .filter_map(|vm| vm.ip.parse::<Ipv4Addr>().ok())
            .map(|ip| ip.octets()[3])
            .collect()
    }

    /// Reorder items as they appear in `other`, so a deployment reloaded
    /// from the grid compares equal to what was submitted.
    pub fn match_order(&mut self, other: &VmDeployment) {
        fn rank<T>(items: &[T], key: impl Fn(&T) -> bool) -> usize {
            items.iter().position(key).unwrap_or(usize::MAX)
        }
        self.disks.sort_by_key(|d| rank(&other.disks, |o| o.name == d.name));
        self.zdbs.sort_by_key(|z| rank(&other.zdbs, |o| o.name == z.name));
        self.qsfs.sort_by_key(|q| rank(&other.qsfs, |o| o.name == q.name));
        self.vms.sort_by_key(|v| rank(&other.vms, |o| o.name == v.name));
        for vm in &mut self.vms {
            if let Some(theirs) = other.vms.iter().find(|o| o.name == vm.name) {
                vm.load_from_vm(theirs);
            }
        }
    }

    /// Forget everything the grid assigned. Used after cancel.
    pub fn nullify(&mut self) {
        self.node_deployment_id.clear();
        self.contract_id = 0;
        self.ip_range.clear();
        for vm in &mut self.vms {
            vm.computed_ip.clear();
            vm.computed_ip6.clear();
            vm.planetary_ip.clear();
            vm.mycelium_ip.clear();
            vm.console_url.clear();
        }
        for zdb in &mut self.zdbs {
            zdb.ips.clear();
            zdb.port = 0;
            zdb.namespace.clear();
        }
        for qsfs in &mut self.qsfs {
            qsfs.metrics_endpoint.clear();
        }
    }

    /// Rebuild from a node deployment. Zmounts attached to no machine
    /// mount are still returned as disks.
    pub fn from_zos_deployment(dl: &Deployment, node_id: u32) -> WorkloadsResult<Self> {
        let meta = DeploymentData::parse(&dl.metadata).unwrap_or_default();
        let mut out = VmDeployment {
            name: meta.name,
            node_id,
            solution_type: meta.project_name,
            contract_id: dl.contract_id,
            node_deployment_id: HashMap::from([(node_id, dl.contract_id)]),
            ..Default::default()
        };

        for wl in &dl.workloads {
            match wl.workload_type() {
                WorkloadType::ZMount => out.disks.push(Disk::from_workload(wl)?),
                WorkloadType::Zdb => out.zdbs.push(Zdb::from_workload(wl)?),
                WorkloadType::Qsfs => out.qsfs.push(Qsfs::from_workload(wl)?),
                WorkloadType::ZMachine => {
                    let vm = Vm::from_workload(wl, dl, node_id)
                        .context(format!("failed to load vm '{}'", wl.name))?;
                    if out.network_name.is_empty() {
                        out.network_name = vm.network_name.clone();
                    }
                    out.vms.push(vm);
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Mount;
    use grid_types::{WorkloadResult, ZdbMode};
    use serde_json::json;

    fn bundle() -> VmDeployment {
        let vm = Vm {
            name: "vm1".into(),
            node_id: 11,
            network_name: "net".into(),
            flist: "https://hub.grid.tf/tf-official-apps/base:latest.flist".into(),
            cpu: 2,
            memory_mb: 1024,
            ip: "10.1.2.5".into(),
            mounts: vec![Mount { name: "data".into(), mount_point: "/data".into() }],
            ..Default::default()
        };
        VmDeployment::new("web", 11, "net")
            .with_disk(Disk::new("data", 5))
            .with_zdb(Zdb {
                name: "zdb1".into(),
                password: "pass".into(),
                size_gb: 1,
                mode: ZdbMode::User,
                ..Default::default()
            })
            .with_vm(vm)
    }

    #[test]
    fn test_validate_wraps_vm_errors() {
        let mut dl = bundle();
        dl.vms[0].cpu = 0;
        let err = dl.validate().unwrap_err().to_string();
        assert!(err.starts_with("vm 'vm1' is invalid"), "{err}");
    }

    #[test]
    fn test_workload_order_and_metadata() {
        let mut bundle = bundle();
        let dl = bundle.zos_deployment(7).unwrap();
        let names: Vec<&str> = dl.workloads.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["data", "zdb1", "vm1"]);
        assert_eq!(bundle.solution_type, "vm/web");
        let meta = DeploymentData::parse(&dl.metadata).unwrap();
        assert_eq!(meta.kind, "vm");
        assert_eq!(meta.name, "web");
        assert_eq!(bundle.used_host_ids(), vec![5]);
    }

    #[test]
    fn test_reload_and_match_order() {
        let mut original = bundle();
        original.disks.push(Disk::new("logs", 1));
        let mut dl = original.zos_deployment(7).unwrap();
        dl.contract_id = 99;
        for wl in &mut dl.workloads {
            if wl.name == "vm1" {
                wl.result = WorkloadResult::ok(json!({"id": "x", "ip": "10.1.2.5", "console_url": "10.1.2.1:20005"}));
            }
        }
        // node returns workloads in its own order
        dl.workloads.reverse();

        let mut back = VmDeployment::from_zos_deployment(&dl, 11).unwrap();
        assert_eq!(back.name, "web");
        assert_eq!(back.network_name, "net");
        assert_eq!(back.contract_id, 99);
        assert_eq!(back.vms[0].console_url, "10.1.2.1:20005");
        assert_eq!(back.disks[0].name, "logs");

        back.match_order(&original);
        assert_eq!(back.disks[0].name, "data");
        assert_eq!(back.disks[1].name, "logs");

        back.nullify();
        assert_eq!(back.contract_id, 0);
        assert!(back.vms[0].console_url.is_empty());
    }
}
