//! Virtual machines: a `zmachine` workload plus its public IP and log
//! streams.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use grid_types::{
    Deployment, IpNet, MachineCapacity, MachineInterface, MachineMount, MachineNetwork,
    MyceliumIp, PublicIp, PublicIpResult, Workload, WorkloadData, ZMachine, ZMachineResult,
    GIGABYTE, MEGABYTE, MYCELIUM_IP_SEED_LEN,
};
use serde::{Deserialize, Serialize};

use crate::error::{ResultExt, WorkloadError, WorkloadsResult};
use crate::flist::validate_flist_extension;
use crate::name::validate_name;
use crate::zlog::{zlogs_of, Zlog};

pub const MIN_MEMORY_MB: u64 = 250;
pub const MAX_CPU: u8 = 32;

/// First host id handed out inside a node subnet.
pub const FIRST_HOST_ID: u8 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub name: String,
    pub mount_point: String,
}

impl Mount {
    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("mount name is invalid")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    pub node_id: u32,
    pub network_name: String,
    #[serde(default)]
    pub description: String,
    pub flist: String,
    #[serde(default)]
    pub flist_checksum: String,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub public_ip: bool,
    #[serde(default)]
    pub public_ip6: bool,
    #[serde(default)]
    pub planetary: bool,
    #[serde(default)]
    pub corex: bool,
    /// Private overlay IP; assigned on deploy when empty.
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mycelium_ip_seed: Vec<u8>,
    #[serde(default)]
    pub gpus: Vec<String>,
    pub cpu: u8,
    pub memory_mb: u64,
    #[serde(default)]
    pub rootfs_size_mb: u64,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub zlogs: Vec<Zlog>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,

    // Computed
    #[serde(default)]
    pub computed_ip: String,
    #[serde(default)]
    pub computed_ip6: String,
    #[serde(default)]
    pub planetary_ip: String,
    #[serde(default)]
    pub mycelium_ip: String,
    #[serde(default)]
    pub console_url: String,
}

/// `ip` workload reserving a public IPv4 and/or IPv6.
pub fn public_ip_workload(name: impl Into<String>, v4: bool, v6: bool) -> Workload {
    Workload::new(name, WorkloadData::PublicIp(PublicIp { v4, v6 }))
}

/// Read the public IP reservation `name` from a deployment. Returns the
/// requested flags and whatever the node reported.
pub(crate) fn public_ip_of(dl: &Deployment, name: &str) -> WorkloadsResult<(PublicIp, PublicIpResult)> {
    if name.is_empty() {
        return Ok((PublicIp::default(), PublicIpResult::default()));
    }
    let wl = dl.get(name)?;
    let flags = wl.public_ip()?.clone();
    let result = if wl.result.state.is_okay() && !wl.result.data.is_null() {
        wl.result.unmarshal()?
    } else {
        PublicIpResult::default()
    };
    Ok((flags, result))
}

pub(crate) fn machine_result(wl: &Workload) -> WorkloadsResult<ZMachineResult> {
    if wl.result.data.is_null() {
        return Ok(ZMachineResult::default());
    }
    Ok(wl.result.unmarshal()?)
}

impl Vm {
    /// Name of the public IP workload generated for this machine.
    pub fn public_ip_name(&self) -> String {
        format!("{}ip", self.name)
    }

    /// Smallest accepted non-zero rootfs, in bytes.
    pub fn min_root_size(&self) -> u64 {
        let sru = u64::from(self.cpu) * self.memory_mb * MEGABYTE / (8 * GIGABYTE);
        if sru == 0 {
            500 * MEGABYTE
        } else {
            2 * GIGABYTE
        }
    }

    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.name).context("vm name is invalid")?;
        validate_name(&self.network_name).context("network name is invalid")?;
        if self.node_id == 0 {
            return Err(WorkloadError::invalid(
                "node ID should be a positive integer not zero",
            ));
        }
        if !self.ip.is_empty() && self.ip.parse::<Ipv4Addr>().is_err() {
            return Err(WorkloadError::invalid(format!("invalid ip '{}'", self.ip)));
        }
        validate_flist_extension(&self.flist)?;
        if self.cpu == 0 || self.cpu > MAX_CPU {
            return Err(WorkloadError::invalid(
                "CPUs must be more than or equal to 1 and less than or equal to 32",
            ));
        }
        if self.memory_mb < MIN_MEMORY_MB {
            return Err(WorkloadError::invalid("memory capacity can't be less that 250 MB"));
        }
        let min_root = self.min_root_size();
        if self.rootfs_size_mb != 0 && self.rootfs_size_mb * MEGABYTE < min_root {
            return Err(WorkloadError::invalid(format!(
                "rootfs size can't be less than {}. Set to 0 for minimum",
                min_root / MEGABYTE
            )));
        }
        for gpu in &self.gpus {
            validate_gpu(gpu).context("failed to validate GPUs")?;
        }
        validate_mycelium_seed(&self.mycelium_ip_seed)?;
        for zlog in &self.zlogs {
            zlog.validate()?;
        }
        for mount in &self.mounts {
            mount.validate()?;
        }
        Ok(())
    }

    /// Public IP, log and machine workloads, in that order.
    pub fn zos_workloads(&self) -> Vec<Workload> {
        let mut workloads = Vec::new();
        let mut public_ip = String::new();
        if self.public_ip || self.public_ip6 {
            public_ip = self.public_ip_name();
            workloads.push(public_ip_workload(public_ip.clone(), self.public_ip, self.public_ip6));
        }
        workloads.extend(self.zlogs.iter().map(Zlog::zos_workload));

        let mycelium = (!self.mycelium_ip_seed.is_empty()).then(|| MyceliumIp {
            network: self.network_name.clone(),
            hex_seed: self.mycelium_ip_seed.clone(),
        });
        let interfaces = self
            .ip
            .parse::<IpAddr>()
            .map(|ip| {
                vec![MachineInterface {
                    network: self.network_name.clone(),
                    ip,
                }]
            })
            .unwrap_or_default();

        let machine = ZMachine {
            flist: self.flist.clone(),
            network: MachineNetwork {
                public_ip,
                planetary: self.planetary,
                mycelium,
                interfaces,
            },
            size: self.rootfs_size_mb * MEGABYTE,
            compute_capacity: MachineCapacity {
                cpu: self.cpu,
                memory: self.memory_mb * MEGABYTE,
            },
            mounts: self
                .mounts
                .iter()
                .map(|m| MachineMount {
                    name: m.name.clone(),
                    mountpoint: m.mount_point.clone(),
                })
                .collect(),
            entrypoint: self.entrypoint.clone(),
            env: self.env_vars.clone(),
            corex: self.corex,
            gpu: self.gpus.clone(),
        };
        workloads.push(
            Workload::new(self.name.clone(), WorkloadData::ZMachine(machine))
                .with_description(self.description.clone()),
        );
        workloads
    }

    /// Rebuild a machine from its `zmachine` workload inside `dl`.
    pub fn from_workload(wl: &Workload, dl: &Deployment, node_id: u32) -> WorkloadsResult<Self> {
        let data = wl.zmachine()?;
        let result = machine_result(wl).context("failed to get vm result")?;
        let (flags, public) = public_ip_of(dl, &data.network.public_ip)
            .context("failed to get public ip workload")?;
        let interface = data.network.interfaces.first();

        Ok(Self {
            name: wl.name.clone(),
            node_id,
            network_name: interface.map(|i| i.network.clone()).unwrap_or_default(),
            description: wl.description.clone(),
            flist: data.flist.clone(),
            flist_checksum: String::new(),
            entrypoint: data.entrypoint.clone(),
            public_ip: flags.v4,
            public_ip6: flags.v6,
            planetary: data.network.planetary,
            corex: data.corex,
            ip: interface.map(|i| i.ip.to_string()).unwrap_or_default(),
            mycelium_ip_seed: data
                .network
                .mycelium
                .as_ref()
                .map(|m| m.hex_seed.clone())
                .unwrap_or_default(),
            gpus: data.gpu.clone(),
            cpu: data.compute_capacity.cpu,
            memory_mb: data.compute_capacity.memory / MEGABYTE,
            rootfs_size_mb: data.size / MEGABYTE,
            mounts: data
                .mounts
                .iter()
                .map(|m| Mount {
                    name: m.name.clone(),
                    mount_point: m.mountpoint.clone(),
                })
                .collect(),
            zlogs: zlogs_of(dl, &wl.name),
            env_vars: data.env.clone(),
            computed_ip: public.ip.map(|ip| ip.to_string()).unwrap_or_default(),
            computed_ip6: public.ipv6.map(|ip| ip.to_string()).unwrap_or_default(),
            planetary_ip: result.planetary_ip,
            mycelium_ip: result.mycelium_ip,
            console_url: result.console_url,
        })
    }

    /// Order zlogs and mounts like `other` and keep its checksum, so a
    /// reloaded machine compares equal to what the user submitted.
    pub fn load_from_vm(&mut self, other: &Vm) {
        let rank = |key: &str| -> usize {
            other
                .zlogs
                .iter()
                .position(|z| z.output == key)
                .or_else(|| other.mounts.iter().position(|m| m.name == key))
                .unwrap_or(usize::MAX)
        };
        self.zlogs.sort_by_key(|z| rank(&z.output));
        self.mounts.sort_by_key(|m| rank(&m.name));
        self.flist_checksum = other.flist_checksum.clone();
    }

    /// Pick this machine's private IP inside `subnet`. See
    /// [`assign_host_ip`].
    pub fn assign_private_ip(
        &self,
        subnet: &IpNet,
        used: &mut Vec<u8>,
        start: u8,
    ) -> WorkloadsResult<Ipv4Addr> {
        assign_host_ip(&self.name, &self.ip, subnet, used, start)
    }
}

/// Pick a private IP for machine `name` inside a node `subnet`.
///
/// `used` holds the host ids taken by other machines on the node; the
/// caller leaves out the ids its own previous machines held, so an
/// update may keep them. A requested IP must lie inside the subnet and
/// its host id must be free. Without a request the lowest free host id
/// from `start` is used. The chosen host id is appended to `used`.
pub fn assign_host_ip(
    name: &str,
    requested: &str,
    subnet: &IpNet,
    used: &mut Vec<u8>,
    start: u8,
) -> WorkloadsResult<Ipv4Addr> {
    if !requested.is_empty() {
        let ip: Ipv4Addr = requested
            .parse()
            .map_err(|_| WorkloadError::invalid(format!("invalid ip '{requested}'")))?;
        if !subnet.contains(&IpAddr::V4(ip)) {
            return Err(WorkloadError::IpOutOfRange {
                range: subnet.to_string(),
                ip: ip.to_string(),
                vm: name.to_string(),
            });
        }
        let host = ip.octets()[3];
        if used.contains(&host) {
            return Err(WorkloadError::IpTaken {
                ip: ip.to_string(),
                vm: name.to_string(),
            });
        }
        used.push(host);
        return Ok(ip);
    }

    let mut host = start;
    while used.contains(&host) {
        if host >= 254 {
            return Err(WorkloadError::IpsExhausted);
        }
        host += 1;
    }
    used.push(host);
    let [a, b, c, _] = subnet.octets().ok_or_else(|| {
        WorkloadError::invalid(format!("subnet '{subnet}' is not an ipv4 network"))
    })?;
    Ok(Ipv4Addr::new(a, b, c, host))
}

/// Host ids the machines of `dl` hold on `network`.
pub fn machine_host_ids(dl: &Deployment, network: &str) -> Vec<u8> {
    dl.workloads
        .iter()
        .filter_map(|wl| wl.zmachine().ok())
        .flat_map(|vm| vm.network.interfaces.iter())
        .filter(|iface| iface.network == network)
        .filter_map(|iface| match iface.ip {
            IpAddr::V4(ip) => Some(ip.octets()[3]),
            IpAddr::V6(_) => None,
        })
        .collect()
}

/// GPU ids read `slot/vendor/device`.
pub fn validate_gpu(id: &str) -> WorkloadsResult<()> {
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(WorkloadError::invalid(format!(
            "invalid gpu id format '{id}', expected slot/vendor/device"
        )));
    }
    Ok(())
}

pub(crate) fn validate_mycelium_seed(seed: &[u8]) -> WorkloadsResult<()> {
    if !seed.is_empty() && seed.len() != MYCELIUM_IP_SEED_LEN {
        return Err(WorkloadError::invalid(format!(
            "invalid mycelium ip seed length {} must be {MYCELIUM_IP_SEED_LEN} or empty",
            seed.len()
        )));
    }
    Ok(())
}
