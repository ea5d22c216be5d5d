//! Virtual machine (`zmachine` / `zmachine-light`) workload data.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::capacity::Capacity;
use crate::challenge::{Challenge, ChallengeWriter};
use crate::encoding::hex_bytes;

/// Length of the seed a machine's mycelium address is derived from.
pub const MYCELIUM_IP_SEED_LEN: usize = 6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMachine {
    pub flist: String,
    pub network: MachineNetwork,
    /// Root filesystem size in bytes.
    #[serde(default)]
    pub size: u64,
    pub compute_capacity: MachineCapacity,
    #[serde(default)]
    pub mounts: Vec<MachineMount>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub corex: bool,
    /// GPU ids in `slot/vendor/device` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpu: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineNetwork {
    /// Name of a public ip workload in the same deployment, if any.
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub planetary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mycelium: Option<MyceliumIp>,
    #[serde(default)]
    pub interfaces: Vec<MachineInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyceliumIp {
    pub network: String,
    #[serde(with = "hex_bytes")]
    pub hex_seed: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInterface {
    pub network: String,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineMount {
    pub name: String,
    #[serde(default)]
    pub mountpoint: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineCapacity {
    pub cpu: u8,
    /// Memory in bytes.
    pub memory: u64,
}

/// Addresses reported by the node once the machine is up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ZMachineResult {
    pub id: String,
    pub ip: String,
    pub planetary_ip: String,
    pub mycelium_ip: String,
    pub console_url: String,
}

impl<'de> Deserialize<'de> for ZMachineResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older nodes report the planetary address as `ygg_ip`.
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            id: String,
            #[serde(default)]
            ip: String,
            #[serde(default)]
            ygg_ip: String,
            #[serde(default)]
            planetary_ip: String,
            #[serde(default)]
            mycelium_ip: String,
            #[serde(default)]
            console_url: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(ZMachineResult {
            id: raw.id,
            ip: raw.ip,
            planetary_ip: if raw.ygg_ip.is_empty() { raw.planetary_ip } else { raw.ygg_ip },
            mycelium_ip: raw.mycelium_ip,
            console_url: raw.console_url,
        })
    }
}

impl ZMachine {
    pub fn capacity(&self) -> Capacity {
        Capacity {
            cru: u64::from(self.compute_capacity.cpu),
            mru: self.compute_capacity.memory,
            sru: self.size,
            ..Default::default()
        }
    }
}

impl Challenge for ZMachine {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.flist);
        self.network.challenge(w);
        w.write(self.size)
            .write(self.compute_capacity.cpu)
            .write(self.compute_capacity.memory);
        for mount in &self.mounts {
            w.write(&mount.name).write(&mount.mountpoint);
        }
        w.write(&self.entrypoint);
        for (k, v) in &self.env {
            w.write(k).write("=").write(v);
        }
        w.write(self.corex);
        for gpu in &self.gpu {
            w.write(gpu);
        }
    }
}

impl Challenge for MachineNetwork {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.public_ip).write(self.planetary);
        if let Some(mycelium) = &self.mycelium {
            w.write(&mycelium.network).write(hex::encode(&mycelium.hex_seed));
        }
        for iface in &self.interfaces {
            w.write(&iface.network).write(iface.ip);
        }
    }
}
