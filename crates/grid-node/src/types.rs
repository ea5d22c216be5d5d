//! Reply types of the node RPC surface.

use std::net::IpAddr;

use grid_types::ipnet::{self, IpNet};
use grid_types::Capacity;
use serde::{Deserialize, Serialize};

/// Interface of the node connected to the public internet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicConfig {
    #[serde(rename = "type", default)]
    pub iface_type: String,
    #[serde(with = "ipnet::optional", default)]
    pub ipv4: Option<IpNet>,
    #[serde(with = "ipnet::optional", default)]
    pub ipv6: Option<IpNet>,
    #[serde(default)]
    pub gw4: Option<IpAddr>,
    #[serde(default)]
    pub gw6: Option<IpAddr>,
    /// Gateway domain, e.g. `gent01.dev.grid.tf`.
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Ssd,
    Hdd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub size: u64,
    pub used: u64,
}

impl PoolMetrics {
    pub fn free(&self) -> u64 {
        self.size.saturating_sub(self.used)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub zos: String,
    #[serde(default)]
    pub zinit: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatistics {
    #[serde(default)]
    pub deployments: u64,
    #[serde(default)]
    pub workloads: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: Capacity,
    pub used: Capacity,
    #[serde(default)]
    pub system: Capacity,
    #[serde(default)]
    pub users: UserStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gpu {
    pub id: String,
    pub vendor: String,
    pub device: String,
    #[serde(default)]
    pub contract: u64,
}
