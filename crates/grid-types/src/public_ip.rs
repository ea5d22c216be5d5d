//! Public IP workload data.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::challenge::{Challenge, ChallengeWriter};
use crate::ipnet::{self, IpNet};

/// Reserves a public IPv4 from the farm and/or a public IPv6 for a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIp {
    #[serde(default)]
    pub v4: bool,
    #[serde(default)]
    pub v6: bool,
}

/// Legacy IPv4-only reservation (`ipv4` type).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpv4 {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpResult {
    #[serde(with = "ipnet::optional", default)]
    pub ip: Option<IpNet>,
    #[serde(rename = "ip6", with = "ipnet::optional", default)]
    pub ipv6: Option<IpNet>,
    #[serde(default)]
    pub gateway: Option<IpAddr>,
}

impl PublicIp {
    pub fn capacity(&self) -> Capacity {
        Capacity { ipv4u: u64::from(self.v4), ..Default::default() }
    }
}

impl Challenge for PublicIp {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.v4).write(self.v6);
    }
}

impl Challenge for PublicIpv4 {
    fn challenge(&self, _w: &mut ChallengeWriter) {}
}
