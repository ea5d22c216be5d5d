//! Private overlay network workload data.
//!
//! One `network` workload per participating node; together they describe a
//! WireGuard mesh over a `/16` range where each node owns one `/24`.

use serde::{Deserialize, Serialize};

use crate::challenge::{Challenge, ChallengeWriter};
use crate::encoding::hex_bytes;
use crate::ipnet::IpNet;

/// Length of a network's mycelium key.
pub const MYCELIUM_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub ip_range: IpNet,
    pub subnet: IpNet,
    pub wireguard_private_key: String,
    pub wireguard_listen_port: u16,
    #[serde(default)]
    pub peers: Vec<Peer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mycelium: Option<Mycelium>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub subnet: IpNet,
    pub wireguard_public_key: String,
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    /// `host:port`; empty for peers that cannot be dialed (external users).
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mycelium {
    #[serde(with = "hex_bytes")]
    pub hex_key: Vec<u8>,
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Mycelium-only network used by light machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLight {
    pub subnet: IpNet,
    pub mycelium: Mycelium,
}

impl Challenge for Network {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.ip_range)
            .write(self.subnet)
            .write(&self.wireguard_private_key)
            .write(self.wireguard_listen_port);
        self.peers.challenge(w);
        self.mycelium.challenge(w);
    }
}

impl Challenge for Peer {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.subnet).write(&self.wireguard_public_key);
        for ip in &self.allowed_ips {
            w.write(ip);
        }
        w.write(&self.endpoint);
    }
}

impl Challenge for Mycelium {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(hex::encode(&self.hex_key));
        for peer in &self.peers {
            w.write(peer);
        }
    }
}

impl Challenge for NetworkLight {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.subnet);
        self.mycelium.challenge(w);
    }
}
