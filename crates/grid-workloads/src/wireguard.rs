//! WireGuard keys and the user access config.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use grid_types::IpNet;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::WorkloadError;

pub const KEY_LEN: usize = 32;

/// A WireGuard private key, base64 on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WgKey([u8; KEY_LEN]);

impl WgKey {
    /// Fresh clamped curve25519 private key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;
        WgKey(bytes)
    }

    pub fn parse(s: &str) -> Result<Self, WorkloadError> {
        let raw = STANDARD
            .decode(s.trim())
            .map_err(|e| WorkloadError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|v: Vec<u8>| WorkloadError::InvalidKey(format!("key length {} must be {KEY_LEN}", v.len())))?;
        Ok(WgKey(bytes))
    }

    /// The all-zero key stands for "no key".
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn public_key(&self) -> String {
        let secret = StaticSecret::from(self.0);
        STANDARD.encode(PublicKey::from(&secret).as_bytes())
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Display for WgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for WgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WgKey({})", self.public_key())
    }
}

impl TryFrom<String> for WgKey {
    type Error = WorkloadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        WgKey::parse(&s)
    }
}

impl From<WgKey> for String {
    fn from(key: WgKey) -> Self {
        key.to_base64()
    }
}

/// The overlay address of a node subnet: `100.64.<b>.<c>/32` for a subnet
/// `a.b.c.d`.
pub fn wg_ip(subnet: &IpNet) -> IpNet {
    let [_, b, c, _] = subnet.octets().unwrap_or_default();
    IpNet::v4(100, 64, b, c, 32)
}

/// Render the config a user loads to join a network from outside.
pub fn generate_wg_config(
    address: &str,
    access_private_key: &str,
    node_public_key: &str,
    node_endpoint: &str,
    network_ip_range: &str,
) -> String {
    format!(
        "\n[Interface]\nAddress = {address}\nPrivateKey = {access_private_key}\n[Peer]\nPublicKey = {node_public_key}\nAllowedIPs = {network_ip_range}, 100.64.0.0/16\nPersistentKeepalive = 25\nEndpoint = {node_endpoint}\n"
    )
}
