//! 0-DB namespace workload data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::challenge::{Challenge, ChallengeWriter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZdbMode {
    #[default]
    User,
    Seq,
}

impl fmt::Display for ZdbMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZdbMode::User => f.write_str("user"),
            ZdbMode::Seq => f.write_str("seq"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zdb {
    /// Size in bytes.
    pub size: u64,
    pub mode: ZdbMode,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub public: bool,
}

/// Namespace details reported back by the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZdbResult {
    #[serde(rename = "Namespace", default)]
    pub namespace: String,
    #[serde(rename = "IPs", default)]
    pub ips: Vec<String>,
    #[serde(rename = "Port", default)]
    pub port: u32,
}

impl Zdb {
    pub fn capacity(&self) -> Capacity {
        Capacity { hru: self.size, ..Default::default() }
    }
}

impl Challenge for Zdb {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.size)
            .write(self.mode)
            .write(&self.password)
            .write(self.public);
    }
}
