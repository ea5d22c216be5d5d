//! Disk (`zmount`) and `volume` workload data.

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::challenge::{Challenge, ChallengeWriter};

/// A raw disk attachable to a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMount {
    /// Size in bytes.
    pub size: u64,
}

/// A shared volume attachable to a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMountResult {
    #[serde(default)]
    pub volume_id: String,
}

impl ZMount {
    pub fn capacity(&self) -> Capacity {
        Capacity { sru: self.size, ..Default::default() }
    }
}

impl Volume {
    pub fn capacity(&self) -> Capacity {
        Capacity { sru: self.size, ..Default::default() }
    }
}

impl Challenge for ZMount {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.size);
    }
}

impl Challenge for Volume {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.size);
    }
}
