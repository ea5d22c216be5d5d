//! Resource capacity units.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

pub const KILOBYTE: u64 = 1024;
pub const MEGABYTE: u64 = 1024 * KILOBYTE;
pub const GIGABYTE: u64 = 1024 * MEGABYTE;
pub const TERABYTE: u64 = 1024 * GIGABYTE;

/// Resources consumed by a workload or offered by a node.
///
/// Storage and memory are in bytes, CRU in cores, IPV4U in addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    #[serde(default)]
    pub cru: u64,
    #[serde(default)]
    pub sru: u64,
    #[serde(default)]
    pub hru: u64,
    #[serde(default)]
    pub mru: u64,
    #[serde(default)]
    pub ipv4u: u64,
}

impl Capacity {
    pub fn is_zero(&self) -> bool {
        *self == Capacity::default()
    }
}

impl Add for Capacity {
    type Output = Capacity;

    fn add(mut self, rhs: Capacity) -> Capacity {
        self += rhs;
        self
    }
}

impl AddAssign for Capacity {
    fn add_assign(&mut self, rhs: Capacity) {
        self.cru += rhs.cru;
        self.sru += rhs.sru;
        self.hru += rhs.hru;
        self.mru += rhs.mru;
        self.ipv4u += rhs.ipv4u;
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[mru: {}, sru: {}, hru: {}]",
            self.mru, self.sru, self.hru
        )
    }
}
