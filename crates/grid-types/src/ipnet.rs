//! IP network (address + prefix length) serialized in CIDR notation.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypesError;

/// An IP address with a prefix length, e.g. `10.20.2.0/24`.
///
/// The address keeps whatever host bits it was built with, so the same
/// type carries both networks (`10.1.0.0/16`) and interface addresses
/// (`185.69.166.10/24`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNet {
    pub ip: IpAddr,
    pub prefix: u8,
}

impl IpNet {
    pub fn new(ip: IpAddr, prefix: u8) -> Self {
        Self { ip, prefix }
    }

    pub fn v4(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), prefix)
    }

    fn max_prefix(&self) -> u8 {
        match self.ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// The address with host bits cleared.
    pub fn network(&self) -> IpAddr {
        match self.ip {
            IpAddr::V4(v4) => {
                let mask = mask_u32(self.prefix);
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                IpAddr::V6((u128::from(v6) & mask).into())
            }
        }
    }

    /// Whether `ip` falls inside this network.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.ip, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(*addr) & mask
            }
            (IpAddr::V6(_), IpAddr::V6(_)) => {
                IpNet::new(*ip, self.prefix).network() == self.network()
            }
            _ => false,
        }
    }

    /// IPv4 octets, if this is a v4 network.
    pub fn octets(&self) -> Option<[u8; 4]> {
        match self.ip {
            IpAddr::V4(v4) => Some(v4.octets()),
            IpAddr::V6(_) => None,
        }
    }

    /// Whether the address is routable on the public internet.
    pub fn is_public(&self) -> bool {
        is_public_ip(&self.ip)
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix.min(32)))
    }
}

/// Global unicast and not in a private, shared, or documentation range.
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_documentation()
                // 100.64.0.0/10 carrier-grade NAT
                || (o[0] == 100 && (o[1] & 0xc0) == 64))
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            !(v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // fc00::/7 unique local
                || (seg[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (seg[0] & 0xffc0) == 0xfe80)
        }
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix)
    }
}

impl FromStr for IpNet {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TypesError::InvalidIpNet(s.to_string());
        let (ip, prefix) = s.split_once('/').ok_or_else(bad)?;
        let ip: IpAddr = ip.parse().map_err(|_| bad())?;
        let prefix: u8 = prefix.parse().map_err(|_| bad())?;
        let net = IpNet::new(ip, prefix);
        if prefix > net.max_prefix() {
            return Err(bad());
        }
        Ok(net)
    }
}

impl Serialize for IpNet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpNet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for optional networks that the node encodes as `""`.
pub mod optional {
    use super::IpNet;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<IpNet>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(net) => serializer.collect_str(net),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<IpNet>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_contains() {
        let net: IpNet = "10.20.0.0/16".parse().unwrap();
        assert_eq!(net.prefix, 16);
        assert!(net.contains(&"10.20.3.4".parse().unwrap()));
        assert!(!net.contains(&"10.21.0.1".parse().unwrap()));
        assert_eq!(net.to_string(), "10.20.0.0/16");

        let host: IpNet = "185.69.166.10/24".parse().unwrap();
        assert_eq!(host.network(), "185.69.166.0".parse::<IpAddr>().unwrap());
        assert!(host.is_public());

        assert!("10.1.0.0".parse::<IpNet>().is_err());
        assert!("10.1.0.0/33".parse::<IpNet>().is_err());
    }

    #[test]
    fn test_public_ranges() {
        for private in ["10.0.0.1", "192.168.1.1", "172.16.5.5", "100.64.1.2", "127.0.0.1"] {
            assert!(!is_public_ip(&private.parse().unwrap()), "{private}");
        }
        assert!(is_public_ip(&"8.8.8.8".parse().unwrap()));
        assert!(is_public_ip(&"2a02:1802:5e::1".parse().unwrap()));
        assert!(!is_public_ip(&"fd00::1".parse().unwrap()));
    }

    #[test]
    fn test_optional_serde() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            #[serde(with = "optional", default)]
            ip: Option<IpNet>,
        }

        let h: Holder = serde_json::from_str(r#"{"ip":""}"#).unwrap();
        assert!(h.ip.is_none());
        let h: Holder = serde_json::from_str(r#"{"ip":"1.1.1.1/32"}"#).unwrap();
        assert_eq!(h.ip, Some(IpNet::v4(1, 1, 1, 1, 32)));
        assert_eq!(serde_json::to_string(&Holder { ip: None }).unwrap(), r#"{"ip":""}"#);
    }
}
