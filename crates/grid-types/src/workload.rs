//! Workloads: the unit of resource a node provisions.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capacity::Capacity;
use crate::challenge::{Challenge, ChallengeWriter};
use crate::error::{TypesError, TypesResult};
use crate::gateway::{GatewayFqdnProxy, GatewayNameProxy};
use crate::machine::ZMachine;
use crate::network::{Network, NetworkLight};
use crate::public_ip::{PublicIp, PublicIpv4};
use crate::qsfs::QuantumSafeFs;
use crate::zdb::Zdb;
use crate::zlogs::ZLogs;
use crate::zmount::{Volume, ZMount};

/// Workload type tags as the node spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadType {
    ZMount,
    Volume,
    Network,
    NetworkLight,
    Zdb,
    ZMachine,
    ZMachineLight,
    PublicIpv4,
    PublicIp,
    GatewayNameProxy,
    GatewayFqdnProxy,
    Qsfs,
    ZLogs,
}

impl WorkloadType {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadType::ZMount => "zmount",
            WorkloadType::Volume => "volume",
            WorkloadType::Network => "network",
            WorkloadType::NetworkLight => "network-light",
            WorkloadType::Zdb => "zdb",
            WorkloadType::ZMachine => "zmachine",
            WorkloadType::ZMachineLight => "zmachine-light",
            WorkloadType::PublicIpv4 => "ipv4",
            WorkloadType::PublicIp => "ip",
            WorkloadType::GatewayNameProxy => "gateway-name-proxy",
            WorkloadType::GatewayFqdnProxy => "gateway-fqdn-proxy",
            WorkloadType::Qsfs => "qsfs",
            WorkloadType::ZLogs => "zlogs",
        }
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific workload payload. Serialized as `"type"` + `"data"`
/// fields beside the workload's own fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkloadData {
    #[serde(rename = "zmount")]
    ZMount(ZMount),
    #[serde(rename = "volume")]
    Volume(Volume),
    #[serde(rename = "network")]
    Network(Network),
    #[serde(rename = "network-light")]
    NetworkLight(NetworkLight),
    #[serde(rename = "zdb")]
    Zdb(Zdb),
    #[serde(rename = "zmachine")]
    ZMachine(ZMachine),
    #[serde(rename = "zmachine-light")]
    ZMachineLight(ZMachine),
    #[serde(rename = "ipv4")]
    PublicIpv4(PublicIpv4),
    #[serde(rename = "ip")]
    PublicIp(PublicIp),
    #[serde(rename = "gateway-name-proxy")]
    GatewayNameProxy(GatewayNameProxy),
    #[serde(rename = "gateway-fqdn-proxy")]
    GatewayFqdnProxy(GatewayFqdnProxy),
    #[serde(rename = "qsfs")]
    Qsfs(QuantumSafeFs),
    #[serde(rename = "zlogs")]
    ZLogs(ZLogs),
}

impl WorkloadData {
    pub fn workload_type(&self) -> WorkloadType {
        match self {
            WorkloadData::ZMount(_) => WorkloadType::ZMount,
            WorkloadData::Volume(_) => WorkloadType::Volume,
            WorkloadData::Network(_) => WorkloadType::Network,
            WorkloadData::NetworkLight(_) => WorkloadType::NetworkLight,
            WorkloadData::Zdb(_) => WorkloadType::Zdb,
            WorkloadData::ZMachine(_) => WorkloadType::ZMachine,
            WorkloadData::ZMachineLight(_) => WorkloadType::ZMachineLight,
            WorkloadData::PublicIpv4(_) => WorkloadType::PublicIpv4,
            WorkloadData::PublicIp(_) => WorkloadType::PublicIp,
            WorkloadData::GatewayNameProxy(_) => WorkloadType::GatewayNameProxy,
            WorkloadData::GatewayFqdnProxy(_) => WorkloadType::GatewayFqdnProxy,
            WorkloadData::Qsfs(_) => WorkloadType::Qsfs,
            WorkloadData::ZLogs(_) => WorkloadType::ZLogs,
        }
    }

    pub fn capacity(&self) -> Capacity {
        match self {
            WorkloadData::ZMount(d) => d.capacity(),
            WorkloadData::Volume(d) => d.capacity(),
            WorkloadData::Zdb(d) => d.capacity(),
            WorkloadData::ZMachine(d) | WorkloadData::ZMachineLight(d) => d.capacity(),
            WorkloadData::PublicIp(d) => d.capacity(),
            WorkloadData::Qsfs(d) => d.capacity(),
            _ => Capacity::default(),
        }
    }
}

impl Challenge for WorkloadData {
    fn challenge(&self, w: &mut ChallengeWriter) {
        match self {
            WorkloadData::ZMount(d) => d.challenge(w),
            WorkloadData::Volume(d) => d.challenge(w),
            WorkloadData::Network(d) => d.challenge(w),
            WorkloadData::NetworkLight(d) => d.challenge(w),
            WorkloadData::Zdb(d) => d.challenge(w),
            WorkloadData::ZMachine(d) | WorkloadData::ZMachineLight(d) => d.challenge(w),
            WorkloadData::PublicIpv4(d) => d.challenge(w),
            WorkloadData::PublicIp(d) => d.challenge(w),
            WorkloadData::GatewayNameProxy(d) => d.challenge(w),
            WorkloadData::GatewayFqdnProxy(d) => d.challenge(w),
            WorkloadData::Qsfs(d) => d.challenge(w),
            WorkloadData::ZLogs(d) => d.challenge(w),
        }
    }
}

/// Provisioning state reported by the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    #[default]
    #[serde(alias = "")]
    Init,
    Unchanged,
    Error,
    Ok,
    Deleted,
    Paused,
}

impl ResultState {
    /// `ok` and `paused` both mean the workload is provisioned.
    pub fn is_okay(self) -> bool {
        matches!(self, ResultState::Ok | ResultState::Paused)
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultState::Init => "init",
            ResultState::Unchanged => "unchanged",
            ResultState::Error => "error",
            ResultState::Ok => "ok",
            ResultState::Deleted => "deleted",
            ResultState::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResult {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub state: ResultState,
    #[serde(rename = "message", default)]
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

impl WorkloadResult {
    pub fn ok(data: Value) -> Self {
        Self { state: ResultState::Ok, data, ..Default::default() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { state: ResultState::Error, error: message.into(), ..Default::default() }
    }

    /// Decode the type-specific result payload.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> TypesResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub version: u32,
    pub name: String,
    #[serde(flatten)]
    pub data: WorkloadData,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub result: WorkloadResult,
}

impl Workload {
    pub fn new(name: impl Into<String>, data: WorkloadData) -> Self {
        Self {
            version: 0,
            name: name.into(),
            data,
            metadata: String::new(),
            description: String::new(),
            result: WorkloadResult::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn workload_type(&self) -> WorkloadType {
        self.data.workload_type()
    }

    pub fn capacity(&self) -> Capacity {
        self.data.capacity()
    }

    /// MD5 over the workload challenge. The name is not part of it.
    pub fn challenge_hash(&self) -> [u8; 16] {
        let mut w = ChallengeWriter::new();
        self.challenge(&mut w);
        crate::challenge::md5_digest(w.as_bytes())
    }
}

impl Challenge for Workload {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.version);
        self.data.challenge(w);
        w.write(self.workload_type())
            .write(&self.metadata)
            .write(&self.description);
    }
}

/// Borrow the typed payload of a workload, failing if it is another type.
macro_rules! typed_accessor {
    ($fn_name:ident, $variant:ident, $ty:ty, $label:literal) => {
        impl Workload {
            pub fn $fn_name(&self) -> TypesResult<&$ty> {
                match &self.data {
                    WorkloadData::$variant(d) => Ok(d),
                    _ => Err(TypesError::UnexpectedType {
                        name: self.name.clone(),
                        expected: $label,
                    }),
                }
            }
        }
    };
}

typed_accessor!(zmount, ZMount, ZMount, "zmount");
typed_accessor!(zdb, Zdb, Zdb, "zdb");
typed_accessor!(public_ip, PublicIp, PublicIp, "ip");
typed_accessor!(network, Network, Network, "network");
typed_accessor!(gateway_name_proxy, GatewayNameProxy, GatewayNameProxy, "gateway-name-proxy");
typed_accessor!(gateway_fqdn_proxy, GatewayFqdnProxy, GatewayFqdnProxy, "gateway-fqdn-proxy");
typed_accessor!(qsfs, Qsfs, QuantumSafeFs, "qsfs");
typed_accessor!(zlogs, ZLogs, ZLogs, "zlogs");

impl Workload {
    /// Machine payload of a `zmachine` or `zmachine-light` workload.
    pub fn zmachine(&self) -> TypesResult<&ZMachine> {
        match &self.data {
            WorkloadData::ZMachine(d) | WorkloadData::ZMachineLight(d) => Ok(d),
            _ => Err(TypesError::UnexpectedType {
                name: self.name.clone(),
                expected: "zmachine",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::GIGABYTE;
    use serde_json::json;

    #[test]
    fn test_json_shape() {
        let wl = Workload::new("disk", WorkloadData::ZMount(ZMount { size: GIGABYTE }));
        let v = serde_json::to_value(&wl).unwrap();
        assert_eq!(v["type"], "zmount");
        assert_eq!(v["name"], "disk");
        assert_eq!(v["data"]["size"], GIGABYTE);
        assert_eq!(v["result"]["state"], "init");

        let back: Workload = serde_json::from_value(v).unwrap();
        assert_eq!(back, wl);
    }

    #[test]
    fn test_result_from_node() {
        let raw = json!({
            "version": 1,
            "name": "ip",
            "type": "ip",
            "data": {"v4": true, "v6": false},
            "metadata": "",
            "description": "",
            "result": {"created": 1700000000, "state": "ok", "message": "", "data": {"ip": "185.69.166.10/24", "ip6": "", "gateway": "185.69.166.1"}}
        });
        let wl: Workload = serde_json::from_value(raw).unwrap();
        assert_eq!(wl.workload_type(), WorkloadType::PublicIp);
        assert!(wl.result.state.is_okay());
        assert_eq!(wl.capacity().ipv4u, 1);

        let res: crate::public_ip::PublicIpResult = wl.result.unmarshal().unwrap();
        assert_eq!(res.ip.map(|ip| ip.to_string()), Some("185.69.166.10/24".to_string()));
        assert!(res.ipv6.is_none());
    }

    #[test]
    fn test_empty_state_is_init() {
        let res: WorkloadResult = serde_json::from_value(json!({"state": ""})).unwrap();
        assert_eq!(res.state, ResultState::Init);
    }

    #[test]
    fn test_hash_ignores_name() {
        let a = Workload::new("a", WorkloadData::ZMount(ZMount { size: 10 }));
        let mut b = a.clone();
        b.name = "b".to_string();
        assert_eq!(a.challenge_hash(), b.challenge_hash());

        b.data = WorkloadData::ZMount(ZMount { size: 11 });
        assert_ne!(a.challenge_hash(), b.challenge_hash());

        let mut c = a.clone();
        c.version = 3;
        assert_ne!(a.challenge_hash(), c.challenge_hash());
    }

    #[test]
    fn test_typed_accessors() {
        let wl = Workload::new("disk", WorkloadData::ZMount(ZMount { size: 10 }));
        assert_eq!(wl.zmount().unwrap().size, 10);
        assert!(matches!(wl.zmachine(), Err(TypesError::UnexpectedType { .. })));
    }
}
