//! Gateway proxies: a name under the gateway node's domain, or a user
//! owned FQDN, forwarded to one backend.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use grid_types::metadata::{KIND_GATEWAY_FQDN, KIND_GATEWAY_NAME};
use grid_types::{Backend, DeploymentData, GatewayProxyResult, Workload, WorkloadData};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ResultExt, WorkloadError, WorkloadsResult};
use crate::name::validate_name;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNameProxy {
    pub node_id: u32,
    /// Label; the proxy answers on `<name>.<gateway domain>`.
    pub name: String,
    pub backends: Vec<Backend>,
    #[serde(default)]
    pub tls_passthrough: bool,
    /// Overlay the backends live on, if any.
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub solution_type: String,

    // Computed
    #[serde(default)]
    pub node_deployment_id: HashMap<u32, u64>,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default)]
    pub name_contract_id: u64,
    #[serde(default)]
    pub contract_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFqdnProxy {
    pub node_id: u32,
    pub name: String,
    pub fqdn: String,
    pub backends: Vec<Backend>,
    #[serde(default)]
    pub tls_passthrough: bool,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub solution_type: String,

    // Computed
    #[serde(default)]
    pub node_deployment_id: HashMap<u32, u64>,
    #[serde(default)]
    pub contract_id: u64,
}

fn optional_network(network: &str) -> Option<String> {
    let trimmed = network.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn validate_common(name: &str, node_id: u32, network: &str) -> WorkloadsResult<()> {
    validate_name(name).context("gateway name is invalid")?;
    if node_id == 0 {
        return Err(WorkloadError::invalid(
            "node ID should be a positive integer not zero",
        ));
    }
    if let Some(network) = optional_network(network) {
        validate_name(&network).context("gateway network is invalid")?;
    }
    Ok(())
}

/// Exactly one backend, pointing at a non-loopback IP. With TLS
/// passthrough the backend is `ip:port`, otherwise a URL.
pub fn validate_backends(backends: &[Backend], tls_passthrough: bool) -> WorkloadsResult<()> {
    match backends.len() {
        0 => return Err(WorkloadError::invalid("backends list can not be empty")),
        1 => {}
        _ => return Err(WorkloadError::invalid("only one backend is supported")),
    }
    for backend in backends {
        validate_backend(backend, tls_passthrough)
            .context(format!("failed to validate backend '{}'", backend.0))?;
    }
    Ok(())
}

fn validate_backend(backend: &Backend, tls_passthrough: bool) -> WorkloadsResult<()> {
    let raw = backend.0.as_str();
    let host = if tls_passthrough {
        raw.parse::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
            .map_err(|e| WorkloadError::invalid(format!("failed to parse backend {raw} with error: {e}")))?
    } else {
        let rest = raw
            .strip_prefix("http://")
            .or_else(|| raw.strip_prefix("https://"))
            .ok_or_else(|| WorkloadError::invalid(format!("failed to parse backend {raw}: missing http scheme")))?;
        let authority = rest.split('/').next().unwrap_or_default();
        match authority.parse::<SocketAddr>() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => authority.trim_start_matches('[').trim_end_matches(']').to_string(),
        }
    };
    match host.parse::<IpAddr>() {
        Ok(ip) if !ip.is_loopback() => Ok(()),
        _ => Err(WorkloadError::invalid(format!("invalid ip address in backend: {host}"))),
    }
}

impl GatewayNameProxy {
    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_common(&self.name, self.node_id, &self.network)?;
        validate_backends(&self.backends, self.tls_passthrough)
    }

    pub fn zos_workload(&self) -> Workload {
        Workload::new(
            self.name.clone(),
            WorkloadData::GatewayNameProxy(grid_types::GatewayNameProxy {
                name: self.name.clone(),
                tls_passthrough: self.tls_passthrough,
                backends: self.backends.clone(),
                network: optional_network(&self.network),
            }),
        )
        .with_description(self.description.clone())
    }

    /// Project defaults to the gateway name.
    pub fn generate_metadata(&mut self) -> WorkloadsResult<String> {
        if self.solution_type.is_empty() {
            self.solution_type = self.name.clone();
        }
        Ok(DeploymentData::new(KIND_GATEWAY_NAME, &self.name, &self.solution_type).to_json()?)
    }

    pub fn from_workload(wl: &Workload) -> WorkloadsResult<Self> {
        let data = wl.gateway_name_proxy()?;
        let result: GatewayProxyResult = if wl.result.data.is_null() {
            GatewayProxyResult::default()
        } else {
            wl.result.unmarshal()?
        };
        Ok(Self {
            name: data.name.clone(),
            backends: data.backends.clone(),
            tls_passthrough: data.tls_passthrough,
            network: data.network.clone().unwrap_or_default(),
            description: wl.description.clone(),
            fqdn: result.fqdn,
            ..Default::default()
        })
    }
}

impl GatewayFqdnProxy {
    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_common(&self.name, self.node_id, &self.network)?;
        let re = Regex::new(r"^([a-zA-Z0-9_-]+\.)+[a-zA-Z0-9_-]{2,}$")?;
        if !re.is_match(&self.fqdn) {
            return Err(WorkloadError::invalid(format!("fqdn {} is invalid", self.fqdn)));
        }
        validate_backends(&self.backends, self.tls_passthrough)
    }

    pub fn zos_workload(&self) -> Workload {
        Workload::new(
            self.name.clone(),
            WorkloadData::GatewayFqdnProxy(grid_types::GatewayFqdnProxy {
                fqdn: self.fqdn.clone(),
                tls_passthrough: self.tls_passthrough,
                backends: self.backends.clone(),
                network: optional_network(&self.network),
            }),
        )
        .with_description(self.description.clone())
    }

    pub fn generate_metadata(&mut self) -> WorkloadsResult<String> {
        if self.solution_type.is_empty() {
            self.solution_type = self.name.clone();
        }
        Ok(DeploymentData::new(KIND_GATEWAY_FQDN, &self.name, &self.solution_type).to_json()?)
    }

    pub fn from_workload(wl: &Workload) -> WorkloadsResult<Self> {
        let data = wl.gateway_fqdn_proxy()?;
        Ok(Self {
            name: wl.name.clone(),
            fqdn: data.fqdn.clone(),
            backends: data.backends.clone(),
            tls_passthrough: data.tls_passthrough,
            network: data.network.clone().unwrap_or_default(),
            description: wl.description.clone(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_types::WorkloadResult;

    fn name_gw() -> GatewayNameProxy {
        GatewayNameProxy {
            node_id: 14,
            name: "shop".into(),
            backends: vec![Backend::new("http://185.206.122.35:9000")],
            ..Default::default()
        }
    }

    #[test]
    fn test_backend_rules() {
        let mut gw = name_gw();
        assert!(gw.validate().is_ok());

        gw.backends.clear();
        assert_eq!(gw.validate().unwrap_err().to_string(), "backends list can not be empty");

        gw.backends = vec![Backend::new("http://1.1.1.1"), Backend::new("http://2.2.2.2")];
        assert_eq!(gw.validate().unwrap_err().to_string(), "only one backend is supported");

        gw.backends = vec![Backend::new("http://127.0.0.1:80")];
        assert_eq!(
            gw.validate().unwrap_err().to_string(),
            "failed to validate backend 'http://127.0.0.1:80': invalid ip address in backend: 127.0.0.1"
        );

        gw.backends = vec![Backend::new("http://[2a02:1802:5e::223]:8080/app")];
        assert!(gw.validate().is_ok());

        gw.tls_passthrough = true;
        gw.backends = vec![Backend::new("185.206.122.35:443")];
        assert!(gw.validate().is_ok());
        gw.backends = vec![Backend::new("http://185.206.122.35:443")];
        assert!(gw.validate().is_err());
    }

    #[test]
    fn test_name_gateway_roundtrip() {
        let mut gw = name_gw();
        gw.network = "net".into();
        let mut wl = gw.zos_workload();
        wl.result = WorkloadResult::ok(serde_json::json!({"fqdn": "shop.gent01.grid.tf"}));
        let back = GatewayNameProxy::from_workload(&wl).unwrap();
        assert_eq!(back.fqdn, "shop.gent01.grid.tf");
        assert_eq!(back.network, "net");
        assert_eq!(back.backends, gw.backends);

        let meta = gw.generate_metadata().unwrap();
        let data = DeploymentData::parse(&meta).unwrap();
        assert_eq!(data.kind, "Gateway Name");
        assert_eq!(data.project_name, "shop");
    }

    #[test]
    fn test_fqdn_rules() {
        let mut gw = GatewayFqdnProxy {
            node_id: 14,
            name: "site".into(),
            fqdn: "example.com".into(),
            backends: vec![Backend::new("http://185.206.122.35:9000")],
            ..Default::default()
        };
        assert!(gw.validate().is_ok());
        assert!(gw.zos_workload().gateway_fqdn_proxy().unwrap().network.is_none());

        gw.fqdn = "localhost".into();
        assert_eq!(gw.validate().unwrap_err().to_string(), "fqdn localhost is invalid");

        gw.fqdn = "example.com".into();
        gw.node_id = 0;
        assert_eq!(
            gw.validate().unwrap_err().to_string(),
            "node ID should be a positive integer not zero"
        );
    }
}
