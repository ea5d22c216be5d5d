//! Gateway proxy workload data.

use serde::{Deserialize, Serialize};

use crate::challenge::{Challenge, ChallengeWriter};

/// A backend url a gateway forwards to, e.g. `http://10.20.2.2:8080`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Backend(pub String);

impl Backend {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }
}

impl Challenge for Backend {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.0);
    }
}

/// Proxies `<name>.<gateway domain>` to the backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNameProxy {
    pub name: String,
    #[serde(default)]
    pub tls_passthrough: bool,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// Proxies a user-owned FQDN to the backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFqdnProxy {
    pub fqdn: String,
    #[serde(default)]
    pub tls_passthrough: bool,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayProxyResult {
    #[serde(default)]
    pub fqdn: String,
}

fn base_challenge(
    w: &mut ChallengeWriter,
    tls_passthrough: bool,
    backends: &[Backend],
    network: &Option<String>,
) {
    w.write(tls_passthrough);
    backends.challenge(w);
    if let Some(network) = network {
        w.write(network);
    }
}

impl Challenge for GatewayNameProxy {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.name);
        base_challenge(w, self.tls_passthrough, &self.backends, &self.network);
    }
}

impl Challenge for GatewayFqdnProxy {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.fqdn);
        base_challenge(w, self.tls_passthrough, &self.backends, &self.network);
    }
}
