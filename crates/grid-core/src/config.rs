//! Client configuration and per-network endpoint defaults.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::validation;

/// Default node RPC timeout in seconds.
pub const DEFAULT_RMB_TIMEOUT_SECS: u64 = 10;

/// Grid network selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Dev,
    Qa,
    Test,
    Main,
}

impl Network {
    /// Host prefix used by the public grid endpoints (`dev.`, `qa.`, `test.`, or none).
    fn host_prefix(self) -> &'static str {
        match self {
            Network::Dev => "dev.",
            Network::Qa => "qa.",
            Network::Test => "test.",
            Network::Main => "",
        }
    }

    pub fn substrate_url(self) -> String {
        format!("wss://tfchain.{}grid.tf/ws", self.host_prefix())
    }

    pub fn proxy_url(self) -> String {
        format!("https://gridproxy.{}grid.tf/", self.host_prefix())
    }

    pub fn graphql_url(self) -> String {
        format!("https://graphql.{}grid.tf/graphql", self.host_prefix())
    }

    pub fn relay_url(self) -> String {
        format!("wss://relay.{}grid.tf", self.host_prefix())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Network::Dev => "dev",
            Network::Qa => "qa",
            Network::Test => "test",
            Network::Main => "main",
        };
        f.write_str(s)
    }
}

impl FromStr for Network {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Network::Dev),
            "qa" => Ok(Network::Qa),
            "test" => Ok(Network::Test),
            "main" => Ok(Network::Main),
            other => Err(CoreError::InvalidNetwork(other.to_string())),
        }
    }
}

/// Signature scheme of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Sr25519,
    Ed25519,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Sr25519 => "sr25519",
            KeyType::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sr25519" => Ok(KeyType::Sr25519),
            "ed25519" => Ok(KeyType::Ed25519),
            other => Err(CoreError::InvalidKeyType(other.to_string())),
        }
    }
}

/// Options recognized by the grid client constructor.
///
/// Empty URL lists are filled from the selected network's defaults by
/// [`GridConfig::with_defaults`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub network: Network,
    /// BIP-39 mnemonic or a hex-encoded 32-byte seed.
    pub mnemonic: String,
    #[serde(default)]
    pub key_type: KeyType,
    #[serde(default)]
    pub substrate_urls: Vec<String>,
    #[serde(default)]
    pub relay_urls: Vec<String>,
    #[serde(default)]
    pub proxy_urls: Vec<String>,
    #[serde(default)]
    pub graphql_urls: Vec<String>,
    #[serde(default = "default_rmb_timeout")]
    pub rmb_timeout_secs: u64,
    #[serde(default)]
    pub show_logs: bool,
    #[serde(default = "default_true")]
    pub rmb_in_mem_cache: bool,
}

fn default_rmb_timeout() -> u64 {
    DEFAULT_RMB_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl GridConfig {
    /// Config for `network` with default endpoints.
    pub fn new(network: Network, mnemonic: impl Into<String>) -> Self {
        Self {
            network,
            mnemonic: mnemonic.into(),
            key_type: KeyType::default(),
            substrate_urls: Vec::new(),
            relay_urls: Vec::new(),
            proxy_urls: Vec::new(),
            graphql_urls: Vec::new(),
            rmb_timeout_secs: DEFAULT_RMB_TIMEOUT_SECS,
            show_logs: false,
            rmb_in_mem_cache: true,
        }
        .with_defaults()
    }

    /// Load a TOML config file. Missing endpoints are defaulted.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GridConfig = toml::from_str(&content)?;
        Ok(config.with_defaults())
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn with_substrate_urls(mut self, urls: Vec<String>) -> Self {
        self.substrate_urls = urls;
        self
    }

    pub fn with_relay_urls(mut self, urls: Vec<String>) -> Self {
        self.relay_urls = urls;
        self
    }

    pub fn with_proxy_urls(mut self, urls: Vec<String>) -> Self {
        self.proxy_urls = urls;
        self
    }

    pub fn with_graphql_urls(mut self, urls: Vec<String>) -> Self {
        self.graphql_urls = urls;
        self
    }

    pub fn with_rmb_timeout(mut self, secs: u64) -> Self {
        self.rmb_timeout_secs = secs;
        self
    }

    pub fn with_show_logs(mut self, show_logs: bool) -> Self {
        self.show_logs = show_logs;
        self
    }

    /// Fill any empty endpoint list from the network defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.substrate_urls.is_empty() {
            self.substrate_urls = vec![self.network.substrate_url()];
        }
        if self.relay_urls.is_empty() {
            self.relay_urls = vec![self.network.relay_url()];
        }
        if self.proxy_urls.is_empty() {
            self.proxy_urls = vec![self.network.proxy_url()];
        }
        if self.graphql_urls.is_empty() {
            self.graphql_urls = vec![self.network.graphql_url()];
        }
        if self.rmb_timeout_secs == 0 {
            self.rmb_timeout_secs = DEFAULT_RMB_TIMEOUT_SECS;
        }
        self
    }

    pub fn rmb_timeout(&self) -> Duration {
        Duration::from_secs(self.rmb_timeout_secs)
    }

    /// Session id reported to the relay for this process.
    pub fn session_id(&self) -> String {
        format!("tf-{}", std::process::id())
    }

    /// Check the mnemonic and every endpoint.
    pub fn validate(&self) -> CoreResult<()> {
        validation::validate_mnemonic(&self.mnemonic)?;

        for url in &self.substrate_urls {
            validation::validate_substrate_url(url)?;
        }
        for url in &self.relay_urls {
            validation::validate_relay_url(url)?;
        }
        for url in &self.proxy_urls {
            validation::validate_proxy_url(url)?;
        }
        for url in &self.graphql_urls {
            validation::validate_graphql_url(url)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_network_defaults() {
        let config = GridConfig::new(Network::Dev, MNEMONIC);
        assert_eq!(config.substrate_urls, vec!["wss://tfchain.dev.grid.tf/ws"]);
        assert_eq!(config.proxy_urls, vec!["https://gridproxy.dev.grid.tf/"]);
        assert_eq!(config.graphql_urls, vec!["https://graphql.dev.grid.tf/graphql"]);
        assert_eq!(config.relay_urls, vec!["wss://relay.dev.grid.tf"]);

        let main = GridConfig::new(Network::Main, MNEMONIC);
        assert_eq!(main.substrate_urls, vec!["wss://tfchain.grid.tf/ws"]);
        assert_eq!(main.rmb_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_network_and_key_type() {
        assert_eq!("qa".parse::<Network>().unwrap(), Network::Qa);
        assert!("mainnet".parse::<Network>().is_err());
        assert_eq!("ed25519".parse::<KeyType>().unwrap(), KeyType::Ed25519);
        assert!("rsa".parse::<KeyType>().is_err());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = format!(
            r#"
network = "test"
mnemonic = "{MNEMONIC}"
key_type = "ed25519"
"#
        );
        let config: GridConfig = toml::from_str(&toml_str).unwrap();
        let config = config.with_defaults();
        assert_eq!(config.network, Network::Test);
        assert_eq!(config.key_type, KeyType::Ed25519);
        assert_eq!(config.rmb_timeout_secs, 10);
        assert!(config.rmb_in_mem_cache);
        assert_eq!(config.graphql_urls, vec!["https://graphql.test.grid.tf/graphql"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.toml");
        let config = GridConfig::new(Network::Qa, MNEMONIC).with_rmb_timeout(30);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = GridConfig::from_file(&path).unwrap();
        assert_eq!(loaded.network, Network::Qa);
        assert_eq!(loaded.rmb_timeout_secs, 30);
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = GridConfig::new(Network::Dev, MNEMONIC)
            .with_proxy_urls(vec!["ftp://gridproxy.dev.grid.tf".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidUrl { kind: "proxy", .. })
        ));
    }

    #[test]
    fn test_session_id() {
        let config = GridConfig::new(Network::Dev, MNEMONIC);
        assert!(config.session_id().starts_with("tf-"));
    }
}
