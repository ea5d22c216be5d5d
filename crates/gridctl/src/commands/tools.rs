use std::path::Path;

use anyhow::Context;
use clap::Args;
use grid_core::GridConfig;
use grid_types::Deployment;
use grid_workloads::generate_wg_config;

/// Challenge hash of a deployment stored as JSON.
pub fn hash(path: &Path) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let deployment: Deployment = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a deployment", path.display()))?;
    Ok(deployment.challenge_hash_hex())
}

#[derive(Args, Debug)]
pub struct WgConfigArgs {
    /// Address of the access peer, e.g. 100.64.20.2.
    #[arg(long)]
    pub address: String,
    /// Base64 private key of the access peer.
    #[arg(long)]
    pub private_key: String,
    /// Base64 public key of the public node.
    #[arg(long)]
    pub node_public_key: String,
    /// `host:port` of the public node.
    #[arg(long)]
    pub endpoint: String,
    /// Network range, e.g. 10.20.0.0/16.
    #[arg(long)]
    pub ip_range: String,
}

pub fn wg_config(args: &WgConfigArgs) -> String {
    generate_wg_config(
        &args.address,
        &args.private_key,
        &args.node_public_key,
        &args.endpoint,
        &args.ip_range,
    )
}

/// Validate `config` and summarize it. The mnemonic is never printed.
pub fn check_config(config: &GridConfig, json: bool) -> anyhow::Result<String> {
    config.validate().context("invalid config")?;
    if json {
        let mut shown = config.clone();
        shown.mnemonic = "<redacted>".to_string();
        return Ok(serde_json::to_string_pretty(&shown)?);
    }
    Ok(format!(
        "config ok\nnetwork:   {}\nkey type:  {}\nsubstrate: {}\nrelay:     {}\nproxy:     {}\ngraphql:   {}",
        config.network,
        config.key_type,
        config.substrate_urls.join(", "),
        config.relay_urls.join(", "),
        config.proxy_urls.join(", "),
        config.graphql_urls.join(", "),
    ))
}
