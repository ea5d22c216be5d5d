//! gridctl: command-line front end for the grid client crates.
//!
//! # Usage
//!
//! ```text
//! gridctl --network dev nodes --free-mru-gb 4 --ipv4
//! gridctl --config grid.toml contracts --twin 42 --project vm/web
//! gridctl hash deployment.json
//! gridctl check-config grid.toml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use grid_core::{GridConfig, Network};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "gridctl",
    about = "Grid deployment toolbox",
    version,
    propagate_version = true,
)]
struct Cli {
    /// TOML config file. Overrides --network and --mnemonic.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Grid network: dev, qa, test or main.
    #[arg(long, global = true, default_value = "dev")]
    network: Network,

    /// Mnemonic or hex seed of the identity.
    #[arg(long, global = true)]
    mnemonic: Option<String>,

    /// JSON logs and JSON output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the node index.
    Nodes(commands::nodes::NodesArgs),
    /// List live contracts of a twin.
    Contracts {
        /// Twin owning the contracts.
        #[arg(long)]
        twin: u32,
        /// Keep only node contracts of this project.
        #[arg(long)]
        project: Option<String>,
    },
    /// Print the challenge hash of a deployment JSON file.
    Hash {
        file: PathBuf,
    },
    /// Render a WireGuard access config.
    WgConfig(commands::tools::WgConfigArgs),
    /// Load and validate a config file.
    CheckConfig {
        file: PathBuf,
    },
}

impl Cli {
    /// `check-config` loads the file it checks; everything else uses
    /// `--config` or the network flags.
    fn grid_config(&self) -> anyhow::Result<GridConfig> {
        let path = match &self.command {
            Command::CheckConfig { file } => Some(file),
            _ => self.config.as_ref(),
        };
        match path {
            Some(path) => GridConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => Ok(GridConfig::new(
                self.network,
                self.mnemonic.clone().unwrap_or_default(),
            )),
        }
    }
}

/// `RUST_LOG` wins; otherwise `show_logs` picks verbose or quiet.
fn init_tracing(show_logs: bool, json: bool) {
    let fallback = if show_logs {
        "info,gridctl=debug,grid=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.grid_config()?;
    init_tracing(config.show_logs, cli.json);

    let output = match cli.command {
        Command::Nodes(args) => commands::nodes::run(&config, &args, cli.json).await?,
        Command::Contracts { twin, project } => {
            commands::contracts::run(&config, twin, project.as_deref(), cli.json).await?
        }
        Command::Hash { file } => commands::tools::hash(&file)?,
        Command::WgConfig(args) => commands::tools::wg_config(&args),
        Command::CheckConfig { .. } => commands::tools::check_config(&config, cli.json)?,
    };
    println!("{output}");
    Ok(())
}
