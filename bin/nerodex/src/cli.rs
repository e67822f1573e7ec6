use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand};
use nerodex_deploy::{Address, CONFIG_FILENAME};
use tracing::level_filters::LevelFilter;

/// An existing contract to use instead of deploying a unit: `<unit>=<address>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOverride {
    pub unit: String,
    pub address: Address,
}

impl FromStr for UnitOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (unit, address) = s
            .split_once('=')
            .ok_or_else(|| format!("expected <unit>=<address>, got `{s}`"))?;

        let unit = unit.trim();
        if unit.is_empty() {
            return Err(format!("missing unit name in `{s}`"));
        }

        let address = address
            .trim()
            .parse()
            .map_err(|e| format!("invalid address for `{unit}`: {e}"))?;

        Ok(Self {
            unit: unit.to_string(),
            address,
        })
    }
}

#[derive(Parser)]
#[command(name = "nerodex")]
#[command(
    author,
    version,
    about = "Deploy and verify the NERO DEX contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "NERODEX_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or a directory containing one.
    ///
    /// Defaults to ./Nerodex.toml when it exists.
    #[arg(short, long, global = true, alias = "conf", env = "NERODEX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// The configuration file to read, if any.
    pub fn config_file(&self) -> PathBuf {
        match &self.config {
            Some(path) if path.is_dir() => path.join(CONFIG_FILENAME),
            Some(path) => path.clone(),
            None => PathBuf::from(CONFIG_FILENAME),
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy every contract not yet in the deployment record.
    Deploy(DeployArgs),

    /// Verify the source of every contract in the deployment record.
    Verify(VerifyArgs),

    /// Print the deployment record.
    Show(CommonArgs),

    /// Write the effective configuration to a file.
    Init {
        #[clap(flatten)]
        common: CommonArgs,

        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },
}

/// Settings shared by every command.
///
/// Each flag overrides the configuration file and its `NERODEX_*` environment variable.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// The network to use: a preset (localhost, nero-testnet, nero-mainnet)
    /// or a network defined in the configuration file.
    #[arg(short, long)]
    pub network: Option<String>,

    /// Path to the deployment record.
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Path to the Hardhat artifacts directory.
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Native asset symbol passed to the token descriptor. It is part of the
    /// contract set, so verify and show need the value deploy used.
    #[arg(long)]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    #[clap(flatten)]
    pub common: CommonArgs,

    /// Hex-encoded private key of the deployer account.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Use an existing wrapped native token instead of deploying WETH9.
    #[arg(long, env = "WETH_ADDRESS")]
    pub weth: Option<Address>,

    /// Use an existing contract for a unit, as <unit>=<address>. Repeatable.
    #[arg(long = "override", value_name = "UNIT=ADDRESS")]
    pub overrides: Vec<UnitOverride>,

    /// Verify the contracts once deployed. Verification failures do not fail the command.
    #[arg(long)]
    pub verify: bool,

    #[clap(flatten)]
    pub explorer: ExplorerArgs,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[clap(flatten)]
    pub explorer: ExplorerArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ExplorerArgs {
    /// API key of the block explorer.
    #[arg(long, env = "EXPLORER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Maximum concurrent verification requests.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Maximum time spent verifying one contract, in seconds.
    #[arg(long)]
    pub verify_timeout: Option<u64>,
}
