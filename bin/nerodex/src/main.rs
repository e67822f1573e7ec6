//! nerodex is a CLI tool to deploy the NERO DEX contracts and verify their sources.

mod cli;
mod report;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nerodex_deploy::{
    Artifacts, DeployConfig, DeploymentRecord, EtherscanVerifier, Executor, NetworkConfig,
    Overrides, PrivateKeySigner, RecordStore, Registry, RpcChainClient, VerificationDriver,
    VerificationReport, units,
};

use cli::{Cli, Command, CommonArgs, DeployArgs, ExplorerArgs, VerifyArgs};

/// Configuration keys that may be set through `NERODEX_*` environment variables.
const ENV_KEYS: [&str; 6] = [
    "network",
    "record",
    "artifacts",
    "descriptor_symbol",
    "verify_concurrency",
    "verify_timeout_secs",
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match &cli.command {
        Command::Deploy(args) => {
            let config = load_config(&cli, &args.common, true)?;
            deploy(config, args).await
        }
        Command::Verify(args) => {
            let config = load_config(&cli, &args.common, true)?;
            verify(config, args).await
        }
        Command::Show(common) => {
            let config = load_config(&cli, common, true)?;
            show(&config)
        }
        Command::Init { common, force } => {
            // The file named by --config is the one being created.
            let config = load_config(&cli, common, false)?;
            let path = cli.config_file();
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite it",
                    path.display()
                );
            }
            config.save_to_file(&path)
        }
    }
}

/// Defaults, then the configuration file, then `NERODEX_*` variables, then flags.
///
/// With `must_exist`, an explicitly given configuration file that does not exist is an error.
fn load_config(cli: &Cli, common: &CommonArgs, must_exist: bool) -> Result<DeployConfig> {
    let path = cli.config_file();
    if must_exist && cli.config.is_some() && !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }

    let mut config: DeployConfig = Figment::from(Serialized::defaults(DeployConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("NERODEX_").only(&ENV_KEYS))
        .extract()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    if let Some(network) = &common.network {
        config.network = network.clone();
    }
    if let Some(record) = &common.record {
        config.record = record.clone();
    }
    if let Some(artifacts) = &common.artifacts {
        config.artifacts = artifacts.clone();
    }
    if let Some(symbol) = &common.symbol {
        config.descriptor_symbol = symbol.clone();
    }

    tracing::debug!(
        network = %config.network,
        record = %config.record.display(),
        artifacts = %config.artifacts.display(),
        "Configuration resolved"
    );
    Ok(config)
}

fn apply_explorer_args(config: &mut DeployConfig, args: &ExplorerArgs) {
    if let Some(concurrency) = args.concurrency {
        config.verify_concurrency = concurrency;
    }
    if let Some(timeout) = args.verify_timeout {
        config.verify_timeout_secs = timeout;
    }
}

async fn deploy(mut config: DeployConfig, args: &DeployArgs) -> Result<()> {
    apply_explorer_args(&mut config, &args.explorer);

    let network = config.resolve_network()?;
    let registry = Registry::nero_dex(&config.descriptor_symbol)?;
    let signer: PrivateKeySigner = args
        .private_key
        .trim()
        .parse()
        .context("Invalid deployer private key")?;

    let mut overrides = Overrides::new();
    for (unit, address) in &config.overrides {
        overrides = overrides.unit(unit, *address);
    }
    if let Some(weth) = args.weth {
        overrides = overrides.unit(units::WETH9, weth);
    }
    for o in &args.overrides {
        overrides = overrides.unit(&o.unit, o.address);
    }

    let artifacts = Artifacts::load_hardhat(&config.artifacts)?;
    let chain = RpcChainClient::new(&network)?;

    let balance = chain.balance(signer.address()).await?;
    tracing::info!(
        network = %network.name,
        deployer = %signer.address(),
        balance_wei = %balance,
        "Deployer account"
    );
    if balance.is_zero() {
        tracing::warn!(deployer = %signer.address(), "Deployer account has no funds");
    }

    let executor = Executor::new(
        chain,
        artifacts,
        config.record.clone(),
        network.confirmation_timeout(),
    );

    let record = match executor.run(&registry, &overrides, &signer).await {
        Ok(record) => record,
        Err(err) => {
            if let Ok(Some(record)) = RecordStore::load(&config.record) {
                println!("{}", report::record_table(&record, &registry, &network));
            }
            let unit = err.unit().unwrap_or("-").to_string();
            return Err(err).with_context(|| {
                format!(
                    "Deployment stopped at unit `{unit}`; fix the cause and run again to resume from {}",
                    config.record.display()
                )
            });
        }
    };

    println!("{}", report::record_table(&record, &registry, &network));
    tracing::info!(record = %config.record.display(), "NERO DEX deployed");

    if args.verify {
        let verification = run_verification(
            &config,
            &network,
            &registry,
            &record,
            executor.artifacts(),
            &args.explorer,
        )
        .await;

        match verification {
            Ok(report) if !report.is_success() => tracing::warn!(
                failures = report.failures(),
                "Some contracts could not be verified, run `nerodex verify` to retry"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "Verification not attempted"),
        }
    }

    Ok(())
}

async fn verify(mut config: DeployConfig, args: &VerifyArgs) -> Result<()> {
    apply_explorer_args(&mut config, &args.explorer);

    let network = config.resolve_network()?;
    let registry = Registry::nero_dex(&config.descriptor_symbol)?;
    let record = load_record(&config.record, &registry)?;
    if record.chain_id() != network.chain_id {
        anyhow::bail!(
            "Deployment record {} belongs to chain {}, not to {} ({})",
            config.record.display(),
            record.chain_id(),
            network.name,
            network.chain_id
        );
    }
    let artifacts = Artifacts::load_hardhat(&config.artifacts)?;

    let report =
        run_verification(&config, &network, &registry, &record, &artifacts, &args.explorer).await?;

    if !report.is_success() {
        anyhow::bail!("{} of {} contracts failed verification", report.failures(), report.len());
    }
    Ok(())
}

fn show(config: &DeployConfig) -> Result<()> {
    let network = config.resolve_network()?;
    let registry = Registry::nero_dex(&config.descriptor_symbol)?;
    let record = load_record(&config.record, &registry)?;

    println!("{}", report::record_table(&record, &registry, &network));
    Ok(())
}

/// Load the persisted record and check it was written for this registry.
fn load_record(path: &Path, registry: &Registry) -> Result<DeploymentRecord> {
    let record = RecordStore::load(path)?.with_context(|| {
        format!(
            "No deployment record at {}, run `nerodex deploy` first",
            path.display()
        )
    })?;

    if record.registry_fingerprint() != registry.fingerprint() {
        anyhow::bail!(
            "Deployment record {} was written for a different set of contracts (pass the --symbol used at deployment)",
            path.display()
        );
    }
    Ok(record)
}

async fn run_verification(
    config: &DeployConfig,
    network: &NetworkConfig,
    registry: &Registry,
    record: &DeploymentRecord,
    artifacts: &Artifacts,
    args: &ExplorerArgs,
) -> Result<VerificationReport> {
    let explorer = network
        .explorer
        .as_ref()
        .with_context(|| format!("Network {} has no block explorer configured", network.name))?;

    let mut service = EtherscanVerifier::new(explorer)?;
    if let Some(api_key) = &args.api_key {
        service = service.with_api_key(api_key);
    }

    let report = VerificationDriver::new(config.verify_concurrency, config.verify_timeout())
        .run(registry, record, artifacts, &service)
        .await;

    println!("{}", report::verification_table(&report));
    Ok(report)
}
