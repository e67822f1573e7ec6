//! Sequential deployment of a registry, persisting the record after every unit.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use alloy_core::primitives::Address;
use alloy_signer_local::PrivateKeySigner;

use crate::{
    ArgSpec, ArgValue, Artifacts, ChainClient, DeployError, DeploymentRecord, RecordStore,
    Registry, TransactionError, UnitSpec, abi,
};

/// Values supplied by the operator instead of being produced by the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Existing contract addresses, by unit name.
    pub units: BTreeMap<String, Address>,
    /// Values for [`ArgSpec::External`] arguments, by key.
    pub externals: BTreeMap<String, ArgValue>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(mut self, name: impl Into<String>, address: Address) -> Self {
        self.units.insert(name.into(), address);
        self
    }

    pub fn external(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.externals.insert(key.into(), value.into());
        self
    }

    /// Every address of a previous record, to replay it without deploying.
    pub fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            units: record
                .entries()
                .iter()
                .map(|entry| (entry.unit.clone(), entry.address))
                .collect(),
            externals: BTreeMap::new(),
        }
    }
}

/// Deploys the units of a registry one at a time, in order.
///
/// After each unit is confirmed its address is appended to the record and the
/// record is saved before the next unit starts. Units already present in the
/// persisted record are treated as done, which makes an interrupted run
/// resumable by simply running it again.
pub struct Executor<C> {
    chain: C,
    artifacts: Artifacts,
    record_path: PathBuf,
    confirmation_timeout: Duration,
}

impl<C: ChainClient> Executor<C> {
    pub fn new(
        chain: C,
        artifacts: Artifacts,
        record_path: impl Into<PathBuf>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            artifacts,
            record_path: record_path.into(),
            confirmation_timeout,
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Deploy every unit of `registry` that is neither overridden nor already recorded.
    ///
    /// Returns the complete record. On error, the persisted record holds every
    /// unit confirmed before the failure.
    pub async fn run(
        &self,
        registry: &Registry,
        overrides: &Overrides,
        signer: &PrivateKeySigner,
    ) -> Result<DeploymentRecord, DeployError> {
        Self::preflight(registry, overrides)?;

        let chain_id = self.chain.chain_id().await.map_err(|e| {
            DeployError::configuration(format!("cannot reach the chain: {e:#}"))
        })?;

        let mut store = RecordStore::open(&self.record_path, chain_id, registry.fingerprint())?;
        self.check_against_record(registry, overrides, store.record())?;

        tracing::info!(
            chain_id,
            deployer = %signer.address(),
            units = registry.len(),
            recorded = store.record().len(),
            record = %store.path().display(),
            "Starting deployment"
        );

        let mut deployed = 0usize;
        for unit in registry.iter() {
            if let Some(entry) = store.record().get(&unit.name) {
                tracing::info!(unit = %unit.name, address = %entry.address, "Already deployed, skipping");
                continue;
            }

            let args = resolve_args(unit, store.record(), overrides)?;

            let address = match overrides.units.get(&unit.name) {
                Some(address) => {
                    tracing::info!(unit = %unit.name, %address, "Using existing contract");
                    *address
                }
                None => {
                    let address = self.deploy_unit(unit, &args, signer).await?;
                    deployed += 1;
                    address
                }
            };

            store.append(&unit.name, &unit.contract, address, args)?;
            store.save()?;
        }

        tracing::info!(deployed, total = store.record().len(), "Deployment complete");
        Ok(store.into_record())
    }

    /// Checks that need neither the network nor the persisted record.
    fn preflight(registry: &Registry, overrides: &Overrides) -> Result<(), DeployError> {
        for (name, address) in &overrides.units {
            let Some(unit) = registry.get(name) else {
                return Err(DeployError::configuration(format!(
                    "override for unknown unit `{name}`"
                )));
            };
            if !unit.overridable {
                return Err(DeployError::configuration(format!(
                    "unit `{name}` must be freshly deployed and cannot use {address}"
                )));
            }
        }

        Ok(())
    }

    /// Checks against the resumed record, before the first transaction.
    fn check_against_record(
        &self,
        registry: &Registry,
        overrides: &Overrides,
        record: &DeploymentRecord,
    ) -> Result<(), DeployError> {
        for (name, address) in &overrides.units {
            if let Some(recorded) = record.address(name) {
                if recorded != *address {
                    return Err(DeployError::configuration(format!(
                        "override {address} for `{name}` disagrees with recorded address {recorded}"
                    )));
                }
            }
        }

        // Overridden units still resolve their arguments, only recorded ones are done.
        let pending: Vec<&UnitSpec> = registry
            .iter()
            .filter(|unit| !record.contains(&unit.name))
            .collect();

        for key in registry.externals() {
            let needed_by = pending.iter().find(|unit| {
                unit.args
                    .iter()
                    .any(|arg| matches!(arg, ArgSpec::External(external) if external == key))
            });
            if let Some(unit) = needed_by {
                if !overrides.externals.contains_key(key) {
                    return Err(DeployError::configuration(format!(
                        "no value supplied for external `{key}` of `{}`",
                        unit.name
                    )));
                }
            }
        }

        let missing: Vec<_> = pending
            .iter()
            .filter(|unit| !overrides.units.contains_key(&unit.name))
            .filter(|unit| !self.artifacts.contains(&unit.contract))
            .map(|unit| format!("{} ({})", unit.name, unit.contract))
            .collect();

        if !missing.is_empty() {
            return Err(DeployError::configuration(format!(
                "no compiled artifact for: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    async fn deploy_unit(
        &self,
        unit: &UnitSpec,
        args: &[ArgValue],
        signer: &PrivateKeySigner,
    ) -> Result<Address, DeployError> {
        let artifact = self.artifacts.get(&unit.contract).ok_or_else(|| {
            DeployError::configuration(format!("no compiled artifact for {}", unit.contract))
        })?;

        tracing::info!(unit = %unit.name, contract = %unit.contract, "Deploying...");

        let transaction_error = |source: TransactionError| DeployError::Transaction {
            unit: unit.name.clone(),
            source,
        };

        let init_code = abi::creation_code(&artifact.bytecode, args);
        let pending = self
            .chain
            .submit_deployment(signer, init_code)
            .await
            .map_err(transaction_error)?;

        tracing::debug!(unit = %unit.name, tx_hash = %pending.tx_hash, "Creation transaction sent");

        let address =
            match tokio::time::timeout(self.confirmation_timeout, self.chain.confirm_deployment(pending))
                .await
            {
                Ok(result) => result.map_err(transaction_error)?,
                Err(_) => {
                    tracing::warn!(
                        unit = %unit.name,
                        tx_hash = %pending.tx_hash,
                        "No confirmation in time; if the transaction is mined later, pass its contract as an override"
                    );
                    return Err(transaction_error(TransactionError::Timeout(
                        self.confirmation_timeout,
                    )));
                }
            };

        tracing::info!(unit = %unit.name, %address, tx_hash = %pending.tx_hash, "Deployed");
        Ok(address)
    }
}

/// Resolve a unit's constructor arguments against the record built so far.
fn resolve_args(
    unit: &UnitSpec,
    record: &DeploymentRecord,
    overrides: &Overrides,
) -> Result<Vec<ArgValue>, DeployError> {
    unit.args
        .iter()
        .map(|arg| match arg {
            ArgSpec::Literal(value) => Ok(value.clone()),
            ArgSpec::Unit(dependency) => record.address(dependency).map(ArgValue::Address).ok_or_else(
                || DeployError::DependencyUnsatisfied {
                    unit: unit.name.clone(),
                    dependency: dependency.clone(),
                },
            ),
            ArgSpec::External(key) => overrides.externals.get(key).cloned().ok_or_else(|| {
                DeployError::configuration(format!(
                    "no value supplied for external `{key}` of `{}`",
                    unit.name
                ))
            }),
        })
        .collect()
}
