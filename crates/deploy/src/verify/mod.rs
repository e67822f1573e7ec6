//! Source verification of the units of a deployment record.
//!
//! Each unit is verified independently: one unit failing, timing out or being
//! rejected never prevents the others from being attempted. Outcomes are
//! aggregated into a [`VerificationReport`] and are not persisted.

mod etherscan;

pub use etherscan::EtherscanVerifier;

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use futures::{StreamExt, stream};
use thiserror::Error;

use crate::{Artifacts, DeploymentRecord, Registry, SourceMetadata, abi};

/// Everything a verification service needs about one deployed unit.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub unit: String,
    pub address: Address,
    /// ABI-encoded constructor arguments, exactly as deployed.
    pub constructor_args: Bytes,
    pub source: SourceMetadata,
}

/// Answer of a verification service to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResponse {
    Verified,
    AlreadyVerified,
    /// The service refused the submission, e.g. bytecode mismatch.
    Rejected(String),
    /// The service could not be reached or did not give a usable answer.
    Unreachable(String),
}

/// An external source verification service.
pub trait VerificationService: Send + Sync {
    fn verify(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = ServiceResponse> + Send;
}

/// Why a unit could not be verified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("rejected by the verification service: {0}")]
    Rejected(String),

    #[error("verification service unreachable: {0}")]
    Unreachable(String),

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    /// No compiler input is available for the unit's contract.
    #[error("no source metadata for contract {0}")]
    MissingSource(String),
}

/// Per-unit result of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum VerificationOutcome {
    #[display("verified")]
    Verified,
    #[display("already verified")]
    AlreadyVerified,
    #[display("failed: {_0}")]
    Failed(VerificationError),
    /// The unit has no address in the record.
    #[display("skipped (not deployed)")]
    Skipped,
}

impl VerificationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<ServiceResponse> for VerificationOutcome {
    fn from(response: ServiceResponse) -> Self {
        match response {
            ServiceResponse::Verified => Self::Verified,
            ServiceResponse::AlreadyVerified => Self::AlreadyVerified,
            ServiceResponse::Rejected(reason) => Self::Failed(VerificationError::Rejected(reason)),
            ServiceResponse::Unreachable(reason) => {
                Self::Failed(VerificationError::Unreachable(reason))
            }
        }
    }
}

/// Outcomes of a verification run, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    outcomes: Vec<(String, VerificationOutcome)>,
}

impl VerificationReport {
    pub fn get(&self, unit: &str) -> Option<&VerificationOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == unit)
            .map(|(_, outcome)| outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VerificationOutcome)> {
        self.outcomes
            .iter()
            .map(|(name, outcome)| (name.as_str(), outcome))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// `true` unless some unit failed. Skipped units do not count as failures.
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|(_, outcome)| outcome.is_failure())
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .count()
    }
}

/// Drives a [`VerificationService`] over a deployment record.
#[derive(Debug, Clone, Copy)]
pub struct VerificationDriver {
    concurrency: usize,
    timeout: Duration,
}

impl Default for VerificationDriver {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(120),
        }
    }
}

impl VerificationDriver {
    /// `concurrency` bounds in-flight requests; `timeout` bounds each unit.
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Verify every unit with an address in `record`.
    ///
    /// Units of `registry` missing from the record are reported as skipped.
    pub async fn run<S: VerificationService>(
        &self,
        registry: &Registry,
        record: &DeploymentRecord,
        artifacts: &Artifacts,
        service: &S,
    ) -> VerificationReport {
        // Registry units first, then any recorded unit the registry no longer names.
        let extra = record
            .entries()
            .iter()
            .map(|entry| entry.unit.as_str())
            .filter(|unit| !registry.contains(unit));
        let names: Vec<&str> = registry
            .iter()
            .map(|unit| unit.name.as_str())
            .chain(extra)
            .collect();

        let mut pending = Vec::new();
        let mut outcomes: Vec<(String, Option<VerificationOutcome>)> = Vec::new();

        for (index, name) in names.into_iter().enumerate() {
            let Some(entry) = record.get(name) else {
                tracing::info!(unit = %name, "Not deployed, skipping verification");
                outcomes.push((name.to_string(), Some(VerificationOutcome::Skipped)));
                continue;
            };

            let source = artifacts
                .get(&entry.contract)
                .and_then(|artifact| artifact.source.clone());
            let Some(source) = source else {
                tracing::warn!(unit = %entry.unit, contract = %entry.contract, "No source metadata");
                outcomes.push((
                    entry.unit.clone(),
                    Some(VerificationOutcome::Failed(VerificationError::MissingSource(
                        entry.contract.clone(),
                    ))),
                ));
                continue;
            };

            outcomes.push((entry.unit.clone(), None));
            pending.push((
                index,
                VerificationRequest {
                    unit: entry.unit.clone(),
                    address: entry.address,
                    constructor_args: abi::encode_constructor_args(&entry.args),
                    source,
                },
            ));
        }

        tracing::info!(
            units = pending.len(),
            concurrency = self.concurrency,
            "Starting verification"
        );

        let finished: Vec<(usize, VerificationOutcome)> = stream::iter(pending)
            .map(|(index, request)| async move { (index, self.verify_unit(service, request).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (index, outcome) in finished {
            outcomes[index].1 = Some(outcome);
        }

        VerificationReport {
            outcomes: outcomes
                .into_iter()
                .filter_map(|(name, outcome)| outcome.map(|outcome| (name, outcome)))
                .collect(),
        }
    }

    async fn verify_unit<S: VerificationService>(
        &self,
        service: &S,
        request: VerificationRequest,
    ) -> VerificationOutcome {
        tracing::info!(unit = %request.unit, address = %request.address, "Verifying...");

        let outcome = match tokio::time::timeout(self.timeout, service.verify(&request)).await {
            Ok(response) => VerificationOutcome::from(response),
            Err(_) => VerificationOutcome::Failed(VerificationError::Timeout(self.timeout)),
        };

        match &outcome {
            VerificationOutcome::Failed(err) => {
                tracing::warn!(unit = %request.unit, error = %err, "Verification failed")
            }
            outcome => tracing::info!(unit = %request.unit, %outcome, "Verification done"),
        }

        outcome
    }
}
