//! Failure taxonomy for deployment runs.

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::B256;
use thiserror::Error;

/// Fatal errors raised by the registry, the executor and the record store.
///
/// Configuration and persistence errors abort before any further side effect.
/// Transaction errors abort the remaining sequence but leave every previously
/// persisted entry in place so the run can be resumed.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The registry, the overrides or the persisted record are inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A unit references another unit that has no address yet.
    #[error("unit `{unit}` depends on `{dependency}`, which has not been deployed")]
    DependencyUnsatisfied { unit: String, dependency: String },

    /// The network rejected, reverted or never confirmed a deployment.
    #[error("deployment of `{unit}` failed: {source}")]
    Transaction {
        unit: String,
        #[source]
        source: TransactionError,
    },

    /// The deployment record could not be read or written.
    #[error("deployment record at {} is not usable: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },
}

impl DeployError {
    /// The unit the error is attributed to, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::DependencyUnsatisfied { unit, .. } | Self::Transaction { unit, .. } => Some(unit),
            Self::Configuration(_) | Self::Persistence { .. } => None,
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Why a single contract-creation transaction did not produce an address.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The node refused the transaction (bad nonce, insufficient funds, failed estimate...).
    #[error("rejected by the node: {0}")]
    Rejected(String),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("transaction {tx_hash} was mined without a contract address")]
    MissingContractAddress { tx_hash: B256 },

    /// No receipt within the configured confirmation timeout.
    #[error("not confirmed within {0:?}")]
    Timeout(Duration),
}
