//! nerodex-deploy - Deployment and verification pipeline for the NERO DEX contracts.
//!
//! A [`Registry`] describes the contracts and how their constructor arguments
//! depend on each other. The [`Executor`] deploys them one at a time through a
//! [`ChainClient`], persisting every confirmed address to the deployment record
//! ([`RecordStore`]). The [`VerificationDriver`] later replays that record
//! against a [`VerificationService`] such as [`EtherscanVerifier`].

pub use alloy_core::primitives::{Address, Bytes, U256};
pub use alloy_signer_local::PrivateKeySigner;

pub mod abi;
pub use abi::{ArgValue, creation_code, encode_constructor_args};

mod artifacts;
pub use artifacts::{Artifact, Artifacts, SourceMetadata};

mod chain;
pub use chain::{ChainClient, PendingDeployment, RpcChainClient};

mod config;
pub use config::{
    CONFIG_FILENAME, DEFAULT_NETWORK, DeployConfig, ExplorerConfig, NetworkConfig, NetworkPreset,
};

mod error;
pub use error::{DeployError, TransactionError};

mod executor;
pub use executor::{Executor, Overrides};

mod fs;

mod record;
pub use record::{DEFAULT_RECORD_FILENAME, DeploymentRecord, RecordEntry, RecordStore};

mod registry;
pub use registry::{ArgSpec, DEFAULT_NATIVE_SYMBOL, Registry, RegistryBuilder, UnitSpec, units};

pub mod rpc;
pub mod tx;

pub mod verify;
pub use verify::{
    EtherscanVerifier, ServiceResponse, VerificationDriver, VerificationError,
    VerificationOutcome, VerificationReport, VerificationRequest, VerificationService,
};
