//! End-to-end tests of the deploy → record → verify pipeline.
//!
//! The chain and the verification service are in-process fakes; the deployment
//! record goes through the real file-backed store, and verification only ever
//! sees what was persisted.
//! Run with: cargo test --test pipeline

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{B256, keccak256};
use nerodex_deploy::{
    Address, Artifact, Artifacts, Bytes, ChainClient, DeployError, Executor, Overrides,
    PendingDeployment, PrivateKeySigner, RecordStore, Registry, ServiceResponse, SourceMetadata,
    TransactionError, VerificationDriver, VerificationOutcome, VerificationRequest,
    VerificationService, encode_constructor_args, units,
};
use tempdir::TempDir;

const CHAIN_ID: u64 = 1002;

const CONTRACTS: [&str; 6] = [
    "WETH9",
    "NeroDEXFactory",
    "NonfungibleTokenPositionDescriptor",
    "NeroPositionManager",
    "NeroDEXRouter",
    "Quoter",
];

/// A chain that mines instantly and remembers the init code of every contract.
#[derive(Default)]
struct InMemoryChain {
    /// Fail every submission from this index on (0-based), simulating a crash.
    fail_from: Option<usize>,
    submissions: AtomicUsize,
    pending: Mutex<BTreeMap<B256, Bytes>>,
}

impl InMemoryChain {
    fn failing_from(index: usize) -> Self {
        Self {
            fail_from: Some(index),
            ..Default::default()
        }
    }

    fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl ChainClient for InMemoryChain {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(CHAIN_ID)
    }

    async fn submit_deployment(
        &self,
        _signer: &PrivateKeySigner,
        init_code: Bytes,
    ) -> Result<PendingDeployment, TransactionError> {
        let index = self.submissions.load(Ordering::SeqCst);
        if self.fail_from.is_some_and(|from| index >= from) {
            return Err(TransactionError::Rejected("connection reset".to_string()));
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let tx_hash = keccak256([init_code.as_ref(), &index.to_be_bytes()[..]].concat());
        self.pending.lock().unwrap().insert(tx_hash, init_code);
        Ok(PendingDeployment { tx_hash })
    }

    async fn confirm_deployment(
        &self,
        pending: PendingDeployment,
    ) -> Result<Address, TransactionError> {
        match self.pending.lock().unwrap().remove(&pending.tx_hash) {
            Some(_) => Ok(Address::from_word(pending.tx_hash)),
            None => Err(TransactionError::MissingContractAddress {
                tx_hash: pending.tx_hash,
            }),
        }
    }
}

/// Verifies everything except the units it is told to reject.
#[derive(Default)]
struct FakeExplorer {
    reject: Vec<String>,
    verified: Mutex<BTreeMap<Address, Bytes>>,
}

impl VerificationService for FakeExplorer {
    async fn verify(&self, request: &VerificationRequest) -> ServiceResponse {
        if self.reject.contains(&request.unit) {
            return ServiceResponse::Rejected("Fail - Unable to verify".to_string());
        }

        let mut verified = self.verified.lock().unwrap();
        if verified.contains_key(&request.address) {
            return ServiceResponse::AlreadyVerified;
        }
        verified.insert(request.address, request.constructor_args.clone());
        ServiceResponse::Verified
    }
}

/// Test setup: a temporary directory holding the deployment record.
struct TestContext {
    _dir: TempDir,
    record_path: PathBuf,
    registry: Registry,
    signer: PrivateKeySigner,
}

impl TestContext {
    fn new() -> Self {
        let dir = TempDir::new("nerodex-pipeline").expect("Failed to create temp dir");
        let record_path = dir.path().join("out").join("deployments.json");

        Self {
            _dir: dir,
            record_path,
            registry: Registry::nero_dex("NERO").expect("NERO DEX registry must be valid"),
            signer: PrivateKeySigner::random(),
        }
    }

    fn artifacts() -> Artifacts {
        CONTRACTS
            .iter()
            .enumerate()
            .map(|(i, name)| Artifact {
                contract_name: name.to_string(),
                bytecode: Bytes::from(vec![0x60, 0x80, i as u8]),
                source: Some(SourceMetadata {
                    source_name: format!("contracts/{name}.sol"),
                    contract_name: name.to_string(),
                    compiler_version: "0.7.6+commit.7338295f".to_string(),
                    standard_json: serde_json::json!({ "language": "Solidity" }),
                }),
            })
            .collect()
    }

    fn executor(&self, chain: InMemoryChain) -> Executor<InMemoryChain> {
        Executor::new(
            chain,
            Self::artifacts(),
            self.record_path.clone(),
            Duration::from_secs(5),
        )
    }

    async fn verify(&self, explorer: &FakeExplorer) -> nerodex_deploy::VerificationReport {
        let record = RecordStore::load(&self.record_path)
            .expect("Record must be readable")
            .expect("Record must exist");

        VerificationDriver::new(2, Duration::from_secs(5))
            .run(&self.registry, &record, &Self::artifacts(), explorer)
            .await
    }
}

#[tokio::test]
async fn test_deploy_then_verify_from_persisted_record() {
    let ctx = TestContext::new();

    let record = ctx
        .executor(InMemoryChain::default())
        .run(&ctx.registry, &Overrides::new(), &ctx.signer)
        .await
        .expect("Deployment should succeed");
    assert_eq!(record.len(), 6);
    assert_eq!(record.chain_id(), CHAIN_ID);

    let explorer = FakeExplorer::default();
    let report = ctx.verify(&explorer).await;

    assert!(report.is_success());
    for (unit, outcome) in report.iter() {
        assert_eq!(outcome, &VerificationOutcome::Verified, "unit {unit}");
    }

    // The explorer received exactly the arguments the constructors were given.
    let verified = explorer.verified.lock().unwrap();
    let manager = record.get(units::POSITION_MANAGER).unwrap();
    assert_eq!(
        verified[&manager.address],
        encode_constructor_args(&manager.args)
    );
    assert_eq!(manager.args.len(), 3);
}

#[tokio::test]
async fn test_interrupted_run_resumes_where_it_stopped() {
    let ctx = TestContext::new();

    let crashed = ctx.executor(InMemoryChain::failing_from(4));
    let err = crashed
        .run(&ctx.registry, &Overrides::new(), &ctx.signer)
        .await
        .expect_err("Fifth deployment must fail");
    assert_eq!(err.unit(), Some(units::ROUTER));
    assert!(matches!(err, DeployError::Transaction { .. }));

    let partial = RecordStore::load(&ctx.record_path).unwrap().unwrap();
    assert_eq!(partial.len(), 4);

    // Verification of a partial record skips what is missing.
    let report = ctx.verify(&FakeExplorer::default()).await;
    assert_eq!(report.get(units::ROUTER), Some(&VerificationOutcome::Skipped));
    assert_eq!(report.get(units::QUOTER), Some(&VerificationOutcome::Skipped));
    assert_eq!(report.get(units::FACTORY), Some(&VerificationOutcome::Verified));

    let resumed = ctx.executor(InMemoryChain::default());
    let record = resumed
        .run(&ctx.registry, &Overrides::new(), &ctx.signer)
        .await
        .expect("Resumed deployment should succeed");

    assert_eq!(resumed.chain().submissions(), 2);
    assert_eq!(record.len(), 6);
    assert_eq!(&record.entries()[..4], partial.entries());
}

#[tokio::test]
async fn test_completed_run_is_idempotent() {
    let ctx = TestContext::new();

    let first = ctx
        .executor(InMemoryChain::default())
        .run(&ctx.registry, &Overrides::new(), &ctx.signer)
        .await
        .unwrap();

    let again = ctx.executor(InMemoryChain::default());
    let second = again
        .run(&ctx.registry, &Overrides::new(), &ctx.signer)
        .await
        .unwrap();

    assert_eq!(again.chain().submissions(), 0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_verification_failures_are_reported_per_unit() {
    let ctx = TestContext::new();
    let weth = Address::with_last_byte(0xee);

    ctx.executor(InMemoryChain::default())
        .run(
            &ctx.registry,
            &Overrides::new().unit(units::WETH9, weth),
            &ctx.signer,
        )
        .await
        .unwrap();

    let explorer = FakeExplorer {
        reject: vec![units::QUOTER.to_string()],
        ..Default::default()
    };
    explorer
        .verified
        .lock()
        .unwrap()
        .insert(weth, Bytes::new());

    let report = ctx.verify(&explorer).await;

    assert_eq!(report.get(units::WETH9), Some(&VerificationOutcome::AlreadyVerified));
    assert!(report.get(units::QUOTER).is_some_and(|o| o.is_failure()));
    assert_eq!(report.get(units::ROUTER), Some(&VerificationOutcome::Verified));
    assert_eq!(report.failures(), 1);
}

#[tokio::test]
async fn test_record_from_another_chain_is_refused() {
    let ctx = TestContext::new();

    let mut store = RecordStore::open(ctx.record_path.clone(), 1, ctx.registry.fingerprint()).unwrap();
    store
        .append(units::WETH9, "WETH9", Address::with_last_byte(1), vec![])
        .unwrap();
    store.save().unwrap();

    let executor = ctx.executor(InMemoryChain::default());
    let err = executor
        .run(&ctx.registry, &Overrides::new(), &ctx.signer)
        .await
        .expect_err("Chain mismatch must be refused");

    assert!(matches!(err, DeployError::Configuration(_)));
    assert_eq!(executor.chain().submissions(), 0);
}
