//! Compiled contract artifacts: creation bytecode and verification metadata.
//!
//! The loader reads a Hardhat `artifacts/` directory. Every `<Name>.json`
//! artifact provides `contractName`, `sourceName` and `bytecode`; its sibling
//! `<Name>.dbg.json` points at the `build-info/<id>.json` file holding the
//! compiler version and the standard-JSON input used for verification.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Bytes;
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

/// What a block explorer needs to rebuild a contract from source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    /// Source file path as seen by the compiler, e.g. `contracts/WETH9.sol`.
    pub source_name: String,
    pub contract_name: String,
    /// Full compiler version, e.g. `0.7.6+commit.7338295f`.
    pub compiler_version: String,
    /// Solidity standard-JSON compiler input.
    pub standard_json: Value,
}

impl SourceMetadata {
    /// `<source>:<contract>`, the name explorers expect.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub contract_name: String,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    /// Absent for artifacts built outside of a Hardhat project.
    pub source: Option<SourceMetadata>,
}

/// Artifacts indexed by contract name.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    by_name: BTreeMap<String, Artifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    source_name: String,
    bytecode: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatDebugFile {
    build_info: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatBuildInfo {
    solc_long_version: String,
    input: Value,
}

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.by_name.insert(artifact.contract_name.clone(), artifact);
    }

    pub fn get(&self, contract: &str) -> Option<&Artifact> {
        self.by_name.get(contract)
    }

    pub fn contains(&self, contract: &str) -> bool {
        self.by_name.contains_key(contract)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Load every deployable artifact under a Hardhat `artifacts/` directory.
    ///
    /// Interfaces and abstract contracts (empty bytecode) are skipped. When two
    /// sources define the same contract name the first one found wins.
    pub fn load_hardhat(dir: &Path) -> anyhow::Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("Artifacts directory not found: {}", dir.display());
        }

        let mut files = Vec::new();
        collect_artifact_files(dir, &mut files)?;
        files.sort();

        let mut artifacts = Self::new();
        let mut build_infos: BTreeMap<PathBuf, HardhatBuildInfo> = BTreeMap::new();

        for path in files {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let Ok(artifact) = serde_json::from_str::<HardhatArtifact>(&content) else {
                tracing::trace!(path = %path.display(), "Not a contract artifact, skipping");
                continue;
            };

            if artifact.bytecode.is_empty() {
                continue;
            }

            if artifacts.contains(&artifact.contract_name) {
                tracing::warn!(
                    contract = %artifact.contract_name,
                    path = %path.display(),
                    "Duplicate contract name, keeping the first artifact"
                );
                continue;
            }

            let source = load_source_metadata(&path, &artifact, &mut build_infos)?;
            if source.is_none() {
                tracing::debug!(contract = %artifact.contract_name, "No build info for artifact");
            }

            artifacts.insert(Artifact {
                contract_name: artifact.contract_name,
                bytecode: artifact.bytecode,
                source,
            });
        }

        tracing::info!(dir = %dir.display(), count = artifacts.len(), "Contract artifacts loaded");
        Ok(artifacts)
    }
}

impl FromIterator<Artifact> for Artifacts {
    fn from_iter<I: IntoIterator<Item = Artifact>>(iter: I) -> Self {
        let mut artifacts = Self::new();
        for artifact in iter {
            artifacts.insert(artifact);
        }
        artifacts
    }
}

/// Recursively collect `*.json` artifact files, skipping `build-info/` and debug files.
fn collect_artifact_files(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;

    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        if path.is_dir() {
            if name != "build-info" {
                collect_artifact_files(&path, files)?;
            }
        } else if name.ends_with(".json") && !name.ends_with(".dbg.json") {
            files.push(path);
        }
    }

    Ok(())
}

fn load_source_metadata(
    artifact_path: &Path,
    artifact: &HardhatArtifact,
    build_infos: &mut BTreeMap<PathBuf, HardhatBuildInfo>,
) -> anyhow::Result<Option<SourceMetadata>> {
    let debug_path = artifact_path.with_extension("dbg.json");
    if !debug_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&debug_path)
        .with_context(|| format!("Failed to read {}", debug_path.display()))?;
    let debug: HardhatDebugFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", debug_path.display()))?;

    let base = debug_path.parent().unwrap_or(Path::new("."));
    let build_info_path = base.join(&debug.build_info);

    if !build_infos.contains_key(&build_info_path) {
        let content = std::fs::read_to_string(&build_info_path)
            .with_context(|| format!("Failed to read {}", build_info_path.display()))?;
        let build_info: HardhatBuildInfo = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", build_info_path.display()))?;
        build_infos.insert(build_info_path.clone(), build_info);
    }

    let Some(build_info) = build_infos.get(&build_info_path) else {
        return Ok(None);
    };

    Ok(Some(SourceMetadata {
        source_name: artifact.source_name.clone(),
        contract_name: artifact.contract_name.clone(),
        compiler_version: build_info.solc_long_version.clone(),
        standard_json: build_info.input.clone(),
    }))
}
