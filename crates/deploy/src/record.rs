//! Durable, append-only record of deployed addresses.
//!
//! The record is the only channel between a deployment run and a later
//! verification run. It is rewritten atomically after every append, so a
//! crash loses at most the unit that was in flight.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{ArgValue, DeployError, fs::FsHandler};

/// The default file name of the deployment record.
pub const DEFAULT_RECORD_FILENAME: &str = "deployments.json";

/// A deployed (or externally supplied) unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntry {
    /// Registry unit name.
    pub unit: String,
    /// Contract artifact the address was created from.
    pub contract: String,
    pub address: Address,
    /// Resolved constructor arguments, in order.
    #[serde(default)]
    pub args: Vec<ArgValue>,
}

/// Unit name → address mapping in deployment order, plus the identity of the
/// chain and registry it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    chain_id: u64,
    registry_fingerprint: String,
    #[serde(default)]
    units: Vec<RecordEntry>,
}

impl DeploymentRecord {
    pub fn new(chain_id: u64, registry_fingerprint: impl Into<String>) -> Self {
        Self {
            chain_id,
            registry_fingerprint: registry_fingerprint.into(),
            units: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn registry_fingerprint(&self) -> &str {
        &self.registry_fingerprint
    }

    /// Entries in the order they were appended.
    pub fn entries(&self) -> &[RecordEntry] {
        &self.units
    }

    pub fn get(&self, unit: &str) -> Option<&RecordEntry> {
        self.units.iter().find(|entry| entry.unit == unit)
    }

    pub fn address(&self, unit: &str) -> Option<Address> {
        self.get(unit).map(|entry| entry.address)
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.get(unit).is_some()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn push(&mut self, entry: RecordEntry) -> Result<(), DeployError> {
        if self.contains(&entry.unit) {
            return Err(DeployError::configuration(format!(
                "unit `{}` is already recorded at {}",
                entry.unit,
                self.address(&entry.unit).unwrap_or_default()
            )));
        }
        self.units.push(entry);
        Ok(())
    }
}

/// File-backed owner of a [`DeploymentRecord`].
///
/// A single process is expected to write a given record at a time.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    record: DeploymentRecord,
}

impl RecordStore {
    /// Read the record at `path`, or `None` if no record was ever saved there.
    pub fn load(path: &Path) -> Result<Option<DeploymentRecord>, DeployError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| DeployError::persistence(path, e))?;
        let record: DeploymentRecord = serde_json::from_str(&content)
            .map_err(|e| DeployError::persistence(path, format!("malformed record: {e}")))?;

        let mut seen = BTreeSet::new();
        if let Some(duplicate) = record.units.iter().find(|entry| !seen.insert(&entry.unit)) {
            return Err(DeployError::persistence(
                path,
                format!("malformed record: unit `{}` is recorded twice", duplicate.unit),
            ));
        }

        tracing::debug!(path = %path.display(), units = record.len(), "Deployment record loaded");
        Ok(Some(record))
    }

    /// Open the record at `path` for a run on `chain_id` with the given registry.
    ///
    /// An existing record is resumed when it was written for the same chain and
    /// registry; otherwise opening fails. A missing record starts empty and is
    /// only written by the first [`save`](Self::save).
    pub fn open(
        path: impl Into<PathBuf>,
        chain_id: u64,
        registry_fingerprint: &str,
    ) -> Result<Self, DeployError> {
        let path = path.into();

        let record = match Self::load(&path)? {
            Some(record) => {
                if record.chain_id != chain_id {
                    return Err(DeployError::configuration(format!(
                        "record {} belongs to chain {}, but the network reports chain {}",
                        path.display(),
                        record.chain_id,
                        chain_id
                    )));
                }
                if record.registry_fingerprint != registry_fingerprint {
                    return Err(DeployError::configuration(format!(
                        "record {} was written for a different set of units; use a new record path",
                        path.display()
                    )));
                }
                record
            }
            None => DeploymentRecord::new(chain_id, registry_fingerprint),
        };

        Ok(Self { path, record })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    pub fn into_record(self) -> DeploymentRecord {
        self.record
    }

    /// Append an entry in memory. Entries can never be replaced or removed.
    pub fn append(
        &mut self,
        unit: impl Into<String>,
        contract: impl Into<String>,
        address: Address,
        args: Vec<ArgValue>,
    ) -> Result<(), DeployError> {
        self.record.push(RecordEntry {
            unit: unit.into(),
            contract: contract.into(),
            address,
            args,
        })
    }

    /// Durably write the record. Once this returns, a later [`load`](Self::load)
    /// observes every appended entry.
    pub fn save(&self) -> Result<(), DeployError> {
        let json = serde_json::to_string_pretty(&self.record)
            .map_err(|e| DeployError::persistence(&self.path, e))?;

        FsHandler::write_atomic(&self.path, json.as_bytes())
            .map_err(|e| DeployError::persistence(&self.path, format!("{e:#}")))?;

        tracing::debug!(path = %self.path.display(), units = self.record.len(), "Deployment record saved");
        Ok(())
    }
}
