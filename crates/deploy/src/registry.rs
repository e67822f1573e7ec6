//! Static description of the contracts to deploy and their construction dependencies.
//!
//! A [`Registry`] is built once, validated without touching the network, and
//! then enumerated in dependency order: every unit appears after all the units
//! its constructor arguments reference.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ArgValue, DeployError};

/// Unit names of the NERO DEX deployment.
///
/// These are also the keys of the persisted deployment record.
pub mod units {
    pub const WETH9: &str = "WETH9";
    pub const FACTORY: &str = "factory";
    pub const TOKEN_DESCRIPTOR: &str = "tokenDescriptor";
    pub const POSITION_MANAGER: &str = "positionManager";
    pub const ROUTER: &str = "router";
    pub const QUOTER: &str = "quoter";
}

/// Default display symbol of the native asset, passed to the token descriptor.
pub const DEFAULT_NATIVE_SYMBOL: &str = "NERO";

/// How a single constructor argument is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSpec {
    /// A fixed value.
    Literal(ArgValue),
    /// The address of another unit of the same registry.
    Unit(String),
    /// A value supplied by the operator at run time.
    External(String),
}

/// One deployable contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Name of the unit, unique within a registry.
    pub name: String,
    /// Name of the compiled contract artifact.
    pub contract: String,
    /// Constructor arguments, in order.
    pub args: Vec<ArgSpec>,
    /// Whether an externally supplied address may stand in for a fresh deployment.
    pub overridable: bool,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: contract.into(),
            args: Vec::new(),
            overridable: true,
        }
    }

    /// Append the address of another unit as the next constructor argument.
    pub fn unit_arg(mut self, unit: impl Into<String>) -> Self {
        self.args.push(ArgSpec::Unit(unit.into()));
        self
    }

    pub fn literal_arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.args.push(ArgSpec::Literal(value.into()));
        self
    }

    pub fn external_arg(mut self, key: impl Into<String>) -> Self {
        self.args.push(ArgSpec::External(key.into()));
        self
    }

    /// Always deploy this unit, refusing any override address.
    pub fn fresh_only(mut self) -> Self {
        self.overridable = false;
        self
    }

    /// Names of the units this unit's constructor depends on.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            ArgSpec::Unit(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// A validated, topologically ordered set of units.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Deref)]
pub struct Registry {
    #[deref]
    units: Vec<UnitSpec>,
    externals: BTreeSet<String>,
    fingerprint: String,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The NERO DEX protocol: wrapped native token, factory, token descriptor,
    /// position manager, router and quoter.
    pub fn nero_dex(native_symbol: &str) -> Result<Self, DeployError> {
        use units::*;

        Self::builder()
            .unit(UnitSpec::new(WETH9, "WETH9"))
            .unit(UnitSpec::new(FACTORY, "NeroDEXFactory"))
            .unit(
                UnitSpec::new(TOKEN_DESCRIPTOR, "NonfungibleTokenPositionDescriptor")
                    .unit_arg(WETH9)
                    .literal_arg(native_symbol),
            )
            .unit(
                UnitSpec::new(POSITION_MANAGER, "NeroPositionManager")
                    .unit_arg(FACTORY)
                    .unit_arg(WETH9)
                    .unit_arg(TOKEN_DESCRIPTOR),
            )
            .unit(
                UnitSpec::new(ROUTER, "NeroDEXRouter")
                    .unit_arg(FACTORY)
                    .unit_arg(WETH9),
            )
            .unit(UnitSpec::new(QUOTER, "Quoter").unit_arg(FACTORY).unit_arg(WETH9))
            .build()
    }

    pub fn get(&self, name: &str) -> Option<&UnitSpec> {
        self.units.iter().find(|unit| unit.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// External value keys the units may reference.
    pub fn externals(&self) -> &BTreeSet<String> {
        &self.externals
    }

    /// SHA-256 of the unit descriptors, used to detect a registry that changed
    /// between a run and its resume.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Collects unit descriptors and validates them into a [`Registry`].
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    units: Vec<UnitSpec>,
    externals: BTreeSet<String>,
}

impl RegistryBuilder {
    pub fn unit(mut self, unit: UnitSpec) -> Self {
        self.units.push(unit);
        self
    }

    /// Declare an external value key that units may reference.
    pub fn external(mut self, key: impl Into<String>) -> Self {
        self.externals.insert(key.into());
        self
    }

    /// Validate the descriptors and order them by dependency.
    ///
    /// Fails on duplicate names, references to unknown units or undeclared
    /// external keys, and dependency cycles. Units without ordering constraints
    /// keep the order in which they were added.
    pub fn build(self) -> Result<Registry, DeployError> {
        let mut seen = BTreeSet::new();
        for unit in &self.units {
            if !seen.insert(unit.name.as_str()) {
                return Err(DeployError::configuration(format!(
                    "unit `{}` is declared more than once",
                    unit.name
                )));
            }
        }

        for unit in &self.units {
            for arg in &unit.args {
                match arg {
                    ArgSpec::Unit(dep) if !seen.contains(dep.as_str()) => {
                        return Err(DeployError::configuration(format!(
                            "unit `{}` references unknown unit `{}`",
                            unit.name, dep
                        )));
                    }
                    ArgSpec::External(key) if !self.externals.contains(key) => {
                        return Err(DeployError::configuration(format!(
                            "unit `{}` references undeclared external value `{}`",
                            unit.name, key
                        )));
                    }
                    _ => {}
                }
            }
        }

        let units = topological_order(self.units)?;
        let fingerprint = fingerprint(&units, &self.externals)?;

        Ok(Registry {
            units,
            externals: self.externals,
            fingerprint,
        })
    }
}

/// Stable Kahn ordering: repeatedly take the first pending unit whose
/// dependencies are all placed.
fn topological_order(mut pending: Vec<UnitSpec>) -> Result<Vec<UnitSpec>, DeployError> {
    let mut ordered: Vec<UnitSpec> = Vec::with_capacity(pending.len());
    let mut placed = BTreeSet::new();

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|unit| unit.dependencies().all(|dep| placed.contains(dep)));

        let Some(index) = ready else {
            let stuck: Vec<_> = pending.iter().map(|unit| unit.name.as_str()).collect();
            return Err(DeployError::configuration(format!(
                "dependency cycle between units: {}",
                stuck.join(", ")
            )));
        };

        let unit = pending.remove(index);
        placed.insert(unit.name.clone());
        ordered.push(unit);
    }

    Ok(ordered)
}

fn fingerprint(units: &[UnitSpec], externals: &BTreeSet<String>) -> Result<String, DeployError> {
    let json = serde_json::to_string(&(units, externals))
        .map_err(|e| DeployError::configuration(format!("unserialisable registry: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
