//! Add-on combinations of a deployable architecture: every test case toggles optional add-ons on
//! top of the same base scenario.

use crate::engine::ProvisioningEngine;
use crate::errors::ConfigError;
use crate::plan::ApplyResult;
use crate::scenario::{PREFIX_VAR, ScenarioConfig, ScenarioOverrides};
use crate::string::unique_id;
use crate::suite::{ScenarioSuite, SuiteReport};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use strum_macros::{Display, EnumString};

pub const ADDONS_VAR: &str = "addons";

#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum OfferingFlavor {
    /// Deployed with its own input variables.
    FullyConfigurable,
    /// Only switched on or off.
    Instance,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AddonConfig {
    pub offering_name: String,
    pub flavor: OfferingFlavor,
    pub enabled: bool,
    /// A required add-on stays enabled in every test case.
    pub required: bool,
    pub inputs: BTreeMap<String, Value>,
    /// Offering names this add-on depends on.
    pub dependencies: Vec<String>,
}

impl AddonConfig {
    pub fn new(offering_name: &str, flavor: OfferingFlavor) -> Self {
        AddonConfig {
            offering_name: offering_name.to_string(),
            flavor,
            enabled: false,
            required: false,
            inputs: BTreeMap::new(),
            dependencies: vec![],
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.enabled = true;
        self
    }

    pub fn input<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.inputs.insert(name.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, offering_names: &[&str]) -> Self {
        self.dependencies.extend(offering_names.iter().map(|n| n.to_string()));
        self
    }

    fn to_value(&self) -> Value {
        let mut addon = Map::new();
        addon.insert("flavor".to_string(), Value::String(self.flavor.to_string()));
        addon.insert("enabled".to_string(), Value::Bool(self.enabled));
        if self.flavor == OfferingFlavor::FullyConfigurable {
            addon.insert(
                "inputs".to_string(),
                Value::Object(self.inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            );
        }
        Value::Object(addon)
    }
}

/// Enablement of one add-on in a test case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddonEnablement {
    pub offering_name: String,
    pub flavor: Option<OfferingFlavor>,
    pub enabled: bool,
}

impl AddonEnablement {
    pub fn new(offering_name: &str, enabled: bool) -> Self {
        AddonEnablement {
            offering_name: offering_name.to_string(),
            flavor: None,
            enabled,
        }
    }

    pub fn with_flavor(mut self, flavor: OfferingFlavor) -> Self {
        self.flavor = Some(flavor);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddonTestCase {
    pub name: String,
    pub prefix: String,
    pub enablement: Vec<AddonEnablement>,
}

/// The deployable under test and its add-ons, keyed by offering name.
#[derive(Clone, Debug, PartialEq)]
pub struct AddonDependencyGraph {
    root: AddonConfig,
    addons: Vec<AddonConfig>,
}

impl AddonDependencyGraph {
    pub fn new(root: AddonConfig, addons: Vec<AddonConfig>) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for addon in std::iter::once(&root).chain(addons.iter()) {
            if !names.insert(addon.offering_name.as_str()) {
                return Err(ConfigError::DuplicateAddon(addon.offering_name.clone()));
            }
        }

        if let Some(unknown) = std::iter::once(&root)
            .chain(addons.iter())
            .flat_map(|addon| addon.dependencies.iter())
            .find(|dependency| !names.contains(dependency.as_str()))
        {
            return Err(ConfigError::UnknownAddon(unknown.clone()));
        }

        Ok(AddonDependencyGraph { root, addons })
    }

    pub fn root(&self) -> &AddonConfig {
        &self.root
    }

    pub fn addons(&self) -> &[AddonConfig] {
        &self.addons
    }

    pub fn get(&self, offering_name: &str) -> Option<&AddonConfig> {
        self.addons.iter().find(|a| a.offering_name == offering_name)
    }

    /// A copy of the graph with `enablement` applied. A required add-on cannot be disabled: it is
    /// kept enabled whatever the test case says. Dependencies of the root offering and of every
    /// enabled add-on are enabled as well.
    pub fn with_overrides(&self, enablement: &[AddonEnablement]) -> Result<AddonDependencyGraph, ConfigError> {
        let mut graph = self.clone();

        for toggle in enablement {
            let addon = graph
                .addons
                .iter_mut()
                .find(|a| a.offering_name == toggle.offering_name)
                .ok_or_else(|| ConfigError::UnknownAddon(toggle.offering_name.clone()))?;

            if let Some(flavor) = toggle.flavor {
                addon.flavor = flavor;
            }
            if addon.required && !toggle.enabled {
                warn!(
                    "addon {} is required, it stays enabled despite the test case disabling it",
                    addon.offering_name
                );
                addon.enabled = true;
            } else {
                addon.enabled = toggle.enabled;
            }
        }

        graph.enable_dependencies();
        Ok(graph)
    }

    fn enable_dependencies(&mut self) {
        let mut pending: Vec<String> = self
            .addons
            .iter()
            .filter(|addon| addon.enabled)
            .chain(std::iter::once(&self.root))
            .flat_map(|addon| addon.dependencies.iter().cloned())
            .collect();

        while let Some(name) = pending.pop() {
            let Some(addon) = self.addons.iter_mut().find(|a| a.offering_name == name) else {
                continue;
            };
            if addon.enabled {
                continue;
            }

            warn!("addon {} is enabled as a dependency of an enabled offering", addon.offering_name);
            addon.enabled = true;
            pending.extend(addon.dependencies.iter().cloned());
        }
    }

    /// Inputs of the root offering plus the `addons` map describing every add-on.
    pub fn to_terraform_vars(&self) -> BTreeMap<String, Value> {
        let mut vars = self.root.inputs.clone();
        vars.insert(
            ADDONS_VAR.to_string(),
            Value::Object(
                self.addons
                    .iter()
                    .map(|addon| (addon.offering_name.clone(), addon.to_value()))
                    .collect(),
            ),
        );
        vars
    }
}

/// Every test case applied to the same base scenario.
pub struct AddonMatrix {
    pub base: ScenarioConfig,
    pub graph: AddonDependencyGraph,
    pub test_cases: Vec<AddonTestCase>,
}

impl AddonMatrix {
    /// One scenario per test case. Fails before anything runs if a case references an unknown
    /// add-on or two cases share a name.
    pub fn expand(&self) -> Result<Vec<ScenarioConfig>, ConfigError> {
        let mut names = HashSet::new();

        self.test_cases
            .iter()
            .map(|test_case| {
                if !names.insert(test_case.name.as_str()) {
                    return Err(ConfigError::InvalidScenario(format!(
                        "addon test case `{}` is declared more than once",
                        test_case.name
                    )));
                }

                let graph = self.graph.with_overrides(&test_case.enablement)?;
                let prefix = format!("{}-{}", test_case.prefix, unique_id());
                // cells run side by side, each one names its resources after its own prefix
                let mut vars = graph.to_terraform_vars();
                vars.insert(PREFIX_VAR.to_string(), Value::String(prefix.clone()));

                Ok(self.base.with_overrides(&ScenarioOverrides {
                    name: Some(format!("{}-{}", self.base.name, test_case.name)),
                    prefix: Some(prefix),
                    vars,
                }))
            })
            .collect()
    }

    /// Runs every cell of the matrix, failures are collected and never stop the other cells.
    pub fn run(&self, engine: &dyn ProvisioningEngine, max_parallel: usize) -> Result<SuiteReport<ApplyResult>, ConfigError> {
        let scenarios = self.expand()?;
        info!("running {} addon test cases", scenarios.len());

        let report = ScenarioSuite::new(engine)
            .max_parallel(max_parallel)
            .run_consistency(&scenarios);
        if !report.is_success() {
            error!("addon matrix failures:\n{}", report.failure_summary());
        }

        Ok(report)
    }
}
