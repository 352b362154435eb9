use crate::cmd::terraform_validators::TerraformValidators;
use crate::config::{HarnessEnv, TeardownPolicy};
use crate::constants::DEFAULT_SCENARIO_TIMEOUT;
use crate::drift::ExemptionPolicy;
use crate::engine::Workspace;
use crate::errors::ConfigError;
use crate::hooks::PostApplyHook;
use crate::region::{RegionAdvisor, remap_excluded};
use crate::string::unique_id;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const PREFIX_VAR: &str = "prefix";
pub const REGION_VAR: &str = "region";
pub const RESOURCE_GROUP_VAR: &str = "resource_group";

/// One test scenario: which configuration to exercise, with which inputs, and which changes are
/// expected on re-apply. Built through [`ScenarioBuilder`], never mutated once a run starts.
#[derive(Clone)]
pub struct ScenarioConfig {
    pub name: String,
    pub terraform_dir: PathBuf,
    /// Namespaces every resource and the terraform workspace of the scenario.
    pub prefix: String,
    pub resource_group: Option<String>,
    pub region: Option<String>,
    pub terraform_vars: BTreeMap<String, Value>,
    pub exemptions: ExemptionPolicy,
    pub timeout: Duration,
    pub post_apply_hook: Option<Arc<dyn PostApplyHook>>,
    /// Reason why the upgrade test does not apply to this scenario.
    pub upgrade_skip: Option<String>,
    pub check_apply_result_for_upgrade: bool,
    pub teardown: TeardownPolicy,
    pub validators: TerraformValidators,
    pub region_advisor: Option<Arc<dyn RegionAdvisor>>,
}

impl Debug for ScenarioConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioConfig")
            .field("name", &self.name)
            .field("terraform_dir", &self.terraform_dir)
            .field("prefix", &self.prefix)
            .field("resource_group", &self.resource_group)
            .field("region", &self.region)
            .field("terraform_vars", &self.terraform_vars)
            .field("exemptions", &self.exemptions)
            .field("timeout", &self.timeout)
            .field("post_apply_hook", &self.post_apply_hook.as_ref().map(|h| h.name()))
            .field("upgrade_skip", &self.upgrade_skip)
            .field("check_apply_result_for_upgrade", &self.check_apply_result_for_upgrade)
            .field("teardown", &self.teardown)
            .field("validators", &self.validators)
            .finish()
    }
}

/// Changes applied on top of a base scenario, see [`ScenarioConfig::with_overrides`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioOverrides {
    pub name: Option<String>,
    pub prefix: Option<String>,
    pub vars: BTreeMap<String, Value>,
}

impl ScenarioConfig {
    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.prefix, &self.terraform_dir)
            .with_vars(self.terraform_vars.clone())
            .with_timeout(self.timeout)
    }

    /// A new scenario made of this one plus `overrides`, `self` is left untouched. The new
    /// scenario runs in the same region and holds its own usage of it on the region advisor.
    pub fn with_overrides(&self, overrides: &ScenarioOverrides) -> ScenarioConfig {
        let mut scenario = self.clone();
        if let (Some(advisor), Some(region)) = (&scenario.region_advisor, &scenario.region) {
            advisor.acquire(region);
        }

        if let Some(name) = &overrides.name {
            scenario.name = name.clone();
        }

        if let Some(prefix) = &overrides.prefix {
            scenario.prefix = prefix.clone();
            if scenario.terraform_vars.get(PREFIX_VAR) == Some(&Value::String(self.prefix.clone())) {
                scenario
                    .terraform_vars
                    .insert(PREFIX_VAR.to_string(), Value::String(prefix.clone()));
            }
        }

        scenario
            .terraform_vars
            .extend(overrides.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        scenario
    }

    /// One scenario per platform version, bound to the `version_var` variable.
    pub fn for_versions(&self, versions: &[&str], version_var: &str) -> Vec<ScenarioConfig> {
        versions
            .iter()
            .map(|version| {
                let suffix = version.replace('.', "");
                self.with_overrides(&ScenarioOverrides {
                    name: Some(format!("{}-{}", self.name, version)),
                    prefix: Some(format!("{}-{}", self.prefix, suffix)),
                    vars: BTreeMap::from([(version_var.to_string(), Value::String(version.to_string()))]),
                })
            })
            .collect()
    }

    /// Gives the region back to the advisor it was obtained from.
    pub fn release_region(&self) {
        if let (Some(advisor), Some(region)) = (&self.region_advisor, &self.region) {
            advisor.release(region);
        }
    }
}

struct RegionSelection {
    advisor: Arc<dyn RegionAdvisor>,
    preferences: Vec<String>,
    fallback: String,
}

/// Builds a [`ScenarioConfig`]. Nothing is called over the network, the only validation is the
/// syntax of the exemption addresses and the presence of mandatory settings.
pub struct ScenarioBuilder {
    name: String,
    terraform_dir: PathBuf,
    prefix: String,
    unique_suffix: bool,
    resource_group: Option<String>,
    region: Option<String>,
    region_selection: Option<RegionSelection>,
    excluded_regions: Vec<String>,
    terraform_vars: BTreeMap<String, Value>,
    ignore_adds: Vec<String>,
    ignore_updates: Vec<String>,
    ignore_destroys: Vec<String>,
    implicit_destroy: Vec<String>,
    implicit_required: bool,
    timeout: Duration,
    post_apply_hook: Option<Arc<dyn PostApplyHook>>,
    upgrade_skip: Option<String>,
    check_apply_result_for_upgrade: bool,
    teardown: TeardownPolicy,
    validators: TerraformValidators,
    env: Option<HarnessEnv>,
}

impl ScenarioBuilder {
    pub fn new<P: Into<PathBuf>>(name: &str, terraform_dir: P, prefix: &str) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.to_string(),
            terraform_dir: terraform_dir.into(),
            prefix: prefix.to_string(),
            unique_suffix: true,
            resource_group: None,
            region: None,
            region_selection: None,
            excluded_regions: vec![],
            terraform_vars: BTreeMap::new(),
            ignore_adds: vec![],
            ignore_updates: vec![],
            ignore_destroys: vec![],
            implicit_destroy: vec![],
            implicit_required: true,
            timeout: DEFAULT_SCENARIO_TIMEOUT,
            post_apply_hook: None,
            upgrade_skip: None,
            check_apply_result_for_upgrade: false,
            teardown: HarnessEnv::global().teardown,
            validators: TerraformValidators::Default,
            env: None,
        }
    }

    /// Use the prefix as given, without the random suffix.
    pub fn without_unique_suffix(mut self) -> Self {
        self.unique_suffix = false;
        self
    }

    pub fn resource_group(mut self, resource_group: &str) -> Self {
        self.resource_group = Some(resource_group.to_string());
        self
    }

    pub fn region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    /// Let `advisor` pick the region out of `preferences` when none is set explicitly.
    pub fn region_advisor(mut self, advisor: Arc<dyn RegionAdvisor>, preferences: &[&str], fallback: &str) -> Self {
        self.region_selection = Some(RegionSelection {
            advisor,
            preferences: preferences.iter().map(|r| r.to_string()).collect(),
            fallback: fallback.to_string(),
        });
        self
    }

    /// Regions the advisor may answer but the scenario cannot use, replaced by the fallback.
    pub fn exclude_regions(mut self, regions: &[&str]) -> Self {
        self.excluded_regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn var<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.terraform_vars.insert(name.to_string(), value.into());
        self
    }

    pub fn vars(mut self, vars: BTreeMap<String, Value>) -> Self {
        self.terraform_vars.extend(vars);
        self
    }

    pub fn ignore_adds(mut self, addresses: &[&str]) -> Self {
        self.ignore_adds.extend(addresses.iter().map(|a| a.to_string()));
        self
    }

    pub fn ignore_updates(mut self, addresses: &[&str]) -> Self {
        self.ignore_updates.extend(addresses.iter().map(|a| a.to_string()));
        self
    }

    pub fn ignore_destroys(mut self, addresses: &[&str]) -> Self {
        self.ignore_destroys.extend(addresses.iter().map(|a| a.to_string()));
        self
    }

    /// Resources expected to be destroyed on each re-apply, removed from state before teardown.
    pub fn implicit_destroy(mut self, addresses: &[&str]) -> Self {
        self.implicit_destroy.extend(addresses.iter().map(|a| a.to_string()));
        self
    }

    pub fn implicit_required(mut self, required: bool) -> Self {
        self.implicit_required = required;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn post_apply_hook(mut self, hook: Arc<dyn PostApplyHook>) -> Self {
        self.post_apply_hook = Some(hook);
        self
    }

    pub fn skip_upgrade(mut self, reason: &str) -> Self {
        self.upgrade_skip = Some(reason.to_string());
        self
    }

    pub fn check_apply_result_for_upgrade(mut self, check: bool) -> Self {
        self.check_apply_result_for_upgrade = check;
        self
    }

    pub fn teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn validators(mut self, validators: TerraformValidators) -> Self {
        self.validators = validators;
        self
    }

    /// Real runs: the API key must be set and the teardown policy follows the environment.
    pub fn harness_env(mut self, env: &HarnessEnv) -> Self {
        self.teardown = env.teardown;
        self.env = Some(env.clone());
        self
    }

    pub fn build(self) -> Result<ScenarioConfig, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidScenario("scenario name is empty".to_string()));
        }
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::InvalidScenario(format!(
                "scenario `{}` has an empty prefix",
                self.name
            )));
        }
        if let Some(env) = &self.env {
            env.require_api_key()?;
        }

        let exemptions = ExemptionPolicy::new(
            &self.ignore_adds,
            &self.ignore_updates,
            &self.ignore_destroys,
            &self.implicit_destroy,
            self.implicit_required,
        )?;

        let prefix = match self.unique_suffix {
            true => format!("{}-{}", self.prefix, unique_id()),
            false => self.prefix,
        };

        let (region, region_advisor) = match (self.region, self.region_selection) {
            (Some(region), _) => (Some(region), None),
            (None, Some(selection)) => {
                let advised = selection
                    .advisor
                    .best_region(&selection.preferences, &selection.fallback);
                let region = remap_excluded(advised.clone(), &self.excluded_regions, &selection.fallback);
                match region == advised {
                    true => (Some(region), Some(selection.advisor)),
                    false => {
                        selection.advisor.release(&advised);
                        (Some(region), None)
                    }
                }
            }
            (None, None) => (None, None),
        };

        let mut terraform_vars = self.terraform_vars;
        terraform_vars
            .entry(PREFIX_VAR.to_string())
            .or_insert_with(|| Value::String(prefix.clone()));
        if let Some(region) = &region {
            terraform_vars
                .entry(REGION_VAR.to_string())
                .or_insert_with(|| Value::String(region.clone()));
        }
        if let Some(resource_group) = &self.resource_group {
            terraform_vars
                .entry(RESOURCE_GROUP_VAR.to_string())
                .or_insert_with(|| Value::String(resource_group.clone()));
        }

        Ok(ScenarioConfig {
            name: self.name,
            terraform_dir: self.terraform_dir,
            prefix,
            resource_group: self.resource_group,
            region,
            terraform_vars,
            exemptions,
            timeout: self.timeout,
            post_apply_hook: self.post_apply_hook,
            upgrade_skip: self.upgrade_skip,
            check_apply_result_for_upgrade: self.check_apply_result_for_upgrade,
            teardown: self.teardown,
            validators: self.validators,
            region_advisor,
        })
    }
}
