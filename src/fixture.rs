//! Prerequisite resources a scenario references as "existing" infrastructure (resource group,
//! VPC, COS instance...), provisioned from their own configuration and owned by one scenario.

use crate::config::TeardownPolicy;
use crate::constants::DEFAULT_SCENARIO_TIMEOUT;
use crate::engine::{ProvisioningEngine, Workspace};
use crate::errors::{HarnessError, Step};
use crate::fs::{copy_terraform_dir_to_temp, remove_dir_if_exists};
use crate::plan::Outputs;
use crate::scenario::PREFIX_VAR;
use crate::string::unique_id;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Provisioned fixture. Its workspace lives in a private copy of the template directory.
#[derive(Clone, Debug, PartialEq)]
pub struct FixtureHandle {
    pub prefix: String,
    pub workspace: Workspace,
    pub outputs: Outputs,
}

impl FixtureHandle {
    pub fn output(&self, key: &str) -> Result<&Value, HarnessError> {
        match self.outputs.get(key) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(HarnessError::MissingOutputs {
                keys: vec![key.to_string()],
            }),
        }
    }

    pub fn output_str(&self, key: &str) -> Result<&str, HarnessError> {
        self.output(key)?
            .as_str()
            .ok_or_else(|| HarnessError::MissingOutputs {
                keys: vec![key.to_string()],
            })
    }
}

/// Provisioning failed. The handle is there whenever something may have been created, the
/// caller decides whether to tear it down.
#[derive(Debug, Error)]
#[error("cannot provision fixture: {source}")]
pub struct FixtureError {
    pub handle: Option<FixtureHandle>,
    #[source]
    pub source: HarnessError,
}

pub struct FixtureProvisioner<'a> {
    engine: &'a dyn ProvisioningEngine,
    timeout: Duration,
}

impl<'a> FixtureProvisioner<'a> {
    pub fn new(engine: &'a dyn ProvisioningEngine) -> Self {
        FixtureProvisioner {
            engine,
            timeout: DEFAULT_SCENARIO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Applies `template_dir` in a workspace named after `prefix` plus a random suffix, in a
    /// private copy of the template. A failed attempt is retried with [`Self::provision_again`].
    pub fn provision(
        &self,
        template_dir: &Path,
        prefix: &str,
        vars: BTreeMap<String, Value>,
    ) -> Result<FixtureHandle, FixtureError> {
        let prefix = format!("{}-{}", prefix, unique_id());
        let terraform_dir = copy_terraform_dir_to_temp(template_dir, &prefix).map_err(|e| FixtureError {
            handle: None,
            source: HarnessError::io(format!("copy {} to a temp dir", template_dir.display()), e),
        })?;
        info!("Tempdir: {}", terraform_dir.display());

        let mut vars = vars;
        vars.insert(PREFIX_VAR.to_string(), Value::String(prefix.clone()));
        let handle = FixtureHandle {
            prefix: prefix.clone(),
            workspace: Workspace::new(&prefix, terraform_dir)
                .with_vars(vars)
                .with_timeout(self.timeout),
            outputs: Outputs::new(),
        };

        self.select_and_apply(handle)
    }

    /// Retries a failed provisioning in the same workspace and directory, so whatever the previous
    /// attempt created is picked up instead of being orphaned.
    pub fn provision_again(&self, handle: FixtureHandle) -> Result<FixtureHandle, FixtureError> {
        info!("retrying provisioning of {}", handle.prefix);
        self.select_and_apply(FixtureHandle {
            outputs: Outputs::new(),
            ..handle
        })
    }

    fn select_and_apply(&self, mut handle: FixtureHandle) -> Result<FixtureHandle, FixtureError> {
        if let Err(err) = self.engine.select_or_create_workspace(&handle.workspace) {
            return Err(FixtureError {
                source: HarnessError::terraform(Step::Workspace, &handle.prefix, err),
                handle: Some(handle),
            });
        }

        match self.engine.apply(&handle.workspace) {
            Ok(result) => {
                handle.outputs = result.outputs;
                Ok(handle)
            }
            Err(err) => Err(FixtureError {
                source: HarnessError::terraform(Step::InitialApply, &handle.prefix, err),
                handle: Some(handle),
            }),
        }
    }

    /// Destroys whatever exists in the fixture workspace, then removes the workspace and its copy
    /// of the template. Fine to call on a partially provisioned fixture.
    pub fn teardown(&self, handle: &FixtureHandle) -> Result<(), HarnessError> {
        info!("START: Destroy (prereq resources) {}", handle.prefix);
        self.engine
            .destroy(&handle.workspace)
            .map_err(|e| HarnessError::terraform(Step::Destroy, &handle.prefix, e))?;
        self.engine
            .delete_workspace(&handle.workspace)
            .map_err(|e| HarnessError::terraform(Step::DeleteWorkspace, &handle.prefix, e))?;

        let temp_root = handle
            .workspace
            .terraform_dir
            .parent()
            .unwrap_or(&handle.workspace.terraform_dir);
        remove_dir_if_exists(temp_root).map_err(|e| HarnessError::io("remove fixture temp dir", e))?;
        info!("END: Destroy (prereq resources) {}", handle.prefix);

        Ok(())
    }

    /// Teardown unless `policy` says to keep the resources of a failed scenario around.
    pub fn release(&self, handle: &FixtureHandle, policy: TeardownPolicy, scenario_failed: bool) -> Result<(), HarnessError> {
        if !policy.should_teardown(scenario_failed) {
            warn!(
                "Scenario failed. Debug the test and delete resources of {} manually ({}).",
                handle.prefix,
                handle.workspace.terraform_dir.display()
            );
            return Ok(());
        }

        self.teardown(handle)
    }
}
