//! Scenarios run by the IBM Cloud Schematics service instead of a local terraform: the
//! configuration is shipped as a tarball and every apply is a remote job.

mod runner;
mod tarball;

pub use runner::SchematicsTest;
pub use tarball::{Tarball, TarballBuilder};

use crate::cmd::terraform_validators::TerraformValidators;
use crate::config::{HarnessEnv, TeardownPolicy};
use crate::constants::DEFAULT_SCHEMATICS_JOB_TIMEOUT;
use crate::drift::ExemptionPolicy;
use crate::errors::ConfigError;
use crate::plan::ApplyResult;
use crate::string::unique_id;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchematicsError {
    #[error("schematics API error: {0}")]
    Api(String),
    #[error("{job} job {job_id} of workspace {workspace_id} failed: {message}")]
    JobFailed {
        job: JobKind,
        job_id: String,
        workspace_id: String,
        message: String,
    },
    #[error("{job} job of workspace {workspace_id} did not complete after {}min", .after.as_secs() / 60)]
    JobTimeout {
        job: JobKind,
        workspace_id: String,
        after: Duration,
    },
    #[error("cannot build template tarball: {0}")]
    Tarball(String),
    #[error("no file of {root} matches the tarball include patterns")]
    EmptyTarball { root: String },
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum JobKind {
    Plan,
    Apply,
    Destroy,
}

#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
pub enum VarDataType {
    #[strum(serialize = "string")]
    String,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "list(string)")]
    List,
}

/// Workspace variable.
#[derive(Clone, PartialEq)]
pub struct SchematicsVar {
    pub name: String,
    pub value: Value,
    pub data_type: VarDataType,
    /// Secure values are hidden by the service and never logged.
    pub secure: bool,
}

impl Debug for SchematicsVar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value: &dyn Debug = match self.secure {
            true => &"***",
            false => &self.value,
        };

        f.debug_struct("SchematicsVar")
            .field("name", &self.name)
            .field("value", value)
            .field("data_type", &self.data_type)
            .field("secure", &self.secure)
            .finish()
    }
}

impl SchematicsVar {
    pub fn string(name: &str, value: &str) -> Self {
        SchematicsVar {
            name: name.to_string(),
            value: Value::String(value.to_string()),
            data_type: VarDataType::String,
            secure: false,
        }
    }

    pub fn bool(name: &str, value: bool) -> Self {
        SchematicsVar {
            name: name.to_string(),
            value: Value::Bool(value),
            data_type: VarDataType::Bool,
            secure: false,
        }
    }

    pub fn list(name: &str, values: &[&str]) -> Self {
        SchematicsVar {
            name: name.to_string(),
            value: Value::Array(values.iter().map(|v| Value::String(v.to_string())).collect()),
            data_type: VarDataType::List,
            secure: false,
        }
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// The value has to be of the declared data type, lists hold strings only.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidVariable {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }

        let matches_type = match (self.data_type, &self.value) {
            (VarDataType::String, Value::String(_)) => true,
            (VarDataType::Bool, Value::Bool(_)) => true,
            (VarDataType::List, Value::Array(items)) => items.iter().all(|item| item.is_string()),
            _ => false,
        };
        if !matches_type {
            return Err(invalid(format!("value is not a {}", self.data_type)));
        }

        Ok(())
    }

    /// Value as the service expects it: strings as is, anything else as its json text.
    pub fn service_value(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Workspace creation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceRequest {
    pub name: String,
    pub resource_group: Option<String>,
    pub region: Option<String>,
    pub tags: Vec<String>,
    /// Location of the configuration inside the tarball.
    pub template_folder: String,
    pub terraform_version: Option<String>,
}

/// The Schematics service, seen from a test. Jobs block until they complete, fail or time out.
pub trait SchematicsService: Send + Sync {
    /// Returns the id of the new workspace.
    fn create_workspace(&self, request: &WorkspaceRequest) -> Result<String, SchematicsError>;
    fn upload_template(&self, workspace_id: &str, tarball: &Path) -> Result<(), SchematicsError>;
    fn update_variables(&self, workspace_id: &str, vars: &[SchematicsVar]) -> Result<(), SchematicsError>;
    /// Changes the job performed, or would perform for a plan.
    fn run_job(&self, workspace_id: &str, job: JobKind, timeout: Duration) -> Result<ApplyResult, SchematicsError>;
    fn delete_workspace(&self, workspace_id: &str) -> Result<(), SchematicsError>;
}

#[derive(Clone, Debug)]
pub struct SchematicsOptions {
    pub prefix: String,
    /// Repository root, include patterns are relative to it.
    pub repo_root: PathBuf,
    /// Configuration to run, relative to the repository root.
    pub template_folder: String,
    pub tar_include_patterns: Vec<String>,
    pub resource_group: Option<String>,
    pub region: Option<String>,
    pub tags: Vec<String>,
    /// Delete the workspace even when the test failed. Its resources are still destroyed
    /// according to `teardown`.
    pub delete_workspace_on_fail: bool,
    pub wait_job_complete: Duration,
    pub terraform_version: Option<String>,
    pub vars: Vec<SchematicsVar>,
    pub exemptions: ExemptionPolicy,
    pub validators: TerraformValidators,
    pub upgrade_skip: Option<String>,
    pub check_apply_result_for_upgrade: bool,
    pub teardown: TeardownPolicy,
}

impl SchematicsOptions {
    /// Options with the service defaults, `prefix` gets a random suffix.
    pub fn new<P: Into<PathBuf>>(prefix: &str, repo_root: P, template_folder: &str) -> Self {
        SchematicsOptions {
            prefix: format!("{}-{}", prefix, unique_id()),
            repo_root: repo_root.into(),
            template_folder: template_folder.trim_matches('/').to_string(),
            tar_include_patterns: vec![],
            resource_group: None,
            region: None,
            tags: vec![],
            delete_workspace_on_fail: false,
            wait_job_complete: DEFAULT_SCHEMATICS_JOB_TIMEOUT,
            terraform_version: None,
            vars: vec![],
            exemptions: ExemptionPolicy::default(),
            validators: TerraformValidators::default(),
            upgrade_skip: None,
            check_apply_result_for_upgrade: false,
            teardown: TeardownPolicy::default(),
        }
    }

    pub fn include_patterns(mut self, patterns: &[&str]) -> Self {
        self.tar_include_patterns = patterns.iter().map(|p| p.to_string()).collect();
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

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn delete_workspace_on_fail(mut self, delete: bool) -> Self {
        self.delete_workspace_on_fail = delete;
        self
    }

    pub fn wait_job_complete(mut self, timeout: Duration) -> Self {
        self.wait_job_complete = timeout;
        self
    }

    pub fn terraform_version(mut self, version: &str) -> Self {
        self.terraform_version = Some(version.to_string());
        self
    }

    pub fn var(mut self, var: SchematicsVar) -> Self {
        self.vars.retain(|v| v.name != var.name);
        self.vars.push(var);
        self
    }

    pub fn exemptions(mut self, exemptions: ExemptionPolicy) -> Self {
        self.exemptions = exemptions;
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

    pub fn teardown(mut self, policy: TeardownPolicy) -> Self {
        self.teardown = policy;
        self
    }

    /// Api key as a secure variable and teardown policy from the process environment.
    pub fn harness_env(self, env: &HarnessEnv) -> Result<Self, ConfigError> {
        let api_key = env.require_api_key()?.to_string();
        Ok(self
            .var(SchematicsVar::string("ibmcloud_api_key", &api_key).secure())
            .teardown(env.teardown))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::InvalidScenario("schematics test has an empty prefix".to_string()));
        }
        if self.tar_include_patterns.is_empty() {
            return Err(ConfigError::InvalidScenario(format!(
                "schematics test {} has no tarball include pattern",
                self.prefix
            )));
        }

        self.vars.iter().try_for_each(|var| var.validate())
    }

    pub(crate) fn workspace_request(&self, name: &str) -> WorkspaceRequest {
        WorkspaceRequest {
            name: name.to_string(),
            resource_group: self.resource_group.clone(),
            region: self.region.clone(),
            tags: self.tags.clone(),
            template_folder: self.template_folder.clone(),
            terraform_version: self.terraform_version.clone(),
        }
    }
}
