use crate::address::ResourceAddress;
use crate::cmd::terraform::TerraformError;
use crate::constants::DEFAULT_SCENARIO_TIMEOUT;
use crate::plan::{ApplyResult, Outputs};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// A terraform configuration bound to a named workspace and its input variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Workspace {
    pub name: String,
    pub terraform_dir: PathBuf,
    pub vars: BTreeMap<String, Value>,
    pub timeout: Duration,
}

impl Workspace {
    pub fn new<P: Into<PathBuf>>(name: &str, terraform_dir: P) -> Workspace {
        Workspace {
            name: name.to_string(),
            terraform_dir: terraform_dir.into(),
            vars: BTreeMap::new(),
            timeout: DEFAULT_SCENARIO_TIMEOUT,
        }
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, Value>) -> Workspace {
        self.vars = vars;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Workspace {
        self.timeout = timeout;
        self
    }

    /// Same workspace and variables, different configuration directory.
    pub fn relocated<P: Into<PathBuf>>(&self, terraform_dir: P) -> Workspace {
        Workspace {
            terraform_dir: terraform_dir.into(),
            ..self.clone()
        }
    }
}

/// The provisioning engine the harness drives. Implementations are expected to retry known
/// transient provider errors themselves; callers never add a second retry layer.
pub trait ProvisioningEngine: Send + Sync {
    fn select_or_create_workspace(&self, workspace: &Workspace) -> Result<(), TerraformError>;

    fn delete_workspace(&self, workspace: &Workspace) -> Result<(), TerraformError>;

    /// Plans and applies the configuration. The returned changes are the ones the apply performed,
    /// outputs are read once the apply is over.
    fn apply(&self, workspace: &Workspace) -> Result<ApplyResult, TerraformError>;

    /// Changes an apply would perform right now, nothing is applied.
    fn plan_diff(&self, workspace: &Workspace) -> Result<ApplyResult, TerraformError>;

    fn destroy(&self, workspace: &Workspace) -> Result<(), TerraformError>;

    fn outputs(&self, workspace: &Workspace) -> Result<Outputs, TerraformError>;

    fn state_rm(&self, workspace: &Workspace, address: &ResourceAddress) -> Result<(), TerraformError>;

    /// Hands the state of `from` over to `to`, both workspaces must share the same name.
    fn transfer_state(&self, from: &Workspace, to: &Workspace) -> Result<(), TerraformError>;
}
