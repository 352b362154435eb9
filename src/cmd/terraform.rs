use bitflags::bitflags;
use dirs::home_dir;
use retry::OperationResult;
use retry::delay::Fixed;

use crate::address::ResourceAddress;
use crate::cmd::command::{CommandError, CommandKiller, HarnessCommand};
use crate::constants::{
    IBMCLOUD_API_KEY, TERRAFORM_RETRY_ATTEMPTS, TERRAFORM_RETRY_DELAY, TERRAFORM_TRANSIENT_ERRORS, TF_PLUGIN_CACHE_DIR,
};
use crate::engine::{ProvisioningEngine, Workspace};
use crate::plan::{ApplyResult, Outputs};
use rand::Rng;
use serde_derive::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use std::{env, fs, thread};
use thiserror::Error;

bitflags! {
    /// Using a bitwise operator here allows to combine actions
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct TerraformAction: u32 {
        const INIT = 0b00000001;
        const PLAN = 0b00000010;
        const APPLY = 0b00000100;
        const DESTROY = 0b00001000;
        const OUTPUT = 0b00010000;
    }
}

#[derive(Debug, Error)]
pub enum TerraformError {
    #[error("{message}\n{raw_message}")]
    Unknown {
        /// message: Safe message.
        message: String,
        /// raw_message: raw Terraform error message with all details.
        raw_message: String,
    },
    #[error("Terraform command timed out\n{raw_message}")]
    Timeout { raw_message: String },
    #[error("Terraform command canceled\n{raw_message}")]
    Canceled { raw_message: String },
    #[error("Wasn't able to delete terraform lock file {terraform_provider_lock}\n{raw_message}")]
    CannotDeleteLockFile {
        terraform_provider_lock: String,
        raw_message: String,
    },
    #[error("Error while trying to remove entry `{entry_to_be_removed}` from state list.\n{raw_message}")]
    CannotRemoveEntryOutOfStateList {
        entry_to_be_removed: String,
        raw_message: String,
    },
    #[error("Error while performing Terraform init\n{raw_message}")]
    Initialize { raw_message: String },
    #[error("Error while selecting Terraform workspace `{name}`\n{raw_message}")]
    Workspace { name: String, raw_message: String },
    #[error("Error while performing Terraform plan\n{raw_message}")]
    Plan { raw_message: String },
    #[error("Terraform plan cannot be read\n{raw_message}")]
    InvalidPlan { raw_message: String },
    #[error("Error while performing Terraform apply\n{raw_message}")]
    Apply { raw_message: String },
    #[error("Error while performing Terraform destroy\n{raw_message}")]
    Destroy { raw_message: String },
    #[error("Error while reading Terraform outputs\n{raw_message}")]
    Output { raw_message: String },
    #[error("Error while moving Terraform state from `{from}` to `{to}`\n{raw_message}")]
    StateTransfer {
        from: String,
        to: String,
        raw_message: String,
    },
}

impl TerraformError {
    pub fn raw_message(&self) -> &str {
        match self {
            TerraformError::Unknown { raw_message, .. }
            | TerraformError::Timeout { raw_message }
            | TerraformError::Canceled { raw_message }
            | TerraformError::CannotDeleteLockFile { raw_message, .. }
            | TerraformError::CannotRemoveEntryOutOfStateList { raw_message, .. }
            | TerraformError::Initialize { raw_message }
            | TerraformError::Workspace { raw_message, .. }
            | TerraformError::Plan { raw_message }
            | TerraformError::InvalidPlan { raw_message }
            | TerraformError::Apply { raw_message }
            | TerraformError::Destroy { raw_message }
            | TerraformError::Output { raw_message }
            | TerraformError::StateTransfer { raw_message, .. } => raw_message,
        }
    }

    /// Known provider errors which go away by themselves (rate limiting, eventual consistency...).
    pub fn is_retryable(&self) -> bool {
        if matches!(self, TerraformError::Timeout { .. } | TerraformError::Canceled { .. }) {
            return false;
        }

        let raw_message = self.raw_message().to_lowercase();
        TERRAFORM_TRANSIENT_ERRORS
            .iter()
            .any(|pattern| raw_message.contains(&pattern.to_lowercase()))
    }
}

/// Raw output of one terraform command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TerraformOutput {
    pub raw_std_output: Vec<String>,
    pub raw_error_output: Vec<String>,
}

impl TerraformOutput {
    pub fn new(raw_std_output: Vec<&str>, raw_error_output: Vec<&str>) -> Self {
        Self {
            raw_std_output: raw_std_output.into_iter().map(String::from).collect(),
            raw_error_output: raw_error_output.into_iter().map(String::from).collect(),
        }
    }

    pub fn stdout(&self) -> String {
        self.raw_std_output.join("\n")
    }
}

fn manage_common_issues(terraform_provider_lock: &Path, err: &TerraformError) -> Result<(), TerraformError> {
    // Error: Failed to install provider from shared cache
    // in order to avoid lock errors on parallel run, let's sleep a bit
    // https://github.com/hashicorp/terraform/issues/28041

    let error_string = err.to_string();

    if error_string.contains("Failed to install provider from shared cache")
        || error_string.contains("Failed to install provider")
    {
        let sleep_time = Duration::from_secs(rand::rng().random_range(20..45));
        thread::sleep(sleep_time);

        return match fs::remove_file(terraform_provider_lock) {
            Ok(_) => Ok(()),
            Err(e) => Err(TerraformError::CannotDeleteLockFile {
                terraform_provider_lock: terraform_provider_lock.to_string_lossy().to_string(),
                raw_message: e.to_string(),
            }),
        };
    } else if error_string.contains("Plugin reinitialization required") {
        // terraform init is required
        return Ok(());
    }

    Err(TerraformError::Unknown {
        message: "Unknown Terraform error, no workaround to solve this issue automatically".to_string(),
        raw_message: error_string,
    })
}

/// Value of a `TF_VAR_` environment variable. Strings are passed as is, anything else as JSON
/// which terraform reads as an HCL expression. Null variables are not passed at all.
pub fn tf_var_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Local state file of a workspace, terraform keeps non default workspaces under `terraform.tfstate.d`.
pub fn state_file_path(workspace: &Workspace) -> PathBuf {
    match workspace.name.as_str() {
        "default" => workspace.terraform_dir.join("terraform.tfstate"),
        name => workspace
            .terraform_dir
            .join("terraform.tfstate.d")
            .join(name)
            .join("terraform.tfstate"),
    }
}

fn parse_outputs(output_json: &str) -> Result<Outputs, serde_json::Error> {
    #[derive(Deserialize)]
    struct TerraformJsonValue {
        value: Value,
    }

    let outputs: BTreeMap<String, TerraformJsonValue> = serde_json::from_str(output_json)?;
    Ok(outputs.into_iter().map(|(k, v)| (k, v.value)).collect())
}

/// Drives the `terraform` CLI. Each workspace gets its own data directory so scenarios sharing a
/// configuration directory never step on each other's workspace selection.
///
/// Clones share the cancellation flag and the init locks.
#[derive(Clone, Debug)]
pub struct TerraformEngine {
    binary: PathBuf,
    retry_attempts: usize,
    retry_delay: Duration,
    canceled: Arc<AtomicBool>,
    /// Scenarios sharing a configuration directory share its `.terraform.lock.hcl`, their inits
    /// run one at a time.
    init_locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl Default for TerraformEngine {
    fn default() -> Self {
        TerraformEngine {
            binary: PathBuf::from("terraform"),
            retry_attempts: TERRAFORM_RETRY_ATTEMPTS,
            retry_delay: TERRAFORM_RETRY_DELAY,
            canceled: Arc::new(AtomicBool::new(false)),
            init_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl TerraformEngine {
    pub fn new<P: Into<PathBuf>>(binary: P) -> TerraformEngine {
        TerraformEngine {
            binary: binary.into(),
            ..Default::default()
        }
    }

    pub fn with_retries(mut self, attempts: usize, delay: Duration) -> TerraformEngine {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Kills the running terraform commands, and every later one, of this engine and its clones.
    pub fn cancel(&self) {
        warn!("terraform engine canceled");
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    fn data_dir(workspace: &Workspace) -> PathBuf {
        workspace.terraform_dir.join(format!(".terraform-{}", workspace.name))
    }

    fn plan_file(workspace: &Workspace) -> String {
        format!("{}.tfplan", workspace.name)
    }

    fn envs(workspace: &Workspace) -> Vec<(String, String)> {
        let mut envs = vec![
            ("TF_IN_AUTOMATION".to_string(), "1".to_string()),
            ("TF_INPUT".to_string(), "0".to_string()),
            (
                "TF_DATA_DIR".to_string(),
                Self::data_dir(workspace).to_string_lossy().to_string(),
            ),
        ];

        // override if environment variable is set
        let plugin_cache_dir = match env::var_os(TF_PLUGIN_CACHE_DIR) {
            Some(val) => Some(PathBuf::from(val)),
            None => home_dir().map(|home| home.join(".terraform.d").join("plugin-cache")),
        };
        if let Some(dir) = plugin_cache_dir {
            // terraform refuses a cache directory which does not exist
            let _ = fs::create_dir_all(&dir);
            envs.push((TF_PLUGIN_CACHE_DIR.to_string(), dir.to_string_lossy().to_string()));
        }

        envs.extend(
            workspace
                .vars
                .iter()
                .filter_map(|(name, value)| tf_var_value(value).map(|v| (format!("TF_VAR_{name}"), v))),
        );

        envs
    }

    fn with_retries_on_transient<T, F>(&self, what: &str, mut operation: F) -> Result<T, TerraformError>
    where
        F: FnMut() -> Result<T, TerraformError>,
    {
        let delay = Fixed::from_millis(self.retry_delay.as_millis() as u64).take(self.retry_attempts);
        retry::retry(delay, || match operation() {
            Ok(out) => OperationResult::Ok(out),
            Err(err) if err.is_retryable() => {
                warn!("terraform {} hit a transient error, retrying: {}", what, err);
                OperationResult::Retry(err)
            }
            Err(err) => OperationResult::Err(err),
        })
        .map_err(|e| e.error)
    }

    fn init_lock(&self, terraform_dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.init_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(terraform_dir.to_path_buf()).or_default().clone()
    }

    fn terraform_init(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        let terraform_provider_lock = workspace.terraform_dir.join(".terraform.lock.hcl");
        let init_lock = self.init_lock(&workspace.terraform_dir);
        let _init_guard = init_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        self.with_retries_on_transient("init", || {
            match self.terraform_exec(workspace, &["init", "-no-color", "-input=false", "-upgrade"], true) {
                Ok(_) => Ok(()),
                Err(err) => {
                    let _ = manage_common_issues(&terraform_provider_lock, &err);
                    Err(TerraformError::Initialize {
                        raw_message: err.raw_message().to_string(),
                    })
                }
            }
        })
    }

    fn terraform_plan(&self, workspace: &Workspace) -> Result<ApplyResult, TerraformError> {
        let plan_file = Self::plan_file(workspace);
        self.with_retries_on_transient("plan", || {
            self.terraform_exec(
                workspace,
                &["plan", "-no-color", "-input=false", "-out", plan_file.as_str()],
                true,
            )
            .map_err(|e| TerraformError::Plan {
                raw_message: e.raw_message().to_string(),
            })
        })?;

        let shown = self
            .terraform_exec(workspace, &["show", "-no-color", "-json", plan_file.as_str()], false)
            .map_err(|e| TerraformError::InvalidPlan {
                raw_message: e.raw_message().to_string(),
            })?;

        ApplyResult::from_plan_json(&shown.stdout()).map_err(|e| TerraformError::InvalidPlan {
            raw_message: e.to_string(),
        })
    }

    fn terraform_apply(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        let plan_file = Self::plan_file(workspace);
        let applied = self.with_retries_on_transient("apply", || {
            self.terraform_exec(
                workspace,
                &["apply", "-no-color", "-input=false", "-auto-approve", plan_file.as_str()],
                true,
            )
            .map_err(|e| TerraformError::Apply {
                raw_message: e.raw_message().to_string(),
            })
        });

        let _ = fs::remove_file(workspace.terraform_dir.join(&plan_file));
        applied.map(|_| ())
    }

    fn terraform_destroy(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        self.with_retries_on_transient("destroy", || {
            self.terraform_exec(workspace, &["destroy", "-no-color", "-input=false", "-auto-approve"], true)
                .map_err(|e| TerraformError::Destroy {
                    raw_message: e.raw_message().to_string(),
                })
        })
        .map(|_| ())
    }

    fn terraform_output(&self, workspace: &Workspace) -> Result<Outputs, TerraformError> {
        let output = self
            .terraform_exec(workspace, &["output", "-no-color", "-json"], false)
            .map_err(|e| TerraformError::Output {
                raw_message: e.raw_message().to_string(),
            })?;

        parse_outputs(&output.stdout()).map_err(|e| TerraformError::Output {
            raw_message: e.to_string(),
        })
    }

    fn terraform_run(&self, actions: TerraformAction, workspace: &Workspace) -> Result<ApplyResult, TerraformError> {
        let mut result = ApplyResult::default();

        if actions.contains(TerraformAction::INIT) {
            self.terraform_init(workspace)?;
        }

        if actions.contains(TerraformAction::PLAN) {
            result = self.terraform_plan(workspace)?;
        }

        if actions.contains(TerraformAction::APPLY) {
            self.terraform_apply(workspace)?;
        }

        if actions.contains(TerraformAction::DESTROY) {
            self.terraform_destroy(workspace)?;
        }

        if actions.contains(TerraformAction::OUTPUT) {
            result.outputs = self.terraform_output(workspace)?;
        }

        Ok(result)
    }

    /// This method should not be exposed to the outside world, it's internal magic.
    fn terraform_exec(
        &self,
        workspace: &Workspace,
        args: &[&str],
        log_stdout: bool,
    ) -> Result<TerraformOutput, TerraformError> {
        let mut output = TerraformOutput::default();
        let mut cmd = HarnessCommand::new(&self.binary, args, &Self::envs(workspace), &[IBMCLOUD_API_KEY]);
        cmd.set_current_dir(&workspace.terraform_dir);

        let is_canceled = || self.is_canceled();
        let result = cmd.exec_with_abort(
            &mut |line| {
                if log_stdout {
                    info!("{}", line);
                }
                output.raw_std_output.push(line);
            },
            &mut |line| {
                error!("{}", line);
                output.raw_error_output.push(line);
            },
            &CommandKiller::from(workspace.timeout, &is_canceled),
        );

        let raw_message = || {
            format!(
                "command: terraform {} failed\nSTDOUT:\n{}\nSTDERR:\n{}",
                args.join(" "),
                output.raw_std_output.join("\n"),
                output.raw_error_output.join("\n")
            )
        };

        match result {
            Ok(_) => Ok(output),
            Err(CommandError::TimeoutError(_)) => Err(TerraformError::Timeout {
                raw_message: raw_message(),
            }),
            Err(CommandError::Killed(_)) => Err(TerraformError::Canceled {
                raw_message: raw_message(),
            }),
            Err(_) => Err(TerraformError::Unknown {
                message: "Error while performing Terraform command.".to_string(),
                raw_message: raw_message(),
            }),
        }
    }
}

impl ProvisioningEngine for TerraformEngine {
    fn select_or_create_workspace(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        self.terraform_run(TerraformAction::INIT, workspace)?;
        self.terraform_exec(
            workspace,
            &["workspace", "select", "-or-create=true", workspace.name.as_str()],
            true,
        )
        .map(|_| ())
        .map_err(|e| TerraformError::Workspace {
            name: workspace.name.clone(),
            raw_message: e.raw_message().to_string(),
        })
    }

    fn delete_workspace(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        let to_workspace_error = |e: TerraformError| TerraformError::Workspace {
            name: workspace.name.clone(),
            raw_message: e.raw_message().to_string(),
        };

        // the current workspace cannot be deleted
        self.terraform_exec(workspace, &["workspace", "select", "default"], true)
            .map_err(to_workspace_error)?;
        self.terraform_exec(
            workspace,
            &["workspace", "delete", "-force", workspace.name.as_str()],
            true,
        )
        .map_err(to_workspace_error)?;

        if let Err(err) = fs::remove_dir_all(Self::data_dir(workspace)) {
            warn!("cannot clean terraform data directory of workspace {}: {}", workspace.name, err);
        }
        Ok(())
    }

    fn apply(&self, workspace: &Workspace) -> Result<ApplyResult, TerraformError> {
        self.terraform_run(
            TerraformAction::PLAN | TerraformAction::APPLY | TerraformAction::OUTPUT,
            workspace,
        )
    }

    fn plan_diff(&self, workspace: &Workspace) -> Result<ApplyResult, TerraformError> {
        let _plan_file_guard = scopeguard::guard(workspace.terraform_dir.join(Self::plan_file(workspace)), |path| {
            let _ = fs::remove_file(path);
        });
        self.terraform_run(TerraformAction::PLAN, workspace)
    }

    fn destroy(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        self.terraform_run(TerraformAction::DESTROY, workspace).map(|_| ())
    }

    fn outputs(&self, workspace: &Workspace) -> Result<Outputs, TerraformError> {
        self.terraform_run(TerraformAction::OUTPUT, workspace)
            .map(|result| result.outputs)
    }

    fn state_rm(&self, workspace: &Workspace, address: &ResourceAddress) -> Result<(), TerraformError> {
        let entry = address.to_string();
        self.terraform_exec(workspace, &["state", "rm", "-no-color", entry.as_str()], true)
            .map(|_| ())
            .map_err(|err| TerraformError::CannotRemoveEntryOutOfStateList {
                entry_to_be_removed: entry.clone(),
                raw_message: err.raw_message().to_string(),
            })
    }

    fn transfer_state(&self, from: &Workspace, to: &Workspace) -> Result<(), TerraformError> {
        let source = state_file_path(from);
        let destination = state_file_path(to);
        let state_transfer_error = |raw_message: String| TerraformError::StateTransfer {
            from: source.to_string_lossy().to_string(),
            to: destination.to_string_lossy().to_string(),
            raw_message,
        };

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| state_transfer_error(e.to_string()))?;
        }
        fs::copy(&source, &destination).map_err(|e| state_transfer_error(e.to_string()))?;

        Ok(())
    }
}
