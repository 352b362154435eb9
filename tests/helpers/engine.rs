use ocp_test_harness::address::ResourceAddress;
use ocp_test_harness::cmd::terraform::TerraformError;
use ocp_test_harness::engine::{ProvisioningEngine, Workspace};
use ocp_test_harness::plan::{ApplyResult, Outputs};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
    SelectWorkspace {
        name: String,
        dir: PathBuf,
        vars: BTreeMap<String, Value>,
    },
    DeleteWorkspace(String),
    Apply { name: String, dir: PathBuf },
    PlanDiff(String),
    Destroy(String),
    Outputs(String),
    StateRm { name: String, address: String },
    TransferState { name: String, from: PathBuf, to: PathBuf },
}

impl EngineCall {
    pub fn workspace(&self) -> &str {
        match self {
            EngineCall::SelectWorkspace { name, .. }
            | EngineCall::DeleteWorkspace(name)
            | EngineCall::Apply { name, .. }
            | EngineCall::PlanDiff(name)
            | EngineCall::Destroy(name)
            | EngineCall::Outputs(name)
            | EngineCall::StateRm { name, .. }
            | EngineCall::TransferState { name, .. } => name,
        }
    }

    /// Short name of the call, handy to assert on a call sequence.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCall::SelectWorkspace { .. } => "select",
            EngineCall::DeleteWorkspace(_) => "delete",
            EngineCall::Apply { .. } => "apply",
            EngineCall::PlanDiff(_) => "plan",
            EngineCall::Destroy(_) => "destroy",
            EngineCall::Outputs(_) => "outputs",
            EngineCall::StateRm { .. } => "state_rm",
            EngineCall::TransferState { .. } => "transfer",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Delete,
    Destroy,
    StateRm,
    TransferState,
}

/// In memory engine. Apply and plan results are scripted per workspace prefix and consumed in
/// order, an unscripted apply or plan changes nothing.
#[derive(Default)]
pub struct FakeEngine {
    applies: Mutex<Vec<(String, VecDeque<Result<ApplyResult, TerraformError>>)>>,
    plans: Mutex<Vec<(String, VecDeque<ApplyResult>)>>,
    failures: Mutex<HashMap<Operation, Vec<String>>>,
    calls: Mutex<Vec<EngineCall>>,
}

fn next_scripted<T>(scripts: &Mutex<Vec<(String, VecDeque<T>)>>, workspace: &str) -> Option<T> {
    scripts
        .lock()
        .expect("scripts lock")
        .iter_mut()
        .find(|(prefix, queue)| workspace.starts_with(prefix.as_str()) && !queue.is_empty())
        .and_then(|(_, queue)| queue.pop_front())
}

fn push_scripted<T>(scripts: &Mutex<Vec<(String, VecDeque<T>)>>, prefix: &str, item: T) {
    let mut scripts = scripts.lock().expect("scripts lock");
    match scripts.iter_mut().find(|(p, _)| p == prefix) {
        Some((_, queue)) => queue.push_back(item),
        None => scripts.push((prefix.to_string(), VecDeque::from([item]))),
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        FakeEngine::default()
    }

    pub fn on_apply(self, prefix: &str, result: ApplyResult) -> Self {
        push_scripted(&self.applies, prefix, Ok(result));
        self
    }

    pub fn on_apply_error(self, prefix: &str, error: TerraformError) -> Self {
        push_scripted(&self.applies, prefix, Err(error));
        self
    }

    pub fn on_plan(self, prefix: &str, result: ApplyResult) -> Self {
        push_scripted(&self.plans, prefix, result);
        self
    }

    pub fn failing(self, prefix: &str, operation: Operation) -> Self {
        self.failures
            .lock()
            .expect("failures lock")
            .entry(operation)
            .or_default()
            .push(prefix.to_string());
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Call kinds made on workspaces starting with `prefix`, in order.
    pub fn call_kinds(&self, prefix: &str) -> Vec<&'static str> {
        self.calls()
            .iter()
            .filter(|call| call.workspace().starts_with(prefix))
            .map(|call| call.kind())
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn check(&self, operation: Operation, workspace: &Workspace) -> Result<(), TerraformError> {
        let fails = self
            .failures
            .lock()
            .expect("failures lock")
            .get(&operation)
            .is_some_and(|prefixes| prefixes.iter().any(|p| workspace.name.starts_with(p.as_str())));

        match fails {
            true => Err(TerraformError::Unknown {
                message: format!("{operation:?} failed"),
                raw_message: format!("Error: {operation:?} of {} failed", workspace.name),
            }),
            false => Ok(()),
        }
    }
}

impl ProvisioningEngine for FakeEngine {
    fn select_or_create_workspace(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        self.record(EngineCall::SelectWorkspace {
            name: workspace.name.clone(),
            dir: workspace.terraform_dir.clone(),
            vars: workspace.vars.clone(),
        });
        self.check(Operation::Select, workspace)
    }

    fn delete_workspace(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        self.record(EngineCall::DeleteWorkspace(workspace.name.clone()));
        self.check(Operation::Delete, workspace)
    }

    fn apply(&self, workspace: &Workspace) -> Result<ApplyResult, TerraformError> {
        self.record(EngineCall::Apply {
            name: workspace.name.clone(),
            dir: workspace.terraform_dir.clone(),
        });
        next_scripted(&self.applies, &workspace.name).unwrap_or_else(|| Ok(ApplyResult::default()))
    }

    fn plan_diff(&self, workspace: &Workspace) -> Result<ApplyResult, TerraformError> {
        self.record(EngineCall::PlanDiff(workspace.name.clone()));
        Ok(next_scripted(&self.plans, &workspace.name).unwrap_or_default())
    }

    fn destroy(&self, workspace: &Workspace) -> Result<(), TerraformError> {
        self.record(EngineCall::Destroy(workspace.name.clone()));
        self.check(Operation::Destroy, workspace)
    }

    fn outputs(&self, workspace: &Workspace) -> Result<Outputs, TerraformError> {
        self.record(EngineCall::Outputs(workspace.name.clone()));
        Ok(Outputs::new())
    }

    fn state_rm(&self, workspace: &Workspace, address: &ResourceAddress) -> Result<(), TerraformError> {
        self.record(EngineCall::StateRm {
            name: workspace.name.clone(),
            address: address.to_string(),
        });
        self.check(Operation::StateRm, workspace)
    }

    fn transfer_state(&self, from: &Workspace, to: &Workspace) -> Result<(), TerraformError> {
        self.record(EngineCall::TransferState {
            name: to.name.clone(),
            from: from.terraform_dir.clone(),
            to: to.terraform_dir.clone(),
        });
        self.check(Operation::TransferState, to)
    }
}
