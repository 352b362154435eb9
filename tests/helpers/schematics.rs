use ocp_test_harness::plan::ApplyResult;
use ocp_test_harness::schematics::{JobKind, SchematicsError, SchematicsService, SchematicsVar, WorkspaceRequest};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub const WORKSPACE_ID: &str = "us-south.workspace.base-ocp-fscloud.8c3e9f6a";

#[derive(Clone, Debug, PartialEq)]
pub enum SchematicsCall {
    CreateWorkspace(WorkspaceRequest),
    /// Archived file names of the uploaded tarball.
    UploadTemplate(Vec<String>),
    UpdateVariables(Vec<String>),
    Job(JobKind),
    DeleteWorkspace(String),
}

/// In memory service. Job results are scripted per job kind, an unscripted job changes nothing.
#[derive(Default)]
pub struct FakeSchematics {
    jobs: Mutex<Vec<(JobKind, VecDeque<Result<ApplyResult, SchematicsError>>)>>,
    calls: Mutex<Vec<SchematicsCall>>,
}

impl FakeSchematics {
    pub fn new() -> Self {
        FakeSchematics::default()
    }

    pub fn on_job(self, job: JobKind, result: Result<ApplyResult, SchematicsError>) -> Self {
        {
            let mut jobs = self.jobs.lock().expect("jobs lock");
            match jobs.iter_mut().find(|(kind, _)| *kind == job) {
                Some((_, queue)) => queue.push_back(result),
                None => jobs.push((job, VecDeque::from([result]))),
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<SchematicsCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn jobs(&self) -> Vec<JobKind> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SchematicsCall::Job(job) => Some(job),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SchematicsCall::UploadTemplate(files) => Some(files),
                _ => None,
            })
            .collect()
    }

    pub fn workspace_deleted(&self) -> bool {
        self.calls()
            .iter()
            .any(|call| matches!(call, SchematicsCall::DeleteWorkspace(_)))
    }

    fn record(&self, call: SchematicsCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl SchematicsService for FakeSchematics {
    fn create_workspace(&self, request: &WorkspaceRequest) -> Result<String, SchematicsError> {
        self.record(SchematicsCall::CreateWorkspace(request.clone()));
        Ok(WORKSPACE_ID.to_string())
    }

    fn upload_template(&self, _workspace_id: &str, tarball: &Path) -> Result<(), SchematicsError> {
        let archive = File::open(tarball).map_err(|e| SchematicsError::Api(e.to_string()))?;
        let mut files = tar::Archive::new(flate2::read::GzDecoder::new(archive))
            .entries()
            .map_err(|e| SchematicsError::Api(e.to_string()))?
            .map(|entry| {
                entry
                    .and_then(|e| e.path().map(|p| p.to_string_lossy().to_string()))
                    .map_err(|e| SchematicsError::Api(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        files.sort();

        self.record(SchematicsCall::UploadTemplate(files));
        Ok(())
    }

    fn update_variables(&self, _workspace_id: &str, vars: &[SchematicsVar]) -> Result<(), SchematicsError> {
        self.record(SchematicsCall::UpdateVariables(
            vars.iter().map(|v| v.name.clone()).collect(),
        ));
        Ok(())
    }

    fn run_job(&self, _workspace_id: &str, job: JobKind, _timeout: Duration) -> Result<ApplyResult, SchematicsError> {
        self.record(SchematicsCall::Job(job));
        self.jobs
            .lock()
            .expect("jobs lock")
            .iter_mut()
            .find(|(kind, _)| *kind == job)
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| Ok(ApplyResult::default()))
    }

    fn delete_workspace(&self, workspace_id: &str) -> Result<(), SchematicsError> {
        self.record(SchematicsCall::DeleteWorkspace(workspace_id.to_string()));
        Ok(())
    }
}
