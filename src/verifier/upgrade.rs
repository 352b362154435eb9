use crate::engine::{ProvisioningEngine, Workspace};
use crate::errors::{HarnessError, Step, VerificationFailure};
use crate::git;
use crate::plan::ApplyResult;
use crate::scenario::ScenarioConfig;
use crate::verifier::teardown::{Verdict, teardown};
use crate::verifier::{conclude, enter_step, scenario_span};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::Span;

/// Released version of the configuration an upgrade starts from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaselineRef {
    /// Any directory inside the git repository.
    pub repo_dir: PathBuf,
    /// Tag, branch or commit of the baseline.
    pub git_ref: String,
    /// Location of the scenario configuration relative to the repository root.
    pub module_subdir: PathBuf,
}

impl BaselineRef {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(repo_dir: P, git_ref: &str, module_subdir: Q) -> Self {
        BaselineRef {
            repo_dir: repo_dir.into(),
            git_ref: git_ref.to_string(),
            module_subdir: module_subdir.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpgradeOutcome {
    /// Changes of the upgrade apply.
    Passed(ApplyResult),
    /// The upgrade does not apply to this scenario, nothing was provisioned.
    Skipped { reason: String },
}

impl UpgradeOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, UpgradeOutcome::Skipped { .. })
    }
}

pub(crate) fn upgrade_skip_reason(declared: Option<&str>, baseline: &BaselineRef) -> Result<Option<String>, HarnessError> {
    if let Some(reason) = declared {
        return Ok(Some(reason.to_string()));
    }

    git::find_upgrade_skip_marker(&baseline.repo_dir, &baseline.git_ref)
        .map(|commit| commit.map(|c| format!("commit {c} opts out of the upgrade test")))
        .map_err(|source| HarnessError::Baseline {
            git_ref: baseline.git_ref.clone(),
            source,
        })
}

/// Checks the baseline out into `into_dir`, the repository itself is left untouched.
pub(crate) fn export_baseline(baseline: &BaselineRef, into_dir: &Path) -> Result<(), HarnessError> {
    git::export_ref(&baseline.repo_dir, &baseline.git_ref, into_dir).map_err(|source| HarnessError::Baseline {
        git_ref: baseline.git_ref.clone(),
        source,
    })
}

/// Applies the baseline version, then the current one in place, and checks nothing outside the
/// exemptions gets destroyed along the way.
pub struct UpgradeVerifier<'a> {
    engine: &'a dyn ProvisioningEngine,
}

impl<'a> UpgradeVerifier<'a> {
    pub fn new(engine: &'a dyn ProvisioningEngine) -> Self {
        UpgradeVerifier { engine }
    }

    /// Why the upgrade test should not run, if it should not.
    pub fn skip_reason(&self, scenario: &ScenarioConfig, baseline: &BaselineRef) -> Result<Option<String>, HarnessError> {
        upgrade_skip_reason(scenario.upgrade_skip.as_deref(), baseline)
    }

    pub fn run_upgrade(&self, scenario: &ScenarioConfig, baseline: &BaselineRef) -> Result<UpgradeOutcome, HarnessError> {
        let span = scenario_span(&scenario.name, &scenario.prefix, "upgrade");
        let _enter = span.enter();

        if let Some(reason) = self.skip_reason(scenario, baseline)? {
            info!("upgrade test of scenario {} skipped: {}", scenario.name, reason);
            scenario.release_region();
            return Ok(UpgradeOutcome::Skipped { reason });
        }

        let baseline_root = tempfile::Builder::new()
            .prefix(&format!("{}-baseline-", scenario.prefix))
            .tempdir()
            .map_err(|e| HarnessError::io("create baseline directory", e))?;
        let current = scenario.workspace();
        let mut failures = vec![];

        // the workspace which holds the state, moves to the current one once the state is transferred
        let mut active = None;
        let result = self.verify(&span, scenario, baseline, &baseline_root, &current, &mut active, &mut failures);

        let verdict = Verdict::from_run(&result, &failures);
        if let Some(workspace) = &active {
            enter_step(&span, Step::Destroy);
            teardown(
                self.engine,
                workspace,
                &scenario.exemptions,
                scenario.teardown,
                verdict,
                &mut failures,
            );
        }
        if verdict != Verdict::Passed && !scenario.teardown.should_teardown(true) {
            let kept = baseline_root.keep();
            warn!("baseline configuration kept in {}", kept.display());
        }
        scenario.release_region();

        conclude(&scenario.name, result, failures).map(UpgradeOutcome::Passed)
    }

    #[allow(clippy::too_many_arguments)]
    fn verify(
        &self,
        span: &Span,
        scenario: &ScenarioConfig,
        baseline: &BaselineRef,
        baseline_root: &TempDir,
        current: &Workspace,
        active: &mut Option<Workspace>,
        failures: &mut Vec<VerificationFailure>,
    ) -> Result<ApplyResult, HarnessError> {
        export_baseline(baseline, baseline_root.path())?;
        let baseline_ws = current.relocated(baseline_root.path().join(&baseline.module_subdir));
        info!(
            "baseline {} exported to {}",
            baseline.git_ref,
            baseline_ws.terraform_dir.display()
        );

        enter_step(span, Step::Workspace);
        self.engine
            .select_or_create_workspace(&baseline_ws)
            .map_err(|e| HarnessError::terraform(Step::Workspace, &baseline_ws.name, e))?;
        *active = Some(baseline_ws.clone());

        enter_step(span, Step::BaselineApply);
        self.engine
            .apply(&baseline_ws)
            .map_err(|e| HarnessError::terraform(Step::BaselineApply, &baseline_ws.name, e))?;

        let engine_error = |step: Step| move |err| HarnessError::terraform(step, &current.name, err);

        enter_step(span, Step::StateTransfer);
        self.engine
            .select_or_create_workspace(current)
            .map_err(engine_error(Step::Workspace))?;
        self.engine
            .transfer_state(&baseline_ws, current)
            .map_err(engine_error(Step::StateTransfer))?;
        *active = Some(current.clone());

        enter_step(span, Step::UpgradePlan);
        let plan = self
            .engine
            .plan_diff(current)
            .map_err(engine_error(Step::UpgradePlan))?;

        if let Err(err) = scenario.validators.validate(&plan) {
            error!("{}", err);
            failures.push(VerificationFailure::ForbiddenChange(err));
        }
        let destructive = scenario.exemptions.destructive_drift(&plan);
        if !destructive.is_empty() {
            error!("upgrade would destroy: {}", destructive);
            failures.push(VerificationFailure::DestructiveUpgrade(destructive));
        }
        if !failures.is_empty() {
            warn!("upgrade of scenario {} is not applied", scenario.name);
            return Ok(plan);
        }

        enter_step(span, Step::UpgradeApply);
        let upgrade = self
            .engine
            .apply(current)
            .map_err(engine_error(Step::UpgradeApply))?;

        if scenario.check_apply_result_for_upgrade {
            enter_step(span, Step::ConsistencyApply);
            let consistency = self
                .engine
                .apply(current)
                .map_err(engine_error(Step::ConsistencyApply))?;
            failures.extend(scenario.exemptions.verify_consistency(&consistency));
        }

        Ok(upgrade)
    }
}
