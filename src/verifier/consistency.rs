use crate::engine::{ProvisioningEngine, Workspace};
use crate::errors::{HarnessError, HookError, Step, VerificationFailure};
use crate::plan::ApplyResult;
use crate::scenario::ScenarioConfig;
use crate::verifier::teardown::{Verdict, teardown};
use crate::verifier::{conclude, enter_step, scenario_span};
use tracing::Span;

/// Applies a scenario twice and checks the second apply only performs exempted changes.
pub struct ConsistencyVerifier<'a> {
    engine: &'a dyn ProvisioningEngine,
}

impl<'a> ConsistencyVerifier<'a> {
    pub fn new(engine: &'a dyn ProvisioningEngine) -> Self {
        ConsistencyVerifier { engine }
    }

    /// Runs apply, post apply hook, re-apply, then tears the scenario down.
    ///
    /// Returns the changes of the consistency apply. Fatal errors (initial apply, missing outputs,
    /// any engine error before the verdict) are returned as is, recoverable findings are gathered
    /// into [`HarnessError::Verification`] once teardown is over.
    pub fn run_consistency(&self, scenario: &ScenarioConfig) -> Result<ApplyResult, HarnessError> {
        let span = scenario_span(&scenario.name, &scenario.prefix, "consistency");
        let _enter = span.enter();

        let workspace = scenario.workspace();
        let mut failures = vec![];

        let result = self.verify(&span, scenario, &workspace, &mut failures);

        enter_step(&span, Step::Destroy);
        teardown(
            self.engine,
            &workspace,
            &scenario.exemptions,
            scenario.teardown,
            Verdict::from_run(&result, &failures),
            &mut failures,
        );
        scenario.release_region();

        conclude(&scenario.name, result, failures)
    }

    fn verify(
        &self,
        span: &Span,
        scenario: &ScenarioConfig,
        workspace: &Workspace,
        failures: &mut Vec<VerificationFailure>,
    ) -> Result<ApplyResult, HarnessError> {
        let engine_error = |step: Step| move |err| HarnessError::terraform(step, &workspace.name, err);

        enter_step(span, Step::Workspace);
        self.engine
            .select_or_create_workspace(workspace)
            .map_err(engine_error(Step::Workspace))?;

        enter_step(span, Step::InitialApply);
        let initial = self
            .engine
            .apply(workspace)
            .map_err(engine_error(Step::InitialApply))?;

        if let Some(hook) = &scenario.post_apply_hook {
            info!("running {}", hook.name());
            match hook.run(&initial.outputs) {
                Ok(_) => {}
                Err(HookError::MissingOutputs { keys }) => return Err(HarnessError::MissingOutputs { keys }),
                Err(err) => failures.push(VerificationFailure::Hook(err)),
            }
        }

        enter_step(span, Step::ConsistencyApply);
        let consistency = self
            .engine
            .apply(workspace)
            .map_err(engine_error(Step::ConsistencyApply))?;

        let findings = scenario.exemptions.verify_consistency(&consistency);
        for finding in findings.iter() {
            error!("{}", finding);
        }
        failures.extend(findings);

        Ok(consistency)
    }
}
