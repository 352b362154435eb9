use crate::errors::{HarnessError, Step, VerificationFailure};
use crate::plan::ApplyResult;
use crate::schematics::{JobKind, SchematicsError, SchematicsOptions, SchematicsService, TarballBuilder};
use crate::verifier::teardown::Verdict;
use crate::verifier::upgrade::{export_baseline, upgrade_skip_reason};
use crate::verifier::{BaselineRef, UpgradeOutcome, conclude, enter_step, scenario_span};
use std::path::Path;
use tempfile::TempDir;
use tracing::Span;

fn schematics_error(step: Step, workspace_id: &str) -> impl Fn(SchematicsError) -> HarnessError + '_ {
    move |source| HarnessError::Schematics {
        step,
        workspace: workspace_id.to_string(),
        source,
    }
}

/// Consistency and upgrade tests run as Schematics jobs.
pub struct SchematicsTest<'a> {
    service: &'a dyn SchematicsService,
}

impl<'a> SchematicsTest<'a> {
    pub fn new(service: &'a dyn SchematicsService) -> Self {
        SchematicsTest { service }
    }

    /// Uploads the configuration, applies it, then checks a plan job only shows exempted changes.
    /// Returns the changes of that plan.
    pub fn run(&self, options: &SchematicsOptions) -> Result<ApplyResult, HarnessError> {
        let span = scenario_span(&options.prefix, &options.prefix, "schematics");
        let _enter = span.enter();
        options.validate()?;

        let tarball_dir = tarball_dir(options)?;
        let mut workspace_id = None;
        let mut failures = vec![];

        let result = self.verify(&span, options, tarball_dir.path(), &mut workspace_id, &mut failures);

        if let Some(id) = &workspace_id {
            enter_step(&span, Step::Destroy);
            self.teardown(options, id, Verdict::from_run(&result, &failures), &mut failures);
        }

        conclude(&options.prefix, result, failures)
    }

    /// Applies the configuration of `baseline` in a workspace, uploads the current one in its
    /// place, then checks nothing outside the exemptions would be destroyed before applying it.
    pub fn run_upgrade(&self, options: &SchematicsOptions, baseline: &BaselineRef) -> Result<UpgradeOutcome, HarnessError> {
        let span = scenario_span(&options.prefix, &options.prefix, "schematics-upgrade");
        let _enter = span.enter();
        options.validate()?;

        if let Some(reason) = upgrade_skip_reason(options.upgrade_skip.as_deref(), baseline)? {
            info!("upgrade test of {} skipped: {}", options.prefix, reason);
            return Ok(UpgradeOutcome::Skipped { reason });
        }

        let tarball_dir = tarball_dir(options)?;
        let mut workspace_id = None;
        let mut failures = vec![];

        let result = self.verify_upgrade(
            &span,
            options,
            baseline,
            tarball_dir.path(),
            &mut workspace_id,
            &mut failures,
        );

        if let Some(id) = &workspace_id {
            enter_step(&span, Step::Destroy);
            self.teardown(options, id, Verdict::from_run(&result, &failures), &mut failures);
        }

        conclude(&options.prefix, result, failures).map(UpgradeOutcome::Passed)
    }

    fn verify(
        &self,
        span: &Span,
        options: &SchematicsOptions,
        tarball_dir: &Path,
        workspace_id: &mut Option<String>,
        failures: &mut Vec<VerificationFailure>,
    ) -> Result<ApplyResult, HarnessError> {
        let tarball = TarballBuilder::new(&options.repo_root, &options.tar_include_patterns)
            .build(tarball_dir, &options.prefix)
            .map_err(schematics_error(Step::Upload, &options.prefix))?;

        let id = self.create_workspace(span, options)?;
        *workspace_id = Some(id.clone());

        enter_step(span, Step::Upload);
        self.service
            .upload_template(&id, &tarball.path)
            .map_err(schematics_error(Step::Upload, &id))?;
        self.service
            .update_variables(&id, &options.vars)
            .map_err(schematics_error(Step::Upload, &id))?;

        enter_step(span, Step::InitialApply);
        self.service
            .run_job(&id, JobKind::Apply, options.wait_job_complete)
            .map_err(schematics_error(Step::InitialApply, &id))?;

        enter_step(span, Step::ConsistencyApply);
        let consistency = self
            .service
            .run_job(&id, JobKind::Plan, options.wait_job_complete)
            .map_err(schematics_error(Step::ConsistencyApply, &id))?;

        let findings = options.exemptions.verify_consistency(&consistency);
        for finding in findings.iter() {
            error!("{}", finding);
        }
        failures.extend(findings);

        Ok(consistency)
    }

    fn verify_upgrade(
        &self,
        span: &Span,
        options: &SchematicsOptions,
        baseline: &BaselineRef,
        tarball_dir: &Path,
        workspace_id: &mut Option<String>,
        failures: &mut Vec<VerificationFailure>,
    ) -> Result<ApplyResult, HarnessError> {
        let baseline_root = tarball_dir.join("baseline");
        export_baseline(baseline, &baseline_root)?;
        let baseline_tarball = TarballBuilder::new(&baseline_root, &options.tar_include_patterns)
            .build(tarball_dir, &format!("{}-baseline", options.prefix))
            .map_err(schematics_error(Step::Upload, &options.prefix))?;
        let current_tarball = TarballBuilder::new(&options.repo_root, &options.tar_include_patterns)
            .build(tarball_dir, &options.prefix)
            .map_err(schematics_error(Step::Upload, &options.prefix))?;

        let id = self.create_workspace(span, options)?;
        *workspace_id = Some(id.clone());

        enter_step(span, Step::Upload);
        self.service
            .upload_template(&id, &baseline_tarball.path)
            .map_err(schematics_error(Step::Upload, &id))?;
        self.service
            .update_variables(&id, &options.vars)
            .map_err(schematics_error(Step::Upload, &id))?;

        enter_step(span, Step::BaselineApply);
        self.service
            .run_job(&id, JobKind::Apply, options.wait_job_complete)
            .map_err(schematics_error(Step::BaselineApply, &id))?;

        enter_step(span, Step::Upload);
        self.service
            .upload_template(&id, &current_tarball.path)
            .map_err(schematics_error(Step::Upload, &id))?;

        enter_step(span, Step::UpgradePlan);
        let plan = self
            .service
            .run_job(&id, JobKind::Plan, options.wait_job_complete)
            .map_err(schematics_error(Step::UpgradePlan, &id))?;

        if let Err(err) = options.validators.validate(&plan) {
            error!("{}", err);
            failures.push(VerificationFailure::ForbiddenChange(err));
        }
        let destructive = options.exemptions.destructive_drift(&plan);
        if !destructive.is_empty() {
            error!("upgrade would destroy: {}", destructive);
            failures.push(VerificationFailure::DestructiveUpgrade(destructive));
        }
        if !failures.is_empty() {
            warn!("upgrade of {} is not applied", options.prefix);
            return Ok(plan);
        }

        enter_step(span, Step::UpgradeApply);
        let upgrade = self
            .service
            .run_job(&id, JobKind::Apply, options.wait_job_complete)
            .map_err(schematics_error(Step::UpgradeApply, &id))?;

        if options.check_apply_result_for_upgrade {
            enter_step(span, Step::ConsistencyApply);
            let consistency = self
                .service
                .run_job(&id, JobKind::Plan, options.wait_job_complete)
                .map_err(schematics_error(Step::ConsistencyApply, &id))?;
            failures.extend(options.exemptions.verify_consistency(&consistency));
        }

        Ok(upgrade)
    }

    fn create_workspace(&self, span: &Span, options: &SchematicsOptions) -> Result<String, HarnessError> {
        enter_step(span, Step::Workspace);
        let id = self
            .service
            .create_workspace(&options.workspace_request(&options.prefix))
            .map_err(schematics_error(Step::Workspace, &options.prefix))?;
        info!("schematics workspace {} created for {}", id, options.prefix);

        Ok(id)
    }

    /// Destroys the resources then deletes the workspace. A failed test keeps the workspace unless
    /// `delete_workspace_on_fail` is set, and keeps everything when the teardown policy says so.
    fn teardown(
        &self,
        options: &SchematicsOptions,
        workspace_id: &str,
        verdict: Verdict,
        failures: &mut Vec<VerificationFailure>,
    ) {
        let failed = verdict.has_failed();
        if !options.teardown.should_teardown(failed) {
            warn!(
                "test failed, keeping schematics workspace {} and its resources for debugging. Delete them manually once done.",
                workspace_id
            );
            return;
        }

        let mut report = |failure: VerificationFailure| match verdict {
            Verdict::Aborted => error!("{}", failure),
            _ => failures.push(failure),
        };

        if let Err(err) = self
            .service
            .run_job(workspace_id, JobKind::Destroy, options.wait_job_complete)
        {
            report(VerificationFailure::Teardown {
                step: Step::Destroy,
                workspace: workspace_id.to_string(),
                reason: err.to_string(),
            });
            warn!(
                "schematics workspace {} is kept since some of its resources may still exist",
                workspace_id
            );
            return;
        }

        if failed && !options.delete_workspace_on_fail {
            warn!("test failed, schematics workspace {} is kept for debugging", workspace_id);
            return;
        }

        if let Err(err) = self.service.delete_workspace(workspace_id) {
            report(VerificationFailure::Teardown {
                step: Step::DeleteWorkspace,
                workspace: workspace_id.to_string(),
                reason: err.to_string(),
            });
        }
    }
}

fn tarball_dir(options: &SchematicsOptions) -> Result<TempDir, HarnessError> {
    tempfile::Builder::new()
        .prefix(&format!("{}-schematics-", options.prefix))
        .tempdir()
        .map_err(|e| HarnessError::io("create tarball directory", e))
}
