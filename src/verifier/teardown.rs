use crate::config::TeardownPolicy;
use crate::drift::ExemptionPolicy;
use crate::engine::{ProvisioningEngine, Workspace};
use crate::errors::{Step, VerificationFailure};

/// How the verification went before teardown, decides where teardown problems are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Passed,
    /// Recoverable failures were recorded, teardown problems are added to them.
    Failed,
    /// A fatal error is being propagated, teardown problems are only logged.
    Aborted,
}

impl Verdict {
    pub(crate) fn from_run<T, E>(result: &Result<T, E>, failures: &[VerificationFailure]) -> Verdict {
        match (result, failures.is_empty()) {
            (Err(_), _) => Verdict::Aborted,
            (Ok(_), false) => Verdict::Failed,
            (Ok(_), true) => Verdict::Passed,
        }
    }

    pub(crate) fn has_failed(&self) -> bool {
        !matches!(self, Verdict::Passed)
    }
}

/// Releases everything a scenario created in `workspace`: implicit destroys are removed from state
/// first, then the resources are destroyed and the workspace deleted.
pub(crate) fn teardown(
    engine: &dyn ProvisioningEngine,
    workspace: &Workspace,
    exemptions: &ExemptionPolicy,
    policy: TeardownPolicy,
    verdict: Verdict,
    failures: &mut Vec<VerificationFailure>,
) {
    if !policy.should_teardown(verdict.has_failed()) {
        warn!(
            "scenario failed, keeping workspace {} and its resources in {} for debugging. Delete them manually once done.",
            workspace.name,
            workspace.terraform_dir.display()
        );
        return;
    }

    info!("START: teardown of workspace {}", workspace.name);
    let mut report = |failure: VerificationFailure| match verdict {
        Verdict::Aborted => error!("{}", failure),
        _ => failures.push(failure),
    };

    for address in exemptions.implicit_destroys() {
        if let Err(err) = engine.state_rm(workspace, address) {
            match exemptions.implicit_required() {
                true => report(VerificationFailure::ImplicitDestroy {
                    address: address.clone(),
                    reason: err.to_string(),
                }),
                false => warn!("cannot remove {} from state, ignoring it: {}", address, err),
            }
        }
    }

    if let Err(err) = engine.destroy(workspace) {
        report(VerificationFailure::Teardown {
            step: Step::Destroy,
            workspace: workspace.name.clone(),
            reason: err.to_string(),
        });
        // deleting the workspace now would lose track of what is left
        warn!(
            "workspace {} is kept since some of its resources may still exist",
            workspace.name
        );
        return;
    }

    if let Err(err) = engine.delete_workspace(workspace) {
        report(VerificationFailure::Teardown {
            step: Step::DeleteWorkspace,
            workspace: workspace.name.clone(),
            reason: err.to_string(),
        });
    }
    info!("END: teardown of workspace {}", workspace.name);
}
