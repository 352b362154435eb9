pub mod consistency;
pub(crate) mod teardown;
pub mod upgrade;

pub use consistency::ConsistencyVerifier;
pub use upgrade::{BaselineRef, UpgradeOutcome, UpgradeVerifier};

use crate::errors::{HarnessError, Step, VerificationFailure};
use tracing::Span;

pub(crate) fn scenario_span(name: &str, prefix: &str, kind: &str) -> Span {
    info_span!(
        "scenario",
        scenario = name,
        prefix = prefix,
        kind = kind,
        step = tracing::field::Empty,
    )
}

pub(crate) fn enter_step(span: &Span, step: Step) {
    span.record("step", step.to_string().as_str());
    info!("START: {}", step);
}

/// Final result of a scenario out of its run result and the recoverable failures collected.
pub(crate) fn conclude<T>(
    scenario: &str,
    result: Result<T, HarnessError>,
    failures: Vec<VerificationFailure>,
) -> Result<T, HarnessError> {
    match result {
        Err(err) => {
            error!("scenario {} aborted: {}", scenario, err);
            Err(err)
        }
        Ok(_) if !failures.is_empty() => {
            let err = HarnessError::Verification {
                scenario: scenario.to_string(),
                failures,
            };
            error!("{}", err);
            Err(err)
        }
        Ok(out) => {
            info!("scenario {} passed", scenario);
            Ok(out)
        }
    }
}
