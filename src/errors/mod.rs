use crate::address::{AddressError, ResourceAddress};
use crate::cmd::terraform::TerraformError;
use crate::cmd::terraform_validators::TerraformValidationError;
use crate::drift::{DriftReport, ExemptionKind};
use crate::schematics::SchematicsError;
use itertools::Itertools;
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;

/// Severity: how a scenario error affects the rest of the scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Fatal: no further verification step runs, teardown still does.
    Fatal,
    /// Recoverable: recorded as a test failure, the scenario runs to completion.
    Recoverable,
}

/// Step: lifecycle step of a scenario, used to give context to errors.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Step {
    #[strum(serialize = "workspace selection")]
    Workspace,
    #[strum(serialize = "initial apply")]
    InitialApply,
    #[strum(serialize = "consistency apply")]
    ConsistencyApply,
    #[strum(serialize = "baseline apply")]
    BaselineApply,
    #[strum(serialize = "upgrade plan")]
    UpgradePlan,
    #[strum(serialize = "upgrade apply")]
    UpgradeApply,
    #[strum(serialize = "state transfer")]
    StateTransfer,
    #[strum(serialize = "template upload")]
    Upload,
    #[strum(serialize = "state removal")]
    StateRemoval,
    #[strum(serialize = "destroy")]
    Destroy,
    #[strum(serialize = "workspace deletion")]
    DeleteWorkspace,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set or empty")]
    MissingEnvironmentVariable(String),
    #[error("invalid {kind} exemption: {source}")]
    InvalidExemption {
        kind: ExemptionKind,
        #[source]
        source: AddressError,
    },
    #[error("`{address}` is exempted both as an update and as a destroy")]
    AmbiguousExemption { address: String },
    #[error("unknown addon `{0}`")]
    UnknownAddon(String),
    #[error("addon `{0}` is declared more than once")]
    DuplicateAddon(String),
    #[error("variable `{name}` is invalid: {reason}")]
    InvalidVariable { name: String, reason: String },
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HookError {
    #[error("outputs not found or null: {}", .keys.join(", "))]
    MissingOutputs { keys: Vec<String> },
    #[error("{what} still not satisfied after {}s{}", .after.as_secs(), .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Timeout {
        what: String,
        after: Duration,
        last_error: Option<String>,
    },
    #[error("{0}")]
    Failed(String),
}

/// VerificationFailure: a finding which fails the scenario without aborting it.
#[derive(Debug, Error)]
pub enum VerificationFailure {
    #[error("unexpected changes on re-apply: {0}")]
    Drift(DriftReport),
    #[error("unexpected destructive changes during upgrade: {0}")]
    DestructiveUpgrade(DriftReport),
    #[error(transparent)]
    ForbiddenChange(#[from] TerraformValidationError),
    #[error("expected destroys did not happen: {}", .0.iter().join(", "))]
    MissingImplicitDestroy(Vec<ResourceAddress>),
    #[error("post apply hook failed: {0}")]
    Hook(HookError),
    #[error("cannot remove `{address}` from state before teardown: {reason}")]
    ImplicitDestroy { address: ResourceAddress, reason: String },
    #[error("teardown {step} failed for workspace `{workspace}`: {reason}")]
    Teardown {
        step: Step,
        workspace: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid scenario configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("terraform {step} failed for workspace `{workspace}`: {source}")]
    Terraform {
        step: Step,
        workspace: String,
        #[source]
        source: TerraformError,
    },
    #[error("schematics {step} failed for workspace `{workspace}`: {source}")]
    Schematics {
        step: Step,
        workspace: String,
        #[source]
        source: SchematicsError,
    },
    #[error("outputs not found or null: {}", .keys.join(", "))]
    MissingOutputs { keys: Vec<String> },
    #[error("cannot prepare upgrade baseline `{git_ref}`: {source}")]
    Baseline {
        git_ref: String,
        #[source]
        source: git2::Error,
    },
    #[error("cannot {action}: {source}")]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scenario `{scenario}` failed:\n{}", .failures.iter().map(|f| format!("  - {f}")).join("\n"))]
    Verification {
        scenario: String,
        failures: Vec<VerificationFailure>,
    },
}

impl HarnessError {
    pub fn terraform(step: Step, workspace: &str, source: TerraformError) -> HarnessError {
        HarnessError::Terraform {
            step,
            workspace: workspace.to_string(),
            source,
        }
    }

    pub fn io(action: impl Into<String>, source: std::io::Error) -> HarnessError {
        HarnessError::Io {
            action: action.into(),
            source,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            HarnessError::Verification { .. } => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    /// Recoverable findings carried by the error, empty for fatal errors.
    pub fn failures(&self) -> &[VerificationFailure] {
        match self {
            HarnessError::Verification { failures, .. } => failures,
            _ => &[],
        }
    }
}
