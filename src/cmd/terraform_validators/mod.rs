use crate::cmd::terraform_validators::no_destructive_changes_validator::NoDestructiveChangesValidator;
use crate::constants::PROTECTED_CLUSTER_RESOURCE_TYPES;
use crate::plan::ApplyResult;
use std::sync::Arc;
use thiserror::Error;

pub mod no_destructive_changes_validator;

#[derive(Clone, Error, Debug, PartialEq, Eq)]
pub enum TerraformValidationError {
    #[error("Error, resource `{resource}` has forbidden destructive changes: {address}")]
    HasForbiddenDestructiveChanges {
        validator_name: String,
        validator_description: String,
        resource: String,
        address: String,
    },
}

/// Checks run against the changes planned by an upgrade, before anything is applied.
#[derive(Clone, Default)]
pub enum TerraformValidators {
    None,
    #[default]
    Default,
    Custom(Vec<Arc<dyn TerraformValidator>>),
}

impl TerraformValidators {
    pub fn validate(&self, plan: &ApplyResult) -> Result<(), TerraformValidationError> {
        match self {
            TerraformValidators::None => {}
            TerraformValidators::Default => {
                NoDestructiveChangesValidator::new(&PROTECTED_CLUSTER_RESOURCE_TYPES).validate(plan)?;
            }
            TerraformValidators::Custom(validators) => {
                for validator in validators.iter() {
                    validator.validate(plan)?;
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for TerraformValidators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerraformValidators::None => f.write_str("None"),
            TerraformValidators::Default => f.write_str("Default"),
            TerraformValidators::Custom(validators) => f
                .debug_tuple("Custom")
                .field(&validators.iter().map(|v| v.name()).collect::<Vec<_>>())
                .finish(),
        }
    }
}

pub trait TerraformValidator: Send + Sync {
    fn name(&self) -> String;
    fn description(&self) -> String;
    fn validate(&self, plan: &ApplyResult) -> Result<(), TerraformValidationError>;
}
