use crate::cmd::terraform_validators::{TerraformValidationError, TerraformValidator};
use crate::plan::ApplyResult;
use itertools::Itertools;

/// Fails when a resource of a protected type is destroyed or replaced. Exemptions do not apply.
pub struct NoDestructiveChangesValidator {
    protected_resource_types: Vec<String>,
}

impl NoDestructiveChangesValidator {
    pub fn new(protected_resource_types: &[&str]) -> Self {
        Self {
            protected_resource_types: protected_resource_types.iter().map(|r| r.to_string()).collect_vec(),
        }
    }
}

impl TerraformValidator for NoDestructiveChangesValidator {
    fn name(&self) -> String {
        "No destructive changes".to_string()
    }
    fn description(&self) -> String {
        "Prevent from resource destruction".to_string()
    }
    fn validate(&self, plan: &ApplyResult) -> Result<(), TerraformValidationError> {
        // replacements are recorded as destroyed too
        for address in plan.destroyed.iter() {
            if let Some(protected_type) = self
                .protected_resource_types
                .iter()
                .find(|t| t.as_str() == address.resource_type())
            {
                return Err(TerraformValidationError::HasForbiddenDestructiveChanges {
                    validator_name: self.name(),
                    validator_description: self.description(),
                    resource: protected_type.to_string(),
                    address: address.to_string(),
                });
            }
        }

        Ok(())
    }
}
