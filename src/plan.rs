use crate::address::{AddressError, ResourceAddress};
use serde_derive::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use strum_macros::Display;
use thiserror::Error;

/// Terraform outputs, keyed by output name.
pub type Outputs = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Destroyed,
}

#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("invalid plan document: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("plan references an invalid resource address: {0}")]
    InvalidAddress(#[from] AddressError),
}

/// Resource changes of one apply, plus the outputs the configuration exposes afterward.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyResult {
    pub added: BTreeSet<ResourceAddress>,
    pub updated: BTreeSet<ResourceAddress>,
    pub destroyed: BTreeSet<ResourceAddress>,
    pub outputs: Outputs,
}

#[derive(Deserialize)]
struct PlanDocument {
    #[serde(default)]
    resource_changes: Vec<PlanResourceChange>,
}

#[derive(Deserialize)]
struct PlanResourceChange {
    address: String,
    change: PlanChange,
}

#[derive(Deserialize)]
struct PlanChange {
    actions: Vec<String>,
}

impl ApplyResult {
    /// Builds the change set out of `terraform show -json <planfile>`.
    ///
    /// A replacement (`delete` + `create`, in either order) is recorded both as destroyed and added.
    /// `no-op` and `read` actions do not change anything.
    pub fn from_plan_json(plan_json: &str) -> Result<ApplyResult, PlanParseError> {
        let document: PlanDocument = serde_json::from_str(plan_json)?;
        let mut result = ApplyResult::default();

        for resource_change in document.resource_changes {
            let actions = &resource_change.change.actions;
            let creates = actions.iter().any(|a| a == "create");
            let deletes = actions.iter().any(|a| a == "delete");
            let updates = actions.iter().any(|a| a == "update");

            if !(creates || deletes || updates) {
                continue;
            }

            let address = ResourceAddress::from_str(&resource_change.address)?;
            if creates {
                result.record(ChangeKind::Added, address.clone());
            }
            if deletes {
                result.record(ChangeKind::Destroyed, address.clone());
            }
            if updates {
                result.record(ChangeKind::Updated, address);
            }
        }

        Ok(result)
    }

    pub fn record(&mut self, kind: ChangeKind, address: ResourceAddress) {
        match kind {
            ChangeKind::Added => self.added.insert(address),
            ChangeKind::Updated => self.updated.insert(address),
            ChangeKind::Destroyed => self.destroyed.insert(address),
        };
    }

    pub fn with_outputs(mut self, outputs: Outputs) -> ApplyResult {
        self.outputs = outputs;
        self
    }

    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.destroyed.is_empty())
    }

    /// Every recorded change, added first, then updated, then destroyed.
    pub fn changes(&self) -> impl Iterator<Item = (ChangeKind, &ResourceAddress)> {
        self.added
            .iter()
            .map(|a| (ChangeKind::Added, a))
            .chain(self.updated.iter().map(|a| (ChangeKind::Updated, a)))
            .chain(self.destroyed.iter().map(|a| (ChangeKind::Destroyed, a)))
    }
}
