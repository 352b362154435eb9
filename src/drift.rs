//! Classification of the changes observed when an already applied configuration is applied again.
//!
//! Every change is either exempted (expected churn) or drift. An exemption covers its address for any
//! kind of change: a resource expected to be updated on each apply may as well show up as replaced.
//! Destroy exemptions carry an extra contract when destroys are required: the exempted resource
//! must really be destroyed, otherwise the exemption is stale and the scenario fails.

use crate::address::ResourceAddress;
use crate::errors::{ConfigError, VerificationFailure};
use crate::plan::{ApplyResult, ChangeKind};
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use strum_macros::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum ExemptionKind {
    Add,
    Update,
    Destroy,
    ImplicitDestroy,
}

/// Validated exemption lists of a scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExemptionPolicy {
    adds: BTreeSet<ResourceAddress>,
    updates: BTreeSet<ResourceAddress>,
    destroys: BTreeSet<ResourceAddress>,
    implicit_destroys: BTreeSet<ResourceAddress>,
    implicit_required: bool,
}

impl Default for ExemptionPolicy {
    fn default() -> Self {
        ExemptionPolicy {
            adds: BTreeSet::new(),
            updates: BTreeSet::new(),
            destroys: BTreeSet::new(),
            implicit_destroys: BTreeSet::new(),
            implicit_required: true,
        }
    }
}

fn parse_list<S: AsRef<str>>(kind: ExemptionKind, list: &[S]) -> Result<BTreeSet<ResourceAddress>, ConfigError> {
    list.iter()
        .map(|address| {
            ResourceAddress::from_str(address.as_ref())
                .map_err(|source| ConfigError::InvalidExemption { kind, source })
        })
        .collect()
}

impl ExemptionPolicy {
    /// Parses and cross checks the lists. Any malformed address, or an address exempted both as an
    /// update and as a (possibly implicit) destroy, is rejected.
    pub fn new<S: AsRef<str>>(
        adds: &[S],
        updates: &[S],
        destroys: &[S],
        implicit_destroys: &[S],
        implicit_required: bool,
    ) -> Result<ExemptionPolicy, ConfigError> {
        let policy = ExemptionPolicy {
            adds: parse_list(ExemptionKind::Add, adds)?,
            updates: parse_list(ExemptionKind::Update, updates)?,
            destroys: parse_list(ExemptionKind::Destroy, destroys)?,
            implicit_destroys: parse_list(ExemptionKind::ImplicitDestroy, implicit_destroys)?,
            implicit_required,
        };

        if let Some(address) = policy
            .updates
            .iter()
            .find(|a| policy.destroys.contains(*a) || policy.implicit_destroys.contains(*a))
        {
            return Err(ConfigError::AmbiguousExemption {
                address: address.to_string(),
            });
        }

        Ok(policy)
    }

    pub fn implicit_required(&self) -> bool {
        self.implicit_required
    }

    pub fn implicit_destroys(&self) -> &BTreeSet<ResourceAddress> {
        &self.implicit_destroys
    }

    pub fn is_exempted(&self, address: &ResourceAddress) -> bool {
        self.adds.contains(address)
            || self.updates.contains(address)
            || self.destroys.contains(address)
            || self.implicit_destroys.contains(address)
    }

    /// Changes of `result` not covered by any exemption.
    pub fn drift(&self, result: &ApplyResult) -> DriftReport {
        DriftReport {
            changes: result
                .changes()
                .filter(|(_, address)| !self.is_exempted(address))
                .map(|(kind, address)| (kind, address.clone()))
                .collect(),
        }
    }

    /// Destroyed resources not covered by any exemption, additions and updates are ignored.
    pub fn destructive_drift(&self, result: &ApplyResult) -> DriftReport {
        DriftReport {
            changes: result
                .destroyed
                .iter()
                .filter(|address| !self.is_exempted(address))
                .map(|address| (ChangeKind::Destroyed, address.clone()))
                .collect(),
        }
    }

    /// Destroy exemptions which did not show up as destroyed. Always empty when destroys are not required.
    pub fn missing_destroys(&self, result: &ApplyResult) -> Vec<ResourceAddress> {
        if !self.implicit_required {
            return vec![];
        }

        self.destroys
            .iter()
            .chain(self.implicit_destroys.iter())
            .filter(|address| !result.destroyed.contains(*address))
            .unique()
            .cloned()
            .collect()
    }

    /// Full consistency verdict on a re-apply: empty means the scenario is consistent.
    pub fn verify_consistency(&self, result: &ApplyResult) -> Vec<VerificationFailure> {
        let mut failures = vec![];

        let drift = self.drift(result);
        if !drift.is_empty() {
            failures.push(VerificationFailure::Drift(drift));
        }

        let missing = self.missing_destroys(result);
        if !missing.is_empty() {
            failures.push(VerificationFailure::MissingImplicitDestroy(missing));
        }

        failures
    }
}

/// Changes which were not expected. Empty means no drift.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriftReport {
    changes: Vec<(ChangeKind, ResourceAddress)>,
}

impl DriftReport {
    pub fn push(&mut self, kind: ChangeKind, address: ResourceAddress) {
        self.changes.push((kind, address));
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[(ChangeKind, ResourceAddress)] {
        &self.changes
    }

    pub fn addresses(&self) -> impl Iterator<Item = &ResourceAddress> {
        self.changes.iter().map(|(_, address)| address)
    }
}

impl Display for DriftReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let changes = self
            .changes
            .iter()
            .map(|(kind, address)| format!("{kind} {address}"))
            .join(", ");
        f.write_str(&changes)
    }
}
