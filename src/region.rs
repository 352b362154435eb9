use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;

/// Advises scenarios on which region to deploy to, so that concurrent scenarios spread over
/// constrained regions instead of piling up in the same one.
///
/// A single instance is shared by every scenario of a run, it has to be thread safe.
pub trait RegionAdvisor: Send + Sync + Debug {
    /// Best region out of `preferences`, `fallback` when there is no preference.
    fn best_region(&self, preferences: &[String], fallback: &str) -> String;

    /// Records one more scenario deployed to `region`, balanced by a `release`.
    fn acquire(&self, _region: &str) {}

    /// Hands back a region obtained from `best_region` or `acquire` once the scenario is over.
    fn release(&self, _region: &str) {}
}

/// Always answers the same region.
#[derive(Clone, Debug)]
pub struct FixedRegion(pub String);

impl RegionAdvisor for FixedRegion {
    fn best_region(&self, _preferences: &[String], _fallback: &str) -> String {
        self.0.clone()
    }
}

/// Picks the least used region of the preference list, first listed wins on a tie.
#[derive(Debug, Default)]
pub struct RegionUsageTracker {
    usage: Mutex<HashMap<String, usize>>,
}

impl RegionUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage(&self, region: &str) -> usize {
        let usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        usage.get(region).copied().unwrap_or(0)
    }
}

impl RegionAdvisor for RegionUsageTracker {
    fn best_region(&self, preferences: &[String], fallback: &str) -> String {
        let mut usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let region = preferences
            .iter()
            .enumerate()
            .min_by_key(|(position, region)| (usage.get(region.as_str()).copied().unwrap_or(0), *position))
            .map(|(_, region)| region.clone())
            .unwrap_or_else(|| fallback.to_string());

        *usage.entry(region.clone()).or_default() += 1;
        debug!("region {} selected, {} scenario(s) now using it", region, usage[&region]);
        region
    }

    fn acquire(&self, region: &str) {
        let mut usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *usage.entry(region.to_string()).or_default() += 1;
    }

    fn release(&self, region: &str) {
        let mut usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(count) = usage.get_mut(region) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Region to use out of an advisor answer: regions lacking a capability the scenario needs are
/// swapped for the fallback.
pub fn remap_excluded(region: String, excluded: &[String], fallback: &str) -> String {
    match excluded.contains(&region) {
        true => {
            info!("region {} is excluded for this scenario, using {} instead", region, fallback);
            fallback.to_string()
        }
        false => region,
    }
}
