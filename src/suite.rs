use crate::engine::ProvisioningEngine;
use crate::errors::HarnessError;
use crate::plan::ApplyResult;
use crate::scenario::ScenarioConfig;
use crate::verifier::{BaselineRef, ConsistencyVerifier, UpgradeOutcome, UpgradeVerifier};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Result of one scenario of a suite.
#[derive(Debug)]
pub struct ScenarioOutcome<T> {
    pub name: String,
    pub result: Result<T, HarnessError>,
}

/// Results of a suite, in the order the scenarios were given.
#[derive(Debug)]
pub struct SuiteReport<T> {
    pub outcomes: Vec<ScenarioOutcome<T>>,
}

impl<T> SuiteReport<T> {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScenarioOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn passed(&self) -> impl Iterator<Item = &ScenarioOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioOutcome<T>> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// One line per failed scenario, empty when everything passed.
    pub fn failure_summary(&self) -> String {
        self.failed()
            .filter_map(|o| o.result.as_ref().err().map(|err| format!("{}: {}", o.name, err)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs independent scenarios concurrently. A failing scenario never stops its siblings.
pub struct ScenarioSuite<'a> {
    engine: &'a dyn ProvisioningEngine,
    max_parallel: usize,
}

impl<'a> ScenarioSuite<'a> {
    pub fn new(engine: &'a dyn ProvisioningEngine) -> Self {
        ScenarioSuite {
            engine,
            max_parallel: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn run_consistency(&self, scenarios: &[ScenarioConfig]) -> SuiteReport<ApplyResult> {
        let verifier = ConsistencyVerifier::new(self.engine);
        self.run(scenarios, |scenario| verifier.run_consistency(scenario))
    }

    pub fn run_upgrade(&self, scenarios: &[ScenarioConfig], baseline: &BaselineRef) -> SuiteReport<UpgradeOutcome> {
        let verifier = UpgradeVerifier::new(self.engine);
        self.run(scenarios, |scenario| verifier.run_upgrade(scenario, baseline))
    }

    fn run<T, F>(&self, scenarios: &[ScenarioConfig], run_scenario: F) -> SuiteReport<T>
    where
        T: Send,
        F: Fn(&ScenarioConfig) -> Result<T, HarnessError> + Sync,
    {
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<Result<T, HarnessError>>>> =
            Mutex::new(scenarios.iter().map(|_| None).collect());
        let current_span = tracing::Span::current();

        thread::scope(|scope| {
            for _ in 0..self.max_parallel.min(scenarios.len()) {
                scope.spawn(|| {
                    // making sure to pass the current span to the new thread not to lose any tracing info
                    let _span = current_span.enter();
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(scenario) = scenarios.get(index) else {
                            break;
                        };

                        let result = run_scenario(scenario);
                        results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())[index] = Some(result);
                    }
                });
            }
        });

        let results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        SuiteReport {
            outcomes: scenarios
                .iter()
                .zip(results)
                .map(|(scenario, result)| ScenarioOutcome {
                    name: scenario.name.clone(),
                    result: result.unwrap_or_else(|| {
                        Err(HarnessError::Config(crate::errors::ConfigError::InvalidScenario(format!(
                            "scenario `{}` did not run",
                            scenario.name
                        ))))
                    }),
                })
                .collect(),
        }
    }
}
