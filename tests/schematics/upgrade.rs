use crate::helpers::git::{BASELINE_TAG, module_repository};
use crate::helpers::schematics::FakeSchematics;
use crate::helpers::{changes, no_changes};
use ocp_test_harness::config::TeardownPolicy;
use ocp_test_harness::errors::VerificationFailure;
use ocp_test_harness::schematics::{JobKind, SchematicsOptions, SchematicsTest, SchematicsVar};
use ocp_test_harness::verifier::{BaselineRef, UpgradeOutcome};
use std::path::Path;

fn options(repo_root: &Path) -> SchematicsOptions {
    SchematicsOptions::new("base-ocp-upg", repo_root, "examples/standard")
        .include_patterns(&["*.tf", "examples/standard/*.tf"])
        .var(SchematicsVar::string("ocp_version", "4.16"))
        .teardown(TeardownPolicy::Always)
}

#[test]
fn test_schematics_upgrade() {
    let (repo_dir, _repo) = module_repository(&["feat: worker pool labels"]);
    let upgrade = changes(&[], &["module.ocp_base.ibm_container_vpc_worker_pool.pool[\"default\"]"], &[]);
    let service = FakeSchematics::new()
        .on_job(JobKind::Apply, Ok(no_changes()))
        .on_job(JobKind::Plan, Ok(upgrade.clone()))
        .on_job(JobKind::Apply, Ok(upgrade.clone()));

    let outcome = SchematicsTest::new(&service)
        .run_upgrade(
            &options(repo_dir.path()),
            &BaselineRef::new(repo_dir.path(), BASELINE_TAG, "examples/standard"),
        )
        .expect("upgrade passes");

    assert_eq!(outcome, UpgradeOutcome::Passed(upgrade));
    assert_eq!(
        service.jobs(),
        vec![JobKind::Apply, JobKind::Plan, JobKind::Apply, JobKind::Destroy]
    );
    // baseline first, then the current checkout
    assert_eq!(service.uploads().len(), 2);
    assert!(service.workspace_deleted());
}

#[test]
fn test_destructive_schematics_upgrade() {
    let (repo_dir, _repo) = module_repository(&["refactor: move cbr rules"]);
    let service = FakeSchematics::new().on_job(
        JobKind::Plan,
        Ok(changes(&[], &[], &["module.ocp_base.module.cbr_rule[0].ibm_cbr_rule.cbr_rule"])),
    );

    let err = SchematicsTest::new(&service)
        .run_upgrade(
            &options(repo_dir.path()),
            &BaselineRef::new(repo_dir.path(), BASELINE_TAG, "examples/standard"),
        )
        .expect_err("destructive upgrade");

    assert!(matches!(err.failures(), [VerificationFailure::DestructiveUpgrade(_)]));
    assert_eq!(service.jobs(), vec![JobKind::Apply, JobKind::Plan, JobKind::Destroy]);
    assert!(!service.workspace_deleted());
}

#[test]
fn test_skipped_schematics_upgrade() {
    let (repo_dir, _repo) = module_repository(&["chore: SKIP UPGRADE TEST, state layout changed"]);
    let service = FakeSchematics::new();

    let outcome = SchematicsTest::new(&service)
        .run_upgrade(
            &options(repo_dir.path()),
            &BaselineRef::new(repo_dir.path(), BASELINE_TAG, "examples/standard"),
        )
        .expect("skipped");

    assert!(outcome.is_skipped());
    assert!(service.calls().is_empty());
}
