use crate::helpers::engine::{EngineCall, FakeEngine};
use crate::helpers::git::{BASELINE_TAG, module_repository};
use crate::helpers::{changes, no_changes, scenario};
use ocp_test_harness::cmd::terraform::TerraformError;
use ocp_test_harness::errors::{HarnessError, Step, VerificationFailure};
use ocp_test_harness::verifier::{BaselineRef, UpgradeOutcome, UpgradeVerifier};
use std::path::Path;

fn baseline(repo_dir: &Path) -> BaselineRef {
    BaselineRef::new(repo_dir, BASELINE_TAG, "examples/standard")
}

#[test]
fn test_upgrade() {
    let (repo_dir, _repo) = module_repository(&["feat: add worker pool taints"]);
    let upgrade = changes(&[], &["module.ocp_base.ibm_container_vpc_worker_pool.pool[\"default\"]"], &[]);
    let engine = FakeEngine::new()
        .on_apply("base-ocp-upg", no_changes())
        .on_plan("base-ocp-upg", upgrade.clone())
        .on_apply("base-ocp-upg", upgrade.clone());
    let scenario = scenario("upgrade", "base-ocp-upg").build().expect("valid scenario");

    let outcome = UpgradeVerifier::new(&engine)
        .run_upgrade(&scenario, &baseline(repo_dir.path()))
        .expect("upgrade passes");

    assert_eq!(outcome, UpgradeOutcome::Passed(upgrade));
    assert_eq!(
        engine.call_kinds("base-ocp-upg"),
        vec!["select", "apply", "select", "transfer", "plan", "apply", "destroy", "delete"]
    );

    let calls = engine.calls();
    let applied_dirs = calls
        .iter()
        .filter_map(|call| match call {
            EngineCall::Apply { dir, .. } => Some(dir.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert!(applied_dirs[0].ends_with("examples/standard"));
    assert_ne!(applied_dirs[0], scenario.terraform_dir);
    assert_eq!(applied_dirs[1], scenario.terraform_dir);
    // the state is held by the current workspace once transferred
    assert!(calls.contains(&EngineCall::Destroy(scenario.prefix.clone())));
    assert!(calls.iter().any(|call| matches!(
        call,
        EngineCall::TransferState { from, to, .. } if *from == applied_dirs[0] && *to == scenario.terraform_dir
    )));
}

#[test]
fn test_declared_skip() {
    let (repo_dir, _repo) = module_repository(&[]);
    let engine = FakeEngine::new();
    let scenario = scenario("upgrade", "base-ocp-upg")
        .skip_upgrade("fscloud profile cannot be upgraded in place")
        .build()
        .expect("valid scenario");

    let outcome = UpgradeVerifier::new(&engine)
        .run_upgrade(&scenario, &baseline(repo_dir.path()))
        .expect("skipped");

    assert!(outcome.is_skipped());
    assert!(engine.calls().is_empty());
}

#[test]
fn test_breaking_change_commit_skips() {
    let (repo_dir, _repo) = module_repository(&[
        "fix: pin provider",
        "feat!: remove classic infrastructure support\n\nBREAKING CHANGE: classic clusters are gone",
    ]);
    let engine = FakeEngine::new();
    let scenario = scenario("upgrade", "base-ocp-upg").build().expect("valid scenario");

    match UpgradeVerifier::new(&engine).run_upgrade(&scenario, &baseline(repo_dir.path())) {
        Ok(UpgradeOutcome::Skipped { reason }) => assert!(reason.contains("opts out of the upgrade test")),
        outcome => panic!("unexpected outcome {outcome:?}"),
    }
    assert!(engine.calls().is_empty());
}

#[test]
fn test_unknown_baseline() {
    let (repo_dir, _repo) = module_repository(&[]);
    let engine = FakeEngine::new();
    let scenario = scenario("upgrade", "base-ocp-upg").build().expect("valid scenario");

    let err = UpgradeVerifier::new(&engine)
        .run_upgrade(&scenario, &BaselineRef::new(repo_dir.path(), "v0.0.1", "examples/standard"))
        .expect_err("unknown tag");

    assert!(matches!(err, HarnessError::Baseline { .. }));
    assert!(engine.calls().is_empty());
}

#[test]
fn test_destructive_upgrade_is_not_applied() {
    let (repo_dir, _repo) = module_repository(&["refactor: rename access tags"]);
    let engine = FakeEngine::new().on_plan(
        "base-ocp-upg",
        changes(
            &["module.ocp_base.ibm_resource_tag.cluster_access_tag[0]"],
            &[],
            &[
                "module.ocp_base.ibm_resource_tag.cluster_access_tag[0]",
                "module.ocp_base.null_resource.confirm_network_healthy",
            ],
        ),
    );
    let scenario = scenario("upgrade", "base-ocp-upg")
        .ignore_destroys(&["module.ocp_base.null_resource.confirm_network_healthy"])
        .build()
        .expect("valid scenario");

    let err = UpgradeVerifier::new(&engine)
        .run_upgrade(&scenario, &baseline(repo_dir.path()))
        .expect_err("destructive upgrade");

    match err.failures() {
        [VerificationFailure::DestructiveUpgrade(report)] => assert_eq!(
            report.addresses().map(|a| a.to_string()).collect::<Vec<_>>(),
            vec!["module.ocp_base.ibm_resource_tag.cluster_access_tag[0]"]
        ),
        failures => panic!("unexpected failures {failures:?}"),
    }
    assert_eq!(
        engine.call_kinds("base-ocp-upg"),
        vec!["select", "apply", "select", "transfer", "plan", "destroy", "delete"]
    );
}

#[test]
fn test_cluster_replacement_is_forbidden_even_exempted() {
    let (repo_dir, _repo) = module_repository(&["feat: change cluster flavor"]);
    let engine = FakeEngine::new().on_plan(
        "base-ocp-upg",
        changes(
            &["module.ocp_base.ibm_container_vpc_cluster.cluster[0]"],
            &[],
            &["module.ocp_base.ibm_container_vpc_cluster.cluster[0]"],
        ),
    );
    let scenario = scenario("upgrade", "base-ocp-upg")
        .ignore_destroys(&["module.ocp_base.ibm_container_vpc_cluster.cluster[0]"])
        .build()
        .expect("valid scenario");

    let err = UpgradeVerifier::new(&engine)
        .run_upgrade(&scenario, &baseline(repo_dir.path()))
        .expect_err("forbidden change");

    assert!(matches!(err.failures(), [VerificationFailure::ForbiddenChange(_)]));
    assert_eq!(
        engine.call_kinds("base-ocp-upg"),
        vec!["select", "apply", "select", "transfer", "plan", "destroy", "delete"]
    );
}

#[test]
fn test_apply_result_checked_after_upgrade() {
    let (repo_dir, _repo) = module_repository(&["feat: bump ocp version"]);
    let engine = FakeEngine::new()
        .on_apply("base-ocp-upg", no_changes())
        .on_apply("base-ocp-upg", no_changes())
        .on_apply(
            "base-ocp-upg",
            changes(&[], &["module.ocp_base.ibm_container_vpc_cluster.cluster[0]"], &[]),
        );
    let scenario = scenario("upgrade", "base-ocp-upg")
        .check_apply_result_for_upgrade(true)
        .build()
        .expect("valid scenario");

    let err = UpgradeVerifier::new(&engine)
        .run_upgrade(&scenario, &baseline(repo_dir.path()))
        .expect_err("drift after upgrade");

    assert!(matches!(err.failures(), [VerificationFailure::Drift(_)]));
    assert_eq!(
        engine.call_kinds("base-ocp-upg"),
        vec![
            "select", "apply", "select", "transfer", "plan", "apply", "apply", "destroy", "delete"
        ]
    );
}

#[test]
fn test_failed_baseline_apply_tears_baseline_down() {
    let (repo_dir, _repo) = module_repository(&["feat: bump ocp version"]);
    let engine = FakeEngine::new().on_apply_error(
        "base-ocp-upg",
        TerraformError::Apply {
            raw_message: "Error: The specified OpenShift version is not supported".to_string(),
        },
    );
    let scenario = scenario("upgrade", "base-ocp-upg").build().expect("valid scenario");

    let err = UpgradeVerifier::new(&engine)
        .run_upgrade(&scenario, &baseline(repo_dir.path()))
        .expect_err("baseline failure");

    assert!(matches!(
        err,
        HarnessError::Terraform {
            step: Step::BaselineApply,
            ..
        }
    ));
    assert_eq!(
        engine.call_kinds("base-ocp-upg"),
        vec!["select", "apply", "destroy", "delete"]
    );
}
