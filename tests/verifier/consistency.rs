use crate::helpers::engine::{EngineCall, FakeEngine, Operation};
use crate::helpers::{changes, no_changes, scenario};
use ocp_test_harness::cmd::terraform::TerraformError;
use ocp_test_harness::config::TeardownPolicy;
use ocp_test_harness::errors::{HarnessError, HookError, Severity, Step, VerificationFailure};
use ocp_test_harness::hooks::validate_outputs;
use ocp_test_harness::plan::Outputs;
use ocp_test_harness::verifier::ConsistencyVerifier;
use serde_json::json;
use std::sync::Arc;
use tracing_test::traced_test;

#[test]
#[traced_test]
fn test_consistent_scenario() {
    let engine = FakeEngine::new()
        .on_apply("ocp-standard", changes(&["module.ocp_base.ibm_container_vpc_cluster.cluster"], &[], &[]))
        .on_apply("ocp-standard", no_changes());
    let scenario = scenario("standard", "ocp-standard").build().expect("valid scenario");

    let result = ConsistencyVerifier::new(&engine).run_consistency(&scenario);

    assert_eq!(result.expect("consistent scenario"), no_changes());
    assert_eq!(
        engine.call_kinds("ocp-standard"),
        vec!["select", "apply", "apply", "destroy", "delete"]
    );
    assert!(logs_contain("START: consistency apply"));
    assert!(logs_contain("scenario standard passed"));
}

#[test]
fn test_exempted_changes_are_not_drift() {
    let engine = FakeEngine::new().on_apply("ocp-standard", no_changes()).on_apply(
        "ocp-standard",
        changes(
            &["module.ocp_base.null_resource.confirm_network_healthy"],
            &["module.ocp_base.ibm_container_addons.addons"],
            &[],
        ),
    );
    let scenario = scenario("standard", "ocp-standard")
        .ignore_adds(&["module.ocp_base.null_resource.confirm_network_healthy"])
        .ignore_updates(&["module.ocp_base.ibm_container_addons.addons"])
        .build()
        .expect("valid scenario");

    assert!(ConsistencyVerifier::new(&engine).run_consistency(&scenario).is_ok());
}

#[test]
fn test_drift_fails_after_teardown() {
    let engine = FakeEngine::new().on_apply("ocp-standard", no_changes()).on_apply(
        "ocp-standard",
        changes(
            &[],
            &[
                "module.ocp_base.ibm_container_addons.addons",
                "module.ocp_base.ibm_container_vpc_worker_pool.pool[\"logging\"]",
            ],
            &[],
        ),
    );
    let scenario = scenario("standard", "ocp-standard")
        .ignore_updates(&["module.ocp_base.ibm_container_addons.addons"])
        .build()
        .expect("valid scenario");

    let err = ConsistencyVerifier::new(&engine)
        .run_consistency(&scenario)
        .expect_err("drift");

    assert_eq!(err.severity(), Severity::Recoverable);
    match err.failures() {
        [VerificationFailure::Drift(report)] => {
            let drifted = report.addresses().map(|a| a.to_string()).collect::<Vec<_>>();
            assert_eq!(
                drifted,
                vec!["module.ocp_base.ibm_container_vpc_worker_pool.pool[\"logging\"]"]
            );
        }
        failures => panic!("unexpected failures {failures:?}"),
    }
    assert_eq!(
        engine.call_kinds("ocp-standard"),
        vec!["select", "apply", "apply", "destroy", "delete"]
    );
}

#[test]
fn test_failed_initial_apply_still_tears_down() {
    let engine = FakeEngine::new().on_apply_error(
        "ocp-standard",
        TerraformError::Apply {
            raw_message: "Error: timeout while waiting for state to become 'normal'".to_string(),
        },
    );
    let scenario = scenario("standard", "ocp-standard").build().expect("valid scenario");

    let err = ConsistencyVerifier::new(&engine)
        .run_consistency(&scenario)
        .expect_err("apply failure");

    assert_eq!(err.severity(), Severity::Fatal);
    assert!(matches!(
        err,
        HarnessError::Terraform {
            step: Step::InitialApply,
            ..
        }
    ));
    assert_eq!(
        engine.call_kinds("ocp-standard"),
        vec!["select", "apply", "destroy", "delete"]
    );
}

#[test]
fn test_keep_on_failure_skips_teardown() {
    let engine = FakeEngine::new()
        .on_apply("ocp-standard", no_changes())
        .on_apply("ocp-standard", changes(&[], &["module.ocp_base.ibm_container_addons.addons"], &[]));
    let scenario = scenario("standard", "ocp-standard")
        .teardown(TeardownPolicy::KeepOnFailure)
        .build()
        .expect("valid scenario");

    assert!(ConsistencyVerifier::new(&engine).run_consistency(&scenario).is_err());
    assert_eq!(engine.call_kinds("ocp-standard"), vec!["select", "apply", "apply"]);
}

#[test]
fn test_keep_on_failure_tears_down_passed_scenario() {
    let engine = FakeEngine::new();
    let scenario = scenario("standard", "ocp-standard")
        .teardown(TeardownPolicy::KeepOnFailure)
        .build()
        .expect("valid scenario");

    assert!(ConsistencyVerifier::new(&engine).run_consistency(&scenario).is_ok());
    assert_eq!(
        engine.call_kinds("ocp-standard"),
        vec!["select", "apply", "apply", "destroy", "delete"]
    );
}

#[test]
fn test_missing_outputs_abort_the_scenario() {
    let engine = FakeEngine::new().on_apply(
        "ocp-standard",
        no_changes().with_outputs(btreemap! {"cluster_id".to_string() => json!("cq2h3")}),
    );
    let hook = |outputs: &Outputs| validate_outputs(outputs, &["cluster_id", "cluster_name"]);
    let scenario = scenario("standard", "ocp-standard")
        .post_apply_hook(Arc::new(hook))
        .build()
        .expect("valid scenario");

    let err = ConsistencyVerifier::new(&engine)
        .run_consistency(&scenario)
        .expect_err("missing outputs");

    match err {
        HarnessError::MissingOutputs { keys } => assert_eq!(keys, vec!["cluster_name"]),
        err => panic!("unexpected error {err}"),
    }
    assert_eq!(
        engine.call_kinds("ocp-standard"),
        vec!["select", "apply", "destroy", "delete"]
    );
}

#[test]
fn test_failing_hook_is_recoverable() {
    let engine = FakeEngine::new();
    let hook = |_: &Outputs| -> Result<(), HookError> { Err(HookError::Failed("ingress status is critical".to_string())) };
    let scenario = scenario("advanced", "base-ocp-adv")
        .post_apply_hook(Arc::new(hook))
        .build()
        .expect("valid scenario");

    let err = ConsistencyVerifier::new(&engine)
        .run_consistency(&scenario)
        .expect_err("hook failure");

    assert_eq!(err.severity(), Severity::Recoverable);
    assert!(matches!(err.failures(), [VerificationFailure::Hook(HookError::Failed(_))]));
    // the consistency apply still runs
    assert_eq!(
        engine.call_kinds("base-ocp-adv"),
        vec!["select", "apply", "apply", "destroy", "delete"]
    );
}

#[test]
fn test_implicit_destroys() {
    let engine = FakeEngine::new().on_apply("ocp-standard", no_changes()).on_apply(
        "ocp-standard",
        changes(&[], &[], &["module.ocp_base.null_resource.reset_api_key"]),
    );
    let scenario = scenario("standard", "ocp-standard")
        .implicit_destroy(&["module.ocp_base.null_resource.reset_api_key"])
        .build()
        .expect("valid scenario");

    assert!(ConsistencyVerifier::new(&engine).run_consistency(&scenario).is_ok());
    assert_eq!(
        engine.call_kinds("ocp-standard"),
        vec!["select", "apply", "apply", "state_rm", "destroy", "delete"]
    );
    assert!(engine.calls().contains(&EngineCall::StateRm {
        name: scenario.prefix.clone(),
        address: "module.ocp_base.null_resource.reset_api_key".to_string(),
    }));
}

#[test]
fn test_missing_implicit_destroy() {
    let engine = FakeEngine::new();
    let scenario = scenario("standard", "ocp-standard")
        .implicit_destroy(&["module.ocp_base.null_resource.reset_api_key"])
        .build()
        .expect("valid scenario");

    let err = ConsistencyVerifier::new(&engine)
        .run_consistency(&scenario)
        .expect_err("destroy did not happen");
    assert!(matches!(
        err.failures(),
        [VerificationFailure::MissingImplicitDestroy(_)]
    ));

    let engine = FakeEngine::new().failing("ocp-standard", Operation::StateRm);
    let scenario = crate::helpers::scenario("standard", "ocp-standard")
        .implicit_destroy(&["module.ocp_base.null_resource.reset_api_key"])
        .implicit_required(false)
        .build()
        .expect("valid scenario");
    assert!(ConsistencyVerifier::new(&engine).run_consistency(&scenario).is_ok());
}

#[test]
fn test_failed_destroy_keeps_workspace() {
    let engine = FakeEngine::new().failing("ocp-standard", Operation::Destroy);
    let scenario = scenario("standard", "ocp-standard").build().expect("valid scenario");

    let err = ConsistencyVerifier::new(&engine)
        .run_consistency(&scenario)
        .expect_err("teardown failure");

    assert!(matches!(
        err.failures(),
        [VerificationFailure::Teardown {
            step: Step::Destroy,
            ..
        }]
    ));
    assert_eq!(
        engine.call_kinds("ocp-standard"),
        vec!["select", "apply", "apply", "destroy"]
    );
}
