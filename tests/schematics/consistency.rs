use crate::helpers::schematics::{FakeSchematics, SchematicsCall};
use crate::helpers::{RESOURCE_GROUP, changes, no_changes};
use ocp_test_harness::config::TeardownPolicy;
use ocp_test_harness::drift::ExemptionPolicy;
use ocp_test_harness::errors::{HarnessError, Step, VerificationFailure};
use ocp_test_harness::schematics::{
    JobKind, SchematicsError, SchematicsOptions, SchematicsTest, SchematicsVar, VarDataType,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn module_checkout() -> TempDir {
    let root = tempfile::tempdir().expect("temp dir");
    for file in [
        "main.tf",
        "variables.tf",
        "examples/fscloud/main.tf",
        "examples/standard/main.tf",
        "modules/worker-pool/main.tf",
        "tests/pr_test.go",
    ] {
        let path = root.path().join(file);
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(path, "").expect("file");
    }
    root
}

fn options(repo_root: &Path) -> SchematicsOptions {
    SchematicsOptions::new("base-ocp-fscloud", repo_root, "examples/fscloud")
        .include_patterns(&["*.tf", "examples/fscloud/*.tf", "modules/*/*.tf"])
        .resource_group(RESOURCE_GROUP)
        .region("us-south")
        .tags(&["test-schematic"])
        .terraform_version("terraform_v1.10")
        .var(SchematicsVar::string("ibmcloud_api_key", "my-api-key").secure())
        .var(SchematicsVar::string("ocp_version", "4.16"))
        .var(SchematicsVar::bool("kms_encryption_enabled_cluster", true))
        .teardown(TeardownPolicy::Always)
}

#[test]
fn test_schematics_consistency() {
    let root = module_checkout();
    let service = FakeSchematics::new()
        .on_job(JobKind::Apply, Ok(changes(&["module.fscloud.ibm_container_vpc_cluster.cluster[0]"], &[], &[])))
        .on_job(JobKind::Plan, Ok(no_changes()));
    let options = options(root.path());

    let plan = SchematicsTest::new(&service).run(&options).expect("consistent");

    assert_eq!(plan, no_changes());
    assert_eq!(service.jobs(), vec![JobKind::Apply, JobKind::Plan, JobKind::Destroy]);
    assert_eq!(
        service.uploads(),
        vec![vec![
            "examples/fscloud/main.tf",
            "main.tf",
            "modules/worker-pool/main.tf",
            "variables.tf"
        ]]
    );
    assert!(service.workspace_deleted());

    match &service.calls()[0] {
        SchematicsCall::CreateWorkspace(request) => {
            assert_eq!(request.name, options.prefix);
            assert_eq!(request.template_folder, "examples/fscloud");
            assert_eq!(request.resource_group.as_deref(), Some(RESOURCE_GROUP));
            assert_eq!(request.tags, vec!["test-schematic"]);
        }
        call => panic!("unexpected first call {call:?}"),
    }
    assert!(service.calls().contains(&SchematicsCall::UpdateVariables(vec![
        "ibmcloud_api_key".to_string(),
        "ocp_version".to_string(),
        "kms_encryption_enabled_cluster".to_string(),
    ])));
}

#[test]
fn test_drift_keeps_the_workspace() {
    let root = module_checkout();
    let drift = changes(
        &["module.monolith_add_ons.module.scc_wp.restapi_object.cspm"],
        &["module.ocp_base.ibm_container_addons.addons"],
        &[],
    );
    let exemptions = ExemptionPolicy::new(
        &["module.monolith_add_ons.module.scc_wp.restapi_object.cspm"],
        &[],
        &[],
        &[],
        true,
    )
    .expect("valid exemptions");

    let service = FakeSchematics::new().on_job(JobKind::Plan, Ok(drift.clone()));
    let err = SchematicsTest::new(&service)
        .run(&options(root.path()).exemptions(exemptions.clone()))
        .expect_err("drift");

    assert!(matches!(err.failures(), [VerificationFailure::Drift(_)]));
    assert_eq!(service.jobs(), vec![JobKind::Apply, JobKind::Plan, JobKind::Destroy]);
    assert!(!service.workspace_deleted());

    let service = FakeSchematics::new().on_job(JobKind::Plan, Ok(drift));
    let options = options(root.path())
        .exemptions(exemptions)
        .delete_workspace_on_fail(true);
    assert!(SchematicsTest::new(&service).run(&options).is_err());
    assert!(service.workspace_deleted());
}

#[test]
fn test_failed_apply_job() {
    let root = module_checkout();
    let service = FakeSchematics::new().on_job(
        JobKind::Apply,
        Err(SchematicsError::JobFailed {
            job: JobKind::Apply,
            job_id: "a4c1d2".to_string(),
            workspace_id: "us-south.workspace.base-ocp-fscloud.8c3e9f6a".to_string(),
            message: "Error: insufficient quota for worker nodes".to_string(),
        }),
    );

    let err = SchematicsTest::new(&service)
        .run(&options(root.path()))
        .expect_err("apply failure");

    assert!(matches!(
        err,
        HarnessError::Schematics {
            step: Step::InitialApply,
            ..
        }
    ));
    assert_eq!(service.jobs(), vec![JobKind::Apply, JobKind::Destroy]);
}

#[test]
fn test_invalid_variable_fails_before_any_call() {
    let root = module_checkout();
    let service = FakeSchematics::new();
    let options = options(root.path()).var(SchematicsVar {
        value: json!("true"),
        data_type: VarDataType::Bool,
        ..SchematicsVar::bool("kms_encryption_enabled_cluster", true)
    });

    assert!(matches!(
        SchematicsTest::new(&service).run(&options),
        Err(HarnessError::Config(_))
    ));
    assert!(service.calls().is_empty());
}

#[test]
fn test_nothing_to_upload() {
    let root = module_checkout();
    let service = FakeSchematics::new();
    let options = options(root.path()).include_patterns(&["solutions/*/*.tf"]);

    let err = SchematicsTest::new(&service).run(&options).expect_err("empty tarball");

    assert!(matches!(
        err,
        HarnessError::Schematics {
            source: SchematicsError::EmptyTarball { .. },
            ..
        }
    ));
    assert!(service.calls().is_empty());
}
