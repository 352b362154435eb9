use std::time::Duration;

pub const TF_PLUGIN_CACHE_DIR: &str = "TF_PLUGIN_CACHE_DIR";
pub const IBMCLOUD_API_KEY: &str = "TF_VAR_ibmcloud_api_key";
pub const DO_NOT_DESTROY_ON_FAILURE: &str = "DO_NOT_DESTROY_ON_FAILURE";
pub const IBMCLOUD_CS_API_ENDPOINT: &str = "IBMCLOUD_CS_API_ENDPOINT";

pub const DEFAULT_CS_API_ENDPOINT: &str = "https://containers.cloud.ibm.com/global";
/// Add-on catalog lookups default to the test environment of the container service.
pub const DEFAULT_ADDONS_CS_API_ENDPOINT: &str = "https://containers.test.cloud.ibm.com/global";

/// Terraform calls block until the remote side returns, cluster creation alone can take hours.
pub const DEFAULT_SCENARIO_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_INGRESS_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_INGRESS_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SCHEMATICS_JOB_TIMEOUT: Duration = Duration::from_secs(240 * 60);

pub const TERRAFORM_RETRY_ATTEMPTS: usize = 3;
pub const TERRAFORM_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Provider errors which are known to go away on their own.
pub const TERRAFORM_TRANSIENT_ERRORS: [&str; 9] = [
    "Failed to install provider",
    "429 Too Many Requests",
    "Rate exceeded",
    "rate limit",
    "connection reset by peer",
    "TLS handshake timeout",
    "i/o timeout",
    "the object has been modified; please apply your changes to the latest version",
    "An error occurred while attempting to provision the resource, please try again",
];

/// Commit message markers opting a change out of the upgrade test.
pub const UPGRADE_SKIP_MARKERS: [&str; 2] = ["BREAKING CHANGE", "SKIP UPGRADE TEST"];

/// Cluster resources which must survive an upgrade no matter the exemptions.
pub const PROTECTED_CLUSTER_RESOURCE_TYPES: [&str; 2] = ["ibm_container_vpc_cluster", "ibm_container_cluster"];
