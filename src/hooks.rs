//! Semantic checks run right after the initial apply, for what a resource diff cannot tell.

use crate::constants::{DEFAULT_INGRESS_POLL_INTERVAL, DEFAULT_INGRESS_TIMEOUT};
use crate::errors::HookError;
use crate::ibmcloud::{CloudApiError, ContainerServiceClient};
use crate::plan::Outputs;
use retry::OperationResult;
use retry::delay::Fixed;
use serde_derive::Deserialize;
use std::time::{Duration, Instant};

pub trait PostApplyHook: Send + Sync {
    fn name(&self) -> String {
        "post apply hook".to_string()
    }

    fn run(&self, outputs: &Outputs) -> Result<(), HookError>;
}

impl<F> PostApplyHook for F
where
    F: Fn(&Outputs) -> Result<(), HookError> + Send + Sync,
{
    fn run(&self, outputs: &Outputs) -> Result<(), HookError> {
        self(outputs)
    }
}

/// Every key of `keys` must be present in `outputs` with a non null value.
pub fn validate_outputs(outputs: &Outputs, keys: &[&str]) -> Result<(), HookError> {
    let missing = keys
        .iter()
        .filter(|key| outputs.get(**key).is_none_or(|value| value.is_null()))
        .map(|key| key.to_string())
        .collect::<Vec<_>>();

    match missing.is_empty() {
        true => Ok(()),
        false => Err(HookError::MissingOutputs { keys: missing }),
    }
}

/// Tells whether the ingress of a cluster is healthy. `Err` means the probe itself failed, it is
/// kept as the last error seen and polling goes on.
pub trait IngressProbe: Send + Sync {
    fn is_ingress_healthy(&self, cluster_name: &str) -> Result<bool, String>;
}

/// Reads the ingress status the container service reports for a cluster.
pub struct ContainerServiceIngressProbe {
    client: ContainerServiceClient,
}

impl ContainerServiceIngressProbe {
    pub fn new(client: ContainerServiceClient) -> Self {
        ContainerServiceIngressProbe { client }
    }

    fn status(&self, cluster_name: &str) -> Result<String, CloudApiError> {
        #[derive(Deserialize)]
        struct IngressStatus {
            status: String,
        }

        self.client
            .get_json::<IngressStatus>("/v2/alb/getIngressStatus", &[("cluster", cluster_name)], &[])
            .map(|s| s.status)
    }
}

impl IngressProbe for ContainerServiceIngressProbe {
    fn is_ingress_healthy(&self, cluster_name: &str) -> Result<bool, String> {
        let status = self.status(cluster_name).map_err(|e| e.to_string())?;
        debug!("ingress of cluster {} is {}", cluster_name, status);
        Ok(status.eq_ignore_ascii_case("healthy"))
    }
}

/// Waits for the ingress of the cluster named by the `cluster_name` output to become healthy.
pub struct ClusterIngressHook<P: IngressProbe> {
    probe: P,
    timeout: Duration,
    poll_interval: Duration,
}

impl<P: IngressProbe> ClusterIngressHook<P> {
    pub const CLUSTER_NAME_OUTPUT: &'static str = "cluster_name";

    pub fn new(probe: P) -> Self {
        ClusterIngressHook {
            probe,
            timeout: DEFAULT_INGRESS_TIMEOUT,
            poll_interval: DEFAULT_INGRESS_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn wait_healthy(&self, cluster_name: &str) -> Result<(), HookError> {
        let started_at = Instant::now();
        let mut last_error = None;
        let poll_millis = self.poll_interval.as_millis().max(1) as u64;
        let attempts = (self.timeout.as_millis() as u64 / poll_millis) as usize;

        let result = retry::retry(Fixed::from_millis(poll_millis).take(attempts), || {
            match self.probe.is_ingress_healthy(cluster_name) {
                Ok(true) => OperationResult::Ok(()),
                Ok(false) => OperationResult::Retry(()),
                Err(err) => {
                    warn!("cannot read ingress status of cluster {}: {}", cluster_name, err);
                    last_error = Some(err);
                    OperationResult::Retry(())
                }
            }
        });

        match result {
            Ok(_) => {
                info!(
                    "ingress of cluster {} healthy after {}s",
                    cluster_name,
                    started_at.elapsed().as_secs()
                );
                Ok(())
            }
            Err(_) => Err(HookError::Timeout {
                what: format!("ingress of cluster `{cluster_name}` healthy"),
                after: self.timeout,
                last_error,
            }),
        }
    }
}

impl<P: IngressProbe> PostApplyHook for ClusterIngressHook<P> {
    fn name(&self) -> String {
        "cluster ingress health check".to_string()
    }

    fn run(&self, outputs: &Outputs) -> Result<(), HookError> {
        validate_outputs(outputs, &[Self::CLUSTER_NAME_OUTPUT])?;

        match outputs.get(Self::CLUSTER_NAME_OUTPUT).and_then(|v| v.as_str()) {
            Some(cluster_name) => self.wait_healthy(cluster_name),
            None => Err(HookError::Failed(format!(
                "output `{}` is not a string",
                Self::CLUSTER_NAME_OUTPUT
            ))),
        }
    }
}
