use crate::constants::{DEFAULT_CS_API_ENDPOINT, DO_NOT_DESTROY_ON_FAILURE, IBMCLOUD_API_KEY, IBMCLOUD_CS_API_ENDPOINT};
use crate::errors::ConfigError;
use once_cell::sync::Lazy;
use std::env;
use std::fmt::{Debug, Formatter};

static HARNESS_ENV: Lazy<HarnessEnv> = Lazy::new(HarnessEnv::from_env);

/// What to do with the infrastructure of a scenario once it is over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TeardownPolicy {
    /// Always destroy, failed or not.
    #[default]
    Always,
    /// Leave a failed scenario's workspace and resources in place for post-mortem debugging.
    KeepOnFailure,
}

impl TeardownPolicy {
    pub fn should_teardown(&self, scenario_failed: bool) -> bool {
        match self {
            TeardownPolicy::Always => true,
            TeardownPolicy::KeepOnFailure => !scenario_failed,
        }
    }
}

/// Process level settings, read once from the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HarnessEnv {
    api_key: Option<String>,
    pub teardown: TeardownPolicy,
    pub cs_api_endpoint: String,
}

impl Debug for HarnessEnv {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessEnv")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("teardown", &self.teardown)
            .field("cs_api_endpoint", &self.cs_api_endpoint)
            .finish()
    }
}

impl HarnessEnv {
    /// Settings captured when the process started.
    pub fn global() -> &'static HarnessEnv {
        &HARNESS_ENV
    }

    pub fn from_env() -> HarnessEnv {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> HarnessEnv
    where
        F: Fn(&str) -> Option<String>,
    {
        let teardown = match lookup(DO_NOT_DESTROY_ON_FAILURE) {
            Some(value) if value.trim().eq_ignore_ascii_case("true") => TeardownPolicy::KeepOnFailure,
            _ => TeardownPolicy::Always,
        };

        HarnessEnv {
            api_key: lookup(IBMCLOUD_API_KEY).filter(|key| !key.is_empty()),
            teardown,
            cs_api_endpoint: lookup(IBMCLOUD_CS_API_ENDPOINT)
                .filter(|endpoint| !endpoint.is_empty())
                .unwrap_or_else(|| DEFAULT_CS_API_ENDPOINT.to_string()),
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> HarnessEnv {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable(IBMCLOUD_API_KEY.to_string()))
    }
}
