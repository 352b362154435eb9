//! Long lived shared resources (KMS instances, keys, secrets manager...) the test account keeps
//! around, described in a yaml file.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PermanentResourcesError {
    #[error("cannot read permanent resources file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid permanent resources document: {0}")]
    Invalid(#[from] serde_yaml::Error),
    #[error("permanent resource `{0}` is not defined")]
    Missing(String),
    #[error("permanent resource `{0}` is not a string")]
    NotAString(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PermanentResources {
    resources: BTreeMap<String, Value>,
}

impl PermanentResources {
    pub fn load(path: &Path) -> Result<PermanentResources, PermanentResourcesError> {
        let content = fs::read_to_string(path).map_err(|source| PermanentResourcesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("permanent resources loaded from {}", path.display());

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<PermanentResources, PermanentResourcesError> {
        let resources: BTreeMap<String, Value> = serde_yaml::from_str(content)?;
        Ok(PermanentResources { resources })
    }

    pub fn get(&self, key: &str) -> Result<&Value, PermanentResourcesError> {
        self.resources
            .get(key)
            .filter(|value| !value.is_null())
            .ok_or_else(|| PermanentResourcesError::Missing(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, PermanentResourcesError> {
        self.get(key)?
            .as_str()
            .ok_or_else(|| PermanentResourcesError::NotAString(key.to_string()))
    }

    /// `key` as a terraform variable value, ready to be passed to a scenario.
    pub fn to_var(&self, key: &str) -> Result<Value, PermanentResourcesError> {
        self.get(key).cloned()
    }
}
