//! OpenShift version catalog, read from the container service and shaped for a terraform
//! `external` data source (a flat map whose values are JSON encoded strings).

use crate::ibmcloud::{CloudApiError, ContainerServiceClient};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_PLATFORM: &str = "openshift";
pub const UNSUPPORTED_RANGE: &str = "unsupported";

#[derive(Debug, Error)]
pub enum VersionCatalogError {
    #[error("No versions found for platform '{0}'")]
    NoVersionsForPlatform(String),
    #[error("No add-on data found.")]
    NoAddons,
    #[error("invalid catalog document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
    #[error(transparent)]
    Api(#[from] CloudApiError),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PlatformVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default)]
    pub default: bool,
}

impl PlatformVersion {
    pub fn full_version(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PlatformVersions {
    pub valid_versions: Vec<String>,
    pub default: Option<String>,
}

impl PlatformVersions {
    /// `major.minor` of every valid version, newest first, duplicates removed.
    pub fn latest_minors(&self, count: usize) -> Vec<String> {
        let mut minors = self
            .valid_versions
            .iter()
            .filter_map(|v| {
                let mut parts = v.split('.');
                let major = parts.next()?.parse::<u32>().ok()?;
                let minor = parts.next()?.parse::<u32>().ok()?;
                Some((major, minor))
            })
            .collect::<Vec<_>>();
        minors.sort_unstable_by(|a, b| b.cmp(a));
        minors.dedup();

        minors
            .into_iter()
            .take(count)
            .map(|(major, minor)| format!("{major}.{minor}"))
            .collect()
    }
}

/// Extracts the versions of `platform` out of a `/v1/versions` response.
pub fn platform_versions(catalog: &Value, platform: &str) -> Result<PlatformVersions, VersionCatalogError> {
    let versions: Vec<PlatformVersion> = match catalog.get(platform) {
        Some(versions) => serde_json::from_value(versions.clone())?,
        None => vec![],
    };
    if versions.is_empty() {
        return Err(VersionCatalogError::NoVersionsForPlatform(platform.to_string()));
    }

    Ok(PlatformVersions {
        valid_versions: versions.iter().map(PlatformVersion::full_version).collect(),
        // last one flagged as default wins
        default: versions.iter().filter(|v| v.default).last().map(PlatformVersion::full_version),
    })
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AddonSupport {
    pub supported_openshift_range: String,
    pub supported_kubernetes_range: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogAddon {
    name: String,
    version: String,
    #[serde(rename = "supportedOCPRange")]
    supported_ocp_range: Option<String>,
    supported_kube_range: Option<String>,
}

/// Groups a `/v1/addons` response by add-on name then version.
pub fn addon_versions(
    catalog: &Value,
) -> Result<BTreeMap<String, BTreeMap<String, AddonSupport>>, VersionCatalogError> {
    let addons: Vec<CatalogAddon> = serde_json::from_value(catalog.clone())?;

    let mut result: BTreeMap<String, BTreeMap<String, AddonSupport>> = BTreeMap::new();
    for addon in addons {
        result.entry(addon.name).or_default().insert(
            addon.version,
            AddonSupport {
                supported_openshift_range: addon.supported_ocp_range.unwrap_or_else(|| UNSUPPORTED_RANGE.to_string()),
                supported_kubernetes_range: addon
                    .supported_kube_range
                    .unwrap_or_else(|| UNSUPPORTED_RANGE.to_string()),
            },
        );
    }

    if result.is_empty() {
        return Err(VersionCatalogError::NoAddons);
    }

    Ok(result)
}

/// Terraform external data sources only accept string values: nested values are JSON encoded.
pub fn to_external_data<T: serde::Serialize>(
    entries: BTreeMap<String, T>,
) -> Result<BTreeMap<String, String>, VersionCatalogError> {
    entries
        .into_iter()
        .map(|(key, value)| Ok((key, serde_json::to_string(&value)?)))
        .collect()
}

/// Reads the version catalogs of the container service.
pub struct CatalogClient {
    client: ContainerServiceClient,
}

impl CatalogClient {
    pub fn new(endpoint: &str, iam_token: &str) -> Result<Self, VersionCatalogError> {
        Ok(CatalogClient {
            client: ContainerServiceClient::new(endpoint, iam_token)?,
        })
    }

    pub fn platform_versions(&self, platform: &str) -> Result<PlatformVersions, VersionCatalogError> {
        let catalog: Value = self.client.get_json("/v1/versions", &[], &[])?;
        platform_versions(&catalog, platform)
    }

    pub fn addon_versions(
        &self,
        region: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, AddonSupport>>, VersionCatalogError> {
        let catalog: Value = self.client.get_json("/v1/addons", &[], &[("X-Region", region)])?;
        addon_versions(&catalog)
    }
}
