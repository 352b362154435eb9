//! Terraform `external` data source program: prints the versions of a container platform.
//!
//! Reads `{"IAM_TOKEN": "...", "PLATFORM": "openshift"}` on stdin.

use anyhow::{Context, bail};
use ocp_test_harness::constants::{DEFAULT_CS_API_ENDPOINT, IBMCLOUD_CS_API_ENDPOINT};
use ocp_test_harness::versions::{CatalogClient, DEFAULT_PLATFORM, to_external_data};
use serde_derive::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::io::{self, Read};

#[derive(Deserialize)]
struct Input {
    #[serde(rename = "IAM_TOKEN")]
    iam_token: Option<String>,
    #[serde(rename = "PLATFORM")]
    platform: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let mut raw_input = String::new();
    io::stdin().read_to_string(&mut raw_input).context("cannot read stdin")?;
    let input: Input = serde_json::from_str(&raw_input).context("Invalid JSON input")?;

    let Some(iam_token) = input.iam_token.filter(|t| !t.is_empty()) else {
        bail!("IAM_TOKEN is required");
    };
    let platform = input
        .platform
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
    let endpoint = env::var(IBMCLOUD_CS_API_ENDPOINT)
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_CS_API_ENDPOINT.to_string());

    let versions = CatalogClient::new(&endpoint, &iam_token)?.platform_versions(&platform)?;
    let output = to_external_data(BTreeMap::from([(platform, versions)]))?;
    println!("{}", serde_json::to_string(&output)?);

    Ok(())
}
