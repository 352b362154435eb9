//! Terraform `external` data source program: prints the versions of every cluster add-on with
//! the platform ranges they support.
//!
//! Reads `{"IAM_TOKEN": "...", "REGION": "us-south"}` on stdin.

use anyhow::{Context, bail};
use ocp_test_harness::constants::{DEFAULT_ADDONS_CS_API_ENDPOINT, IBMCLOUD_CS_API_ENDPOINT};
use ocp_test_harness::versions::{CatalogClient, to_external_data};
use serde_derive::Deserialize;
use std::env;
use std::io::{self, Read};

#[derive(Deserialize)]
struct Input {
    #[serde(rename = "IAM_TOKEN")]
    iam_token: Option<String>,
    #[serde(rename = "REGION")]
    region: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let mut raw_input = String::new();
    io::stdin().read_to_string(&mut raw_input).context("cannot read stdin")?;
    let input: Input = serde_json::from_str(&raw_input).context("Invalid JSON input")?;

    let Some(iam_token) = input.iam_token.filter(|t| !t.is_empty()) else {
        bail!("IAM_TOKEN is required");
    };
    let Some(region) = input.region.filter(|r| !r.is_empty()) else {
        bail!("REGION is required");
    };
    let endpoint = env::var(IBMCLOUD_CS_API_ENDPOINT)
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_ADDONS_CS_API_ENDPOINT.to_string());

    let addons = CatalogClient::new(&endpoint, &iam_token)?.addon_versions(&region)?;
    let output = to_external_data(addons)?;
    println!("{}", serde_json::to_string(&output)?);

    Ok(())
}
