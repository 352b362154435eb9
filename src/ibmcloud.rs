//! Minimal IBM Cloud API access: IAM token exchange and the container service endpoints the
//! harness reads (version catalogs, ingress status).

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const IAM_TOKEN_ENDPOINT: &str = "https://iam.cloud.ibm.com/identity/token";

#[derive(Debug, Error)]
pub enum CloudApiError {
    #[error("invalid endpoint `{endpoint}`: {raw_error_message}")]
    InvalidEndpoint {
        endpoint: String,
        raw_error_message: String,
    },
    #[error("cannot create http client: {raw_error_message}")]
    CannotInstantiateClient { raw_error_message: String },
    #[error("API request to {url} failed: {raw_error_message}")]
    Request { url: String, raw_error_message: String },
    #[error("API request to {url} failed: {status} - {body}")]
    Status { url: String, status: u16, body: String },
    #[error("unexpected response from {url}: {raw_error_message}")]
    InvalidResponse { url: String, raw_error_message: String },
}

/// Normalizes a container service endpoint: `https://` is assumed when no scheme is given and
/// `/global` when no path is given. Trailing slashes are dropped.
pub fn normalize_endpoint(endpoint: &str) -> Result<Url, CloudApiError> {
    let endpoint = endpoint.trim();
    let with_scheme = match endpoint.contains("://") {
        true => endpoint.to_string(),
        false => format!("https://{endpoint}"),
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| CloudApiError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        raw_error_message: e.to_string(),
    })?;

    let path = url.path().trim_end_matches('/').to_string();
    match path.is_empty() {
        true => url.set_path("/global"),
        false => url.set_path(&path),
    }

    Ok(url)
}

fn http_client(headers: HeaderMap) -> Result<reqwest::blocking::Client, CloudApiError> {
    reqwest::blocking::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .user_agent("ocp-test-harness")
        .build()
        .map_err(|e| CloudApiError::CannotInstantiateClient {
            raw_error_message: e.to_string(),
        })
}

/// Exchanges an API key for a short lived IAM bearer token.
pub fn iam_token(api_key: &str) -> Result<String, CloudApiError> {
    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let response = http_client(headers)?
        .post(IAM_TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
            ("apikey", api_key),
        ])
        .send()
        .map_err(|e| CloudApiError::Request {
            url: IAM_TOKEN_ENDPOINT.to_string(),
            raw_error_message: e.to_string(),
        })?;

    read_json::<TokenResponse>(IAM_TOKEN_ENDPOINT, response).map(|token| token.access_token)
}

fn read_json<T: DeserializeOwned>(url: &str, response: reqwest::blocking::Response) -> Result<T, CloudApiError> {
    let status = response.status();
    let body = response.text().map_err(|e| CloudApiError::Request {
        url: url.to_string(),
        raw_error_message: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(CloudApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| CloudApiError::InvalidResponse {
        url: url.to_string(),
        raw_error_message: e.to_string(),
    })
}

/// Authenticated client of the container service API.
pub struct ContainerServiceClient {
    endpoint: Url,
    http_client: reqwest::blocking::Client,
}

impl ContainerServiceClient {
    pub fn new(endpoint: &str, iam_token: &str) -> Result<Self, CloudApiError> {
        let endpoint = normalize_endpoint(endpoint)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut auth_header = HeaderValue::from_str(&format!("Bearer {iam_token}")).map_err(|e| {
            CloudApiError::CannotInstantiateClient {
                raw_error_message: format!("Cannot create auth header: {e}"),
            }
        })?;
        auth_header.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_header);

        Ok(ContainerServiceClient {
            endpoint,
            http_client: http_client(headers)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// GET `<endpoint><path>`, `path` is relative to the endpoint base path.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&'static str, &str)],
    ) -> Result<T, CloudApiError> {
        let url = format!("{}{}", self.endpoint.as_str().trim_end_matches('/'), path);

        let mut request = self.http_client.get(&url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().map_err(|e| CloudApiError::Request {
            url: url.clone(),
            raw_error_message: e.to_string(),
        })?;
        read_json(&url, response)
    }
}
