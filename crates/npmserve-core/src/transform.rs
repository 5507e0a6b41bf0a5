//! Client for the transform service that serves non-npm modules.

use crate::version::user_agent;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Path of the module transform endpoint, relative to the service base.
pub const TRANSFORM_ENDPOINT: &str = "api/v1/transform/module";

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Transform request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid transform response: {0}")]
    InvalidResponse(String),
}

#[derive(Deserialize)]
struct TransformResponse {
    result: TransformResult,
}

#[derive(Deserialize)]
struct TransformResult {
    code: String,
}

/// Talks to the transform service at `base`.
#[derive(Debug, Clone)]
pub struct TransformClient {
    base: Url,
    http: Client,
}

impl TransformClient {
    pub fn new(base: Url) -> Result<Self, TransformError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(user_agent())
            .build()?;
        Ok(Self { base, http })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Transformed source of `module`, or `None` when the service answers
    /// with anything but success.
    pub async fn transform_module(&self, module: &Url) -> Result<Option<String>, TransformError> {
        let mut endpoint = self
            .base
            .join(TRANSFORM_ENDPOINT)
            .map_err(|e| TransformError::InvalidResponse(format!("bad service URL: {e}")))?;
        endpoint.query_pairs_mut().append_pair("module", module.as_str());

        tracing::debug!(module = %module, "transform request");
        let response = self.http.get(endpoint).send().await?;
        if !response.status().is_success() {
            tracing::debug!(module = %module, status = %response.status(), "transform declined");
            return Ok(None);
        }

        let body = response.text().await?;
        let parsed: TransformResponse = serde_json::from_str(&body)
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
        Ok(Some(parsed.result.code))
    }
}
