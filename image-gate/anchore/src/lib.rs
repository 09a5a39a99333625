#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A client for the Anchore engine images API, implementing the
//! [`ImageBackend`] capability consumed by the admission decision engine.

use anyhow::{anyhow, Context, Result};
use image_gate_core::{AnalysisStatus, Credential, Image, ImageBackend, LookupError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Talks to the Anchore images API using HTTP basic authentication.
///
/// The client holds no credentials of its own; every call authenticates as
/// the credential resolved for the request being validated.
#[derive(Clone, Debug)]
pub struct ApiImageBackend {
    http: reqwest::Client,
    endpoint: String,
}

impl ApiImageBackend {
    /// Wraps a shared HTTP client. `endpoint` is the service base URL, e.g.
    /// `http://anchore-engine-api:8228/v1`.
    pub fn new(http: reqwest::Client, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn images_url(&self) -> String {
        format!("{}/images", self.endpoint)
    }
}

/// One record of the image listing returned by `GET /images`.
#[derive(Debug, Deserialize)]
struct ImageRecord {
    #[serde(rename = "imageDigest")]
    image_digest: String,
    analysis_status: AnalysisStatus,
}

/// `GET /images/{digest}/check` nests its evaluations two maps deep:
/// digest, then full tag, then a list of evaluations.
type PolicyCheckResponse = Vec<HashMap<String, HashMap<String, Vec<PolicyEvaluation>>>>;

#[derive(Debug, Deserialize)]
struct PolicyEvaluation {
    status: String,
}

#[derive(Serialize)]
struct AnalysisRequest<'a> {
    tag: &'a str,
}

// Digs the first evaluation status out of the nested check response,
// whatever digest and tag keys it is filed under.
fn first_status(response: &PolicyCheckResponse) -> Option<&str> {
    response
        .iter()
        .flat_map(|by_digest| by_digest.values())
        .flat_map(|by_tag| by_tag.values())
        .flat_map(|evaluations| evaluations.iter())
        .map(|evaluation| evaluation.status.as_str())
        .next()
}

#[async_trait::async_trait]
impl ImageBackend for ApiImageBackend {
    async fn get(&self, credential: &Credential, image: &str) -> Result<Image, LookupError> {
        let rsp = self
            .http
            .get(self.images_url())
            .basic_auth(&credential.username, Some(&credential.password))
            .query(&[("fulltag", image)])
            .send()
            .await
            .context("image lookup request failed")?;

        if rsp.status() == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound);
        }

        let records: Vec<ImageRecord> = rsp
            .error_for_status()
            .context("image lookup failed")?
            .json()
            .await
            .context("malformed image listing")?;

        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty image listing for {image}"))?;

        Ok(Image {
            digest: record.image_digest,
            analysis_status: record.analysis_status,
        })
    }

    async fn analyze(&self, credential: &Credential, image: &str) -> Result<()> {
        self.http
            .post(self.images_url())
            .basic_auth(&credential.username, Some(&credential.password))
            .json(&AnalysisRequest { tag: image })
            .send()
            .await
            .context("analysis request failed")?
            .error_for_status()
            .context("analysis request rejected")?;
        tracing::debug!(image, "submitted image for analysis");
        Ok(())
    }

    async fn check_policy(
        &self,
        credential: &Credential,
        digest: &str,
        tag: &str,
        policy_bundle_id: Option<&str>,
    ) -> Result<bool> {
        let url = format!("{}/images/{digest}/check", self.endpoint);
        let mut query = vec![("tag", tag)];
        if let Some(id) = policy_bundle_id {
            query.push(("policyId", id));
        }

        let rsp = self
            .http
            .get(url)
            .basic_auth(&credential.username, Some(&credential.password))
            .query(&query)
            .send()
            .await
            .context("policy check request failed")?;

        // No evaluation on record (unknown digest or bundle) counts as fail.
        if rsp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let evaluations: PolicyCheckResponse = rsp
            .error_for_status()
            .context("policy check failed")?
            .json()
            .await
            .context("malformed policy check response")?;

        Ok(first_status(&evaluations) == Some("pass"))
    }
}
