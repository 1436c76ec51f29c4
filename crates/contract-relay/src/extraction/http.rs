//! HTTP clients for the extraction and evidence rendering services.
//!
//! Both services receive the raw document bytes as the request body. The
//! extraction service answers with `{"units": [...]}`, the renderer with PNG
//! bytes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ExtractionError;
use crate::sanitize::truncate_body;

use super::types::{ExtractedUnit, SourceRegion};
use super::{EvidenceRenderer, ExtractionPass};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Deserialize)]
struct PassResponse {
    #[serde(default)]
    units: Vec<ExtractedUnit>,
}

fn create_http_client(request_timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))
}

fn with_credential(request: RequestBuilder, credential: Option<&SecretString>) -> RequestBuilder {
    match credential {
        Some(secret) => request.bearer_auth(secret.expose_secret()),
        None => request,
    }
}

/// Posts the document to `{endpoint}/{pass}`.
pub struct HttpExtractionPass {
    client: Client,
    name: String,
    url: String,
    credential: Option<SecretString>,
}

impl HttpExtractionPass {
    pub fn new(
        endpoint: &str,
        pass: &str,
        credential: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let client = create_http_client(request_timeout).map_err(|message| {
            ExtractionError::PassFailed {
                pass: pass.to_string(),
                message,
            }
        })?;
        Ok(Self {
            client,
            name: pass.to_string(),
            url: format!("{}/{}", endpoint.trim_end_matches('/'), pass),
            credential,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExtractionPass for HttpExtractionPass {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(
        &self,
        job_id: &str,
        document: &[u8],
    ) -> Result<Vec<ExtractedUnit>, ExtractionError> {
        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .header("X-Relay-Job-Id", job_id)
            .body(document.to_vec());

        let response = with_credential(request, self.credential.as_ref())
            .send()
            .await
            .map_err(|e| ExtractionError::PassFailed {
                pass: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::PassFailed {
                pass: self.name.clone(),
                message: format!("HTTP {}: {}", status.as_u16(), truncate_body(&body)),
            });
        }

        let parsed: PassResponse =
            response
                .json()
                .await
                .map_err(|e| ExtractionError::InvalidResponse {
                    pass: self.name.clone(),
                    message: e.to_string(),
                })?;

        Ok(parsed.units)
    }
}

/// Posts the document to the render endpoint with the region as query
/// parameters and expects PNG bytes back.
pub struct HttpEvidenceRenderer {
    client: Client,
    url: String,
    credential: Option<SecretString>,
}

impl HttpEvidenceRenderer {
    pub fn new(
        url: &str,
        credential: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let client = create_http_client(request_timeout).map_err(ExtractionError::Render)?;
        Ok(Self {
            client,
            url: url.to_string(),
            credential,
        })
    }
}

#[async_trait]
impl EvidenceRenderer for HttpEvidenceRenderer {
    async fn render(
        &self,
        document: &[u8],
        region: &SourceRegion,
    ) -> Result<Vec<u8>, ExtractionError> {
        let [x0, y0, x1, y1] = region.bbox;
        let request = self
            .client
            .post(&self.url)
            .query(&[
                ("page", region.page.to_string()),
                ("bbox", format!("{},{},{},{}", x0, y0, x1, y1)),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(document.to_vec());

        let response = with_credential(request, self.credential.as_ref())
            .send()
            .await
            .map_err(|e| ExtractionError::Render(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Render(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_body(&body)
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractionError::Render(e.to_string()))?;

        if !bytes.starts_with(PNG_SIGNATURE) {
            return Err(ExtractionError::Render(
                "renderer did not return a PNG image".to_string(),
            ));
        }

        Ok(bytes.to_vec())
    }
}
