//! Opaque transport boundary.
//!
//! The pipeline's whole requirement is "send these bytes to one of these
//! endpoints within this timeout and learn success/failure". [`Transport`]
//! captures exactly that; [`HttpTransport`] is the production
//! implementation, and tests substitute in-process fakes.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Header carrying the opaque credential to the ingestion service.
pub const API_KEY_HEADER: &str = "x-airlock-apikey";

/// One-shot delivery of a batch body to a single endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to `endpoint`, authenticating with `api_key`.
    ///
    /// Must resolve within `timeout`. `Ok` means the endpoint acknowledged
    /// the batch; any error is terminal for the batch's records and the
    /// caller never retries.
    async fn send(
        &self,
        endpoint: &Url,
        api_key: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<()>;
}

/// HTTP POST transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &Url,
        api_key: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let response = self
            .client
            .post(endpoint.clone())
            .header(API_KEY_HEADER, api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .timeout(timeout)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(timeout)
                } else {
                    Error::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Transport(format!("endpoint rejected batch: {status}")))
        }
    }
}
