//! Remote publisher/aggregator client.
//!
//! - `PUT {publisher}/v1/blobs?epochs=N` with the raw body
//! - `GET {aggregator}/v1/blobs/{id}`

use std::io::Read;
use std::time::Duration;

use tracing::{debug, instrument};
use vsort_config::BlobStoreConfig;

use crate::{BlobStore, CasError, Result};

/// Blocking HTTP client for a Walrus-style blob store.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    agent: ureq::Agent,
    publisher_url: String,
    aggregator_url: String,
    epochs: u32,
    max_payload_bytes: usize,
}

impl HttpBlobStore {
    pub fn new(
        publisher_url: impl Into<String>,
        aggregator_url: impl Into<String>,
        epochs: u32,
        timeout: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            publisher_url: publisher_url.into().trim_end_matches('/').to_string(),
            aggregator_url: aggregator_url.into().trim_end_matches('/').to_string(),
            epochs,
            max_payload_bytes,
        }
    }

    pub fn from_config(config: &BlobStoreConfig) -> Self {
        Self::new(
            config.publisher_url.clone(),
            config.aggregator_url.clone(),
            config.epochs,
            Duration::from_secs(config.timeout_secs),
            config.max_payload_bytes,
        )
    }

    /// Same endpoints, different storage duration.
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    fn map_error(&self, err: ureq::Error, size: usize) -> CasError {
        match err {
            ureq::Error::Status(413, _) => CasError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            },
            ureq::Error::Status(code, response) => CasError::Status {
                code,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => CasError::Transport(transport.to_string()),
        }
    }
}

/// Pull the blob id out of a publisher response.
///
/// Fresh uploads answer `newlyCreated.blobObject.blobId`; content the store
/// already holds answers `alreadyCertified.blobId`.
fn parse_blob_id(body: &str) -> Result<String> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| CasError::InvalidResponse(e.to_string()))?;

    value
        .pointer("/newlyCreated/blobObject/blobId")
        .or_else(|| value.pointer("/alreadyCertified/blobId"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
        .ok_or_else(|| CasError::InvalidResponse(format!("no blobId in response: {}", body)))
}

impl BlobStore for HttpBlobStore {
    #[instrument(skip(self, data), fields(size = data.len()), level = "debug")]
    fn put(&self, data: &[u8]) -> Result<String> {
        if data.len() > self.max_payload_bytes {
            return Err(CasError::PayloadTooLarge {
                size: data.len(),
                limit: self.max_payload_bytes,
            });
        }

        let url = format!("{}/v1/blobs?epochs={}", self.publisher_url, self.epochs);
        let response = self
            .agent
            .put(&url)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(data)
            .map_err(|e| self.map_error(e, data.len()))?;

        let body = response.into_string()?;
        let id = parse_blob_id(&body)?;
        debug!(blob_id = %id, "Blob stored");
        Ok(id)
    }

    #[instrument(skip(self), level = "debug")]
    fn get(&self, id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/blobs/{}", self.aggregator_url, id);
        let response = self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::Status(404, _) => CasError::NotFound { id: id.to_string() },
            other => self.map_error(other, 0),
        })?;

        let mut data = Vec::new();
        response.into_reader().read_to_end(&mut data)?;
        Ok(data)
    }

    fn blob_url(&self, id: &str) -> String {
        format!("{}/v1/blobs/{}", self.aggregator_url, id)
    }
}
