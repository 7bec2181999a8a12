//! Retrieval of raw station status documents, over HTTP or from disk.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("API request failed with status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("document from {origin} is not valid JSON: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Returns `true` when `source` should be fetched over HTTP rather than read
/// from the local filesystem.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Issues a GET to `url` and parses the response body as JSON.
///
/// # Errors
///
/// A non-success status is reported as [`FetchError::Status`]; the body is
/// not inspected in that case.
#[tracing::instrument(skip(client))]
pub async fn fetch_json<C: HttpClient>(client: &C, url: &str) -> Result<Value, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let request_failed = |source: reqwest::Error| FetchError::Request {
        url: url.to_string(),
        source,
    };

    let resp = client.execute(req).await.map_err(request_failed)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status,
            url: url.to_string(),
        });
    }

    let bytes = resp.bytes().await.map_err(request_failed)?;
    debug!(bytes = bytes.len(), "Response body received");

    let document = serde_json::from_slice(&bytes).map_err(|source| FetchError::Json {
        origin: url.to_string(),
        source,
    })?;
    info!("API request successful");
    Ok(document)
}

/// Reads a raw station status document saved on disk.
pub fn read_json_file(path: &Path) -> Result<Value, FetchError> {
    let origin = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|source| FetchError::Io {
        path: origin.clone(),
        source,
    })?;
    debug!(path = %origin, bytes = bytes.len(), "Raw document read from disk");

    serde_json::from_slice(&bytes).map_err(|source| FetchError::Json { origin, source })
}

/// Loads a raw document from a URL or a local file path.
#[tracing::instrument(skip(client))]
pub async fn load_source<C: HttpClient>(client: &C, source: &str) -> Result<Value, FetchError> {
    if is_remote(source) {
        fetch_json(client, source).await
    } else {
        read_json_file(Path::new(source))
    }
}
