use std::time::Duration;

use async_trait::async_trait;
use frame_describe_common::protocol::{DescribeRequest, DESCRIBE_PATH, FALLBACK_DESCRIPTION};
use frame_describe_common::snapshot::EncodedSnapshot;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::ProducerError;

/// What the caller gets back for one submitted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionResult {
    Described(String),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The describe endpoint could not be reached or the body could not be read.
    Transport(String),
}

impl DescriptionResult {
    /// Text fit for display. Failures collapse to the fixed placeholder.
    pub fn display_text(&self) -> &str {
        match self {
            DescriptionResult::Described(text) => text,
            DescriptionResult::Failed(_) => FALLBACK_DESCRIPTION,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, snapshot: &EncodedSnapshot) -> DescriptionResult;
}

/// Posts snapshots to the describe endpoint. One attempt per snapshot.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, ProducerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()
            .map_err(ProducerError::HttpClient)?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", server_url.trim_end_matches('/'), DESCRIBE_PATH),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, snapshot: &EncodedSnapshot) -> DescriptionResult {
        let body = DescribeRequest {
            image_data: snapshot.to_base64(),
        };

        let resp = match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, endpoint = self.endpoint, "failed to reach describe endpoint");
                return DescriptionResult::Failed(FailureReason::Transport(e.to_string()));
            }
        };

        let status = resp.status();
        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, %status, "failed to read describe response");
                return DescriptionResult::Failed(FailureReason::Transport(e.to_string()));
            }
        };

        debug!(%status, bytes = bytes.len(), "describe response received");
        DescriptionResult::Described(decode_description(status, &bytes))
    }
}

/// Pull `description` out of a response body, falling back to the fixed
/// placeholder when it is missing, empty, or the body is not JSON.
fn decode_description(status: StatusCode, body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => {
            if let Some(text) = value
                .get("description")
                .and_then(|d| d.as_str())
                .filter(|d| !d.is_empty())
            {
                return text.to_string();
            }
            match value.get("error").and_then(|e| e.as_str()) {
                Some(error) => warn!(%status, error, "describe endpoint returned an error"),
                None => warn!(%status, "describe response has no description"),
            }
        }
        Err(e) => warn!(%status, error = %e, "describe response is not JSON"),
    }
    FALLBACK_DESCRIPTION.to_string()
}
