use std::sync::Arc;
use std::time::Duration;

use frame_describe_common::snapshot::EncodedSnapshot;
use tracing::{debug, info, warn};

use crate::inference::{InferenceAdapter, InferenceError, InferenceRequest, MessagePart};
use crate::slot::FrameSlot;

pub const SINGLE_PROMPT: &str = "What is in this image?";
pub const COMPARISON_PROMPT: &str =
    "What are in these images? Is there any difference between them?";

#[derive(Debug, thiserror::Error)]
pub enum DescribeError {
    #[error("inference service failed: {0}")]
    Upstream(#[from] InferenceError),
    #[error("inference response contained no choices")]
    NoChoices,
    #[error("inference did not answer within {0:?}")]
    Timeout(Duration),
}

/// Which prompt a request was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Single,
    Comparison,
}

/// Build the inference request for `current`, comparing against `previous`
/// when there is one. The earlier image always precedes the newer one.
pub fn build_request(
    model: &str,
    max_tokens: u32,
    previous: Option<&EncodedSnapshot>,
    current: &EncodedSnapshot,
) -> (PromptVariant, InferenceRequest) {
    let (variant, parts) = match previous {
        None => (
            PromptVariant::Single,
            vec![
                MessagePart::Text(SINGLE_PROMPT.into()),
                MessagePart::Image {
                    data_url: current.data_url(),
                },
            ],
        ),
        Some(previous) => (
            PromptVariant::Comparison,
            vec![
                MessagePart::Text(COMPARISON_PROMPT.into()),
                MessagePart::Image {
                    data_url: previous.data_url(),
                },
                MessagePart::Image {
                    data_url: current.data_url(),
                },
            ],
        ),
    };

    (
        variant,
        InferenceRequest {
            model: model.to_string(),
            max_tokens,
            parts,
        },
    )
}

/// Turns submitted snapshots into descriptions, keeping the frame slot in step.
pub struct DescriptionOrchestrator {
    slot: Arc<FrameSlot>,
    adapter: Arc<dyn InferenceAdapter>,
    model: String,
    max_tokens: u32,
    deadline: Duration,
}

impl DescriptionOrchestrator {
    pub fn new(
        slot: Arc<FrameSlot>,
        adapter: Arc<dyn InferenceAdapter>,
        model: String,
        max_tokens: u32,
        deadline: Duration,
    ) -> Self {
        Self {
            slot,
            adapter,
            model,
            max_tokens,
            deadline,
        }
    }

    /// Describe `snapshot`, replacing the slot with it if the model answered.
    ///
    /// The slot stays locked from the read through the replace, so concurrent
    /// requests are serialized and each one compares against its predecessor.
    pub async fn describe(&self, snapshot: EncodedSnapshot) -> Result<String, DescribeError> {
        let mut slot = self.slot.lock().await;

        let (variant, request) =
            build_request(&self.model, self.max_tokens, slot.current(), &snapshot);
        debug!(
            ?variant,
            size_kb = format!("{:.1}", snapshot.approximate_size_kb()),
            "invoking inference"
        );

        let response = tokio::time::timeout(self.deadline, self.adapter.complete(&request))
            .await
            .map_err(|_| DescribeError::Timeout(self.deadline))??;

        let Some(first) = response.candidates.into_iter().next() else {
            return Err(DescribeError::NoChoices);
        };

        if let Err(e) = slot.replace(snapshot).await {
            warn!(error = %e, "failed to persist frame slot; keeping in-memory copy");
        }

        info!(?variant, chars = first.text.len(), "description returned");
        Ok(first.text)
    }
}
