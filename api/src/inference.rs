use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One ordered part of the user message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text(String),
    /// Inline image as a self-contained `data:` URL.
    Image { data_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub model: String,
    pub max_tokens: u32,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InferenceResponse {
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("request to inference service failed: {0}")]
    Http(reqwest::Error),
    #[error("inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected inference response shape: {0}")]
    Schema(String),
}

/// A vision-capable completion service.
#[async_trait]
pub trait InferenceAdapter: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

/// Adapter for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(InferenceError::Client)?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl InferenceAdapter for OpenAiAdapter {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let body = ChatRequest::from(request);

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(InferenceError::Http)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(InferenceError::Http)?;
        let parsed: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|e| InferenceError::Schema(e.to_string()))?;

        debug!(
            model = request.model,
            choices = parsed.choices.len(),
            "inference response decoded"
        );

        Ok(InferenceResponse {
            candidates: parsed
                .choices
                .into_iter()
                .map(|choice| Candidate {
                    text: choice.message.content.into_text(),
                })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

impl<'a> From<&'a InferenceRequest> for ChatRequest<'a> {
    fn from(request: &'a InferenceRequest) -> Self {
        let content = request
            .parts
            .iter()
            .map(|part| match part {
                MessagePart::Text(text) => ContentPart::Text { text },
                MessagePart::Image { data_url } => ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            })
            .collect();
        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            messages: [ChatMessage {
                role: "user",
                content,
            }],
        }
    }
}

/// Strict response schema: anything else fails to decode.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Plain(String),
    Structured { text: String },
}

impl MessageContent {
    fn into_text(self) -> String {
        match self {
            MessageContent::Plain(text) => text,
            MessageContent::Structured { text } => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// Fake completions endpoint that records requests and replies with `reply`.
    async fn fake_service(status: StatusCode, reply: Value) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let recorder = Arc::clone(&seen);
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let recorder = Arc::clone(&recorder);
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    recorder.lock().unwrap().push((auth, body));
                    (status, Json(reply))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/v1"), seen)
    }

    fn two_image_request() -> InferenceRequest {
        InferenceRequest {
            model: "gpt-4o".into(),
            max_tokens: 1000,
            parts: vec![
                MessagePart::Text("compare".into()),
                MessagePart::Image {
                    data_url: "data:image/jpeg;base64,QUFB".into(),
                },
                MessagePart::Image {
                    data_url: "data:image/jpeg;base64,QkJC".into(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn sends_ordered_parts_and_reads_first_choice() {
        let (base, seen) = fake_service(
            StatusCode::OK,
            json!({
                "id": "chatcmpl-1",
                "choices": [
                    { "index": 0, "message": { "role": "assistant", "content": "a cat, then a dog" } },
                    { "index": 1, "message": { "role": "assistant", "content": "ignored" } }
                ]
            }),
        )
        .await;

        let adapter = OpenAiAdapter::new(&base, Some("sk-test".into())).unwrap();
        let response = adapter.complete(&two_image_request()).await.unwrap();

        assert_eq!(response.candidates.len(), 2);
        assert_eq!(response.candidates[0].text, "a cat, then a dog");

        let seen = seen.lock().unwrap();
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 1000);
        let content = &body["messages"][0]["content"];
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(content[0], json!({ "type": "text", "text": "compare" }));
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,QUFB");
        assert_eq!(content[2]["image_url"]["url"], "data:image/jpeg;base64,QkJC");
    }

    #[tokio::test]
    async fn structured_content_is_accepted() {
        let (base, _) = fake_service(
            StatusCode::OK,
            json!({ "choices": [ { "message": { "content": { "text": "a hallway" } } } ] }),
        )
        .await;

        let adapter = OpenAiAdapter::new(&base, None).unwrap();
        let response = adapter.complete(&two_image_request()).await.unwrap();
        assert_eq!(response.candidates[0].text, "a hallway");
    }

    #[tokio::test]
    async fn empty_choices_decode_to_no_candidates() {
        let (base, _) = fake_service(StatusCode::OK, json!({ "choices": [] })).await;
        let adapter = OpenAiAdapter::new(&base, None).unwrap();
        let response = adapter.complete(&two_image_request()).await.unwrap();
        assert!(response.candidates.is_empty());
    }

    #[tokio::test]
    async fn shape_mismatch_fails_closed() {
        let (base, _) = fake_service(
            StatusCode::OK,
            json!({ "choices": [ { "message": { "content": null } } ] }),
        )
        .await;
        let adapter = OpenAiAdapter::new(&base, None).unwrap();
        let err = adapter.complete(&two_image_request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Schema(_)));

        let (base, _) = fake_service(StatusCode::OK, json!({ "output": "text" })).await;
        let adapter = OpenAiAdapter::new(&base, None).unwrap();
        let err = adapter.complete(&two_image_request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Schema(_)));
    }

    #[tokio::test]
    async fn upstream_status_is_reported() {
        let (base, _) = fake_service(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": { "message": "rate limited" } }),
        )
        .await;
        let adapter = OpenAiAdapter::new(&base, None).unwrap();
        let err = adapter.complete(&two_image_request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Status { status: 429, .. }));
    }
}
