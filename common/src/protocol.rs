//! JSON bodies exchanged on `POST /describe`.

use serde::{Deserialize, Serialize};

pub const DESCRIBE_PATH: &str = "/describe";

/// Text shown in place of a description when the server gave none.
pub const FALLBACK_DESCRIPTION: &str = "Could not get description.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeRequest {
    /// Standard base64 image payload without a Data-URI prefix.
    #[serde(rename = "imageData")]
    pub image_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Stable error codes returned in [`ErrorResponse::error`].
pub mod error_code {
    pub const NO_CHOICES: &str = "no_choices";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const INFERENCE_TIMEOUT: &str = "inference_timeout";
    pub const INVALID_IMAGE_DATA: &str = "invalid_image_data";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_field() {
        let body = serde_json::to_value(DescribeRequest {
            image_data: "QUJD".into(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "imageData": "QUJD" }));
    }

    #[test]
    fn error_body_shape() {
        let body = serde_json::to_string(&ErrorResponse {
            error: error_code::NO_CHOICES.into(),
        })
        .unwrap();
        assert_eq!(body, r#"{"error":"no_choices"}"#);
    }
}
