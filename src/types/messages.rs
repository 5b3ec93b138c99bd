//! NATS message types

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::error::BillingError;

/// Generic request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub token: Option<String>,  // JWT access token
    pub payload: T,
}

/// Generic success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(request_id: Uuid, payload: T) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Build a response carrying the domain error's code and structured details
    pub fn from_billing(request_id: Uuid, err: &BillingError) -> Self {
        let mut response = Self::new(request_id, err.code(), err.to_string());
        response.error.details = err.details();
        response
    }
}

/// Payload of requests that take no parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Binary file returned inline over NATS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub filename: String,
    pub content_type: String,
    pub file_base64: String,
    pub size_bytes: u64,
}

impl FileResponse {
    pub fn new(filename: String, content_type: &str, bytes: &[u8]) -> Self {
        use base64::Engine;
        Self {
            filename,
            content_type: content_type.to_string(),
            file_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            size_bytes: bytes.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_carries_details() {
        let err = BillingError::MissingReferenceData {
            count: 1,
            examples: vec!["M3".to_string()],
        };
        let response = ErrorResponse::from_billing(Uuid::nil(), &err);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], "MISSING_REFERENCE_DATA");
        assert_eq!(json["error"]["details"]["serials"][0], "M3");
    }

    #[test]
    fn test_error_response_omits_empty_details() {
        let response = ErrorResponse::new(Uuid::nil(), "UNAUTHORIZED", "Authentication required");
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_file_response_encodes_base64() {
        let file = FileResponse::new("a.pdf".to_string(), "application/pdf", b"%PDF");
        assert_eq!(file.file_base64, "JVBERg==");
        assert_eq!(file.size_bytes, 4);
    }

    #[test]
    fn test_request_token_is_optional() {
        let raw = r#"{"id":"00000000-0000-0000-0000-000000000000","timestamp":"2026-01-01T00:00:00Z","payload":{}}"#;
        let request: Request<EmptyPayload> = serde_json::from_str(raw).unwrap();
        assert!(request.token.is_none());
    }
}
