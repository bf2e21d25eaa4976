//! Error kinds produced while relaying a request and their HTTP rendering.
//!
//! Every variant is terminal for the request it occurred in. The JSON body
//! always carries an `error` field; `details` is only filled where it is
//! safe to show (validation hints, raw upstream error bodies).

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{message}")]
    Validation {
        message: String,
        example: Option<&'static str>,
    },

    #[error("Invalid JSON in request body")]
    InvalidJson,

    #[error("Request too large")]
    PayloadTooLarge { limit: Option<usize> },

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Not Found")]
    NotFound,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Upstream request failed with status {status}")]
    Upstream {
        status: StatusCode,
        body: serde_json::Value,
    },

    #[error("Upstream returned an unreadable response")]
    UpstreamMalformed { details: String },

    #[error("Upstream unreachable")]
    UpstreamUnreachable { details: String },

    #[error("Request timeout")]
    UpstreamTimeout { after_ms: u64 },

    #[error("Missing upstream credential")]
    MissingCredential,

    #[error("Internal server error")]
    Internal { details: Option<String> },
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        RelayError::Validation {
            message: message.into(),
            example: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation { .. } | RelayError::InvalidJson => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Upstream { status, .. } => *status,
            RelayError::UpstreamMalformed { .. } | RelayError::UpstreamUnreachable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RelayError::MissingCredential | RelayError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorResponse {
        let mut body = ErrorResponse::new(self.to_string());
        match self {
            RelayError::Validation { example, .. } => body.example = *example,
            RelayError::PayloadTooLarge { limit: Some(limit) } => {
                body.details = Some(format!("body exceeded limit {} bytes", limit).into());
            }
            RelayError::RateLimited { retry_after_secs } => {
                body.details = Some(format!("retry after {} seconds", retry_after_secs).into());
            }
            RelayError::Upstream { body: raw, .. } => body.details = Some(raw.clone()),
            RelayError::UpstreamMalformed { details }
            | RelayError::UpstreamUnreachable { details } => {
                body.details = Some(details.clone().into());
            }
            RelayError::UpstreamTimeout { after_ms } => {
                body.details = Some(format!("no upstream response within {} ms", after_ms).into());
            }
            RelayError::MissingCredential => {
                body.details =
                    Some("set RELAY_API_KEY in the deployment environment".to_string().into());
            }
            RelayError::Internal { details } => {
                body.details = details.clone().map(Into::into);
                body.timestamp = Some(chrono::Utc::now().to_rfc3339());
            }
            _ => {}
        }
        body
    }
}

/// JSON body shared by every error response.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            example: None,
            timestamp: None,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.body())).into_response();
        if let RelayError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
