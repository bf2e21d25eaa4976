//! Inbound request shapes and the checks that turn raw input into them.
//!
//! Bodies are parsed as loose JSON first so that a malformed document
//! (`InvalidJson`) is reported separately from a well-formed document with
//! the wrong shape (`Validation`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::sanitize::sanitize;

/// Upper bound on any single message, counted in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

const TOO_LONG: &str = "Message too long. Maximum 4000 characters allowed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A single chat turn. Fields are private so a message cannot change after
/// it passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Sanitize the content, rejecting messages that end up empty.
    pub fn sanitized(self) -> Result<Message, RelayError> {
        let content = sanitized_text(&self.content)?;
        Ok(Message {
            role: self.role,
            content,
        })
    }
}

/// Full form accepted by `POST /`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredChat {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatRequest {
    /// One free-text user message.
    Simple { message: String },
    Structured(StructuredChat),
}

/// Validate a message taken from a query parameter. Missing and blank values
/// are rejected; there is no default greeting.
pub fn query_message(
    value: Option<&str>,
    param: &str,
    example: &'static str,
) -> Result<ChatRequest, RelayError> {
    let message = value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        RelayError::Validation {
            message: format!("Missing or empty '{}' parameter", param),
            example: Some(example),
        }
    })?;
    check_length(message)?;
    Ok(ChatRequest::Simple {
        message: message.to_string(),
    })
}

/// Validate a `{ "message": "..." }` body.
pub fn simple_body(body: &[u8]) -> Result<ChatRequest, RelayError> {
    let value = parse_json(body)?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| RelayError::validation("Message is required"))?;
    check_length(message)?;
    Ok(ChatRequest::Simple {
        message: message.to_string(),
    })
}

/// Validate a `{ model, messages[], max_tokens?, temperature? }` body.
pub fn structured_body(body: &[u8]) -> Result<ChatRequest, RelayError> {
    let value = parse_json(body)?;
    let obj = value
        .as_object()
        .ok_or_else(|| RelayError::validation("Invalid payload format"))?;

    let model = obj
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| RelayError::validation("Missing 'model' field"))?;

    let raw_messages = obj
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::validation("'messages' must be an array"))?;
    if raw_messages.is_empty() {
        return Err(RelayError::validation("'messages' array cannot be empty"));
    }
    let messages = raw_messages
        .iter()
        .map(parse_message)
        .collect::<Result<Vec<_>, _>>()?;

    let max_tokens = match obj.get("max_tokens") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .filter(|n| *n > 0)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| RelayError::validation("'max_tokens' must be a positive integer"))?,
        ),
    };
    let temperature = match obj.get("temperature") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_f64()
                .filter(|t| t.is_finite() && *t >= 0.0)
                .map(|t| t as f32)
                .ok_or_else(|| {
                    RelayError::validation("'temperature' must be a non-negative number")
                })?,
        ),
    };

    Ok(ChatRequest::Structured(StructuredChat {
        model: model.to_string(),
        messages,
        max_tokens,
        temperature,
    }))
}

fn parse_json(body: &[u8]) -> Result<Value, RelayError> {
    serde_json::from_slice(body).map_err(|err| {
        tracing::debug!(error = %err, "rejecting malformed JSON body");
        RelayError::InvalidJson
    })
}

fn parse_message(raw: &Value) -> Result<Message, RelayError> {
    let (Some(role), Some(content)) = (text_field(raw, "role"), text_field(raw, "content")) else {
        return Err(RelayError::validation(
            "Each message must have 'role' and 'content'",
        ));
    };
    let role = Role::parse(role).ok_or_else(|| {
        RelayError::validation(format!(
            "Invalid role '{}': expected system, user or assistant",
            role
        ))
    })?;
    check_length(content)?;
    Ok(Message::new(role, content))
}

fn text_field<'a>(raw: &'a Value, name: &str) -> Option<&'a str> {
    raw.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn check_length(text: &str) -> Result<(), RelayError> {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(RelayError::validation(TOO_LONG));
    }
    Ok(())
}

/// Sanitize free text and make sure something is left to send.
pub fn sanitized_text(raw: &str) -> Result<String, RelayError> {
    let text = sanitize(raw);
    if text.is_empty() {
        return Err(RelayError::validation("Message is empty after sanitization"));
    }
    Ok(text)
}
