//! Caller input normalization.
//!
//! Accepts either a `messages` list or a bare `prompt` and produces the
//! canonical message list the upstream API expects.

use serde_json::Value;

use super::types::{Content, Message, Part};
use crate::error::{Error, Result};

/// Which input form produced the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputForm {
    Messages,
    Prompt,
}

impl InputForm {
    pub fn as_str(self) -> &'static str {
        match self {
            InputForm::Messages => "messages",
            InputForm::Prompt => "prompt",
        }
    }
}

/// A validated request, ready for the upstream adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub form: InputForm,
}

/// Normalize a raw JSON payload.
///
/// A non-empty `messages` array takes priority and `prompt` is then ignored.
/// Otherwise a non-empty string `prompt` becomes a single user message.
/// Anything else is [`Error::MissingInput`].
pub fn normalize(payload: &Value, default_model: &str) -> Result<NormalizedRequest> {
    let (messages, form) = match payload.get("messages") {
        Some(Value::Array(raw)) if !raw.is_empty() => (
            raw.iter().map(normalize_message).collect(),
            InputForm::Messages,
        ),
        _ => match payload.get("prompt") {
            Some(Value::String(prompt)) if !prompt.is_empty() => {
                (vec![Message::user(prompt.as_str())], InputForm::Prompt)
            }
            _ => return Err(Error::MissingInput),
        },
    };

    Ok(NormalizedRequest {
        model: resolve_model(payload, default_model),
        messages,
        form,
    })
}

/// Caller-supplied `model` when it is a non-empty string, else the default.
pub fn resolve_model(payload: &Value, default_model: &str) -> String {
    payload
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(default_model)
        .to_string()
}

fn normalize_message(raw: &Value) -> Message {
    let Value::Object(obj) = raw else {
        // A bare entry is taken as the content of a user message.
        return Message {
            role: "user".to_string(),
            content: normalize_content(Some(raw)),
        };
    };

    let role = match obj.get("role") {
        Some(Value::String(role)) => role.clone(),
        Some(Value::Null) | None => "user".to_string(),
        Some(other) => other.to_string(),
    };

    Message {
        role,
        content: normalize_content(obj.get("content")),
    }
}

/// Map a raw `content` value onto [`Content`].
///
/// An absent field becomes empty text; any non-string, non-list value
/// (including `null`) is JSON-serialized into text.
pub fn normalize_content(raw: Option<&Value>) -> Content {
    match raw {
        None => Content::Text(String::new()),
        Some(Value::String(text)) => Content::Text(text.clone()),
        Some(Value::Array(items)) => Content::Parts(items.iter().map(normalize_part).collect()),
        Some(other) => Content::Text(other.to_string()),
    }
}

fn normalize_part(item: &Value) -> Part {
    match item {
        Value::Object(obj) => Part::Raw(obj.clone()),
        Value::String(text) => Part::Text(text.clone()),
        other => Part::Text(other.to_string()),
    }
}
