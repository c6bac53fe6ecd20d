//! Message and wire types shared by the normalizer and the upstream adapter.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A canonical chat message, ready to be sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: String,
    pub content: Content,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Content::Text(content.into()),
        }
    }
}

/// Message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
}

/// One element of a multi-part content list.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// A caller-supplied object, forwarded untouched (images, files, ...).
    Raw(Map<String, Value>),
    /// A text segment, serialized as `{"type":"text","text":...}`.
    Text(String),
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Part::Raw(obj) => obj.serialize(serializer),
            Part::Text(text) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "text")?;
                map.serialize_entry("text", text)?;
                map.end()
            }
        }
    }
}

/// Upstream request body for a streaming chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub stream: bool,
}

/// One decoded upstream streaming chunk.
///
/// Every field is optional or defaulted: providers differ in what they
/// include and an absent field must never fail the stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Some gateways report failures in-band as `{"error": {...}}`.
    #[serde(default)]
    pub error: Option<Value>,
}

/// A streaming choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental content in a streaming choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    /// Either a string or a list of parts.
    #[serde(default)]
    pub content: Option<Value>,
}

impl Delta {
    /// Text carried by this delta.
    ///
    /// Lists are flattened: object parts contribute their `text` field
    /// (empty when absent), string parts are used verbatim, anything else
    /// is stringified. Returns `None` when there is no text to emit.
    pub fn text(&self) -> Option<String> {
        let text = match self.content.as_ref()? {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts.iter().map(part_text).collect(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

fn part_text(part: &Value) -> String {
    match part {
        Value::Object(obj) => match obj.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ChunkChoice {
    /// Whether this choice marks the end of generation.
    pub fn is_finished(&self) -> bool {
        self.finish_reason
            .as_deref()
            .is_some_and(|reason| !reason.is_empty())
    }
}

impl ChatCompletionChunk {
    /// Human-readable text of an in-band error, if any.
    pub fn error_message(&self) -> Option<String> {
        let err = self.error.as_ref().filter(|e| !e.is_null())?;
        Some(
            err.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| match err {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: Value) -> ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_part_serializes_as_typed_object() {
        let msg = Message {
            role: "user".to_string(),
            content: Content::Parts(vec![Part::Text("hello".to_string())]),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "user", "content": [{"type": "text", "text": "hello"}]})
        );
    }

    #[test]
    fn test_raw_part_serializes_unchanged() {
        let raw = json!({"type": "image_url", "image_url": {"url": "https://x/y.png"}});
        let part = Part::Raw(raw.as_object().unwrap().clone());
        assert_eq!(serde_json::to_value(&part).unwrap(), raw);
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![Message::user("hi")];
        let body = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            stream: true,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"model":"gpt-4o-mini","messages":[{"role":"user","content":"hi"}],"stream":true}"#
        );
    }

    #[test]
    fn test_delta_string_content() {
        let c = chunk(json!({"choices": [{"delta": {"content": "Hel"}, "finish_reason": null}]}));
        assert_eq!(c.choices[0].delta.as_ref().unwrap().text().as_deref(), Some("Hel"));
        assert!(!c.choices[0].is_finished());
    }

    #[test]
    fn test_delta_list_content_concatenated() {
        let c = chunk(json!({"choices": [{"delta": {"content": [
            {"type": "text", "text": "a"},
            {"type": "image"},
            "b",
            7
        ]}}]}));
        assert_eq!(c.choices[0].delta.as_ref().unwrap().text().as_deref(), Some("ab7"));
    }

    #[test]
    fn test_delta_without_content_emits_nothing() {
        let c = chunk(json!({"choices": [{"delta": {"role": "assistant"}}]}));
        assert_eq!(c.choices[0].delta.as_ref().unwrap().text(), None);

        let c = chunk(json!({"choices": [{"delta": {"content": ""}}]}));
        assert_eq!(c.choices[0].delta.as_ref().unwrap().text(), None);
    }

    #[test]
    fn test_empty_finish_reason_is_not_finished() {
        let c = chunk(json!({"choices": [{"delta": {}, "finish_reason": ""}]}));
        assert!(!c.choices[0].is_finished());
        let c = chunk(json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}));
        assert!(c.choices[0].is_finished());
    }

    #[test]
    fn test_chunk_without_choices_defaults_empty() {
        let c = chunk(json!({"id": "x", "usage": {"prompt_tokens": 1}}));
        assert!(c.choices.is_empty());
        assert!(c.error_message().is_none());
    }

    #[test]
    fn test_in_band_error_message() {
        let c = chunk(json!({"error": {"message": "rate limited", "code": 429}}));
        assert_eq!(c.error_message().as_deref(), Some("rate limited"));
        let c = chunk(json!({"error": "plain failure"}));
        assert_eq!(c.error_message().as_deref(), Some("plain failure"));
    }
}
