//! Decoding of SSE `data:` payloads into [`StreamEvent`]s.
//!
//! Decoding is lenient: a payload that is not valid JSON, or that carries no
//! recognizable field, yields no event instead of an error.

use serde_json::Value;

use crate::event::{StreamEvent, Suggestion};

const DONE_SENTINEL: &str = "[DONE]";

const STATUS_FIELDS: &[&str] = &["status", "message", "text"];
const REASONING_FIELDS: &[&str] = &["reasoning", "content", "text"];
const DELTA_FIELDS: &[&str] = &["content", "delta"];

/// Classify one complete frame by its `event:` kind and joined `data:` payload.
pub fn decode_frame(kind: Option<&str>, payload: &str) -> Option<StreamEvent> {
    let kind = kind.map(str::trim).filter(|k| !k.is_empty());

    match kind {
        None | Some("message") => decode_default(payload),
        Some("status") => decode_json(payload)
            .and_then(|value| text_field(&value, STATUS_FIELDS))
            .map(StreamEvent::Status),
        Some("reasoning") => decode_json(payload)
            .and_then(|value| text_field(&value, REASONING_FIELDS))
            .map(StreamEvent::Reasoning),
        Some("suggestions") => decode_json(payload)
            .and_then(|value| suggestions_from_value(&value))
            .map(StreamEvent::Suggestions),
        Some("done") => Some(StreamEvent::Done),
        Some(other) => {
            log::debug!("Ignoring SSE event of unknown kind '{}'", other);
            None
        }
    }
}

fn decode_default(payload: &str) -> Option<StreamEvent> {
    if payload.trim() == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    let value = decode_json(payload)?;
    delta_text(&value).map(StreamEvent::ContentDelta)
}

fn decode_json(payload: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("Dropping malformed SSE payload ({}): {:?}", e, payload);
            None
        }
    }
}

/// A bare JSON string, or the first string-valued field among `fields`.
fn text_field(value: &Value, fields: &[&str]) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => fields
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Extract streamed answer text: top-level `content`/`delta` (a string, or an
/// object holding `content`), or OpenAI-compatible `choices[0].delta.content`.
pub fn delta_text(value: &Value) -> Option<String> {
    let map = value.as_object()?;

    let direct = DELTA_FIELDS.iter().find_map(|field| match map.get(*field) {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Object(inner)) => inner
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    });

    let text = direct.or_else(|| {
        value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map(str::to_string)
    })?;

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Suggestions given as an array (of strings or `{text}` objects), or as an
/// object holding such an array under `suggestions`.
pub fn suggestions_from_value(value: &Value) -> Option<Vec<Suggestion>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("suggestions")?.as_array()?,
        _ => return None,
    };

    let suggestions = items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(Suggestion::new(text.clone())),
            Value::Object(map) => map
                .get("text")
                .and_then(Value::as_str)
                .map(Suggestion::new),
            _ => None,
        })
        .collect();

    Some(suggestions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_without_kind() {
        assert_eq!(decode_frame(None, "[DONE]"), Some(StreamEvent::Done));
        assert_eq!(decode_frame(None, " [DONE] "), Some(StreamEvent::Done));
        assert_eq!(decode_frame(Some("message"), "[DONE]"), Some(StreamEvent::Done));
    }

    #[test]
    fn content_delta_variants() {
        assert_eq!(
            decode_frame(None, r#"{"content":"Hi"}"#),
            Some(StreamEvent::ContentDelta("Hi".to_string()))
        );
        assert_eq!(
            decode_frame(None, r#"{"delta":{"content":"yo"}}"#),
            Some(StreamEvent::ContentDelta("yo".to_string()))
        );
        assert_eq!(
            decode_frame(None, r#"{"choices":[{"delta":{"content":"abc"}}]}"#),
            Some(StreamEvent::ContentDelta("abc".to_string()))
        );
    }

    #[test]
    fn payload_without_delta_field_yields_nothing() {
        assert_eq!(decode_frame(None, r#"{"id":"x"}"#), None);
        assert_eq!(decode_frame(None, r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(decode_frame(None, r#"{"content":""}"#), None);
    }

    #[test]
    fn malformed_json_yields_nothing() {
        assert_eq!(decode_frame(None, r#"{"content": "Hi"#), None);
        assert_eq!(decode_frame(Some("status"), "not json"), None);
    }

    #[test]
    fn status_accepts_string_or_object() {
        assert_eq!(
            decode_frame(Some("status"), r#""thinking""#),
            Some(StreamEvent::Status("thinking".to_string()))
        );
        assert_eq!(
            decode_frame(Some("status"), r#"{"status":"Activated mentor mode"}"#),
            Some(StreamEvent::Status("Activated mentor mode".to_string()))
        );
        assert_eq!(
            decode_frame(Some("status"), r#"{"message":"searching"}"#),
            Some(StreamEvent::Status("searching".to_string()))
        );
    }

    #[test]
    fn reasoning_payload() {
        assert_eq!(
            decode_frame(Some("reasoning"), r#"{"reasoning":"step 1"}"#),
            Some(StreamEvent::Reasoning("step 1".to_string()))
        );
    }

    #[test]
    fn suggestions_payload_shapes() {
        let expected = Some(StreamEvent::Suggestions(vec![
            Suggestion::new("a"),
            Suggestion::new("b"),
        ]));
        assert_eq!(decode_frame(Some("suggestions"), r#"[{"text":"a"},{"text":"b"}]"#), expected);
        assert_eq!(decode_frame(Some("suggestions"), r#"["a","b"]"#), expected);
        assert_eq!(
            decode_frame(Some("suggestions"), r#"{"suggestions":[{"text":"a"},"b",7]}"#),
            expected
        );
        assert_eq!(decode_frame(Some("suggestions"), "42"), None);
    }

    #[test]
    fn explicit_done_kind_and_unknown_kinds() {
        assert_eq!(decode_frame(Some("done"), ""), Some(StreamEvent::Done));
        assert_eq!(decode_frame(Some("ping"), "{}"), None);
    }
}
