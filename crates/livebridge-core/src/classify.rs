//! Classification of decoded upstream frames.
//!
//! Rule order, first match wins:
//! 1. `serverContent.outputTranscription.text` → [`ClassifiedEvent::Transcription`]
//! 2. `toolCall` → [`ClassifiedEvent::ToolCall`] (single entries normalized to a list)
//! 3. anything else → [`ClassifiedEvent::Generic`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool invocation requested by the upstream model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEntry {
    /// Function name.
    #[serde(default)]
    pub name: String,
    /// Call arguments, passed through untouched.
    #[serde(default)]
    pub args: Value,
    /// Upstream call ID, echoed back in the tool response. Kept as sent,
    /// string or number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl ToolCallEntry {
    /// Read an entry leniently: a missing or non-string `name` becomes
    /// empty, missing `args` become `null`, a `null` id is absent.
    pub fn from_value(value: &Value) -> Self {
        Self {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            args: value.get("args").cloned().unwrap_or(Value::Null),
            id: value.get("id").filter(|v| !v.is_null()).cloned(),
        }
    }
}

/// Semantic category of an upstream frame. Derived, never stored.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifiedEvent {
    /// Speech transcription of the model's output.
    Transcription {
        /// Transcribed text.
        text: String,
        /// When the frame was classified.
        timestamp: DateTime<Utc>,
    },
    /// One or more tool invocations, in the order received.
    ToolCall {
        /// Call entries.
        entries: Vec<ToolCallEntry>,
    },
    /// Any other frame.
    Generic {
        /// The decoded payload.
        payload: Value,
    },
}

impl ClassifiedEvent {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transcription { .. } => "transcription",
            Self::ToolCall { .. } => "tool_call",
            Self::Generic { .. } => "generic",
        }
    }
}

/// Classify a decoded frame, stamping transcriptions with the current time.
pub fn classify(decoded: &Value) -> ClassifiedEvent {
    classify_at(decoded, Utc::now())
}

/// Classify a decoded frame with an explicit timestamp.
pub fn classify_at(decoded: &Value, now: DateTime<Utc>) -> ClassifiedEvent {
    if let Some(text) = decoded
        .pointer("/serverContent/outputTranscription/text")
        .and_then(Value::as_str)
    {
        return ClassifiedEvent::Transcription {
            text: text.to_string(),
            timestamp: now,
        };
    }

    if let Some(tool_call) = decoded.get("toolCall").filter(|v| !v.is_null()) {
        return ClassifiedEvent::ToolCall {
            entries: tool_call_entries(tool_call),
        };
    }

    ClassifiedEvent::Generic {
        payload: decoded.clone(),
    }
}

/// Normalize the `toolCall` body into a list of entries.
///
/// Accepts `{"functionCalls": [..]}`, `{"functionCalls": {..}}`, or a bare
/// entry carrying a `name`. Every listed entry is kept, however odd its
/// fields.
fn tool_call_entries(tool_call: &Value) -> Vec<ToolCallEntry> {
    match tool_call.get("functionCalls") {
        Some(Value::Array(items)) => items.iter().map(ToolCallEntry::from_value).collect(),
        Some(Value::Null) => Vec::new(),
        Some(single) => vec![ToolCallEntry::from_value(single)],
        None if tool_call.get("name").is_some() => vec![ToolCallEntry::from_value(tool_call)],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_transcription() {
        let frame = json!({"serverContent": {"outputTranscription": {"text": "hola"}}});
        match classify(&frame) {
            ClassifiedEvent::Transcription { text, .. } => assert_eq!(text, "hola"),
            other => panic!("expected transcription, got {other:?}"),
        }
    }

    #[test]
    fn transcription_uses_given_timestamp() {
        let now = Utc::now();
        let frame = json!({"serverContent": {"outputTranscription": {"text": "hi"}}});
        assert_eq!(
            classify_at(&frame, now),
            ClassifiedEvent::Transcription {
                text: "hi".into(),
                timestamp: now,
            }
        );
    }

    #[test]
    fn transcription_wins_over_tool_call() {
        let frame = json!({
            "serverContent": {"outputTranscription": {"text": "both"}},
            "toolCall": {"functionCalls": [{"name": "f"}]},
        });
        assert_eq!(classify(&frame).kind(), "transcription");
    }

    #[test]
    fn server_content_without_transcription_is_generic() {
        let frame = json!({"serverContent": {"modelTurn": {"parts": [{"text": "x"}]}}});
        assert_eq!(classify(&frame).kind(), "generic");
    }

    #[test]
    fn non_string_transcription_text_is_generic() {
        let frame = json!({"serverContent": {"outputTranscription": {"text": 42}}});
        assert_eq!(classify(&frame).kind(), "generic");
    }

    #[test]
    fn tool_call_list() {
        let frame = json!({"toolCall": {"functionCalls": [
            {"name": "get_weather", "args": {"city": "Lima"}, "id": "c1"},
            {"name": "get_time", "args": {}, "id": "c2"},
        ]}});
        let ClassifiedEvent::ToolCall { entries } = classify(&frame) else {
            panic!("expected tool call");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "get_weather");
        assert_eq!(entries[0].args["city"], "Lima");
        assert_eq!(entries[1].id, Some(Value::from("c2")));
    }

    #[test]
    fn tool_call_single_entry_normalized() {
        let frame = json!({"toolCall": {"functionCalls": {"name": "ping", "id": "c9"}}});
        let ClassifiedEvent::ToolCall { entries } = classify(&frame) else {
            panic!("expected tool call");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ping");
        assert_eq!(entries[0].args, Value::Null);
    }

    #[test]
    fn odd_entry_fields_are_kept() {
        let frame = json!({"toolCall": {"functionCalls": [
            {"name": "a", "id": 7},
            {"name": null, "id": "c2"},
        ]}});
        let ClassifiedEvent::ToolCall { entries } = classify(&frame) else {
            panic!("expected tool call");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].id, Some(json!(7)));
        assert_eq!(entries[1].name, "");
        assert_eq!(entries[1].id, Some(json!("c2")));
    }

    #[test]
    fn single_nameless_entry_kept() {
        let frame = json!({"toolCall": {"functionCalls": {"args": {"x": 1}, "id": "c3"}}});
        let ClassifiedEvent::ToolCall { entries } = classify(&frame) else {
            panic!("expected tool call");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "");
        assert_eq!(entries[0].args["x"], 1);
    }

    #[test]
    fn tool_call_bare_entry() {
        let frame = json!({"toolCall": {"name": "ping", "args": {"n": 1}}});
        let ClassifiedEvent::ToolCall { entries } = classify(&frame) else {
            panic!("expected tool call");
        };
        assert_eq!(entries[0].name, "ping");
        assert!(entries[0].id.is_none());
    }

    #[test]
    fn empty_tool_call_has_no_entries() {
        let frame = json!({"toolCall": {}});
        assert_eq!(classify(&frame), ClassifiedEvent::ToolCall { entries: vec![] });
    }

    #[test]
    fn null_tool_call_is_generic() {
        let frame = json!({"toolCall": null});
        assert_eq!(classify(&frame).kind(), "generic");
    }

    #[test]
    fn generic_keeps_payload() {
        let frame = json!({"setupComplete": {}});
        assert_eq!(
            classify(&frame),
            ClassifiedEvent::Generic { payload: frame.clone() }
        );
    }

    #[test]
    fn non_object_is_generic() {
        assert_eq!(classify(&json!("raw text")).kind(), "generic");
        assert_eq!(classify(&json!([1, 2])).kind(), "generic");
    }

    #[test]
    fn entry_serialization_omits_missing_id() {
        let entry = ToolCallEntry {
            name: "f".into(),
            args: json!({}),
            id: None,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert!(v.get("id").is_none());
    }
}
