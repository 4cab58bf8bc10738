//! Upstream frame builders.
//!
//! Frames are opaque JSON to the bridge; only the two envelopes it
//! originates itself are built here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Default upstream model.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Session setup sent as the first frame on every successful open.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupConfig {
    /// Model resource name.
    pub model: String,
    /// System instruction text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Tool declarations, passed through verbatim.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Generation config, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<Value>,
    /// Ask upstream to transcribe its audio output.
    pub output_audio_transcription: bool,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            system_instruction: None,
            tools: Vec::new(),
            generation_config: None,
            output_audio_transcription: true,
        }
    }
}

/// Build the `{"setup": {...}}` frame.
pub fn setup_frame(config: &SetupConfig) -> Value {
    let mut setup = Map::new();
    let _ = setup.insert("model".into(), Value::String(config.model.clone()));
    if let Some(ref text) = config.system_instruction {
        let _ = setup.insert(
            "systemInstruction".into(),
            json!({ "parts": [{ "text": text }] }),
        );
    }
    if !config.tools.is_empty() {
        let _ = setup.insert("tools".into(), Value::Array(config.tools.clone()));
    }
    if let Some(ref generation) = config.generation_config {
        let _ = setup.insert("generationConfig".into(), generation.clone());
    }
    if config.output_audio_transcription {
        let _ = setup.insert("outputAudioTranscription".into(), json!({}));
    }
    json!({ "setup": setup })
}

/// Normalize tool response entries to a list.
///
/// An array is kept as-is, `null` becomes empty, anything else is wrapped.
pub fn normalize_entries(entries: Value) -> Vec<Value> {
    match entries {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Build the `{"toolResponse": {"functionResponses": [...]}}` frame.
pub fn tool_response_frame(entries: Value) -> Value {
    json!({
        "toolResponse": {
            "functionResponses": normalize_entries(entries),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_setup_frame() {
        let cfg = SetupConfig {
            output_audio_transcription: false,
            ..SetupConfig::default()
        };
        assert_eq!(setup_frame(&cfg), json!({"setup": {"model": DEFAULT_MODEL}}));
    }

    #[test]
    fn full_setup_frame() {
        let cfg = SetupConfig {
            model: "models/test".into(),
            system_instruction: Some("be brief".into()),
            tools: vec![json!({"functionDeclarations": [{"name": "f"}]})],
            generation_config: Some(json!({"responseModalities": ["AUDIO"]})),
            output_audio_transcription: true,
        };
        let frame = setup_frame(&cfg);
        let setup = &frame["setup"];
        assert_eq!(setup["model"], "models/test");
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "f");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(setup["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn setup_config_camel_case() {
        let cfg: SetupConfig = serde_json::from_str(
            r#"{"model":"m","systemInstruction":"s","outputAudioTranscription":false}"#,
        )
        .unwrap();
        assert_eq!(cfg.system_instruction.as_deref(), Some("s"));
        assert!(!cfg.output_audio_transcription);
    }

    #[test]
    fn single_entry_wrapped() {
        let frame = tool_response_frame(json!({"id": "c1", "response": {"ok": true}}));
        let list = frame["toolResponse"]["functionResponses"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], "c1");
    }

    #[test]
    fn list_kept_in_order() {
        let frame = tool_response_frame(json!([{"id": "a"}, {"id": "b"}]));
        let list = frame["toolResponse"]["functionResponses"].as_array().unwrap();
        assert_eq!(list[0]["id"], "a");
        assert_eq!(list[1]["id"], "b");
    }

    #[test]
    fn null_entries_empty() {
        assert!(normalize_entries(Value::Null).is_empty());
    }
}
