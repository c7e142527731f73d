//! Realtime wire protocol — typed envelopes over the duplex connection.
//!
//! Every message is a JSON object tagged by `type`. Outbound envelopes are
//! [`ClientEvent`]; inbound envelopes are [`ServerEvent`]. Unrecognized
//! inbound types decode to [`ServerEvent::Unknown`] and are ignored rather
//! than treated as fatal.

use serde::{Deserialize, Serialize};

use crate::types::TurnId;

/// Client -> server envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// First frame after connect: negotiate voice, formats, VAD mode,
    /// instructions, and (optionally) tool schemas.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    /// A slice of microphone audio, base64 PCM16.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// Close the user's audio turn: everything appended so far is the
    /// utterance.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Ask for an assistant response to the committed input.
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseSpec },

    /// Cancel the in-flight response identified by `turn_id`.
    #[serde(rename = "response.cancel")]
    ResponseCancel { turn_id: TurnId },

    /// Inject a text item into the conversation (the `send_text` path).
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

/// Session parameters negotiated in the first frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Server-side turn detection mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

impl TurnDetection {
    pub fn server_vad() -> Self {
        Self {
            kind: "server_vad".into(),
        }
    }
}

/// Payload of `response.create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    /// Locally allocated id the remote side echoes on deltas and `done`.
    pub turn_id: TurnId,
    pub modalities: Vec<String>,
}

impl ResponseSpec {
    pub fn voice(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            modalities: vec!["audio".into(), "text".into()],
        }
    }

    pub fn text_only(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            modalities: vec!["text".into()],
        }
    }
}

/// A conversation item injected by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message".into(),
            role: "user".into(),
            content: vec![ContentPart {
                kind: "input_text".into(),
                text: text.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Server -> client envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The remote's own VAD heard the user start talking.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
    },

    /// The remote's own VAD heard the user stop talking.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
    },

    /// A slice of synthesized speech, base64 PCM16.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { turn_id: TurnId, delta: String },

    /// A slice of assistant text.
    #[serde(rename = "response.text.delta")]
    TextDelta { turn_id: TurnId, delta: String },

    /// Terminal event for a response (completed or cancelled).
    #[serde(rename = "response.done")]
    ResponseDone {
        turn_id: TurnId,
        #[serde(default)]
        response: ResponseOutcome,
    },

    /// Fatal error from the remote side; terminates the session.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },

    /// Anything we don't recognize. Ignored, not fatal.
    #[serde(other)]
    Unknown,
}

/// Body of `response.done`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseOutcome {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Completed,
    Cancelled,
    Failed,
}

/// One item of a completed response's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        text: String,
    },

    /// The model asked for a function call. `arguments` is a JSON-encoded
    /// string, as the remote sends it.
    #[serde(rename = "function_call")]
    FunctionCall {
        name: String,
        call_id: String,
        #[serde(default)]
        arguments: String,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_tags() {
        let evt = ClientEvent::InputAudioAppend {
            audio: "AAAA".into(),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAAA");

        let evt = ClientEvent::InputAudioCommit;
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.commit");

        let evt = ClientEvent::ResponseCancel { turn_id: TurnId(4) };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "response.cancel");
        assert_eq!(json["turn_id"], 4);
    }

    #[test]
    fn test_response_create_modalities() {
        let evt = ClientEvent::ResponseCreate {
            response: ResponseSpec::text_only(TurnId(9)),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["response"]["turn_id"], 9);
        assert_eq!(json["response"]["modalities"], serde_json::json!(["text"]));
    }

    #[test]
    fn test_conversation_item_shape() {
        let item = ConversationItem::user_text("hello");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "input_text");
        assert_eq!(json["content"][0]["text"], "hello");
    }

    #[test]
    fn test_server_event_decode() {
        let evt: ServerEvent = serde_json::from_str(
            r#"{"type":"response.audio.delta","turn_id":2,"delta":"UklGRg=="}"#,
        )
        .unwrap();
        assert_eq!(
            evt,
            ServerEvent::AudioDelta {
                turn_id: TurnId(2),
                delta: "UklGRg==".into()
            }
        );

        let evt: ServerEvent =
            serde_json::from_str(r#"{"type":"input_audio_buffer.speech_started"}"#).unwrap();
        assert_eq!(evt, ServerEvent::SpeechStarted { turn_id: None });
    }

    #[test]
    fn test_unknown_server_event_ignored() {
        let evt: ServerEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","limits":[]}"#).unwrap();
        assert_eq!(evt, ServerEvent::Unknown);
    }

    #[test]
    fn test_response_done_decode() {
        let evt: ServerEvent = serde_json::from_str(
            r#"{
                "type": "response.done",
                "turn_id": 5,
                "response": {
                    "status": "completed",
                    "output": [
                        {"type": "message", "text": "hi there"},
                        {"type": "function_call", "name": "run_os_command",
                         "call_id": "c1", "arguments": "{\"command\":\"ls\"}"}
                    ]
                }
            }"#,
        )
        .unwrap();
        let ServerEvent::ResponseDone { turn_id, response } = evt else {
            panic!("expected ResponseDone");
        };
        assert_eq!(turn_id, TurnId(5));
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 2);
        assert!(matches!(
            response.output[1],
            OutputItem::FunctionCall { ref name, .. } if name == "run_os_command"
        ));
    }

    #[test]
    fn test_response_done_defaults() {
        // A bare done frame still decodes; output defaults empty.
        let evt: ServerEvent =
            serde_json::from_str(r#"{"type":"response.done","turn_id":1}"#).unwrap();
        let ServerEvent::ResponseDone { response, .. } = evt else {
            panic!("expected ResponseDone");
        };
        assert!(response.output.is_empty());
        assert_eq!(response.status, ResponseStatus::Completed);
    }
}
