//! OpenAI Realtime API protocol types
//!
//! This module defines the JSON message types for a voice conversation with
//! the OpenAI Realtime API over WebSocket.
//!
//! # Protocol Overview
//!
//! 1. Connect to `wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17`
//! 2. Receive `session.created` event
//! 3. Send `session.update` to configure the session
//! 4. Receive `session.updated`, then stream audio via `input_audio_buffer.append`
//! 5. Receive assistant audio via `response.audio.delta` and captions via
//!    `response.audio_transcript.delta`
//! 6. Receive completed turns via `conversation.item.input_audio_transcription.completed`
//!    (user) and `response.done` (assistant)

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// OpenAI Realtime API endpoint
pub const REALTIME_API_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17";

/// Session configuration for the Realtime API
///
/// Built by the caller (instructions come from the user's profile) and sent
/// verbatim once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Behaviour instructions for the assistant
    pub instructions: String,

    /// Server-side voice activity detection; `None` serializes as null (manual turns)
    pub turn_detection: Option<TurnDetection>,

    /// Voice used for synthesized replies
    pub voice: String,

    pub temperature: f32,

    pub max_response_output_tokens: u32,

    /// Tool definitions (none for check-ins)
    pub tools: Vec<serde_json::Value>,

    /// Output modalities
    pub modalities: Vec<String>,

    /// Input audio format - "pcm16" for raw PCM
    pub input_audio_format: String,

    /// Output audio format - "pcm16" for raw PCM
    pub output_audio_format: String,

    /// Input audio transcription settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,

    pub tool_choice: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            turn_detection: Some(TurnDetection::default()),
            voice: "alloy".to_string(),
            temperature: 1.0,
            max_response_output_tokens: 4096,
            tools: Vec::new(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(TranscriptionConfig {
                model: "whisper-1".to_string(),
            }),
            tool_choice: "auto".to_string(),
        }
    }
}

/// Transcription model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Model to use for transcription
    pub model: String,
}

/// Server VAD turn detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    /// Type of turn detection
    #[serde(rename = "type")]
    pub detection_type: String,
    /// Activation threshold (0.0 - 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech, in ms
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn, in ms
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            detection_type: "server_vad".to_string(),
            threshold: 0.75,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Session information returned by the API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    /// Unique session ID
    #[serde(default)]
    pub id: Option<String>,

    /// Model being used
    #[serde(default)]
    pub model: Option<String>,
}

/// Error information from the API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorInfo {
    /// Error type/code
    #[serde(rename = "type", default)]
    pub error_type: String,

    /// Error code
    #[serde(default)]
    pub code: Option<String>,

    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Response envelope carried by `response.created` / `response.done`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub transcript: Option<String>,
}

impl ResponseInfo {
    /// Transcript at `output[0].content[0].transcript`
    ///
    /// Only the first output item and its first content part are consulted;
    /// any missing link yields `None`.
    pub fn first_transcript(&self) -> Option<&str> {
        self.output
            .first()?
            .content
            .first()?
            .transcript
            .as_deref()
    }
}

// ============================================================================
// Client Messages (sent TO OpenAI)
// ============================================================================

/// Messages sent from client to OpenAI Realtime API
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Append audio data to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64-encoded PCM16 audio data
        audio: String,
    },
}

impl ClientMessage {
    pub fn session_update(session: SessionConfig) -> Self {
        Self::SessionUpdate { session }
    }

    /// Create an audio append message from raw PCM16 samples
    pub fn audio_append(samples: &[i16]) -> Self {
        // Convert samples to bytes (little-endian)
        let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();

        Self::AudioAppend {
            audio: STANDARD.encode(&bytes),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Server Messages (received FROM OpenAI)
// ============================================================================

/// Messages received from OpenAI Realtime API
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Session was created successfully
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// Session configuration was accepted
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// An error occurred
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorInfo,
    },

    /// Input audio buffer speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start time in ms
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    /// Input audio buffer speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end time in ms
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    /// The assistant started a new response
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    /// Fragment of synthesized assistant audio
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16 audio
        delta: String,
        /// Position of this fragment within its response
        #[serde(default)]
        index: Option<u64>,
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Partial assistant transcript
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        delta: String,
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Partial transcription of the user's speech
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptDelta { delta: String },

    /// Complete transcription of one user utterance
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted { transcript: String },

    /// The assistant finished a response
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    /// Catch-all for message types we don't handle
    /// This prevents deserialization failures for unknown types
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Decode one inbound text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Extract error info if this is an error message
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            ServerMessage::Error { error } => Some(error),
            _ => None,
        }
    }

    /// Extract session ID if this is a session created/updated message
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::SessionCreated { session }
            | ServerMessage::SessionUpdated { session } => session.as_ref()?.id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_session_update_serialization() {
        let config = SessionConfig {
            instructions: "Be kind.".to_string(),
            ..Default::default()
        };
        let msg = ClientMessage::session_update(config);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["instructions"], "Be kind.");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(session["turn_detection"]["silence_duration_ms"], 500);
        assert_eq!(session["voice"], "alloy");
        assert_eq!(session["max_response_output_tokens"], 4096);
        assert_eq!(session["tools"], serde_json::json!([]));
        assert_eq!(session["modalities"], serde_json::json!(["text", "audio"]));
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["output_audio_format"], "pcm16");
        assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(session["tool_choice"], "auto");
    }

    #[test]
    fn test_manual_turn_detection_serializes_null() {
        let config = SessionConfig {
            turn_detection: None,
            ..Default::default()
        };
        let json = ClientMessage::session_update(config).to_json().unwrap();
        assert!(json.contains("\"turn_detection\":null"));
    }

    #[test]
    fn test_audio_encoding() {
        let samples = vec![0x1234i16, 0x5678];
        let msg = ClientMessage::audio_append(&samples);

        if let ClientMessage::AudioAppend { audio } = msg {
            let decoded = STANDARD.decode(&audio).unwrap();

            // Little-endian: 0x1234 -> [0x34, 0x12], 0x5678 -> [0x78, 0x56]
            assert_eq!(decoded, vec![0x34, 0x12, 0x78, 0x56]);
        } else {
            panic!("Expected AudioAppend");
        }
    }

    #[test]
    fn test_bare_lifecycle_frames_decode() {
        let msg = ServerMessage::decode(r#"{"type":"session.created"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::SessionCreated { session: None }));

        let msg = ServerMessage::decode(r#"{"type":"session.updated"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::SessionUpdated { .. }));
    }

    #[test]
    fn test_server_message_session_created_deserialization() {
        let json = r#"{
            "type": "session.created",
            "event_id": "evt_1",
            "session": {
                "id": "sess_123",
                "model": "gpt-4o-realtime-preview",
                "modalities": ["text", "audio"]
            }
        }"#;

        let msg = ServerMessage::decode(json).unwrap();
        assert_eq!(msg.session_id(), Some("sess_123"));
    }

    #[test]
    fn test_audio_delta_deserialization() {
        let json = r#"{
            "type": "response.audio.delta",
            "response_id": "resp_1",
            "item_id": "item_1",
            "delta": "AQ==",
            "index": 4
        }"#;

        match ServerMessage::decode(json).unwrap() {
            ServerMessage::AudioDelta {
                delta,
                index,
                response_id,
            } => {
                assert_eq!(delta, "AQ==");
                assert_eq!(index, Some(4));
                assert_eq!(response_id.as_deref(), Some("resp_1"));
            }
            other => panic!("Expected AudioDelta, got {:?}", other),
        }
    }

    #[test]
    fn test_audio_delta_without_payload_is_malformed() {
        let result = ServerMessage::decode(r#"{"type":"response.audio.delta","index":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_input_transcription_completed() {
        let json = r#"{
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "item_2",
            "content_index": 0,
            "transcript": "I walked after dinner."
        }"#;

        match ServerMessage::decode(json).unwrap() {
            ServerMessage::InputTranscriptCompleted { transcript } => {
                assert_eq!(transcript, "I walked after dinner.");
            }
            other => panic!("Expected InputTranscriptCompleted, got {:?}", other),
        }
    }

    #[test]
    fn test_response_done_first_transcript() {
        let json = r#"{
            "type": "response.done",
            "response": {
                "id": "resp_7",
                "status": "completed",
                "output": [
                    {"type": "message", "content": [
                        {"type": "audio", "transcript": "Great job today!"},
                        {"type": "audio", "transcript": "ignored"}
                    ]},
                    {"type": "message", "content": [{"transcript": "also ignored"}]}
                ]
            }
        }"#;

        match ServerMessage::decode(json).unwrap() {
            ServerMessage::ResponseDone { response } => {
                let response = response.unwrap();
                assert_eq!(response.id.as_deref(), Some("resp_7"));
                assert_eq!(response.first_transcript(), Some("Great job today!"));
            }
            other => panic!("Expected ResponseDone, got {:?}", other),
        }
    }

    #[test]
    fn test_response_done_missing_transcript_is_soft() {
        for json in [
            r#"{"type":"response.done"}"#,
            r#"{"type":"response.done","response":{}}"#,
            r#"{"type":"response.done","response":{"output":[]}}"#,
            r#"{"type":"response.done","response":{"output":[{"content":[]}]}}"#,
            r#"{"type":"response.done","response":{"output":[{"content":[{"type":"text"}]}]}}"#,
        ] {
            match ServerMessage::decode(json).unwrap() {
                ServerMessage::ResponseDone { response } => {
                    assert!(response.and_then(|r| r.first_transcript().map(str::to_owned)).is_none());
                }
                other => panic!("Expected ResponseDone, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_server_message_error_deserialization() {
        let json = r#"{
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "code": "invalid_api_key",
                "message": "Invalid API key"
            }
        }"#;

        let msg = ServerMessage::decode(json).unwrap();
        let error = msg.error_info().unwrap();
        assert_eq!(error.message, "Invalid API key");
        assert_eq!(error.code, Some("invalid_api_key".to_string()));
    }

    #[test]
    fn test_server_message_unknown_type() {
        let json = r#"{
            "type": "some.future.message.type",
            "data": "whatever"
        }"#;

        let msg = ServerMessage::decode(json).unwrap();

        assert!(matches!(msg, ServerMessage::Unknown));
    }

    #[test]
    fn test_non_json_is_malformed() {
        assert!(ServerMessage::decode("hey").is_err());
        assert!(ServerMessage::decode(r#"{"no_type":true}"#).is_err());
    }
}
