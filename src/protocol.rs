//! Wire messages for the realtime endpoint.
//!
//! Outbound messages are JSON text frames: the one-time session setup, a
//! stream of realtime audio chunks, and tool-call acknowledgements. Inbound
//! frames carry any combination of setup ack, server content (transcription,
//! model audio, interruption/turn flags), and tool calls.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Mime type declared on every outbound microphone chunk.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

// ======================== Outbound ========================

#[derive(Serialize, Debug)]
pub struct SetupMessage {
    pub setup: SessionSetup,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolDeclarations>,
    /// Presence of the (empty) object enables input transcription.
    pub input_audio_transcription: Value,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug)]
pub struct TextPart {
    pub text: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclarations {
    pub function_declarations: Vec<Value>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub tool_response: ToolResponse,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize, Debug)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Session setup sent right after the socket opens.
pub fn setup_message(
    model: &str,
    voice: &str,
    system_instruction: &str,
    function_declarations: Vec<Value>,
) -> SetupMessage {
    SetupMessage {
        setup: SessionSetup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: system_instruction.to_string(),
                }],
            },
            tools: vec![ToolDeclarations {
                function_declarations,
            }],
            input_audio_transcription: json!({}),
        },
    }
}

/// One encoded microphone frame, ready to send.
pub fn realtime_audio_chunk(data: String) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: INPUT_MIME_TYPE.to_string(),
                data,
            }],
        },
    }
}

/// Acknowledgement for one tool invocation, correlated by id.
pub fn tool_ack(id: &str, name: &str) -> ToolResponseMessage {
    ToolResponseMessage {
        tool_response: ToolResponse {
            function_responses: vec![FunctionResponse {
                id: id.to_string(),
                name: name.to_string(),
                response: json!({ "result": "ok" }),
            }],
        },
    }
}

// ======================== Inbound ========================

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub input_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}
