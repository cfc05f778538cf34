//! Wire messages of the bidirectional streaming endpoint
//!
//! Client messages are externally tagged JSON objects (`{"setup": ...}`,
//! `{"realtimeInput": ...}`); server messages carry any combination of the
//! optional fields below.

use serde::{Deserialize, Serialize};

use crate::codec::EncodedAudioChunk;
use crate::config::AppConfig;
use crate::error::{CodecError, ConnectionError};

/// Inline binary payload, base64 encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

impl Blob {
    pub fn from_chunk(chunk: &EncodedAudioChunk) -> Self {
        Self {
            mime_type: chunk.mime_type.clone(),
            data: chunk.to_base64(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.trim().to_ascii_lowercase().starts_with("audio/")
    }

    pub fn to_chunk(&self) -> Result<EncodedAudioChunk, CodecError> {
        EncodedAudioChunk::from_base64(&self.data, self.mime_type.clone())
    }
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn audio(chunk: &EncodedAudioChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob::from_chunk(chunk)],
        })
    }

    pub fn to_json(&self) -> Result<String, ConnectionError> {
        serde_json::to_string(self).map_err(|e| ConnectionError::Protocol(e.to_string()))
    }
}

/// Streamed media from the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Audio frames in capture order
    pub media_chunks: Vec<Blob>,
}

/// First message on a new connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name (`models/...`)
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Present to have the user's speech transcribed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    /// Present to have the model's speech transcribed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    pub fn from_config(config: &AppConfig) -> Self {
        let model = if config.api.model.starts_with("models/") {
            config.api.model.clone()
        } else {
            format!("models/{}", config.api.model)
        };

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.session.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: config
                .session
                .system_instruction
                .as_ref()
                .filter(|text| !text.trim().is_empty())
                .map(|text| Content::text(text.clone())),
            input_audio_transcription: config
                .session
                .transcribe_input
                .then_some(AudioTranscriptionConfig {}),
            output_audio_transcription: config
                .session
                .transcribe_output
                .then_some(AudioTranscriptionConfig {}),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Always `["AUDIO"]`
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Enables transcription; the endpoint takes an empty object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioTranscriptionConfig {}

/// Messages received from the server
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Acknowledges the setup message; the session may stream from here on
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    /// The server will close the connection soon
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, ConnectionError> {
        serde_json::from_str(text).map_err(|e| ConnectionError::Protocol(e.to_string()))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Interim transcript of the user's speech
    pub fn input_text(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .input_transcription
            .as_ref()?
            .text
            .as_deref()
    }

    /// Interim transcript of the model's speech
    pub fn output_text(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .output_transcription
            .as_ref()?
            .text
            .as_deref()
    }

    pub fn turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|c| c.turn_complete)
            .unwrap_or(false)
    }

    pub fn interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|c| c.interrupted)
            .unwrap_or(false)
    }

    /// Inline audio payloads of the model turn, in order
    pub fn audio_blobs(&self) -> impl Iterator<Item = &Blob> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.is_audio())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Model output; audio arrives as inline data parts
    #[serde(default)]
    pub model_turn: Option<Content>,
    /// Finalizes the interim transcript pair
    #[serde(default)]
    pub turn_complete: bool,
    /// The user spoke over the model; queued playback must stop
    #[serde(default)]
    pub interrupted: bool,
    /// The model has produced all output for this turn
    #[serde(default)]
    pub generation_complete: bool,
    /// Fragment of the user's speech as text
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    /// Fragment of the model's speech as text
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: String) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transcription {
    /// Appended to the interim text of its side
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Duration string such as `"10s"`
    #[serde(default)]
    pub time_left: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CAPTURE_MIME_TYPE;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_realtime_input_shape() {
        let chunk = EncodedAudioChunk::new(Bytes::from_static(&[1, 0, 2, 0]), CAPTURE_MIME_TYPE);
        let value: serde_json::Value =
            serde_json::from_str(&ClientMessage::audio(&chunk).to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AQACAA==" }]
                }
            })
        );
    }

    #[test]
    fn test_setup_from_config() {
        let mut config = AppConfig::default();
        config.api.model = "my-model".to_string();
        config.session.voice = "Puck".to_string();
        config.session.system_instruction = Some("Be brief.".to_string());
        config.session.transcribe_output = false;

        let value = serde_json::to_value(ClientMessage::Setup(Setup::from_config(&config))).unwrap();
        let setup = &value["setup"];
        assert_eq!(setup["model"], "models/my-model");
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(setup["inputAudioTranscription"], json!({}));
        assert!(setup.get("outputAudioTranscription").is_none());
    }

    #[test]
    fn test_parse_server_content() {
        let msg = ServerMessage::parse(
            r#"{
                "serverContent": {
                    "inputTranscription": { "text": "hel" },
                    "outputTranscription": { "text": "hi" },
                    "modelTurn": { "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAA=" } },
                        { "text": "ignored" },
                        { "inlineData": { "mimeType": "image/png", "data": "AAA=" } },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQA=" } }
                    ] },
                    "turnComplete": true
                }
            }"#,
        )
        .unwrap();

        assert_eq!(msg.input_text(), Some("hel"));
        assert_eq!(msg.output_text(), Some("hi"));
        assert!(msg.turn_complete());
        assert!(!msg.interrupted());
        let blobs: Vec<&str> = msg.audio_blobs().map(|b| b.data.as_str()).collect();
        assert_eq!(blobs, vec!["AAA=", "AQA="]);
    }

    #[test]
    fn test_parse_control_messages() {
        assert!(ServerMessage::parse(r#"{"setupComplete": {}}"#).unwrap().is_setup_complete());

        let interrupted = ServerMessage::parse(r#"{"serverContent": {"interrupted": true}}"#).unwrap();
        assert!(interrupted.interrupted());
        assert_eq!(interrupted.audio_blobs().count(), 0);

        let go_away = ServerMessage::parse(r#"{"goAway": {"timeLeft": "10s"}}"#).unwrap();
        assert_eq!(go_away.go_away.unwrap().time_left.as_deref(), Some("10s"));

        assert!(ServerMessage::parse("not json").is_err());
    }
}
