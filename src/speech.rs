//! Clinical voice-note transcription via the Sarvam speech-to-text API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use surgisense_core::error::{ConfigurationError, UpstreamError};
use tracing::{debug, info};

use crate::config::{read_api_key, SpeechConfig};
use crate::upstream::{build_client, map_transport_error, read_json};

const OPERATION: &str = "speech-to-text";

/// Returned when the service produced no transcript.
pub const NOT_RECOGNIZED: &str = "Speech not recognized.";

/// Converts recorded audio into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one audio file. An empty transcript is returned as-is.
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, UpstreamError>;
}

/// Transcribe and substitute [`NOT_RECOGNIZED`] for an empty transcript.
pub async fn transcribe_note(
    transcriber: &dyn Transcriber,
    audio: Vec<u8>,
    file_name: &str,
) -> Result<String, UpstreamError> {
    let bytes = audio.len();
    let transcript = transcriber.transcribe(audio, file_name).await?;
    let transcript = transcript.trim();
    info!(bytes, chars = transcript.len(), "voice note transcribed");
    if transcript.is_empty() {
        Ok(NOT_RECOGNIZED.to_string())
    } else {
        Ok(transcript.to_string())
    }
}

/// Sarvam `POST /speech-to-text` client (multipart upload).
pub struct SarvamTranscriber {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    language_code: String,
    mode: String,
    timeout_secs: u64,
}

impl SarvamTranscriber {
    pub fn new(config: &SpeechConfig) -> Result<Self, ConfigurationError> {
        let api_key = read_api_key(&config.api_key_env)?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config.url.clone(),
            api_key,
            model: config.model.clone(),
            language_code: config.language_code.clone(),
            mode: config.mode.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Transcriber for SarvamTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, UpstreamError> {
        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/wav")
            .map_err(|e| map_transport_error(OPERATION, self.timeout_secs, e))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language_code", self.language_code.clone())
            .text("mode", self.mode.clone());

        debug!(model = %self.model, "sending audio for transcription");

        let response = self
            .client
            .post(&self.url)
            .header("api-subscription-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_transport_error(OPERATION, self.timeout_secs, e))?;
        let json = read_json(OPERATION, self.timeout_secs, response).await?;

        Ok(json
            .get("transcript")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string())
    }
}
