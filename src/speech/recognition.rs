//! Speech-to-text for push-to-talk input

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionProvider, require_connection};
use crate::{Error, Result};

/// API version of the fast transcription endpoint
pub const TRANSCRIPTION_API_VERSION: &str = "2024-05-15-preview";

/// Turns a recorded utterance into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio
    ///
    /// Returns `None` when nothing was recognized.
    ///
    /// # Errors
    ///
    /// `Error::Config` without speech credentials, `Error::Network` or
    /// `Error::Http` if the call fails
    async fn transcribe(&self, wav: Vec<u8>) -> Result<Option<String>>;
}

/// Form part describing how to transcribe the audio part
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptionDefinition<'a> {
    locales: [&'a str; 1],
    profanity_filter_mode: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptionResponse {
    #[serde(default)]
    combined_phrases: Vec<CombinedPhrase>,
}

#[derive(Debug, Deserialize)]
struct CombinedPhrase {
    text: String,
}

impl TranscriptionResponse {
    fn into_text(self) -> Option<String> {
        self.combined_phrases
            .into_iter()
            .next()
            .map(|phrase| phrase.text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

/// Azure Speech fast transcription
pub struct AzureTranscriber {
    client: reqwest::Client,
    connections: Arc<dyn ConnectionProvider>,
    locale: String,
}

impl AzureTranscriber {
    #[must_use]
    pub fn new(connections: Arc<dyn ConnectionProvider>, locale: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            connections,
            locale,
        }
    }

    fn endpoint(region: &str) -> String {
        format!(
            "https://{region}.api.cognitive.microsoft.com/speechtotext/transcriptions:transcribe?api-version={TRANSCRIPTION_API_VERSION}"
        )
    }

    fn definition(&self) -> Result<String> {
        Ok(serde_json::to_string(&TranscriptionDefinition {
            locales: [self.locale.as_str()],
            profanity_filter_mode: "None",
        })?)
    }
}

#[async_trait]
impl Transcriber for AzureTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<Option<String>> {
        let creds = require_connection(self.connections.as_ref())?.speech_credentials()?;
        tracing::debug!(audio_bytes = wav.len(), locale = %self.locale, "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "definition",
                reqwest::multipart::Part::text(self.definition()?).mime_str("application/json")?,
            )
            .part(
                "audio",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")?,
            );

        let response = self
            .client
            .post(Self::endpoint(&creds.region))
            .header("Ocp-Apim-Subscription-Key", creds.api_key.expose_secret())
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Network(format!("transcription error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await?;
        let text = result.into_text();
        tracing::info!(recognized = text.is_some(), "transcription complete");
        Ok(text)
    }
}
