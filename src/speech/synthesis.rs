//! Text-to-speech synthesis backend

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::ExposeSecret;

use crate::config::{DEFAULT_OUTPUT_FORMAT, DEFAULT_SPEECH_RATE, DEFAULT_VOICE};
use crate::connection::SpeechCredentials;
use crate::{Error, Result};

/// One synthesis call
#[derive(Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: Option<String>,
    pub rate: Option<String>,
    pub credentials: SpeechCredentials,
}

impl std::fmt::Debug for SynthesisRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisRequest")
            .field("text", &self.text)
            .field("voice", &self.voice)
            .field("rate", &self.rate)
            .field("region", &self.credentials.region)
            .finish_non_exhaustive()
    }
}

/// Synthesized audio for one sentence
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub text: String,
    /// Encoded audio, appendable to a running playback buffer
    pub audio: Bytes,
}

/// Converts text into encoded audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one request
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the call fails, `Error::Network` if it is rejected
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes>;
}

/// Azure Speech REST synthesis
pub struct AzureSynthesizer {
    client: reqwest::Client,
    language: String,
    output_format: String,
}

impl Default for AzureSynthesizer {
    fn default() -> Self {
        Self::new("en-US".to_string(), DEFAULT_OUTPUT_FORMAT.to_string())
    }
}

impl AzureSynthesizer {
    #[must_use]
    pub fn new(language: String, output_format: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            language,
            output_format,
        }
    }

    fn endpoint(region: &str) -> String {
        format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1")
    }
}

#[async_trait]
impl Synthesizer for AzureSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes> {
        let ssml = build_ssml(
            &self.language,
            request.voice.as_deref().unwrap_or(DEFAULT_VOICE),
            request.rate.as_deref().unwrap_or(DEFAULT_SPEECH_RATE),
            &request.text,
        );

        let response = self
            .client
            .post(Self::endpoint(&request.credentials.region))
            .header(
                "Ocp-Apim-Subscription-Key",
                request.credentials.api_key.expose_secret(),
            )
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &self.output_format)
            .body(ssml)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "speech synthesis request failed");
                e
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!(
                "speech synthesis error {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Network("speech synthesis returned no audio".to_string()));
        }
        Ok(audio)
    }
}

/// Build the SSML document for one utterance
#[must_use]
pub fn build_ssml(language: &str, voice: &str, rate: &str, text: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{lang}'><voice xml:lang='{lang}' name='{voice}'><prosody rate='{rate}'>{text}</prosody></voice></speak>",
        lang = escape_xml(language),
        voice = escape_xml(voice),
        rate = escape_xml(rate),
        text = escape_xml(text),
    )
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
