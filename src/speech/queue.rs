//! Order-preserving, single-in-flight synthesis

use std::sync::Arc;

use tokio::sync::mpsc;

use super::synthesis::{SynthesisRequest, SynthesisResult, Synthesizer};
use crate::config::SpeechConfig;
use crate::connection::{ConnectionProvider, require_connection};
use crate::Result;

/// Serializes sentences through a [`Synthesizer`]
///
/// At most one call is outstanding: sentence `i + 1` is not sent until the
/// result for sentence `i` is known. The first failure ends the queue and
/// every sentence still waiting is dropped.
pub struct SynthesisQueue {
    synthesizer: Arc<dyn Synthesizer>,
    connections: Arc<dyn ConnectionProvider>,
    voice: Option<String>,
    rate: Option<String>,
}

impl SynthesisQueue {
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        connections: Arc<dyn ConnectionProvider>,
        voice: Option<String>,
        rate: Option<String>,
    ) -> Self {
        Self {
            synthesizer,
            connections,
            voice,
            rate,
        }
    }

    /// Queue using the voice and rate from config
    #[must_use]
    pub fn from_config(
        synthesizer: Arc<dyn Synthesizer>,
        connections: Arc<dyn ConnectionProvider>,
        config: &SpeechConfig,
    ) -> Self {
        Self::new(
            synthesizer,
            connections,
            Some(config.voice.clone()),
            Some(config.rate.clone()),
        )
    }

    /// Fail early when no speech credentials are available
    ///
    /// # Errors
    ///
    /// `Error::Config` without a connection or with blank speech credentials
    pub fn ensure_credentials(&self) -> Result<()> {
        require_connection(self.connections.as_ref())?.speech_credentials()?;
        Ok(())
    }

    /// Synthesize a single sentence
    ///
    /// Credentials are looked up again for every call.
    ///
    /// # Errors
    ///
    /// `Error::Config` without a connection, `Error::Network` if the call fails
    pub async fn synthesize_one(&self, text: &str) -> Result<SynthesisResult> {
        let credentials = require_connection(self.connections.as_ref())?.speech_credentials()?;
        let request = SynthesisRequest {
            text: text.to_string(),
            voice: self.voice.clone(),
            rate: self.rate.clone(),
            credentials,
        };

        let started = std::time::Instant::now();
        let audio = self.synthesizer.synthesize(&request).await?;
        tracing::debug!(
            chars = text.len(),
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "sentence synthesized"
        );

        Ok(SynthesisResult {
            text: request.text,
            audio,
        })
    }

    /// Drain `sentences` in order, sending each result to `results`
    ///
    /// Blank sentences are skipped. Returns how many results were delivered.
    /// Stops early, without error, if the receiver of `results` goes away.
    ///
    /// # Errors
    ///
    /// Returns the first synthesis failure; remaining sentences are dropped
    pub async fn run(
        &self,
        mut sentences: mpsc::UnboundedReceiver<String>,
        results: mpsc::Sender<SynthesisResult>,
    ) -> Result<usize> {
        let mut delivered = 0;

        while let Some(sentence) = sentences.recv().await {
            if sentence.trim().is_empty() {
                continue;
            }

            let result = match self.synthesize_one(&sentence).await {
                Ok(result) => result,
                Err(e) => {
                    sentences.close();
                    let mut dropped = 0usize;
                    while sentences.try_recv().is_ok() {
                        dropped += 1;
                    }
                    tracing::warn!(error = %e, dropped, "synthesis failed, abandoning queue");
                    return Err(e);
                }
            };

            if results.send(result).await.is_err() {
                tracing::debug!("synthesis results receiver closed");
                break;
            }
            delivered += 1;
        }

        Ok(delivered)
    }
}
