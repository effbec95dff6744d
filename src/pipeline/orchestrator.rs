//! Per-turn wiring of the generation-to-speech pipeline
//!
//! ```text
//! chat stream ─► decode_stream ─► SentenceSegmenter ─► route_sentence
//!                     │                                     │ sentences (mpsc)
//!                     ▼                                     ▼
//!                 Transcript                          SynthesisQueue task
//!                                                           │ results (mpsc)
//!                                                           ▼
//!                                          forwarder task ─► PlaybackHandle
//! ```

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::TurnEvent;
use super::router::route_sentence;
use super::transcript::Transcript;
use crate::llm::{ChatTransport, DecodeEvent, decode_stream};
use crate::playback::PlaybackHandle;
use crate::speech::{SentenceBoundaryLocator, SentenceSegmenter, SynthesisQueue, SynthesisResult};
use crate::{Error, Result};

/// Synthesized sentences waiting to be appended to playback
const RESULT_CHANNEL_CAPACITY: usize = 8;

/// What a completed turn produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub id: Uuid,
    /// Full generated text
    pub response: String,
    /// Sentences that left the segmenter, including the final flush
    pub sentences: usize,
    /// Sentences whose audio was handed to playback
    pub spoken: usize,
    pub finish_reason: Option<String>,
}

/// Why the read loop of a turn stopped
enum ReadOutcome {
    Ended,
    Failed(Error),
    SynthesisStopped,
    Cancelled,
}

/// Runs user turns through generation, synthesis and playback
pub struct Orchestrator {
    chat: Arc<dyn ChatTransport>,
    synthesis: Arc<SynthesisQueue>,
    playback: PlaybackHandle,
    locator: Arc<dyn SentenceBoundaryLocator>,
    transcript: Transcript,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
    playback_stopped: bool,
}

impl Orchestrator {
    /// Create an orchestrator and start playback
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        synthesis: SynthesisQueue,
        playback: PlaybackHandle,
        locator: Arc<dyn SentenceBoundaryLocator>,
    ) -> Self {
        playback.start();
        Self {
            chat,
            synthesis: Arc::new(synthesis),
            playback,
            locator,
            transcript: Transcript::new(),
            events: None,
            playback_stopped: false,
        }
    }

    /// Send [`TurnEvent`]s to `events`
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub const fn playback(&self) -> &PlaybackHandle {
        &self.playback
    }

    /// Forget the conversation so far
    pub fn clear(&mut self) {
        self.transcript.clear();
    }

    /// Drop queued audio and restart playback on a fresh engine
    pub fn interrupt(&mut self) {
        self.playback.pause();
        self.playback.start();
        self.playback_stopped = false;
    }

    /// Run one user turn
    ///
    /// Returns once generation has ended and every sentence has been handed
    /// to playback; audio may still be playing. On error the transcript
    /// keeps the user message and whatever assistant text arrived.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when credentials are missing, before any network call
    /// - `Error::Protocol` or `Error::Network` from the chat stream
    /// - `Error::Network` from the first failed synthesis call
    /// - `Error::Cancelled` if `cancel` fires first
    pub async fn submit(&mut self, text: &str, cancel: CancellationToken) -> Result<TurnSummary> {
        self.transcript.push_user(text);
        self.run_turn(cancel).await
    }

    /// Run one user turn with an attached image, e.g. a screen capture
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::submit`]
    pub async fn submit_with_image(
        &mut self,
        text: &str,
        image_url: &str,
        cancel: CancellationToken,
    ) -> Result<TurnSummary> {
        self.transcript.push_user_with_image(text, image_url);
        self.run_turn(cancel).await
    }

    /// Speak `text` without asking the model, recording it as an assistant message
    ///
    /// # Errors
    ///
    /// `Error::Config` without speech credentials, `Error::Network` if a
    /// synthesis call fails
    pub async fn speak(&mut self, text: &str) -> Result<usize> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        self.synthesis.ensure_credentials()?;
        self.ensure_playback();
        self.transcript.append_assistant_message(text);

        let turn = Uuid::new_v4();
        let mut segmenter = SentenceSegmenter::new(Arc::clone(&self.locator));
        let sentences = segmenter
            .enqueue(text)
            .into_iter()
            .chain(segmenter.flush())
            .collect::<Vec<_>>();

        for sentence in &sentences {
            let result = self.synthesis.synthesize_one(sentence.trim()).await?;
            append_to_playback(&self.playback, self.events.as_ref(), turn, result);
        }
        Ok(sentences.len())
    }

    async fn run_turn(&mut self, cancel: CancellationToken) -> Result<TurnSummary> {
        let turn = Uuid::new_v4();
        self.synthesis.ensure_credentials()?;
        self.ensure_playback();

        tracing::info!(turn = %turn, messages = self.transcript.len(), "turn started");

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            opened = self.chat.open_stream(self.transcript.messages()) => Some(opened),
        };
        let Some(opened) = opened else {
            self.abandon_playback();
            tracing::info!(turn = %turn, "turn cancelled before the stream opened");
            return Err(Error::Cancelled);
        };
        let chunks = opened?;

        let (sentence_tx, sentence_rx) = mpsc::unbounded_channel::<String>();
        let (result_tx, mut result_rx) = mpsc::channel::<SynthesisResult>(RESULT_CHANNEL_CAPACITY);

        let queue = Arc::clone(&self.synthesis);
        let mut synthesis = tokio::spawn(async move { queue.run(sentence_rx, result_tx).await });

        let playback = self.playback.clone();
        let events = self.events.clone();
        let mut forwarder = tokio::spawn(async move {
            let mut appended = 0usize;
            while let Some(result) = result_rx.recv().await {
                append_to_playback(&playback, events.as_ref(), turn, result);
                appended += 1;
            }
            appended
        });

        let mut segmenter = SentenceSegmenter::new(Arc::clone(&self.locator));
        let mut decoded = std::pin::pin!(decode_stream(chunks));
        let mut response = String::new();
        let mut sentences = 0usize;
        let mut finish_reason = None;

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break ReadOutcome::Cancelled,
                () = sentence_tx.closed() => break ReadOutcome::SynthesisStopped,
                event = decoded.next() => match event {
                    Some(Ok(DecodeEvent::Delta(delta))) => {
                        self.transcript.append_assistant_delta(&delta);
                        response.push_str(&delta);
                        if let Some(sentence) = segmenter.enqueue(&delta) {
                            sentences += 1;
                            self.dispatch_sentence(turn, &sentence, &sentence_tx);
                        }
                    }
                    Some(Ok(DecodeEvent::Finished { finish_reason: reason })) => {
                        finish_reason = Some(reason);
                    }
                    Some(Err(e)) => break ReadOutcome::Failed(e),
                    None => break ReadOutcome::Ended,
                },
            }
        };

        if matches!(outcome, ReadOutcome::Cancelled) {
            // the in-flight synthesis call is left to finish; its result has nowhere to go
            forwarder.abort();
            drop(sentence_tx);
            drop(synthesis);
            self.abandon_playback();
            tracing::info!(turn = %turn, "turn cancelled");
            return Err(Error::Cancelled);
        }

        if !matches!(outcome, ReadOutcome::SynthesisStopped)
            && let Some(sentence) = segmenter.flush()
        {
            sentences += 1;
            self.dispatch_sentence(turn, &sentence, &sentence_tx);
        }
        drop(sentence_tx);

        // queued sentences may still be synthesizing after the stream ends
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            joined = async { ((&mut synthesis).await, (&mut forwarder).await) } => Some(joined),
        };
        let Some((synthesized, spoken)) = joined else {
            forwarder.abort();
            drop(synthesis);
            self.abandon_playback();
            tracing::info!(turn = %turn, "turn cancelled while speaking");
            return Err(Error::Cancelled);
        };
        let synthesized = synthesized?;
        let spoken = spoken?;

        if let ReadOutcome::Failed(e) = outcome {
            tracing::warn!(turn = %turn, error = %e, "chat stream failed");
            return Err(e);
        }
        synthesized?;

        tracing::info!(turn = %turn, sentences, spoken, "turn completed");
        self.emit(TurnEvent::ResponseCompleted {
            turn,
            text: response.clone(),
        });

        Ok(TurnSummary {
            id: turn,
            response,
            sentences,
            spoken,
            finish_reason,
        })
    }

    /// Report a finished sentence and queue its speakable part for synthesis
    fn dispatch_sentence(&self, turn: Uuid, sentence: &str, sentences: &mpsc::UnboundedSender<String>) {
        tracing::debug!(turn = %turn, sentence, "sentence generated");
        self.emit(TurnEvent::SentenceGenerated {
            turn,
            text: sentence.to_string(),
        });

        let routed = route_sentence(sentence);
        if let Some(tool) = routed.tool {
            tracing::info!(turn = %turn, tool = %tool.name, "tool requested");
            self.emit(TurnEvent::ToolInvoked {
                turn,
                name: tool.name,
                parameter: tool.parameter,
            });
        }

        if let Some(speech) = routed.speech
            && sentences.send(speech).is_err()
        {
            tracing::debug!(turn = %turn, "synthesis queue closed, sentence dropped");
        }
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn ensure_playback(&mut self) {
        if self.playback_stopped {
            self.playback.start();
            self.playback_stopped = false;
        }
    }

    fn abandon_playback(&mut self) {
        self.playback.pause();
        self.playback.stop();
        self.playback_stopped = true;
    }
}

/// Append synthesized audio, reporting when it starts playing
fn append_to_playback(
    playback: &PlaybackHandle,
    events: Option<&mpsc::UnboundedSender<TurnEvent>>,
    turn: Uuid,
    result: SynthesisResult,
) {
    let events = events.cloned();
    let text = result.text;
    tracing::debug!(turn = %turn, bytes = result.audio.len(), "audio queued for playback");
    playback.append(result.audio, move || {
        if let Some(events) = events {
            let _ = events.send(TurnEvent::SpeakingStarted { turn, text });
        }
    });
}
