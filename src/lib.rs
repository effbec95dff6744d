//! Voicebar - speak a language model's reply while it is still being generated
//!
//! This library provides the streaming generation-to-speech pipeline:
//! - Decoding of the chunked chat completion stream into text deltas
//! - Sentence segmentation as soon as sentences are complete
//! - Ordered, one-at-a-time speech synthesis
//! - Gapless playback with start-of-speech callbacks
//! - Push-to-talk recording and transcription of spoken input
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Orchestrator                      │
//! │        Transcript  │  Turn events  │  Cancel        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   StreamDecoder ─► SentenceSegmenter ─► Synthesis   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │          PlaybackWorker ─► PlaybackBuffer            │
//! │                  PlaybackEngine (speaker)            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod playback;
pub mod speech;

pub use config::Config;
pub use connection::{Connection, ConnectionProvider, EnvConnectionProvider, StaticConnectionProvider};
pub use error::{Error, Result};
pub use pipeline::{Orchestrator, Transcript, TurnEvent, TurnSummary};
pub use playback::{PlaybackHandle, PlaybackWorker, SpeakerFactory};
pub use speech::{SentenceSegmenter, SynthesisQueue};
