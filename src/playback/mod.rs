//! Audio playback
//!
//! Synthesized audio is appended to a single-writer engine through a
//! [`PlaybackBuffer`], driven by one [`PlaybackWorker`] task.

mod buffer;
mod decode;
mod engine;
mod speaker;
mod worker;

pub use buffer::{OnStart, PlaybackBuffer, PlaybackItem, PlaybackStatus};
pub use decode::{decode_mp3, resample};
pub use engine::{EngineEvent, EngineFactory, EngineNotifier, PlaybackEngine, TaggedEvent};
pub use speaker::{PLAYBACK_SAMPLE_RATE, SpeakerEngine, SpeakerFactory};
pub(crate) use speaker::wait_for_device;
pub use worker::{PlaybackHandle, PlaybackWorker};
