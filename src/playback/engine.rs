//! Contract for the underlying append-only playback engine

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// Asynchronous notification from an engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The outstanding append has been accepted into the buffer
    AppendComplete,
    /// The outstanding append was rejected after it started
    AppendFailed(String),
    /// Elapsed playback time, in seconds of media
    ClockTick(f64),
}

/// Notification tagged with the engine generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: EngineEvent,
}

/// Sending side handed to each engine when it is attached
///
/// Every engine gets its own generation number so that late notifications
/// from a replaced engine can be told apart and ignored.
#[derive(Debug, Clone)]
pub struct EngineNotifier {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EngineNotifier {
    #[must_use]
    pub const fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn append_complete(&self) {
        self.send(EngineEvent::AppendComplete);
    }

    pub fn append_failed(&self, reason: impl Into<String>) {
        self.send(EngineEvent::AppendFailed(reason.into()));
    }

    pub fn clock_tick(&self, elapsed_secs: f64) {
        self.send(EngineEvent::ClockTick(elapsed_secs));
    }

    fn send(&self, event: EngineEvent) {
        // a closed channel means the buffer is gone; nothing left to tell
        let _ = self.tx.send(TaggedEvent {
            generation: self.generation,
            event,
        });
    }
}

/// Single-writer, append-only audio sink
///
/// Accepts one append at a time. Completion of an append and the progress
/// of the playback clock are reported through the [`EngineNotifier`] the
/// engine was created with.
pub trait PlaybackEngine: Send {
    /// Begin appending encoded audio
    ///
    /// # Errors
    ///
    /// Returns `Error::PlaybackEngine` if the engine rejects the append outright
    fn append_buffer(&mut self, audio: Bytes) -> Result<()>;

    /// Seconds of audio appended so far
    fn buffered_duration(&self) -> f64;

    fn pause(&mut self);

    fn resume(&mut self);

    fn is_paused(&self) -> bool;

    fn set_rate(&mut self, rate: f32);

    /// Signal end-of-stream and release the output
    fn stop(&mut self);
}

/// Creates a fresh engine each time the buffer is started
pub trait EngineFactory: Send {
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    fn create(&mut self, notifier: EngineNotifier) -> Result<Box<dyn PlaybackEngine>>;
}

impl<F> EngineFactory for F
where
    F: FnMut(EngineNotifier) -> Result<Box<dyn PlaybackEngine>> + Send,
{
    fn create(&mut self, notifier: EngineNotifier) -> Result<Box<dyn PlaybackEngine>> {
        self(notifier)
    }
}
