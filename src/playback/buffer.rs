//! Gapless playback over a single-writer engine
//!
//! The engine takes one append at a time and reports completion later, so
//! the buffer keeps a `busy` flag and a FIFO of items that arrived while an
//! append was outstanding. Every appended item is stamped with the engine's
//! buffered duration at append time; its start callback fires once the
//! playback clock reaches that stamp.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::engine::{EngineEvent, EngineFactory, EngineNotifier, PlaybackEngine, TaggedEvent};
use crate::Result;

/// Called once when an item's audio starts playing
pub type OnStart = Box<dyn FnOnce() + Send + 'static>;

/// Audio waiting to be appended
pub struct PlaybackItem {
    pub audio: Bytes,
    pub on_start: OnStart,
}

impl PlaybackItem {
    #[must_use]
    pub fn new(audio: Bytes, on_start: impl FnOnce() + Send + 'static) -> Self {
        Self {
            audio,
            on_start: Box::new(on_start),
        }
    }

    /// Item whose start nobody needs to observe
    #[must_use]
    pub fn silent(audio: Bytes) -> Self {
        Self::new(audio, || {})
    }
}

impl std::fmt::Debug for PlaybackItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackItem")
            .field("bytes", &self.audio.len())
            .finish_non_exhaustive()
    }
}

struct ScheduledCallback {
    seq: u64,
    timestamp: f64,
    callback: OnStart,
}

/// Point-in-time view of the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackStatus {
    pub started: bool,
    pub busy: bool,
    pub paused: bool,
    pub queued: usize,
    pub pending_callbacks: usize,
    /// Seconds of audio handed to the engine
    pub buffered: f64,
    /// Last playback clock reading
    pub elapsed: f64,
}

impl PlaybackStatus {
    /// Nothing queued, nothing in flight, and the clock has caught up
    #[must_use]
    pub fn is_drained(&self) -> bool {
        !self.busy
            && self.queued == 0
            && self.pending_callbacks == 0
            && self.elapsed + 0.05 >= self.buffered
    }
}

/// Per-engine state, rebuilt by every `start()`
struct Attached {
    engine: Box<dyn PlaybackEngine>,
    generation: u64,
    busy: bool,
    in_flight: Option<u64>,
    pending_queue: VecDeque<PlaybackItem>,
    pending_callbacks: VecDeque<ScheduledCallback>,
    last_timestamp: f64,
    elapsed: f64,
}

/// Playback buffer state machine
///
/// Not thread-safe on purpose: exactly one owner drives it, feeding caller
/// operations and engine notifications in a single sequence (see
/// [`PlaybackWorker`](super::PlaybackWorker)).
pub struct PlaybackBuffer {
    factory: Box<dyn EngineFactory>,
    events: mpsc::UnboundedSender<TaggedEvent>,
    generation: u64,
    next_seq: u64,
    rate: f32,
    attached: Option<Attached>,
}

impl PlaybackBuffer {
    /// Create a stopped buffer; engine notifications go to `events`
    #[must_use]
    pub fn new(
        factory: Box<dyn EngineFactory>,
        events: mpsc::UnboundedSender<TaggedEvent>,
        rate: f32,
    ) -> Self {
        Self {
            factory,
            events,
            generation: 0,
            next_seq: 0,
            rate,
            attached: None,
        }
    }

    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.attached.is_some()
    }

    /// (Re)initialize all state on a fresh engine
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be created; the buffer stays stopped
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        self.generation += 1;
        let notifier = EngineNotifier::new(self.generation, self.events.clone());
        let mut engine = self.factory.create(notifier)?;
        engine.set_rate(self.rate);

        tracing::debug!(generation = self.generation, "playback started");
        self.attached = Some(Attached {
            engine,
            generation: self.generation,
            busy: false,
            in_flight: None,
            pending_queue: VecDeque::new(),
            pending_callbacks: VecDeque::new(),
            last_timestamp: 0.0,
            elapsed: 0.0,
        });
        Ok(())
    }

    /// Append now if the engine is free, otherwise queue behind earlier items
    pub fn append(&mut self, item: PlaybackItem) {
        let Some(state) = self.attached.as_mut() else {
            tracing::debug!("append ignored, playback not started");
            return;
        };
        if state.busy {
            state.pending_queue.push_back(item);
            return;
        }
        self.dispatch(item);
    }

    /// Route a notification to its handler, ignoring stale engines
    pub fn handle(&mut self, tagged: TaggedEvent) {
        let current = self.attached.as_ref().map(|s| s.generation);
        if current != Some(tagged.generation) {
            tracing::trace!(generation = tagged.generation, "ignoring event from old engine");
            return;
        }
        match tagged.event {
            EngineEvent::AppendComplete => self.on_append_complete(),
            EngineEvent::AppendFailed(reason) => self.on_append_failed(&reason),
            EngineEvent::ClockTick(elapsed) => self.on_clock_tick(elapsed),
        }
    }

    /// The outstanding append finished; start the next queued item
    pub fn on_append_complete(&mut self) {
        let Some(state) = self.attached.as_mut() else {
            return;
        };
        state.busy = false;
        state.in_flight = None;
        self.pump();
    }

    /// The outstanding append was rejected; its item is lost
    pub fn on_append_failed(&mut self, reason: &str) {
        let Some(state) = self.attached.as_mut() else {
            return;
        };
        tracing::warn!(reason, "playback engine rejected audio, item dropped");
        if let Some(seq) = state.in_flight.take() {
            state.pending_callbacks.retain(|cb| cb.seq != seq);
        }
        state.busy = false;
        self.pump();
    }

    /// Fire every start callback whose timestamp has been reached
    pub fn on_clock_tick(&mut self, elapsed: f64) {
        let Some(state) = self.attached.as_mut() else {
            return;
        };
        state.elapsed = elapsed;
        while state
            .pending_callbacks
            .front()
            .is_some_and(|cb| cb.timestamp <= elapsed)
        {
            if let Some(cb) = state.pending_callbacks.pop_front() {
                tracing::trace!(timestamp = cb.timestamp, elapsed, "item started");
                (cb.callback)();
            }
        }
    }

    /// Drop every queued item and pause the engine
    ///
    /// Audio already handed to the engine, including an append still in
    /// flight, is kept. Returns how many queued items were dropped.
    pub fn pause(&mut self) -> usize {
        let Some(state) = self.attached.as_mut() else {
            return 0;
        };
        let dropped = state.pending_queue.len();
        state.pending_queue.clear();
        state.engine.pause();
        if dropped > 0 {
            tracing::debug!(dropped, "queued audio discarded on pause");
        }
        dropped
    }

    pub fn resume(&mut self) {
        if let Some(state) = self.attached.as_mut()
            && state.engine.is_paused()
        {
            state.engine.resume();
        }
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
        if let Some(state) = self.attached.as_mut() {
            state.engine.set_rate(rate);
        }
    }

    /// End the stream and release the engine
    ///
    /// Everything after this is a no-op until the next `start()`.
    pub fn stop(&mut self) {
        if let Some(mut state) = self.attached.take() {
            state.engine.stop();
            tracing::debug!(
                generation = state.generation,
                queued = state.pending_queue.len(),
                unfired = state.pending_callbacks.len(),
                "playback stopped"
            );
        }
    }

    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        self.attached
            .as_ref()
            .map_or_else(PlaybackStatus::default, |state| PlaybackStatus {
                started: true,
                busy: state.busy,
                paused: state.engine.is_paused(),
                queued: state.pending_queue.len(),
                pending_callbacks: state.pending_callbacks.len(),
                buffered: state.engine.buffered_duration(),
                elapsed: state.elapsed,
            })
    }

    /// Append queued items until one is accepted or the queue is empty
    fn pump(&mut self) {
        while let Some(state) = self.attached.as_mut() {
            if state.busy {
                return;
            }
            let Some(item) = state.pending_queue.pop_front() else {
                return;
            };
            self.dispatch(item);
        }
    }

    /// Stamp and hand one item to an idle engine
    fn dispatch(&mut self, item: PlaybackItem) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let Some(state) = self.attached.as_mut() else {
            return;
        };

        let timestamp = state.engine.buffered_duration().max(state.last_timestamp);
        state.busy = true;

        match state.engine.append_buffer(item.audio) {
            Ok(()) => {
                state.last_timestamp = timestamp;
                state.in_flight = Some(seq);
                state.pending_callbacks.push_back(ScheduledCallback {
                    seq,
                    timestamp,
                    callback: item.on_start,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "append rejected, item dropped");
                state.busy = false;
                self.pump();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::Error;

    /// Engine driven by hand: appends stay outstanding until the test completes them
    #[derive(Default)]
    struct Log {
        appended: Vec<Bytes>,
        outstanding: Option<usize>,
        overlaps: usize,
        buffered: f64,
        paused: bool,
        stopped: bool,
        reject_next: bool,
    }

    struct ManualEngine {
        log: Arc<Mutex<Log>>,
    }

    impl PlaybackEngine for ManualEngine {
        fn append_buffer(&mut self, audio: Bytes) -> Result<()> {
            let mut log = self.log.lock().unwrap();
            if std::mem::take(&mut log.reject_next) {
                return Err(Error::PlaybackEngine("quota exceeded".to_string()));
            }
            if log.outstanding.is_some() {
                log.overlaps += 1;
            }
            log.outstanding = Some(audio.len());
            log.appended.push(audio);
            Ok(())
        }

        fn buffered_duration(&self) -> f64 {
            self.log.lock().unwrap().buffered
        }

        fn pause(&mut self) {
            self.log.lock().unwrap().paused = true;
        }

        fn resume(&mut self) {
            self.log.lock().unwrap().paused = false;
        }

        fn is_paused(&self) -> bool {
            self.log.lock().unwrap().paused
        }

        fn set_rate(&mut self, _rate: f32) {}

        fn stop(&mut self) {
            self.log.lock().unwrap().stopped = true;
        }
    }

    /// One second of audio per byte
    #[allow(clippy::cast_precision_loss)]
    fn complete(buffer: &mut PlaybackBuffer, log: &Arc<Mutex<Log>>) {
        {
            let mut log = log.lock().unwrap();
            let len = log.outstanding.take().expect("no outstanding append");
            log.buffered += len as f64;
        }
        buffer.on_append_complete();
    }

    fn started_buffer() -> (PlaybackBuffer, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let engine_log = Arc::clone(&log);
        let factory = move |_notifier: EngineNotifier| -> Result<Box<dyn PlaybackEngine>> {
            Ok(Box::new(ManualEngine {
                log: Arc::clone(&engine_log),
            }))
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut buffer = PlaybackBuffer::new(Box::new(factory), tx, 1.0);
        buffer.start().unwrap();
        (buffer, log)
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> OnStart) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let make = move |name: &'static str| -> OnStart {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(name))
        };
        (fired, make)
    }

    #[test]
    fn second_append_waits_for_completion() {
        let (mut buffer, log) = started_buffer();
        let (_, cb) = recorder();

        buffer.append(PlaybackItem { audio: Bytes::from_static(b"aa"), on_start: cb("a") });
        buffer.append(PlaybackItem { audio: Bytes::from_static(b"bbb"), on_start: cb("b") });

        assert_eq!(log.lock().unwrap().appended.len(), 1);
        assert_eq!(buffer.status().queued, 1);

        complete(&mut buffer, &log);
        assert_eq!(log.lock().unwrap().appended.len(), 2);
        assert_eq!(log.lock().unwrap().appended[1], Bytes::from_static(b"bbb"));

        complete(&mut buffer, &log);
        assert_eq!(log.lock().unwrap().overlaps, 0);
        assert!(!buffer.status().busy);
    }

    #[test]
    fn timestamps_follow_buffered_duration() {
        let (mut buffer, log) = started_buffer();
        let (fired, cb) = recorder();

        buffer.append(PlaybackItem { audio: Bytes::from_static(b"aa"), on_start: cb("a") });
        buffer.append(PlaybackItem { audio: Bytes::from_static(b"bbb"), on_start: cb("b") });
        buffer.append(PlaybackItem { audio: Bytes::from_static(b"c"), on_start: cb("c") });
        complete(&mut buffer, &log);
        complete(&mut buffer, &log);
        complete(&mut buffer, &log);

        // a@0, b@2, c@5
        buffer.on_clock_tick(0.0);
        assert_eq!(*fired.lock().unwrap(), vec!["a"]);
        buffer.on_clock_tick(1.9);
        assert_eq!(*fired.lock().unwrap(), vec!["a"]);
        buffer.on_clock_tick(2.0);
        assert_eq!(*fired.lock().unwrap(), vec!["a", "b"]);
        buffer.on_clock_tick(10.0);
        buffer.on_clock_tick(11.0);
        assert_eq!(*fired.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(buffer.status().pending_callbacks, 0);
    }

    #[test]
    fn late_tick_fires_all_due_callbacks_in_order() {
        let (mut buffer, log) = started_buffer();
        let (fired, cb) = recorder();

        for (name, audio) in [("a", &b"x"[..]), ("b", &b"yy"[..]), ("c", &b"z"[..])] {
            buffer.append(PlaybackItem { audio: Bytes::copy_from_slice(audio), on_start: cb(name) });
        }
        complete(&mut buffer, &log);
        complete(&mut buffer, &log);
        complete(&mut buffer, &log);

        buffer.on_clock_tick(3.5);
        assert_eq!(*fired.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn pause_drops_queue_but_keeps_in_flight_append() {
        let (mut buffer, log) = started_buffer();

        buffer.append(PlaybackItem::silent(Bytes::from_static(b"mid")));
        buffer.append(PlaybackItem::silent(Bytes::from_static(b"q1")));
        buffer.append(PlaybackItem::silent(Bytes::from_static(b"q2")));

        assert_eq!(buffer.pause(), 2);
        assert!(log.lock().unwrap().paused);
        assert_eq!(buffer.status().queued, 0);

        complete(&mut buffer, &log);
        assert!(!buffer.status().busy);
        assert_eq!(log.lock().unwrap().appended, vec![Bytes::from_static(b"mid")]);
    }

    #[test]
    fn resume_only_when_paused() {
        let (mut buffer, log) = started_buffer();
        buffer.resume();
        assert!(!log.lock().unwrap().paused);
        buffer.pause();
        buffer.resume();
        assert!(!log.lock().unwrap().paused);
    }

    #[test]
    fn stop_makes_everything_a_noop_until_restart() {
        let (mut buffer, log) = started_buffer();
        buffer.stop();
        assert!(log.lock().unwrap().stopped);
        assert!(!buffer.is_started());

        buffer.append(PlaybackItem::silent(Bytes::from_static(b"ignored")));
        buffer.on_clock_tick(5.0);
        assert_eq!(buffer.pause(), 0);
        assert!(log.lock().unwrap().appended.is_empty());

        buffer.start().unwrap();
        buffer.append(PlaybackItem::silent(Bytes::from_static(b"kept")));
        assert_eq!(log.lock().unwrap().appended.len(), 1);
    }

    #[test]
    fn events_from_replaced_engine_are_ignored() {
        let (mut buffer, log) = started_buffer();
        buffer.append(PlaybackItem::silent(Bytes::from_static(b"one")));
        buffer.append(PlaybackItem::silent(Bytes::from_static(b"two")));

        buffer.handle(TaggedEvent { generation: 0, event: EngineEvent::AppendComplete });
        assert!(buffer.status().busy);
        assert_eq!(log.lock().unwrap().appended.len(), 1);

        buffer.handle(TaggedEvent { generation: 1, event: EngineEvent::AppendComplete });
        assert_eq!(log.lock().unwrap().appended.len(), 2);
    }

    #[test]
    fn rejected_append_loses_item_and_moves_on() {
        let (mut buffer, log) = started_buffer();
        let (fired, cb) = recorder();

        log.lock().unwrap().reject_next = true;
        buffer.append(PlaybackItem { audio: Bytes::from_static(b"bad"), on_start: cb("bad") });
        assert!(!buffer.status().busy);

        buffer.append(PlaybackItem { audio: Bytes::from_static(b"ok"), on_start: cb("ok") });
        complete(&mut buffer, &log);
        buffer.on_clock_tick(0.0);
        assert_eq!(*fired.lock().unwrap(), vec!["ok"]);
    }

    #[test]
    fn async_append_failure_drops_its_callback() {
        let (mut buffer, log) = started_buffer();
        let (fired, cb) = recorder();

        buffer.append(PlaybackItem { audio: Bytes::from_static(b"aa"), on_start: cb("a") });
        buffer.append(PlaybackItem { audio: Bytes::from_static(b"bb"), on_start: cb("b") });
        log.lock().unwrap().outstanding = None;
        buffer.on_append_failed("decode error");

        complete(&mut buffer, &log);
        buffer.on_clock_tick(100.0);
        assert_eq!(*fired.lock().unwrap(), vec!["b"]);
    }
}
