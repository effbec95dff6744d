//! Playback engine on the default output device
//!
//! Appended MP3 data is decoded off the async runtime and queued as samples
//! for a cpal output stream. The stream lives on its own thread because
//! cpal streams cannot move between threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::runtime::RuntimeFlavor;

use super::decode::decode_mp3;
use super::engine::{EngineFactory, EngineNotifier, PlaybackEngine};
use crate::{Error, Result};

/// Sample rate for playback (matches the default synthesis output format)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples waiting for the output callback
#[derive(Default)]
struct SampleQueue {
    samples: VecDeque<f32>,
    /// Fractional read position into the front sample
    cursor: f64,
    /// Source frames played so far
    consumed: u64,
    paused: bool,
    rate: f64,
}

impl SampleQueue {
    /// Produce the next output sample, advancing by the playback rate
    fn next_sample(&mut self) -> f32 {
        if self.paused {
            return 0.0;
        }
        let Some(&sample) = self.samples.front() else {
            return 0.0;
        };
        self.cursor += self.rate;
        while self.cursor >= 1.0 && self.samples.pop_front().is_some() {
            self.cursor -= 1.0;
            self.consumed += 1;
        }
        sample
    }
}

fn lock(queue: &Mutex<SampleQueue>) -> std::sync::MutexGuard<'_, SampleQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Speaker output with an asynchronous MP3 append path
pub struct SpeakerEngine {
    queue: Arc<Mutex<SampleQueue>>,
    notifier: EngineNotifier,
    appending: Arc<AtomicBool>,
    appended_frames: Arc<AtomicU64>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    clock: Option<tokio::task::JoinHandle<()>>,
}

impl SpeakerEngine {
    /// Open the default output device and start the playback clock
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device can be opened
    pub fn open(notifier: EngineNotifier, clock_interval: Duration) -> Result<Self> {
        let queue = Arc::new(Mutex::new(SampleQueue {
            rate: 1.0,
            ..SampleQueue::default()
        }));

        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let stream_queue = Arc::clone(&queue);

        std::thread::Builder::new()
            .name("voicebar-audio".to_string())
            .spawn(move || {
                let stream = match build_stream(stream_queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // park until stop() or the engine is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio output released");
            })?;

        wait_for_device(&ready_rx)?;

        let clock_queue = Arc::clone(&queue);
        let clock_notifier = notifier.clone();
        let clock = tokio::spawn(async move {
            let mut interval = tokio::time::interval(clock_interval);
            loop {
                interval.tick().await;
                let consumed = lock(&clock_queue).consumed;
                #[allow(clippy::cast_precision_loss)]
                let elapsed = consumed as f64 / f64::from(PLAYBACK_SAMPLE_RATE);
                clock_notifier.clock_tick(elapsed);
            }
        });

        Ok(Self {
            queue,
            notifier,
            appending: Arc::new(AtomicBool::new(false)),
            appended_frames: Arc::new(AtomicU64::new(0)),
            stop_tx: Some(stop_tx),
            clock: Some(clock),
        })
    }
}

/// Wait for an audio thread to report whether its device opened
///
/// Opening a device takes a few milliseconds of blocking work. On a
/// multi-threaded runtime the wait goes through `block_in_place` so other
/// tasks keep running; on a current-thread runtime it blocks the caller.
pub(crate) fn wait_for_device<T>(ready: &std::sync::mpsc::Receiver<Result<T>>) -> Result<T> {
    let recv = || match ready.recv() {
        Ok(opened) => opened,
        Err(_) => Err(Error::Audio("audio thread exited during setup".to_string())),
    };
    match tokio::runtime::Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(recv),
        _ => recv(),
    }
}

/// Build and start an f32 output stream fed from `queue`
fn build_stream(queue: Arc<Mutex<SampleQueue>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels,
        "audio output opened"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = lock(&queue);
                for frame in data.chunks_mut(channels) {
                    let sample = queue.next_sample();
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

impl PlaybackEngine for SpeakerEngine {
    fn append_buffer(&mut self, audio: Bytes) -> Result<()> {
        if self.stop_tx.is_none() {
            return Err(Error::PlaybackEngine("engine already stopped".to_string()));
        }
        if self.appending.swap(true, Ordering::SeqCst) {
            return Err(Error::PlaybackEngine(
                "append already in progress".to_string(),
            ));
        }

        let queue = Arc::clone(&self.queue);
        let appending = Arc::clone(&self.appending);
        let appended = Arc::clone(&self.appended_frames);
        let notifier = self.notifier.clone();

        tokio::task::spawn_blocking(move || {
            match decode_mp3(&audio, PLAYBACK_SAMPLE_RATE) {
                Ok(samples) => {
                    let frames = samples.len() as u64;
                    lock(&queue).samples.extend(samples);
                    appended.fetch_add(frames, Ordering::SeqCst);
                    appending.store(false, Ordering::SeqCst);
                    notifier.append_complete();
                }
                Err(e) => {
                    appending.store(false, Ordering::SeqCst);
                    notifier.append_failed(e.to_string());
                }
            }
        });
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn buffered_duration(&self) -> f64 {
        self.appended_frames.load(Ordering::SeqCst) as f64 / f64::from(PLAYBACK_SAMPLE_RATE)
    }

    fn pause(&mut self) {
        lock(&self.queue).paused = true;
    }

    fn resume(&mut self) {
        lock(&self.queue).paused = false;
    }

    fn is_paused(&self) -> bool {
        lock(&self.queue).paused
    }

    fn set_rate(&mut self, rate: f32) {
        lock(&self.queue).rate = f64::from(rate.clamp(0.25, 4.0));
    }

    fn stop(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.abort();
        }
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        lock(&self.queue).samples.clear();
    }
}

impl Drop for SpeakerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens a [`SpeakerEngine`] for every playback start
#[derive(Debug, Clone, Copy)]
pub struct SpeakerFactory {
    clock_interval: Duration,
}

impl SpeakerFactory {
    #[must_use]
    pub const fn new(clock_interval: Duration) -> Self {
        Self { clock_interval }
    }
}

impl EngineFactory for SpeakerFactory {
    fn create(&mut self, notifier: EngineNotifier) -> Result<Box<dyn PlaybackEngine>> {
        Ok(Box::new(SpeakerEngine::open(notifier, self.clock_interval)?))
    }
}
