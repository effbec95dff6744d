//! Single-timeline driver for the playback buffer
//!
//! Caller operations and engine notifications are merged into one task, so
//! the buffer never sees two mutations at once.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::buffer::{PlaybackBuffer, PlaybackItem, PlaybackStatus};
use super::engine::{EngineFactory, TaggedEvent};

/// Operation requested by a [`PlaybackHandle`]
#[derive(Debug)]
enum PlaybackCommand {
    Start,
    Append(PlaybackItem),
    Pause,
    Resume,
    Stop,
    SetRate(f32),
    Status(oneshot::Sender<PlaybackStatus>),
}

/// Cloneable handle to a running [`PlaybackWorker`]
///
/// Operations are queued in call order and applied by the worker. They are
/// silently dropped once the worker has exited.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
}

impl PlaybackHandle {
    pub fn start(&self) {
        self.send(PlaybackCommand::Start);
    }

    pub fn append(&self, audio: Bytes, on_start: impl FnOnce() + Send + 'static) {
        self.send(PlaybackCommand::Append(PlaybackItem::new(audio, on_start)));
    }

    pub fn pause(&self) {
        self.send(PlaybackCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(PlaybackCommand::Resume);
    }

    pub fn stop(&self) {
        self.send(PlaybackCommand::Stop);
    }

    pub fn set_rate(&self, rate: f32) {
        self.send(PlaybackCommand::SetRate(rate));
    }

    /// Snapshot of the buffer after every earlier operation has been applied
    ///
    /// Returns `None` if the worker has exited.
    pub async fn status(&self) -> Option<PlaybackStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(PlaybackCommand::Status(tx));
        rx.await.ok()
    }

    /// Wait until everything appended so far has been played
    ///
    /// Returns `false` if the worker exited or playback was stopped first.
    pub async fn wait_drained(&self, poll: Duration) -> bool {
        loop {
            match self.status().await {
                Some(status) if !status.started => return false,
                Some(status) if status.is_drained() => return true,
                Some(_) => tokio::time::sleep(poll).await,
                None => return false,
            }
        }
    }

    fn send(&self, command: PlaybackCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("playback worker gone, command dropped");
        }
    }
}

/// Owns a [`PlaybackBuffer`] and applies everything to it in order
pub struct PlaybackWorker {
    buffer: PlaybackBuffer,
    commands: mpsc::UnboundedReceiver<PlaybackCommand>,
    events: mpsc::UnboundedReceiver<TaggedEvent>,
}

impl PlaybackWorker {
    /// Create a worker around a stopped buffer
    #[must_use]
    pub fn new(factory: impl EngineFactory + 'static, rate: f32) -> (Self, PlaybackHandle) {
        let (cmd_tx, commands) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let buffer = PlaybackBuffer::new(Box::new(factory), event_tx, rate);

        (
            Self {
                buffer,
                commands,
                events,
            },
            PlaybackHandle { tx: cmd_tx },
        )
    }

    /// Spawn the worker onto the current runtime
    #[must_use]
    pub fn spawn(factory: impl EngineFactory + 'static, rate: f32) -> (PlaybackHandle, JoinHandle<()>) {
        let (worker, handle) = Self::new(factory, rate);
        (handle, tokio::spawn(worker.run()))
    }

    /// Process operations until every handle has been dropped
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(event) = self.events.recv() => self.buffer.handle(event),
            }
        }
        self.buffer.stop();
        tracing::debug!("playback worker exited");
    }

    fn apply(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Start => {
                if let Err(e) = self.buffer.start() {
                    tracing::error!(error = %e, "failed to start playback engine");
                }
            }
            PlaybackCommand::Append(item) => self.buffer.append(item),
            PlaybackCommand::Pause => {
                self.buffer.pause();
            }
            PlaybackCommand::Resume => self.buffer.resume(),
            PlaybackCommand::Stop => self.buffer.stop(),
            PlaybackCommand::SetRate(rate) => self.buffer.set_rate(rate),
            PlaybackCommand::Status(reply) => {
                let _ = reply.send(self.buffer.status());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::Result;
    use crate::playback::{EngineNotifier, PlaybackEngine};

    /// Completes every append at once and reports it as played
    struct EchoEngine {
        notifier: EngineNotifier,
        appended: Arc<Mutex<Vec<Bytes>>>,
        buffered: f64,
    }

    impl PlaybackEngine for EchoEngine {
        fn append_buffer(&mut self, audio: Bytes) -> Result<()> {
            self.appended.lock().unwrap().push(audio);
            self.buffered += 0.5;
            self.notifier.append_complete();
            self.notifier.clock_tick(self.buffered);
            Ok(())
        }

        fn buffered_duration(&self) -> f64 {
            self.buffered
        }

        fn pause(&mut self) {}

        fn resume(&mut self) {}

        fn is_paused(&self) -> bool {
            false
        }

        fn set_rate(&mut self, _rate: f32) {}

        fn stop(&mut self) {}
    }

    fn spawn_echo() -> (PlaybackHandle, JoinHandle<()>, Arc<Mutex<Vec<Bytes>>>) {
        let appended = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&appended);
        let factory = move |notifier: EngineNotifier| -> Result<Box<dyn PlaybackEngine>> {
            Ok(Box::new(EchoEngine {
                notifier,
                appended: Arc::clone(&sink),
                buffered: 0.0,
            }))
        };
        let (handle, join) = PlaybackWorker::spawn(factory, 1.0);
        (handle, join, appended)
    }

    #[tokio::test]
    async fn appends_play_in_order_and_fire_callbacks() {
        let (handle, join, appended) = spawn_echo();
        let fired = Arc::new(Mutex::new(Vec::new()));

        handle.start();
        for name in ["a", "b", "c"] {
            let fired = Arc::clone(&fired);
            handle.append(Bytes::from_static(name.as_bytes()), move || {
                fired.lock().unwrap().push(name);
            });
        }

        assert!(handle.wait_drained(Duration::from_millis(1)).await);
        assert_eq!(*fired.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            *appended.lock().unwrap(),
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );

        drop(handle);
        tokio_test::assert_ok!(join.await);
    }

    #[tokio::test]
    async fn appends_before_start_are_ignored() {
        let (handle, _join, appended) = spawn_echo();

        handle.append(Bytes::from_static(b"early"), || {});
        let status = handle.status().await.unwrap();

        assert!(!status.started);
        assert!(appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_drained_gives_up_after_stop() {
        let (handle, _join, _appended) = spawn_echo();

        handle.start();
        handle.stop();

        assert!(!handle.wait_drained(Duration::from_millis(1)).await);
    }
}
