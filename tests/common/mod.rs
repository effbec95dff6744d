//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use secrecy::SecretString;
use voicebar::connection::{Connection, ConnectionProvider, StaticConnectionProvider};
use voicebar::llm::{ByteStream, ChatMessage, ChatTransport};
use voicebar::playback::{EngineNotifier, PlaybackEngine};
use voicebar::speech::{SynthesisRequest, Synthesizer};
use voicebar::{Error, Result};

/// Connection with every field filled in
#[must_use]
pub fn test_connection() -> Connection {
    Connection {
        aoai_endpoint: "https://test.openai.azure.com".to_string(),
        aoai_deployment_name: "gpt-test".to_string(),
        aoai_key: SecretString::from("aoai-key".to_string()),
        speech_region: "eastus".to_string(),
        speech_key: SecretString::from("speech-key".to_string()),
    }
}

#[must_use]
pub fn connections() -> Arc<dyn ConnectionProvider> {
    Arc::new(StaticConnectionProvider::new(Some(test_connection())))
}

/// One `data:` line carrying a content delta
#[must_use]
pub fn delta_line(content: &str) -> String {
    let event = serde_json::json!({
        "choices": [{ "delta": { "content": content }, "finish_reason": null, "index": 0 }]
    });
    format!("data: {event}\n\n")
}

/// Streaming body for `deltas`, ending with a `stop` event and `[DONE]`
#[must_use]
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body: String = deltas.iter().map(|d| delta_line(d)).collect();
    body.push_str(
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\",\"index\":0}]}\n\n",
    );
    body.push_str("data: [DONE]\n\n");
    body
}

/// Split `body` into chunks of `size` bytes, ignoring line and UTF-8 boundaries
#[must_use]
pub fn chunked(body: &str, size: usize) -> Vec<Bytes> {
    body.as_bytes()
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Chat transport that replays fixed chunks
pub struct ScriptedChat {
    chunks: Vec<Bytes>,
    /// Never end the stream after the last chunk
    hang: bool,
    pub opened: AtomicUsize,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    #[must_use]
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks,
            hang: false,
            opened: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Stream that stays open after its chunks, like a stalled connection
    #[must_use]
    pub fn hanging(chunks: Vec<Bytes>) -> Self {
        Self {
            hang: true,
            ..Self::new(chunks)
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for ScriptedChat {
    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());

        let chunks = futures::stream::iter(self.chunks.clone().into_iter().map(Ok));
        if self.hang {
            Ok(chunks.chain(futures::stream::pending()).boxed())
        } else {
            Ok(chunks.boxed())
        }
    }
}

/// Synthesizer that returns the sentence text as its audio
#[derive(Default)]
pub struct ScriptedSynth {
    pub calls: Mutex<Vec<String>>,
    fail_on: Option<String>,
    delay: Duration,
}

impl ScriptedSynth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a network error when asked to speak `text`
    #[must_use]
    pub fn failing_on(text: &str) -> Self {
        Self {
            fail_on: Some(text.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes> {
        self.calls.lock().unwrap().push(request.text.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on.as_deref() == Some(request.text.as_str()) {
            return Err(Error::Network("Request failed: 429 Too Many Requests".to_string()));
        }
        Ok(Bytes::from(request.text.clone()))
    }
}

/// Everything the fake engines saw
#[derive(Debug, Default)]
pub struct EngineLog {
    pub created: usize,
    pub appended: Vec<String>,
    pub pauses: usize,
    pub stops: usize,
}

/// Engine that accepts every append at once and plays it instantly
///
/// Each append counts as one second of audio.
pub struct InstantEngine {
    notifier: EngineNotifier,
    log: Arc<Mutex<EngineLog>>,
    buffered: f64,
    paused: bool,
}

impl PlaybackEngine for InstantEngine {
    fn append_buffer(&mut self, audio: Bytes) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .appended
            .push(String::from_utf8_lossy(&audio).into_owned());
        self.buffered += 1.0;
        self.notifier.append_complete();
        self.notifier.clock_tick(self.buffered);
        Ok(())
    }

    fn buffered_duration(&self) -> f64 {
        self.buffered
    }

    fn pause(&mut self) {
        self.paused = true;
        self.log.lock().unwrap().pauses += 1;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_rate(&mut self, _rate: f32) {}

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }
}

/// Factory for [`InstantEngine`]s sharing one log
pub fn instant_engines(
    log: Arc<Mutex<EngineLog>>,
) -> impl FnMut(EngineNotifier) -> Result<Box<dyn PlaybackEngine>> + Send + 'static {
    move |notifier| {
        log.lock().unwrap().created += 1;
        Ok(Box::new(InstantEngine {
            notifier,
            log: Arc::clone(&log),
            buffered: 0.0,
            paused: false,
        }) as Box<dyn PlaybackEngine>)
    }
}
