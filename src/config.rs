//! Configuration management for voicebar
//!
//! Settings come from an optional TOML file, then environment overrides.
//! Credentials are deliberately absent here; they are resolved per call
//! through a [`ConnectionProvider`](crate::connection::ConnectionProvider).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default Azure `OpenAI` API version for chat completions
pub const DEFAULT_API_VERSION: &str = "2024-10-01-preview";

/// Default neural voice for speech synthesis
pub const DEFAULT_VOICE: &str = "en-US-AndrewMultilingualNeural";

/// Default prosody rate for speech synthesis
pub const DEFAULT_SPEECH_RATE: &str = "1.2";

/// Default synthesis output format (incrementally appendable MP3)
pub const DEFAULT_OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

/// voicebar configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat completion settings
    pub llm: LlmConfig,

    /// Speech synthesis settings
    pub speech: SpeechConfig,

    /// Local playback settings
    pub playback: PlaybackConfig,
}

/// Chat completion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API version query parameter
    pub api_version: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Optional system prompt prepended to every request
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            temperature: 0.25,
            system_prompt: None,
        }
    }
}

/// Speech synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Voice name
    pub voice: String,

    /// Prosody rate, passed through to SSML verbatim
    pub rate: String,

    /// `X-Microsoft-OutputFormat` header value
    pub output_format: String,

    /// SSML `xml:lang`, also the locale for speech recognition
    pub language: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            rate: DEFAULT_SPEECH_RATE.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            language: "en-US".to_string(),
        }
    }
}

/// Local playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Playback speed multiplier
    pub rate: f32,

    /// Period of the playback clock in milliseconds
    pub clock_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            clock_interval_ms: 250,
        }
    }
}

/// Default location of the config file
///
/// Uses `~/.config/voicebar/config.toml` on Linux
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "omni", "voicebar")
        .map(|d| d.config_dir().join("config.toml"))
}

impl Config {
    /// Load configuration from the default path, then the environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be parsed
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path().as_deref())
    }

    /// Load configuration from an explicit file, then the environment
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                let config = Self::from_toml(&content)?;
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Some(path) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `VOICEBAR_*` environment overrides
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("VOICEBAR_API_VERSION") {
            self.llm.api_version = v;
        }
        if let Some(t) = std::env::var("VOICEBAR_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.llm.temperature = t;
        }
        if let Ok(v) = std::env::var("VOICEBAR_SYSTEM_PROMPT") {
            self.llm.system_prompt = Some(v);
        }
        if let Ok(v) = std::env::var("VOICEBAR_VOICE") {
            self.speech.voice = v;
        }
        if let Ok(v) = std::env::var("VOICEBAR_SPEECH_RATE") {
            self.speech.rate = v;
        }
        if let Some(r) = std::env::var("VOICEBAR_PLAYBACK_RATE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.playback.rate = r;
        }
    }

    /// Reject settings that would break the pipeline at runtime
    ///
    /// # Errors
    ///
    /// Returns error for a non-positive playback rate or clock interval
    pub fn validate(&self) -> Result<()> {
        if self.playback.rate <= 0.0 {
            return Err(Error::Config(format!(
                "playback rate must be positive, got {}",
                self.playback.rate
            )));
        }
        if self.playback.clock_interval_ms == 0 {
            return Err(Error::Config(
                "playback clock interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
