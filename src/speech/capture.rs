//! Push-to-talk audio capture from the default input device

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};

use crate::playback::{resample, wait_for_device};
use crate::{Error, Result};

/// Sample rate of recordings handed to speech recognition
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// A running microphone recording
///
/// The cpal input stream lives on its own thread, like the output stream.
/// Samples are downmixed to mono as they arrive.
pub struct AudioCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    device_rate: u32,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
}

impl AudioCapture {
    /// Start recording from the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device or f32 input config is available
    pub fn start() -> Result<Self> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<u32>>(1);
        let stream_buffer = Arc::clone(&buffer);

        std::thread::Builder::new()
            .name("voicebar-capture".to_string())
            .spawn(move || {
                let (stream, rate) = match build_input_stream(stream_buffer) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(rate));
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let device_rate = wait_for_device(&ready_rx)?;
        tracing::debug!(device_rate, "audio capture started");

        Ok(Self {
            buffer,
            device_rate,
            stop_tx: Some(stop_tx),
        })
    }

    /// Stop recording and return mono samples at [`CAPTURE_SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn finish(mut self) -> Result<Vec<f32>> {
        self.halt();
        let samples = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::debug!(samples = samples.len(), "recording finished");
        resample(&samples, self.device_rate, CAPTURE_SAMPLE_RATE)
    }

    fn halt(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Open the default input device and start a stream that fills `buffer`
///
/// Prefers a mono config at [`CAPTURE_SAMPLE_RATE`]; otherwise takes any f32
/// config at its highest rate and leaves resampling to [`AudioCapture::finish`].
fn build_input_stream(buffer: Arc<Mutex<Vec<f32>>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let config = supported
        .iter()
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
        })
        .map(|c| c.clone().with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE)))
        .or_else(|| supported.first().cloned().map(|c| c.with_max_sample_rate()))
        .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?
        .config();

    let channels = usize::from(config.channels);
    let rate = config.sample_rate.0;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = rate,
        channels,
        "audio input opened"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                downmix_into(&mut buffer, data, channels);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, rate))
}

/// Average interleaved frames into mono samples
#[allow(clippy::cast_precision_loss)]
fn downmix_into(out: &mut Vec<f32>, data: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }
    out.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

/// Encode mono f32 samples as 16-bit PCM WAV
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
