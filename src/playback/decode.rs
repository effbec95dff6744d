//! Decoding of synthesized MP3 audio

use std::io::Cursor;

use crate::{Error, Result};

/// Decode MP3 bytes to mono f32 samples at `target_rate`
///
/// # Errors
///
/// Returns error if the data is not decodable MP3
pub fn decode_mp3(mp3_data: &[u8], target_rate: u32) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut source_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                source_rate.get_or_insert(frame.sample_rate);
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    match source_rate {
        None => Err(Error::Audio("no MP3 frames in audio".to_string())),
        Some(rate) => {
            let rate = u32::try_from(rate)
                .map_err(|_| Error::Audio(format!("invalid MP3 sample rate {rate}")))?;
            resample(&samples, rate, target_rate)
        }
    }
}

/// Input frames per resampler call
const RESAMPLE_CHUNK: usize = 1024;

/// Resample mono audio using rubato
///
/// The resampler's output delay is skipped and the final partial chunk is
/// flushed, so the result lines up with the input and has the expected length.
///
/// # Errors
///
/// Returns error if the resampler rejects the rates
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Audio(format!(
            "cannot resample from {from_rate} Hz to {to_rate} Hz"
        )));
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let delay = resampler.output_delay();
    let expected = (input.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    for chunk in input.chunks(RESAMPLE_CHUNK) {
        let wave: [&[f64]; 1] = [chunk];
        let result = if chunk.len() == RESAMPLE_CHUNK {
            resampler.process(&wave, None)
        } else {
            resampler.process_partial(Some(&wave[..]), None)
        }
        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    while output.len() < expected + delay {
        let result = resampler
            .process_partial::<&[f64]>(None, None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if result[0].is_empty() {
            break;
        }
        output.extend_from_slice(&result[0]);
    }

    Ok(output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| s as f32)
        .collect())
}
