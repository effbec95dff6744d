//! Sentence segmentation, speech synthesis and push-to-talk recognition
//!
//! Generated text is cut into sentences as soon as they are complete, then
//! synthesized one call at a time so audio comes back in sentence order.
//! Spoken input is recorded from the microphone and transcribed in one call.

mod capture;
mod queue;
mod recognition;
mod segmenter;
mod synthesis;

pub use capture::{AudioCapture, CAPTURE_SAMPLE_RATE, samples_to_wav};
pub use queue::SynthesisQueue;
pub use recognition::{AzureTranscriber, TRANSCRIPTION_API_VERSION, Transcriber};
pub use segmenter::{
    AsciiSentenceLocator, SentenceBoundaryLocator, SentenceSegmenter, UnicodeSentenceLocator,
};
pub use synthesis::{
    AzureSynthesizer, SynthesisRequest, SynthesisResult, Synthesizer, build_ssml,
};
