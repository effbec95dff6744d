//! One spoken turn, from user message to audible reply
//!
//! The [`Orchestrator`] owns the transcript and wires the stream decoder,
//! the sentence segmenter, the synthesis queue and playback together for
//! every turn.

mod events;
mod orchestrator;
mod router;
mod transcript;

pub use events::TurnEvent;
pub use orchestrator::{Orchestrator, TurnSummary};
pub use router::{RoutedSentence, ToolInvocation, route_sentence};
pub use transcript::Transcript;
