//! Notifications emitted while a turn runs

use uuid::Uuid;

/// Something observable happened during a turn
///
/// Sent on the channel given to
/// [`Orchestrator::with_events`](super::Orchestrator::with_events).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A finished sentence left the segmenter
    SentenceGenerated { turn: Uuid, text: String },

    /// The model asked for a tool through inline markup
    ToolInvoked {
        turn: Uuid,
        name: String,
        parameter: String,
    },

    /// Audio for `text` started playing
    SpeakingStarted { turn: Uuid, text: String },

    /// The model finished generating; audio may still be playing
    ResponseCompleted { turn: Uuid, text: String },
}

impl TurnEvent {
    /// Turn this event belongs to
    #[must_use]
    pub const fn turn(&self) -> Uuid {
        match self {
            Self::SentenceGenerated { turn, .. }
            | Self::ToolInvoked { turn, .. }
            | Self::SpeakingStarted { turn, .. }
            | Self::ResponseCompleted { turn, .. } => *turn,
        }
    }
}
