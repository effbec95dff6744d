//! Running conversation transcript

use crate::llm::{ChatMessage, ContentPart, ImageUrl, MessageContent, Role};

/// Messages exchanged so far, in order
///
/// Assistant text is appended delta by delta, so a turn that fails midway
/// still leaves what was generated before the failure.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    /// Index of the assistant message that streamed deltas extend
    open_reply: Option<usize>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.open_reply = None;
        self.messages.push(ChatMessage::user(text));
    }

    /// User message with an attached image, e.g. a screen capture
    pub fn push_user_with_image(&mut self, text: impl Into<String>, image_url: impl Into<String>) {
        self.open_reply = None;
        self.messages.push(ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                        detail: None,
                    },
                },
            ]),
        });
    }

    /// Extend the reply being streamed, opening one if none is open
    ///
    /// Only a reply opened by this method is ever extended; messages added
    /// through [`Transcript::append_assistant_message`] stay as recorded.
    pub fn append_assistant_delta(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        if let Some(index) = self.open_reply
            && let Some(message) = self.messages.get_mut(index)
            && let MessageContent::Text(text) = &mut message.content
        {
            text.push_str(delta);
            return;
        }
        self.messages.push(ChatMessage::assistant(delta));
        self.open_reply = Some(self.messages.len() - 1);
    }

    /// Record a complete assistant message that did not come from the model
    pub fn append_assistant_message(&mut self, text: impl Into<String>) {
        self.open_reply = None;
        self.messages.push(ChatMessage::assistant(text));
    }

    pub fn clear(&mut self) {
        self.open_reply = None;
        self.messages.clear();
    }

    /// Text of the trailing assistant message, if the transcript ends with one
    #[must_use]
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(ChatMessage::text)
    }
}
