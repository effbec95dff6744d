//! Chat completion streaming
//!
//! Opens a streaming completion and turns its raw body into ordered text
//! deltas.

mod client;
mod decoder;
mod types;

pub use client::{AzureChatClient, ByteStream, ChatTransport};
pub use decoder::{DecodeEvent, StreamDecoder, decode_stream};
pub use types::{
    ChatMessage, ChatRequest, ChatStreamItem, ContentPart, ImageUrl, MessageContent, Role,
    StreamChoice, StreamDelta,
};
