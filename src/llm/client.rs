//! Streaming chat completion client

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use secrecy::ExposeSecret;

use super::types::{ChatMessage, ChatRequest};
use crate::config::LlmConfig;
use crate::connection::{ConnectionProvider, require_connection};
use crate::{Error, Result};

/// Raw response body, chunked however the transport delivers it
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens a streaming chat completion for a transcript
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Start a streaming completion over `messages`
    ///
    /// # Errors
    ///
    /// `Error::Config` when no credentials are available, `Error::Http` when
    /// the request fails, `Error::Network` on a non-success status.
    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream>;
}

/// Azure `OpenAI` chat completions over HTTPS
pub struct AzureChatClient {
    client: reqwest::Client,
    connections: Arc<dyn ConnectionProvider>,
    config: LlmConfig,
}

impl AzureChatClient {
    #[must_use]
    pub fn new(connections: Arc<dyn ConnectionProvider>, config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            connections,
            config,
        }
    }

    /// Build the deployment-scoped completions URL
    fn completions_url(&self, endpoint: &str, deployment: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!(
            "{endpoint}/openai/deployments/{deployment}/chat/completions"
        ))
        .map_err(|e| Error::Config(format!("invalid Azure OpenAI endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }
}

#[async_trait]
impl ChatTransport for AzureChatClient {
    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream> {
        let creds = require_connection(self.connections.as_ref())?.chat_credentials()?;
        let url = self.completions_url(&creds.endpoint, &creds.deployment)?;

        let with_system: Vec<ChatMessage>;
        let messages = if let Some(prompt) = &self.config.system_prompt {
            with_system = std::iter::once(ChatMessage::system(prompt.clone()))
                .chain(messages.iter().cloned())
                .collect();
            with_system.as_slice()
        } else {
            messages
        };

        let request = ChatRequest {
            messages,
            temperature: self.config.temperature,
            stream: true,
        };

        tracing::debug!(
            deployment = %creds.deployment,
            messages = messages.len(),
            "opening chat completion stream"
        );

        let body = serde_json::to_vec(&request)?;

        let response = self
            .client
            .post(url)
            .header("api-key", creds.api_key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat completion request failed");
                e
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!("Request failed: {status} {body}")));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::StaticConnectionProvider;

    #[test]
    fn completions_url_carries_api_version() {
        let client = AzureChatClient::new(
            Arc::new(StaticConnectionProvider::default()),
            LlmConfig::default(),
        );
        let url = client
            .completions_url("https://res.openai.azure.com", "gpt-4o")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-10-01-preview"
        );
    }

    #[tokio::test]
    async fn missing_connection_fails_before_any_request() {
        let client = AzureChatClient::new(
            Arc::new(StaticConnectionProvider::default()),
            LlmConfig::default(),
        );
        let err = client
            .open_stream(&[ChatMessage::user("hi")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
