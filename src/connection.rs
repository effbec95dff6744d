//! Service credentials and the providers that hand them out
//!
//! The pipeline never stores credentials; every chat request and every
//! synthesis call asks a [`ConnectionProvider`] for a fresh [`Connection`].

use std::sync::RwLock;

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Endpoints and keys for the chat and speech services
#[derive(Clone)]
pub struct Connection {
    /// Azure `OpenAI` resource endpoint, e.g. `https://my-res.openai.azure.com`
    pub aoai_endpoint: String,
    /// Chat model deployment name
    pub aoai_deployment_name: String,
    /// Azure `OpenAI` key
    pub aoai_key: SecretString,
    /// Speech resource region, e.g. `eastus`
    pub speech_region: String,
    /// Speech resource key
    pub speech_key: SecretString,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("aoai_endpoint", &self.aoai_endpoint)
            .field("aoai_deployment_name", &self.aoai_deployment_name)
            .field("speech_region", &self.speech_region)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Credentials for the speech service
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the region or key is blank
    pub fn speech_credentials(&self) -> Result<SpeechCredentials> {
        if self.speech_key.expose_secret().trim().is_empty() {
            return Err(Error::Config("speech key is not set".to_string()));
        }
        if self.speech_region.trim().is_empty() {
            return Err(Error::Config("speech region is not set".to_string()));
        }
        Ok(SpeechCredentials {
            api_key: self.speech_key.clone(),
            region: self.speech_region.trim().to_string(),
        })
    }

    /// Credentials for the chat service
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint, deployment, or key is blank
    pub fn chat_credentials(&self) -> Result<ChatCredentials> {
        if self.aoai_key.expose_secret().trim().is_empty() {
            return Err(Error::Config("Azure OpenAI key is not set".to_string()));
        }
        if self.aoai_endpoint.trim().is_empty() {
            return Err(Error::Config("Azure OpenAI endpoint is not set".to_string()));
        }
        if self.aoai_deployment_name.trim().is_empty() {
            return Err(Error::Config(
                "Azure OpenAI deployment name is not set".to_string(),
            ));
        }
        Ok(ChatCredentials {
            endpoint: self.aoai_endpoint.trim().trim_end_matches('/').to_string(),
            deployment: self.aoai_deployment_name.trim().to_string(),
            api_key: self.aoai_key.clone(),
        })
    }
}

/// Resolved credentials for one synthesis call
#[derive(Clone)]
pub struct SpeechCredentials {
    pub api_key: SecretString,
    pub region: String,
}

/// Resolved credentials for one chat request
#[derive(Clone)]
pub struct ChatCredentials {
    pub endpoint: String,
    pub deployment: String,
    pub api_key: SecretString,
}

/// Synchronous lookup of the current connection
///
/// Returning `None` means no credentials have been provided; callers treat
/// that as a fatal configuration error.
pub trait ConnectionProvider: Send + Sync {
    fn connection(&self) -> Option<Connection>;
}

/// Resolve the current connection or fail with a configuration error
///
/// # Errors
///
/// Returns `Error::Config` if the provider has nothing to offer
pub fn require_connection(provider: &dyn ConnectionProvider) -> Result<Connection> {
    provider
        .connection()
        .ok_or_else(|| Error::Config("no connection provided; set credentials first".to_string()))
}

/// Provider backed by a value that can be replaced at runtime
///
/// Stands in for a settings dialog: whatever was last stored is what the
/// next call sees.
#[derive(Default)]
pub struct StaticConnectionProvider {
    current: RwLock<Option<Connection>>,
}

impl StaticConnectionProvider {
    #[must_use]
    pub fn new(connection: Option<Connection>) -> Self {
        Self {
            current: RwLock::new(connection),
        }
    }

    /// Replace the stored connection
    pub fn set(&self, connection: Option<Connection>) {
        match self.current.write() {
            Ok(mut guard) => *guard = connection,
            Err(poisoned) => *poisoned.into_inner() = connection,
        }
    }
}

impl ConnectionProvider for StaticConnectionProvider {
    fn connection(&self) -> Option<Connection> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Provider that reads credentials from the environment on every lookup
///
/// Reads `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_DEPLOYMENT`,
/// `AZURE_OPENAI_KEY`, `AZURE_SPEECH_REGION` and `AZURE_SPEECH_KEY`.
/// Returns `None` only when every variable is unset.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvConnectionProvider;

impl ConnectionProvider for EnvConnectionProvider {
    fn connection(&self) -> Option<Connection> {
        let var = |name: &str| std::env::var(name).ok();
        let fields = [
            var("AZURE_OPENAI_ENDPOINT"),
            var("AZURE_OPENAI_DEPLOYMENT"),
            var("AZURE_OPENAI_KEY"),
            var("AZURE_SPEECH_REGION"),
            var("AZURE_SPEECH_KEY"),
        ];
        if fields.iter().all(Option::is_none) {
            return None;
        }
        let [endpoint, deployment, aoai_key, region, speech_key] =
            fields.map(Option::unwrap_or_default);

        Some(Connection {
            aoai_endpoint: endpoint,
            aoai_deployment_name: deployment,
            aoai_key: SecretString::from(aoai_key),
            speech_region: region,
            speech_key: SecretString::from(speech_key),
        })
    }
}
