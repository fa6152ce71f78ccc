use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use super::CallbackPayload;

/// Outcome of a single failed delivery attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned HTTP {0}")]
    Status(u16),
}

/// Transport for terminal notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// One attempt. Success means a 2xx response.
    async fn notify(&self, url: &str, payload: &CallbackPayload) -> Result<(), AttemptError>;
}

/// POSTs the payload as JSON with a per-attempt timeout
pub struct HttpNotifier {
    client: Client,
    timeout: Duration,
}

impl HttpNotifier {
    pub fn new(timeout: Duration, user_agent: &str) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str, payload: &CallbackPayload) -> Result<(), AttemptError> {
        let request = self.client.post(url).json(payload).send();

        match tokio::time::timeout(self.timeout, request).await {
            Err(_) => Err(AttemptError::Timeout(self.timeout)),
            Ok(Err(e)) if e.is_timeout() => Err(AttemptError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(AttemptError::Transport(e.to_string())),
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(AttemptError::Status(response.status().as_u16())),
        }
    }
}
