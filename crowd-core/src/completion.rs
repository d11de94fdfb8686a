//! Completion requests against the remote language model.
//!
//! [`ChatCompletion`] is the seam sessions talk through: the real
//! [`ChatCompletionClient`] in production, `testing::MockCompletion` in tests.
//! Implementations return text and never touch session state.

use crate::config::DialogueConfig;
use crate::credential::CredentialProvider;
use crate::error::CompletionError;
use crate::message::Message;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// One request/response cycle against a chat model.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Send the ordered turns and return the first choice's text.
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String, CompletionError>;
}

/// Completion client backed by the OpenAI Chat Completions API.
pub struct ChatCompletionClient {
    api: openai::OpenAi,
    credentials: Arc<dyn CredentialProvider>,
    limiter: Option<RateLimiter>,
}

impl ChatCompletionClient {
    /// Client against the public API with default settings.
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            api: openai::OpenAi::new(),
            credentials,
            limiter: None,
        }
    }

    /// Client configured from dialogue settings (base URL, timeout, rate limit).
    pub fn from_config(config: &DialogueConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let mut api = openai::OpenAi::new()
            .with_model(config.model.clone())
            .with_timeout(config.request_timeout);
        if let Some(base) = &config.api_base {
            api = api.with_api_base(base.clone());
        }

        Self {
            api,
            credentials,
            limiter: config.max_requests_per_minute.map(RateLimiter::new),
        }
    }

    /// Cap outbound requests per rolling minute.
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.limiter = Some(RateLimiter::new(per_minute));
        self
    }

    fn api_key(&self) -> Result<String, CompletionError> {
        match self.credentials.credential() {
            Some(key) if self.credentials.is_valid_format() => Ok(key),
            Some(_) => {
                tracing::error!("API key has an unexpected format");
                Err(CompletionError::MissingCredential)
            }
            None => {
                tracing::error!("API key not configured");
                Err(CompletionError::MissingCredential)
            }
        }
    }
}

#[async_trait]
impl ChatCompletion for ChatCompletionClient {
    #[tracing::instrument(skip(self, messages), fields(turns = messages.len()))]
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String, CompletionError> {
        let api_key = self.api_key()?;

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let request =
            openai::Request::new(messages.iter().map(openai::Message::from).collect())
                .with_model(model);

        let response = match self.api.complete(&api_key, request).await {
            Ok(response) => response,
            Err(e) => {
                let err = CompletionError::from(e);
                match &err {
                    CompletionError::ServerError { status, message } => {
                        tracing::error!(status, body = %message, "completion request rejected");
                    }
                    other => tracing::warn!(error = %other, "completion request failed"),
                }
                return Err(err);
            }
        };

        if response.choices.is_empty() {
            tracing::warn!("completion response contained no choices");
            return Err(CompletionError::MalformedResponse(
                "response contained no choices".to_string(),
            ));
        }

        match response.text() {
            Some(text) => Ok(text.trim().to_string()),
            None => {
                tracing::warn!("first choice carried no content");
                Err(CompletionError::MalformedResponse(
                    "first choice carried no content".to_string(),
                ))
            }
        }
    }
}

/// Sliding-window limiter: at most `max` acquisitions per [`RATE_WINDOW`].
/// Callers over budget wait for the window to roll rather than failing.
#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            max: per_minute.max(1) as usize,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a request slot is free, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut sent = self.sent.lock().await;
                let now = Instant::now();
                while sent
                    .front()
                    .is_some_and(|oldest| now.duration_since(*oldest) >= RATE_WINDOW)
                {
                    sent.pop_front();
                }
                if sent.len() < self.max {
                    sent.push_back(now);
                    return;
                }
                match sent.front() {
                    Some(oldest) => RATE_WINDOW.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Slots used in the current window.
    pub async fn in_flight(&self) -> usize {
        let sent = self.sent.lock().await;
        let now = Instant::now();
        sent.iter()
            .filter(|at| now.duration_since(**at) < RATE_WINDOW)
            .count()
    }
}
