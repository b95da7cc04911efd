//! Provider fallback and retry

use std::sync::Arc;
use std::time::Duration;

use crate::{
    error::{Error, Result},
    providers::ChatProvider,
    types::{ChatMessage, GenerateOptions},
};

/// Retry configuration for the primary provider
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (in addition to the first try)
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// A generation client with a static two-tier provider fallback.
///
/// The primary provider is attempted with exponential backoff until its
/// retry budget is exhausted; only then is the secondary tried, with a
/// bounded number of flat-delay attempts. Non-retryable primary errors
/// skip the remaining primary budget and go straight to the fallback.
pub struct FallbackClient {
    primary: Arc<dyn ChatProvider>,
    secondary: Option<Arc<dyn ChatProvider>>,
    retry: RetryConfig,
    secondary_attempts: u32,
}

impl FallbackClient {
    /// Create a client with a single provider and default retry budget
    pub fn new(primary: Arc<dyn ChatProvider>) -> Self {
        Self {
            primary,
            secondary: None,
            retry: RetryConfig::default(),
            secondary_attempts: 2,
        }
    }

    /// Add a fallback provider
    pub fn with_fallback(mut self, secondary: Arc<dyn ChatProvider>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Set retry configuration for the primary provider
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the bounded attempt count for the secondary provider
    pub fn with_secondary_attempts(mut self, attempts: u32) -> Self {
        self.secondary_attempts = attempts.max(1);
        self
    }

    /// Generate a response, retrying the primary and falling back on exhaustion
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<String> {
        let mut last_error = match self.try_primary(messages, options).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(last_error);
        };

        for attempt in 0..self.secondary_attempts {
            match secondary.complete(messages, options).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(
                        provider = secondary.name(),
                        "Fallback request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.secondary_attempts,
                        e
                    );
                    last_error = e;
                    if attempt + 1 < self.secondary_attempts {
                        tokio::time::sleep(self.retry.initial_delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn try_primary(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.primary.complete(messages, options).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if attempt < self.retry.max_retries && e.is_retryable() {
                        let delay = self.retry.delay_for_attempt(attempt);
                        tracing::warn!(
                            provider = self.primary.name(),
                            "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            self.retry.max_retries + 1,
                            e,
                            delay
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}
