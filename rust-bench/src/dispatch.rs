use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::config::{BenchmarkConfig, RetryPolicy};
use crate::error::DispatchError;
use crate::schema::{ChatCompletionRequest, ChatCompletionResponse};

/// What happened to one dispatched request, after retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub request_id: usize,
    pub success: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Wall-clock latency of the accepted attempt; zero on failure.
    pub latency: Duration,
    pub error: Option<String>,
    pub attempts: usize,
}

impl RequestOutcome {
    pub fn succeeded(
        request_id: usize,
        prompt_tokens: u64,
        completion_tokens: u64,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            request_id,
            success: true,
            prompt_tokens,
            completion_tokens,
            latency,
            error: None,
            attempts,
        }
    }

    pub fn failed(request_id: usize, error: impl Into<String>, attempts: usize) -> Self {
        Self {
            request_id,
            success: false,
            prompt_tokens: 0,
            completion_tokens: 0,
            latency: Duration::ZERO,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// Sends one chat completion and never fails past its own boundary.
#[async_trait]
pub trait ChatDispatch: Send + Sync {
    async fn dispatch(
        &self,
        request_id: usize,
        request: &ChatCompletionRequest,
        timeout: Duration,
    ) -> RequestOutcome;
}

/// Production dispatcher: a pooled reqwest client bound to one endpoint.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    client: Client,
    endpoint: Url,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(endpoint: Url, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            retry,
        })
    }

    pub fn from_config(config: &BenchmarkConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.retry.clone())
    }

    fn should_retry(&self, err: &DispatchError) -> bool {
        match err {
            DispatchError::Status { status, .. } => self.retry.is_retryable_status(*status),
            DispatchError::Timeout | DispatchError::Transport(_) | DispatchError::Decode(_) => {
                true
            }
        }
    }

    async fn single_attempt(
        &self,
        request: &ChatCompletionRequest,
        timeout: Duration,
    ) -> Result<Completion, DispatchError> {
        let start = Instant::now();
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let latency = start.elapsed();

        if !status.is_success() {
            return Err(DispatchError::status(status.as_u16(), &bytes));
        }

        let payload: ChatCompletionResponse = serde_json::from_slice(&bytes)?;
        Ok(Completion {
            prompt_tokens: payload.prompt_tokens(),
            completion_tokens: payload.completion_tokens(),
            latency,
        })
    }
}

#[async_trait]
impl ChatDispatch for Dispatcher {
    async fn dispatch(
        &self,
        request_id: usize,
        request: &ChatCompletionRequest,
        timeout: Duration,
    ) -> RequestOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.single_attempt(request, timeout).await {
                Ok(completion) => {
                    debug!(
                        request_id,
                        attempt,
                        latency_ms = completion.latency.as_millis() as u64,
                        "request completed"
                    );
                    return RequestOutcome::succeeded(
                        request_id,
                        completion.prompt_tokens,
                        completion.completion_tokens,
                        completion.latency,
                        attempt,
                    );
                }
                Err(err) => err,
            };

            if attempt >= max_attempts || !self.should_retry(&err) {
                let message = match err {
                    DispatchError::Timeout if attempt > 1 => {
                        format!("timed out after {} attempts", attempt)
                    }
                    other => other.to_string(),
                };
                return RequestOutcome::failed(request_id, message, attempt);
            }

            let delay = self.retry.delay_after(attempt);
            warn!(
                request_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug)]
struct Completion {
    prompt_tokens: u64,
    completion_tokens: u64,
    latency: Duration,
}
