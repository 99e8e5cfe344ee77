use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;

/// Path of the OpenAI-compatible chat endpoint, relative to the server base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// How a single request is retried before it is reported as failed.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Sleep before attempt `n + 1` is `delays[n - 1]`; the last entry repeats.
    pub delays: Vec<Duration>,
    /// HTTP statuses treated as transient.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
            retryable_statuses: vec![404, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn try_new(max_attempts: usize, delays: Vec<Duration>) -> Result<Self> {
        if max_attempts == 0 {
            return Err(anyhow!("max_attempts must be greater than zero"));
        }
        if max_attempts > 1 && delays.is_empty() {
            return Err(anyhow!(
                "at least one retry delay is required when max_attempts is {}",
                max_attempts
            ));
        }

        Ok(Self {
            max_attempts,
            delays,
            ..Self::default()
        })
    }

    pub fn with_retryable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    /// Backoff to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let idx = attempt.saturating_sub(1);
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

/// CI provenance copied into the results document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunMetadata {
    pub commit_sha: String,
    pub git_ref: String,
    pub image_tag: String,
}

#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub base_url: String,
    pub endpoint: Url,
    pub model: String,
    pub concurrency: usize,
    pub num_requests: usize,
    pub max_new_tokens: u32,
    pub cost_per_hour: f64,
    pub retry: RetryPolicy,
    pub metadata: RunMetadata,
    /// Per-request timeouts; `None` keeps the workload default.
    pub prefill_timeout: Option<Duration>,
    pub decode_timeout: Option<Duration>,
}

impl BenchmarkConfig {
    pub fn try_new(
        base_url: impl AsRef<str>,
        model: impl Into<String>,
        concurrency: usize,
        num_requests: usize,
        max_new_tokens: u32,
        cost_per_hour: f64,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(anyhow!("concurrency must be greater than zero"));
        }
        if num_requests == 0 {
            return Err(anyhow!("num_requests must be greater than zero"));
        }
        if max_new_tokens == 0 {
            return Err(anyhow!("max_new_tokens must be greater than zero"));
        }
        if !cost_per_hour.is_finite() || cost_per_hour < 0.0 {
            return Err(anyhow!(
                "cost_per_hour must be a non-negative number, got {}",
                cost_per_hour
            ));
        }

        let model = model.into();
        if model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }

        let base_url = base_url.as_ref().trim().trim_end_matches('/').to_string();
        let endpoint = resolve_endpoint(&base_url, CHAT_COMPLETIONS_PATH)?;

        Ok(Self {
            base_url,
            endpoint,
            model,
            concurrency,
            num_requests,
            max_new_tokens,
            cost_per_hour,
            retry: RetryPolicy::default(),
            metadata: RunMetadata::default(),
            prefill_timeout: None,
            decode_timeout: None,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metadata(mut self, metadata: RunMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timeouts(
        mut self,
        prefill_timeout: Option<Duration>,
        decode_timeout: Option<Duration>,
    ) -> Self {
        self.prefill_timeout = prefill_timeout;
        self.decode_timeout = decode_timeout;
        self
    }
}

/// Joins `path` onto `base_url`, keeping any path prefix the base already has.
pub fn resolve_endpoint(base_url: &str, path: &str) -> Result<Url> {
    let base = base_url.trim().trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(anyhow!(
            "base URL must start with http:// or https://, got {:?}",
            base_url
        ));
    }

    let joined = format!("{}/{}", base, path.trim_start_matches('/'));
    Url::parse(&joined).with_context(|| format!("invalid endpoint URL: {}", joined))
}
