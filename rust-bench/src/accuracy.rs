//! Collects model responses for an instruction-following evaluation.
//!
//! Scoring happens in an external evaluator; this module only checks the
//! server is alive, generates one deterministic completion per prompt, and
//! writes the prompt/response pairs out.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{resolve_endpoint, CHAT_COMPLETIONS_PATH};
use crate::error::DispatchError;
use crate::schema::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyConfig {
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

impl AccuracyConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 2048,
            request_timeout: Duration::from_secs(120),
            health_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccuracyClient {
    client: Client,
    health_url: Url,
    chat_url: Url,
    config: AccuracyConfig,
}

impl AccuracyClient {
    pub fn try_new(base_url: &str, config: AccuracyConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(anyhow!("model name required"));
        }
        let client = Client::builder()
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            health_url: resolve_endpoint(base_url, HEALTH_PATH)?,
            chat_url: resolve_endpoint(base_url, CHAT_COMPLETIONS_PATH)?,
            config,
        })
    }

    /// Fails unless `GET /health` answers with a success status in time.
    pub async fn health_check(&self) -> Result<()> {
        self.client
            .get(self.health_url.clone())
            .timeout(self.config.health_timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("cannot reach inference server at {}", self.health_url))?;
        Ok(())
    }

    /// `choices[0].message.content` of one deterministic completion.
    pub async fn generate(&self, prompt: &str) -> Result<String, DispatchError> {
        let request = ChatCompletionRequest::new(
            self.config.model.as_str(),
            vec![ChatMessage::user(prompt)],
            self.config.max_tokens,
        );
        let response = self
            .client
            .post(self.chat_url.clone())
            .timeout(self.config.request_timeout)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(DispatchError::status(status.as_u16(), &bytes));
        }

        let payload: ChatCompletionResponse = serde_json::from_slice(&bytes)?;
        Ok(payload.first_content().unwrap_or_default().to_string())
    }

    /// Generates a response for every prompt; failures become empty responses.
    pub async fn collect(&self, prompts: &[String], now: DateTime<Utc>) -> ResponseSet {
        let mut responses = Vec::with_capacity(prompts.len());
        let mut failed_samples = 0;

        for (idx, prompt) in prompts.iter().enumerate() {
            let response = match self.generate(prompt).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(sample = idx + 1, error = %err, "generation failed");
                    String::new()
                }
            };
            if response.is_empty() {
                failed_samples += 1;
            }
            info!(
                "[{}/{}] {} {}",
                idx + 1,
                prompts.len(),
                if response.is_empty() { "✗" } else { "✓" },
                preview(&response)
            );
            responses.push(PromptResponse {
                prompt: prompt.clone(),
                response,
            });
        }

        ResponseSet {
            model: self.config.model.clone(),
            timestamp: crate::baseline::timestamp(now),
            num_samples: prompts.len(),
            failed_samples,
            responses,
        }
    }
}

fn preview(response: &str) -> String {
    if response.is_empty() {
        return "FAILED".to_string();
    }
    let head: String = response.chars().take(50).collect();
    format!("{}...", head.replace('\n', " "))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptResponse {
    pub prompt: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSet {
    pub model: String,
    pub timestamp: String,
    pub num_samples: usize,
    pub failed_samples: usize,
    pub responses: Vec<PromptResponse>,
}

/// Reads prompts from JSONL, one object per line with a `prompt` or `text` field.
pub fn load_prompts(path: &Path, limit: Option<usize>) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut prompts = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        if limit.is_some_and(|limit| prompts.len() >= limit) {
            break;
        }
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(trimmed)
            .with_context(|| format!("line {} is not valid JSON: {}", idx + 1, trimmed))?;
        let prompt = value
            .get("prompt")
            .or_else(|| value.get("text"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("line {} missing string field `prompt` or `text`", idx + 1))?;
        prompts.push(prompt.to_string());
    }

    Ok(prompts)
}
