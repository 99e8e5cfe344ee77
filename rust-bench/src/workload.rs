use std::time::Duration;

use crate::aggregate::AggregateResult;
use crate::schema::{ChatCompletionRequest, ChatMessage};

const PREFILL_SENTENCE: &str = "The quick brown fox jumps over the lazy dog. ";
const PREFILL_REPEATS: usize = 100;
const DECODE_PROMPT: &str =
    "Write a detailed essay about the history of artificial intelligence.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Long prompt, single output token: measures input throughput.
    Prefill,
    /// Short prompt, long completion: measures output throughput.
    Decode,
}

impl WorkloadKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Prefill => "prefill",
            Self::Decode => "decode",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Prefill => "PREFILL",
            Self::Decode => "DECODE",
        }
    }

    /// Tokens counted toward this workload's throughput.
    pub fn measured_tokens(&self, aggregate: &AggregateResult) -> u64 {
        match self {
            Self::Prefill => aggregate.total_prompt_tokens,
            Self::Decode => aggregate.total_completion_tokens,
        }
    }

    pub fn tokens_per_second(&self, aggregate: &AggregateResult) -> f64 {
        match self {
            Self::Prefill => aggregate.prompt_tokens_per_second(),
            Self::Decode => aggregate.completion_tokens_per_second(),
        }
    }
}

/// A fixed message payload sent `num_requests` times.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Workload {
    pub fn prefill() -> Self {
        Self {
            kind: WorkloadKind::Prefill,
            messages: vec![ChatMessage::user(PREFILL_SENTENCE.repeat(PREFILL_REPEATS))],
            max_tokens: 1,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn decode(max_new_tokens: u32) -> Self {
        Self {
            kind: WorkloadKind::Decode,
            messages: vec![ChatMessage::user(DECODE_PROMPT)],
            max_tokens: max_new_tokens,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    pub fn request(&self, model: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::new(model, self.messages.clone(), self.max_tokens)
    }
}
