use std::time::Duration;

use crate::dispatch::RequestOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub request_id: usize,
    pub error: String,
}

/// Running totals for one workload. Only the batch runner writes to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_wall_time: Duration,
    pub successful_count: u64,
    pub failed_count: u64,
    /// Latencies of successful requests, in completion order.
    pub latencies: Vec<Duration>,
    pub failures: Vec<FailureRecord>,
}

impl AggregateResult {
    pub fn record(&mut self, outcome: RequestOutcome) {
        if outcome.success {
            self.successful_count += 1;
            self.total_prompt_tokens += outcome.prompt_tokens;
            self.total_completion_tokens += outcome.completion_tokens;
            self.latencies.push(outcome.latency);
        } else {
            self.failed_count += 1;
            self.failures.push(FailureRecord {
                request_id: outcome.request_id,
                error: outcome.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
    }

    pub fn finish(&mut self, total_wall_time: Duration) {
        self.total_wall_time = total_wall_time;
    }

    pub fn total_requests(&self) -> u64 {
        self.successful_count + self.failed_count
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    pub fn prompt_tokens_per_second(&self) -> f64 {
        rate(self.total_prompt_tokens, self.total_wall_time)
    }

    pub fn completion_tokens_per_second(&self) -> f64 {
        rate(self.total_completion_tokens, self.total_wall_time)
    }

    pub fn tokens_per_second(&self) -> f64 {
        rate(self.total_tokens(), self.total_wall_time)
    }

    pub fn median_latency(&self) -> Duration {
        median(&self.sorted_latencies()).unwrap_or_default()
    }

    pub fn p95_latency(&self) -> Duration {
        percentile(&self.sorted_latencies(), 0.95).unwrap_or_default()
    }

    pub fn p99_latency(&self) -> Duration {
        percentile(&self.sorted_latencies(), 0.99).unwrap_or_default()
    }

    fn sorted_latencies(&self) -> Vec<Duration> {
        let mut latencies = self.latencies.clone();
        latencies.sort();
        latencies
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// `min(floor(quantile * len), len - 1)`, or `None` for an empty sample.
pub fn percentile_index(len: usize, quantile: f64) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let clamped = quantile.clamp(0.0, 1.0);
    let idx = (len as f64 * clamped).floor() as usize;
    Some(idx.min(len - 1))
}

pub fn percentile(sorted_latencies: &[Duration], quantile: f64) -> Option<Duration> {
    percentile_index(sorted_latencies.len(), quantile).map(|idx| sorted_latencies[idx])
}

/// Middle element, or the mean of the two middle elements for even lengths.
pub fn median(sorted_latencies: &[Duration]) -> Option<Duration> {
    let len = sorted_latencies.len();
    if len == 0 {
        return None;
    }
    let mid = len / 2;
    if len % 2 == 1 {
        Some(sorted_latencies[mid])
    } else {
        Some((sorted_latencies[mid - 1] + sorted_latencies[mid]) / 2)
    }
}
