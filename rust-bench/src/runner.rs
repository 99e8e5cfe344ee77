use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::aggregate::AggregateResult;
use crate::config::BenchmarkConfig;
use crate::dispatch::{ChatDispatch, Dispatcher, RequestOutcome};
use crate::report::BenchmarkReport;
use crate::workload::Workload;

/// Runs the prefill workload, then the decode workload, against one server.
pub async fn run_benchmark(config: &BenchmarkConfig) -> Result<BenchmarkReport> {
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);
    run_benchmark_with(dispatcher, config).await
}

pub async fn run_benchmark_with<D>(
    dispatcher: Arc<D>,
    config: &BenchmarkConfig,
) -> Result<BenchmarkReport>
where
    D: ChatDispatch + 'static,
{
    let plan = BatchPlan::from_config(config);
    let (prefill_workload, decode_workload) = workloads(config);

    let prefill = run_workload(
        Arc::clone(&dispatcher),
        &prefill_workload,
        &config.model,
        plan,
    )
    .await;
    let decode = run_workload(dispatcher, &decode_workload, &config.model, plan).await;

    Ok(BenchmarkReport::new(config, &prefill, &decode))
}

/// Prefill and decode workloads with any configured timeout overrides applied.
fn workloads(config: &BenchmarkConfig) -> (Workload, Workload) {
    let mut prefill = Workload::prefill();
    if let Some(timeout) = config.prefill_timeout {
        prefill = prefill.with_timeout(timeout);
    }
    let mut decode = Workload::decode(config.max_new_tokens);
    if let Some(timeout) = config.decode_timeout {
        decode = decode.with_timeout(timeout);
    }
    (prefill, decode)
}

/// How many requests to send and how many may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub total_requests: usize,
    pub concurrency: usize,
}

impl BatchPlan {
    pub fn from_config(config: &BenchmarkConfig) -> Self {
        Self {
            total_requests: config.num_requests,
            concurrency: config.concurrency,
        }
    }

    pub fn chunks(&self) -> Vec<Range<usize>> {
        chunk_ranges(self.total_requests, self.concurrency)
    }
}

/// Splits `[0, total)` into consecutive ranges no longer than `concurrency`.
pub fn chunk_ranges(total: usize, concurrency: usize) -> Vec<Range<usize>> {
    let size = concurrency.max(1);
    (0..total)
        .step_by(size)
        .map(|start| start..(start + size).min(total))
        .collect()
}

/// Sends every request of `workload`, one chunk at a time.
///
/// All requests of a chunk run concurrently and the whole chunk is awaited
/// before the next one starts. Wall time covers the entire run.
pub async fn run_workload<D>(
    dispatcher: Arc<D>,
    workload: &Workload,
    model: &str,
    plan: BatchPlan,
) -> AggregateResult
where
    D: ChatDispatch + 'static,
{
    info!(
        workload = workload.kind.label(),
        requests = plan.total_requests,
        concurrency = plan.concurrency,
        "starting workload"
    );

    let request = Arc::new(workload.request(model));
    let mut aggregate = AggregateResult::default();
    let start = Instant::now();

    for chunk in plan.chunks() {
        let mut join_set = JoinSet::new();
        let mut request_ids = HashMap::with_capacity(chunk.len());
        for idx in chunk.clone() {
            let dispatcher = Arc::clone(&dispatcher);
            let request = Arc::clone(&request);
            let timeout = workload.timeout;
            let request_id = idx + 1;
            let handle = join_set.spawn(async move {
                dispatcher.dispatch(request_id, &request, timeout).await
            });
            request_ids.insert(handle.id(), request_id);
        }

        let mut outcomes = Vec::with_capacity(chunk.len());
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined.unwrap_or_else(|err| {
                let request_id = request_ids.get(&err.id()).copied().unwrap_or_default();
                RequestOutcome::failed(request_id, format!("request task failed: {}", err), 0)
            });
            outcomes.push(outcome);
        }

        for outcome in outcomes {
            if let Some(error) = &outcome.error {
                warn!(request_id = outcome.request_id, error = %error, "request failed");
            }
            aggregate.record(outcome);
        }

        info!(
            workload = workload.kind.label(),
            "Progress: {}/{} requests completed",
            chunk.end,
            plan.total_requests
        );
    }

    aggregate.finish(start.elapsed());
    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::schema::ChatCompletionRequest;

    #[test]
    fn chunk_ranges_cover_total_without_exceeding_concurrency() {
        for total in 0..40 {
            for concurrency in 1..12 {
                let chunks = chunk_ranges(total, concurrency);
                assert_eq!(chunks.len(), total.div_ceil(concurrency));
                assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), total);
                assert!(chunks.iter().all(|c| c.len() <= concurrency && !c.is_empty()));
                let mut expected_start = 0;
                for chunk in &chunks {
                    assert_eq!(chunk.start, expected_start);
                    expected_start = chunk.end;
                }
            }
        }
    }

    #[test]
    fn chunk_ranges_last_chunk_is_remainder() {
        assert_eq!(chunk_ranges(10, 4), vec![0..4, 4..8, 8..10]);
        assert_eq!(chunk_ranges(3, 32), vec![0..3]);
    }

    #[derive(Default)]
    struct RecordingDispatch {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: AtomicUsize,
        /// (request_id, requests completed when it started)
        starts: Mutex<Vec<(usize, usize)>>,
    }

    #[async_trait]
    impl ChatDispatch for RecordingDispatch {
        async fn dispatch(
            &self,
            request_id: usize,
            request: &ChatCompletionRequest,
            _timeout: Duration,
        ) -> RequestOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.starts
                .lock()
                .unwrap()
                .push((request_id, self.completed.load(Ordering::SeqCst)));

            tokio::time::sleep(Duration::from_millis(5)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            if request_id % 5 == 0 {
                RequestOutcome::failed(request_id, "HTTP 500: boom", 1)
            } else {
                RequestOutcome::succeeded(
                    request_id,
                    100,
                    u64::from(request.max_tokens),
                    Duration::from_millis(5),
                    1,
                )
            }
        }
    }

    #[derive(Default)]
    struct TimeoutRecorder {
        /// (max_tokens, timeout) per dispatched request
        seen: Mutex<Vec<(u32, Duration)>>,
    }

    #[async_trait]
    impl ChatDispatch for TimeoutRecorder {
        async fn dispatch(
            &self,
            request_id: usize,
            request: &ChatCompletionRequest,
            timeout: Duration,
        ) -> RequestOutcome {
            self.seen.lock().unwrap().push((request.max_tokens, timeout));
            RequestOutcome::succeeded(request_id, 10, 1, Duration::from_millis(1), 1)
        }
    }

    #[tokio::test]
    async fn benchmark_applies_configured_timeouts() {
        let config = BenchmarkConfig::try_new("http://h", "m", 2, 2, 64, 0.16)
            .unwrap()
            .with_timeouts(Some(Duration::from_secs(30)), None);
        let dispatcher = Arc::new(TimeoutRecorder::default());

        run_benchmark_with(Arc::clone(&dispatcher), &config).await.unwrap();

        let seen = dispatcher.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        for (max_tokens, timeout) in seen {
            match max_tokens {
                1 => assert_eq!(timeout, Duration::from_secs(30)),
                64 => assert_eq!(timeout, Duration::from_secs(300)),
                other => panic!("unexpected max_tokens {}", other),
            }
        }
    }

    struct PanickingDispatch {
        panic_on: usize,
    }

    #[async_trait]
    impl ChatDispatch for PanickingDispatch {
        async fn dispatch(
            &self,
            request_id: usize,
            _request: &ChatCompletionRequest,
            _timeout: Duration,
        ) -> RequestOutcome {
            if request_id == self.panic_on {
                panic!("dispatcher bug");
            }
            RequestOutcome::succeeded(request_id, 10, 1, Duration::from_millis(1), 1)
        }
    }

    #[tokio::test]
    async fn panicked_task_is_recorded_against_its_request() {
        let dispatcher = Arc::new(PanickingDispatch { panic_on: 6 });
        let plan = BatchPlan {
            total_requests: 8,
            concurrency: 3,
        };

        let aggregate = run_workload(dispatcher, &Workload::prefill(), "m", plan).await;

        assert_eq!(aggregate.total_requests(), 8);
        assert_eq!(aggregate.successful_count, 7);
        assert_eq!(aggregate.failures.len(), 1);
        assert_eq!(aggregate.failures[0].request_id, 6);
        assert!(aggregate.failures[0].error.starts_with("request task failed"));
    }

    #[tokio::test]
    async fn runs_chunks_sequentially_with_bounded_concurrency() {
        let dispatcher = Arc::new(RecordingDispatch::default());
        let plan = BatchPlan {
            total_requests: 11,
            concurrency: 4,
        };

        let aggregate =
            run_workload(Arc::clone(&dispatcher), &Workload::decode(8), "m", plan).await;

        assert_eq!(aggregate.total_requests(), 11);
        assert_eq!(aggregate.failed_count, 2);
        assert_eq!(aggregate.successful_count, 9);
        assert_eq!(aggregate.total_prompt_tokens, 900);
        assert_eq!(aggregate.total_completion_tokens, 72);
        assert!(aggregate.total_wall_time > Duration::ZERO);
        assert!(dispatcher.max_in_flight.load(Ordering::SeqCst) <= 4);

        let starts = dispatcher.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 11);
        for (request_id, completed_before) in starts {
            let chunk_index = (request_id - 1) / plan.concurrency;
            assert!(
                completed_before >= chunk_index * plan.concurrency,
                "request {} started before chunk {} finished",
                request_id,
                chunk_index
            );
        }
    }
}
