pub mod accuracy;
pub mod aggregate;
pub mod baseline;
pub mod config;
pub mod cost;
pub mod dispatch;
pub mod error;
pub mod pricing;
pub mod report;
pub mod runner;
pub mod schema;
pub mod telemetry;
pub mod workload;

pub use aggregate::{AggregateResult, FailureRecord};
pub use config::{BenchmarkConfig, RetryPolicy, RunMetadata};
pub use cost::{cost_per_million_tokens, CostFigure};
pub use dispatch::{ChatDispatch, Dispatcher, RequestOutcome};
pub use error::DispatchError;
pub use report::{BenchmarkReport, WorkloadSummary};
pub use runner::{chunk_ranges, run_benchmark, run_benchmark_with, run_workload, BatchPlan};
pub use workload::{Workload, WorkloadKind};
