use std::fmt;

use serde::{Serialize, Serializer};

const SECONDS_PER_HOUR: f64 = 3600.0;
const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// `cost_per_hour * 1e6 / (tokens_per_second * 3600)`, infinite without throughput.
pub fn cost_per_million_tokens(tokens_per_second: f64, cost_per_hour: f64) -> f64 {
    CostFigure::from_throughput(tokens_per_second, cost_per_hour).as_f64()
}

/// Dollar cost of one million tokens at a measured throughput.
///
/// Serializes as a JSON number, or `null` when infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostFigure {
    PerMillionTokens(f64),
    Infinite,
}

impl CostFigure {
    pub fn from_throughput(tokens_per_second: f64, cost_per_hour: f64) -> Self {
        if tokens_per_second > 0.0 {
            Self::PerMillionTokens(
                cost_per_hour * TOKENS_PER_MILLION / (tokens_per_second * SECONDS_PER_HOUR),
            )
        } else {
            Self::Infinite
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::PerMillionTokens(value) => *value,
            Self::Infinite => f64::INFINITY,
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }
}

impl fmt::Display for CostFigure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerMillionTokens(value) => write!(f, "${:.4}", value),
            Self::Infinite => f.write_str("n/a (no throughput)"),
        }
    }
}

impl Serialize for CostFigure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::PerMillionTokens(value) => serializer.serialize_f64(*value),
            Self::Infinite => serializer.serialize_none(),
        }
    }
}
