//! Accuracy regression gate: compares a run's instruction-following scores
//! against a stored baseline document, or refreshes that baseline.

use std::fs;
use std::ops::Index;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Allowed drop, in percentage points, before a metric fails.
pub const DEFAULT_THRESHOLD: f64 = 5.0;

/// Pairs a key in the results document with its key in the baseline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMapping {
    pub result_key: String,
    pub baseline_key: String,
    pub name: String,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl MetricMapping {
    pub fn new(result_key: &str, baseline_key: &str, name: &str) -> Self {
        Self {
            result_key: result_key.to_string(),
            baseline_key: baseline_key.to_string(),
            name: name.to_string(),
            threshold: None,
        }
    }
}

/// Results carry strict scores under the bare name; baselines suffix `_strict`.
pub fn default_ifeval_mappings() -> Vec<MetricMapping> {
    vec![
        MetricMapping::new(
            "prompt_level_accuracy",
            "prompt_level_accuracy_strict",
            "Prompt-level Accuracy (Strict)",
        ),
        MetricMapping::new(
            "prompt_level_accuracy_loose",
            "prompt_level_accuracy_loose",
            "Prompt-level Accuracy (Loose)",
        ),
        MetricMapping::new(
            "instruction_level_accuracy",
            "instruction_level_accuracy_strict",
            "Instruction-level Accuracy (Strict)",
        ),
        MetricMapping::new(
            "instruction_level_accuracy_loose",
            "instruction_level_accuracy_loose",
            "Instruction-level Accuracy (Loose)",
        ),
    ]
}

pub fn load_mappings(path: &Path) -> Result<Vec<MetricMapping>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read metric mapping {}", path.display()))?;
    let mappings: Vec<MetricMapping> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid metric mapping JSON in {}", path.display()))?;
    if mappings.is_empty() {
        return Err(anyhow!("metric mapping {} is empty", path.display()));
    }
    Ok(mappings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricStatus {
    Pass,
    Fail,
    Improved,
    NoBaseline,
}

impl MetricStatus {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Pass => "✅",
            Self::Fail => "❌",
            Self::Improved => "🎉",
            Self::NoBaseline => "⚠️ ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Pass,
    Fail,
}

/// FAIL below `-threshold`, IMPROVED above `threshold`, PASS otherwise.
pub fn classify(delta: f64, threshold: f64) -> MetricStatus {
    if delta < -threshold {
        MetricStatus::Fail
    } else if delta > threshold {
        MetricStatus::Improved
    } else {
        MetricStatus::Pass
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricComparison {
    pub name: String,
    pub current: f64,
    pub baseline: Option<f64>,
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub status: MetricStatus,
    pub message: String,
}

/// Per-metric results keyed by result key, kept in mapping order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricTable {
    entries: Vec<(String, MetricComparison)>,
}

impl MetricTable {
    /// Inserts or replaces `key`; a replaced key keeps its original position.
    pub fn insert(&mut self, key: String, metric: MetricComparison) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = metric,
            None => self.entries.push((key, metric)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetricComparison> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, metric)| metric)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Index<&str> for MetricTable {
    type Output = MetricComparison;

    fn index(&self, key: &str) -> &MetricComparison {
        match self.get(key) {
            Some(metric) => metric,
            None => panic!("no metric named {:?}", key),
        }
    }
}

impl Serialize for MetricTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(key, metric)| (key, metric)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub model: String,
    pub baseline_model: String,
    pub timestamp: String,
    pub metrics: MetricTable,
    pub status: OverallStatus,
    pub summary: Vec<String>,
}

impl Comparison {
    pub fn failed(&self) -> bool {
        self.status == OverallStatus::Fail
    }

    pub fn render(&self) -> String {
        let heavy = "=".repeat(80);
        let light = "-".repeat(80);
        let mut lines = vec![
            heavy.clone(),
            "🔍 Baseline Comparison Results".to_string(),
            heavy.clone(),
            format!("Model: {}", self.model),
            format!("Baseline: {}", self.baseline_model),
            format!("Status: {}", status_label(self.status)),
            light.clone(),
            "Metrics:".to_string(),
            light,
        ];
        lines.extend(self.summary.iter().map(|line| format!("  {}", line)));
        lines.push(heavy);
        lines.join("\n")
    }
}

fn status_label(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Pass => "PASS",
        OverallStatus::Fail => "FAIL",
    }
}

/// `accuracy.ifeval` when the document has an `accuracy` key, else the root.
pub fn current_metrics(results: &Value) -> &Value {
    match results.get("accuracy") {
        Some(accuracy) => accuracy.get("ifeval").unwrap_or(&Value::Null),
        None => results,
    }
}

fn baseline_metrics(baseline: &Value) -> &Value {
    baseline
        .get("accuracy")
        .and_then(|accuracy| accuracy.get("ifeval"))
        .unwrap_or(&Value::Null)
}

fn model_name(document: &Value) -> String {
    document
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn compare(
    results: &Value,
    baseline: &Value,
    mappings: &[MetricMapping],
    default_threshold: f64,
    now: DateTime<Utc>,
) -> Comparison {
    let current_values = current_metrics(results);
    let baseline_values = baseline_metrics(baseline);

    let mut comparison = Comparison {
        model: model_name(results),
        baseline_model: model_name(baseline),
        timestamp: timestamp(now),
        metrics: MetricTable::default(),
        status: OverallStatus::Pass,
        summary: Vec::new(),
    };

    for mapping in mappings {
        let current = current_values
            .get(&mapping.result_key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let threshold = mapping.threshold.unwrap_or(default_threshold);

        let Some(baseline_value) = baseline_values
            .get(&mapping.baseline_key)
            .and_then(Value::as_f64)
        else {
            comparison.summary.push(format!(
                "{} {}: {:.2}% (no baseline)",
                MetricStatus::NoBaseline.symbol(),
                mapping.name,
                current
            ));
            comparison.metrics.insert(
                mapping.result_key.clone(),
                MetricComparison {
                    name: mapping.name.clone(),
                    current,
                    baseline: None,
                    delta: None,
                    threshold: None,
                    status: MetricStatus::NoBaseline,
                    message: "No baseline value available".to_string(),
                },
            );
            continue;
        };

        let delta = current - baseline_value;
        let status = classify(delta, threshold);
        if status == MetricStatus::Fail {
            comparison.status = OverallStatus::Fail;
        }

        let direction = if delta > 0.0 { "improved" } else { "degraded" };
        comparison.summary.push(format!(
            "{} {}: {:.2}% (baseline: {:.2}%, Δ {:+.2}%)",
            status.symbol(),
            mapping.name,
            current,
            baseline_value,
            delta
        ));
        comparison.metrics.insert(
            mapping.result_key.clone(),
            MetricComparison {
                name: mapping.name.clone(),
                current,
                baseline: Some(baseline_value),
                delta: Some(delta),
                threshold: Some(threshold),
                status,
                message: format!(
                    "Current {:.2}% vs baseline {:.2}% ({} by {:.2}%)",
                    current,
                    baseline_value,
                    direction,
                    delta.abs()
                ),
            },
        );
    }

    comparison
}

/// Overwrites the baseline's stored scores with this run's values.
pub fn update_baseline(
    baseline: &mut Value,
    results: &Value,
    mappings: &[MetricMapping],
    run_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let current_values = current_metrics(results);
    let root = baseline
        .as_object_mut()
        .ok_or_else(|| anyhow!("baseline document must be a JSON object"))?;

    {
        let ifeval = child_object(child_object(root, "accuracy")?, "ifeval")?;
        for mapping in mappings {
            ifeval.insert(
                mapping.baseline_key.clone(),
                number_or_zero(current_values.get(&mapping.result_key)),
            );
        }
        ifeval.insert(
            "num_samples".to_string(),
            number_or_zero(current_values.get("num_samples")),
        );
    }

    root.insert("last_updated".to_string(), json!(timestamp(now)));
    if let Some(run_id) = run_id {
        root.insert("run_id".to_string(), json!(run_id));
    }

    for section in ["prefill", "decode", "cached"] {
        if let Some(workload) = results.get(section) {
            let tokens_per_second = workload
                .get("tokens_per_second")
                .cloned()
                .unwrap_or(Value::Null);
            child_object(root, "performance")?
                .insert(format!("{}_tokens_per_second", section), tokens_per_second);
        }
    }

    Ok(())
}

fn child_object<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
) -> Result<&'a mut Map<String, Value>> {
    parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| anyhow!("baseline field `{}` is not an object", key))
}

fn number_or_zero(value: Option<&Value>) -> Value {
    match value {
        Some(value) if value.is_number() => value.clone(),
        _ => json!(0),
    }
}

pub fn load_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("file not found or unreadable: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}
