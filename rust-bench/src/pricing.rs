//! Rewrites per-model prices inside the `MODELS` block of the pricing page.
//!
//! The page is treated as plain text: entries look like
//! `"model-key": { ... backendName: "org/Model", inputPricePerM: 0.12, ... }`
//! and only the numeric fields of the matched entry are touched.

use std::ops::Range;

use anyhow::{anyhow, Result};
use serde_json::Value;

const MODELS_OPEN: &str = "const MODELS = {";
const BACKEND_FIELD: &str = "backendName:";
const INPUT_FIELD: &str = "inputPricePerM:";
const OUTPUT_FIELD: &str = "outputPricePerM:";
const CACHED_FIELD: &str = "cachedInputPricePerM:";

/// Prices in dollars per million tokens, taken from a results document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingUpdate {
    pub input_price: f64,
    pub output_price: f64,
    pub cached_input_price: Option<f64>,
}

impl PricingUpdate {
    pub fn from_results(results: &Value) -> Result<Self> {
        Ok(Self {
            input_price: workload_cost(results, "prefill")?.ok_or_else(|| {
                anyhow!("results have no finite prefill.cost_per_million_tokens")
            })?,
            output_price: workload_cost(results, "decode")?.ok_or_else(|| {
                anyhow!("results have no finite decode.cost_per_million_tokens")
            })?,
            cached_input_price: workload_cost(results, "cached")?,
        })
    }
}

fn workload_cost(results: &Value, section: &str) -> Result<Option<f64>> {
    let Some(workload) = results.get(section) else {
        return Ok(None);
    };
    match workload.get("cost_per_million_tokens") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| anyhow!("{}.cost_per_million_tokens is not a number", section)),
    }
}

/// One `"key": { ... }` entry; `block` spans the braces inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry<'a> {
    key: &'a str,
    block: Range<usize>,
}

/// Every `"key": {` in `text` whose block closes at the next `}`.
fn entries(text: &str) -> Vec<Entry<'_>> {
    let mut found = Vec::new();
    for (brace, _) in text.match_indices('{') {
        let before = text[..brace].trim_end();
        let Some(before) = before.strip_suffix(':') else {
            continue;
        };
        let Some(quoted) = before.strip_suffix('"') else {
            continue;
        };
        let Some(open) = quoted.rfind('"') else {
            continue;
        };
        let key = &quoted[open + 1..];
        if key.is_empty() {
            continue;
        }
        let Some(close) = text[brace..].find('}') else {
            continue;
        };
        found.push(Entry {
            key,
            block: brace..brace + close + 1,
        });
    }
    found
}

fn has_backend_name(block: &str, backend_name: &str) -> bool {
    let expected = format!("\"{}\"", backend_name);
    block
        .match_indices(BACKEND_FIELD)
        .any(|(idx, _)| block[idx + BACKEND_FIELD.len()..].trim_start().starts_with(&expected))
}

/// Contents of `const MODELS = { ... };`, up to the first semicolon.
fn models_block(html: &str) -> Option<&str> {
    let start = html.find(MODELS_OPEN)? + MODELS_OPEN.len();
    let rest = &html[start..];
    let segment = &rest[..rest.find(';')?];
    segment.strip_suffix('}')
}

/// Finds the entry key for `backend_name`.
///
/// An entry whose own block declares `backendName: "<backend_name>"` wins.
/// Otherwise the first `MODELS` key whose dash/space separated parts longer
/// than two characters all occur in the lower-cased backend name.
pub fn find_model_key(backend_name: &str, html: &str) -> Option<String> {
    if let Some(entry) = entries(html)
        .into_iter()
        .find(|entry| has_backend_name(&html[entry.block.clone()], backend_name))
    {
        return Some(entry.key.to_string());
    }

    let backend_lower = backend_name.to_lowercase();
    entries(models_block(html)?)
        .into_iter()
        .find(|entry| {
            let key = entry.key.to_lowercase().replace('-', " ");
            let parts: Vec<&str> = key
                .split_whitespace()
                .filter(|part| part.chars().count() > 2)
                .collect();
            !parts.is_empty() && parts.iter().all(|part| backend_lower.contains(part))
        })
        .map(|entry| entry.key.to_string())
}

fn entry_for<'a>(html: &'a str, model_key: &str) -> Option<Entry<'a>> {
    entries(html).into_iter().find(|entry| entry.key == model_key)
}

/// The `"key": { ... }` text of one entry, as written in the page.
pub fn model_block<'a>(html: &'a str, model_key: &str) -> Option<&'a str> {
    let entry = entry_for(html, model_key)?;
    let start = html[..entry.block.start].rfind(&format!("\"{}\"", model_key))?;
    Some(&html[start..entry.block.end])
}

/// Span of `field` plus its `[0-9.]+` value at or after `from`.
fn find_numeric_field(text: &str, field: &str, from: usize) -> Option<Range<usize>> {
    let mut cursor = from;
    while let Some(offset) = text[cursor..].find(field) {
        let start = cursor + offset;
        let after_field = start + field.len();
        let rest = &text[after_field..];
        let value_start = after_field + (rest.len() - rest.trim_start().len());
        let value_len = text[value_start..]
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len() - value_start);
        if value_len > 0 {
            return Some(start..value_start + value_len);
        }
        cursor = after_field;
    }
    None
}

/// Replaces every `field: <number>` in `text` with `field: <value>`.
fn replace_numeric_field(text: &str, field: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(span) = find_numeric_field(text, field, cursor) {
        out.push_str(&text[cursor..span.start]);
        out.push_str(field);
        out.push(' ');
        out.push_str(value);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Adds `cachedInputPricePerM` right after each `inputPricePerM: <n>,`.
fn insert_cached_price(text: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len() + 48);
    let mut cursor = 0;
    while let Some(span) = find_numeric_field(text, INPUT_FIELD, cursor) {
        if !text[span.end..].starts_with(',') {
            out.push_str(&text[cursor..span.end]);
            cursor = span.end;
            continue;
        }
        out.push_str(&text[cursor..span.end + 1]);
        out.push_str("\n        ");
        out.push_str(CACHED_FIELD);
        out.push(' ');
        out.push_str(value);
        out.push(',');
        cursor = span.end + 1;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Returns the page with `model_key`'s prices rewritten, or `None` when the
/// entry is not present.
pub fn update_model_pricing(
    html: &str,
    model_key: &str,
    update: &PricingUpdate,
) -> Option<String> {
    let entry = entry_for(html, model_key)?;
    let block = &html[entry.block.clone()];

    let input = format!("{:.2}", update.input_price);
    let output = format!("{:.2}", update.output_price);
    let mut updated = replace_numeric_field(block, INPUT_FIELD, &input);
    updated = replace_numeric_field(&updated, OUTPUT_FIELD, &output);

    if let Some(cached) = update.cached_input_price {
        let cached = format!("{:.4}", cached);
        updated = if updated.contains(CACHED_FIELD) {
            replace_numeric_field(&updated, CACHED_FIELD, &cached)
        } else {
            insert_cached_price(&updated, &cached)
        };
    }

    let mut page = String::with_capacity(html.len() + updated.len());
    page.push_str(&html[..entry.block.start]);
    page.push_str(&updated);
    page.push_str(&html[entry.block.end..]);
    Some(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"<script>
const MODELS = {
    "llama-8b-instruct": {
        name: "Llama 3.1 8B Instruct",
        backendName: "meta-llama/Llama-3.1-8B-Instruct",
        inputPricePerM: 0.10,
        outputPricePerM: 0.50,
    },
    "qwen-32b": {
        name: "Qwen 2.5 32B",
        backendName: "Qwen/Qwen2.5-32B-Instruct",
        inputPricePerM: 0.20,
        cachedInputPricePerM: 0.0100,
        outputPricePerM: 0.90,
    }
};
const OTHER = { "x": { a: 1 } };
</script>"#;

    fn update(cached: Option<f64>) -> PricingUpdate {
        PricingUpdate {
            input_price: 0.0123,
            output_price: 1.5,
            cached_input_price: cached,
        }
    }

    #[test]
    fn finds_key_by_backend_name() {
        assert_eq!(
            find_model_key("meta-llama/Llama-3.1-8B-Instruct", PAGE).as_deref(),
            Some("llama-8b-instruct")
        );
        assert_eq!(
            find_model_key("Qwen/Qwen2.5-32B-Instruct", PAGE).as_deref(),
            Some("qwen-32b")
        );
    }

    #[test]
    fn falls_back_to_key_parts_inside_models_block() {
        let page = PAGE.replace("        backendName: \"meta-llama/Llama-3.1-8B-Instruct\",\n", "");
        assert_eq!(
            find_model_key("meta-llama/Llama-3.1-8B-Instruct", &page).as_deref(),
            Some("llama-8b-instruct")
        );
        assert_eq!(find_model_key("mistralai/Mistral-7B", &page), None);
    }

    #[test]
    fn fallback_ignores_entries_outside_models_block() {
        assert_eq!(find_model_key("x-ray", "const OTHER = { \"x-ray\": { a: 1 } };"), None);
    }

    #[test]
    fn rewrites_prices_and_inserts_cached_field() {
        let page =
            update_model_pricing(PAGE, "llama-8b-instruct", &update(Some(0.00456))).unwrap();
        let block = model_block(&page, "llama-8b-instruct").unwrap();
        assert!(block.contains("inputPricePerM: 0.01,\n        cachedInputPricePerM: 0.0046,"));
        assert!(block.contains("outputPricePerM: 1.50,"));

        let untouched = model_block(&page, "qwen-32b").unwrap();
        assert!(untouched.contains("inputPricePerM: 0.20,"));
        assert!(untouched.contains("cachedInputPricePerM: 0.0100,"));
    }

    #[test]
    fn rewrites_existing_cached_field_in_place() {
        let page = update_model_pricing(PAGE, "qwen-32b", &update(Some(0.25))).unwrap();
        let block = model_block(&page, "qwen-32b").unwrap();
        assert_eq!(block.matches(CACHED_FIELD).count(), 1);
        assert!(block.contains("cachedInputPricePerM: 0.2500,"));
        assert!(block.contains("inputPricePerM: 0.01,"));
    }

    #[test]
    fn without_cached_price_leaves_cached_field_alone() {
        let page = update_model_pricing(PAGE, "llama-8b-instruct", &update(None)).unwrap();
        assert!(!model_block(&page, "llama-8b-instruct").unwrap().contains(CACHED_FIELD));
    }

    #[test]
    fn unknown_key_is_none() {
        assert_eq!(update_model_pricing(PAGE, "missing", &update(None)), None);
    }

    #[test]
    fn same_prices_leave_page_unchanged() {
        let current = PricingUpdate {
            input_price: 0.10,
            output_price: 0.50,
            cached_input_price: None,
        };
        assert_eq!(
            update_model_pricing(PAGE, "llama-8b-instruct", &current).as_deref(),
            Some(PAGE)
        );
    }

    #[test]
    fn pricing_update_requires_prefill_and_decode_costs() {
        let results = json!({
            "prefill": {"cost_per_million_tokens": 0.02},
            "decode": {"cost_per_million_tokens": 1.1},
        });
        let parsed = PricingUpdate::from_results(&results).unwrap();
        assert_eq!(parsed.input_price, 0.02);
        assert_eq!(parsed.output_price, 1.1);
        assert_eq!(parsed.cached_input_price, None);

        let infinite = json!({
            "prefill": {"cost_per_million_tokens": null},
            "decode": {"cost_per_million_tokens": 1.1},
        });
        assert!(PricingUpdate::from_results(&infinite).is_err());

        let wrong_type = json!({
            "prefill": {"cost_per_million_tokens": "cheap"},
            "decode": {"cost_per_million_tokens": 1.1},
        });
        assert!(PricingUpdate::from_results(&wrong_type).is_err());
    }
}
