//! Wire types for the OpenAI-compatible chat completion endpoint.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatCompletionRequest {
    /// Deterministic request: temperature is pinned to zero.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            temperature: 0.0,
        }
    }
}

/// The subset of a chat completion response this crate reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    pub fn prompt_tokens(&self) -> u64 {
        self.usage.as_ref().map_or(0, |usage| usage.prompt_tokens)
    }

    pub fn completion_tokens(&self) -> u64 {
        self.usage.as_ref().map_or(0, |usage| usage.completion_tokens)
    }

    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_openai_shape() {
        let request = ChatCompletionRequest::new("llama", vec![ChatMessage::user("hi")], 16);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "llama",
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 16,
                "temperature": 0.0,
            })
        );
    }

    #[test]
    fn missing_usage_counts_as_zero_tokens() {
        let response: ChatCompletionResponse =
            serde_json::from_value(json!({"id": "cmpl-1", "choices": []})).unwrap();
        assert_eq!(response.prompt_tokens(), 0);
        assert_eq!(response.completion_tokens(), 0);
        assert_eq!(response.first_content(), None);
    }

    #[test]
    fn reads_usage_and_first_choice() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "hello"}},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }))
        .unwrap();
        assert_eq!(response.prompt_tokens(), 12);
        assert_eq!(response.completion_tokens(), 3);
        assert_eq!(response.first_content(), Some("hello"));
    }
}
