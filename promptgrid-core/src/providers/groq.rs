//! Groq provider.
//!
//! Groq serves Llama models behind an OpenAI-compatible chat completions
//! endpoint: bearer auth, `choices[0].message.content`, and token counts in
//! `usage`. Rate limits come back as 429 with either a `retry-after` header
//! or a "try again in Xs" hint inside `error.message`.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::debug;

use super::{
    CompletionProvider, TokenCounter, classify_status, classify_transport, http_client,
    retry_after_header,
};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::types::{CompletionResult, GenerationConfig};

/// The default Groq API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

const PROVIDER: &str = "groq";

/// Fallback delay when a 429 carries no usable hint.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

static TRY_AGAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"try again in (?:(\d+)m)?(\d+(?:\.\d+)?)(ms|s)").expect("valid retry hint regex")
});

pub struct GroqProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl GroqProvider {
    /// Create a provider for `model` with an already-resolved API key.
    pub fn new(model: &str, config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client: http_client(PROVIDER, config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn build_request_body(&self, prompt: &str, config: &GenerationConfig) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": config.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// Pull the completion text and reported usage out of a response body.
    fn parse_response(body: &Value) -> Result<(String, Option<(usize, usize)>), ProviderError> {
        let message = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| ProviderError::ResponseParse {
                provider: PROVIDER.to_string(),
                message: "No choices in response".to_string(),
            })?;
        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let usage = body.get("usage").and_then(|u| {
            let prompt = u.get("prompt_tokens")?.as_u64()?;
            let completion = u.get("completion_tokens")?.as_u64()?;
            Some((prompt as usize, completion as usize))
        });
        Ok((text, usage))
    }

    /// Map a non-success response onto the shared taxonomy.
    fn map_http_error(status: u16, retry_after: Option<u64>, body: &str, timeout_secs: u64) -> ProviderError {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")?
                    .get("message")?
                    .as_str()
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| body.to_string());

        let retry_after_secs = retry_after
            .or_else(|| parse_try_again(&message))
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        classify_status(PROVIDER, status, retry_after_secs, timeout_secs, message)
    }
}

/// Parse "Please try again in 1m2.5s" / "try again in 640ms" into whole seconds.
fn parse_try_again(message: &str) -> Option<u64> {
    let caps = TRY_AGAIN.captures(message)?;
    let minutes: f64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let value: f64 = caps.get(2)?.as_str().parse().ok()?;
    let secs = match caps.get(3).map(|m| m.as_str()) {
        Some("ms") => value / 1000.0,
        _ => value,
    };
    Some((minutes * 60.0 + secs).ceil() as u64)
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    async fn complete(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<CompletionResult, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(prompt, config);

        debug!(url = %url, model = %self.model, "Sending Groq completion request");
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e, self.timeout_secs))?;

        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let response_body = response
            .text()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e, self.timeout_secs))?;

        if !status.is_success() {
            return Err(Self::map_http_error(
                status.as_u16(),
                retry_after,
                &response_body,
                self.timeout_secs,
            ));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| ProviderError::ResponseParse {
                provider: PROVIDER.to_string(),
                message: format!("Invalid JSON: {}", e),
            })?;
        let (raw_text, reported) = Self::parse_response(&json)?;
        let latency_ms = started.elapsed().as_millis() as u64;

        Ok(CompletionResult {
            usage: TokenCounter::shared().usage(reported, prompt, &raw_text),
            raw_text,
            latency_ms,
        })
    }

    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;
    use crate::error::ErrorKind;

    #[test]
    fn test_request_body_shape() {
        let provider = GroqProvider::new(
            "llama-3.1-8b-instant",
            &ProvidersConfig::default().groq,
            "k".into(),
        )
        .unwrap();
        let body = provider.build_request_body("Q: hi\nA:", &GenerationConfig::default());
        assert_eq!(body["model"], "llama-3.1-8b-instant");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Q: hi\nA:");
        assert_eq!(body["temperature"], 0.0);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_text_response() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "False" } }],
            "usage": { "prompt_tokens": 42, "completion_tokens": 1 }
        });
        let (text, usage) = GroqProvider::parse_response(&body).unwrap();
        assert_eq!(text, "False");
        assert_eq!(usage, Some((42, 1)));
    }

    #[test]
    fn test_parse_response_without_usage() {
        let body = json!({ "choices": [{ "message": { "content": "(B)" } }] });
        let (_, usage) = GroqProvider::parse_response(&body).unwrap();
        assert!(usage.is_none());
    }

    #[test]
    fn test_parse_response_no_choices() {
        let err = GroqProvider::parse_response(&json!({ "choices": [] })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_http_error_mapping_429_message_hint() {
        let err = GroqProvider::map_http_error(
            429,
            None,
            r#"{"error":{"message":"Rate limit reached. Please try again in 7.66s."}}"#,
            60,
        );
        match err {
            ProviderError::RateLimited {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 8),
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_http_error_mapping_429_header_wins() {
        let err = GroqProvider::map_http_error(
            429,
            Some(2),
            r#"{"error":{"message":"Please try again in 1m3s."}}"#,
            60,
        );
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_http_error_mapping_401() {
        let err = GroqProvider::map_http_error(401, None, r#"{"error":{"message":"Invalid API Key"}}"#, 60);
        match err {
            ProviderError::Client {
                status, message, ..
            } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API Key");
            }
            other => panic!("Expected Client, got {:?}", other),
        }
    }

    #[test]
    fn test_http_error_mapping_500() {
        let err = GroqProvider::map_http_error(500, None, "Internal server error", 60);
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_parse_try_again_variants() {
        assert_eq!(parse_try_again("Please try again in 1m2.5s."), Some(63));
        assert_eq!(parse_try_again("try again in 640ms"), Some(1));
        assert_eq!(parse_try_again("slow down"), None);
    }
}
