//! Google Gemini API provider.
//!
//! Key differences from the OpenAI-compatible API:
//! - Auth via the `x-goog-api-key` header
//! - The model is part of the URL: `models/{model}:generateContent`
//! - Output text lives in `candidates[0].content.parts[*].text`
//! - Quota exhaustion is reported as `error.status = "RESOURCE_EXHAUSTED"`,
//!   with the suggested delay in a `RetryInfo` detail

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, warn};

use super::{
    CompletionProvider, TokenCounter, classify_status, classify_transport, http_client,
    retry_after_header,
};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::types::{CompletionResult, GenerationConfig};

/// The default Google Gemini API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROVIDER: &str = "google";

/// Fallback delay when a quota error carries no `RetryInfo`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl GeminiProvider {
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

    fn endpoint_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request_body(prompt: &str, config: &GenerationConfig) -> Value {
        let mut generation = json!({ "temperature": config.temperature });
        if let Some(max_tokens) = config.max_tokens {
            generation["maxOutputTokens"] = json!(max_tokens);
        }
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": generation,
        })
    }

    /// Parse a Gemini response into its text and reported usage.
    ///
    /// A candidate without text parts (e.g. stopped at `MAX_TOKENS` while
    /// thinking) yields empty text rather than an error. A blocked prompt is
    /// a client error: resending it gets the same verdict.
    fn parse_response(body: &Value) -> Result<(String, Option<(usize, usize)>), ProviderError> {
        if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
            return Err(ProviderError::Client {
                provider: PROVIDER.to_string(),
                status: 200,
                message: format!("Prompt blocked: {}", reason),
            });
        }
        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ProviderError::ResponseParse {
                provider: PROVIDER.to_string(),
                message: "Missing 'candidates' in response".to_string(),
            })?;

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                    .filter_map(|p| p["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        if text.is_empty() {
            warn!(
                finish_reason = candidate["finishReason"].as_str().unwrap_or("unknown"),
                "Gemini candidate carried no text"
            );
        }

        let meta = &body["usageMetadata"];
        let usage = match (
            meta["promptTokenCount"].as_u64(),
            meta["candidatesTokenCount"].as_u64(),
        ) {
            (Some(p), Some(c)) => Some((p as usize, c as usize)),
            // Empty candidates omit candidatesTokenCount
            (Some(p), None) if text.is_empty() => Some((p as usize, 0)),
            _ => None,
        };
        Ok((text, usage))
    }

    /// Map an error payload onto the shared taxonomy.
    ///
    /// `RESOURCE_EXHAUSTED` is a rate limit whatever the HTTP status.
    fn map_http_error(status: u16, retry_after: Option<u64>, body: &str, timeout_secs: u64) -> ProviderError {
        let payload = serde_json::from_str::<Value>(body).ok();
        let error = payload.as_ref().map(|v| &v["error"]);
        let message = error
            .and_then(|e| e["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        let exhausted = error.and_then(|e| e["status"].as_str()) == Some("RESOURCE_EXHAUSTED");

        let retry_after_secs = retry_after
            .or_else(|| error.and_then(retry_delay))
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        let status = if exhausted { 429 } else { status };
        classify_status(PROVIDER, status, retry_after_secs, timeout_secs, message)
    }
}

/// Extract `RetryInfo.retryDelay` (e.g. `"37s"`) from an error object.
fn retry_delay(error: &Value) -> Option<u64> {
    error["details"].as_array()?.iter().find_map(|d| {
        let delay = d["retryDelay"].as_str()?;
        let secs: f64 = delay.strip_suffix('s')?.parse().ok()?;
        Some(secs.ceil() as u64)
    })
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<CompletionResult, ProviderError> {
        let url = self.endpoint_url();
        let body = Self::build_request_body(prompt, config);

        debug!(model = %self.model, url = %url, "Sending Gemini completion request");
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e, self.timeout_secs))?;

        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let body_text = response
            .text()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e, self.timeout_secs))?;

        if !status.is_success() {
            return Err(Self::map_http_error(
                status.as_u16(),
                retry_after,
                &body_text,
                self.timeout_secs,
            ));
        }

        let json: Value = serde_json::from_str(&body_text).map_err(|e| ProviderError::ResponseParse {
            provider: PROVIDER.to_string(),
            message: format!("Invalid JSON in response: {}", e),
        })?;
        // Some gateways wrap quota errors in a 200
        if json["error"]["status"].as_str() == Some("RESOURCE_EXHAUSTED") {
            return Err(Self::map_http_error(429, retry_after, &body_text, self.timeout_secs));
        }

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
