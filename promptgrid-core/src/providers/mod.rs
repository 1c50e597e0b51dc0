//! Remote text-generation providers.
//!
//! Provides implementations of the `CompletionProvider` trait for:
//! - Groq (OpenAI-compatible chat completions)
//! - Google Gemini (`generateContent`)
//!
//! [`ProviderClient`] routes a configured `model_id` to its adapter and wraps
//! every call in pacing and bounded retry. Use [`ProviderClient::from_config`]
//! to build one from a [`SweepConfig`].

pub mod gemini;
pub mod groq;
pub mod mock;
pub mod pacer;

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ModelConfig, ProviderConfig, ProviderKind, ProvidersConfig, RetryConfig, SweepConfig};
use crate::error::ProviderError;
use crate::types::{CompletionResult, GenerationConfig, TokenUsage};

pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use mock::{MockProvider, MockReply};
pub use pacer::Pacer;

/// One-shot completion against a single remote model.
///
/// Implementations send exactly one request per call and classify failures
/// into [`ProviderError`]; retry and pacing live in [`ProviderClient`].
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<CompletionResult, ProviderError>;

    /// Backend name used in errors and logs.
    fn provider_name(&self) -> &str;

    /// Provider-side model name.
    fn model_name(&self) -> &str;
}

/// Execute an async operation with exponential backoff retry on retryable errors.
///
/// Makes at most `config.max_attempts` attempts. Rate-limited, transient and
/// timeout errors are retried (rate limits respect the server's
/// `retry_after_secs`); client errors return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt >= attempts {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt - 1, &e);
                warn!(
                    attempt,
                    max = attempts,
                    backoff_ms,
                    kind = %e.kind(),
                    error = %e,
                    "Retrying after retryable provider error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// Compute backoff delay, respecting rate limit retry-after hints.
///
/// The server's hint is clamped to `max_server_delay_ms`.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &ProviderError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let ProviderError::RateLimited {
        retry_after_secs, ..
    } = err
    {
        let requested = retry_after_secs
            .saturating_mul(1000)
            .min(config.max_server_delay_ms);
        return requested.max(computed);
    }
    computed
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter && capped > 0 {
        // Up to 25% on top
        capped + rand::thread_rng().gen_range(0..=capped / 4)
    } else {
        capped
    }
}

// ---------------------------------------------------------------------------
// Shared HTTP classification
// ---------------------------------------------------------------------------

/// Map a non-success HTTP status onto the shared error taxonomy.
pub(crate) fn classify_status(
    provider: &str,
    status: u16,
    retry_after_secs: u64,
    timeout_secs: u64,
    message: String,
) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        },
        408 | 504 => ProviderError::Timeout {
            provider: provider.to_string(),
            timeout_secs,
        },
        s if s >= 500 => ProviderError::Transient {
            provider: provider.to_string(),
            status: Some(s),
            message,
        },
        s => ProviderError::Client {
            provider: provider.to_string(),
            status: s,
            message,
        },
    }
}

/// Map a transport-level failure (no HTTP status) onto the taxonomy.
pub(crate) fn classify_transport(provider: &str, err: &reqwest::Error, timeout_secs: u64) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
            timeout_secs,
        }
    } else {
        ProviderError::Transient {
            provider: provider.to_string(),
            status: None,
            message: format!("Request failed: {}", err),
        }
    }
}

/// Parse a numeric `Retry-After` header.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(secs);
    }
    value.trim().parse::<f64>().ok().map(|s| s.ceil() as u64)
}

/// Build a reqwest client with the provider's timeouts.
pub(crate) fn http_client(provider: &str, timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ProviderError::Transient {
            provider: provider.to_string(),
            status: None,
            message: format!("Failed to build HTTP client: {}", e),
        })
}

// ---------------------------------------------------------------------------
// Token accounting
// ---------------------------------------------------------------------------

/// Local token estimator used when a provider omits usage.
pub struct TokenCounter {
    bpe: Option<tiktoken_rs::CoreBPE>,
}

static SHARED_COUNTER: LazyLock<TokenCounter> = LazyLock::new(TokenCounter::new);

impl TokenCounter {
    /// A `cl100k_base` counter. Falls back to ~4 chars per token if the
    /// encoding can't be loaded.
    pub fn new() -> Self {
        let bpe = match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "cl100k_base unavailable; using character-based token estimate");
                None
            }
        };
        Self { bpe }
    }

    /// Process-wide counter.
    pub fn shared() -> &'static TokenCounter {
        &SHARED_COUNTER
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.len().div_ceil(4),
        }
    }

    /// Use reported counts when present, otherwise estimate both sides.
    pub fn usage(&self, reported: Option<(usize, usize)>, prompt: &str, completion: &str) -> TokenUsage {
        match reported {
            Some((prompt_tokens, completion_tokens)) => TokenUsage {
                prompt_tokens,
                completion_tokens,
                estimated: false,
            },
            None => TokenUsage {
                prompt_tokens: self.count(prompt),
                completion_tokens: self.count(completion),
                estimated: true,
            },
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Resolve the credential for a provider: inline `api_key` first, then the
/// environment variable named by `api_key_env`.
pub fn resolve_api_key(kind: ProviderKind, config: &ProviderConfig) -> Result<String, ProviderError> {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Ok(key.clone());
    }
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::MissingCredential {
            provider: kind.to_string(),
            var: config.api_key_env.clone(),
        })
}

/// Create the adapter for one configured model.
pub fn create_provider(
    model: &ModelConfig,
    providers: &ProvidersConfig,
) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    let config = providers.get(model.provider);
    let api_key = resolve_api_key(model.provider, config)?;
    match model.provider {
        ProviderKind::Groq => Ok(Arc::new(GroqProvider::new(&model.model, config, api_key)?)),
        ProviderKind::Google => Ok(Arc::new(GeminiProvider::new(&model.model, config, api_key)?)),
    }
}

struct Route {
    kind: ProviderKind,
    adapter: Arc<dyn CompletionProvider>,
}

/// Uniform call surface over all configured models.
pub struct ProviderClient {
    routes: HashMap<String, Route>,
    pacers: HashMap<ProviderKind, Arc<Pacer>>,
    retry: RetryConfig,
}

impl ProviderClient {
    /// An empty client; register adapters with [`ProviderClient::register`].
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            routes: HashMap::new(),
            pacers: HashMap::new(),
            retry,
        }
    }

    /// Build adapters and pacers for every configured model.
    ///
    /// Fails on the first model whose credential is missing.
    pub fn from_config(config: &SweepConfig) -> Result<Self, ProviderError> {
        let mut client = Self::new(config.retry.clone());
        for model in &config.models {
            let adapter = create_provider(model, &config.providers)?;
            client.register(&model.id, model.provider, adapter);
        }
        for kind in [ProviderKind::Groq, ProviderKind::Google] {
            client.set_pacer(kind, Pacer::from_config(config.providers.get(kind)));
        }
        Ok(client)
    }

    /// Route `model_id` to `adapter`.
    pub fn register(&mut self, model_id: &str, kind: ProviderKind, adapter: Arc<dyn CompletionProvider>) {
        self.routes.insert(model_id.to_string(), Route { kind, adapter });
    }

    /// Pace all calls to `kind` through `pacer`. Unpaced by default.
    pub fn set_pacer(&mut self, kind: ProviderKind, pacer: Pacer) {
        self.pacers.insert(kind, Arc::new(pacer));
    }

    pub fn provider_kind(&self, model_id: &str) -> Option<ProviderKind> {
        self.routes.get(model_id).map(|r| r.kind)
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Call `model_id` with `prompt`.
    ///
    /// Temperature is always sent as 0.0. Each attempt waits for the
    /// provider's pacer; retryable failures back off per [`RetryConfig`].
    pub async fn call(
        &self,
        model_id: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<CompletionResult, ProviderError> {
        let route = self.routes.get(model_id).ok_or_else(|| ProviderError::UnknownModel {
            model: model_id.to_string(),
        })?;
        if prompt.trim().is_empty() {
            return Err(ProviderError::Client {
                provider: route.adapter.provider_name().to_string(),
                status: 400,
                message: "empty prompt rejected before sending".to_string(),
            });
        }

        let config = GenerationConfig {
            temperature: 0.0,
            max_tokens: config.max_tokens,
        };
        let config = &config;
        let adapter = &route.adapter;
        let pacer = self.pacers.get(&route.kind).map(Arc::as_ref);

        debug!(model = %model_id, provider = %route.kind, "Calling provider");
        with_retry(&self.retry, || async move {
            if let Some(pacer) = pacer {
                pacer.wait_turn().await;
            }
            adapter.complete(prompt, config).await
        })
        .await
    }
}
