//! Scripted provider for tests and dry runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::CompletionProvider;
use crate::error::ProviderError;
use crate::types::{CompletionResult, GenerationConfig, TokenUsage};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(ProviderError),
    /// Never resolves; simulates a call still in flight when the process dies.
    Hang,
}

/// A provider that replays queued replies in order.
///
/// When the queue is empty the fallback reply is used, if set; otherwise the
/// call fails with a transient error.
pub struct MockProvider {
    model: String,
    replies: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<Option<MockReply>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    last_config: Mutex<Option<GenerationConfig>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            last_config: Mutex::new(None),
        }
    }

    /// A mock that answers every call with `text`.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        provider.set_fallback(MockReply::Text(text.to_string()));
        provider
    }

    /// A mock that fails every call with `err`.
    pub fn always_failing(err: ProviderError) -> Self {
        let provider = Self::new();
        provider.set_fallback(MockReply::Error(err));
        provider
    }

    pub fn push(&self, reply: MockReply) {
        lock(&self.replies).push_back(reply);
    }

    pub fn push_text(&self, text: &str) {
        self.push(MockReply::Text(text.to_string()));
    }

    pub fn push_error(&self, err: ProviderError) {
        self.push(MockReply::Error(err));
    }

    pub fn set_fallback(&self, reply: MockReply) {
        *lock(&self.fallback) = Some(reply);
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn last_config(&self) -> Option<GenerationConfig> {
        lock(&self.last_config).clone()
    }

    fn next_reply(&self) -> Option<MockReply> {
        lock(&self.replies)
            .pop_front()
            .or_else(|| lock(&self.fallback).clone())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<CompletionResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(prompt.to_string());
        *lock(&self.last_config) = Some(config.clone());

        match self.next_reply() {
            Some(MockReply::Text(text)) => Ok(CompletionResult {
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    estimated: false,
                },
                raw_text: text,
                latency_ms: 1,
            }),
            Some(MockReply::Error(err)) => Err(err),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(ProviderError::Transient {
                provider: "mock".to_string(),
                status: None,
                message: "no scripted reply left".to_string(),
            }),
        }
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
