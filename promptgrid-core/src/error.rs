//! Error types for the promptgrid core.
//!
//! Uses `thiserror` for public API error types. Provider failures are split
//! into a small retry taxonomy so the orchestrator never branches on which
//! backend produced them.

use std::path::PathBuf;

use crate::types::ExperimentUnit;

/// Top-level error type for the promptgrid core library.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Retry class of a provider failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Transient,
    Client,
    Timeout,
}

impl ErrorKind {
    /// Whether a failure of this class may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Client)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Client => "client",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Errors from remote provider calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited by {provider}, retry after {retry_after_secs}s")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("Transient error from {provider} (status {status:?}): {message}")]
    Transient {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Request rejected by {provider} (status {status}): {message}")]
    Client {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Request to {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("Unreadable response from {provider}: {message}")]
    ResponseParse { provider: String, message: String },

    #[error("No provider adapter for model: {model}")]
    UnknownModel { model: String },

    #[error("Credential for {provider} missing: env var '{var}' not set")]
    MissingCredential { provider: String, var: String },
}

impl ProviderError {
    /// Classify this error into the shared retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::Transient { .. } | ProviderError::ResponseParse { .. } => {
                ErrorKind::Transient
            }
            ProviderError::Timeout { .. } => ErrorKind::Timeout,
            ProviderError::Client { .. }
            | ProviderError::UnknownModel { .. }
            | ProviderError::MissingCredential { .. } => ErrorKind::Client,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Errors from the checkpoint store.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint and result sink disagree: {message}")]
    Inconsistent { message: String },

    #[error("Unit already committed: {unit}")]
    AlreadyCommitted { unit: ExperimentUnit },

    #[error("Corrupt record in {path} at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Errors from loading task data and building prompts.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to parse task file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Task '{task}' has {available} examples, needs {required}")]
    TooFewExamples {
        task: String,
        available: usize,
        required: usize,
    },

    #[error("Cannot build a prompt for an empty question in task '{task}'")]
    EmptyPrompt { task: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration load error: {message}")]
    Load { message: String },
}

/// A type alias for results using the top-level `SweepError`.
pub type Result<T> = std::result::Result<T, SweepError>;
