//! # Promptgrid Core
//!
//! Core library for promptgrid, a resumable sweep of prompting techniques
//! across hosted LLMs and reasoning tasks.
//! Provides the provider client, answer extraction cascade, checkpoint
//! store, sweep orchestrator, and reporting.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod persistence;
pub mod prompt;
pub mod providers;
pub mod report;
pub mod scoring;
pub mod tasks;
pub mod types;

// Re-export commonly used types at the crate root.
pub use checkpoint::{CheckpointStore, OpenMode, RecoveryReport, read_records};
pub use config::{
    ModelConfig, ProviderConfig, ProviderKind, RetryConfig, SweepConfig, TaskSpec, load_config,
};
pub use error::{
    CheckpointError, ConfigError, ErrorKind, ProviderError, Result, SweepError, TaskError,
};
pub use extract::{AnswerSpec, extract};
pub use orchestrator::{Orchestrator, Plan, RunContext, RunSummary};
pub use providers::{CompletionProvider, MockProvider, MockReply, ProviderClient};
pub use report::{GroupStats, export_csv, render_table, summarize};
pub use types::{
    AnswerFormat, CompletionResult, Example, ExperimentUnit, ExtractionMethod, GenerationConfig,
    PredictedAnswer, ResultRecord, Task, Technique, TokenUsage,
};
