//! Configuration system for promptgrid.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> CLI overrides (applied by the caller).
//! Configuration is loaded from `~/.config/promptgrid/config.toml` and/or
//! `promptgrid.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{AnswerFormat, Technique};

/// Name of the workspace-local configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "promptgrid.toml";

/// Top-level configuration for a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Models in enumeration order (outermost loop).
    pub models: Vec<ModelConfig>,
    /// Techniques in enumeration order.
    pub techniques: Vec<Technique>,
    /// Tasks in enumeration order.
    pub tasks: Vec<TaskSpec>,
    pub parameters: ParametersConfig,
    pub paths: PathsConfig,
    pub providers: ProvidersConfig,
    pub retry: RetryConfig,
    pub run: RunConfig,
}

/// The two supported remote backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Google,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Groq => f.write_str("groq"),
            ProviderKind::Google => f.write_str("google"),
        }
    }
}

/// A model participating in the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Short identifier used in result rows (e.g. "llama-8b").
    pub id: String,
    pub provider: ProviderKind,
    /// Provider-side model name (e.g. "llama-3.1-8b-instant").
    pub model: String,
}

/// A task participating in the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    /// Answer format; inferred from gold targets when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<AnswerFormat>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, format: Option<AnswerFormat>) -> Self {
        Self {
            id: id.into(),
            format,
        }
    }
}

/// Sampling and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersConfig {
    /// Test examples drawn per task.
    pub examples_per_task: usize,
    /// Demonstrations used by few-shot prompts.
    pub few_shot_examples: usize,
    /// Seed for the deterministic example split.
    pub seed: u64,
    /// Sampling temperature. Calls are always sent at 0.0; other values only warn.
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            examples_per_task: 10,
            few_shot_examples: 3,
            seed: 42,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

/// Input and output locations. Relative paths resolve against the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub tasks_dir: PathBuf,
    pub cot_dir: PathBuf,
    pub results: PathBuf,
    pub checkpoint: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("data/bbh/bbh"),
            cot_dir: PathBuf::from("data/bbh/cot-prompts"),
            results: PathBuf::from("data/processed/results.jsonl"),
            checkpoint: PathBuf::from("data/checkpoints/checkpoint.jsonl"),
            logs: None,
        }
    }
}

/// Connection and pacing settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable holding the bearer credential.
    pub api_key_env: String,
    /// Inline credential; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Minimum spacing between outbound calls.
    pub min_interval_ms: u64,
    /// Sustained request quota per minute (0 = unlimited).
    pub requests_per_minute: usize,
    /// Upper bound on concurrent requests against this provider.
    ///
    /// Each provider is served by a single in-order worker, so at most one
    /// request is in flight per provider and values above 1 change nothing.
    pub max_concurrent: usize,
}

/// Per-backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub groq: ProviderConfig,
    pub google: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Groq => &self.groq,
            ProviderKind::Google => &self.google,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            groq: ProviderConfig {
                api_key_env: "GROQ_API_KEY".to_string(),
                api_key: None,
                base_url: None,
                timeout_secs: 60,
                min_interval_ms: 2_000,
                requests_per_minute: 30,
                max_concurrent: 1,
            },
            google: ProviderConfig {
                api_key_env: "GOOGLE_API_KEY".to_string(),
                api_key: None,
                base_url: None,
                timeout_secs: 120,
                min_interval_ms: 15_000,
                requests_per_minute: 4,
                max_concurrent: 1,
            },
        }
    }
}

/// Bounded exponential backoff for retryable provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
    /// Upper bound on a server-requested rate-limit delay.
    #[serde(default = "default_max_server_delay_ms")]
    pub max_server_delay_ms: u64,
}

fn default_max_server_delay_ms() -> u64 {
    120_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 4_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            max_server_delay_ms: default_max_server_delay_ms(),
        }
    }
}

/// Execution mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run one worker per provider concurrently instead of one stream overall.
    pub parallel_providers: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            models: vec![
                ModelConfig {
                    id: "llama-8b".to_string(),
                    provider: ProviderKind::Groq,
                    model: "llama-3.1-8b-instant".to_string(),
                },
                ModelConfig {
                    id: "llama-70b".to_string(),
                    provider: ProviderKind::Groq,
                    model: "llama-3.3-70b-versatile".to_string(),
                },
                ModelConfig {
                    id: "gemini-pro".to_string(),
                    provider: ProviderKind::Google,
                    model: "gemini-2.5-pro".to_string(),
                },
            ],
            techniques: Technique::ALL.to_vec(),
            tasks: vec![
                TaskSpec::new("date_understanding", Some(AnswerFormat::MultipleChoiceLetter)),
                TaskSpec::new("boolean_expressions", Some(AnswerFormat::Boolean)),
                TaskSpec::new("geometric_shapes", Some(AnswerFormat::MultipleChoiceLetter)),
                TaskSpec::new(
                    "tracking_shuffled_objects_five_objects",
                    Some(AnswerFormat::MultipleChoiceLetter),
                ),
                TaskSpec::new("word_sorting", Some(AnswerFormat::FreeTextSequence)),
            ],
            parameters: ParametersConfig::default(),
            paths: PathsConfig::default(),
            providers: ProvidersConfig::default(),
            retry: RetryConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Validate this config.
    ///
    /// Returns an error for configurations the sweep cannot run with, otherwise
    /// a list of human-readable warnings (possibly empty).
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid { message };

        if self.models.is_empty() {
            return Err(invalid("no models configured".to_string()));
        }
        let mut seen = HashSet::new();
        for m in &self.models {
            if !seen.insert(m.id.as_str()) {
                return Err(invalid(format!("duplicate model id '{}'", m.id)));
            }
        }
        if self.techniques.is_empty() {
            return Err(invalid("no techniques configured".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(invalid("no tasks configured".to_string()));
        }
        if self.parameters.examples_per_task == 0 {
            return Err(invalid("parameters.examples_per_task must be > 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be >= 1".to_string()));
        }

        let mut warnings = Vec::new();
        if self.parameters.temperature != 0.0 {
            warnings.push(format!(
                "parameters.temperature = {} is ignored; calls are always sent at 0.0",
                self.parameters.temperature
            ));
        }
        if self.techniques.contains(&Technique::FewShot) && self.parameters.few_shot_examples == 0
        {
            warnings.push(
                "few-shot technique configured with few_shot_examples = 0; prompts will carry no demonstrations"
                    .to_string(),
            );
        }
        for kind in [ProviderKind::Groq, ProviderKind::Google] {
            match self.providers.get(kind).max_concurrent {
                0 => warnings.push(format!(
                    "providers.{}.max_concurrent = 0 is treated as 1",
                    kind
                )),
                1 => {}
                n => warnings.push(format!(
                    "providers.{}.max_concurrent = {} has no effect; each provider runs one request at a time",
                    kind, n
                )),
            }
        }
        Ok(warnings)
    }

    /// Resolve relative paths against `workspace`.
    pub fn resolve_paths(&mut self, workspace: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = workspace.join(&*p);
            }
        };
        resolve(&mut self.paths.tasks_dir);
        resolve(&mut self.paths.cot_dir);
        resolve(&mut self.paths.results);
        resolve(&mut self.paths.checkpoint);
        if let Some(logs) = self.paths.logs.as_mut() {
            resolve(logs);
        }
    }

    /// Look up a configured model by id.
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `PROMPTGRID_`, `__` separates levels)
/// 2. Explicit config file, or workspace-local `promptgrid.toml`
/// 3. User config (`~/.config/promptgrid/config.toml`)
/// 4. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<SweepConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SweepConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "promptgrid", "promptgrid") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::Load {
                    message: format!("config file not found: {}", path.display()),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    // Environment variables (PROMPTGRID_PARAMETERS__SEED, PROMPTGRID_RUN__PARALLEL_PROVIDERS, ...)
    figment = figment.merge(Env::prefixed("PROMPTGRID_").split("__"));

    figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SweepConfig::default();
        assert_eq!(config.models.len(), 3);
        assert_eq!(config.models[2].provider, ProviderKind::Google);
        assert_eq!(config.techniques, Technique::ALL.to_vec());
        assert_eq!(config.tasks.len(), 5);
        assert_eq!(config.parameters.examples_per_task, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.run.parallel_providers);
    }

    #[test]
    fn test_default_config_is_valid() {
        let warnings = SweepConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = SweepConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: SweepConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.models, config.models);
        assert_eq!(back.tasks, config.tasks);
        assert_eq!(back.providers.google.min_interval_ms, 15_000);
    }

    #[test]
    fn test_validate_rejects_duplicate_model() {
        let mut config = SweepConfig::default();
        config.models.push(config.models[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate model id 'llama-8b'"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = SweepConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_warns_on_temperature() {
        let mut config = SweepConfig::default();
        config.parameters.temperature = 0.7;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("temperature"));
    }

    #[test]
    fn test_validate_warns_on_ineffective_concurrency() {
        let mut config = SweepConfig::default();
        config.providers.google.max_concurrent = 4;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("providers.google.max_concurrent = 4 has no effect"));

        config.providers.google.max_concurrent = 1;
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_paths_keeps_absolute() {
        let mut config = SweepConfig::default();
        config.paths.results = PathBuf::from("/abs/results.jsonl");
        config.resolve_paths(Path::new("/ws"));
        assert_eq!(config.paths.results, PathBuf::from("/abs/results.jsonl"));
        assert_eq!(
            config.paths.checkpoint,
            PathBuf::from("/ws/data/checkpoints/checkpoint.jsonl")
        );
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"
techniques = ["zero-shot"]

[[models]]
id = "small"
provider = "groq"
model = "llama-3.1-8b-instant"

[[tasks]]
id = "boolean_expressions"
format = "boolean"

[parameters]
examples_per_task = 2
few_shot_examples = 0
seed = 7
temperature = 0.0

[retry]
max_attempts = 5
initial_backoff_ms = 10
max_backoff_ms = 100
backoff_multiplier = 2.0
jitter = false
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].id, "small");
        assert_eq!(config.techniques, vec![Technique::ZeroShot]);
        assert_eq!(config.tasks[0].format, Some(AnswerFormat::Boolean));
        assert_eq!(config.parameters.seed, 7);
        assert_eq!(config.retry.max_attempts, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.providers.groq.api_key_env, "GROQ_API_KEY");
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let err = load_config(None, Some(Path::new("/nonexistent/promptgrid.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }
}
