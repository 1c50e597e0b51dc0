//! Sweep orchestration.
//!
//! The orchestrator enumerates the grid in a fixed order (model, then
//! technique, then task, then example index), skips units the checkpoint
//! store already holds, and drives each remaining unit through
//! prompt → provider → extraction → scoring → commit.
//!
//! Provider failures that survive retry become terminal rows in the sink so
//! the sweep always terminates. Store and I/O errors are fatal and abort the run.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::{ProviderKind, SweepConfig};
use crate::error::{ErrorKind, ProviderError, SweepError, TaskError};
use crate::extract::{AnswerSpec, extract};
use crate::prompt::{PromptContext, build_prompt};
use crate::providers::ProviderClient;
use crate::scoring::is_correct;
use crate::tasks::{ExampleSplit, load_cot_exemplar, load_task, split_examples};
use crate::types::{
    CompletionResult, Example, ExperimentUnit, GenerationConfig, PredictedAnswer, ResultRecord,
    Task, Technique,
};

/// Mutable run state guarded by one lock: the store and the units claimed by workers.
struct Ledger {
    store: CheckpointStore,
    in_flight: HashSet<ExperimentUnit>,
}

/// Everything one sweep invocation owns.
///
/// Created once per process run and closed on both normal completion and
/// interrupted exit.
pub struct RunContext {
    run_id: String,
    ledger: Mutex<Ledger>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Wrap an opened store with a fresh run id.
    pub fn new(store: CheckpointStore) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            ledger: Mutex::new(Ledger {
                store,
                in_flight: HashSet::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Open the store at the given paths in strict mode.
    pub fn open(results_path: &Path, checkpoint_path: &Path) -> Result<Self, SweepError> {
        Ok(Self::new(CheckpointStore::open(results_path, checkpoint_path)?))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Token that stops new units from starting when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of committed units.
    pub async fn completed(&self) -> usize {
        self.ledger.lock().await.store.len()
    }

    /// Fsync both files and release the store.
    pub async fn close(self) -> Result<(), SweepError> {
        let ledger = self.ledger.into_inner();
        if !ledger.in_flight.is_empty() {
            warn!(
                in_flight = ledger.in_flight.len(),
                "Closing with uncommitted in-flight units; they will be retried next run"
            );
        }
        ledger.store.sync()
    }
}

/// The grid split into done and remaining units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub total: usize,
    pub done: usize,
    /// Remaining units in enumeration order.
    pub remaining: Vec<ExperimentUnit>,
}

/// Outcome counts for one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub planned: usize,
    /// Units already committed by an earlier run.
    pub skipped: usize,
    /// Units committed by this run, including terminal failures.
    pub committed: usize,
    pub correct: usize,
    /// Answered units the extractor found nothing in; failures are counted separately.
    pub empty_predictions: usize,
    pub failures: BTreeMap<ErrorKind, usize>,
    /// Distinct client-error messages, in first-seen order.
    pub client_errors: Vec<String>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn total_failures(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn has_client_errors(&self) -> bool {
        self.failures.get(&ErrorKind::Client).copied().unwrap_or(0) > 0
    }

    fn absorb(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Committed {
                correct,
                empty,
                failure,
            } => {
                self.committed += 1;
                self.correct += usize::from(correct);
                self.empty_predictions += usize::from(empty);
                if let Some((kind, message)) = failure {
                    *self.failures.entry(kind).or_default() += 1;
                    if kind == ErrorKind::Client && !self.client_errors.contains(&message) {
                        self.client_errors.push(message);
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
enum UnitOutcome {
    Skipped,
    Committed {
        correct: bool,
        empty: bool,
        failure: Option<(ErrorKind, String)>,
    },
}

/// A task with its fixed split and optional chain-of-thought exemplar.
struct PreparedTask {
    task: Task,
    split: ExampleSplit,
    cot_exemplar: Option<String>,
}

pub struct Orchestrator {
    config: SweepConfig,
    client: ProviderClient,
    tasks: HashMap<String, PreparedTask>,
    lanes: HashMap<ProviderKind, Semaphore>,
    generation: GenerationConfig,
}

impl Orchestrator {
    /// Load every configured task and fix its example split.
    ///
    /// Missing task files, short tasks, empty questions, and missing
    /// chain-of-thought exemplars (when `cot` is configured) fail here,
    /// before any provider call.
    pub fn new(config: SweepConfig, client: ProviderClient) -> Result<Self, SweepError> {
        let params = &config.parameters;
        let wants_cot = config.techniques.contains(&Technique::ChainOfThought);

        let mut tasks = HashMap::new();
        for spec in &config.tasks {
            let task = load_task(&config.paths.tasks_dir, spec)?;
            let split = split_examples(
                &task,
                params.examples_per_task,
                params.few_shot_examples,
                params.seed,
            )?;
            if split.test.iter().any(|e| e.input.trim().is_empty()) {
                return Err(TaskError::EmptyPrompt {
                    task: spec.id.clone(),
                }
                .into());
            }
            let cot_exemplar = if wants_cot {
                Some(load_cot_exemplar(&config.paths.cot_dir, &spec.id)?)
            } else {
                None
            };
            tasks.insert(
                spec.id.clone(),
                PreparedTask {
                    task,
                    split,
                    cot_exemplar,
                },
            );
        }

        let lanes = [ProviderKind::Groq, ProviderKind::Google]
            .into_iter()
            .map(|kind| {
                let permits = config.providers.get(kind).max_concurrent.max(1);
                (kind, Semaphore::new(permits))
            })
            .collect();

        let generation = GenerationConfig {
            temperature: 0.0,
            max_tokens: config.parameters.max_tokens,
        };

        Ok(Self {
            config,
            client,
            tasks,
            lanes,
            generation,
        })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// The full grid in enumeration order.
    pub fn enumerate_units(&self) -> Vec<ExperimentUnit> {
        let n = self.config.parameters.examples_per_task;
        let mut units = Vec::with_capacity(
            self.config.models.len() * self.config.techniques.len() * self.config.tasks.len() * n,
        );
        for model in &self.config.models {
            for &technique in &self.config.techniques {
                for task in &self.config.tasks {
                    for example_index in 0..n {
                        units.push(ExperimentUnit::new(
                            model.id.clone(),
                            technique,
                            task.id.clone(),
                            example_index,
                        ));
                    }
                }
            }
        }
        units
    }

    /// Split the grid into done and remaining units against `store`.
    pub fn plan(&self, store: &CheckpointStore) -> Plan {
        let units = self.enumerate_units();
        let total = units.len();
        let remaining: Vec<ExperimentUnit> =
            units.into_iter().filter(|u| !store.is_done(u)).collect();
        Plan {
            total,
            done: total - remaining.len(),
            remaining,
        }
    }

    /// Plan against the store held by a run context.
    pub async fn plan_for(&self, ctx: &RunContext) -> Plan {
        let ledger = ctx.ledger.lock().await;
        self.plan(&ledger.store)
    }

    /// Run every remaining unit, resuming from whatever `ctx` already holds.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary, SweepError> {
        let units = self.enumerate_units();
        let plan = self.plan_for(ctx).await;
        info!(
            run_id = %ctx.run_id,
            total = plan.total,
            done = plan.done,
            remaining = plan.remaining.len(),
            parallel = self.config.run.parallel_providers,
            "Starting sweep"
        );

        let mut summary = RunSummary {
            run_id: ctx.run_id.clone(),
            planned: units.len(),
            ..Default::default()
        };

        let streams: Vec<Vec<ExperimentUnit>> = if self.config.run.parallel_providers {
            let mut by_kind: BTreeMap<ProviderKind, Vec<ExperimentUnit>> = BTreeMap::new();
            for unit in units {
                let kind = self.provider_kind(&unit.model_id)?;
                by_kind.entry(kind).or_default().push(unit);
            }
            by_kind.into_values().collect()
        } else {
            vec![units]
        };

        let workers = streams.iter().map(|stream| self.worker(ctx, stream));
        for outcomes in futures::future::try_join_all(workers).await? {
            for outcome in outcomes {
                summary.absorb(outcome);
            }
        }
        summary.cancelled = ctx.is_cancelled();

        info!(
            run_id = %ctx.run_id,
            committed = summary.committed,
            skipped = summary.skipped,
            correct = summary.correct,
            empty = summary.empty_predictions,
            failures = summary.total_failures(),
            cancelled = summary.cancelled,
            "Sweep finished"
        );
        Ok(summary)
    }

    /// Process `units` one at a time, in order, until done or cancelled.
    async fn worker(&self, ctx: &RunContext, units: &[ExperimentUnit]) -> Result<Vec<UnitOutcome>, SweepError> {
        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            if ctx.is_cancelled() {
                info!(next = %unit, "Cancellation requested; not starting further units");
                break;
            }
            outcomes.push(self.process_unit(ctx, unit).await?);
        }
        Ok(outcomes)
    }

    async fn process_unit(&self, ctx: &RunContext, unit: &ExperimentUnit) -> Result<UnitOutcome, SweepError> {
        {
            let mut ledger = ctx.ledger.lock().await;
            if ledger.store.is_done(unit) || !ledger.in_flight.insert(unit.clone()) {
                return Ok(UnitOutcome::Skipped);
            }
        }

        let executed = self.execute(ctx, unit).await;

        let mut ledger = ctx.ledger.lock().await;
        ledger.in_flight.remove(unit);
        let (record, outcome) = executed?;
        ledger.store.commit(unit, &record)?;
        Ok(outcome)
    }

    /// Build, call, extract, and score one unit. Returns the row to commit.
    async fn execute(
        &self,
        ctx: &RunContext,
        unit: &ExperimentUnit,
    ) -> Result<(ResultRecord, UnitOutcome), SweepError> {
        let prepared = self.tasks.get(&unit.task_id).ok_or_else(|| TaskError::NotFound {
            path: self.config.paths.tasks_dir.join(format!("{}.json", unit.task_id)),
        })?;
        let example = prepared.split.test.get(unit.example_index).ok_or_else(|| {
            TaskError::TooFewExamples {
                task: unit.task_id.clone(),
                available: prepared.split.test.len(),
                required: unit.example_index + 1,
            }
        })?;
        let prompt = build_prompt(
            unit.technique,
            &example.input,
            PromptContext {
                task_id: &unit.task_id,
                demos: &prepared.split.demos,
                cot_exemplar: prepared.cot_exemplar.as_deref(),
            },
        )?;

        let kind = self.provider_kind(&unit.model_id)?;
        let result = {
            let _permit = match self.lanes.get(&kind) {
                Some(lane) => lane.acquire().await.ok(),
                None => None,
            };
            debug!(
                model = %unit.model_id,
                technique = %unit.technique,
                task = %unit.task_id,
                example = unit.example_index,
                "Dispatching unit"
            );
            self.client
                .call(&unit.model_id, &prompt, &self.generation)
                .await
        };

        let mut record = ResultRecord {
            run_id: ctx.run_id.clone(),
            model_id: unit.model_id.clone(),
            technique: unit.technique,
            task_id: unit.task_id.clone(),
            example_index: unit.example_index,
            input: example.input.clone(),
            gold_answer: example.target.clone(),
            raw_response: String::new(),
            predicted_answer: String::new(),
            extraction_method: PredictedAnswer::empty().method,
            is_empty: true,
            is_correct: false,
            prompt_tokens: 0,
            completion_tokens: 0,
            tokens_estimated: false,
            latency_ms: 0,
            error_kind: None,
            error_message: None,
            timestamp: Utc::now(),
        };

        let outcome = match result {
            Ok(completion) => self.score_completion(&mut record, prepared, example, completion),
            Err(err) => Self::record_failure(&mut record, unit, err),
        };
        Ok((record, outcome))
    }

    fn score_completion(
        &self,
        record: &mut ResultRecord,
        prepared: &PreparedTask,
        example: &Example,
        completion: CompletionResult,
    ) -> UnitOutcome {
        let format = prepared.task.format;
        let predicted = extract(
            &completion.raw_text,
            &AnswerSpec::for_example(&prepared.task, example),
        );
        let correct = is_correct(&predicted, &example.target, format);

        record.raw_response = completion.raw_text;
        record.predicted_answer = predicted.normalized_text;
        record.extraction_method = predicted.method;
        record.is_empty = predicted.is_empty;
        record.is_correct = correct;
        record.prompt_tokens = completion.usage.prompt_tokens;
        record.completion_tokens = completion.usage.completion_tokens;
        record.tokens_estimated = completion.usage.estimated;
        record.latency_ms = completion.latency_ms;

        UnitOutcome::Committed {
            correct,
            empty: predicted.is_empty,
            failure: None,
        }
    }

    fn record_failure(record: &mut ResultRecord, unit: &ExperimentUnit, err: ProviderError) -> UnitOutcome {
        let kind = err.kind();
        let message = err.to_string();
        if kind == ErrorKind::Client {
            error!(unit = %unit, error = %message, "Provider rejected request; check credentials and model names");
        } else {
            warn!(unit = %unit, kind = %kind, error = %message, "Unit failed after retries");
        }
        record.error_kind = Some(kind);
        record.error_message = Some(message.clone());
        UnitOutcome::Committed {
            correct: false,
            empty: false,
            failure: Some((kind, message)),
        }
    }

    fn provider_kind(&self, model_id: &str) -> Result<ProviderKind, SweepError> {
        self.config
            .model(model_id)
            .map(|m| m.provider)
            .or_else(|| self.client.provider_kind(model_id))
            .ok_or_else(|| {
                ProviderError::UnknownModel {
                    model: model_id.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, TaskSpec};
    use crate::providers::MockProvider;
    use crate::types::AnswerFormat;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_boolean_task(dir: &Path, id: &str, n: usize) {
        let examples: Vec<serde_json::Value> = (0..n)
            .map(|i| json!({ "input": format!("True and True # {}", i), "target": "True" }))
            .collect();
        std::fs::write(
            dir.join(format!("{}.json", id)),
            json!({ "examples": examples }).to_string(),
        )
        .unwrap();
    }

    fn test_config(root: &Path, models: &[(&str, ProviderKind)], n: usize) -> SweepConfig {
        let tasks_dir = root.join("tasks");
        std::fs::create_dir_all(&tasks_dir).unwrap();
        write_boolean_task(&tasks_dir, "boolean_expressions", n + 1);

        let mut config = SweepConfig::default();
        config.models = models
            .iter()
            .map(|(id, kind)| ModelConfig {
                id: id.to_string(),
                provider: *kind,
                model: format!("{}-remote", id),
            })
            .collect();
        config.techniques = vec![Technique::ZeroShot, Technique::FewShot];
        config.tasks = vec![TaskSpec::new("boolean_expressions", Some(AnswerFormat::Boolean))];
        config.parameters.examples_per_task = n;
        config.parameters.few_shot_examples = 1;
        config.paths.tasks_dir = tasks_dir;
        config.paths.results = root.join("results.jsonl");
        config.paths.checkpoint = root.join("checkpoint.jsonl");
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 2;
        config.retry.jitter = false;
        config
    }

    fn client_with(config: &SweepConfig, mocks: &[(&str, Arc<MockProvider>)]) -> ProviderClient {
        let mut client = ProviderClient::new(config.retry.clone());
        for (id, mock) in mocks {
            let kind = config.model(id).unwrap().provider;
            client.register(id, kind, mock.clone());
        }
        client
    }

    fn ctx(config: &SweepConfig) -> RunContext {
        RunContext::open(&config.paths.results, &config.paths.checkpoint).unwrap()
    }

    #[test]
    fn test_enumeration_order() {
        let dir = TempDir::new().unwrap();
        let config = test_config(
            dir.path(),
            &[("a", ProviderKind::Groq), ("b", ProviderKind::Google)],
            2,
        );
        let orch = Orchestrator::new(config, ProviderClient::new(Default::default())).unwrap();
        let units: Vec<String> = orch.enumerate_units().iter().map(|u| u.to_string()).collect();
        assert_eq!(
            units,
            vec![
                "a/zero-shot/boolean_expressions#0",
                "a/zero-shot/boolean_expressions#1",
                "a/few-shot/boolean_expressions#0",
                "a/few-shot/boolean_expressions#1",
                "b/zero-shot/boolean_expressions#0",
                "b/zero-shot/boolean_expressions#1",
                "b/few-shot/boolean_expressions#0",
                "b/few-shot/boolean_expressions#1",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_commits_every_unit() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 3);
        let mock = Arc::new(MockProvider::with_response("The answer is True."));
        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock.clone())])).unwrap();

        let ctx = ctx(&config);
        let summary = orch.run(&ctx).await.unwrap();
        assert_eq!(summary.planned, 6);
        assert_eq!(summary.committed, 6);
        assert_eq!(summary.correct, 6);
        assert_eq!(summary.skipped, 0);
        assert_eq!(mock.call_count(), 6);
        ctx.close().await.unwrap();

        let records = crate::checkpoint::read_records(&config.paths.results).unwrap();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.run_id == summary.run_id));
        assert!(records.iter().all(|r| r.predicted_answer == "True"));
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 2);
        let mock = Arc::new(MockProvider::with_response("True"));

        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock.clone())])).unwrap();
        let first = ctx(&config);
        orch.run(&first).await.unwrap();
        first.close().await.unwrap();

        let second = ctx(&config);
        let summary = orch.run(&second).await.unwrap();
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.committed, 0);
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_recorded_and_run_continues() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 2);
        let mock = Arc::new(MockProvider::with_response("False"));
        for _ in 0..config.retry.max_attempts {
            mock.push_error(ProviderError::Transient {
                provider: "mock".into(),
                status: Some(503),
                message: "overloaded".into(),
            });
        }
        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock)])).unwrap();

        let ctx = ctx(&config);
        let summary = orch.run(&ctx).await.unwrap();
        assert_eq!(summary.committed, 4);
        assert_eq!(summary.failures.get(&ErrorKind::Transient), Some(&1));
        assert_eq!(summary.correct, 0);
        assert_eq!(summary.empty_predictions, 0);
        assert!(!summary.has_client_errors());

        let records = crate::checkpoint::read_records(&config.paths.results).unwrap();
        assert_eq!(records[0].error_kind, Some(ErrorKind::Transient));
        assert!(records[0].is_empty);
        assert!(!records[0].is_correct);
        assert_eq!(records[1].error_kind, None);
    }

    #[tokio::test]
    async fn test_failures_and_empty_predictions_are_counted_apart() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Google)], 1);
        let mock = Arc::new(MockProvider::with_response("I am not sure."));
        for _ in 0..config.retry.max_attempts {
            mock.push_error(ProviderError::Timeout {
                provider: "google".into(),
                timeout_secs: 120,
            });
        }
        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock)])).unwrap();

        let summary = orch.run(&ctx(&config)).await.unwrap();
        assert_eq!(summary.committed, 2);
        assert_eq!(summary.failures.get(&ErrorKind::Timeout), Some(&1));
        assert_eq!(summary.empty_predictions, 1);
    }

    #[tokio::test]
    async fn test_timeouts_are_not_empty_predictions() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 1);
        let mock = Arc::new(MockProvider::always_failing(ProviderError::Timeout {
            provider: "groq".into(),
            timeout_secs: 60,
        }));
        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock)])).unwrap();

        let summary = orch.run(&ctx(&config)).await.unwrap();
        assert_eq!(summary.empty_predictions, 0);
        assert_eq!(summary.failures.get(&ErrorKind::Timeout), Some(&2));
        assert_eq!(summary.total_failures(), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_aggregated() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Google)], 2);
        let mock = Arc::new(MockProvider::always_failing(ProviderError::Client {
            provider: "google".into(),
            status: 403,
            message: "API key not valid".into(),
        }));
        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock.clone())])).unwrap();

        let summary = orch.run(&ctx(&config)).await.unwrap();
        assert!(summary.has_client_errors());
        assert_eq!(summary.failures.get(&ErrorKind::Client), Some(&4));
        assert_eq!(summary.client_errors.len(), 1);
        // Client errors are never retried
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_unregistered_model_fails_per_unit() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 1);
        let orch = Orchestrator::new(config.clone(), ProviderClient::new(config.retry.clone())).unwrap();

        let summary = orch.run(&ctx(&config)).await.unwrap();
        assert_eq!(summary.failures.get(&ErrorKind::Client), Some(&2));
    }

    #[tokio::test]
    async fn test_cancelled_context_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 2);
        let mock = Arc::new(MockProvider::with_response("True"));
        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock.clone())])).unwrap();

        let ctx = ctx(&config);
        ctx.cancel();
        let summary = orch.run(&ctx).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.committed, 0);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_parallel_providers_commit_each_unit_once() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(
            dir.path(),
            &[("a", ProviderKind::Groq), ("b", ProviderKind::Google)],
            3,
        );
        config.run.parallel_providers = true;
        let a = Arc::new(MockProvider::with_response("True"));
        let b = Arc::new(MockProvider::with_response("False"));
        let orch = Orchestrator::new(
            config.clone(),
            client_with(&config, &[("a", a.clone()), ("b", b.clone())]),
        )
        .unwrap();

        let summary = orch.run(&ctx(&config)).await.unwrap();
        assert_eq!(summary.committed, 12);
        assert_eq!(summary.correct, 6);
        assert_eq!(a.call_count(), 6);
        assert_eq!(b.call_count(), 6);

        let records = crate::checkpoint::read_records(&config.paths.results).unwrap();
        let unique: HashSet<ExperimentUnit> = records.iter().map(|r| r.unit()).collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn test_missing_cot_exemplar_fails_at_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 1);
        config.techniques = vec![Technique::ChainOfThought];
        config.paths.cot_dir = dir.path().join("cot");
        let err = Orchestrator::new(config, ProviderClient::new(Default::default()))
            .err()
            .unwrap();
        assert!(matches!(err, SweepError::Task(TaskError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_few_shot_prompt_carries_demos() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), &[("a", ProviderKind::Groq)], 1);
        config.techniques = vec![Technique::FewShot];
        let mock = Arc::new(MockProvider::with_response("True"));
        let orch = Orchestrator::new(config.clone(), client_with(&config, &[("a", mock.clone())])).unwrap();

        orch.run(&ctx(&config)).await.unwrap();
        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].matches("Q: ").count(), 2);
        assert!(prompts[0].ends_with("\nA:"));
    }
}
