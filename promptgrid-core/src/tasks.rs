//! Task data loading.
//!
//! Task files are JSON documents of the form `{"examples": [{"input", "target"}, ...]}`,
//! one per task. Chain-of-thought exemplars are plain text files, one per task.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

use crate::config::TaskSpec;
use crate::error::TaskError;
use crate::types::{AnswerFormat, Example, Task};

static OPTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\(([A-Z])\)").expect("valid option regex"));
static LETTER_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(([A-Z])\)$").expect("valid letter regex"));
static DATE_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").expect("valid date regex"));

#[derive(Debug, Deserialize)]
struct TaskFile {
    examples: Vec<RawExample>,
}

#[derive(Debug, Deserialize)]
struct RawExample {
    input: String,
    target: String,
}

/// Test questions and few-shot demonstrations drawn from one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleSplit {
    pub test: Vec<Example>,
    pub demos: Vec<Example>,
}

/// Result of checking one configured task on disk.
#[derive(Debug)]
pub struct TaskCheck {
    pub task_id: String,
    /// Number of available examples, or why the task is unusable.
    pub outcome: Result<usize, TaskError>,
}

/// Path of the JSON file for a task.
pub fn task_path(tasks_dir: &Path, task_id: &str) -> PathBuf {
    tasks_dir.join(format!("{}.json", task_id))
}

/// Load a task from `<tasks_dir>/<id>.json`.
pub fn load_task(tasks_dir: &Path, spec: &TaskSpec) -> Result<Task, TaskError> {
    let path = task_path(tasks_dir, &spec.id);
    let data = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TaskError::NotFound { path: path.clone() },
        _ => TaskError::Parse {
            path: path.clone(),
            message: e.to_string(),
        },
    })?;
    let file: TaskFile = serde_json::from_str(&data).map_err(|e| TaskError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let examples: Vec<Example> = file
        .examples
        .into_iter()
        .map(|raw| {
            let options = parse_options(&raw.input);
            Example {
                input: raw.input,
                target: raw.target,
                options,
            }
        })
        .collect();

    let format = spec.format.unwrap_or_else(|| infer_format(&examples));
    debug!(task = %spec.id, examples = examples.len(), %format, "Loaded task");

    Ok(Task {
        id: spec.id.clone(),
        format,
        examples,
    })
}

/// Collect the option letters offered in a multiple-choice question.
pub fn parse_options(input: &str) -> Option<Vec<char>> {
    let letters: Vec<char> = OPTION_LINE
        .captures_iter(input)
        .filter_map(|c| c.get(1).and_then(|m| m.as_str().chars().next()))
        .collect();
    if letters.is_empty() {
        None
    } else {
        Some(letters)
    }
}

/// Infer a task's answer format from its gold targets.
pub fn infer_format(examples: &[Example]) -> AnswerFormat {
    if examples.is_empty() {
        return AnswerFormat::FreeTextSequence;
    }
    let all = |pred: fn(&str) -> bool| examples.iter().all(|e| pred(e.target.trim()));

    if all(|t| t == "True" || t == "False") {
        AnswerFormat::Boolean
    } else if all(|t| LETTER_TARGET.is_match(t)) {
        AnswerFormat::MultipleChoiceLetter
    } else if all(|t| DATE_TARGET.is_match(t)) {
        AnswerFormat::Date
    } else {
        AnswerFormat::FreeTextSequence
    }
}

/// Deterministically split a task into test examples and demonstrations.
///
/// The split depends only on `seed` and the task contents, so a resumed run
/// sees the same question at every `example_index`.
pub fn split_examples(
    task: &Task,
    examples_per_task: usize,
    few_shot: usize,
    seed: u64,
) -> Result<ExampleSplit, TaskError> {
    let required = examples_per_task + few_shot;
    if task.examples.len() < required {
        return Err(TaskError::TooFewExamples {
            task: task.id.clone(),
            available: task.examples.len(),
            required,
        });
    }

    let mut order: Vec<usize> = (0..task.examples.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let pick = |idx: &[usize]| -> Vec<Example> {
        idx.iter().map(|&i| task.examples[i].clone()).collect()
    };
    Ok(ExampleSplit {
        test: pick(&order[..examples_per_task]),
        demos: pick(&order[examples_per_task..required]),
    })
}

/// Load the chain-of-thought demonstration text for a task.
pub fn load_cot_exemplar(cot_dir: &Path, task_id: &str) -> Result<String, TaskError> {
    let path = cot_dir.join(format!("{}.txt", task_id));
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TaskError::NotFound { path }),
        Err(e) => Err(TaskError::Parse {
            path,
            message: e.to_string(),
        }),
    }
}

/// Check that every task exists and carries enough examples for the split.
pub fn verify_tasks(tasks_dir: &Path, specs: &[TaskSpec], required: usize) -> Vec<TaskCheck> {
    specs
        .iter()
        .map(|spec| {
            let outcome = load_task(tasks_dir, spec).and_then(|task| {
                if task.examples.len() < required {
                    Err(TaskError::TooFewExamples {
                        task: task.id,
                        available: task.examples.len(),
                        required,
                    })
                } else {
                    Ok(task.examples.len())
                }
            });
            TaskCheck {
                task_id: spec.id.clone(),
                outcome,
            }
        })
        .collect()
}
