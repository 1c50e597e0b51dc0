//! Fundamental types shared across the sweep: grid cells, task data,
//! completions, predictions, and the persisted result row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ErrorKind;

/// Prompting technique applied to a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Technique {
    #[serde(rename = "zero-shot")]
    ZeroShot,
    #[serde(rename = "few-shot")]
    FewShot,
    #[serde(rename = "cot")]
    ChainOfThought,
}

impl Technique {
    pub const ALL: [Technique; 3] = [
        Technique::ZeroShot,
        Technique::FewShot,
        Technique::ChainOfThought,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::ZeroShot => "zero-shot",
            Technique::FewShot => "few-shot",
            Technique::ChainOfThought => "cot",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zero-shot" => Ok(Technique::ZeroShot),
            "few-shot" => Ok(Technique::FewShot),
            "cot" => Ok(Technique::ChainOfThought),
            other => Err(format!("unknown technique '{}'", other)),
        }
    }
}

/// One cell of the evaluation grid. Identity is the whole tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentUnit {
    pub model_id: String,
    pub technique: Technique,
    pub task_id: String,
    /// Position in the task's test split.
    pub example_index: usize,
}

impl ExperimentUnit {
    pub fn new(
        model_id: impl Into<String>,
        technique: Technique,
        task_id: impl Into<String>,
        example_index: usize,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            technique,
            task_id: task_id.into(),
            example_index,
        }
    }
}

impl fmt::Display for ExperimentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.model_id, self.technique, self.task_id, self.example_index
        )
    }
}

/// Shape of the answer a task expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerFormat {
    Boolean,
    MultipleChoiceLetter,
    Date,
    FreeTextSequence,
}

impl fmt::Display for AnswerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnswerFormat::Boolean => "boolean",
            AnswerFormat::MultipleChoiceLetter => "multiple_choice_letter",
            AnswerFormat::Date => "date",
            AnswerFormat::FreeTextSequence => "free_text_sequence",
        };
        f.write_str(s)
    }
}

/// A single question with its gold answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub target: String,
    /// Option letters offered by a multiple-choice question, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<char>>,
}

/// A task and its ordered examples. Immutable after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub format: AnswerFormat,
    pub examples: Vec<Example>,
}

/// Generation parameters passed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

/// Token usage for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// True when counts were estimated locally rather than reported by the provider.
    #[serde(default)]
    pub estimated: bool,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Outcome of a successful provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub raw_text: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

/// Which extraction strategy produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    AnchorMatch,
    StructuralMatch,
    ListCollection,
    FinalLineScan,
    None,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionMethod::AnchorMatch => "anchor_match",
            ExtractionMethod::StructuralMatch => "structural_match",
            ExtractionMethod::ListCollection => "list_collection",
            ExtractionMethod::FinalLineScan => "final_line_scan",
            ExtractionMethod::None => "none",
        };
        f.write_str(s)
    }
}

/// Normalized answer pulled out of a raw completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictedAnswer {
    pub normalized_text: String,
    pub method: ExtractionMethod,
    pub is_empty: bool,
}

impl PredictedAnswer {
    pub fn found(text: impl Into<String>, method: ExtractionMethod) -> Self {
        Self {
            normalized_text: text.into(),
            method,
            is_empty: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            normalized_text: String::new(),
            method: ExtractionMethod::None,
            is_empty: true,
        }
    }
}

/// One persisted row of the result sink. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub run_id: String,
    pub model_id: String,
    pub technique: Technique,
    pub task_id: String,
    pub example_index: usize,
    pub input: String,
    pub gold_answer: String,
    pub raw_response: String,
    pub predicted_answer: String,
    pub extraction_method: ExtractionMethod,
    pub is_empty: bool,
    pub is_correct: bool,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub tokens_estimated: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResultRecord {
    /// The grid cell this row belongs to.
    pub fn unit(&self) -> ExperimentUnit {
        ExperimentUnit::new(
            self.model_id.clone(),
            self.technique,
            self.task_id.clone(),
            self.example_index,
        )
    }

    /// Whether this row records a terminal provider failure.
    pub fn is_failure(&self) -> bool {
        self.error_kind.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technique_serde_names() {
        assert_eq!(
            serde_json::to_string(&Technique::ChainOfThought).unwrap(),
            "\"cot\""
        );
        let t: Technique = serde_json::from_str("\"few-shot\"").unwrap();
        assert_eq!(t, Technique::FewShot);
    }

    #[test]
    fn test_technique_from_str() {
        assert_eq!("zero-shot".parse::<Technique>(), Ok(Technique::ZeroShot));
        assert!("tree-of-thought".parse::<Technique>().is_err());
    }

    #[test]
    fn test_unit_display() {
        let unit = ExperimentUnit::new("llama-8b", Technique::FewShot, "word_sorting", 3);
        assert_eq!(unit.to_string(), "llama-8b/few-shot/word_sorting#3");
    }

    #[test]
    fn test_unit_ordering_follows_fields() {
        let a = ExperimentUnit::new("a", Technique::ZeroShot, "t", 9);
        let b = ExperimentUnit::new("a", Technique::FewShot, "t", 0);
        assert!(a < b);
    }

    #[test]
    fn test_predicted_answer_empty() {
        let p = PredictedAnswer::empty();
        assert!(p.is_empty);
        assert_eq!(p.method, ExtractionMethod::None);
        assert!(p.normalized_text.is_empty());
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 30,
            estimated: false,
        };
        assert_eq!(usage.total(), 150);
    }
}
