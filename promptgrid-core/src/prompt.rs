//! Prompt construction for the three prompting techniques.

use crate::error::TaskError;
use crate::types::{Example, Technique};

/// Suffix appended to chain-of-thought prompts.
pub const COT_TRIGGER: &str = "Let's think step by step.";

/// Inputs to [`build_prompt`] beyond the question itself.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub task_id: &'a str,
    pub demos: &'a [Example],
    /// Canonical worked demonstrations for the task; required for `cot`.
    pub cot_exemplar: Option<&'a str>,
}

/// Build the prompt text for one question.
pub fn build_prompt(
    technique: Technique,
    question: &str,
    ctx: PromptContext<'_>,
) -> Result<String, TaskError> {
    if question.trim().is_empty() {
        return Err(TaskError::EmptyPrompt {
            task: ctx.task_id.to_string(),
        });
    }

    let prompt = match technique {
        Technique::ZeroShot => format!("Q: {}\nA:", question),
        Technique::FewShot => {
            let demos = ctx
                .demos
                .iter()
                .map(|d| format!("Q: {}\nA: {}", d.input, d.target))
                .collect::<Vec<_>>()
                .join("\n\n");
            if demos.is_empty() {
                format!("Q: {}\nA:", question)
            } else {
                format!("{}\n\nQ: {}\nA:", demos, question)
            }
        }
        Technique::ChainOfThought => match ctx.cot_exemplar {
            Some(exemplar) if !exemplar.is_empty() => {
                format!("{}\n\nQ: {}\nA: {}", exemplar, question, COT_TRIGGER)
            }
            _ => format!("Q: {}\nA: {}", question, COT_TRIGGER),
        },
    };
    Ok(prompt)
}
