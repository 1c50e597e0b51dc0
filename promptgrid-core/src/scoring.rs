//! Exact-match scoring of predictions against gold answers.

use crate::types::{AnswerFormat, PredictedAnswer};

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Bring a gold target into the same shape the extractor produces.
///
/// Multiple-choice targets are stored as `(C)` but predicted as `C`; word
/// sequences may be comma separated.
pub fn canonical_gold(gold: &str, format: AnswerFormat) -> String {
    let gold = gold.trim();
    match format {
        AnswerFormat::MultipleChoiceLetter => gold
            .strip_prefix('(')
            .and_then(|g| g.strip_suffix(')'))
            .unwrap_or(gold)
            .to_string(),
        AnswerFormat::FreeTextSequence => gold.replace(',', " "),
        AnswerFormat::Boolean | AnswerFormat::Date => gold.to_string(),
    }
}

/// Whether `predicted` matches `gold`. Empty predictions are always incorrect.
pub fn is_correct(predicted: &PredictedAnswer, gold: &str, format: AnswerFormat) -> bool {
    if predicted.is_empty {
        return false;
    }
    let expected = normalize(&canonical_gold(gold, format));
    !expected.is_empty() && normalize(&predicted.normalized_text) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtractionMethod;

    fn found(text: &str) -> PredictedAnswer {
        PredictedAnswer::found(text, ExtractionMethod::AnchorMatch)
    }

    #[test]
    fn test_boolean_case_insensitive() {
        assert!(is_correct(&found("True"), "True", AnswerFormat::Boolean));
        assert!(is_correct(&found("true"), " True ", AnswerFormat::Boolean));
        assert!(!is_correct(&found("False"), "True", AnswerFormat::Boolean));
    }

    #[test]
    fn test_multiple_choice_gold_parentheses() {
        assert!(is_correct(&found("C"), "(C)", AnswerFormat::MultipleChoiceLetter));
        assert!(!is_correct(&found("D"), "(C)", AnswerFormat::MultipleChoiceLetter));
    }

    #[test]
    fn test_sequence_whitespace_normalized() {
        assert!(is_correct(
            &found("apple  banana cherry"),
            "apple banana\tcherry",
            AnswerFormat::FreeTextSequence
        ));
    }

    #[test]
    fn test_empty_is_incorrect() {
        let empty = PredictedAnswer::empty();
        assert!(!is_correct(&empty, "True", AnswerFormat::Boolean));
        assert!(!is_correct(&empty, "", AnswerFormat::FreeTextSequence));
    }
}
