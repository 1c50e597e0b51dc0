//! Answer extraction.
//!
//! A raw completion is passed through an ordered cascade of strategies, from
//! the most structured to the most lenient. Each strategy either returns a
//! canonical, format-valid answer or `None`; the first answer wins and later
//! strategies are never consulted. When every strategy declines, the result is
//! an empty prediction, which callers score as incorrect.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::types::{AnswerFormat, Example, ExtractionMethod, PredictedAnswer, Task};

/// What the extractor needs to know about the expected answer.
#[derive(Debug, Clone, Copy)]
pub struct AnswerSpec<'a> {
    pub format: AnswerFormat,
    /// Valid option letters for multiple-choice questions. `None` accepts A-K.
    pub options: Option<&'a [char]>,
}

impl<'a> AnswerSpec<'a> {
    pub fn new(format: AnswerFormat) -> Self {
        Self {
            format,
            options: None,
        }
    }

    /// Spec for one example of a task.
    pub fn for_example(task: &Task, example: &'a Example) -> Self {
        Self {
            format: task.format,
            options: example.options.as_deref(),
        }
    }

    fn accepts_letter(&self, letter: char) -> bool {
        match self.options {
            Some(opts) => opts.contains(&letter),
            None => ('A'..='K').contains(&letter),
        }
    }
}

/// A single extraction strategy.
pub type StrategyFn = fn(&str, &AnswerSpec<'_>) -> Option<String>;

/// A named step of the cascade.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub method: ExtractionMethod,
    pub apply: StrategyFn,
}

/// The cascade, in priority order.
pub const CASCADE: &[Strategy] = &[
    Strategy {
        method: ExtractionMethod::AnchorMatch,
        apply: anchor_match,
    },
    Strategy {
        method: ExtractionMethod::StructuralMatch,
        apply: structural_match,
    },
    Strategy {
        method: ExtractionMethod::ListCollection,
        apply: list_collection,
    },
    Strategy {
        method: ExtractionMethod::FinalLineScan,
        apply: final_line_scan,
    },
];

/// Extract a normalized answer from `raw_text`. Never fails.
pub fn extract(raw_text: &str, spec: &AnswerSpec<'_>) -> PredictedAnswer {
    let text = raw_text.trim();
    if text.is_empty() {
        return PredictedAnswer::empty();
    }
    for strategy in CASCADE {
        if let Some(answer) = (strategy.apply)(text, spec)
            && !answer.is_empty()
        {
            return PredictedAnswer::found(answer, strategy.method);
        }
    }
    PredictedAnswer::empty()
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("extraction pattern must compile")
}

/// Answer-prefix markers, tried in order. Group 1 is the rest of the marker's line.
static ANCHORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        re(r"\\boxed\{([^}]*)\}"),
        re(r"(?i)\bfinal answer\b[ \t]*(?:is)?[ \t]*[:\-]?[ \t]*([^\n]*)"),
        re(r"(?i)\banswer\b[ \t]*(?:is|:)[ \t]*[:\-]?[ \t]*([^\n]*)"),
        re(r"(?i)\b(?:option|result|conclusion)[ \t]+is[ \t]*[:\-]?[ \t]*([^\n]*)"),
    ]
});

static BOOL_TOKEN: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\b(true|false)\b"));
static PAREN_LETTER: LazyLock<Regex> = LazyLock::new(|| re(r"\(([A-Za-z])\)"));
static LEADING_LETTER: LazyLock<Regex> =
    LazyLock::new(|| re(r"^[\s*$\\{(]*([A-Z])(?:[\s).:*}$]|$)"));
static LONE_LETTER_LINE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?m)^[ \t*]*\(?([A-Z])\)?[ \t*.]*$"));
static DATE: LazyLock<Regex> = LazyLock::new(|| re(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b"));
static WORD: LazyLock<Regex> = LazyLock::new(|| re(r"[A-Za-z]+(?:['\-][A-Za-z]+)*"));
static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| re(r"^\s*(?:\d+[.)]|[-*\u{2022}])\s+\**([A-Za-z][A-Za-z'\-]*)\**\s*[,.]?\s*$"));

/// Filler words dropped when scanning a prose line for a word sequence.
const STOPWORDS: &[&str] = &[
    "the", "is", "are", "in", "order", "list", "sorted", "words", "here", "following",
    "final", "answer", "alphabetically", "alphabetical", "these", "correct", "now", "below",
    "so", "thus", "therefore", "as", "follows",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pick {
    First,
    Last,
}

// ---------------------------------------------------------------------------
// Format matchers
// ---------------------------------------------------------------------------

fn canonical_bool(token: &str) -> String {
    if token.eq_ignore_ascii_case("true") {
        "True".to_string()
    } else {
        "False".to_string()
    }
}

fn pick_match<'t>(mut it: impl Iterator<Item = regex::Captures<'t>>, pick: Pick) -> Option<regex::Captures<'t>> {
    match pick {
        Pick::First => it.next(),
        Pick::Last => it.last(),
    }
}

fn match_boolean(segment: &str, pick: Pick) -> Option<String> {
    pick_match(BOOL_TOKEN.captures_iter(segment), pick).map(|c| canonical_bool(&c[1]))
}

fn match_letter(segment: &str, spec: &AnswerSpec<'_>, pick: Pick) -> Option<String> {
    let paren: Vec<char> = PAREN_LETTER
        .captures_iter(segment)
        .filter_map(|c| c[1].chars().next().map(|ch| ch.to_ascii_uppercase()))
        .filter(|&ch| spec.accepts_letter(ch))
        .collect();
    let found = match pick {
        Pick::First => paren.first(),
        Pick::Last => paren.last(),
    };
    if let Some(ch) = found {
        return Some(ch.to_string());
    }
    LEADING_LETTER
        .captures(segment)
        .and_then(|c| c[1].chars().next())
        .filter(|&ch| spec.accepts_letter(ch))
        .map(|ch| ch.to_string())
}

fn format_date(c: &regex::Captures<'_>) -> Option<String> {
    let month: u32 = c[1].parse().ok()?;
    let day: u32 = c[2].parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(format!("{:02}/{:02}/{}", month, day, &c[3]))
}

fn match_date(segment: &str, pick: Pick) -> Option<String> {
    pick_match(DATE.captures_iter(segment), pick).and_then(|c| format_date(&c))
}

fn sequence_words(segment: &str) -> Vec<&str> {
    WORD.find_iter(segment).map(|m| m.as_str()).collect()
}

fn content_words(segment: &str) -> Vec<&str> {
    sequence_words(segment)
        .into_iter()
        .filter(|w| !STOPWORDS.contains(&w.to_ascii_lowercase().as_str()))
        .collect()
}

fn match_sequence(segment: &str) -> Option<String> {
    let words = sequence_words(segment);
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Match `segment` against the expected format.
fn match_format(segment: &str, spec: &AnswerSpec<'_>, pick: Pick) -> Option<String> {
    match spec.format {
        AnswerFormat::Boolean => match_boolean(segment, pick),
        AnswerFormat::MultipleChoiceLetter => match_letter(segment, spec, pick),
        AnswerFormat::Date => match_date(segment, pick),
        AnswerFormat::FreeTextSequence => match_sequence(segment),
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Strategy 1: text after an explicit answer marker ("the answer is", "Answer:", `\boxed{}`).
pub fn anchor_match(text: &str, spec: &AnswerSpec<'_>) -> Option<String> {
    ANCHORS.iter().find_map(|anchor| {
        anchor.captures_iter(text).find_map(|c| {
            let segment = c.get(1)?.as_str().trim();
            if segment.is_empty() {
                return None;
            }
            // Lead-in prose ("the answer is as follows.") is not a sequence
            if spec.format == AnswerFormat::FreeTextSequence && content_words(segment).len() < 2 {
                return None;
            }
            match_format(segment, spec, Pick::First)
        })
    })
}

/// Strategy 2: the completion as a whole has the shape of an answer.
pub fn structural_match(text: &str, spec: &AnswerSpec<'_>) -> Option<String> {
    match spec.format {
        AnswerFormat::Boolean => {
            let cleaned = text.trim_matches(|c: char| c.is_whitespace() || "*.\"'$`".contains(c));
            if cleaned.eq_ignore_ascii_case("true") || cleaned.eq_ignore_ascii_case("false") {
                return Some(canonical_bool(cleaned));
            }
            let distinct: BTreeSet<String> = BOOL_TOKEN
                .captures_iter(text)
                .map(|c| canonical_bool(&c[1]))
                .collect();
            single(distinct)
        }
        AnswerFormat::MultipleChoiceLetter => LONE_LETTER_LINE
            .captures_iter(text)
            .filter_map(|c| c[1].chars().next())
            .find(|&ch| spec.accepts_letter(ch))
            .map(|ch| ch.to_string())
            .or_else(|| {
                let first = text.lines().next().unwrap_or("");
                PAREN_LETTER
                    .captures(first.trim_start_matches(|c: char| c.is_whitespace() || c == '*'))
                    .filter(|c| c.get(0).is_some_and(|m| m.start() == 0))
                    .and_then(|c| c[1].chars().next())
                    .map(|ch| ch.to_ascii_uppercase())
                    .filter(|&ch| spec.accepts_letter(ch))
                    .map(|ch| ch.to_string())
            }),
        AnswerFormat::Date => {
            let distinct: BTreeSet<String> = DATE
                .captures_iter(text)
                .filter_map(|c| format_date(&c))
                .collect();
            single(distinct)
        }
        AnswerFormat::FreeTextSequence => {
            if text.contains('\n') {
                return None;
            }
            let tokens: Vec<&str> = text
                .split(|c: char| c.is_whitespace() || c == ',')
                .map(|t| t.trim_matches(|c: char| "*.\"'`".contains(c)))
                .filter(|t| !t.is_empty())
                .collect();
            let all_words = !tokens.is_empty()
                && tokens
                    .iter()
                    .all(|t| WORD.find(t).is_some_and(|m| m.as_str().len() == t.len()));
            all_words.then(|| tokens.join(" "))
        }
    }
}

fn single(set: BTreeSet<String>) -> Option<String> {
    if set.len() == 1 {
        set.into_iter().next()
    } else {
        None
    }
}

/// Strategy 2b (sequences only): numbered/bulleted lists or one word per line.
pub fn list_collection(text: &str, spec: &AnswerSpec<'_>) -> Option<String> {
    if spec.format != AnswerFormat::FreeTextSequence {
        return None;
    }
    let numbered: Vec<&str> = text
        .lines()
        .filter_map(|line| NUMBERED_ITEM.captures(line))
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if numbered.len() >= 2 {
        return Some(numbered.join(" "));
    }

    let single_words: Vec<&str> = text
        .lines()
        .map(|l| l.trim().trim_end_matches([',', '.']))
        .filter(|l| l.len() > 1 && l.chars().all(|c| c.is_ascii_alphabetic()))
        .collect();
    if single_words.len() >= 3 {
        return Some(single_words.join(" "));
    }
    None
}

/// Strategy 3: the last non-empty line, matched leniently (last occurrence wins).
pub fn final_line_scan(text: &str, spec: &AnswerSpec<'_>) -> Option<String> {
    let line = text.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    match spec.format {
        AnswerFormat::FreeTextSequence => {
            let words = content_words(line);
            if words.len() >= 2 {
                Some(words.join(" "))
            } else {
                None
            }
        }
        _ => match_format(line, spec, Pick::Last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(format: AnswerFormat) -> AnswerSpec<'static> {
        AnswerSpec::new(format)
    }

    fn check(raw: &str, format: AnswerFormat, expected: &str, method: ExtractionMethod) {
        let p = extract(raw, &spec(format));
        assert_eq!(p.normalized_text, expected, "raw: {:?}", raw);
        assert_eq!(p.method, method, "raw: {:?}", raw);
        assert!(!p.is_empty);
    }

    #[test]
    fn test_boolean_anchor_with_markdown() {
        check(
            "The final result is **True**.",
            AnswerFormat::Boolean,
            "True",
            ExtractionMethod::AnchorMatch,
        );
    }

    #[test]
    fn test_boolean_cot_anchor_beats_earlier_tokens() {
        check(
            "Step 1: not True = False\nStep 2: False or True = True\nTherefore, the answer is False",
            AnswerFormat::Boolean,
            "False",
            ExtractionMethod::AnchorMatch,
        );
    }

    #[test]
    fn test_boolean_lets_think_scenario() {
        check(
            "Let's think... the answer is True.",
            AnswerFormat::Boolean,
            "True",
            ExtractionMethod::AnchorMatch,
        );
    }

    #[test]
    fn test_boolean_bare_token() {
        check("false", AnswerFormat::Boolean, "False", ExtractionMethod::StructuralMatch);
    }

    #[test]
    fn test_boolean_final_line_scan() {
        check(
            "not True is False.\nFalse or True evaluates to True.\nSo: True",
            AnswerFormat::Boolean,
            "True",
            ExtractionMethod::FinalLineScan,
        );
    }

    #[test]
    fn test_mc_standard() {
        check(
            "So the answer is (C).",
            AnswerFormat::MultipleChoiceLetter,
            "C",
            ExtractionMethod::AnchorMatch,
        );
    }

    #[test]
    fn test_mc_verbose_option() {
        check(
            "Therefore, the correct option is (F).",
            AnswerFormat::MultipleChoiceLetter,
            "F",
            ExtractionMethod::AnchorMatch,
        );
    }

    #[test]
    fn test_mc_boxed_latex() {
        check(
            "The final answer is: $\\boxed{(D)}$",
            AnswerFormat::MultipleChoiceLetter,
            "D",
            ExtractionMethod::AnchorMatch,
        );
    }

    #[test]
    fn test_mc_lone_letter_line() {
        check(
            "Looking at the shapes listed above.\n**(B)**",
            AnswerFormat::MultipleChoiceLetter,
            "B",
            ExtractionMethod::StructuralMatch,
        );
    }

    #[test]
    fn test_mc_respects_option_set() {
        let options = ['A', 'B', 'C'];
        let spec = AnswerSpec {
            format: AnswerFormat::MultipleChoiceLetter,
            options: Some(&options),
        };
        let p = extract("The answer is (E).", &spec);
        assert!(p.is_empty);
    }

    #[test]
    fn test_date_normalized() {
        check(
            "The date yesterday was 1/5/2019.",
            AnswerFormat::Date,
            "01/05/2019",
            ExtractionMethod::StructuralMatch,
        );
    }

    #[test]
    fn test_sequence_comma_separated_anchor() {
        check(
            "Answer: abdominal, address, berry, bounty",
            AnswerFormat::FreeTextSequence,
            "abdominal address berry bounty",
            ExtractionMethod::AnchorMatch,
        );
    }

    #[test]
    fn test_sequence_numbered_list() {
        check(
            "The sorted list is:\n1. bedtime\n2. boon\n3. bottle\n4. chapati\n5. kenney",
            AnswerFormat::FreeTextSequence,
            "bedtime boon bottle chapati kenney",
            ExtractionMethod::ListCollection,
        );
    }

    #[test]
    fn test_sequence_line_by_line() {
        check(
            "Sorted alphabetically:\napple\nbanana\ncherry\ndate\nelder",
            AnswerFormat::FreeTextSequence,
            "apple banana cherry date elder",
            ExtractionMethod::ListCollection,
        );
    }

    #[test]
    fn test_sequence_prose_final_line() {
        check(
            "Here are the words in order: apple banana cherry date",
            AnswerFormat::FreeTextSequence,
            "apple banana cherry date",
            ExtractionMethod::FinalLineScan,
        );
    }

    #[test]
    fn test_sequence_marker_before_numbered_list() {
        check(
            "Here is the answer:\n1. apple\n2. banana\n3. cherry\n4. date",
            AnswerFormat::FreeTextSequence,
            "apple banana cherry date",
            ExtractionMethod::ListCollection,
        );
    }

    #[test]
    fn test_sequence_lead_in_prose_is_not_an_answer() {
        check(
            "The answer is as follows.\napple banana cherry date",
            AnswerFormat::FreeTextSequence,
            "apple banana cherry date",
            ExtractionMethod::FinalLineScan,
        );
    }

    #[test]
    fn test_anchor_stays_on_its_line() {
        let s = spec(AnswerFormat::Boolean);
        assert_eq!(anchor_match("The answer is:\nTrue", &s), None);
        check("The answer is:\nTrue", AnswerFormat::Boolean, "True", ExtractionMethod::StructuralMatch);
    }

    #[test]
    fn test_empty_and_unparseable() {
        assert!(extract("", &spec(AnswerFormat::Boolean)).is_empty);
        assert!(extract("   \n  ", &spec(AnswerFormat::Date)).is_empty);
        let p = extract("I cannot determine this.", &spec(AnswerFormat::Boolean));
        assert!(p.is_empty);
        assert_eq!(p.method, ExtractionMethod::None);
    }

    #[test]
    fn test_strategies_individually() {
        let s = spec(AnswerFormat::Boolean);
        assert_eq!(anchor_match("answer: false", &s), Some("False".into()));
        assert_eq!(anchor_match("True", &s), None);
        assert_eq!(structural_match("True", &s), Some("True".into()));
        assert_eq!(list_collection("1. a\n2. b", &s), None);
        assert_eq!(
            final_line_scan("x\nTrue and then False", &s),
            Some("False".into())
        );
    }

    #[test]
    fn test_cascade_order_is_fixed() {
        let methods: Vec<ExtractionMethod> = CASCADE.iter().map(|s| s.method).collect();
        assert_eq!(
            methods,
            vec![
                ExtractionMethod::AnchorMatch,
                ExtractionMethod::StructuralMatch,
                ExtractionMethod::ListCollection,
                ExtractionMethod::FinalLineScan,
            ]
        );
    }
}
