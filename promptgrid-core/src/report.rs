//! Summaries and exports over the result sink.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::SweepError;
use crate::types::{ResultRecord, Technique};

/// Aggregates for one (model, technique) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupStats {
    pub model_id: String,
    pub technique: Option<Technique>,
    pub n: usize,
    pub correct: usize,
    /// Answered rows with a non-empty prediction.
    pub parsed: usize,
    /// Rows recording a terminal provider failure.
    pub failures: usize,
    pub total_tokens: usize,
}

impl GroupStats {
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.n)
    }

    /// Share of answered rows the extractor parsed; provider failures are excluded.
    pub fn parser_success_rate(&self) -> f64 {
        ratio(self.parsed, self.n - self.failures)
    }

    pub fn mean_tokens(&self) -> f64 {
        ratio(self.total_tokens, self.n)
    }

    /// `None` when nothing was answered correctly.
    pub fn tokens_per_correct(&self) -> Option<f64> {
        (self.correct > 0).then(|| self.total_tokens as f64 / self.correct as f64)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Group records by (model, technique), sorted by model id then technique.
pub fn summarize(records: &[ResultRecord]) -> Vec<GroupStats> {
    let mut groups: BTreeMap<(String, Technique), GroupStats> = BTreeMap::new();
    for r in records {
        let g = groups
            .entry((r.model_id.clone(), r.technique))
            .or_insert_with(|| GroupStats {
                model_id: r.model_id.clone(),
                technique: Some(r.technique),
                ..Default::default()
            });
        g.n += 1;
        g.correct += usize::from(r.is_correct);
        g.parsed += usize::from(!r.is_empty && !r.is_failure());
        g.failures += usize::from(r.is_failure());
        g.total_tokens += r.prompt_tokens + r.completion_tokens;
    }
    groups.into_values().collect()
}

/// Render a fixed-width table for the terminal.
pub fn render_table(stats: &[GroupStats]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<10} {:>5} {:>9} {:>8} {:>8} {:>11} {:>13}",
        "model", "technique", "n", "accuracy", "parsed", "failed", "mean_tokens", "tokens/correct"
    );
    for s in stats {
        let technique = s.technique.map(|t| t.as_str()).unwrap_or("-");
        let per_correct = s
            .tokens_per_correct()
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<16} {:<10} {:>5} {:>8.1}% {:>7.1}% {:>8} {:>11.1} {:>13}",
            s.model_id,
            technique,
            s.n,
            s.accuracy() * 100.0,
            s.parser_success_rate() * 100.0,
            s.failures,
            s.mean_tokens(),
            per_correct
        );
    }
    out
}

/// Write records as CSV with one column per record field. Returns rows written.
pub fn export_csv(records: &[ResultRecord], out: &Path) -> Result<usize, SweepError> {
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(out).map_err(std::io::Error::other)?;
    for record in records {
        writer.serialize(record).map_err(std::io::Error::other)?;
    }
    writer.flush()?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::ExtractionMethod;
    use chrono::Utc;

    fn row(model: &str, technique: Technique, correct: bool, empty: bool, tokens: usize) -> ResultRecord {
        ResultRecord {
            run_id: "r".into(),
            model_id: model.into(),
            technique,
            task_id: "word_sorting".into(),
            example_index: 0,
            input: "Sort the following words alphabetically: List: oven, ant".into(),
            gold_answer: "ant oven".into(),
            raw_response: if empty { String::new() } else { "ant oven".into() },
            predicted_answer: if empty { String::new() } else { "ant oven".into() },
            extraction_method: if empty {
                ExtractionMethod::None
            } else {
                ExtractionMethod::StructuralMatch
            },
            is_empty: empty,
            is_correct: correct,
            prompt_tokens: tokens,
            completion_tokens: 0,
            tokens_estimated: false,
            latency_ms: 10,
            error_kind: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_summarize_groups_and_metrics() {
        let mut failed = row("llama-8b", Technique::ZeroShot, false, true, 0);
        failed.error_kind = Some(ErrorKind::RateLimited);
        let records = vec![
            row("llama-8b", Technique::ZeroShot, true, false, 100),
            row("llama-8b", Technique::ZeroShot, false, false, 100),
            failed,
            row("gemini-pro", Technique::ChainOfThought, false, true, 50),
        ];
        let stats = summarize(&records);
        assert_eq!(stats.len(), 2);

        let gemini = &stats[0];
        assert_eq!(gemini.model_id, "gemini-pro");
        assert_eq!(gemini.accuracy(), 0.0);
        assert_eq!(gemini.tokens_per_correct(), None);

        let llama = &stats[1];
        assert_eq!(llama.n, 3);
        assert_eq!(llama.correct, 1);
        assert_eq!(llama.parsed, 2);
        assert_eq!(llama.failures, 1);
        assert_eq!(llama.tokens_per_correct(), Some(200.0));
        assert!((llama.parser_success_rate() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_are_not_parse_failures() {
        let mut timed_out = row("gemini-pro", Technique::ZeroShot, false, true, 0);
        timed_out.error_kind = Some(ErrorKind::Timeout);
        let records = vec![
            timed_out.clone(),
            timed_out,
            row("gemini-pro", Technique::ZeroShot, false, true, 40),
            row("gemini-pro", Technique::ZeroShot, true, false, 40),
        ];
        let stats = summarize(&records);
        assert_eq!(stats[0].failures, 2);
        assert_eq!(stats[0].parsed, 1);
        assert!((stats[0].parser_success_rate() - 0.5).abs() < 1e-9);

        let all_failed = summarize(&records[..2]);
        assert_eq!(all_failed[0].parser_success_rate(), 0.0);
    }

    #[test]
    fn test_render_table_has_row_per_group() {
        let stats = summarize(&[row("llama-70b", Technique::FewShot, true, false, 80)]);
        let table = render_table(&stats);
        assert_eq!(table.lines().count(), 2);
        assert!(table.contains("llama-70b"));
        assert!(table.contains("100.0%"));
    }

    #[test]
    fn test_export_csv_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out").join("results.csv");
        let records = vec![
            row("llama-8b", Technique::ZeroShot, true, false, 10),
            row("llama-8b", Technique::FewShot, false, true, 12),
        ];
        assert_eq!(export_csv(&records, &out).unwrap(), 2);

        let mut reader = csv::Reader::from_path(&out).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "run_id");
        assert_eq!(&headers[2], "technique");
        assert!(headers.iter().any(|h| h == "tokens_estimated"));
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][2], "few-shot");
    }
}
