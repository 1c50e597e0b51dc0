//! Durable record of committed experiment units.
//!
//! Two append-only JSONL files back the store:
//! - the result sink, one [`ResultRecord`] per line;
//! - the checkpoint, one [`ExperimentUnit`] marker per line.
//!
//! A commit appends and fsyncs the result row before the marker, so a crash
//! can only ever leave a row without a marker, never the reverse. The sink is
//! ground truth: on open, missing markers are rebuilt from it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CheckpointError, SweepError};
use crate::persistence::{self, LogLines};
use crate::types::{ExperimentUnit, ResultRecord};

/// How strictly to treat a checkpoint that disagrees with the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Markers without rows are fatal.
    Strict,
    /// Rewrite the checkpoint from the sink unconditionally.
    Repair,
    /// Reconcile in memory only. Neither file is touched and orphan markers
    /// are reported rather than fatal.
    ReadOnly,
}

/// What recovery did while opening the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Rows found in the result sink.
    pub rows: usize,
    /// Torn trailing lines found in either file (cut unless read-only).
    pub truncated_lines: usize,
    /// Rows that had no marker.
    pub missing_markers: usize,
    /// Markers that had no row (fatal in strict mode).
    pub orphan_markers: usize,
    /// Whether the checkpoint file was rewritten from the sink.
    pub rebuilt: bool,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.truncated_lines == 0 && !self.rebuilt
    }
}

pub struct CheckpointStore {
    results_path: PathBuf,
    checkpoint_path: PathBuf,
    completed: HashSet<ExperimentUnit>,
    read_only: bool,
}

impl CheckpointStore {
    /// Open in strict mode.
    pub fn open(results_path: &Path, checkpoint_path: &Path) -> Result<Self, SweepError> {
        Self::open_with(results_path, checkpoint_path, OpenMode::Strict).map(|(store, _)| store)
    }

    /// Open the store, reconciling both files.
    pub fn open_with(
        results_path: &Path,
        checkpoint_path: &Path,
        mode: OpenMode,
    ) -> Result<(Self, RecoveryReport), SweepError> {
        let mut report = RecoveryReport::default();

        let rows = read_trimmed(results_path, mode, &mut report)?;
        let mut row_units: Vec<ExperimentUnit> = Vec::with_capacity(rows.lines.len());
        let mut seen: HashMap<ExperimentUnit, usize> = HashMap::new();
        for (line, text) in &rows.lines {
            let record: ResultRecord = parse_line(results_path, *line, text)?;
            let unit = record.unit();
            if let Some(first) = seen.insert(unit.clone(), *line) {
                return Err(CheckpointError::Inconsistent {
                    message: format!(
                        "duplicate result rows for {} at lines {} and {} of {}",
                        unit,
                        first,
                        line,
                        results_path.display()
                    ),
                }
                .into());
            }
            row_units.push(unit);
        }
        report.rows = row_units.len();

        let marks = read_trimmed(checkpoint_path, mode, &mut report)?;
        let mut markers: Vec<ExperimentUnit> = Vec::with_capacity(marks.lines.len());
        for (line, text) in &marks.lines {
            markers.push(parse_line(checkpoint_path, *line, text)?);
        }
        let marker_set: HashSet<&ExperimentUnit> = markers.iter().collect();

        let orphans: Vec<&ExperimentUnit> = markers
            .iter()
            .filter(|u| !seen.contains_key(*u))
            .collect();
        report.orphan_markers = orphans.len();
        report.missing_markers = row_units.iter().filter(|u| !marker_set.contains(u)).count();
        let duplicate_markers = marker_set.len() != markers.len();

        if let Some(first) = orphans.first()
            && mode == OpenMode::Strict
        {
            return Err(CheckpointError::Inconsistent {
                message: format!(
                    "{} marked done in {} but no result row exists in {} ({} such unit(s)); \
                     run `promptgrid repair` to rebuild the checkpoint from the results",
                    first,
                    checkpoint_path.display(),
                    results_path.display(),
                    orphans.len()
                ),
            }
            .into());
        }

        let needs_rebuild = mode == OpenMode::Repair
            || report.missing_markers > 0
            || report.orphan_markers > 0
            || duplicate_markers;
        if needs_rebuild && mode != OpenMode::ReadOnly {
            warn!(
                path = %checkpoint_path.display(),
                missing = report.missing_markers,
                orphans = report.orphan_markers,
                "Rebuilding checkpoint from result sink"
            );
            persistence::atomic_write_jsonl(checkpoint_path, &row_units)?;
            report.rebuilt = true;
        }

        let completed: HashSet<ExperimentUnit> = row_units.into_iter().collect();
        info!(
            completed = completed.len(),
            results = %results_path.display(),
            "Checkpoint store opened"
        );

        Ok((
            Self {
                results_path: results_path.to_path_buf(),
                checkpoint_path: checkpoint_path.to_path_buf(),
                completed,
                read_only: mode == OpenMode::ReadOnly,
            },
            report,
        ))
    }

    /// Open without modifying either file. The store rejects commits.
    pub fn inspect(results_path: &Path, checkpoint_path: &Path) -> Result<(Self, RecoveryReport), SweepError> {
        Self::open_with(results_path, checkpoint_path, OpenMode::ReadOnly)
    }

    /// Rewrite the checkpoint from the sink, tolerating orphan markers.
    pub fn repair(results_path: &Path, checkpoint_path: &Path) -> Result<RecoveryReport, SweepError> {
        Self::open_with(results_path, checkpoint_path, OpenMode::Repair).map(|(_, report)| report)
    }

    pub fn is_done(&self, unit: &ExperimentUnit) -> bool {
        self.completed.contains(unit)
    }

    /// Units committed so far, as reconstructed at open plus later commits.
    pub fn load_completed(&self) -> &HashSet<ExperimentUnit> {
        &self.completed
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Durably record `record` as the result for `unit`.
    ///
    /// Fails with `AlreadyCommitted` if the unit is done; the sink is never
    /// written twice for one unit.
    pub fn commit(&mut self, unit: &ExperimentUnit, record: &ResultRecord) -> Result<(), SweepError> {
        if self.read_only {
            return Err(CheckpointError::Inconsistent {
                message: format!("cannot commit {}: store was opened read-only", unit),
            }
            .into());
        }
        if self.completed.contains(unit) {
            return Err(CheckpointError::AlreadyCommitted { unit: unit.clone() }.into());
        }
        if record.unit() != *unit {
            return Err(CheckpointError::Inconsistent {
                message: format!("record for {} committed as {}", record.unit(), unit),
            }
            .into());
        }

        persistence::append_jsonl(&self.results_path, record)?;
        persistence::append_jsonl(&self.checkpoint_path, unit)?;
        self.completed.insert(unit.clone());
        debug!(unit = %unit, correct = record.is_correct, "Committed unit");
        Ok(())
    }

    /// Fsync both files. Safe to call when nothing was written.
    pub fn sync(&self) -> Result<(), SweepError> {
        for path in [&self.results_path, &self.checkpoint_path] {
            if path.exists() {
                std::fs::File::open(path)?.sync_all()?;
            }
        }
        Ok(())
    }
}

/// Read every record in a result sink, ignoring a torn trailing line.
pub fn read_records(results_path: &Path) -> Result<Vec<ResultRecord>, SweepError> {
    let log = persistence::read_log(results_path)?;
    log.lines
        .iter()
        .map(|(line, text)| parse_line(results_path, *line, text))
        .collect()
}

fn read_trimmed(path: &Path, mode: OpenMode, report: &mut RecoveryReport) -> Result<LogLines, SweepError> {
    let log = persistence::read_log(path)?;
    if log.torn_tail.is_some() && mode == OpenMode::ReadOnly {
        report.truncated_lines += 1;
        return Ok(log);
    }
    if let Some(tail) = &log.torn_tail {
        warn!(
            path = %path.display(),
            bytes = tail.len(),
            "Truncating torn trailing line"
        );
        persistence::truncate_to(path, log.complete_len)?;
        report.truncated_lines += 1;
    }
    Ok(log)
}

fn parse_line<T: serde::de::DeserializeOwned>(path: &Path, line: usize, text: &str) -> Result<T, SweepError> {
    serde_json::from_str(text).map_err(|e| {
        CheckpointError::Corrupt {
            path: path.to_path_buf(),
            line,
            message: e.to_string(),
        }
        .into()
    })
}
