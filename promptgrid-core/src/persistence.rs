//! Shared persistence utilities: durable JSONL appends, atomic rewrites,
//! and tolerant reading of append-only logs.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Atomically replace a file with raw bytes.
///
/// Writes to a `.tmp` sibling file, fsyncs it, then renames onto the target.
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically replace a JSONL file with one serialized value per line.
pub fn atomic_write_jsonl<T: serde::Serialize>(path: &Path, items: &[T]) -> io::Result<()> {
    let mut buf = String::new();
    for item in items {
        buf.push_str(&serde_json::to_string(item).map_err(io::Error::other)?);
        buf.push('\n');
    }
    atomic_write(path, buf.as_bytes())
}

/// Append one serialized value as a line and fsync before returning.
pub fn append_jsonl<T: serde::Serialize>(path: &Path, item: &T) -> io::Result<()> {
    let mut line = serde_json::to_string(item).map_err(io::Error::other)?;
    line.push('\n');
    let mut file = open_append(path)?;
    file.write_all(line.as_bytes())?;
    file.sync_data()
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Lines of an append-only log.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LogLines {
    /// Complete (newline-terminated), non-blank lines with their 1-based line numbers.
    pub lines: Vec<(usize, String)>,
    /// Byte length of the complete prefix of the file.
    pub complete_len: u64,
    /// A trailing fragment without a terminating newline, if any.
    pub torn_tail: Option<String>,
}

/// Read an append-only log, separating a torn final line from complete ones.
///
/// Returns an empty result if the file doesn't exist.
pub fn read_log(path: &Path) -> io::Result<LogLines> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LogLines::default()),
        Err(e) => return Err(e),
    };

    let complete_len = data
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    let (complete, tail) = data.split_at(complete_len);

    let text = String::from_utf8_lossy(complete);
    let lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| (i + 1, l.to_string()))
        .collect();

    let torn_tail = if tail.iter().all(|b| b.is_ascii_whitespace()) {
        None
    } else {
        Some(String::from_utf8_lossy(tail).into_owned())
    };

    Ok(LogLines {
        lines,
        complete_len: complete_len as u64,
        torn_tail,
    })
}

/// Cut a file back to `len` bytes and fsync it.
pub fn truncate_to(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}
