//! Tiered execution logs
//!
//! Each analysis gets two log tiers: a bounded in-memory ring of the most
//! recent entries (fast path for page 1 and live tails) and an append-only
//! file (durable record, format `"[<RFC3339>] <message>"`, one entry per
//! line). The file is authoritative for totals; the ring is rebuilt from the
//! file tail on startup and trimmed on every append.
//!
//! This module owns the ring type and the file-level parsing, pagination and
//! filtering; the engine sequences them around the registry.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::types::{LogEntry, LogPage, LogSource, TimeRange};

/// Bounded most-recent-first cache of log entries.
///
/// Entries are stored oldest-first internally; readers get them reversed.
#[derive(Debug)]
pub struct MemoryLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl MemoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest beyond capacity.
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Replace the ring contents with the given oldest-first entries,
    /// keeping only the newest `capacity`.
    pub fn replace(&mut self, entries: Vec<LogEntry>) {
        self.entries.clear();
        let skip = entries.len().saturating_sub(self.capacity);
        self.entries.extend(entries.into_iter().skip(skip));
    }
}

/// Render an entry as its durable file line (no trailing newline).
pub fn format_line(entry: &LogEntry) -> String {
    format!("[{}] {}", entry.timestamp.to_rfc3339(), entry.message)
}

/// Parse one `"[<timestamp>] <message>"` line. Lines that do not match the
/// pattern (or carry an unparseable timestamp) yield `None` and are skipped
/// by readers.
pub fn parse_line(line: &str) -> Option<(DateTime<Utc>, String)> {
    let rest = line.strip_prefix('[')?;
    let (raw_ts, message) = rest.split_once("] ")?;
    let ts = DateTime::parse_from_rfc3339(raw_ts).ok()?;
    Some((ts.with_timezone(&Utc), message.to_string()))
}

/// Append one entry to the log file, creating it if absent.
pub async fn append_line(path: &Path, entry: &LogEntry) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::io(format!("failed to open log file {}", path.display()), e))?;
    let line = format!("{}\n", format_line(entry));
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| Error::io(format!("failed to append to {}", path.display()), e))
}

/// Truncate the log file to empty, creating it if absent.
pub async fn clear_file(path: &Path) -> Result<()> {
    tokio::fs::write(path, "")
        .await
        .map_err(|e| Error::io(format!("failed to clear log file {}", path.display()), e))
}

/// Parse the whole file into entries, oldest first. Sequence numbers are the
/// 1-based raw line positions, so they stay stable when malformed lines are
/// interleaved. A missing file is an empty history.
async fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::io(
                format!("failed to read log file {}", path.display()),
                e,
            ))
        }
    };

    Ok(content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            parse_line(line).map(|(timestamp, message)| LogEntry {
                sequence: index as u64 + 1,
                timestamp,
                message,
            })
        })
        .collect())
}

/// Serve one page from the file tier, most recent first.
pub async fn read_file_page(path: &Path, page: usize, limit: usize) -> Result<LogPage> {
    let page = page.max(1);
    let mut entries = read_entries(path).await?;
    if entries.is_empty() {
        return Ok(LogPage::empty(LogSource::File));
    }
    entries.reverse();

    let total = entries.len();
    let start = (page - 1).saturating_mul(limit);
    let end = start.saturating_add(limit).min(total);
    let window = if start >= total {
        Vec::new()
    } else {
        entries[start..end].to_vec()
    };

    Ok(LogPage {
        entries: window,
        has_more: end < total,
        total_count: total as u64,
        source: LogSource::File,
    })
}

/// Rebuilt in-memory state for one analysis: the file-backed total, the last
/// assigned sequence number, and the newest `capacity` entries (oldest
/// first) for the ring.
pub async fn rebuild_state(
    path: &Path,
    capacity: usize,
) -> Result<(u64, u64, Vec<LogEntry>)> {
    let entries = read_entries(path).await?;
    let total = entries.len() as u64;
    let last_sequence = entries.last().map(|e| e.sequence).unwrap_or(0);
    let skip = entries.len().saturating_sub(capacity);
    Ok((total, last_sequence, entries.into_iter().skip(skip).collect()))
}

/// The raw log content filtered to a time window, for download. Unlike the
/// paginated readers, a missing file here is an error: there is nothing to
/// download.
pub async fn filtered_content(
    path: &Path,
    name: &str,
    range: TimeRange,
    now: DateTime<Utc>,
) -> Result<String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::LogsNotFound(name.to_string()))
        }
        Err(e) => {
            return Err(Error::io(
                format!("failed to read log file {}", path.display()),
                e,
            ))
        }
    };

    let Some(cutoff) = range.cutoff(now) else {
        return Ok(content);
    };

    let filtered: Vec<&str> = content
        .lines()
        .filter(|line| matches!(parse_line(line), Some((ts, _)) if ts >= cutoff))
        .collect();
    Ok(filtered.join("\n"))
}
