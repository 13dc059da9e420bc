//! Core domain types for scriptorium
//!
//! These types describe the unit of management (an *analysis*: a user-supplied
//! script with its own lifecycle) and every document the engine persists.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Analysis** | A managed script, tracked by name, run as a long-lived worker |
//! | **Live content** | The current, possibly unsaved, source file of an analysis |
//! | **Version** | An immutable, numbered snapshot of an analysis's source content |
//! | **Tiered logs** | Bounded in-memory ring (fast, recent) + append-only file (durable, complete) |
//! | **Team** | An organizational grouping an analysis can be assigned to |
//!
//! Names double as directory names, so they are validated by the storage
//! layout before ever touching the filesystem.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Team assigned when the caller does not specify one.
pub const UNCATEGORIZED_TEAM: &str = "uncategorized";

/// Schema tag written into the configuration document.
pub const CONFIG_DOCUMENT_VERSION: &str = "3.0";

// ============================================
// Analysis kind and status
// ============================================

/// What kind of worker an analysis runs as.
///
/// There is currently a single kind; the enum exists so the persisted
/// `type` field stays forward-compatible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    /// Long-lived listener process
    #[default]
    Listener,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Listener => "listener",
        }
    }
}

impl std::str::FromStr for AnalysisKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "listener" => Ok(AnalysisKind::Listener),
            other => Err(Error::Validation(format!("unknown analysis kind: {other}"))),
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an analysis worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// Not running (initial state)
    #[default]
    Stopped,
    /// Worker acknowledged a start signal
    Running,
    /// Last start attempt failed
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Stopped => "stopped",
            AnalysisStatus::Running => "running",
            AnalysisStatus::Error => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, AnalysisStatus::Running)
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Configuration document
// ============================================

/// The persisted subset of an analysis record.
///
/// Deliberately excludes runtime-only state (log ring, sequence counters):
/// the registry is rebuilt from these entries on restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfigEntry {
    #[serde(rename = "type")]
    pub kind: AnalysisKind,
    pub enabled: bool,
    pub status: AnalysisStatus,
    #[serde(default)]
    pub last_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub team_id: Option<String>,
}

/// The single JSON document describing every known analysis.
///
/// Durable shadow of the in-memory registry: every mutating operation writes
/// it back before reporting success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub version: String,
    #[serde(default)]
    pub analyses: BTreeMap<String, AnalysisConfigEntry>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            version: CONFIG_DOCUMENT_VERSION.to_string(),
            analyses: BTreeMap::new(),
        }
    }
}

// ============================================
// Version metadata
// ============================================

/// One stored snapshot in an analysis's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    /// Content size in bytes
    pub size: u64,
}

/// Per-analysis version history, persisted as `versions/metadata.json`.
///
/// Invariants: version numbers are assigned once, strictly increasing, never
/// reused; stored content is immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    pub versions: Vec<VersionEntry>,
    /// Number the next truly-new content will be stored under
    pub next_version_number: u32,
    /// Version whose stored content equals the live file, or
    /// `next_version_number` when the live content is an unsaved draft.
    /// Tolerated missing in metadata written before version tracking kept
    /// it; readers reconcile against the live file anyway.
    #[serde(default)]
    pub current_version: u32,
}

impl VersionMetadata {
    /// Default reported for an analysis that predates version tracking:
    /// its live file is presumed to be version 1.
    pub fn pre_versioning() -> Self {
        Self {
            versions: Vec::new(),
            next_version_number: 2,
            current_version: 1,
        }
    }
}

// ============================================
// Logs
// ============================================

/// One log line, as served to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Per-analysis monotonic counter
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Which tier served a log page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Memory,
    File,
}

/// A page of log entries, most recent first.
#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub has_more: bool,
    /// File-backed total, not just the size of this page or of the ring
    pub total_count: u64,
    pub source: LogSource,
}

impl LogPage {
    pub fn empty(source: LogSource) -> Self {
        Self {
            entries: Vec::new(),
            has_more: false,
            total_count: 0,
            source,
        }
    }
}

/// Time window for log downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    LastHour,
    LastDay,
    LastWeek,
    LastMonth,
    All,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::LastHour => "1h",
            TimeRange::LastDay => "24h",
            TimeRange::LastWeek => "7d",
            TimeRange::LastMonth => "30d",
            TimeRange::All => "all",
        }
    }

    /// The earliest timestamp included in the window, or `None` for `All`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeRange::LastHour => Some(now - Duration::hours(1)),
            TimeRange::LastDay => Some(now - Duration::hours(24)),
            TimeRange::LastWeek => Some(now - Duration::days(7)),
            TimeRange::LastMonth => Some(now - Duration::days(30)),
            TimeRange::All => None,
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1h" => Ok(TimeRange::LastHour),
            "24h" => Ok(TimeRange::LastDay),
            "7d" => Ok(TimeRange::LastWeek),
            "30d" => Ok(TimeRange::LastMonth),
            "all" => Ok(TimeRange::All),
            other => Err(Error::Validation(format!("invalid time range: {other}"))),
        }
    }
}

// ============================================
// Operation inputs and outcomes
// ============================================

/// Partial update applied by [`crate::engine::AnalysisEngine::update_analysis`].
#[derive(Debug, Clone, Default)]
pub struct AnalysisUpdate {
    /// New live source content
    pub content: Option<String>,
    /// New team assignment (validated against the team directory)
    pub team_id: Option<String>,
    /// Auto-restart on system start
    pub enabled: Option<bool>,
}

/// What `update_analysis` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    /// Worker was stopped and started again around the content change
    pub restarted: bool,
    /// Version number the pre-update content was captured under, if it was
    /// not already stored
    pub saved_version: Option<u32>,
}

/// What `rename_analysis` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenameOutcome {
    pub restarted: bool,
}

/// What `rollback_to_version` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackOutcome {
    pub restarted: bool,
    pub version: u32,
}

/// Listing entry for one analysis on disk.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub name: String,
    /// Humanized source file size ("1.5 MB")
    pub size: String,
    pub created: Option<DateTime<Utc>>,
    pub kind: AnalysisKind,
    pub status: AnalysisStatus,
    pub enabled: bool,
    pub last_start_time: Option<DateTime<Utc>>,
    pub team_id: Option<String>,
}
