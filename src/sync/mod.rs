//! Folder synchronization engine
//!
//! Reconciles paired local/remote folders by modification time
//! (last writer wins), one category at a time.
//!
//! - [`FolderSyncer`]: push and/or pull for one folder pair
//! - [`SyncOrchestrator`]: runs every enabled category and aggregates a [`SyncResult`]
//! - [`LifecyclePolicy`]: startup pull and shutdown push, watermark bookkeeping

mod folder;
mod lifecycle;
mod locks;
mod orchestrator;

pub use folder::{scan_local, FolderSyncer};
pub use lifecycle::{LifecyclePolicy, LifecycleReport, ManualSync};
pub use locks::SyncLocks;
pub use orchestrator::{ProgressSink, SyncOrchestrator};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::TetherError;
use crate::types::Category;

/// Sync direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncDirection {
    Both,
    PushOnly,
    PullOnly,
}

impl SyncDirection {
    pub fn pushes(&self) -> bool {
        matches!(self, SyncDirection::Both | SyncDirection::PushOnly)
    }

    pub fn pulls(&self) -> bool {
        matches!(self, SyncDirection::Both | SyncDirection::PullOnly)
    }

    /// Wording used in progress and result messages
    pub fn phrases(&self) -> &'static DirectionPhrases {
        let index = match self {
            SyncDirection::PushOnly => 0,
            SyncDirection::PullOnly => 1,
            SyncDirection::Both => 2,
        };
        &DIRECTION_PHRASES[index]
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncDirection::Both => write!(f, "both"),
            SyncDirection::PushOnly => write!(f, "push"),
            SyncDirection::PullOnly => write!(f, "pull"),
        }
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "both" | "sync" => Ok(SyncDirection::Both),
            "push" | "push_only" | "push-only" => Ok(SyncDirection::PushOnly),
            "pull" | "pull_only" | "pull-only" => Ok(SyncDirection::PullOnly),
            _ => Err(format!("Unknown sync direction: {}", s)),
        }
    }
}

/// Verb phrases for one direction
#[derive(Debug)]
pub struct DirectionPhrases {
    pub verb: &'static str,
    pub suffix: &'static str,
    pub completed: &'static str,
}

const DIRECTION_PHRASES: [DirectionPhrases; 3] = [
    DirectionPhrases {
        verb: "Pushing",
        suffix: " to remote",
        completed: "Push to remote completed successfully",
    },
    DirectionPhrases {
        verb: "Pulling",
        suffix: " from remote",
        completed: "Pull from remote completed successfully",
    },
    DirectionPhrases {
        verb: "Synchronizing",
        suffix: "",
        completed: "Synchronization completed successfully",
    },
];

impl DirectionPhrases {
    /// Progress line for one category, e.g. "Pushing Notes to remote..."
    pub fn progress(&self, category: Category) -> String {
        format!("{} {}{}...", self.verb, category, self.suffix)
    }
}

/// Whether a run considers every file or only those changed after a watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SyncMode {
    #[default]
    Full,
    Incremental,
}

/// Which half of a folder sync produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    Push,
    Pull,
}

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileAction {
    Uploaded,
    Downloaded,
    Skipped,
    Failed,
}

/// Per-file result of a folder sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub relative_path: String,
    pub phase: SyncPhase,
    pub action: FileAction,
    /// Why a file was skipped or failed
    pub reason: Option<String>,
}

impl FileOutcome {
    pub fn new(relative_path: impl Into<String>, phase: SyncPhase, action: FileAction) -> Self {
        Self {
            relative_path: relative_path.into(),
            phase,
            action,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Counters and outcomes for one folder pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<FileOutcome>,
}

impl FolderReport {
    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome.action {
            FileAction::Uploaded => self.uploaded += 1,
            FileAction::Downloaded => self.downloaded += 1,
            FileAction::Skipped => self.skipped += 1,
            FileAction::Failed => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Files moved in either direction
    pub fn transfers(&self) -> usize {
        self.uploaded + self.downloaded
    }

    /// Outcomes that failed
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.action == FileAction::Failed)
    }
}

/// Aggregate result of one orchestrator run
#[derive(Debug)]
pub struct SyncResult {
    pub run_id: Uuid,
    pub success: bool,
    pub message: String,
    pub direction: SyncDirection,
    pub mode: SyncMode,
    /// When the run began; used as the watermark on success
    pub started_at: DateTime<Utc>,
    /// Completion time, set only on success
    pub sync_time: Option<DateTime<Utc>>,
    /// Reports for every category that completed
    pub categories: BTreeMap<Category, FolderReport>,
    /// Verbose diagnostic for an optional details panel
    pub detailed_error: Option<String>,
    /// Error that aborted the run
    pub cause: Option<TetherError>,
}

impl SyncResult {
    pub(crate) fn begin(direction: SyncDirection, mode: SyncMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            success: false,
            message: String::new(),
            direction,
            mode,
            started_at: Utc::now(),
            sync_time: None,
            categories: BTreeMap::new(),
            detailed_error: None,
            cause: None,
        }
    }

    /// A run that was refused before touching any category
    pub fn not_attempted(direction: SyncDirection, mode: SyncMode, message: impl Into<String>) -> Self {
        let mut result = Self::begin(direction, mode);
        result.message = message.into();
        result
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>, cause: TetherError) {
        self.success = false;
        self.message = message.into();
        self.detailed_error = Some(cause.diagnostic());
        self.cause = Some(cause);
    }

    pub(crate) fn complete(&mut self) {
        self.success = true;
        self.sync_time = Some(Utc::now());
        self.message = self.direction.phrases().completed.to_string();
    }

    pub fn total_uploaded(&self) -> usize {
        self.categories.values().map(|r| r.uploaded).sum()
    }

    pub fn total_downloaded(&self) -> usize {
        self.categories.values().map(|r| r.downloaded).sum()
    }

    /// Every failed file, tagged with its category
    pub fn failed_files(&self) -> Vec<(Category, &FileOutcome)> {
        self.categories
            .iter()
            .flat_map(|(c, r)| r.failures().map(move |o| (*c, o)))
            .collect()
    }
}

/// Sync event for logging/notifications
#[derive(Debug, Clone, Serialize)]
pub struct SyncEvent {
    pub run_id: Uuid,
    pub direction: SyncDirection,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_transferred: usize,
    pub success: bool,
    pub error: Option<String>,
}

impl From<&SyncResult> for SyncEvent {
    fn from(result: &SyncResult) -> Self {
        Self {
            run_id: result.run_id,
            direction: result.direction,
            started_at: result.started_at,
            completed_at: result.sync_time,
            files_transferred: result.total_uploaded() + result.total_downloaded(),
            success: result.success,
            error: result.cause.as_ref().map(|e| e.to_string()),
        }
    }
}
