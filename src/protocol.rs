//! Event-bus protocol and payload types shared by the sync pipeline.
//!
//! The worker thread publishes [`SyncMessage`] values; the front end is the
//! only consumer and turns them into terminal output.

use chrono::{DateTime, Utc};

use crate::anilist::MediaListStatus;

/// Reading status as written by the tracking-service export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalStatus {
    Reading,
    Completed,
    OnHold,
    Dropped,
    PlanToRead,
    /// Unrecognized export value, kept verbatim.
    Other(String),
}

impl LocalStatus {
    /// Case-insensitive parse; unknown values are kept as [`LocalStatus::Other`].
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reading" => Self::Reading,
            "completed" => Self::Completed,
            "on_hold" => Self::OnHold,
            "dropped" => Self::Dropped,
            "plan_to_read" => Self::PlanToRead,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// Maps through the fixed export -> catalog status table.
    pub fn to_list_status(&self) -> MediaListStatus {
        match self {
            Self::Reading => MediaListStatus::Current,
            Self::Completed => MediaListStatus::Completed,
            Self::OnHold => MediaListStatus::Paused,
            Self::Dropped => MediaListStatus::Dropped,
            Self::PlanToRead => MediaListStatus::Planning,
            Self::Other(raw) => MediaListStatus::Other(raw.clone()),
        }
    }
}

/// One title of imported reading data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub title: String,
    pub last_chapter_read: Option<u32>,
    pub status: LocalStatus,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// A catalog id resolved for a title, carrying the local reading state along.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedMatch {
    pub media_id: u64,
    pub last_chapter_read: Option<u32>,
    pub status: LocalStatus,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl ResolvedMatch {
    pub fn new(media_id: u64, entry: &LocalEntry) -> Self {
        Self {
            media_id,
            last_chapter_read: entry.last_chapter_read,
            status: entry.status.clone(),
            last_read_at: entry.last_read_at,
        }
    }
}

/// A title the search could not resolve, kept for the not-found report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundEntry {
    pub title: String,
    pub last_chapter_read: Option<u32>,
}

/// Coarse pipeline phase shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Authenticating,
    FetchingList,
    ResolvingTitles,
    CleaningIds,
    UpdatingEntries,
    WritingReports,
    Finished,
}

impl SyncPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Authenticating => "Checking access token",
            Self::FetchingList => "Fetching AniList manga list",
            Self::ResolvingTitles => "Resolving titles",
            Self::CleaningIds => "Cleaning resolved ids",
            Self::UpdatingEntries => "Updating AniList entries",
            Self::WritingReports => "Writing reports",
            Self::Finished => "Finished",
        }
    }
}

/// End-of-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub titles_total: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub completed_skipped: usize,
    pub failed: usize,
    pub not_found: usize,
    pub multiple_ids: usize,
    pub chapters_updated: u64,
    pub stopped: bool,
}

/// Messages published by the sync worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    PhaseChanged(SyncPhase),
    Progress { done: usize, total: usize },
    Log(String),
    Finished(SyncSummary),
    Failed(String),
}
