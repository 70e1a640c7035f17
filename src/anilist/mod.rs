//! AniList catalog abstractions and the GraphQL-backed implementation.

pub mod client;
pub mod gateway;
pub mod queries;

use serde_json::{Map, Value};

use crate::anilist::gateway::GatewayError;

/// Media format reported for prose releases; these never count as manga matches.
pub const NOVEL_FORMAT: &str = "NOVEL";

/// List status as understood by the catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaListStatus {
    Current,
    Planning,
    Completed,
    Dropped,
    Paused,
    Repeating,
    /// Any value the catalog or the export uses that has no fixed mapping.
    Other(String),
}

impl MediaListStatus {
    pub fn as_api_str(&self) -> &str {
        match self {
            Self::Current => "CURRENT",
            Self::Planning => "PLANNING",
            Self::Completed => "COMPLETED",
            Self::Dropped => "DROPPED",
            Self::Paused => "PAUSED",
            Self::Repeating => "REPEATING",
            Self::Other(value) => value.as_str(),
        }
    }

    pub fn from_api(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CURRENT" => Self::Current,
            "PLANNING" => Self::Planning,
            "COMPLETED" => Self::Completed,
            "DROPPED" => Self::Dropped,
            "PAUSED" => Self::Paused,
            "REPEATING" => Self::Repeating,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl std::fmt::Display for MediaListStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_api_str())
    }
}

/// One search result returned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMedia {
    pub id: u64,
    pub romaji: Option<String>,
    pub english: Option<String>,
    /// Title in the original script.
    pub native: Option<String>,
    pub synonyms: Vec<String>,
}

impl CandidateMedia {
    /// Iterates every non-empty title variant: romaji, english, native, then synonyms.
    pub fn title_variants(&self) -> impl Iterator<Item = &str> {
        [&self.romaji, &self.english, &self.native]
            .into_iter()
            .filter_map(|title| title.as_deref())
            .chain(self.synonyms.iter().map(String::as_str))
            .filter(|title| !title.trim().is_empty())
    }
}

/// One entry of the authenticated user's remote manga list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteListEntry {
    pub media_id: u64,
    pub progress: u32,
    pub status: MediaListStatus,
}

/// Variables of one list-entry save mutation. Only present fields are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveEntryVariables {
    pub media_id: u64,
    pub status: Option<MediaListStatus>,
    pub progress: Option<u32>,
    pub private: Option<bool>,
}

impl SaveEntryVariables {
    pub fn new(media_id: u64) -> Self {
        Self {
            media_id,
            status: None,
            progress: None,
            private: None,
        }
    }

    pub fn with_status(mut self, status: MediaListStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: Option<u32>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = Some(private);
        self
    }

    pub fn to_variables(&self) -> Value {
        let mut variables = Map::new();
        variables.insert("mediaId".to_string(), Value::from(self.media_id));
        if let Some(status) = &self.status {
            variables.insert("status".to_string(), Value::from(status.as_api_str()));
        }
        if let Some(progress) = self.progress {
            variables.insert("progress".to_string(), Value::from(progress));
        }
        if let Some(private) = self.private {
            variables.insert("private".to_string(), Value::from(private));
        }
        Value::Object(variables)
    }
}

/// Catalog operations the sync pipeline depends on.
///
/// `Ok(None)` means the service answered without usable data; callers treat the
/// entity as absent. `Err` is reserved for failures worth retrying.
pub trait MangaCatalog: Send {
    fn viewer_id(&self) -> Result<u64, crate::error::SyncError>;
    fn fetch_manga_list(&self, user_id: u64) -> Result<Vec<RemoteListEntry>, GatewayError>;
    fn search_manga(
        &self,
        title: &str,
        per_page: u32,
    ) -> Result<Option<Vec<CandidateMedia>>, GatewayError>;
    fn media_format(&self, media_id: u64) -> Result<Option<String>, GatewayError>;
    fn save_entry(&self, variables: &SaveEntryVariables) -> Result<Option<Value>, GatewayError>;
}
