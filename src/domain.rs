use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(String);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Label {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = !normalized.is_empty()
            && !normalized.starts_with('.')
            && !normalized
                .chars()
                .any(|ch| matches!(ch, '/' | '\\') || ch.is_control());
        if !is_valid {
            return Err(FetchError::InvalidLabel(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub label: Label,
    pub search_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Live,
    Purged,
    Restoring,
    Restored,
    RestoreTimeout,
    RestoreFailed,
    DownloadFailed,
    ExtractFailed,
    Other(String),
}

impl FileStatus {
    pub fn parse_portal(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "LIVE" => FileStatus::Live,
            "PURGED" => FileStatus::Purged,
            "RESTORING" | "RESTORE_IN_PROGRESS" => FileStatus::Restoring,
            "RESTORED" => FileStatus::Restored,
            other => FileStatus::Other(other.to_string()),
        }
    }

    pub fn needs_restore(&self) -> bool {
        matches!(self, FileStatus::Purged | FileStatus::Restoring)
    }

    pub fn is_downloadable(&self) -> bool {
        matches!(self, FileStatus::Live | FileStatus::Restored)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Live => write!(f, "LIVE"),
            FileStatus::Purged => write!(f, "PURGED"),
            FileStatus::Restoring => write!(f, "RESTORING"),
            FileStatus::Restored => write!(f, "RESTORED"),
            FileStatus::RestoreTimeout => write!(f, "RESTORE_TIMEOUT"),
            FileStatus::RestoreFailed => write!(f, "RESTORE_FAILED"),
            FileStatus::DownloadFailed => write!(f, "DOWNLOAD_FAILED"),
            FileStatus::ExtractFailed => write!(f, "EXTRACT_FAILED"),
            FileStatus::Other(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub dataset_id: String,
    pub file_id: String,
    pub file_name: String,
    pub file_status: FileStatus,
    pub phytozome_version: Option<u32>,
    pub selected: bool,
}

impl FileRecord {
    pub fn key(&self) -> (String, String) {
        (self.dataset_id.clone(), self.file_id.clone())
    }
}

#[derive(Debug, Clone)]
pub struct RestoreTicket {
    pub dataset_id: String,
    pub file_id: String,
    pub status_url: String,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}
