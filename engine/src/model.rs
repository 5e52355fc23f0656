//! Core data model for tracked files.
//!
//! This module defines the persistent entities:
//! - TrackedFile: a file under version management
//! - Version: a numbered snapshot of a tracked file
//! - Tag, Event, Project: organization and timeline records
//! - FileStatus, EventType: enums stored as text in the database

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Status of a tracked file relative to its recorded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// Content matches the recorded snapshot
    Ok,
    /// Content differs from the recorded snapshot
    Modified,
    /// The recorded path does not exist
    Missing,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Ok => "OK",
            FileStatus::Modified => "MODIFIED",
            FileStatus::Missing => "MISSING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(FileStatus::Ok),
            "MODIFIED" => Some(FileStatus::Modified),
            "MISSING" => Some(FileStatus::Missing),
            _ => None,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entry in a file's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Restore,
    Pin,
    Unpin,
    Delete,
    VerifyOk,
    VerifyModified,
    VerifyMissing,
    Relink,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Restore => "RESTORE",
            EventType::Pin => "PIN",
            EventType::Unpin => "UNPIN",
            EventType::Delete => "DELETE",
            EventType::VerifyOk => "VERIFY_OK",
            EventType::VerifyModified => "VERIFY_MODIFIED",
            EventType::VerifyMissing => "VERIFY_MISSING",
            EventType::Relink => "RELINK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RESTORE" => Some(EventType::Restore),
            "PIN" => Some(EventType::Pin),
            "UNPIN" => Some(EventType::Unpin),
            "DELETE" => Some(EventType::Delete),
            "VERIFY_OK" => Some(EventType::VerifyOk),
            "VERIFY_MODIFIED" => Some(EventType::VerifyModified),
            "VERIFY_MISSING" => Some(EventType::VerifyMissing),
            "RELINK" => Some(EventType::Relink),
            _ => None,
        }
    }

    /// The verification event matching a status.
    pub fn for_status(status: FileStatus) -> Self {
        match status {
            FileStatus::Ok => EventType::VerifyOk,
            FileStatus::Modified => EventType::VerifyModified,
            FileStatus::Missing => EventType::VerifyMissing,
        }
    }

    /// Human-readable label for timelines.
    pub fn label(&self) -> &'static str {
        match self {
            EventType::Restore => "Restored",
            EventType::Pin => "Pinned",
            EventType::Unpin => "Unpinned",
            EventType::Delete => "Deleted",
            EventType::VerifyOk => "Verified OK",
            EventType::VerifyModified => "Modified Detected",
            EventType::VerifyMissing => "Missing Detected",
            EventType::Relink => "Relinked",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file under version management.
///
/// Size, mtime and hash mirror the latest version (or the latest relink /
/// restore), so the verification engine can compare them against disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    /// Unique identifier (UUID string)
    pub id: String,

    /// Name shown to users; also drives backup artifact names
    pub display_name: String,

    /// Absolute path on disk, unique across all tracked files
    pub file_path: PathBuf,

    /// Recorded size in bytes
    pub file_size: u64,

    /// Recorded modification time, seconds since the Unix epoch
    pub modified_time: f64,

    pub status: FileStatus,

    /// RFC 3339 creation timestamp
    pub created_at: String,

    /// Content fingerprint (hex), if one has been computed
    pub file_hash: Option<String>,

    pub is_favorite: bool,
    pub is_archived: bool,
    pub project_id: Option<String>,
}

impl TrackedFile {
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// File name component of the tracked path, used for relink lookups.
    pub fn file_name(&self) -> Option<&str> {
        self.file_path.file_name().and_then(|n| n.to_str())
    }
}

/// An immutable, numbered snapshot of a tracked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub file_id: String,

    /// Starts at 1 per file and increases by one per snapshot
    pub version_number: i64,

    pub commit_message: String,
    pub file_size: u64,
    pub modified_time: f64,
    pub created_at: String,
    pub file_hash: Option<String>,

    /// Only true when `pinned_path` is recorded
    pub is_pinned: bool,
    pub pinned_path: Option<PathBuf>,
}

/// A tag attached to files; names are stored lowercase without `#`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

impl Tag {
    /// Normalize a user-entered tag name for storage.
    pub fn normalize(name: &str) -> String {
        let trimmed = name.trim();
        trimmed
            .strip_prefix('#')
            .unwrap_or(trimmed)
            .trim()
            .to_lowercase()
    }

    pub fn display_name(&self) -> String {
        format!("#{}", self.name)
    }
}

/// Append-only timeline entry for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub file_id: String,
    pub event_type: EventType,
    pub description: Option<String>,
    pub created_at: String,
}

/// A grouping of tracked files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,

    /// Hex color for UI display
    pub color: String,
    pub created_at: String,
}

/// Default project color when none is given.
pub const DEFAULT_PROJECT_COLOR: &str = "#007AFF";

/// Commit messages and tag names for one file, for search front-ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchData {
    pub commit_messages: Vec<String>,
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_normalize() {
        assert_eq!(Tag::normalize("#Draft"), "draft");
        assert_eq!(Tag::normalize("  #Final  "), "final");
        assert_eq!(Tag::normalize("Review"), "review");
        assert_eq!(Tag::normalize("# spaced"), "spaced");
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [FileStatus::Ok, FileStatus::Modified, FileStatus::Missing] {
            assert_eq!(FileStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FileStatus::parse("BOGUS"), None);
    }

    #[test]
    fn test_event_type_for_status() {
        assert_eq!(EventType::for_status(FileStatus::Ok), EventType::VerifyOk);
        assert_eq!(
            EventType::for_status(FileStatus::Missing),
            EventType::VerifyMissing
        );
        assert_eq!(EventType::parse("RELINK"), Some(EventType::Relink));
        assert_eq!(EventType::Relink.label(), "Relinked");
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&FileStatus::Modified).unwrap();
        assert_eq!(json, "\"MODIFIED\"");
    }
}
