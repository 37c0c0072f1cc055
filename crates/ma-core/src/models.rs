//! # Domain Models
//!
//! These structs represent the persisted entities of the archive.
//! We use UUID v7 for time-ordered, globally unique identification.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Which importer produced a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    Twitter,
    LiveJournal,
    DeviantArt,
    Shotwell,
    YouTube,
    Folder,
}

impl FileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileSource::Twitter => "twitter",
            FileSource::LiveJournal => "livejournal",
            FileSource::DeviantArt => "deviantart",
            FileSource::Shotwell => "shotwell",
            FileSource::YouTube => "youtube",
            FileSource::Folder => "folder",
        }
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" => Ok(FileSource::Twitter),
            "livejournal" | "lj" => Ok(FileSource::LiveJournal),
            "deviantart" | "da" => Ok(FileSource::DeviantArt),
            "shotwell" => Ok(FileSource::Shotwell),
            "youtube" | "yt" => Ok(FileSource::YouTube),
            "folder" => Ok(FileSource::Folder),
            other => Err(AppError::ValidationError(format!(
                "unknown file source '{other}'"
            ))),
        }
    }
}

/// Lowercase hex digest identifying a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parses a hex digest. Uppercase input is normalized.
    pub fn parse(raw: &str) -> Result<Self> {
        let digest = raw.trim().to_ascii_lowercase();
        if digest.len() < 8 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AppError::ValidationError(format!(
                "'{raw}' is not a hex content hash"
            )));
        }
        Ok(Self(digest))
    }

    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory shard for the sharded media layout.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

/// One physical file in the media root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub id: Uuid,
    /// `None` for manual imports and recovered stubs.
    pub source: Option<FileSource>,
    /// Unknown for recovered stubs until a later ingest backfills it.
    pub original_filename: Option<String>,
    /// Path relative to the media root, derived from the hash and extension.
    pub storage_path: String,
    pub content_hash: ContentHash,
    /// Remote URL this file was fetched from; unique when present.
    pub origin_url: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl TrackedFile {
    pub fn new(
        content_hash: ContentHash,
        storage_path: String,
        size_bytes: u64,
        source: Option<FileSource>,
        original_filename: Option<String>,
        origin_url: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            source,
            original_filename,
            storage_path,
            content_hash,
            origin_url,
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// A record for bytes found on disk whose metadata was lost.
    pub fn stub(content_hash: ContentHash, storage_path: String, size_bytes: u64) -> Self {
        Self::new(content_hash, storage_path, size_bytes, None, None, None)
    }

    pub fn is_stub(&self) -> bool {
        self.original_filename.is_none()
    }

    /// Extension of the stored file including the leading dot, or "".
    pub fn extension(&self) -> &str {
        let name = self
            .storage_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_path);
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[idx..],
            _ => "",
        }
    }
}

/// Metadata fields to fill in on an existing record. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilePatch {
    pub source: Option<FileSource>,
    pub original_filename: Option<String>,
    pub origin_url: Option<String>,
}

impl FilePatch {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.original_filename.is_none() && self.origin_url.is_none()
    }
}

/// A node in the tag forest. Parent links live in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// How a local source file enters the media root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    #[default]
    Copy,
    /// Relocate the source file; only happens when the content is new.
    Move,
}

/// A hash-named file found while scanning the media root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_hash: ContentHash,
    pub storage_path: String,
}
