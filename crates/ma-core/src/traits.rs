//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the services crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ContentHash, FilePatch, ImportMode, StoredObject, Tag, TrackedFile};

/// Catalog persistence for tracked files.
#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn find_by_hash(&self, hash: &ContentHash) -> Result<Option<TrackedFile>>;
    async fn find_by_url(&self, url: &str) -> Result<Option<TrackedFile>>;
    async fn get_file(&self, id: Uuid) -> Result<Option<TrackedFile>>;

    /// Inserts a new record. Fails with `AppError::Conflict` when the hash,
    /// storage path or origin URL is already taken.
    async fn insert_file(&self, file: &TrackedFile) -> Result<()>;

    /// Applies the non-empty fields of `patch` and returns the updated record.
    async fn update_metadata(&self, id: Uuid, patch: &FilePatch) -> Result<TrackedFile>;

    async fn count_files(&self) -> Result<u64>;
    async fn list_files(&self) -> Result<Vec<TrackedFile>>;
}

/// Catalog persistence for tags, their hierarchy and file associations.
#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn find_tag(&self, name: &str) -> Result<Option<Tag>>;

    /// Fails with `AppError::Conflict` when the name is taken.
    async fn insert_tag(&self, tag: &Tag) -> Result<()>;

    async fn children_of(&self, tag_id: Uuid) -> Result<Vec<Tag>>;
    async fn parents_of(&self, tag_id: Uuid) -> Result<Vec<Tag>>;

    /// Records `child` under `parent`. Linking twice is a no-op.
    async fn link_child(&self, parent_id: Uuid, child_id: Uuid) -> Result<()>;

    /// Linking twice is a no-op.
    async fn attach_tag_to_file(&self, tag_id: Uuid, file_id: Uuid) -> Result<()>;
    async fn tags_for_file(&self, file_id: Uuid) -> Result<Vec<Tag>>;
    async fn files_for_tag(&self, tag_id: Uuid) -> Result<Vec<TrackedFile>>;
}

/// Byte storage under the media root.
///
/// Paths handed in and out are relative to the root and use `/` separators.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Deterministic location for a hash and resolved extension.
    fn relative_path(&self, hash: &ContentHash, extension: &str) -> String;

    fn absolute_path(&self, storage_path: &str) -> PathBuf;

    /// Finds a stored file for `hash` regardless of its extension.
    async fn locate(&self, hash: &ContentHash) -> Result<Option<String>>;

    /// Writes `data` to a path that must not exist yet.
    async fn write_new(&self, storage_path: &str, data: &[u8]) -> Result<()>;

    /// Copies or moves `source` to a path that must not exist yet.
    async fn import_new(&self, storage_path: &str, source: &Path, mode: ImportMode) -> Result<()>;

    /// Moves a stored file back out of the media root (undo of a moved import).
    async fn export(&self, storage_path: &str, destination: &Path) -> Result<()>;

    async fn remove(&self, storage_path: &str) -> Result<()>;

    /// Size of the stored file, or `None` if it is missing.
    async fn size(&self, storage_path: &str) -> Result<Option<u64>>;

    /// Up to `len` leading bytes, or `None` if the file is missing.
    async fn read_prefix(&self, storage_path: &str, len: usize) -> Result<Option<Vec<u8>>>;

    /// Lists every hash-named file under the root.
    async fn scan(&self) -> Result<Vec<StoredObject>>;

    /// Removes temp files left behind by interrupted writes.
    async fn cleanup_temp_files(&self) -> Result<usize>;
}

/// Retrieves remote bytes for `download_and_ingest`.
///
/// Implementations report every failure as `AppError::FetchFailed`.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}
