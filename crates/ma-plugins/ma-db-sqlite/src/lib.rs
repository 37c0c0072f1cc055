//! # ma-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `ma-core` domain models. The catalog is a single local database
//! file with one writer process.

mod schema;

use std::str::FromStr;

use async_trait::async_trait;
use ma_core::error::{AppError, Result};
use ma_core::models::{ContentHash, FilePatch, FileSource, Tag, TrackedFile};
use ma_core::traits::{FileRepo, TagRepo};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

const FILE_COLUMNS: &str =
    "id, source, original_filename, storage_path, content_hash, origin_url, size_bytes, created_at";

pub struct SqliteCatalog {
    pool: SqlitePool,
}

// Helper for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(blob).map_err(|e| AppError::Internal(format!("corrupt id column: {e}")))
}

/// Unique-constraint violations become `Conflict` so callers can resolve races.
fn db_err(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(db.message().to_string())
        }
        _ => AppError::Internal(e.to_string()),
    }
}

fn file_from_row(row: &SqliteRow) -> Result<TrackedFile> {
    let source = row
        .try_get::<Option<String>, _>("source")
        .map_err(db_err)?
        .map(|s| FileSource::from_str(&s))
        .transpose()?;
    let content_hash: String = row.try_get("content_hash").map_err(db_err)?;
    let size_bytes: i64 = row.try_get("size_bytes").map_err(db_err)?;

    Ok(TrackedFile {
        id: blob_to_uuid(&row.try_get::<Vec<u8>, _>("id").map_err(db_err)?)?,
        source,
        original_filename: row.try_get("original_filename").map_err(db_err)?,
        storage_path: row.try_get("storage_path").map_err(db_err)?,
        content_hash: ContentHash::parse(&content_hash)?,
        origin_url: row.try_get("origin_url").map_err(db_err)?,
        size_bytes: u64::try_from(size_bytes)
            .map_err(|_| AppError::Internal(format!("negative size for {content_hash}")))?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn tag_from_row(row: &SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: blob_to_uuid(&row.try_get::<Vec<u8>, _>("id").map_err(db_err)?)?,
        name: row.try_get("name").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

impl SqliteCatalog {
    /// Opens (creating if missing) the catalog and applies the schema.
    ///
    /// # Developer Note
    /// The pool holds a single connection: the archive assumes one writer, and
    /// `sqlite::memory:` databases only live as long as their connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        schema::migrate(&pool).await.map_err(db_err)?;
        debug!(database_url, "Catalog opened");
        Ok(Self { pool })
    }

    async fn fetch_one_file(&self, column: &str, value: &str) -> Result<Option<TrackedFile>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE {column} = ?");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn fetch_tags(&self, sql: &str, id: Uuid) -> Result<Vec<Tag>> {
        sqlx::query(sql)
            .bind(uuid_to_blob(id))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(tag_from_row)
            .collect()
    }
}

#[async_trait]
impl FileRepo for SqliteCatalog {
    async fn find_by_hash(&self, hash: &ContentHash) -> Result<Option<TrackedFile>> {
        self.fetch_one_file("content_hash", hash.as_str()).await
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<TrackedFile>> {
        self.fetch_one_file("origin_url", url).await
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<TrackedFile>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn insert_file(&self, file: &TrackedFile) -> Result<()> {
        let size = i64::try_from(file.size_bytes).map_err(|_| {
            AppError::ValidationError(format!("file too large: {}", file.size_bytes))
        })?;
        sqlx::query(
            "INSERT INTO files (id, source, original_filename, storage_path, content_hash, \
             origin_url, size_bytes, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(file.id))
        .bind(file.source.map(|s| s.as_str()))
        .bind(file.original_filename.as_deref())
        .bind(&file.storage_path)
        .bind(file.content_hash.as_str())
        .bind(file.origin_url.as_deref())
        .bind(size)
        .bind(file.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Only fills in the fields the patch carries; existing values are
    /// replaced, so callers decide what may be overwritten.
    async fn update_metadata(&self, id: Uuid, patch: &FilePatch) -> Result<TrackedFile> {
        let result = sqlx::query(
            "UPDATE files SET source = COALESCE(?, source), \
             original_filename = COALESCE(?, original_filename), \
             origin_url = COALESCE(?, origin_url) WHERE id = ?",
        )
        .bind(patch.source.map(|s| s.as_str()))
        .bind(patch.original_filename.as_deref())
        .bind(patch.origin_url.as_deref())
        .bind(uuid_to_blob(id))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("TrackedFile".into(), id.to_string()));
        }
        self.get_file(id)
            .await?
            .ok_or_else(|| AppError::NotFound("TrackedFile".into(), id.to_string()))
    }

    async fn count_files(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count.max(0) as u64)
    }

    async fn list_files(&self) -> Result<Vec<TrackedFile>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files ORDER BY created_at ASC");
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(file_from_row)
            .collect()
    }
}

#[async_trait]
impl TagRepo for SqliteCatalog {
    async fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        let row = sqlx::query("SELECT id, name, created_at FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(tag_from_row).transpose()
    }

    async fn insert_tag(&self, tag: &Tag) -> Result<()> {
        sqlx::query("INSERT INTO tags (id, name, created_at) VALUES (?, ?, ?)")
            .bind(uuid_to_blob(tag.id))
            .bind(&tag.name)
            .bind(tag.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn children_of(&self, tag_id: Uuid) -> Result<Vec<Tag>> {
        self.fetch_tags(
            "SELECT t.id, t.name, t.created_at FROM tags t \
             JOIN tag_parents p ON p.child_id = t.id WHERE p.parent_id = ? ORDER BY t.name",
            tag_id,
        )
        .await
    }

    async fn parents_of(&self, tag_id: Uuid) -> Result<Vec<Tag>> {
        self.fetch_tags(
            "SELECT t.id, t.name, t.created_at FROM tags t \
             JOIN tag_parents p ON p.parent_id = t.id WHERE p.child_id = ? ORDER BY t.name",
            tag_id,
        )
        .await
    }

    async fn link_child(&self, parent_id: Uuid, child_id: Uuid) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO tag_parents (parent_id, child_id) VALUES (?, ?)")
            .bind(uuid_to_blob(parent_id))
            .bind(uuid_to_blob(child_id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn attach_tag_to_file(&self, tag_id: Uuid, file_id: Uuid) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO file_tags (file_id, tag_id) VALUES (?, ?)")
            .bind(uuid_to_blob(file_id))
            .bind(uuid_to_blob(tag_id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn tags_for_file(&self, file_id: Uuid) -> Result<Vec<Tag>> {
        self.fetch_tags(
            "SELECT t.id, t.name, t.created_at FROM tags t \
             JOIN file_tags ft ON ft.tag_id = t.id WHERE ft.file_id = ? ORDER BY t.name",
            file_id,
        )
        .await
    }

    async fn files_for_tag(&self, tag_id: Uuid) -> Result<Vec<TrackedFile>> {
        let sql = format!(
            "SELECT {} FROM files f JOIN file_tags ft ON ft.file_id = f.id \
             WHERE ft.tag_id = ? ORDER BY f.created_at ASC",
            FILE_COLUMNS
                .split(", ")
                .map(|c| format!("f.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        sqlx::query(&sql)
            .bind(uuid_to_blob(tag_id))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(file_from_row)
            .collect()
    }
}
