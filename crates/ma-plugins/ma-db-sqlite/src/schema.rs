//! Catalog schema. Statements are idempotent and run on every open.

use sqlx::sqlite::SqlitePool;

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        id                BLOB PRIMARY KEY,
        source            TEXT,
        original_filename TEXT,
        storage_path      TEXT NOT NULL UNIQUE,
        content_hash      TEXT NOT NULL UNIQUE,
        origin_url        TEXT UNIQUE,
        size_bytes        INTEGER NOT NULL,
        created_at        TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tags (
        id         BLOB PRIMARY KEY,
        name       TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    )",
    // Many-to-many: a tag may have several parents.
    "CREATE TABLE IF NOT EXISTS tag_parents (
        parent_id BLOB NOT NULL REFERENCES tags(id),
        child_id  BLOB NOT NULL REFERENCES tags(id),
        PRIMARY KEY (parent_id, child_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_tag_parents_child ON tag_parents(child_id)",
    "CREATE TABLE IF NOT EXISTS file_tags (
        file_id BLOB NOT NULL REFERENCES files(id),
        tag_id  BLOB NOT NULL REFERENCES tags(id),
        PRIMARY KEY (file_id, tag_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_file_tags_tag ON file_tags(tag_id)",
];

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await
}
