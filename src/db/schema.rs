//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- One row per distinct content digest
CREATE TABLE IF NOT EXISTS contents (
    digest TEXT PRIMARY KEY CHECK (length(digest) BETWEEN 1 AND 128),
    name TEXT NOT NULL CHECK (length(name) > 0),
    kind TEXT NOT NULL,
    size INTEGER NOT NULL CHECK (size >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contents_created_at ON contents(created_at);

-- One row per (digest, origin path); owned by its content row
CREATE TABLE IF NOT EXISTS origins (
    content_digest TEXT NOT NULL REFERENCES contents(digest) ON DELETE CASCADE,
    path TEXT NOT NULL CHECK (length(path) > 0),
    created_at TEXT NOT NULL,

    PRIMARY KEY (content_digest, path)
);

CREATE INDEX IF NOT EXISTS idx_origins_path ON origins(path);
"#;
