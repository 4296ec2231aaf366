use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            duration_seconds REAL,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL UNIQUE,
            source_path TEXT NOT NULL,
            source TEXT NOT NULL,
            checksum TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            text_content TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            document_type TEXT NOT NULL DEFAULT 'unknown',
            privilege_risk REAL NOT NULL DEFAULT 0.0,
            importance_score REAL NOT NULL DEFAULT 0.0,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            ingestion_run_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (ingestion_run_id) REFERENCES ingestion_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Fragments go with their document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata_fragments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL,
            fragment_type TEXT NOT NULL,
            fragment_value TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 1.0,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            error_message TEXT NOT NULL,
            stacktrace TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_memory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id TEXT NOT NULL,
            agent_role TEXT NOT NULL,
            turn_index INTEGER NOT NULL,
            message TEXT NOT NULL,
            summary TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE (trace_id, turn_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_path ON documents(source_path)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fragments_document_id ON metadata_fragments(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_type ON metadata_fragments(fragment_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dead_letters_trace_id ON dead_letters(trace_id)")
        .execute(pool)
        .await?;

    Ok(())
}
