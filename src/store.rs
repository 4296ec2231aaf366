//! SQLite repository for runs, documents, fragments and dead letters.
//!
//! All functions take a pool and return [`crate::error::Result`], so database
//! failures surface as [`IngestError::Persistence`](crate::error::IngestError::Persistence).
//! Timestamps are Unix milliseconds.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{IngestError, Result};
use crate::models::{
    ConversationTurn, DeadLetter, Document, FragmentKind, IngestionRun, Metadata,
    MetadataFragment, RunStatus,
};

const MAX_ID_ATTEMPTS: usize = 8;

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fields of a document about to be inserted.
#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub source_path: &'a str,
    pub source: &'a str,
    pub checksum: &'a str,
    pub mime_type: &'a str,
    pub text_content: &'a str,
    pub summary: &'a str,
    pub document_type: &'a str,
    pub privilege_risk: f64,
    pub importance_score: f64,
    pub metadata: &'a Metadata,
    pub ingestion_run_id: i64,
}

// ============ Runs ============

/// Insert a run in `running` state and return its row id.
pub async fn create_run(pool: &SqlitePool, trace_id: &str, source: &str) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO ingestion_runs (trace_id, source, status, started_at) VALUES (?, ?, ?, ?)",
    )
    .bind(trace_id)
    .bind(source)
    .bind(RunStatus::Running.as_str())
    .bind(now_millis())
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Move a run to a terminal state. Only `running` runs are updated, so a run
/// already finished elsewhere keeps its first outcome.
pub async fn finish_run(
    pool: &SqlitePool,
    run_id: i64,
    status: RunStatus,
    error_message: Option<&str>,
) -> Result<()> {
    if !status.is_terminal() {
        return Err(IngestError::Validation(
            "a run can only finish as completed or failed".to_string(),
        ));
    }

    let completed_at = now_millis();
    sqlx::query(
        r#"
        UPDATE ingestion_runs
        SET status = ?,
            completed_at = ?,
            duration_seconds = MAX(0.0, (? - started_at) / 1000.0),
            error_message = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(completed_at)
    .bind(completed_at)
    .bind(error_message)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

fn run_from_row(row: &SqliteRow) -> IngestionRun {
    let status: String = row.get("status");
    IngestionRun {
        id: row.get("id"),
        trace_id: row.get("trace_id"),
        source: row.get("source"),
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration_seconds: row.get("duration_seconds"),
        error_message: row.get("error_message"),
    }
}

const RUN_COLUMNS: &str =
    "id, trace_id, source, status, started_at, completed_at, duration_seconds, error_message";

pub async fn get_run(pool: &SqlitePool, run_id: i64) -> Result<Option<IngestionRun>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM ingestion_runs WHERE id = ?",
        RUN_COLUMNS
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(run_from_row))
}

pub async fn get_run_by_trace(pool: &SqlitePool, trace_id: &str) -> Result<Option<IngestionRun>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM ingestion_runs WHERE trace_id = ?",
        RUN_COLUMNS
    ))
    .bind(trace_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(run_from_row))
}

/// Runs newest first, optionally restricted to one status.
pub async fn list_runs(
    pool: &SqlitePool,
    status: Option<RunStatus>,
    limit: i64,
) -> Result<Vec<IngestionRun>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {} FROM ingestion_runs WHERE status = ? ORDER BY id DESC LIMIT ?",
                RUN_COLUMNS
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM ingestion_runs ORDER BY id DESC LIMIT ?",
                RUN_COLUMNS
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(run_from_row).collect())
}

/// `(status, count)` pairs.
pub async fn count_runs(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM ingestion_runs GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("status"), row.get("n")))
        .collect())
}

// ============ Documents ============

/// An existing document with the same path and content, if any.
pub async fn find_document_by_path_and_checksum(
    pool: &SqlitePool,
    source_path: &str,
    checksum: &str,
) -> Result<Option<String>> {
    let external_id: Option<String> = sqlx::query_scalar(
        "SELECT external_id FROM documents WHERE source_path = ? AND checksum = ? ORDER BY id LIMIT 1",
    )
    .bind(source_path)
    .bind(checksum)
    .fetch_optional(pool)
    .await?;
    Ok(external_id)
}

/// A fresh `doc-xxxxxxxxxxxx` id not yet present in the store.
pub async fn mint_external_id(pool: &SqlitePool) -> Result<String> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        let candidate = format!("doc-{}", &raw[..12]);
        let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE external_id = ?")
            .bind(&candidate)
            .fetch_one(pool)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Err(IngestError::Validation(
        "could not mint a unique document id".to_string(),
    ))
}

/// Insert the document and one fragment row per metadata value, atomically.
pub async fn insert_document_with_fragments(
    pool: &SqlitePool,
    external_id: &str,
    doc: &NewDocument<'_>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let document_id = sqlx::query(
        r#"
        INSERT INTO documents (
            external_id, source_path, source, checksum, mime_type, text_content,
            summary, document_type, privilege_risk, importance_score, metadata_json,
            ingestion_run_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(external_id)
    .bind(doc.source_path)
    .bind(doc.source)
    .bind(doc.checksum)
    .bind(doc.mime_type)
    .bind(doc.text_content)
    .bind(doc.summary)
    .bind(doc.document_type)
    .bind(doc.privilege_risk)
    .bind(doc.importance_score)
    .bind(doc.metadata.to_json())
    .bind(doc.ingestion_run_id)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (kind, value) in doc.metadata.pairs() {
        sqlx::query(
            "INSERT INTO metadata_fragments (document_id, fragment_type, fragment_value, confidence) VALUES (?, ?, ?, 1.0)",
        )
        .bind(document_id)
        .bind(kind.as_str())
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(document_id)
}

const DOCUMENT_COLUMNS: &str = "id, external_id, source_path, source, checksum, mime_type, \
    text_content, summary, document_type, privilege_risk, importance_score, metadata_json, \
    ingestion_run_id, created_at";

fn document_from_row(row: &SqliteRow) -> Document {
    let metadata_json: String = row.get("metadata_json");
    Document {
        id: row.get("id"),
        external_id: row.get("external_id"),
        source_path: row.get("source_path"),
        source: row.get("source"),
        checksum: row.get("checksum"),
        mime_type: row.get("mime_type"),
        text_content: row.get("text_content"),
        summary: row.get("summary"),
        document_type: row.get("document_type"),
        privilege_risk: row.get("privilege_risk"),
        importance_score: row.get("importance_score"),
        metadata: Metadata::from_json(&metadata_json),
        ingestion_run_id: row.get("ingestion_run_id"),
        created_at: row.get("created_at"),
    }
}

/// Every document in insertion order.
pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<Document>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM documents ORDER BY id ASC",
        DOCUMENT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(document_from_row).collect())
}

pub async fn get_document(pool: &SqlitePool, external_id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM documents WHERE external_id = ?",
        DOCUMENT_COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(document_from_row))
}

fn fragment_from_row(row: &SqliteRow) -> MetadataFragment {
    let kind: String = row.get("fragment_type");
    MetadataFragment {
        id: row.get("id"),
        document_id: row.get("document_id"),
        fragment_type: FragmentKind::from(kind),
        fragment_value: row.get("fragment_value"),
        confidence: row.get("confidence"),
    }
}

pub async fn get_fragments(pool: &SqlitePool, document_id: i64) -> Result<Vec<MetadataFragment>> {
    let rows = sqlx::query(
        "SELECT id, document_id, fragment_type, fragment_value, confidence FROM metadata_fragments WHERE document_id = ? ORDER BY id",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(fragment_from_row).collect())
}

/// `(fragment_value, external_id)` pairs for one fragment kind, sorted by value.
pub async fn list_fragments_by_kind(
    pool: &SqlitePool,
    kind: &FragmentKind,
) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT f.fragment_value, d.external_id
        FROM metadata_fragments f
        JOIN documents d ON d.id = f.document_id
        WHERE f.fragment_type = ?
        ORDER BY f.fragment_value, d.external_id
        "#,
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("fragment_value"), row.get("external_id")))
        .collect())
}

pub async fn count_fragments(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT fragment_type, COUNT(*) AS n FROM metadata_fragments GROUP BY fragment_type ORDER BY fragment_type",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("fragment_type"), row.get("n")))
        .collect())
}

/// Document count and summed text length, for seeding classifier statistics.
pub async fn corpus_totals(pool: &SqlitePool) -> Result<(u64, u64)> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n, COALESCE(SUM(LENGTH(text_content)), 0) AS chars FROM documents",
    )
    .fetch_one(pool)
    .await?;
    let n: i64 = row.get("n");
    let chars: i64 = row.get("chars");
    Ok((n.max(0) as u64, chars.max(0) as u64))
}

/// Remove a document and its fragments. Returns whether anything was deleted.
pub async fn delete_document(pool: &SqlitePool, external_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE external_id = ?")
        .bind(external_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============ Dead letters ============

pub async fn add_dead_letter(
    pool: &SqlitePool,
    trace_id: &str,
    payload: &serde_json::Value,
    error_message: &str,
    stacktrace: Option<&str>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO dead_letters (trace_id, payload, error_message, stacktrace, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(trace_id)
    .bind(payload.to_string())
    .bind(error_message)
    .bind(stacktrace)
    .bind(now_millis())
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Dead letters newest first.
pub async fn list_dead_letters(pool: &SqlitePool, limit: i64) -> Result<Vec<DeadLetter>> {
    let rows = sqlx::query(
        "SELECT id, trace_id, payload, error_message, stacktrace, created_at FROM dead_letters ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let payload: String = row.get("payload");
            DeadLetter {
                id: row.get("id"),
                trace_id: row.get("trace_id"),
                payload: serde_json::from_str(&payload)
                    .unwrap_or(serde_json::Value::String(payload)),
                error_message: row.get("error_message"),
                stacktrace: row.get("stacktrace"),
                created_at: row.get("created_at"),
            }
        })
        .collect())
}

pub async fn count_dead_letters(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

// ============ Conversation memory ============

/// Append a turn to `trace_id`'s conversation and return its `turn_index`.
pub async fn add_conversation_turn(
    pool: &SqlitePool,
    trace_id: &str,
    agent_role: &str,
    message: &str,
    summary: Option<&str>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let turn_index: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversation_memory WHERE trace_id = ?")
            .bind(trace_id)
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query(
        "INSERT INTO conversation_memory (trace_id, agent_role, turn_index, message, summary, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(trace_id)
    .bind(agent_role)
    .bind(turn_index)
    .bind(message)
    .bind(summary)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(turn_index)
}

/// Turns of one conversation in order.
pub async fn list_conversation(pool: &SqlitePool, trace_id: &str) -> Result<Vec<ConversationTurn>> {
    let rows = sqlx::query(
        "SELECT id, trace_id, agent_role, turn_index, message, summary, created_at FROM conversation_memory WHERE trace_id = ? ORDER BY turn_index",
    )
    .bind(trace_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ConversationTurn {
            id: row.get("id"),
            trace_id: row.get("trace_id"),
            agent_role: row.get("agent_role"),
            turn_index: row.get("turn_index"),
            message: row.get("message"),
            summary: row.get("summary"),
            created_at: row.get("created_at"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn pool(tmp: &TempDir) -> SqlitePool {
        let config = crate::config::Config::rooted_at(tmp.path());
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        pool
    }

    fn sample_metadata() -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(FragmentKind::Dates, "2023-01-05");
        meta.insert(FragmentKind::Entities, "Alice Corp");
        meta.insert(FragmentKind::Entities, "Bob Industries");
        meta.declare(FragmentKind::Emails);
        meta
    }

    async fn insert_sample(pool: &SqlitePool, run_id: i64, path: &str) -> String {
        let meta = sample_metadata();
        let external_id = mint_external_id(pool).await.unwrap();
        insert_document_with_fragments(
            pool,
            &external_id,
            &NewDocument {
                source_path: path,
                source: "test",
                checksum: "abc",
                mime_type: "text/plain",
                text_content: "hello world",
                summary: "hello world",
                document_type: "unknown",
                privilege_risk: 0.0,
                importance_score: 0.5,
                metadata: &meta,
                ingestion_run_id: run_id,
            },
        )
        .await
        .unwrap();
        external_id
    }

    #[tokio::test]
    async fn run_lifecycle_records_duration() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let run_id = create_run(&pool, "trace-1", "test").await.unwrap();
        let run = get_run(&pool, run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());

        finish_run(&pool, run_id, RunStatus::Completed, None).await.unwrap();
        let run = get_run_by_trace(&pool, "trace-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.duration_seconds.unwrap() >= 0.0);
        assert!(run.completed_at.unwrap() >= run.started_at);
    }

    #[tokio::test]
    async fn finished_runs_keep_their_first_outcome() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let run_id = create_run(&pool, "trace-2", "test").await.unwrap();
        finish_run(&pool, run_id, RunStatus::Completed, None).await.unwrap();
        finish_run(&pool, run_id, RunStatus::Failed, Some("late")).await.unwrap();
        let run = get_run(&pool, run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error_message.is_none());

        assert!(finish_run(&pool, run_id, RunStatus::Running, None).await.is_err());
    }

    #[tokio::test]
    async fn document_and_fragments_are_stored_together() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let run_id = create_run(&pool, "trace-3", "test").await.unwrap();
        let external_id = insert_sample(&pool, run_id, "/data/a.txt").await;

        assert!(external_id.starts_with("doc-"));
        assert_eq!(external_id.len(), "doc-".len() + 12);

        let doc = get_document(&pool, &external_id).await.unwrap().unwrap();
        assert_eq!(doc.metadata, sample_metadata());
        let fragments = get_fragments(&pool, doc.id).await.unwrap();
        // empty kinds produce no rows
        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f.confidence == 1.0));

        let found = find_document_by_path_and_checksum(&pool, "/data/a.txt", "abc")
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some(external_id.as_str()));
        assert!(find_document_by_path_and_checksum(&pool, "/data/a.txt", "other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_fragments() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let run_id = create_run(&pool, "trace-4", "test").await.unwrap();
        let external_id = insert_sample(&pool, run_id, "/data/b.txt").await;
        let doc = get_document(&pool, &external_id).await.unwrap().unwrap();

        assert!(delete_document(&pool, &external_id).await.unwrap());
        assert!(get_fragments(&pool, doc.id).await.unwrap().is_empty());
        assert!(!delete_document(&pool, &external_id).await.unwrap());
    }

    #[tokio::test]
    async fn runs_and_dead_letters_list_newest_first() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        let first = create_run(&pool, "trace-a", "test").await.unwrap();
        let second = create_run(&pool, "trace-b", "test").await.unwrap();
        finish_run(&pool, first, RunStatus::Failed, Some("boom")).await.unwrap();

        let all = list_runs(&pool, None, 10).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second, first]);
        let failed = list_runs(&pool, Some(RunStatus::Failed), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_message.as_deref(), Some("boom"));

        let payload = serde_json::json!({"path": "/x.xyz", "source": "test"});
        add_dead_letter(&pool, "trace-a", &payload, "boom", None).await.unwrap();
        add_dead_letter(&pool, "trace-b", &payload, "bang", Some("bt")).await.unwrap();
        let letters = list_dead_letters(&pool, 10).await.unwrap();
        assert_eq!(letters[0].trace_id, "trace-b");
        assert_eq!(letters[1].payload, payload);
        assert_eq!(count_dead_letters(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn corpus_totals_sum_text_lengths() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        assert_eq!(corpus_totals(&pool).await.unwrap(), (0, 0));
        let run_id = create_run(&pool, "trace-5", "test").await.unwrap();
        insert_sample(&pool, run_id, "/data/c.txt").await;
        insert_sample(&pool, run_id, "/data/d.txt").await;
        assert_eq!(corpus_totals(&pool).await.unwrap(), (2, 22));
    }

    #[tokio::test]
    async fn conversation_turns_are_numbered_per_trace() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;

        assert_eq!(
            add_conversation_turn(&pool, "trace-x", "CoCounsel", "first", Some("q"))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            add_conversation_turn(&pool, "trace-y", "CoCounsel", "other", None)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            add_conversation_turn(&pool, "trace-x", "Reviewer", "second", None)
                .await
                .unwrap(),
            1
        );

        let turns = list_conversation(&pool, "trace-x").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].message, "first");
        assert_eq!(turns[0].summary.as_deref(), Some("q"));
        assert_eq!(turns[1].agent_role, "Reviewer");
        assert_eq!(turns[1].turn_index, 1);
        assert!(list_conversation(&pool, "trace-z").await.unwrap().is_empty());
    }
}
