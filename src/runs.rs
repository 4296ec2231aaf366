//! Listings of ingestion runs and dead letters.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::get::format_ts_iso;
use crate::models::RunStatus;
use crate::store;

pub async fn run_runs(
    pool: &SqlitePool,
    status: Option<&str>,
    limit: i64,
    json: bool,
) -> Result<()> {
    let status = match status {
        Some(raw) => Some(RunStatus::parse(raw).ok_or_else(|| {
            anyhow::anyhow!("unknown status '{}': expected running, completed or failed", raw)
        })?),
        None => None,
    };
    let runs = store::list_runs(pool, status, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs.");
        return Ok(());
    }

    println!(
        "{:<6} {:<10} {:<20} {:>9}  {:<32}  {}",
        "ID", "STATUS", "STARTED", "SECONDS", "TRACE", "SOURCE"
    );
    for run in &runs {
        let seconds = run
            .duration_seconds
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<10} {:<20} {:>9}  {:<32}  {}",
            run.id,
            run.status,
            format_ts_iso(run.started_at),
            seconds,
            run.trace_id,
            run.source
        );
        if let Some(err) = &run.error_message {
            println!("       error: {}", err);
        }
    }
    Ok(())
}

pub async fn run_dead_letters(pool: &SqlitePool, limit: i64, json: bool) -> Result<()> {
    let letters = store::list_dead_letters(pool, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&letters)?);
        return Ok(());
    }
    if letters.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    for letter in &letters {
        println!(
            "[{}] {} trace={}",
            letter.id,
            format_ts_iso(letter.created_at),
            letter.trace_id
        );
        println!("    payload: {}", letter.payload);
        println!("    error:   {}", letter.error_message);
        if letter.stacktrace.is_some() {
            println!("    (backtrace captured)");
        }
    }
    Ok(())
}
