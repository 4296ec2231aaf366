//! Corpus statistics for `disco stats`.
//!
//! Documents, runs by status, dead letters, fragments by kind and graph size,
//! so an operator can tell at a glance whether ingestion is healthy.

use anyhow::Result;
use serde::Serialize;

use crate::engine::Engine;
use crate::store;

#[derive(Debug, Serialize)]
pub struct CorpusReport {
    pub documents: u64,
    pub average_length: Option<f64>,
    pub runs: Vec<(String, i64)>,
    pub dead_letters: i64,
    pub fragments: Vec<(String, i64)>,
    pub graph_nodes: usize,
    pub indexed_documents: usize,
    pub db_bytes: u64,
}

pub async fn collect(engine: &Engine) -> Result<CorpusReport> {
    let pool = engine.pool();
    let (documents, total_chars) = store::corpus_totals(pool).await?;

    Ok(CorpusReport {
        documents,
        average_length: if documents == 0 {
            None
        } else {
            Some(total_chars as f64 / documents as f64)
        },
        runs: store::count_runs(pool).await?,
        dead_letters: store::count_dead_letters(pool).await?,
        fragments: store::count_fragments(pool).await?,
        graph_nodes: engine.graph().node_count(),
        indexed_documents: engine.indexed_documents(),
        db_bytes: std::fs::metadata(&engine.config().db.path)
            .map(|m| m.len())
            .unwrap_or(0),
    })
}

pub async fn run_stats(engine: &Engine, json: bool) -> Result<()> {
    let report = collect(engine).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Discovery Harness: Corpus Stats");
    println!("===============================");
    println!();
    println!("  Database:     {}", engine.config().db.path.display());
    println!("  Size:         {}", format_bytes(report.db_bytes));
    println!();
    println!("  Documents:    {}", report.documents);
    if let Some(avg) = report.average_length {
        println!("  Avg length:   {:.0} chars", avg);
    }
    println!("  Indexed:      {}", report.indexed_documents);
    println!("  Graph nodes:  {}", report.graph_nodes);
    println!("  Dead letters: {}", report.dead_letters);

    if !report.runs.is_empty() {
        println!();
        println!("  Runs:");
        for (status, n) in &report.runs {
            println!("    {:<12} {:>6}", status, n);
        }
    }

    if !report.fragments.is_empty() {
        println!();
        println!("  Fragments:");
        for (kind, n) in &report.fragments {
            println!("    {:<18} {:>6}", kind, n);
        }
    }
    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
