//! Chronology of the corpus built from extracted `dates` fragments.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::FragmentKind;
use crate::store;

/// Documents mentioning one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub date: String,
    pub documents: Vec<String>,
}

/// All dated entries, oldest first. Document ids within a date are sorted.
pub async fn summarize(pool: &SqlitePool) -> Result<Vec<TimelineEntry>> {
    let pairs = store::list_fragments_by_kind(pool, &FragmentKind::Dates).await?;

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (date, external_id) in pairs {
        let documents = grouped.entry(date).or_default();
        if !documents.contains(&external_id) {
            documents.push(external_id);
        }
    }

    Ok(grouped
        .into_iter()
        .map(|(date, mut documents)| {
            documents.sort();
            TimelineEntry { date, documents }
        })
        .collect())
}

/// Write `date,documents` rows, document ids joined with `;`.
pub fn write_csv<W: std::io::Write>(entries: &[TimelineEntry], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["date", "documents"])?;
    for entry in entries {
        writer.write_record([entry.date.as_str(), entry.documents.join(";").as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_csv(entries: &[TimelineEntry], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create timeline file: {}", path.display()))?;
    write_csv(entries, file)
}

/// CLI entry point for `disco timeline`.
pub async fn run_timeline(pool: &SqlitePool, export: Option<&Path>) -> Result<()> {
    let entries = summarize(pool).await?;

    if let Some(path) = export {
        export_csv(&entries, path)?;
        println!("Wrote {} timeline entries to {}", entries.len(), path.display());
        return Ok(());
    }

    if entries.is_empty() {
        println!("No dated documents.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}  {}", entry.date, entry.documents.join(", "));
    }
    Ok(())
}
