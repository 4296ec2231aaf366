//! Document lookup by `external_id`.
//!
//! Returns the stored document together with its metadata fragments. Used by
//! `disco get`.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::models::{Document, MetadataFragment};
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub document: Document,
    pub created_at_iso: String,
    pub fragments: Vec<MetadataFragment>,
}

pub async fn get_document(pool: &SqlitePool, external_id: &str) -> Result<DocumentResponse> {
    let document = match store::get_document(pool, external_id).await? {
        Some(doc) => doc,
        None => bail!("document not found: {}", external_id),
    };
    let fragments = store::get_fragments(pool, document.id).await?;

    Ok(DocumentResponse {
        created_at_iso: format_ts_iso(document.created_at),
        document,
        fragments,
    })
}

/// CLI entry point: print one document.
pub async fn run_get(pool: &SqlitePool, external_id: &str, json: bool) -> Result<()> {
    let response = get_document(pool, external_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let doc = &response.document;
    println!("--- Document ---");
    println!("id:               {}", doc.external_id);
    println!("source:           {}", doc.source);
    println!("source_path:      {}", doc.source_path);
    println!("mime_type:        {}", doc.mime_type);
    println!("checksum:         {}", doc.checksum);
    println!("document_type:    {}", doc.document_type);
    println!("privilege_risk:   {:.3}", doc.privilege_risk);
    println!("importance_score: {:.3}", doc.importance_score);
    println!("ingestion_run:    {}", doc.ingestion_run_id);
    println!("created_at:       {}", response.created_at_iso);
    println!();

    println!("--- Fragments ({}) ---", response.fragments.len());
    for fragment in &response.fragments {
        println!("{:<18} {}", fragment.fragment_type, fragment.fragment_value);
    }
    if let Some(warnings) = doc.metadata.get(&crate::models::FragmentKind::OcrWarnings) {
        for warning in warnings {
            println!("! {}", warning);
        }
    }
    println!();

    println!("--- Text ---");
    println!("{}", doc.text_content);

    Ok(())
}

pub(crate) fn format_ts_iso(ts_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts_millis.to_string())
}
