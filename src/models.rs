//! Core data models used throughout Discovery Harness.
//!
//! These types represent the documents, runs, fragments and dead letters that
//! flow through the ingestion pipeline, plus the [`Metadata`] map shared by
//! the extractor, classifier, graph and retrieval index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of an extracted metadata fragment.
///
/// The built-in kinds are the ones the extractor and OCR fallback produce.
/// [`FragmentKind::Custom`] carries any other key (for example a key read back
/// from a stored document written by a newer extractor).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FragmentKind {
    Dates,
    MonetaryAmounts,
    Emails,
    Entities,
    OcrWarnings,
    Custom(String),
}

impl FragmentKind {
    /// The kinds produced by [`crate::metadata::extract_metadata`], in output order.
    pub const EXTRACTED: [FragmentKind; 4] = [
        FragmentKind::Dates,
        FragmentKind::MonetaryAmounts,
        FragmentKind::Emails,
        FragmentKind::Entities,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            FragmentKind::Dates => "dates",
            FragmentKind::MonetaryAmounts => "monetary_amounts",
            FragmentKind::Emails => "emails",
            FragmentKind::Entities => "entities",
            FragmentKind::OcrWarnings => "ocr_warnings",
            FragmentKind::Custom(name) => name,
        }
    }

    /// Whether values of this kind become synthetic nodes in the knowledge graph.
    pub fn links_to_graph(&self) -> bool {
        !matches!(self, FragmentKind::OcrWarnings)
    }
}

impl From<String> for FragmentKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "dates" => FragmentKind::Dates,
            "monetary_amounts" => FragmentKind::MonetaryAmounts,
            "emails" => FragmentKind::Emails,
            "entities" => FragmentKind::Entities,
            "ocr_warnings" => FragmentKind::OcrWarnings,
            _ => FragmentKind::Custom(value),
        }
    }
}

impl From<&str> for FragmentKind {
    fn from(value: &str) -> Self {
        FragmentKind::from(value.to_string())
    }
}

impl From<FragmentKind> for String {
    fn from(kind: FragmentKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fragment kind → ordered set of values.
///
/// Serializes as a plain JSON object of string arrays, e.g.
/// `{"dates": ["2023-01-05"], "emails": []}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<FragmentKind, BTreeSet<String>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for `kind`, or `None` if the kind was never recorded.
    pub fn get(&self, kind: &FragmentKind) -> Option<&BTreeSet<String>> {
        self.0.get(kind)
    }

    /// Number of values recorded for `kind` (0 if absent).
    pub fn count(&self, kind: &FragmentKind) -> usize {
        self.0.get(kind).map(BTreeSet::len).unwrap_or(0)
    }

    /// Ensure `kind` is present, even with no values.
    pub fn declare(&mut self, kind: FragmentKind) {
        self.0.entry(kind).or_default();
    }

    pub fn insert(&mut self, kind: FragmentKind, value: impl Into<String>) {
        self.0.entry(kind).or_default().insert(value.into());
    }

    pub fn extend<I, S>(&mut self, kind: FragmentKind, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.0.entry(kind).or_default();
        entry.extend(values.into_iter().map(Into::into));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FragmentKind, &BTreeSet<String>)> {
        self.0.iter()
    }

    /// Flattened `(kind, value)` pairs in key then value order.
    pub fn pairs(&self) -> impl Iterator<Item = (&FragmentKind, &str)> {
        self.0
            .iter()
            .flat_map(|(kind, values)| values.iter().map(move |v| (kind, v.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

/// Lifecycle state of an [`IngestionRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized document stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub external_id: String,
    pub source_path: String,
    pub source: String,
    pub checksum: String,
    pub mime_type: String,
    pub text_content: String,
    pub summary: String,
    pub document_type: String,
    pub privilege_risk: f64,
    pub importance_score: f64,
    pub metadata: Metadata,
    pub ingestion_run_id: i64,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// One ingestion attempt.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionRun {
    pub id: i64,
    pub trace_id: String,
    pub source: String,
    pub status: RunStatus,
    /// Unix milliseconds.
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

/// A single extracted value attached to a document.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataFragment {
    pub id: i64,
    pub document_id: i64,
    pub fragment_type: FragmentKind,
    pub fragment_value: String,
    pub confidence: f64,
}

/// Durable record of a failed ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: i64,
    pub trace_id: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub stacktrace: Option<String>,
    pub created_at: i64,
}

/// One agent reply recorded under a delegation trace.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub trace_id: String,
    pub agent_role: String,
    /// Position within the trace, starting at 0.
    pub turn_index: i64,
    pub message: String,
    pub summary: Option<String>,
    pub created_at: i64,
}

/// Text and metadata produced by a [`crate::traits::DocumentParser`].
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: Metadata,
}

/// Output of an [`crate::traits::OcrEngine`].
#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    pub text: String,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_kind_round_trips_through_strings() {
        for kind in FragmentKind::EXTRACTED {
            assert_eq!(FragmentKind::from(kind.as_str()), kind);
        }
        assert_eq!(
            FragmentKind::from("clauses"),
            FragmentKind::Custom("clauses".to_string())
        );
    }

    #[test]
    fn metadata_serializes_as_plain_object() {
        let mut meta = Metadata::new();
        meta.insert(FragmentKind::Dates, "2023-01-05");
        meta.declare(FragmentKind::Emails);
        let json = meta.to_json();
        assert_eq!(json, r#"{"dates":["2023-01-05"],"emails":[]}"#);
        assert_eq!(Metadata::from_json(&json), meta);
    }

    #[test]
    fn metadata_values_are_sorted_and_unique() {
        let mut meta = Metadata::new();
        meta.extend(FragmentKind::Entities, ["Bob Industries", "Alice Corp", "Alice Corp"]);
        let values: Vec<_> = meta.get(&FragmentKind::Entities).unwrap().iter().collect();
        assert_eq!(values, vec!["Alice Corp", "Bob Industries"]);
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert_eq!(RunStatus::parse("failed"), Some(RunStatus::Failed));
    }
}
