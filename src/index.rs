//! Lexical retrieval index with graph-aware reranking.
//!
//! # Scoring
//!
//! ```text
//! semantic   = cosine(tfidf(query), tfidf(document))
//! structural = min(0.05 × matching_neighbors, 0.25)
//! score      = (semantic × alpha + structural) × 0.1^(mismatched filter keys)
//! ```
//!
//! TF is `count / tokens_in_document`, IDF is `ln((1 + N) / (1 + df)) + 1`.
//! A graph neighbor "matches" when its value contains a query token.
//!
//! # Concurrency
//!
//! The current [`IndexSnapshot`] sits behind `RwLock<Arc<_>>`: searches clone
//! the `Arc` and release the lock immediately, while [`RetrievalIndex::rebuild`]
//! builds a complete new snapshot off to the side and swaps it in. Rebuilds
//! are serialized by an async mutex.
//!
//! Every ingestion triggers a full rebuild, which bounds the practical corpus
//! size; incremental updates would need per-term document frequencies kept in
//! the store.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use crate::config::RetrievalConfig;
use crate::error::{IngestError, Result};
use crate::graph::KnowledgeGraph;
use crate::models::{Document, FragmentKind, Metadata};

const NEIGHBOR_BONUS: f64 = 0.05;
const MAX_STRUCTURAL_BONUS: f64 = 0.25;
const FILTER_PENALTY: f64 = 0.1;

/// Metadata key → acceptable values. Matching is case-insensitive.
pub type SearchFilters = BTreeMap<String, Vec<String>>;

type SparseVector = BTreeMap<String, f64>;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("valid regex"))
}

/// Lower-cased word tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    token_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub score: f64,
    pub snippet: String,
    pub highlights: BTreeMap<String, Vec<String>>,
    pub trace_id: String,
    pub explain: ScoreBreakdown,
}

/// How a [`SearchHit`] score was assembled.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub semantic_score: f64,
    pub structural_bonus: f64,
    pub filter_multiplier: f64,
    /// Weight applied to the semantic score.
    pub alpha: f64,
}

#[derive(Debug, Clone)]
struct IndexedDocument {
    external_id: String,
    text: String,
    metadata: Metadata,
    vector: SparseVector,
}

/// An immutable, fully built index over a set of documents.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    documents: Vec<IndexedDocument>,
    idf: HashMap<String, f64>,
}

impl IndexSnapshot {
    pub fn build(documents: &[Document]) -> Self {
        let tokenized: Vec<Vec<String>> = documents
            .iter()
            .map(|d| tokenize(&d.text_content))
            .collect();

        let mut df: HashMap<&str, usize> = HashMap::new();
        for tokens in &tokenized {
            let mut seen: Vec<&str> = tokens.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let n = documents.len() as f64;
        let idf: HashMap<String, f64> = df
            .into_iter()
            .map(|(term, count)| {
                let weight = ((1.0 + n) / (1.0 + count as f64)).ln() + 1.0;
                (term.to_string(), weight)
            })
            .collect();

        let documents = documents
            .iter()
            .zip(&tokenized)
            .map(|(doc, tokens)| IndexedDocument {
                external_id: doc.external_id.clone(),
                text: doc.text_content.clone(),
                metadata: doc.metadata.clone(),
                vector: tfidf(tokens, &idf),
            })
            .collect();

        Self { documents, idf }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn doc_ids(&self) -> Vec<&str> {
        self.documents
            .iter()
            .map(|d| d.external_id.as_str())
            .collect()
    }

    fn write_artifacts(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;

        let doc_ids = serde_json::to_string_pretty(&self.doc_ids())?;
        write_atomic(&dir.join("doc_ids.json"), doc_ids.as_bytes())?;

        let idf: BTreeMap<&str, f64> = self.idf.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let vectors: Vec<&SparseVector> = self.documents.iter().map(|d| &d.vector).collect();
        let body = serde_json::to_string(&serde_json::json!({
            "idf": idf,
            "vectors": vectors,
        }))?;
        write_atomic(&dir.join("vectors.json"), body.as_bytes())?;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

fn tfidf(tokens: &[String], idf: &HashMap<String, f64>) -> SparseVector {
    let mut vector = SparseVector::new();
    if tokens.is_empty() {
        return vector;
    }
    for token in tokens {
        *vector.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    let len = tokens.len() as f64;
    vector.retain(|term, weight| match idf.get(term) {
        Some(w) => {
            *weight = (*weight / len) * w;
            true
        }
        None => false,
    });
    vector
}

/// Cosine similarity of two sparse vectors. Zero when either is empty.
pub fn cosine_similarity(a: &SparseVector, b: &SparseVector) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();
    let norm_a: f64 = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm_a * norm_b;
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}

pub struct RetrievalIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    dir: Option<PathBuf>,
}

impl RetrievalIndex {
    pub fn in_memory() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            rebuild_lock: tokio::sync::Mutex::new(()),
            dir: None,
        }
    }

    /// An index that writes `doc_ids.json` and `vectors.json` into `dir` on rebuild.
    pub fn with_artifact_dir(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
            ..Self::in_memory()
        }
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Replace the index with one built from `documents`.
    pub async fn rebuild(&self, documents: &[Document]) -> Result<()> {
        let _guard = self.rebuild_lock.lock().await;

        let snapshot = IndexSnapshot::build(documents);
        if let Some(dir) = &self.dir {
            snapshot
                .write_artifacts(dir)
                .map_err(|e| IngestError::Index(format!("{}: {}", dir.display(), e)))?;
        }

        let mut current = self
            .snapshot
            .write()
            .map_err(|_| IngestError::Index("index lock poisoned".to_string()))?;
        *current = Arc::new(snapshot);
        tracing::debug!(documents = documents.len(), "retrieval index rebuilt");
        Ok(())
    }

    /// Rank documents for `query`.
    ///
    /// Every indexed document is scored, so a non-empty index yields
    /// `min(top_k, len)` hits with non-increasing scores. Ties, including
    /// documents scoring zero, keep index order. Blank queries produce no
    /// hits. Filters only down-weight, they never exclude.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
        graph: &KnowledgeGraph,
        config: &RetrievalConfig,
    ) -> Vec<SearchHit> {
        let tokens = tokenize(query);
        if tokens.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let snapshot = self.snapshot();
        let query_vector = tfidf(&tokens, &snapshot.idf);
        let alpha = config.reranker_alpha;

        let mut hits: Vec<SearchHit> = snapshot
            .documents
            .iter()
            .map(|doc| {
                let semantic_score = cosine_similarity(&query_vector, &doc.vector);
                let structural_bonus = structural_bonus(graph, &doc.external_id, &tokens);
                let filter_multiplier = filter_multiplier(&doc.metadata, filters);
                let score = (semantic_score * alpha + structural_bonus) * filter_multiplier;
                SearchHit {
                    document_id: doc.external_id.clone(),
                    score,
                    snippet: snippet(&doc.text, &tokens, config.snippet_chars),
                    highlights: highlights(&doc.metadata, &tokens),
                    trace_id: search_trace_id(),
                    explain: ScoreBreakdown {
                        semantic_score,
                        structural_bonus,
                        filter_multiplier,
                        alpha,
                    },
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }
}

fn search_trace_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("search-{}", &id[..12])
}

fn structural_bonus(graph: &KnowledgeGraph, document_id: &str, tokens: &[String]) -> f64 {
    let matching = graph
        .neighbors(document_id)
        .iter()
        .filter(|node| {
            let value = node.split_once(':').map(|(_, v)| v).unwrap_or(node);
            let value = value.to_lowercase();
            tokens.iter().any(|t| value.contains(t.as_str()))
        })
        .count();
    (matching as f64 * NEIGHBOR_BONUS).min(MAX_STRUCTURAL_BONUS)
}

fn filter_multiplier(metadata: &Metadata, filters: &SearchFilters) -> f64 {
    let mut multiplier = 1.0;
    for (key, expected) in filters {
        if expected.is_empty() {
            continue;
        }
        let expected: Vec<String> = expected.iter().map(|v| v.to_lowercase()).collect();
        let matched = metadata
            .get(&FragmentKind::from(key.as_str()))
            .map(|values| {
                values
                    .iter()
                    .any(|v| expected.contains(&v.to_lowercase()))
            })
            .unwrap_or(false);
        if !matched {
            multiplier *= FILTER_PENALTY;
        }
    }
    multiplier
}

fn highlights(metadata: &Metadata, tokens: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (kind, value) in metadata.pairs() {
        let lowered = value.to_lowercase();
        if tokens.iter().any(|t| lowered.contains(t.as_str())) {
            grouped
                .entry(kind.to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    grouped
}

/// A window of at most `width` characters centred on the first query token
/// found in `text`, or the leading text when none occurs.
fn snippet(text: &str, tokens: &[String], width: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.trim().to_string();
    }

    // one lower-cased char per source char keeps indices aligned
    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let hit = tokens.iter().find_map(|token| {
        let needle: Vec<char> = token.chars().collect();
        find_chars(&lowered, &needle)
    });

    let start = match hit {
        Some(pos) => pos.saturating_sub(width / 2).min(chars.len() - width),
        None => 0,
    };
    chars[start..start + width]
        .iter()
        .collect::<String>()
        .trim()
        .to_string()
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::extract_metadata;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: 0,
            external_id: id.to_string(),
            source_path: format!("/tmp/{}.txt", id),
            source: "test".to_string(),
            checksum: String::new(),
            mime_type: "text/plain".to_string(),
            text_content: text.to_string(),
            summary: String::new(),
            document_type: "unknown".to_string(),
            privilege_risk: 0.0,
            importance_score: 0.0,
            metadata: extract_metadata(text),
            ingestion_run_id: 1,
            created_at: 0,
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            doc("doc-a", "The supplier shall deliver widgets every quarter."),
            doc("doc-b", "Alice Corp signed the lease for the warehouse."),
            doc("doc-c", "Quarterly invoice for widgets and gadgets from Bob Industries."),
            doc("doc-d", "Meeting notes about the zeppelin hangar."),
        ]
    }

    async fn index_of(docs: &[Document]) -> RetrievalIndex {
        let index = RetrievalIndex::in_memory();
        index.rebuild(docs).await.unwrap();
        index
    }

    #[tokio::test]
    async fn unique_term_ranks_its_document_first() {
        let index = index_of(&corpus()).await;
        let hits = index.search(
            "zeppelin",
            &SearchFilters::new(),
            3,
            &KnowledgeGraph::in_memory(),
            &RetrievalConfig::default(),
        );
        assert_eq!(hits[0].document_id, "doc-d");
        assert!(hits[0].trace_id.starts_with("search-"));
        assert_eq!(hits[0].trace_id.len(), "search-".len() + 12);
    }

    #[tokio::test]
    async fn results_respect_top_k_and_are_sorted() {
        let index = index_of(&corpus()).await;
        let hits = index.search(
            "widgets the",
            &SearchFilters::new(),
            2,
            &KnowledgeGraph::in_memory(),
            &RetrievalConfig::default(),
        );
        assert!(hits.len() <= 2);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn unmatched_query_still_ranks_every_document() {
        let index = index_of(&corpus()).await;
        let mut filters = SearchFilters::new();
        filters.insert("entities".to_string(), vec!["Carol Ltd".to_string()]);
        let hits = index.search(
            "dirigible",
            &filters,
            5,
            &KnowledgeGraph::in_memory(),
            &RetrievalConfig::default(),
        );
        let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-a", "doc-b", "doc-c", "doc-d"]);
        assert!(hits.iter().all(|h| h.score == 0.0));
    }

    #[tokio::test]
    async fn top_k_beyond_matches_returns_whole_corpus() {
        let index = index_of(&corpus()).await;
        let hits = index.search(
            "zeppelin",
            &SearchFilters::new(),
            10,
            &KnowledgeGraph::in_memory(),
            &RetrievalConfig::default(),
        );
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].document_id, "doc-d");
        assert!(hits[0].score > 0.0);
        assert!(hits[1..].iter().all(|h| h.score == 0.0));

        let hits = index.search(
            "zeppelin",
            &SearchFilters::new(),
            2,
            &KnowledgeGraph::in_memory(),
            &RetrievalConfig::default(),
        );
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let index = index_of(&corpus()).await;
        let graph = KnowledgeGraph::in_memory();
        for query in ["", "   ", "\t\n"] {
            assert!(index
                .search(query, &SearchFilters::new(), 5, &graph, &RetrievalConfig::default())
                .is_empty());
        }
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let index = RetrievalIndex::in_memory();
        assert!(index
            .search(
                "widgets",
                &SearchFilters::new(),
                5,
                &KnowledgeGraph::in_memory(),
                &RetrievalConfig::default()
            )
            .is_empty());
    }

    #[tokio::test]
    async fn soft_filter_downweights_but_keeps_results() {
        let docs = corpus();
        let index = index_of(&docs).await;
        let graph = KnowledgeGraph::in_memory();
        let config = RetrievalConfig::default();

        let unfiltered = index.search("widgets", &SearchFilters::new(), 5, &graph, &config);
        let mut filters = SearchFilters::new();
        filters.insert("entities".to_string(), vec!["bob industries".to_string()]);
        let filtered = index.search("widgets", &filters, 5, &graph, &config);

        assert_eq!(filtered.len(), unfiltered.len());
        assert_eq!(filtered[0].document_id, "doc-c");
        let doc_a = filtered.iter().find(|h| h.document_id == "doc-a").unwrap();
        assert!((doc_a.explain.filter_multiplier - 0.1).abs() < 1e-12);

        let mut nobody = SearchFilters::new();
        nobody.insert("entities".to_string(), vec!["Nobody Known".to_string()]);
        assert!(!index.search("widgets", &nobody, 5, &graph, &config).is_empty());
    }

    #[tokio::test]
    async fn empty_filter_values_do_not_penalize() {
        let index = index_of(&corpus()).await;
        let mut filters = SearchFilters::new();
        filters.insert("emails".to_string(), Vec::new());
        let hits = index.search(
            "zeppelin",
            &filters,
            5,
            &KnowledgeGraph::in_memory(),
            &RetrievalConfig::default(),
        );
        assert_eq!(hits[0].explain.filter_multiplier, 1.0);
    }

    #[tokio::test]
    async fn structural_bonus_is_capped() {
        let docs = corpus();
        let index = index_of(&docs).await;
        let graph = KnowledgeGraph::in_memory();
        let mut meta = Metadata::new();
        meta.extend(
            FragmentKind::Entities,
            (0..10).map(|i| format!("Widgets Branch{}", i)),
        );
        graph.upsert("doc-a", &meta).unwrap();

        let hits = index.search(
            "widgets",
            &SearchFilters::new(),
            5,
            &graph,
            &RetrievalConfig::default(),
        );
        let doc_a = hits.iter().find(|h| h.document_id == "doc-a").unwrap();
        assert!((doc_a.explain.structural_bonus - MAX_STRUCTURAL_BONUS).abs() < 1e-12);
        let doc_c = hits.iter().find(|h| h.document_id == "doc-c").unwrap();
        assert_eq!(doc_c.explain.structural_bonus, 0.0);
    }

    #[tokio::test]
    async fn highlights_group_matching_metadata() {
        let index = index_of(&corpus()).await;
        let hits = index.search(
            "alice lease",
            &SearchFilters::new(),
            1,
            &KnowledgeGraph::in_memory(),
            &RetrievalConfig::default(),
        );
        assert_eq!(hits[0].document_id, "doc-b");
        assert_eq!(
            hits[0].highlights.get("entities"),
            Some(&vec!["Alice Corp".to_string()])
        );
    }

    #[tokio::test]
    async fn rebuild_writes_artifacts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = RetrievalIndex::with_artifact_dir(&tmp.path().join("index"));
        index.rebuild(&corpus()).await.unwrap();
        let ids: Vec<String> = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join("index/doc_ids.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(ids, vec!["doc-a", "doc-b", "doc-c", "doc-d"]);
        assert!(tmp.path().join("index/vectors.json").exists());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn idf_favors_rare_terms() {
        let snapshot = IndexSnapshot::build(&corpus());
        assert!(snapshot.idf["zeppelin"] > snapshot.idf["the"]);
        // two of four documents: ln((1+4)/(1+2)) + 1
        assert!((snapshot.idf["widgets"] - ((5.0f64 / 3.0).ln() + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn snippet_centres_on_match_and_respects_char_boundaries() {
        let text = format!("{}zeppelin ümlaut {}", "é".repeat(200), "ß".repeat(200));
        let out = snippet(&text, &["zeppelin".to_string()], 40);
        assert!(out.contains("zeppelin"));
        assert!(out.chars().count() <= 40);

        let lead = snippet(&text, &["absent".to_string()], 10);
        assert_eq!(lead, "é".repeat(10));
    }

    #[test]
    fn cosine_of_disjoint_vectors_is_zero() {
        let mut a = SparseVector::new();
        a.insert("x".to_string(), 1.0);
        let mut b = SparseVector::new();
        b.insert("y".to_string(), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-12);
    }
}
