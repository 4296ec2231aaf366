//! Undirected knowledge graph linking documents to their metadata values.
//!
//! Every document node (its `external_id`) gets an edge to one synthetic node
//! per metadata value, named `"{kind}:{value}"` (for example
//! `entities:Alice Corp`). Two documents that share a value are therefore two
//! hops apart.
//!
//! The adjacency map lives behind an `RwLock`. When a backing file is
//! configured, every mutation is written through while the write lock is
//! held: serialize to a sibling temp file, then rename over the target.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::models::{FragmentKind, Metadata};

type Adjacency = BTreeMap<String, BTreeSet<String>>;

/// Node id for a metadata value.
pub fn value_node(kind: &FragmentKind, value: &str) -> String {
    format!("{}:{}", kind, value)
}

pub struct KnowledgeGraph {
    adjacency: RwLock<Adjacency>,
    path: Option<PathBuf>,
}

impl KnowledgeGraph {
    /// A graph that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            adjacency: RwLock::new(Adjacency::new()),
            path: None,
        }
    }

    /// Load the graph from `path`, or start empty if the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let adjacency = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read graph file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse graph file: {}", path.display()))?
        } else {
            Adjacency::new()
        };

        Ok(Self {
            adjacency: RwLock::new(adjacency),
            path: Some(path.to_path_buf()),
        })
    }

    /// Link `document_id` to every graph-linked metadata value. Idempotent.
    pub fn upsert(&self, document_id: &str, metadata: &Metadata) -> Result<()> {
        if document_id.trim().is_empty() {
            anyhow::bail!("document id must not be empty");
        }

        let mut adjacency = self
            .adjacency
            .write()
            .map_err(|_| anyhow::anyhow!("graph lock poisoned"))?;

        let mut changed = !adjacency.contains_key(document_id);
        adjacency.entry(document_id.to_string()).or_default();

        for (kind, value) in metadata.pairs() {
            if !kind.links_to_graph() {
                continue;
            }
            let node = value_node(kind, value);
            changed |= adjacency
                .entry(document_id.to_string())
                .or_default()
                .insert(node.clone());
            changed |= adjacency
                .entry(node)
                .or_default()
                .insert(document_id.to_string());
        }

        if changed {
            if let Some(path) = &self.path {
                persist(path, &adjacency)?;
            }
        }
        Ok(())
    }

    /// Sorted neighbors of `node_id`; empty for unknown ids.
    pub fn neighbors(&self, node_id: &str) -> Vec<String> {
        let adjacency = self.adjacency.read().unwrap_or_else(|p| p.into_inner());
        adjacency
            .get(node_id)
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency
            .read()
            .map(|a| a.len())
            .unwrap_or_else(|p| p.into_inner().len())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn persist(path: &Path, adjacency: &Adjacency) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(adjacency)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write graph file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace graph file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(FragmentKind::Entities, "Alice Corp");
        meta.insert(FragmentKind::Dates, "2023-01-05");
        meta.declare(FragmentKind::Emails);
        meta
    }

    #[test]
    fn upsert_links_both_directions() {
        let graph = KnowledgeGraph::in_memory();
        graph.upsert("doc-1", &sample()).unwrap();
        assert_eq!(
            graph.neighbors("doc-1"),
            vec!["dates:2023-01-05", "entities:Alice Corp"]
        );
        assert_eq!(graph.neighbors("entities:Alice Corp"), vec!["doc-1"]);
    }

    #[test]
    fn upsert_is_idempotent() {
        let graph = KnowledgeGraph::in_memory();
        graph.upsert("doc-1", &sample()).unwrap();
        let nodes = graph.node_count();
        let before = graph.neighbors("doc-1");
        graph.upsert("doc-1", &sample()).unwrap();
        assert_eq!(graph.node_count(), nodes);
        assert_eq!(graph.neighbors("doc-1"), before);
    }

    #[test]
    fn shared_values_connect_documents() {
        let graph = KnowledgeGraph::in_memory();
        graph.upsert("doc-1", &sample()).unwrap();
        graph.upsert("doc-2", &sample()).unwrap();
        assert_eq!(
            graph.neighbors("entities:Alice Corp"),
            vec!["doc-1", "doc-2"]
        );
    }

    #[test]
    fn ocr_warnings_stay_out_of_the_graph() {
        let graph = KnowledgeGraph::in_memory();
        let mut meta = Metadata::new();
        meta.insert(FragmentKind::OcrWarnings, "low text yield from OCR");
        graph.upsert("doc-1", &meta).unwrap();
        assert!(graph.neighbors("doc-1").is_empty());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn unknown_node_has_no_neighbors() {
        assert!(KnowledgeGraph::in_memory().neighbors("nope").is_empty());
    }

    #[test]
    fn empty_document_id_is_rejected() {
        assert!(KnowledgeGraph::in_memory().upsert("  ", &sample()).is_err());
    }

    #[test]
    fn graph_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph").join("graph.json");
        {
            let graph = KnowledgeGraph::open(&path).unwrap();
            graph.upsert("doc-1", &sample()).unwrap();
        }
        let reopened = KnowledgeGraph::open(&path).unwrap();
        assert_eq!(reopened.neighbors("dates:2023-01-05"), vec!["doc-1"]);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
