//! The assembled discovery engine.
//!
//! [`Engine`] owns every piece of shared state: the database pool, the
//! classifier's corpus statistics, the knowledge graph and the retrieval
//! index, plus the injected [`Collaborators`]. Ingestion lives in
//! [`crate::ingest`]; this module covers construction and the read side.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::classifier::{Classifier, CorpusStats};
use crate::config::Config;
use crate::error::IngestError;
use crate::graph::KnowledgeGraph;
use crate::index::{RetrievalIndex, SearchFilters, SearchHit};
use crate::traits::Collaborators;
use crate::{db, migrate, store};

pub struct Engine {
    pub(crate) config: Config,
    pub(crate) pool: SqlitePool,
    pub(crate) classifier: Classifier,
    pub(crate) stats: Arc<CorpusStats>,
    pub(crate) graph: Arc<KnowledgeGraph>,
    pub(crate) index: Arc<RetrievalIndex>,
    pub(crate) collaborators: Collaborators,
}

impl Engine {
    /// Open the configured stores with the default collaborators.
    pub async fn open(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config);
        Self::open_with(config, collaborators).await
    }

    /// Open the configured stores with caller-supplied collaborators.
    ///
    /// Runs migrations, seeds corpus statistics from the stored documents,
    /// loads the graph file and builds the retrieval index.
    pub async fn open_with(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;

        let (documents, total_chars) = store::corpus_totals(&pool).await?;
        let stats = Arc::new(CorpusStats::from_totals(documents, total_chars));
        let graph = Arc::new(KnowledgeGraph::open(&config.storage.graph_path)?);
        let index = Arc::new(RetrievalIndex::with_artifact_dir(&config.storage.index_dir));

        let engine = Self {
            config,
            pool,
            classifier: Classifier::new(),
            stats,
            graph,
            index,
            collaborators,
        };

        if documents > 0 {
            engine.reindex().await?;
        }
        tracing::debug!(
            documents,
            graph_nodes = engine.graph.node_count(),
            "engine opened"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn corpus_stats(&self) -> &CorpusStats {
        &self.stats
    }

    /// Ranked hybrid search. `top_k` falls back to `retrieval.default_top_k`.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: Option<usize>,
    ) -> Vec<SearchHit> {
        let top_k = top_k.unwrap_or(self.config.retrieval.default_top_k);
        let hits = self
            .index
            .search(query, filters, top_k, &self.graph, &self.config.retrieval);
        tracing::debug!(query, hits = hits.len(), "search");
        hits
    }

    /// Rebuild the retrieval index from every stored document.
    pub async fn reindex(&self) -> Result<usize, IngestError> {
        let documents = store::list_documents(&self.pool).await?;
        self.index.rebuild(&documents).await?;
        Ok(documents.len())
    }

    /// Sorted graph neighbors of a document id or `"{kind}:{value}"` node.
    pub fn neighbors(&self, node_id: &str) -> Vec<String> {
        self.graph.neighbors(node_id)
    }

    pub fn indexed_documents(&self) -> usize {
        self.index.len()
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
