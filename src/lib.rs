//! # Discovery Harness
//!
//! Document ingestion, classification, knowledge-graph linking and hybrid
//! retrieval for litigation-style discovery corpora.
//!
//! Files are checksummed, parsed (with an OCR fallback for scans), mined for
//! dates, amounts, emails and entities, classified, and stored in SQLite.
//! Every document is linked to its metadata values in a knowledge graph, and a
//! TF-IDF index with graph-aware reranking serves search.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │   Files     │──▶│  Ingestion pipeline  │──▶│  SQLite  │
//! │ txt/pdf/img │   │ parse+OCR+classify   │   │ docs+runs│
//! └─────────────┘   └──────────┬───────────┘   └──────────┘
//!                              │
//!                  ┌───────────┴───────────┐
//!                  ▼                       ▼
//!            ┌───────────┐          ┌─────────────┐
//!            │   Graph   │─────────▶│   Index     │
//!            │ (JSON)    │  rerank  │  (TF-IDF)   │
//!            └───────────┘          └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! disco init
//! disco ingest ./productions --source vol001
//! disco search "master services agreement" --filter entities="Alice Corp"
//! disco timeline --export ./data/timeline.csv
//! disco delegate "what changed in the Bob Industries agreement?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`metadata`] | Date, amount, email and entity extraction |
//! | [`classifier`] | Document type, privilege risk, importance |
//! | [`traits`] | Collaborator seams (inspector, parser, OCR) |
//! | [`storage`] | Checksums and MIME detection |
//! | [`parser`] | Text, JSON, PDF and image parsing |
//! | [`ocr`] | Tesseract OCR fallback |
//! | [`graph`] | Document ↔ metadata knowledge graph |
//! | [`index`] | TF-IDF retrieval with graph reranking |
//! | [`store`] | SQLite repository |
//! | [`engine`] | Assembled engine and read side |
//! | [`ingest`] | Ingestion orchestration |
//! | [`timeline`] | Date chronology and CSV export |
//! | [`agents`] | Prompt delegation with conversation memory |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agents;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod get;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod parser;
pub mod runs;
pub mod search;
pub mod stats;
pub mod storage;
pub mod store;
pub mod timeline;
pub mod traits;

pub use engine::Engine;
pub use error::IngestError;
