//! Collaborator seams consumed by the ingestion pipeline.
//!
//! The orchestrator never touches blob storage, format parsing or OCR
//! directly. It calls these traits, so deployments (and tests) can swap in
//! their own implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                   Pipeline                     │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────┐  │
//! │  │ BlobInspector│ │DocumentParser│ │  OCR   │  │
//! │  │ sha256 + mime│ │ txt/md/json/ │ │tesseract│ │
//! │  │              │ │ pdf/images   │ │        │  │
//! │  └──────────────┘ └──────────────┘ └────────┘  │
//! └──────────────────────┬─────────────────────────┘
//!                        ▼
//!        classify → persist → graph → index
//! ```
//!
//! Defaults: [`FileInspector`](crate::storage::FileInspector),
//! [`FileParser`](crate::parser::FileParser) and
//! [`TesseractOcr`](crate::ocr::TesseractOcr).

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::models::{OcrOutput, ParsedDocument};

// ═══════════════════════════════════════════════════════════════════════
// Storage
// ═══════════════════════════════════════════════════════════════════════

/// Checksum and MIME detection over a file on disk.
///
/// Both operations are pure and deterministic. They run on the blocking pool,
/// and the orchestrator retries them on [`IngestError::TransientIo`](crate::error::IngestError::TransientIo).
pub trait BlobInspector: Send + Sync {
    fn compute_checksum(&self, path: &Path) -> Result<String>;
    fn detect_mime_type(&self, path: &Path) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════════════

/// Turns a file into text plus extracted metadata.
///
/// Implementations must fail with
/// [`IngestError::UnsupportedFormat`](crate::error::IngestError::UnsupportedFormat)
/// for extensions they cannot handle. That error is never retried.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<ParsedDocument>;
}

// ═══════════════════════════════════════════════════════════════════════
// OCR
// ═══════════════════════════════════════════════════════════════════════

/// Text recognition fallback for documents without a text layer.
///
/// Returning empty text with a warning is preferred over an error: the
/// orchestrator ingests empty OCR output as-is.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn extract_text(&self, path: &Path) -> Result<OcrOutput>;
}

/// The three collaborators bundled for [`Engine`](crate::engine::Engine) construction.
#[derive(Clone)]
pub struct Collaborators {
    pub inspector: Arc<dyn BlobInspector>,
    pub parser: Arc<dyn DocumentParser>,
    pub ocr: Arc<dyn OcrEngine>,
}

impl Collaborators {
    /// Filesystem inspector, built-in parser and the configured OCR command.
    pub fn from_config(config: &Config) -> Self {
        Self {
            inspector: Arc::new(crate::storage::FileInspector),
            parser: Arc::new(crate::parser::FileParser::new()),
            ocr: Arc::new(crate::ocr::TesseractOcr::new(&config.ocr)),
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn BlobInspector>) -> Self {
        self.inspector = inspector;
        self
    }
}
