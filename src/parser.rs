//! Default [`DocumentParser`] for local files.
//!
//! | Extension | Text |
//! |-----------|------|
//! | `.txt`, `.md` | file contents (lossy UTF-8) |
//! | `.json` | canonical pretty JSON, keys sorted |
//! | `.pdf` | text layer via `pdf-extract` (may be empty for scans) |
//! | `.png`, `.jpg`, `.jpeg`, `.tiff`, `.tif`, `.bmp` | empty, OCR fills it in |
//!
//! Anything else fails with [`IngestError::UnsupportedFormat`].

use std::path::Path;

use crate::error::{IngestError, Result};
use crate::metadata::extract_metadata;
use crate::models::ParsedDocument;
use crate::traits::DocumentParser;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "bmp"];

#[derive(Debug, Default, Clone)]
pub struct FileParser;

impl FileParser {
    pub fn new() -> Self {
        Self
    }

    fn read_text(&self, path: &Path, ext: &str) -> Result<String> {
        if TEXT_EXTENSIONS.contains(&ext) {
            let bytes = std::fs::read(path).map_err(|e| IngestError::transient("parse", e))?;
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        match ext {
            "json" => render_json(path),
            "pdf" => {
                let bytes = std::fs::read(path).map_err(|e| IngestError::transient("parse", e))?;
                pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| IngestError::Validation(format!("PDF extraction failed: {}", e)))
            }
            _ if IMAGE_EXTENSIONS.contains(&ext) => Ok(String::new()),
            _ => Err(IngestError::UnsupportedFormat(format!(
                "unsupported extension: .{}",
                ext
            ))),
        }
    }
}

impl DocumentParser for FileParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if ext.is_empty() {
            return Err(IngestError::UnsupportedFormat(format!(
                "no extension: {}",
                path.display()
            )));
        }

        let text = self.read_text(path, &ext)?;
        let metadata = extract_metadata(&text);
        Ok(ParsedDocument { text, metadata })
    }
}

fn render_json(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| IngestError::transient("parse", e))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| IngestError::Validation(format!("invalid JSON: {}", e)))?;
    // serde_json's default map is ordered, so keys come out sorted
    serde_json::to_string_pretty(&value)
        .map_err(|e| IngestError::Validation(format!("invalid JSON: {}", e)))
}
