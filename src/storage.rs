//! Default [`BlobInspector`]: SHA-256 checksums and extension-based MIME detection.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::traits::BlobInspector;

const READ_BUF_BYTES: usize = 8192;

pub const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Default, Clone, Copy)]
pub struct FileInspector;

impl BlobInspector for FileInspector {
    fn compute_checksum(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path).map_err(|e| IngestError::transient("checksum", e))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; READ_BUF_BYTES];
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| IngestError::transient("checksum", e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn detect_mime_type(&self, path: &Path) -> Result<String> {
        std::fs::metadata(path).map_err(|e| IngestError::transient("mime", e))?;
        Ok(mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_MIME)
            .to_string())
    }
}
