//! OCR fallback engines.
//!
//! [`TesseractOcr`] shells out to the configured command
//! (`<command> <path> stdout -l <lang>`) under a timeout. The orchestrator
//! only calls it for blank documents while `ingestion.enable_ocr` is set.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::error::{IngestError, Result};
use crate::models::OcrOutput;
use crate::traits::OcrEngine;

/// Below this many non-whitespace characters the output is flagged as sparse.
const SPARSE_OUTPUT_CHARS: usize = 20;

pub struct TesseractOcr {
    command: String,
    lang: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            lang: config.lang.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        &self.command
    }

    async fn extract_text(&self, path: &Path) -> Result<OcrOutput> {
        let child = Command::new(&self.command)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IngestError::transient("ocr", format!("{}: {}", self.command, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| IngestError::Timeout {
                stage: "ocr",
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| IngestError::transient("ocr", e))?;

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let mut warnings = Vec::new();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warnings.push(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.lines().next().unwrap_or("").trim()
            ));
        }
        if text.chars().filter(|c| !c.is_whitespace()).count() < SPARSE_OUTPUT_CHARS {
            warnings.push("low text yield from OCR".to_string());
        }

        Ok(OcrOutput { text, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_transient() {
        let ocr = TesseractOcr::new(&OcrConfig {
            command: "definitely-not-an-ocr-binary-xyz".to_string(),
            lang: "eng".to_string(),
            timeout_secs: 5,
        });
        let err = ocr.extract_text(Path::new("scan.png")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = tmp.path().join("slow-ocr.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let ocr = TesseractOcr::new(&OcrConfig {
            command: script.to_string_lossy().into_owned(),
            lang: "eng".to_string(),
            timeout_secs: 1,
        });
        let err = ocr.extract_text(Path::new("scan.png")).await.unwrap_err();
        assert!(matches!(err, IngestError::Timeout { stage: "ocr", secs: 1 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sparse_output_is_flagged() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = tmp.path().join("tiny-ocr.sh");
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let ocr = TesseractOcr::new(&OcrConfig {
            command: script.to_string_lossy().into_owned(),
            lang: "eng".to_string(),
            timeout_secs: 5,
        });
        let out = ocr.extract_text(Path::new("scan.png")).await.unwrap();
        assert_eq!(out.text, "hi");
        assert_eq!(out.warnings, vec!["low text yield from OCR".to_string()]);
    }
}
