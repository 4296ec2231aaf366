use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment override for [`RetrievalConfig::reranker_alpha`].
pub const RERANKER_ALPHA_ENV: &str = "DISCOVERY_RERANKER_ALPHA";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_graph_path")]
    pub graph_path: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_timeline_path")]
    pub timeline_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            graph_path: default_graph_path(),
            index_dir: default_index_dir(),
            timeline_path: default_timeline_path(),
        }
    }
}

fn default_graph_path() -> PathBuf {
    PathBuf::from("./data/graph.json")
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_timeline_path() -> PathBuf {
    PathBuf::from("./data/timeline.csv")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Extensions picked up when walking a directory (with leading dot).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub enable_ocr: bool,
    /// Retries after the first attempt for checksum/MIME/parse/OCR.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            exclude_globs: Vec::new(),
            enable_ocr: true,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl IngestionConfig {
    pub fn allows(&self, path: &Path) -> bool {
        let ext = match path.extension() {
            Some(e) => format!(".{}", e.to_string_lossy().to_lowercase()),
            None => return false,
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.to_lowercase() == ext)
    }
}

fn default_allowed_extensions() -> Vec<String> {
    [".txt", ".md", ".json", ".pdf", ".png", ".jpg", ".jpeg", ".tiff", ".bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_ocr_lang")]
    pub lang: String,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: default_ocr_command(),
            lang: default_ocr_lang(),
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_lang() -> String {
    "eng".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight on lexical similarity: `final = semantic * alpha + structural`.
    #[serde(default = "default_reranker_alpha")]
    pub reranker_alpha: f64,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            reranker_alpha: default_reranker_alpha(),
            snippet_chars: default_snippet_chars(),
            default_top_k: default_top_k(),
        }
    }
}

fn default_reranker_alpha() -> f64 {
    0.65
}
fn default_snippet_chars() -> usize {
    320
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentsConfig {
    /// `|sentiment|` at or above this picks a confident or empathetic tone.
    #[serde(default = "default_sentiment_threshold")]
    pub sentiment_threshold: f64,
    /// Search hits cited by the retrieval tool.
    #[serde(default = "default_citations")]
    pub citations: usize,
    /// Timeline entries quoted by the timeline tool.
    #[serde(default = "default_timeline_entries")]
    pub timeline_entries: usize,
    /// `[agents.inline.<name>]` roster. Empty means the built-in CoCounsel agent.
    #[serde(default)]
    pub inline: BTreeMap<String, InlineAgentConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            sentiment_threshold: default_sentiment_threshold(),
            citations: default_citations(),
            timeline_entries: default_timeline_entries(),
            inline: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InlineAgentConfig {
    #[serde(default)]
    pub role: String,
    /// Any of `retrieval`, `timeline`.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub escalate_to: Option<String>,
}

fn default_sentiment_threshold() -> f64 {
    0.15
}
fn default_citations() -> usize {
    3
}
fn default_timeline_entries() -> usize {
    3
}

impl Config {
    /// A config rooted at `dir`, with every store placed underneath it.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("discovery.sqlite"),
            },
            storage: StorageConfig {
                graph_path: dir.join("graph.json"),
                index_dir: dir.join("index"),
                timeline_path: dir.join("timeline.csv"),
            },
            ingestion: IngestionConfig::default(),
            ocr: OcrConfig::default(),
            retrieval: RetrievalConfig::default(),
            agents: AgentsConfig::default(),
        }
    }

    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.retrieval.reranker_alpha) {
            anyhow::bail!("retrieval.reranker_alpha must be in [0.0, 1.0]");
        }
        if self.retrieval.snippet_chars == 0 {
            anyhow::bail!("retrieval.snippet_chars must be > 0");
        }
        if self.retrieval.default_top_k == 0 {
            anyhow::bail!("retrieval.default_top_k must be >= 1");
        }
        if self.ingestion.allowed_extensions.is_empty() {
            anyhow::bail!("ingestion.allowed_extensions must not be empty");
        }
        if self.ocr.timeout_secs == 0 {
            anyhow::bail!("ocr.timeout_secs must be > 0");
        }
        if !(0.0..=1.0).contains(&self.agents.sentiment_threshold) {
            anyhow::bail!("agents.sentiment_threshold must be in [0.0, 1.0]");
        }
        for (name, agent) in &self.agents.inline {
            for tool in &agent.tools {
                if crate::agents::AgentTool::parse(tool).is_none() {
                    anyhow::bail!(
                        "agents.inline.{}: unknown tool '{}' (expected retrieval or timeline)",
                        name,
                        tool
                    );
                }
            }
            if let Some(target) = &agent.escalate_to {
                if !self.agents.inline.contains_key(target) {
                    anyhow::bail!(
                        "agents.inline.{}: escalate_to '{}' is not a configured agent",
                        name,
                        target
                    );
                }
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Ok(raw) = std::env::var(RERANKER_ALPHA_ENV) {
        config.retrieval.reranker_alpha = raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", RERANKER_ALPHA_ENV, raw))?;
    }

    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = parse_config("[db]\npath = \"/tmp/d.sqlite\"\n").unwrap();
        assert!((config.retrieval.reranker_alpha - 0.65).abs() < 1e-9);
        assert_eq!(config.retrieval.snippet_chars, 320);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert!(config.ingestion.enable_ocr);
        assert_eq!(config.ocr.command, "tesseract");
        config.validate().unwrap();
    }

    #[test]
    fn alpha_out_of_range_is_rejected() {
        let config =
            parse_config("[db]\npath = \"x\"\n[retrieval]\nreranker_alpha = 1.5\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reranker_alpha"));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let ingestion = IngestionConfig::default();
        assert!(ingestion.allows(Path::new("/a/b/Contract.TXT")));
        assert!(ingestion.allows(Path::new("scan.png")));
        assert!(!ingestion.allows(Path::new("binary.exe")));
        assert!(!ingestion.allows(Path::new("README")));
    }

    #[test]
    fn rooted_config_keeps_everything_under_one_dir() {
        let dir = Path::new("/tmp/disco-root");
        let config = Config::rooted_at(dir);
        assert!(config.db.path.starts_with(dir));
        assert!(config.storage.graph_path.starts_with(dir));
        assert!(config.storage.index_dir.starts_with(dir));
        config.validate().unwrap();
    }

    #[test]
    fn inline_agents_are_parsed_and_checked() {
        let config = parse_config(
            r#"
[db]
path = "x"

[agents]
sentiment_threshold = 0.3

[agents.inline.reviewer]
role = "second chair"
tools = ["retrieval"]
escalate_to = "lead"

[agents.inline.lead]
tools = ["retrieval", "timeline"]
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.agents.citations, 3);
        assert_eq!(config.agents.inline.len(), 2);
        assert_eq!(config.agents.inline["reviewer"].escalate_to.as_deref(), Some("lead"));

        let bad_tool = parse_config(
            "[db]\npath = \"x\"\n[agents.inline.a]\ntools = [\"email\"]\n",
        )
        .unwrap();
        assert!(bad_tool.validate().unwrap_err().to_string().contains("unknown tool"));

        let bad_target = parse_config(
            "[db]\npath = \"x\"\n[agents.inline.a]\nescalate_to = \"nobody\"\n",
        )
        .unwrap();
        assert!(bad_target.validate().unwrap_err().to_string().contains("escalate_to"));
    }
}
