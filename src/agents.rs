//! Agent delegation over the retrieval and timeline tools.
//!
//! An agent is a named persona with a role and a set of tools. Delegating a
//! prompt runs every registered agent in turn: each one executes its tools
//! against the corpus, composes a reply, and records it as a turn in the
//! conversation memory of the delegation's trace.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │             AgentRegistry              │
//! │  [agents.inline.<name>]  or CoCounsel  │
//! └───────────────────┬────────────────────┘
//!                     ▼  for each agent
//!      retrieval (top hits) · timeline (first dates)
//!                     ▼
//!   reply + tone ──► conversation_memory[trace_id]
//! ```
//!
//! # Tone
//!
//! The prompt is scored against a small sentiment lexicon:
//! `(positive − negative) / (positive + negative)`, or 0 with no lexicon hits.
//! A score at or beyond `±agents.sentiment_threshold` gives a `confident` or
//! `empathetic` tone; anything in between is `neutral`.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;

use crate::config::AgentsConfig;
use crate::engine::Engine;
use crate::get::format_ts_iso;
use crate::index::{tokenize, SearchFilters};
use crate::{store, timeline};

/// Name of the agent used when no roster is configured.
pub const DEFAULT_AGENT: &str = "CoCounsel";

const SUMMARY_CHARS: usize = 200;
const NO_TOOLS_MESSAGE: &str = "No tools executed for this prompt.";

const POSITIVE_WORDS: &[&str] = &[
    "great",
    "excellent",
    "helpful",
    "success",
    "progress",
    "confident",
    "win",
];
const NEGATIVE_WORDS: &[&str] = &[
    "concern",
    "issue",
    "problem",
    "delay",
    "risk",
    "uncertain",
    "worried",
];

// ═══════════════════════════════════════════════════════════════════════
// Data Types
// ═══════════════════════════════════════════════════════════════════════

/// A tool an agent may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTool {
    /// Top search hits for the prompt, cited by document id.
    Retrieval,
    /// The earliest entries of the corpus timeline.
    Timeline,
}

impl AgentTool {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "retrieval" => Some(AgentTool::Retrieval),
            "timeline" => Some(AgentTool::Timeline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Empathetic,
    Neutral,
    Confident,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tone::Empathetic => "empathetic",
            Tone::Neutral => "neutral",
            Tone::Confident => "confident",
        })
    }
}

/// One agent's reply to a delegated prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub trace_id: String,
    pub agent: String,
    pub role: String,
    pub message: String,
    /// External ids of the documents quoted in `message`.
    pub citations: Vec<String>,
    pub tone: Tone,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Sentiment
// ═══════════════════════════════════════════════════════════════════════

/// Lexicon sentiment in [-1, 1].
pub fn sentiment_score(text: &str) -> f64 {
    let tokens = tokenize(text);
    let positives = tokens
        .iter()
        .filter(|t| POSITIVE_WORDS.contains(&t.as_str()))
        .count();
    let negatives = tokens
        .iter()
        .filter(|t| NEGATIVE_WORDS.contains(&t.as_str()))
        .count();
    let total = positives + negatives;
    if total == 0 {
        return 0.0;
    }
    (positives as f64 - negatives as f64) / total as f64
}

pub fn tone_for(score: f64, threshold: f64) -> Tone {
    if score <= -threshold {
        Tone::Empathetic
    } else if score >= threshold {
        Tone::Confident
    } else {
        Tone::Neutral
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Agent
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Agent {
    name: String,
    role: String,
    tools: Vec<AgentTool>,
    escalate_to: Option<String>,
}

impl Agent {
    pub fn new(
        name: String,
        role: String,
        tools: Vec<AgentTool>,
        escalate_to: Option<String>,
    ) -> Self {
        Self {
            name,
            role,
            tools,
            escalate_to,
        }
    }

    /// The lead agent with both tools.
    pub fn co_counsel() -> Self {
        Self::new(
            DEFAULT_AGENT.to_string(),
            "lead".to_string(),
            vec![AgentTool::Retrieval, AgentTool::Timeline],
            None,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn tools(&self) -> &[AgentTool] {
        &self.tools
    }

    pub fn escalate_to(&self) -> Option<&str> {
        self.escalate_to.as_deref()
    }

    /// Run this agent's tools for `prompt`, record the reply under
    /// `trace_id`, and return it.
    pub async fn handle(
        &self,
        engine: &Engine,
        settings: &AgentsConfig,
        trace_id: &str,
        prompt: &str,
        tone: Tone,
    ) -> Result<AgentResponse> {
        let mut parts = Vec::new();
        let mut citations = Vec::new();

        if self.tools.contains(&AgentTool::Retrieval) {
            let hits = engine.search(prompt, &SearchFilters::new(), Some(settings.citations));
            for hit in hits {
                parts.push(format!("Result {}: {}", hit.document_id, hit.snippet));
                citations.push(hit.document_id);
            }
        }

        if self.tools.contains(&AgentTool::Timeline) {
            let entries = timeline::summarize(engine.pool()).await?;
            if !entries.is_empty() {
                let shown = &entries[..entries.len().min(settings.timeline_entries)];
                parts.push(format!(
                    "Timeline context: {}",
                    serde_json::to_string(shown)?
                ));
            }
        }

        if parts.is_empty() {
            parts.push(NO_TOOLS_MESSAGE.to_string());
        }
        let message = parts.join("\n");

        let summary: String = prompt.chars().take(SUMMARY_CHARS).collect();
        let turn = store::add_conversation_turn(
            engine.pool(),
            trace_id,
            &self.name,
            &message,
            Some(&summary),
        )
        .await?;
        tracing::debug!(
            agent = %self.name,
            trace_id,
            turn,
            citations = citations.len(),
            "agent replied"
        );

        Ok(AgentResponse {
            trace_id: trace_id.to_string(),
            agent: self.name.clone(),
            role: self.role.clone(),
            message,
            citations,
            tone,
            escalate_to: self.escalate_to.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// AgentRegistry
// ═══════════════════════════════════════════════════════════════════════

/// The agents a prompt is delegated to, in name order.
pub struct AgentRegistry {
    agents: Vec<Agent>,
    settings: AgentsConfig,
}

impl AgentRegistry {
    /// Build the roster from `[agents.inline.*]`, falling back to
    /// [`Agent::co_counsel`] when none are configured.
    pub fn from_config(settings: &AgentsConfig) -> Result<Self> {
        let mut agents = Vec::with_capacity(settings.inline.len());
        for (name, cfg) in &settings.inline {
            let mut tools = Vec::new();
            for raw in &cfg.tools {
                match AgentTool::parse(raw) {
                    Some(tool) if !tools.contains(&tool) => tools.push(tool),
                    Some(_) => {}
                    None => bail!("agents.inline.{}: unknown tool '{}'", name, raw),
                }
            }
            agents.push(Agent::new(
                name.clone(),
                cfg.role.clone(),
                tools,
                cfg.escalate_to.clone(),
            ));
        }
        if agents.is_empty() {
            agents.push(Agent::co_counsel());
        }
        Ok(Self {
            agents,
            settings: settings.clone(),
        })
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn find(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Hand `prompt` to every agent and collect their replies.
    ///
    /// Without a `trace_id` a fresh `trace-` id is minted; passing an
    /// existing one continues that conversation.
    pub async fn delegate(
        &self,
        engine: &Engine,
        prompt: &str,
        trace_id: Option<&str>,
    ) -> Result<Vec<AgentResponse>> {
        if prompt.trim().is_empty() {
            bail!("message must not be empty");
        }
        let trace_id = match trace_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => new_trace_id(),
        };
        let tone = tone_for(sentiment_score(prompt), self.settings.sentiment_threshold);

        let mut responses = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            responses.push(
                agent
                    .handle(engine, &self.settings, &trace_id, prompt, tone)
                    .await?,
            );
        }
        tracing::info!(%trace_id, agents = responses.len(), %tone, "prompt delegated");
        Ok(responses)
    }
}

fn new_trace_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("trace-{}", &id[..12])
}

// ═══════════════════════════════════════════════════════════════════════
// CLI
// ═══════════════════════════════════════════════════════════════════════

/// CLI entry point for `disco delegate`.
pub async fn run_delegate(
    engine: &Engine,
    prompt: &str,
    trace_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let registry = AgentRegistry::from_config(&engine.config().agents)?;
    let responses = registry.delegate(engine, prompt, trace_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&responses)?);
        return Ok(());
    }

    for response in &responses {
        println!(
            "[{}] tone={} trace={}",
            response.agent, response.tone, response.trace_id
        );
        println!("{}", response.message);
        if !response.citations.is_empty() {
            println!("citations: {}", response.citations.join(", "));
        }
        if let Some(target) = &response.escalate_to {
            println!("escalates to: {}", target);
        }
        println!();
    }
    Ok(())
}

/// CLI entry point for `disco conversation`.
pub async fn run_conversation(pool: &SqlitePool, trace_id: &str, json: bool) -> Result<()> {
    let turns = store::list_conversation(pool, trace_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&turns)?);
        return Ok(());
    }
    if turns.is_empty() {
        println!("No conversation for {}.", trace_id);
        return Ok(());
    }

    for turn in &turns {
        println!(
            "#{} {} {}",
            turn.turn_index,
            format_ts_iso(turn.created_at),
            turn.agent_role
        );
        if let Some(summary) = &turn.summary {
            println!("    prompt: {}", summary);
        }
        for line in turn.message.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}
