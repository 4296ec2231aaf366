//! Rule-based document classification.
//!
//! [`Classifier::classify`] assigns a document type, a privilege-risk score and
//! an importance score. It never fails: empty or odd input yields `"unknown"`
//! and scores computed from whatever signals are present.
//!
//! Importance depends on the running average document length held in a
//! [`CorpusStats`] accumulator that the caller owns and injects. Each call reads
//! the current average and then records the new document under one lock, so
//! concurrent ingestion cannot lose updates. Scores remain order-dependent:
//! the same document classified later, against a different average, can score
//! differently.

use serde::Serialize;
use std::sync::Mutex;

use crate::models::{FragmentKind, Metadata};

pub const UNKNOWN_TYPE: &str = "unknown";

const COVERAGE_WEIGHT: usize = 10;

/// Keyword sets per category, in declaration order (ties go to the earlier one).
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "contract",
        &["agreement", "party", "term", "obligation", "contract"],
    ),
    ("email", &["from:", "sent:", "subject", "mailto"]),
    (
        "pleading",
        &["court", "plaintiff", "defendant", "motion", "hearing"],
    ),
    (
        "financial",
        &["invoice", "balance", "payment", "account", "statement"],
    ),
];

const PRIVILEGE_MARKERS: &[&str] = &[
    "privileged",
    "confidential",
    "attorney",
    "counsel",
    "work product",
    "do not disclose",
];

/// Classification outputs for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub document_type: String,
    pub privilege_risk: f64,
    pub importance_score: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct LengthTotals {
    documents: u64,
    total_chars: u64,
}

/// Running corpus statistics shared by every classification.
#[derive(Debug, Default)]
pub struct CorpusStats {
    totals: Mutex<LengthTotals>,
}

impl CorpusStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an existing corpus (document count and summed text length).
    pub fn from_totals(documents: u64, total_chars: u64) -> Self {
        Self {
            totals: Mutex::new(LengthTotals {
                documents,
                total_chars,
            }),
        }
    }

    /// Average length before this call, then record `chars` as a new document.
    fn observe(&self, chars: usize) -> Option<f64> {
        let mut totals = self.totals.lock().unwrap_or_else(|p| p.into_inner());
        let average = if totals.documents == 0 {
            None
        } else {
            Some(totals.total_chars as f64 / totals.documents as f64)
        };
        totals.documents += 1;
        totals.total_chars += chars as u64;
        average
    }

    pub fn average_length(&self) -> Option<f64> {
        let totals = self.totals.lock().unwrap_or_else(|p| p.into_inner());
        if totals.documents == 0 {
            None
        } else {
            Some(totals.total_chars as f64 / totals.documents as f64)
        }
    }

    pub fn documents(&self) -> u64 {
        self.totals
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .documents
    }
}

#[derive(Debug, Default, Clone)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str, metadata: &Metadata, stats: &CorpusStats) -> Classification {
        let lowered = text.to_lowercase();
        let chars = text.chars().count();
        let average = stats.observe(chars);

        Classification {
            document_type: determine_type(&lowered),
            privilege_risk: privilege_risk(&lowered),
            importance_score: importance(chars, average, metadata),
        }
    }
}

fn determine_type(lowered: &str) -> String {
    let mut best = UNKNOWN_TYPE;
    let mut best_score = 0usize;

    for (category, keywords) in CATEGORIES {
        let coverage = keywords.iter().filter(|k| lowered.contains(*k)).count();
        if coverage == 0 {
            continue;
        }
        let occurrences: usize = keywords.iter().map(|k| lowered.matches(*k).count()).sum();
        let score = coverage * COVERAGE_WEIGHT + occurrences;
        if score > best_score {
            best_score = score;
            best = category;
        }
    }

    best.to_string()
}

fn privilege_risk(lowered: &str) -> f64 {
    let tokens = lowered.split_whitespace().count().max(1);
    let hits = PRIVILEGE_MARKERS
        .iter()
        .filter(|m| lowered.contains(*m))
        .count();
    let density = hits as f64 / tokens as f64;
    round3((hits as f64 * 0.2 + density * 10.0).min(1.0))
}

fn importance(chars: usize, average: Option<f64>, metadata: &Metadata) -> f64 {
    let length_factor = match average {
        _ if chars == 0 => 0.0,
        Some(avg) if avg > 0.0 => (chars as f64 / (2.0 * avg)).min(1.0),
        _ => 0.5,
    };
    let entity_bonus = (metadata.count(&FragmentKind::Entities) as f64 / 10.0).min(1.0);
    let date_bonus = (metadata.count(&FragmentKind::Dates) as f64 / 5.0).min(1.0);
    let money_bonus = (metadata.count(&FragmentKind::MonetaryAmounts) as f64 / 3.0).min(1.0);

    let score = 0.3 * length_factor + 0.25 * entity_bonus + 0.25 * date_bonus + 0.2 * money_bonus;
    round3(score.clamp(0.0, 1.0))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
