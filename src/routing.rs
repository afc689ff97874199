//! Routing hints — deterministic, side-effect-free capability scoring
//! from raw message text (spec §4.2).
//!
//! Generalizes the single-winner keyword cascade used for message intent
//! classification into a multi-capability scored list: every capability
//! accumulates a score from the fixed patterns that match, instead of the
//! first match winning and the rest being discarded. The Planner seeds its
//! fallback plan from this, the HITL gate uses it to render a
//! "here's what I thought you meant" clarification, and it's the last
//! resort for capability inference when nothing else fits.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Capability;

/// One capability's accumulated score plus the patterns that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingHint {
    pub capability: Capability,
    pub score: f64,
    pub matched_patterns: Vec<String>,
}

struct WeightedPattern {
    regex: &'static str,
    weight: f64,
    label: &'static str,
}

/// `(capability, patterns)` tables. Patterns are case-insensitive; weights
/// are additive and the per-capability score is capped at `1.0`.
fn tables() -> &'static [(Capability, &'static [WeightedPattern])] {
    static CALENDAR: &[WeightedPattern] = &[
        WeightedPattern { regex: r"calendar|meeting|appointment|schedul|event", weight: 0.5, label: "calendar_keyword" },
        WeightedPattern { regex: r"free\s*busy|freebusy", weight: 0.4, label: "freebusy_keyword" },
        WeightedPattern { regex: r"פגישה|יומן|אימון", weight: 0.5, label: "calendar_keyword_he" },
        WeightedPattern { regex: r"tomorrow|today|next (monday|tuesday|wednesday|thursday|friday|saturday|sunday)", weight: 0.2, label: "relative_date" },
        WeightedPattern { regex: r"מחר|היום", weight: 0.2, label: "relative_date_he" },
    ];
    static TASK_STORE: &[WeightedPattern] = &[
        WeightedPattern { regex: r"remind|reminder|task|todo|to-do", weight: 0.5, label: "task_keyword" },
        WeightedPattern { regex: r"תזכיר|משימ", weight: 0.5, label: "task_keyword_he" },
        WeightedPattern { regex: r"complete|finish|done|mark.*(done|complete)", weight: 0.3, label: "completion_keyword" },
    ];
    static EMAIL: &[WeightedPattern] = &[
        WeightedPattern { regex: r"email|mail|inbox", weight: 0.5, label: "email_keyword" },
        WeightedPattern { regex: r"reply to|send.*(email|mail)", weight: 0.3, label: "email_action_keyword" },
        WeightedPattern { regex: r"אימייל|מייל", weight: 0.5, label: "email_keyword_he" },
    ];
    static MEMORY: &[WeightedPattern] = &[
        WeightedPattern { regex: r"remember|don'?t forget|keep in mind|note that|save this", weight: 0.6, label: "memory_keyword" },
        WeightedPattern { regex: r"תזכור|אל תשכח", weight: 0.6, label: "memory_keyword_he" },
    ];
    static GENERAL: &[WeightedPattern] = &[
        WeightedPattern { regex: r"^(hi|hello|hey|thanks|thank you)\b", weight: 0.4, label: "greeting" },
        WeightedPattern { regex: r"שלום|תודה", weight: 0.4, label: "greeting_he" },
    ];
    static META: &[WeightedPattern] = &[
        WeightedPattern { regex: r"what can you do|help|capabilities|settings|config", weight: 0.4, label: "meta_keyword" },
    ];

    static TABLES: OnceLock<Vec<(Capability, &'static [WeightedPattern])>> = OnceLock::new();
    TABLES.get_or_init(|| {
        vec![
            (Capability::Calendar, CALENDAR),
            (Capability::TaskStore, TASK_STORE),
            (Capability::Email, EMAIL),
            (Capability::Memory, MEMORY),
            (Capability::General, GENERAL),
            (Capability::Meta, META),
        ]
    })
}

struct CompiledTable {
    capability: Capability,
    patterns: Vec<(Regex, f64, &'static str)>,
}

fn compiled() -> &'static Vec<CompiledTable> {
    static COMPILED: OnceLock<Vec<CompiledTable>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        tables()
            .iter()
            .map(|(capability, patterns)| CompiledTable {
                capability: *capability,
                patterns: patterns
                    .iter()
                    .map(|p| {
                        let regex = Regex::new(&format!("(?i){}", p.regex))
                            .expect("routing pattern must compile");
                        (regex, p.weight, p.label)
                    })
                    .collect(),
            })
            .collect()
    })
}

/// Deterministic, side-effect-free capability scorer (spec §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingHints;

impl RoutingHints {
    pub fn new() -> Self {
        Self
    }

    /// Score `message` against every capability's pattern table, returning
    /// capabilities with a nonzero score, ordered highest-first.
    pub fn score(&self, message: &str) -> Vec<RoutingHint> {
        let mut hints: Vec<RoutingHint> = compiled()
            .iter()
            .filter_map(|table| {
                let mut score = 0.0_f64;
                let mut matched = Vec::new();
                for (regex, weight, label) in &table.patterns {
                    if regex.is_match(message) {
                        score += weight;
                        matched.push((*label).to_string());
                    }
                }
                if matched.is_empty() {
                    None
                } else {
                    Some(RoutingHint {
                        capability: table.capability,
                        score: score.min(1.0),
                        matched_patterns: matched,
                    })
                }
            })
            .collect();

        hints.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hints
    }

    /// The top-scoring capability, or [`Capability::General`] when nothing
    /// matched (spec §4.2 fallback capability inference).
    pub fn best_capability(&self, message: &str) -> Capability {
        self.score(message)
            .first()
            .map(|h| h.capability)
            .unwrap_or(Capability::General)
    }
}
