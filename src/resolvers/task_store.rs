//! Task/reminder resolver configuration (spec §4.4, §9 open question #1).
//!
//! The historical task resolver maps a "complete" request to the same
//! `delete` operation as an actual removal — a legacy shorthand (marking a
//! reminder done removes it from the active list rather than flipping a
//! status field). That behavior is preserved here for compatibility, but
//! made an explicit, named mapping rather than an implicit keyword
//! coincidence, so a future task store with a real "completed" state can
//! retarget it without touching resolver logic.

use std::sync::Arc;

use super::{CapabilityResolver, Resolver, ResolverSpec};
use crate::llm::LlmGateway;
use crate::types::Capability;

const SYSTEM_PROMPT: &str = "\
You are the task/reminder resolver. Translate the step into a single \
task-store operation: create, list, deleteByDescription or \
updateByDescription. Classify the reminder style (one-time, recurring, \
nudge) and include it in args.reminderStyle when creating.";

const SUPPORTED_ACTIONS: &[&str] = &["create", "list", "deleteByDescription", "updateByDescription"];

/// Whether a completed/finished reminder is treated as a deletion rather
/// than a status update (spec open question #1). Preserves the legacy
/// mapping by default.
pub struct TaskStoreSettings {
    pub complete_means_delete: bool,
}

impl Default for TaskStoreSettings {
    fn default() -> Self {
        Self { complete_means_delete: true }
    }
}

pub fn task_store_resolver(gateway: Arc<dyn LlmGateway>, model: impl Into<String>) -> Arc<dyn Resolver> {
    let spec = ResolverSpec {
        capability: Capability::TaskStore,
        entity_type: "task",
        supported_actions: SUPPORTED_ACTIONS,
        system_prompt: SYSTEM_PROMPT,
        fallback,
        keyword_hints,
    };
    Arc::new(CapabilityResolver::new(spec, gateway, model))
}

fn fallback(raw_message: &str) -> (String, serde_json::Value) {
    let settings = TaskStoreSettings::default();
    let lower = raw_message.to_lowercase();

    let is_completion = lower.contains("complete") || lower.contains("finish") || lower.contains("done")
        || lower.contains("mark") && (lower.contains("complete") || lower.contains("done"));
    let is_deletion = lower.contains("delete") || lower.contains("remove") || lower.contains("cancel");

    let operation = if (is_completion && settings.complete_means_delete) || is_deletion {
        "deleteByDescription"
    } else if lower.contains("update") || lower.contains("change") || lower.contains("reschedule") {
        "updateByDescription"
    } else if lower.contains("remind") || lower.contains("task") || lower.contains("todo") {
        "create"
    } else {
        "list"
    };

    (
        operation.to_string(),
        serde_json::json!({ "description": raw_message, "rawMessage": raw_message }),
    )
}

/// Advisory keyword pre-analysis hints for reminder style + CRUD verb
/// (spec §4.4: "for task/reminder resolver, keyword pre-analysis hints").
fn keyword_hints(raw_message: &str) -> Vec<String> {
    let lower = raw_message.to_lowercase();
    let mut hints = Vec::new();

    let mut style_scores: Vec<(&str, f64)> = vec![
        ("one-time", if lower.contains("once") || lower.contains("today") || lower.contains("tomorrow") { 0.6 } else { 0.1 }),
        ("recurring", if lower.contains("every") || lower.contains("daily") || lower.contains("weekly") { 0.8 } else { 0.0 }),
        ("nudge", if lower.contains("nudge") || lower.contains("check in") { 0.7 } else { 0.0 }),
    ];
    style_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    hints.push(format!("reminder_style guesses: {style_scores:?}"));

    let mut verb_scores: Vec<(&str, f64)> = vec![
        ("create", if lower.contains("remind") || lower.contains("add") { 0.7 } else { 0.0 }),
        ("delete", if lower.contains("delete") || lower.contains("complete") || lower.contains("done") { 0.7 } else { 0.0 }),
        ("update", if lower.contains("update") || lower.contains("change") { 0.7 } else { 0.0 }),
        ("list", if lower.contains("what") || lower.contains("show") || lower.contains("list") { 0.6 } else { 0.0 }),
    ];
    verb_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    hints.push(format!("crud_verb guesses: {verb_scores:?}"));

    hints
}
