//! Calendar resolver configuration (spec §4.4).

use std::sync::Arc;

use super::{CapabilityResolver, Resolver, ResolverSpec};
use crate::llm::LlmGateway;
use crate::types::Capability;

const SYSTEM_PROMPT: &str = "\
You are the calendar resolver. Translate the step into a single calendar \
operation. Never invent an event id — if the user refers to an event by \
description rather than an id already present in extracted_info, use a \
'ByDescription' or 'ByWindow' operation and let entity resolution find it. \
Normalize recurrence into {frequency, byDay, time} with default times \
(09:00 for unspecified morning events) when the user mentions a recurring \
pattern.";

const SUPPORTED_ACTIONS: &[&str] = &[
    "create",
    "list",
    "getByDescription",
    "deleteByDescription",
    "deleteByWindow",
    "updateByDescription",
    "updateByWindow",
];

pub fn calendar_resolver(gateway: Arc<dyn LlmGateway>, model: impl Into<String>) -> Arc<dyn Resolver> {
    let spec = ResolverSpec {
        capability: Capability::Calendar,
        entity_type: "calendar_event",
        supported_actions: SUPPORTED_ACTIONS,
        system_prompt: SYSTEM_PROMPT,
        fallback,
        keyword_hints: |_| vec![],
    };
    Arc::new(CapabilityResolver::new(spec, gateway, model))
}

fn fallback(raw_message: &str) -> (String, serde_json::Value) {
    let lower = raw_message.to_lowercase();
    let operation = if lower.contains("delete") || lower.contains("cancel") || lower.contains("remove") {
        "deleteByDescription"
    } else if lower.contains("update") || lower.contains("move") || lower.contains("reschedule") {
        "updateByDescription"
    } else if lower.contains("create") || lower.contains("add") || lower.contains("schedule") {
        "create"
    } else {
        "list"
    };
    (
        operation.to_string(),
        serde_json::json!({ "summary": raw_message, "rawMessage": raw_message }),
    )
}
