//! Long-term memory resolver configuration (spec §4.4).
//!
//! Distinct from [`crate::memory::ConversationMemory`], which is the
//! per-turn conversation window — this resolver targets durable
//! user-scoped facts the assistant was asked to remember across turns.

use std::sync::Arc;

use super::{CapabilityResolver, Resolver, ResolverSpec};
use crate::llm::LlmGateway;
use crate::types::Capability;

const SYSTEM_PROMPT: &str = "\
You are the memory resolver. Translate the step into a single long-term \
memory operation: create (store a new fact), list (recall facts matching \
a description) or deleteByDescription (forget a fact).";

const SUPPORTED_ACTIONS: &[&str] = &["create", "list", "deleteByDescription"];

pub fn memory_resolver(gateway: Arc<dyn LlmGateway>, model: impl Into<String>) -> Arc<dyn Resolver> {
    let spec = ResolverSpec {
        capability: Capability::Memory,
        entity_type: "memory_fact",
        supported_actions: SUPPORTED_ACTIONS,
        system_prompt: SYSTEM_PROMPT,
        fallback,
        keyword_hints: |_| vec![],
    };
    Arc::new(CapabilityResolver::new(spec, gateway, model))
}

fn fallback(raw_message: &str) -> (String, serde_json::Value) {
    let lower = raw_message.to_lowercase();
    let operation = if lower.contains("forget") || lower.contains("delete") {
        "deleteByDescription"
    } else if lower.contains("remember") || lower.contains("note that") || lower.contains("save this")
        || lower.contains("don't forget") || lower.contains("keep in mind")
    {
        "create"
    } else {
        "list"
    };
    (
        operation.to_string(),
        serde_json::json!({ "fact": raw_message, "rawMessage": raw_message }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_keyword_maps_to_create() {
        let (op, _) = fallback("remember that my flight is march 15th");
        assert_eq!(op, "create");
    }
}
