//! Meta resolver configuration (spec §4.4).
//!
//! Handles assistant-about-itself turns ("what can you do", "show my
//! settings"). Like [`super::general`], the only operation is `respond`.

use std::sync::Arc;

use super::{CapabilityResolver, Resolver, ResolverSpec};
use crate::llm::LlmGateway;
use crate::types::Capability;

const SYSTEM_PROMPT: &str = "\
You are the meta resolver. The step asks about the assistant's own \
capabilities or configuration. Produce operation 'respond' with \
args.reply describing what the assistant can do, without exposing \
internal implementation details.";

const SUPPORTED_ACTIONS: &[&str] = &["respond"];

pub fn meta_resolver(gateway: Arc<dyn LlmGateway>, model: impl Into<String>) -> Arc<dyn Resolver> {
    let spec = ResolverSpec {
        capability: Capability::Meta,
        entity_type: "none",
        supported_actions: SUPPORTED_ACTIONS,
        system_prompt: SYSTEM_PROMPT,
        fallback,
        keyword_hints: |_| vec![],
    };
    Arc::new(CapabilityResolver::new(spec, gateway, model))
}

fn fallback(raw_message: &str) -> (String, serde_json::Value) {
    (
        "respond".to_string(),
        serde_json::json!({ "reply": "I can help with calendar, tasks, email and reminders.", "rawMessage": raw_message }),
    )
}
