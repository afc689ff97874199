//! General/meta resolver configuration (spec §4.4).
//!
//! Handles conversational and meta turns (greetings, "what can you do")
//! that never reach an executor — `respond` is the only operation and it
//! never needs entity resolution.

use std::sync::Arc;

use super::{CapabilityResolver, Resolver, ResolverSpec};
use crate::llm::LlmGateway;
use crate::types::Capability;

const SYSTEM_PROMPT: &str = "\
You are the general resolver. The step is conversational or meta — there \
is no external side effect. Produce operation 'respond' with args.reply \
set to a short, friendly response.";

const SUPPORTED_ACTIONS: &[&str] = &["respond"];

pub fn general_resolver(gateway: Arc<dyn LlmGateway>, model: impl Into<String>) -> Arc<dyn Resolver> {
    let spec = ResolverSpec {
        capability: Capability::General,
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
        serde_json::json!({ "reply": "Got it.", "rawMessage": raw_message }),
    )
}
