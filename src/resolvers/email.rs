//! Email resolver configuration (spec §4.4).

use std::sync::Arc;

use super::{CapabilityResolver, Resolver, ResolverSpec};
use crate::llm::LlmGateway;
use crate::types::Capability;

const SYSTEM_PROMPT: &str = "\
You are the email resolver. Translate the step into a single email \
operation: send, reply, archiveByDescription or list. Never invent a \
message id — use 'ByDescription' operations and let entity resolution \
find the target message.";

const SUPPORTED_ACTIONS: &[&str] = &["send", "reply", "archiveByDescription", "list"];

pub fn email_resolver(gateway: Arc<dyn LlmGateway>, model: impl Into<String>) -> Arc<dyn Resolver> {
    let spec = ResolverSpec {
        capability: Capability::Email,
        entity_type: "email_message",
        supported_actions: SUPPORTED_ACTIONS,
        system_prompt: SYSTEM_PROMPT,
        fallback,
        keyword_hints: |_| vec![],
    };
    Arc::new(CapabilityResolver::new(spec, gateway, model))
}

fn fallback(raw_message: &str) -> (String, serde_json::Value) {
    let lower = raw_message.to_lowercase();
    let operation = if lower.contains("reply") {
        "reply"
    } else if lower.contains("send") {
        "send"
    } else if lower.contains("archive") || lower.contains("delete") {
        "archiveByDescription"
    } else {
        "list"
    };
    (
        operation.to_string(),
        serde_json::json!({ "description": raw_message, "rawMessage": raw_message }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keyword_maps_to_reply() {
        let (op, _) = fallback("reply to dan's email about the budget");
        assert_eq!(op, "reply");
    }
}
