//! Resolvers — translate one [`PlanStep`] into a typed, capability-scoped
//! [`ResolverOutput`] (spec §4.4).
//!
//! Each capability resolver shares one engine: given a step, build a
//! domain system prompt (always including [`TimeContext`], the recent
//! conversation window, and the step's raw message/constraints), ask the
//! model for a JSON `{operation, args}` object, and fall back to a
//! deterministic keyword table when the call fails or the response is
//! unusable. The prompt text, supported actions and fallback table are
//! what differ per capability — modeled as data ([`ResolverSpec`]) rather
//! than five near-identical structs, the same way the pipeline's other
//! per-domain seams (routing tables, risk keyword tables) are expressed
//! as data rather than code.

mod calendar;
mod email;
mod general;
mod memory;
mod meta;
mod task_store;

pub use calendar::calendar_resolver;
pub use email::email_resolver;
pub use general::general_resolver;
pub use memory::memory_resolver;
pub use meta::meta_resolver;
pub use task_store::task_store_resolver;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::llm::{ChatMessage, CompletionRequest, LlmGateway};
use crate::time::TimeContext;
use crate::types::{Capability, Message, PlanStep, ResolverOutput, ResolverOutputKind};

/// Operations that never need entity resolution — they don't reference an
/// existing item by natural-language description (spec §4.4/§4.5).
const NO_ENTITY_RESOLUTION_OPS: &[&str] = &["create", "list", "respond"];

/// A capability's static configuration: identity, allowed actions, prompt
/// text and deterministic fallback (spec §4.4).
pub struct ResolverSpec {
    pub capability: Capability,
    pub entity_type: &'static str,
    pub supported_actions: &'static [&'static str],
    pub system_prompt: &'static str,
    /// Deterministic keyword fallback: `(raw_message) -> (operation, args)`.
    pub fallback: fn(&str) -> (String, serde_json::Value),
    /// Extra advisory hints appended to the prompt (spec §4.4: "for
    /// task/reminder resolver, keyword pre-analysis hints"). Empty for
    /// capabilities that don't need it.
    pub keyword_hints: fn(&str) -> Vec<String>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    fn capability(&self) -> Capability;
    fn entity_type(&self) -> &'static str;
    async fn resolve(
        &self,
        step: &PlanStep,
        now: &TimeContext,
        recent_messages: &[Message],
    ) -> ResolverOutput;
}

/// Generic LLM-driven resolver configured by a [`ResolverSpec`].
pub struct CapabilityResolver {
    spec: ResolverSpec,
    gateway: Arc<dyn LlmGateway>,
    model: String,
}

impl CapabilityResolver {
    pub fn new(spec: ResolverSpec, gateway: Arc<dyn LlmGateway>, model: impl Into<String>) -> Self {
        Self { spec, gateway, model: model.into() }
    }

    fn compose_prompt(&self, step: &PlanStep, now: &TimeContext, recent_messages: &[Message]) -> String {
        let history: String = recent_messages
            .iter()
            .rev()
            .take(10)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|m| format!("{:?}: {}\n", m.role, m.content))
            .collect();

        let hints = (self.spec.keyword_hints)(&step.constraints.raw_message);
        let hints_section = if hints.is_empty() {
            String::new()
        } else {
            format!("\n## Advisory hints\n{}\n", hints.join("\n"))
        };

        let extracted = step
            .constraints
            .extracted_info
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "null".to_string());

        format!(
            "{}\n\nAllowed actions: {}\n\n## Current time\n{}\n\n## Recent conversation\n{history}\n\
             ## Step\naction_hint: {}\nraw_message: {}\nextracted_info: {extracted}\nchanges: {}\
             {hints_section}\n\nRespond with JSON: {{\"operation\": string, \"args\": object}}",
            self.spec.system_prompt,
            self.spec.supported_actions.join(", "),
            now.to_prompt_string(),
            step.action_hint,
            step.constraints.raw_message,
            step.changes,
        )
    }
}

#[async_trait]
impl Resolver for CapabilityResolver {
    fn capability(&self) -> Capability {
        self.spec.capability
    }

    fn entity_type(&self) -> &'static str {
        self.spec.entity_type
    }

    async fn resolve(
        &self,
        step: &PlanStep,
        now: &TimeContext,
        recent_messages: &[Message],
    ) -> ResolverOutput {
        let prompt = self.compose_prompt(step, now, recent_messages);
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            model: self.model.clone(),
            temperature: 0.2,
            max_tokens: 800,
            request_id: None,
        };

        let (operation, mut args) = match self.gateway.complete_json(request).await {
            Ok(value) => match (value.get("operation").and_then(|v| v.as_str()), value.get("args")) {
                (Some(op), Some(args)) => (op.to_string(), args.clone()),
                _ => {
                    warn!(step = %step.id, "resolver response missing operation/args, using fallback");
                    (self.spec.fallback)(&step.constraints.raw_message)
                }
            },
            Err(e) => {
                warn!(step = %step.id, error = %e, "resolver llm call failed, using fallback");
                (self.spec.fallback)(&step.constraints.raw_message)
            }
        };

        if let Some(map) = args.as_object_mut() {
            map.entry("operation").or_insert_with(|| operation.clone().into());
        }

        ResolverOutput {
            step_id: step.id.clone(),
            kind: if NO_ENTITY_RESOLUTION_OPS.contains(&operation.as_str()) {
                ResolverOutputKind::Execute
            } else {
                ResolverOutputKind::NeedsEntityResolution
            },
            args,
            entity_type: self.spec.entity_type.to_string(),
        }
    }
}

/// Registry of resolvers keyed by capability (spec §4.7: "registry of
/// resolvers keyed by capability").
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<Capability, Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.insert(resolver.capability(), resolver);
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(&capability).cloned()
    }
}
