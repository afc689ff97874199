//! EntityResolvers — bridge a resolver's natural-language references to
//! concrete backend entity ids (spec §4.5).
//!
//! One [`EntityResolver`] trait, one shared algorithm
//! ([`resolve_single`]/`resolve_by_window`/`apply_selection`) generic over
//! a [`SearchableEntity`] adapter per domain, mirroring how [`crate::resolvers`]
//! shares one engine across capabilities. Calendar is the only domain with
//! recurring-series handling; the others plug into the same scoring and
//! disambiguation machinery with that branch simply never triggering.

pub mod calendar;
pub mod generic;

pub use calendar::{calendar_entity_resolver, email_entity_resolver, memory_entity_resolver, task_entity_resolver};

use async_trait::async_trait;

use crate::time::TimeContext;
use crate::types::{PlanStep, ResolutionOutput};

/// Context passed alongside an operation (spec §4.5 input: `{language, userId}`,
/// plus the turn's frozen "now" so window derivation stays deterministic).
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub user_id: String,
    pub language: crate::types::Language,
    pub now: TimeContext,
}

#[async_trait]
pub trait EntityResolver: Send + Sync {
    fn entity_type(&self) -> &'static str;

    /// Resolve one step's `(operation, args)` against live backend state.
    async fn resolve(&self, operation: &str, args: serde_json::Value, ctx: &ResolutionContext) -> ResolutionOutput;

    /// Apply a user's disambiguation reply to a previously-presented
    /// candidate set (spec §4.5 "Disambiguation selection").
    fn apply_selection(
        &self,
        selection: &str,
        candidates: &[crate::types::ResolutionCandidate],
        args: &serde_json::Value,
    ) -> ResolutionOutput;
}

/// Read the capability-tagged entity type a [`PlanStep`] was routed under,
/// used by the orchestrator to pick the right [`EntityResolver`] from its
/// registry (spec §4.4 "Tag `args._entityType`").
pub fn entity_type_for_step(step: &PlanStep) -> &'static str {
    match step.capability {
        crate::types::Capability::Calendar => "calendar_event",
        crate::types::Capability::TaskStore => "task",
        crate::types::Capability::Email => "email",
        crate::types::Capability::Memory => "memory_fact",
        crate::types::Capability::General | crate::types::Capability::Meta => "none",
    }
}

#[derive(Default)]
pub struct EntityResolverRegistry {
    resolvers: std::collections::HashMap<&'static str, std::sync::Arc<dyn EntityResolver>>,
}

impl EntityResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: std::sync::Arc<dyn EntityResolver>) {
        self.resolvers.insert(resolver.entity_type(), resolver);
    }

    pub fn get(&self, entity_type: &str) -> Option<std::sync::Arc<dyn EntityResolver>> {
        self.resolvers.get(entity_type).cloned()
    }
}
