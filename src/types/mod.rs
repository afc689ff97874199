//! Core data model shared by every pipeline stage.
//!
//! These types are the wire-level contract between stages (Planner →
//! Orchestrator, Resolver → Orchestrator, EntityResolver → HITLGate) and
//! the checkpointed [`PipelineState`] that the orchestrator persists across
//! an interrupt/resume boundary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::routing::RoutingHint;

/// Role of a message in a conversation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Candidate set shown to the user, attached to a system-role marker
/// message so it can be recovered on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisambiguationContext {
    pub candidates: Vec<ResolutionCandidate>,
    pub entity_type: String,
    pub expires_at: DateTime<Utc>,
}

impl DisambiguationContext {
    /// True once `now` has passed `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A short list of entities recently surfaced to the user, kept so a
/// follow-up turn can resolve pronouns like "it" or "that one" without
/// a fresh entity-resolution round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentEntitiesContext {
    pub entity_type: String,
    pub entity_ids: Vec<String>,
}

/// Marks a message as a reply to a specific earlier external id, for
/// transports that expose native reply-threading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContext {
    pub in_reply_to_external_id: String,
}

/// Tagged union of optional metadata slots a [`Message`] may carry.
///
/// Replaces an open-ended metadata bag with an explicit sum type (design
/// note: dynamic metadata bags become typed tagged unions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageMetadata {
    Disambiguation(DisambiguationContext),
    RecentEntities(RecentEntitiesContext),
    Reply(ReplyContext),
}

/// One message in a [`crate::memory::ConversationMemory`] window.
///
/// Created on inbound receipt or outbound send; trimmed by the memory's
/// eviction policy; never mutated afterwards except to clear expired
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub external_id: Option<String>,
    pub reply_to_external_id: Option<String>,
    pub estimated_tokens: u32,
    pub metadata: Option<MessageMetadata>,
}

/// A top-level domain the assistant can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Calendar,
    TaskStore,
    Email,
    Memory,
    General,
    Meta,
}

impl Capability {
    /// String form used in prompts, routing tables and the wire schema.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::TaskStore => "taskStore",
            Self::Email => "email",
            Self::Memory => "memory",
            Self::General => "general",
            Self::Meta => "meta",
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar" => Ok(Self::Calendar),
            "taskStore" | "task_store" => Ok(Self::TaskStore),
            "email" => Ok(Self::Email),
            "memory" => Ok(Self::Memory),
            "general" => Ok(Self::General),
            "meta" => Ok(Self::Meta),
            _ => Err(()),
        }
    }
}

/// Constraints carried alongside a [`PlanStep`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepConstraints {
    pub raw_message: String,
    pub extracted_info: Option<serde_json::Value>,
}

/// One unit of work routed to one capability with an action hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub capability: Capability,
    pub action_hint: String,
    pub constraints: StepConstraints,
    pub changes: serde_json::Value,
    pub depends_on: Vec<String>,
}

/// Intent classification for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Operation,
    Conversation,
    Meta,
}

/// Risk bucket assigned to a plan or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Missing-field taxonomy that drives the HITL gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingField {
    IntentUnclear,
    TargetUnclear,
    TimeUnclear,
    WhichOne,
    IntegrationMissing,
}

/// Planner output: an ordered, typed decomposition of the user's request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutput {
    pub intent_type: IntentType,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub needs_approval: bool,
    pub missing_fields: Vec<MissingField>,
    pub plan: Vec<PlanStep>,
}

impl PlanOutput {
    /// Every `depends_on` id refers to a step present in `plan`, and the
    /// induced dependency graph is acyclic (spec §8 invariant).
    pub fn dependencies_are_valid(&self) -> bool {
        let ids: std::collections::HashSet<&str> =
            self.plan.iter().map(|s| s.id.as_str()).collect();
        for step in &self.plan {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return false;
                }
            }
        }
        !Self::has_cycle(&self.plan)
    }

    fn has_cycle(plan: &[PlanStep]) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let index: HashMap<&str, usize> = plan
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut marks = vec![Mark::Unvisited; plan.len()];

        fn visit(
            i: usize,
            plan: &[PlanStep],
            index: &HashMap<&str, usize>,
            marks: &mut [Mark],
        ) -> bool {
            match marks[i] {
                Mark::Done => return false,
                Mark::InProgress => return true,
                Mark::Unvisited => {}
            }
            marks[i] = Mark::InProgress;
            for dep in &plan[i].depends_on {
                if let Some(&j) = index.get(dep.as_str()) {
                    if visit(j, plan, index, marks) {
                        return true;
                    }
                }
            }
            marks[i] = Mark::Done;
            false
        }

        for i in 0..plan.len() {
            if visit(i, plan, &index, &mut marks) {
                return true;
            }
        }
        false
    }
}

/// Resolver output kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverOutputKind {
    Execute,
    NeedsEntityResolution,
}

/// A capability resolver's translation of a [`PlanStep`] into a typed
/// domain operation. `args` always carries an `"operation"` discriminator
/// plus operation-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverOutput {
    pub step_id: String,
    pub kind: ResolverOutputKind,
    pub args: serde_json::Value,
    pub entity_type: String,
}

/// Extra metadata carried on a resolution candidate. Replaces an
/// open-ended bag with the two shapes the spec actually needs (design
/// note: candidate metadata becomes a typed tagged union).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateMetadata {
    Recurring {
        recurring_series_id: String,
        is_recurring_series: Option<bool>,
        event_id: Option<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    Simple {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

/// A single scored match produced by an [`crate::entities::EntityResolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionCandidate {
    pub id: String,
    pub display_text: String,
    pub entity: serde_json::Value,
    pub score: f64,
    pub metadata: CandidateMetadata,
}

/// Outcome of an entity-resolution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionOutput {
    Resolved {
        resolved_ids: Vec<String>,
        args: serde_json::Value,
        is_recurring: Option<bool>,
        series_id: Option<String>,
    },
    Disambiguation {
        candidates: Vec<ResolutionCandidate>,
        question: String,
        allow_multiple: bool,
    },
    NotFound {
        error: String,
        searched_for: String,
    },
    ClarifyQuery {
        error: String,
        searched_for: String,
        suggestions: Vec<String>,
    },
}

/// Reason the HITL gate wants to suspend the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlReason {
    Clarification,
    Confirmation,
    Approval,
    Disambiguation,
    IntentUnclear,
}

/// Gate decision produced by [`crate::hitl::HitlGate::check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlCheck {
    pub should_interrupt: bool,
    pub reason: Option<HitlReason>,
    pub details: String,
    pub missing_fields: Vec<MissingField>,
    pub disambiguation_context: Option<DisambiguationContext>,
}

impl HitlCheck {
    /// No interruption needed; the turn proceeds.
    pub fn proceed() -> Self {
        Self {
            should_interrupt: false,
            reason: None,
            details: String::new(),
            missing_fields: vec![],
            disambiguation_context: None,
        }
    }
}

/// Interrupt flavor surfaced to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptType {
    Clarification,
    Confirmation,
    Approval,
    Disambiguation,
    IntentUnclear,
}

/// Metadata accompanying an [`InterruptPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptMetadata {
    pub step_id: Option<String>,
    pub entity_type: Option<String>,
    pub candidates: Option<Vec<ResolutionCandidate>>,
    pub interrupted_at: DateTime<Utc>,
}

/// What the orchestrator emits to the caller when a turn suspends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptPayload {
    pub interrupt_type: InterruptType,
    pub question: String,
    pub options: Option<Vec<String>>,
    pub metadata: InterruptMetadata,
}

/// What the orchestrator emits to the caller when a turn completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantReply {
    pub text: String,
    pub external_id_to_mark: Option<String>,
}

/// Either outcome of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Reply(AssistantReply),
    Interrupt(InterruptPayload),
}

/// Language tag understood by the pipeline (spec §6 language set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    He,
    En,
    Other,
}

impl Language {
    /// `other` routes to English per spec §6.
    pub fn effective(self) -> Self {
        match self {
            Self::Other => Self::En,
            other => other,
        }
    }
}

/// Which domain integrations this user has connected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UserCapabilities {
    pub calendar: bool,
    pub email: bool,
}

/// Identity and context for the user driving a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,
    pub phone: String,
    pub language: Language,
    pub capabilities: UserCapabilities,
}

/// The inbound message and request-scoped identifiers for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputContext {
    pub message: String,
    pub enhanced_message: Option<String>,
    pub request_id: String,
}

/// Transport-facing inbound envelope (spec §6 "Inbound").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: String,
    pub user_phone: String,
    pub message_external_id: String,
    pub reply_to_external_id: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub media_ref: Option<String>,
}

/// Disambiguation-in-progress tracking inside [`PipelineState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisambiguationState {
    pub context: DisambiguationContext,
    pub resolved: bool,
    pub user_selection: Option<String>,
}

/// Where the orchestrator should resume after a HITL result is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnTo {
    pub node: String,
    pub mode: String,
}

/// One entry in `PipelineState::hitl_results`, keyed by step id or a
/// planner-level origin key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlResultEntry {
    pub raw: String,
    pub parsed: Option<serde_json::Value>,
    pub return_to: Option<ReturnTo>,
}

/// Which HITL flavor suspended the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlType {
    IntentUnclear,
    MissingFields,
    Confirmation,
    Disambiguation,
}

/// The checkpointed object owned exclusively by the orchestrator for the
/// duration of a turn; serialized on interrupt, resurrected on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub user: UserContext,
    pub input: InputContext,
    pub now: DateTime<Utc>,
    pub recent_messages: Vec<Message>,
    pub long_term_summary: Option<String>,
    pub planner_output: Option<PlanOutput>,
    pub routing_suggestions: Vec<RoutingHint>,
    pub disambiguation: Option<DisambiguationState>,
    pub needs_hitl: bool,
    pub hitl_reason: Option<HitlReason>,
    pub hitl_type: Option<HitlType>,
    pub hitl_results: HashMap<String, HitlResultEntry>,
    pub interrupted_at: Option<DateTime<Utc>>,
    pub planner_hitl_response: Option<String>,
    pub per_step_results: HashMap<String, serde_json::Value>,
    pub resume_step_id: Option<String>,
}

impl PipelineState {
    pub fn new(user: UserContext, input: InputContext, now: DateTime<Utc>) -> Self {
        Self {
            user,
            input,
            now,
            recent_messages: vec![],
            long_term_summary: None,
            planner_output: None,
            routing_suggestions: vec![],
            disambiguation: None,
            needs_hitl: false,
            hitl_reason: None,
            hitl_type: None,
            hitl_results: HashMap::new(),
            interrupted_at: None,
            planner_hitl_response: None,
            per_step_results: HashMap::new(),
            resume_step_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            capability: Capability::General,
            action_hint: "respond".to_string(),
            constraints: StepConstraints::default(),
            changes: serde_json::json!({}),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn plan(steps: Vec<PlanStep>) -> PlanOutput {
        PlanOutput {
            intent_type: IntentType::Operation,
            confidence: 0.9,
            risk_level: RiskLevel::Low,
            needs_approval: false,
            missing_fields: vec![],
            plan: steps,
        }
    }

    #[test]
    fn valid_dag_passes() {
        let p = plan(vec![step("A", &[]), step("B", &["A"])]);
        assert!(p.dependencies_are_valid());
    }

    #[test]
    fn unknown_dependency_fails() {
        let p = plan(vec![step("A", &["Z"])]);
        assert!(!p.dependencies_are_valid());
    }

    #[test]
    fn cycle_fails() {
        let p = plan(vec![step("A", &["B"]), step("B", &["A"])]);
        assert!(!p.dependencies_are_valid());
    }

    #[test]
    fn capability_roundtrip() {
        for cap in [
            Capability::Calendar,
            Capability::TaskStore,
            Capability::Email,
            Capability::Memory,
            Capability::General,
            Capability::Meta,
        ] {
            let s = cap.as_str();
            let parsed: Capability = s.parse().expect("roundtrip");
            assert_eq!(parsed, cap);
        }
    }

    #[test]
    fn language_other_routes_to_english() {
        assert_eq!(Language::Other.effective(), Language::En);
        assert_eq!(Language::He.effective(), Language::He);
    }

    #[test]
    fn disambiguation_expiry() {
        let now = Utc::now();
        let ctx = DisambiguationContext {
            candidates: vec![],
            entity_type: "calendar_event".to_string(),
            expires_at: now + chrono::Duration::minutes(5),
        };
        assert!(!ctx.is_expired(now));
        assert!(ctx.is_expired(now + chrono::Duration::minutes(6)));
    }
}
