//! PipelineOrchestrator — drives one turn end to end: plan, gate, resolve,
//! execute, checkpoint-and-suspend or complete (spec §4.7).
//!
//! Grounded in the teacher's `Pipeline` shape (a struct holding every
//! stage's dependency, a single `process` entry point, a per-user
//! serialization lock) generalized from that pipeline's fixed
//! template-driven flow to this turn's plan/gate/resolve loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, instrument, warn};

use crate::checkpoint::{CheckpointKey, CheckpointStore};
use crate::entities::{entity_type_for_step, EntityResolverRegistry, ResolutionContext};
use crate::executors::ExecutorRegistry;
use crate::hitl::{parse_yes_no, HitlGate};
use crate::memory::{AppendOptions, ConversationMemory};
use crate::planner::{Planner, PlannerContext};
use crate::resolvers::ResolverRegistry;
use crate::routing::RoutingHints;
use crate::time::TimeContext;
use crate::types::{
    AssistantReply, HitlReason, HitlResultEntry, HitlType, InboundMessage,
    InputContext, InterruptMetadata, InterruptPayload, InterruptType, Language,
    PipelineState, PlanStep, ResolutionOutput, ResolverOutputKind, ReturnTo, Role,
    TurnOutcome, UserCapabilities, UserContext,
};

/// Fixed turn-slot key: this crate serializes a user's turns with a
/// per-user lock, so at most one turn per user is ever in flight —
/// `(userId, "turn")` is therefore a stable checkpoint key rather than a
/// per-request id (spec §4.7 "keyed by `(userId, turnId)`").
const TURN_SLOT: &str = "turn";

pub struct PipelineOrchestrator {
    memory: Arc<ConversationMemory>,
    planner: Planner,
    resolvers: ResolverRegistry,
    entity_resolvers: EntityResolverRegistry,
    executors: ExecutorRegistry,
    hitl: HitlGate,
    routing: RoutingHints,
    checkpoints: Arc<dyn CheckpointStore>,
    utc_offset_seconds: i32,
    user_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    last_replies: StdMutex<HashMap<String, AssistantReply>>,
}

impl PipelineOrchestrator {
    pub fn new(
        memory: Arc<ConversationMemory>,
        planner: Planner,
        resolvers: ResolverRegistry,
        entity_resolvers: EntityResolverRegistry,
        executors: ExecutorRegistry,
        hitl: HitlGate,
        checkpoints: Arc<dyn CheckpointStore>,
        utc_offset_seconds: i32,
    ) -> Self {
        Self {
            memory,
            planner,
            resolvers,
            entity_resolvers,
            executors,
            hitl,
            routing: RoutingHints::new(),
            checkpoints,
            utc_offset_seconds,
            user_locks: StdMutex::new(HashMap::new()),
            last_replies: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut guard = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(user_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Entry point: one inbound message in, one outcome out (spec §4.7
    /// turn lifecycle, §6 inbound/outbound contract).
    #[instrument(skip(self, msg), fields(turn.user_id = %msg.user_id))]
    pub async fn handle_message(&self, msg: InboundMessage) -> TurnOutcome {
        let user_lock = self.lock_for(&msg.user_id);
        let _guard = user_lock.lock().await;

        if self.memory.find_by_external_id(&msg.user_id, &msg.message_external_id).is_some() {
            // Idempotence (spec §4.7 Failure semantics): re-delivery of an
            // already-processed external id short-circuits to the last reply.
            if let Some(reply) = self.last_replies.lock().unwrap_or_else(|e| e.into_inner()).get(&msg.user_id).cloned() {
                return TurnOutcome::Reply(reply);
            }
        }

        let key = CheckpointKey::new(msg.user_id.clone(), TURN_SLOT.to_string());
        let existing = self.checkpoints.load(&key).ok().flatten();

        let state = match existing {
            Some(state) => {
                let expired = state
                    .interrupted_at
                    .map(|at| self.hitl.is_expired(at, Utc::now()))
                    .unwrap_or(false);
                if expired {
                    let _ = self.checkpoints.delete(&key);
                    self.start_fresh(&msg).await
                } else {
                    self.resume(state, &msg).await
                }
            }
            None => self.start_fresh(&msg).await,
        };

        self.drive(state, &key, &msg.message_external_id).await
    }

    async fn start_fresh(&self, msg: &InboundMessage) -> PipelineState {
        let language = detect_language(&msg.text);
        self.memory.append(
            &msg.user_id,
            Role::User,
            &msg.text,
            AppendOptions {
                external_id: Some(msg.message_external_id.clone()),
                reply_to_external_id: msg.reply_to_external_id.clone(),
                metadata: None,
            },
        );

        let recent = self.memory.recent(&msg.user_id, 20);
        let mut state = PipelineState::new(
            UserContext {
                id: msg.user_id.clone(),
                phone: msg.user_phone.clone(),
                language,
                capabilities: UserCapabilities { calendar: true, email: true },
            },
            InputContext { message: msg.text.clone(), enhanced_message: None, request_id: msg.message_external_id.clone() },
            Utc::now(),
        );
        state.recent_messages = recent;
        state
    }

    async fn resume(&self, mut state: PipelineState, msg: &InboundMessage) -> PipelineState {
        self.memory.append(
            &msg.user_id,
            Role::User,
            &msg.text,
            AppendOptions {
                external_id: Some(msg.message_external_id.clone()),
                reply_to_external_id: msg.reply_to_external_id.clone(),
                metadata: None,
            },
        );

        let reply_text = msg.text.clone();

        if let Some(disamb) = state.disambiguation.clone() {
            if !disamb.resolved {
                state.disambiguation = Some(crate::types::DisambiguationState {
                    context: disamb.context,
                    resolved: false,
                    user_selection: Some(reply_text),
                });
                return state;
            }
        }

        if let Some(hitl_type) = state.hitl_type {
            match hitl_type {
                // intent_unclear and missing_fields both mean "I need more
                // information from you", not "yes or no" — the reply is
                // injected as a clarification and the Planner re-runs
                // (spec §4.6 resume rule for both reasons).
                HitlType::IntentUnclear | HitlType::MissingFields => {
                    state.hitl_results.insert(
                        "planner".to_string(),
                        HitlResultEntry {
                            raw: reply_text,
                            parsed: None,
                            return_to: Some(ReturnTo { node: "planner".to_string(), mode: "replan".to_string() }),
                        },
                    );
                }
                HitlType::Confirmation => {
                    let parsed = parse_yes_no(&reply_text, state.user.language);
                    state.planner_hitl_response = Some(reply_text.clone());
                    state.hitl_results.insert(
                        "planner".to_string(),
                        HitlResultEntry { raw: reply_text, parsed: parsed.map(|b| serde_json::json!(b)), return_to: None },
                    );
                }
                HitlType::Disambiguation => {}
            }
        }

        state.interrupted_at = None;
        state
    }

    /// Run (or continue) the plan → gate → resolve → execute loop from
    /// wherever `state` left off, either completing the turn or producing
    /// a fresh interrupt.
    async fn drive(&self, mut state: PipelineState, key: &CheckpointKey, inbound_external_id: &str) -> TurnOutcome {
        loop {
            if let Some(disamb) = state.disambiguation.clone() {
                if !disamb.resolved {
                    match self.continue_disambiguation(&mut state, disamb).await {
                        ControlFlow::Interrupt(payload) => {
                            let _ = self.checkpoints.save(key, state);
                            return TurnOutcome::Interrupt(payload);
                        }
                        ControlFlow::Continue => continue,
                    }
                }
            }

            // A confirmation/approval resume that already answered "yes"
            // has nothing left for the gate to decide: re-running
            // `check_plan` against the same still-high-risk plan would
            // just suspend again forever, so that answered plan is let
            // straight through to step execution.
            let mut plan_already_confirmed = false;

            if let Some(entry) = state.hitl_results.get("planner").cloned() {
                if entry.return_to.as_ref().map(|r| r.mode.as_str()) == Some("replan") {
                    state.hitl_results.remove("planner");
                    let clarified = format!("{}\n(clarification: {})", state.input.message, entry.raw);
                    state.input.enhanced_message = Some(clarified);
                    state.planner_output = None;
                } else if state.planner_output.is_some() {
                    let proceeds = entry.parsed.as_ref().and_then(|v| v.as_bool()).unwrap_or(true);
                    state.hitl_results.remove("planner");
                    if !proceeds {
                        self.memory.append(&state.user.id, Role::Assistant, "Okay, I've cancelled that.", AppendOptions::default());
                        let _ = self.checkpoints.delete(key);
                        return TurnOutcome::Reply(AssistantReply { text: "Okay, I've cancelled that.".to_string(), external_id_to_mark: Some(inbound_external_id.to_string()) });
                    }
                    plan_already_confirmed = true;
                }
            }

            if state.planner_output.is_none() {
                let now = TimeContext::now(self.utc_offset_seconds);
                let enhanced = state.input.enhanced_message.clone().unwrap_or_else(|| state.input.message.clone());
                let hints = self.routing.score(&enhanced);
                let plan = self
                    .planner
                    .plan(PlannerContext {
                        enhanced_message: &enhanced,
                        now: &now,
                        recent_messages: &state.recent_messages,
                        capabilities: &state.user.capabilities,
                        routing_hints: &hints,
                        replan_clarification: None,
                    })
                    .await;
                state.routing_suggestions = hints;
                state.planner_output = Some(plan);
            }

            if !plan_already_confirmed {
                let plan = state.planner_output.clone().expect("just set above");
                let check = self
                    .hitl
                    .check_plan(&plan, &state.input.message, state.user.language, &state.routing_suggestions)
                    .await;

                if check.should_interrupt {
                    let reason = check.reason.unwrap_or(HitlReason::Clarification);
                    return self.suspend(&mut state, key, reason, check.details, None).await;
                }
            }

            match self.run_steps(&mut state).await {
                ControlFlow::Interrupt(payload) => {
                    let _ = self.checkpoints.save(key, state);
                    return TurnOutcome::Interrupt(payload);
                }
                ControlFlow::Continue => {}
            }

            let reply = self.compose_reply(&state);
            self.memory.append(&state.user.id, Role::Assistant, &reply, AppendOptions::default());
            let _ = self.checkpoints.delete(key);
            let assistant_reply = AssistantReply { text: reply, external_id_to_mark: Some(inbound_external_id.to_string()) };
            self.last_replies.lock().unwrap_or_else(|e| e.into_inner()).insert(state.user.id.clone(), assistant_reply.clone());
            return TurnOutcome::Reply(assistant_reply);
        }
    }

    async fn continue_disambiguation(&self, state: &mut PipelineState, disamb: crate::types::DisambiguationState) -> ControlFlow {
        let Some(step_id) = state.resume_step_id.clone() else {
            state.disambiguation = None;
            return ControlFlow::Continue;
        };
        let Some(selection) = disamb.user_selection.clone() else {
            return ControlFlow::Continue;
        };
        let Some(resolver) = self.entity_resolvers.get(&disamb.context.entity_type) else {
            state.disambiguation = None;
            return ControlFlow::Continue;
        };

        let stored_args = state.per_step_results.get(&step_id).cloned().unwrap_or_else(|| serde_json::json!({}));
        let output = resolver.apply_selection(&selection, &disamb.context.candidates, &stored_args);

        match output {
            ResolutionOutput::Disambiguation { .. } => {
                let check = self.hitl.check_resolution(&output, &disamb.context.entity_type, state.user.language);
                let entity_type = disamb.context.entity_type.clone();
                state.disambiguation = Some(crate::types::DisambiguationState { context: check.disambiguation_context.clone().unwrap_or(disamb.context), resolved: false, user_selection: None });
                let payload = self.interrupt_payload(state, HitlReason::Disambiguation, check.details, Some(step_id), Some(entity_type), check.disambiguation_context.map(|c| c.candidates));
                ControlFlow::Interrupt(payload)
            }
            other => {
                state.disambiguation = Some(crate::types::DisambiguationState { context: disamb.context.clone(), resolved: true, user_selection: Some(selection) });
                self.dispatch_resolution(state, &step_id, &disamb.context.entity_type, other).await;
                state.disambiguation = None;
                ControlFlow::Continue
            }
        }
    }

    async fn run_steps(&self, state: &mut PipelineState) -> ControlFlow {
        let plan = state.planner_output.clone().expect("planner output present");
        let order = topological_order(&plan.plan);
        let resume_from = state.resume_step_id.clone();
        let mut skipping = resume_from.is_some();

        for step in order {
            if skipping {
                if Some(step.id.clone()) == resume_from {
                    skipping = false;
                }
                continue;
            }
            if state.per_step_results.contains_key(&step.id) {
                continue;
            }

            let Some(resolver) = self.resolvers.get(step.capability) else {
                warn!(step = %step.id, "no resolver registered for capability");
                continue;
            };
            let now = TimeContext::now(self.utc_offset_seconds);
            let resolver_output = resolver.resolve(&step, &now, &state.recent_messages).await;

            if resolver_output.kind == ResolverOutputKind::Execute {
                self.execute_directly(state, &step, &resolver_output.args);
                continue;
            }

            let entity_type = entity_type_for_step(&step);
            let Some(entity_resolver) = self.entity_resolvers.get(entity_type) else {
                error!(step = %step.id, entity_type, "no entity resolver registered");
                let details = "I didn't understand; can you rephrase?".to_string();
                return ControlFlow::Interrupt(self.interrupt_payload(state, HitlReason::Clarification, details, Some(step.id.clone()), None, None));
            };

            let operation = resolver_output.args.get("operation").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let ctx = ResolutionContext { user_id: state.user.id.clone(), language: state.user.language, now };
            let resolution = entity_resolver.resolve(&operation, resolver_output.args.clone(), &ctx).await;

            let check = self.hitl.check_resolution(&resolution, entity_type, state.user.language);
            if check.should_interrupt {
                state.resume_step_id = Some(step.id.clone());
                state.per_step_results.insert(step.id.clone(), resolver_output.args.clone());
                if let Some(disamb_ctx) = check.disambiguation_context.clone() {
                    state.disambiguation = Some(crate::types::DisambiguationState { context: disamb_ctx.clone(), resolved: false, user_selection: None });
                    return ControlFlow::Interrupt(self.interrupt_payload(state, HitlReason::Disambiguation, check.details, Some(step.id.clone()), Some(entity_type.to_string()), Some(disamb_ctx.candidates)));
                }
                return ControlFlow::Interrupt(self.interrupt_payload(state, check.reason.unwrap_or(HitlReason::Clarification), check.details, Some(step.id.clone()), Some(entity_type.to_string()), None));
            }

            self.dispatch_resolution(state, &step.id, entity_type, resolution).await;
        }

        state.resume_step_id = None;
        ControlFlow::Continue
    }

    fn execute_directly(&self, state: &mut PipelineState, step: &PlanStep, args: &serde_json::Value) {
        state.per_step_results.insert(step.id.clone(), args.clone());
    }

    async fn dispatch_resolution(&self, state: &mut PipelineState, step_id: &str, entity_type: &str, resolution: ResolutionOutput) {
        if let ResolutionOutput::Resolved { args, .. } = resolution {
            let operation = args.get("operation").and_then(|v| v.as_str()).unwrap_or("list").to_string();
            let result = match self.executors.get(entity_type) {
                Some(executor) => executor.mutate(&operation, args.clone()).await,
                None => crate::executors::ExecutorResult::err("no executor registered"),
            };
            state.per_step_results.insert(step_id.to_string(), serde_json::json!({ "args": args, "result": result }));
        }
    }

    async fn suspend(
        &self,
        state: &mut PipelineState,
        key: &CheckpointKey,
        reason: HitlReason,
        details: String,
        entity_type: Option<String>,
    ) -> TurnOutcome {
        state.hitl_type = Some(match reason {
            HitlReason::IntentUnclear => HitlType::IntentUnclear,
            HitlReason::Disambiguation => HitlType::Disambiguation,
            HitlReason::Confirmation | HitlReason::Approval => HitlType::Confirmation,
            HitlReason::Clarification => HitlType::MissingFields,
        });
        let payload = self.interrupt_payload(state, reason, details, None, entity_type, None);
        let _ = self.checkpoints.save(key, state.clone());
        TurnOutcome::Interrupt(payload)
    }

    fn interrupt_payload(
        &self,
        state: &mut PipelineState,
        reason: HitlReason,
        details: String,
        step_id: Option<String>,
        entity_type: Option<String>,
        candidates: Option<Vec<crate::types::ResolutionCandidate>>,
    ) -> InterruptPayload {
        state.interrupted_at = Some(Utc::now());
        self.memory.append(&state.user.id, Role::Assistant, &details, AppendOptions::default());

        InterruptPayload {
            interrupt_type: match reason {
                HitlReason::Clarification => InterruptType::Clarification,
                HitlReason::Confirmation => InterruptType::Confirmation,
                HitlReason::Approval => InterruptType::Approval,
                HitlReason::Disambiguation => InterruptType::Disambiguation,
                HitlReason::IntentUnclear => InterruptType::IntentUnclear,
            },
            question: details,
            options: candidates.as_ref().map(|cs| cs.iter().map(|c| c.display_text.clone()).collect()),
            metadata: InterruptMetadata { step_id, entity_type, candidates, interrupted_at: Utc::now() },
        }
    }

    fn compose_reply(&self, state: &PipelineState) -> String {
        for result in state.per_step_results.values() {
            if let Some(reply) = result.get("reply").and_then(|v| v.as_str()) {
                return reply.to_string();
            }
            if let Some(args) = result.get("args") {
                if let Some(reply) = args.get("reply").and_then(|v| v.as_str()) {
                    return reply.to_string();
                }
            }
        }
        match state.user.language.effective() {
            Language::He => "בוצע.".to_string(),
            _ => "Done.".to_string(),
        }
    }
}

enum ControlFlow {
    Continue,
    Interrupt(InterruptPayload),
}

/// Simple language guess for a fresh turn: presence of Hebrew-block
/// characters routes to `He`, otherwise `En` (spec §6 language set;
/// full language detection is out of scope for this pipeline).
fn detect_language(text: &str) -> Language {
    if text.chars().any(|c| ('\u{0590}'..='\u{05FF}').contains(&c)) {
        Language::He
    } else {
        Language::En
    }
}

/// Kahn's-algorithm topological order over `dependsOn` (spec §4.7 step 5
/// "topological over dependsOn"). [`PlanOutput::dependencies_are_valid`]
/// guarantees the input is a DAG; steps with no remaining dependency are
/// emitted in original plan order for determinism.
fn topological_order(steps: &[PlanStep]) -> Vec<PlanStep> {
    let mut remaining: Vec<PlanStep> = steps.to_vec();
    let mut done: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut ordered = Vec::with_capacity(steps.len());

    while !remaining.is_empty() {
        let ready_idx = remaining.iter().position(|s| s.depends_on.iter().all(|d| done.contains(d)));
        match ready_idx {
            Some(idx) => {
                let step = remaining.remove(idx);
                done.insert(step.id.clone());
                ordered.push(step);
            }
            None => {
                // Shouldn't happen for a validated DAG; emit what's left
                // in original order rather than spin.
                ordered.extend(remaining.drain(..));
                break;
            }
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capability, StepConstraints};

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

    #[test]
    fn topological_order_respects_dependencies() {
        let steps = vec![step("B", &["A"]), step("A", &[])];
        let order = topological_order(&steps);
        assert_eq!(order[0].id, "A");
        assert_eq!(order[1].id, "B");
    }

    #[test]
    fn independent_steps_keep_plan_order() {
        let steps = vec![step("A", &[]), step("B", &[])];
        let order = topological_order(&steps);
        assert_eq!(order[0].id, "A");
        assert_eq!(order[1].id, "B");
    }

    #[test]
    fn hebrew_text_is_detected() {
        assert_eq!(detect_language("קבע לי פגישה מחר"), Language::He);
        assert_eq!(detect_language("schedule a meeting tomorrow"), Language::En);
    }
}
