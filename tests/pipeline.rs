//! End-to-end turn tests driving [`PipelineOrchestrator::handle_message`]
//! through the public API only, the way the CLI adapter does. Two local
//! `LlmGateway` doubles stand in for a real model: `AlwaysFailGateway`
//! forces every call site down its deterministic keyword fallback, and
//! `CalendarJsonGateway` additionally scripts the calendar resolver's
//! response so entity-resolution scenarios don't depend on fuzzy-matching
//! the model's fallback would produce from a full sentence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use turnkeeper::checkpoint::InMemoryCheckpointStore;
use turnkeeper::config::{MemoryConfig, ThresholdsConfig};
use turnkeeper::entities::{
    calendar_entity_resolver, email_entity_resolver, memory_entity_resolver,
    task_entity_resolver, EntityResolverRegistry,
};
use turnkeeper::executors::fake::{FakeRecord, InMemoryExecutor};
use turnkeeper::executors::ExecutorRegistry;
use turnkeeper::hitl::HitlGate;
use turnkeeper::llm::{CompletionRequest, CompletionResponse, LlmError, LlmGateway};
use turnkeeper::memory::ConversationMemory;
use turnkeeper::orchestrator::PipelineOrchestrator;
use turnkeeper::planner::Planner;
use turnkeeper::resolvers::{
    calendar_resolver, email_resolver, general_resolver, memory_resolver, meta_resolver,
    task_store_resolver, ResolverRegistry,
};
use turnkeeper::types::{InboundMessage, InterruptType, TurnOutcome};

/// Always fails, forcing the Planner, every resolver and the HITL gate
/// down their deterministic fallback paths.
struct AlwaysFailGateway;

#[async_trait]
impl LlmGateway for AlwaysFailGateway {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::RequestFailed("no model configured for this test".to_string()))
    }
}

/// Like `AlwaysFailGateway`, except it scripts a single fixed response for
/// the calendar resolver specifically (identified by its system prompt),
/// so a test can pin the exact operation and args entity resolution sees
/// without fighting the fallback's whole-message fuzzy match.
struct CalendarJsonGateway {
    operation: &'static str,
    summary: &'static str,
}

#[async_trait]
impl LlmGateway for CalendarJsonGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let is_calendar_resolver = request
            .messages
            .iter()
            .any(|m| m.content.contains("You are the calendar resolver."));
        if !is_calendar_resolver {
            return Err(LlmError::RequestFailed("scripted only for the calendar resolver".to_string()));
        }
        let body = serde_json::json!({
            "operation": self.operation,
            "args": { "summary": self.summary, "rawMessage": self.summary },
        });
        Ok(CompletionResponse { content: body.to_string() })
    }
}

fn inbound(user_id: &str, external_id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        user_id: user_id.to_string(),
        user_phone: "+10000000000".to_string(),
        message_external_id: external_id.to_string(),
        reply_to_external_id: None,
        text: text.to_string(),
        timestamp: Utc::now(),
        media_ref: None,
    }
}

fn build_orchestrator(gateway: Arc<dyn LlmGateway>, calendar_seed: Vec<FakeRecord>) -> Arc<PipelineOrchestrator> {
    let thresholds = ThresholdsConfig::default();
    let model = "test-model".to_string();

    let planner = Planner::new(gateway.clone(), model.clone(), 0.3, 2500);

    let mut resolvers = ResolverRegistry::new();
    resolvers.register(calendar_resolver(gateway.clone(), model.clone()));
    resolvers.register(task_store_resolver(gateway.clone(), model.clone()));
    resolvers.register(email_resolver(gateway.clone(), model.clone()));
    resolvers.register(memory_resolver(gateway.clone(), model.clone()));
    resolvers.register(general_resolver(gateway.clone(), model.clone()));
    resolvers.register(meta_resolver(gateway.clone(), model.clone()));

    let mut entity_resolvers = EntityResolverRegistry::new();
    let mut executors = ExecutorRegistry::new();

    let calendar_exec = Arc::new(InMemoryExecutor::seeded("calendar", calendar_seed));
    entity_resolvers.register(calendar_entity_resolver(calendar_exec.clone(), &thresholds));
    executors.register("calendar_event", calendar_exec);

    let task_exec = Arc::new(InMemoryExecutor::new("task_store"));
    entity_resolvers.register(task_entity_resolver(task_exec.clone(), &thresholds));
    executors.register("task", task_exec);

    let email_exec = Arc::new(InMemoryExecutor::new("email"));
    entity_resolvers.register(email_entity_resolver(email_exec.clone(), &thresholds));
    executors.register("email", email_exec);

    let memory_exec = Arc::new(InMemoryExecutor::new("memory"));
    entity_resolvers.register(memory_entity_resolver(memory_exec.clone(), &thresholds));
    executors.register("memory_fact", memory_exec);

    let hitl = HitlGate::new(gateway.clone(), model.clone(), thresholds.confidence_threshold);

    let memory = Arc::new(ConversationMemory::new(MemoryConfig::default()));
    let checkpoints: Arc<dyn turnkeeper::checkpoint::CheckpointStore> =
        Arc::new(InMemoryCheckpointStore::with_default_policy());

    Arc::new(PipelineOrchestrator::new(
        memory,
        planner,
        resolvers,
        entity_resolvers,
        executors,
        hitl,
        checkpoints,
        0,
    ))
}

fn reply_text(outcome: &TurnOutcome) -> &str {
    match outcome {
        TurnOutcome::Reply(reply) => &reply.text,
        TurnOutcome::Interrupt(_) => panic!("expected a reply, got an interrupt: {outcome:?}"),
    }
}

#[tokio::test]
async fn low_risk_create_completes_without_interrupt() {
    let orchestrator = build_orchestrator(Arc::new(AlwaysFailGateway), vec![]);

    let outcome = orchestrator
        .handle_message(inbound("user-1", "ext-1", "schedule a meeting with dan tomorrow"))
        .await;

    assert_eq!(reply_text(&outcome), "Done.");
}

#[tokio::test]
async fn redelivered_external_id_returns_cached_reply() {
    let orchestrator = build_orchestrator(Arc::new(AlwaysFailGateway), vec![]);
    let msg = inbound("user-1", "ext-dup", "schedule a meeting with dan tomorrow");

    let first = orchestrator.handle_message(msg.clone()).await;
    let second = orchestrator.handle_message(msg).await;

    assert_eq!(reply_text(&first), "Done.");
    assert_eq!(reply_text(&first), reply_text(&second));
}

#[tokio::test]
async fn high_risk_delete_requires_confirmation_then_completes() {
    let seed = vec![FakeRecord {
        id: "evt-1".to_string(),
        summary: "Meeting with Dan".to_string(),
        description: String::new(),
        start: Some(Utc::now() + Duration::days(1)),
        end: Some(Utc::now() + Duration::days(1) + Duration::hours(1)),
        recurring_series_id: None,
    }];
    let orchestrator = build_orchestrator(Arc::new(AlwaysFailGateway), seed);

    let first = orchestrator
        .handle_message(inbound("user-1", "ext-1", "delete my meeting with dan tomorrow"))
        .await;
    match first {
        TurnOutcome::Interrupt(payload) => {
            assert_eq!(payload.interrupt_type, InterruptType::Confirmation);
            assert!(payload.question.to_lowercase().contains("delete"));
        }
        other => panic!("expected a confirmation interrupt, got {other:?}"),
    }

    let second = orchestrator.handle_message(inbound("user-1", "ext-2", "yes")).await;
    assert_eq!(reply_text(&second), "Done.");
}

#[tokio::test]
async fn high_risk_delete_can_be_declined() {
    let orchestrator = build_orchestrator(Arc::new(AlwaysFailGateway), vec![]);

    let first = orchestrator
        .handle_message(inbound("user-1", "ext-1", "delete my meeting with dan tomorrow"))
        .await;
    assert!(matches!(first, TurnOutcome::Interrupt(_)));

    let second = orchestrator.handle_message(inbound("user-1", "ext-2", "no")).await;
    assert_eq!(reply_text(&second), "Okay, I've cancelled that.");
}

#[tokio::test]
async fn ambiguous_matches_interrupt_then_resolve_on_selection() {
    let seed = vec![
        FakeRecord {
            id: "evt-sync".to_string(),
            summary: "Team sync".to_string(),
            description: String::new(),
            start: Some(Utc::now()),
            end: Some(Utc::now() + Duration::hours(1)),
            recurring_series_id: None,
        },
        FakeRecord {
            id: "evt-standup".to_string(),
            summary: "Team standup".to_string(),
            description: String::new(),
            start: Some(Utc::now()),
            end: Some(Utc::now() + Duration::hours(1)),
            recurring_series_id: None,
        },
    ];
    let gateway = Arc::new(CalendarJsonGateway { operation: "updateByDescription", summary: "team" });
    let orchestrator = build_orchestrator(gateway, seed);

    let first = orchestrator
        .handle_message(inbound("user-1", "ext-1", "move the team meeting"))
        .await;
    let candidates = match first {
        TurnOutcome::Interrupt(payload) => {
            assert_eq!(payload.interrupt_type, InterruptType::Disambiguation);
            payload.metadata.candidates.expect("disambiguation carries candidates")
        }
        other => panic!("expected a disambiguation interrupt, got {other:?}"),
    };
    assert_eq!(candidates.len(), 2);

    let second = orchestrator.handle_message(inbound("user-1", "ext-2", "2")).await;
    assert_eq!(reply_text(&second), "Done.");
}

#[tokio::test]
async fn recurring_series_offers_all_or_single_then_resolves() {
    let seed = vec![FakeRecord {
        id: "evt-standup".to_string(),
        summary: "Team standup".to_string(),
        description: String::new(),
        start: Some(Utc::now() + Duration::hours(2)),
        end: Some(Utc::now() + Duration::hours(3)),
        recurring_series_id: Some("series-standup".to_string()),
    }];
    let gateway = Arc::new(CalendarJsonGateway { operation: "deleteByDescription", summary: "standup" });
    let orchestrator = build_orchestrator(gateway, seed);

    let first = orchestrator
        .handle_message(inbound("user-1", "ext-1", "check on the team meeting"))
        .await;
    match first {
        TurnOutcome::Interrupt(payload) => {
            assert_eq!(payload.interrupt_type, InterruptType::Disambiguation);
            let candidates = payload.metadata.candidates.expect("recurring choice carries candidates");
            assert_eq!(candidates.len(), 2);
            assert!(candidates.iter().any(|c| c.id == "all"));
            assert!(candidates.iter().any(|c| c.id == "single"));
        }
        other => panic!("expected a recurring-series disambiguation, got {other:?}"),
    }

    let second = orchestrator.handle_message(inbound("user-1", "ext-2", "all")).await;
    assert_eq!(reply_text(&second), "Done.");
}

/// Scripts the Planner call specifically: the first call reports
/// `intent_unclear`, the second (post-clarification replan) returns a
/// complete meta-capability plan. Every other call site (the meta
/// resolver, the HITL clarification question) falls back to its own
/// deterministic path, since this gateway only recognizes the Planner's
/// system prompt.
struct ScriptedPlannerGateway {
    calls: std::sync::Mutex<u32>,
}

#[async_trait]
impl LlmGateway for ScriptedPlannerGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let is_planner = request.messages.iter().any(|m| m.content.contains("You are the Planner"));
        if !is_planner {
            return Err(LlmError::RequestFailed("scripted only for planner calls".to_string()));
        }
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        let body = if *calls == 1 {
            serde_json::json!({
                "intent_type": "conversation",
                "confidence": 0.5,
                "risk_level": "low",
                "needs_approval": false,
                "missing_fields": ["intent_unclear"],
                "plan": [],
            })
        } else {
            serde_json::json!({
                "intent_type": "meta",
                "confidence": 0.95,
                "risk_level": "low",
                "needs_approval": false,
                "missing_fields": [],
                "plan": [{
                    "id": "A",
                    "capability": "meta",
                    "action_hint": "what can you do",
                    "constraints": { "raw_message": "what can you do", "extracted_info": null },
                    "changes": {},
                    "depends_on": [],
                }],
            })
        };
        Ok(CompletionResponse { content: body.to_string() })
    }
}

#[tokio::test]
async fn intent_unclear_clarifies_then_replans() {
    let gateway = Arc::new(ScriptedPlannerGateway { calls: std::sync::Mutex::new(0) });
    let orchestrator = build_orchestrator(gateway, vec![]);

    let first = orchestrator.handle_message(inbound("user-1", "ext-1", "can you take care of it")).await;
    match first {
        TurnOutcome::Interrupt(payload) => assert_eq!(payload.interrupt_type, InterruptType::IntentUnclear),
        other => panic!("expected an intent_unclear interrupt, got {other:?}"),
    }

    let second = orchestrator.handle_message(inbound("user-1", "ext-2", "what can you do")).await;
    assert_eq!(reply_text(&second), "I can help with calendar, tasks, email and reminders.");
}
