//! HITLGate — the pre-execution decision table that decides whether a
//! turn proceeds or suspends for a human reply (spec §4.6).
//!
//! Mirrors the teacher's `ApprovalQueue` shape (a timeout-bearing pending
//! request plus a deterministic expiry check) but
//! trades the oneshot-channel wait for the orchestrator's
//! checkpoint/resume cycle: rather than blocking a task, the gate returns
//! a value the orchestrator persists and later re-enters with the user's
//! reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::llm::{ChatMessage, CompletionRequest, LlmGateway};
use crate::routing::RoutingHint;
use crate::types::{
    DisambiguationContext, HitlCheck, HitlReason, Language, MissingField, PlanOutput,
    ResolutionCandidate, ResolutionOutput, RiskLevel,
};

/// Default pending-interrupt timeout (spec §4.6: "default 15 minutes").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub struct HitlGate {
    gateway: Arc<dyn LlmGateway>,
    model: String,
    timeout: Duration,
    confidence_threshold: f64,
}

impl HitlGate {
    pub fn new(gateway: Arc<dyn LlmGateway>, model: impl Into<String>, confidence_threshold: f64) -> Self {
        Self { gateway, model: model.into(), timeout: DEFAULT_TIMEOUT, confidence_threshold }
    }

    pub fn with_timeout(gateway: Arc<dyn LlmGateway>, model: impl Into<String>, confidence_threshold: f64, timeout: Duration) -> Self {
        Self { gateway, model: model.into(), timeout, confidence_threshold }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True once `interrupted_at + timeout` has passed (spec §4.6 Timeout).
    pub fn is_expired(&self, interrupted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(interrupted_at);
        let timeout_td = chrono::TimeDelta::from_std(self.timeout).unwrap_or_else(|_| chrono::TimeDelta::seconds(900));
        elapsed > timeout_td
    }

    /// Run the decision table against a freshly-produced [`PlanOutput`]
    /// (spec §4.6 decision table, rows 1-5, checked in priority order).
    pub async fn check_plan(&self, plan: &PlanOutput, raw_message: &str, language: Language, routing: &[RoutingHint]) -> HitlCheck {
        if plan.missing_fields.contains(&MissingField::IntentUnclear) {
            let details = self.clarification_question(raw_message, language, routing, "the request's intent wasn't clear").await;
            return HitlCheck {
                should_interrupt: true,
                reason: Some(HitlReason::IntentUnclear),
                details,
                missing_fields: plan.missing_fields.clone(),
                disambiguation_context: None,
            };
        }

        if plan.confidence < self.confidence_threshold {
            let details = self.clarification_question(raw_message, language, routing, "confidence in the plan was too low").await;
            return HitlCheck {
                should_interrupt: true,
                reason: Some(HitlReason::Clarification),
                details,
                missing_fields: plan.missing_fields.clone(),
                disambiguation_context: None,
            };
        }

        if !plan.missing_fields.is_empty() {
            let reason_text = format!("missing: {:?}", plan.missing_fields);
            let details = self.clarification_question(raw_message, language, routing, &reason_text).await;
            return HitlCheck {
                should_interrupt: true,
                reason: Some(HitlReason::Clarification),
                details,
                missing_fields: plan.missing_fields.clone(),
                disambiguation_context: None,
            };
        }

        if plan.risk_level == RiskLevel::High {
            return HitlCheck {
                should_interrupt: true,
                reason: Some(HitlReason::Confirmation),
                details: confirmation_template(plan, language),
                missing_fields: vec![],
                disambiguation_context: None,
            };
        }

        if plan.needs_approval {
            return HitlCheck {
                should_interrupt: true,
                reason: Some(HitlReason::Approval),
                details: approval_template(language),
                missing_fields: vec![],
                disambiguation_context: None,
            };
        }

        HitlCheck::proceed()
    }

    /// Run the decision table against an [`ResolutionOutput`] (spec §4.6
    /// rows 6-7).
    pub fn check_resolution(&self, output: &ResolutionOutput, entity_type: &str, language: Language) -> HitlCheck {
        match output {
            ResolutionOutput::Disambiguation { candidates, question, allow_multiple } => {
                let details = disambiguation_question(candidates, *allow_multiple, question, language);
                HitlCheck {
                    should_interrupt: true,
                    reason: Some(HitlReason::Disambiguation),
                    details,
                    missing_fields: vec![],
                    disambiguation_context: Some(DisambiguationContext {
                        candidates: candidates.clone(),
                        entity_type: entity_type.to_string(),
                        expires_at: Utc::now() + chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::minutes(15)),
                    }),
                }
            }
            ResolutionOutput::NotFound { error, searched_for } => HitlCheck {
                should_interrupt: true,
                reason: Some(HitlReason::Clarification),
                details: not_found_template(error, searched_for, language),
                missing_fields: vec![],
                disambiguation_context: None,
            },
            ResolutionOutput::ClarifyQuery { error, suggestions, .. } => HitlCheck {
                should_interrupt: true,
                reason: Some(HitlReason::Clarification),
                details: clarify_query_template(error, suggestions, language),
                missing_fields: vec![],
                disambiguation_context: None,
            },
            ResolutionOutput::Resolved { .. } => HitlCheck::proceed(),
        }
    }

    async fn clarification_question(&self, raw_message: &str, language: Language, routing: &[RoutingHint], reason: &str) -> String {
        let top_hints: String = routing
            .iter()
            .take(3)
            .map(|h| format!("{} ({:.2})", human_label(h.capability.as_str()), h.score))
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = format!(
            "The user wrote: \"{raw_message}\" (language: {language:?}). \
             Likely intents: {top_hints}. Reason a clarification is needed: {reason}. \
             Write one short, friendly question in the user's language asking for the missing detail. \
             Do not mention internal system names."
        );

        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            model: self.model.clone(),
            temperature: 0.4,
            max_tokens: 120,
            request_id: None,
        };

        match self.gateway.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content.trim().to_string(),
            _ => {
                warn!("clarification llm call failed or was empty, using template fallback");
                clarification_fallback(language)
            }
        }
    }
}

fn human_label(capability: &str) -> &'static str {
    match capability {
        "calendar" => "scheduling",
        "taskStore" => "reminders",
        "email" => "email",
        "memory" => "remembering something",
        "meta" => "assistant settings",
        _ => "general conversation",
    }
}

fn clarification_fallback(language: Language) -> String {
    match language.effective() {
        Language::He => "לא הבנתי לגמרי — תוכל/י להסביר קצת יותר?".to_string(),
        _ => "I didn't quite catch that — could you say a bit more?".to_string(),
    }
}

fn confirmation_template(plan: &PlanOutput, language: Language) -> String {
    let is_delete = plan.plan.iter().any(|s| s.action_hint.to_lowercase().contains("delete"));
    match (language.effective(), is_delete) {
        (Language::He, true) => "זו פעולת מחיקה. לאשר שתרצה/י להמשיך?".to_string(),
        (Language::He, false) => "זו פעולה עם השפעה משמעותית. לאשר?".to_string(),
        (_, true) => "This will delete something. Are you sure you want to proceed?".to_string(),
        (_, false) => "This is a higher-risk action. Should I go ahead?".to_string(),
    }
}

fn approval_template(language: Language) -> String {
    match language.effective() {
        Language::He => "הפעולה הזו דורשת את אישורך לפני שאמשיך.".to_string(),
        _ => "This action needs your approval before I continue.".to_string(),
    }
}

fn not_found_template(error: &str, searched_for: &str, language: Language) -> String {
    if error.contains("unavailable") {
        return match language.effective() {
            Language::He => "לא הצלחתי לבדוק את זה כרגע — לנסות שוב?".to_string(),
            _ => "I couldn't check that right now — want me to try again?".to_string(),
        };
    }
    match language.effective() {
        Language::He => format!("לא מצאתי התאמה ל\"{searched_for}\". אפשר לנסח אחרת?"),
        _ => format!("I couldn't find a match for \"{searched_for}\". Could you rephrase?"),
    }
}

fn clarify_query_template(error: &str, suggestions: &[String], language: Language) -> String {
    let tips = suggestions.join(" ");
    match language.effective() {
        Language::He => format!("{error} {tips}"),
        _ => format!("{error} {tips}"),
    }
}

fn disambiguation_question(candidates: &[ResolutionCandidate], allow_multiple: bool, question: &str, language: Language) -> String {
    let mut lines = vec![question.to_string()];
    for (i, c) in candidates.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, c.display_text));
    }
    if allow_multiple {
        lines.push(match language.effective() {
            Language::He => "אפשר גם לכתוב \"הכל\" לכולם.".to_string(),
            _ => "You can also reply \"all\" for every one of them.".to_string(),
        });
    }
    lines.join("\n")
}

/// Yes/no detection in both languages (spec §4.6 resume step 2).
pub fn parse_yes_no(text: &str, language: Language) -> Option<bool> {
    let normalized = text.trim().to_lowercase();
    let _ = language;
    const YES: &[&str] = &["yes", "y", "yeah", "sure", "ok", "okay", "כן", "בטח", "אוקיי"];
    const NO: &[&str] = &["no", "n", "nope", "cancel", "לא", "ביטול"];
    if YES.iter().any(|w| normalized == *w) {
        Some(true)
    } else if NO.iter().any(|w| normalized == *w) {
        Some(false)
    } else {
        None
    }
}
