//! Conversation memory — bounded, per-user message log that is the sole
//! conversational context source for every LLM call in the pipeline
//! (spec §4.1).
//!
//! Generalizes the per-principal session isolation pattern (one working
//! memory per identity, guarded so only one logical owner mutates it at a
//! time) into a message ring with token accounting, reply-id lookup, and
//! a disambiguation-context slot that expires independently of the window
//! itself.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::MemoryConfig;
use crate::types::{
    DisambiguationContext, Message, MessageMetadata, ResolutionCandidate, Role,
};

/// A bounded, ordered sequence of messages for one user.
#[derive(Debug, Clone, Default)]
struct ConversationWindow {
    messages: Vec<Message>,
}

impl ConversationWindow {
    fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|m| m.timestamp)
    }
}

/// Snapshot returned by [`ConversationMemory::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStats {
    pub user_msgs: usize,
    pub assistant_msgs: usize,
    pub system_msgs: usize,
    pub total_tokens: u32,
    pub msg_limit: usize,
    pub token_limit: u32,
}

/// Optional fields accompanying an [`ConversationMemory::append`] call.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    pub external_id: Option<String>,
    pub reply_to_external_id: Option<String>,
    pub metadata: Option<MessageMetadata>,
}

/// Per-user bounded message ring (spec §4.1).
pub struct ConversationMemory {
    windows: Mutex<HashMap<String, ConversationWindow>>,
    config: MemoryConfig,
}

/// Hard guard on the oldest-message eviction loop so a pathological
/// window can never spin forever (spec §4.1 eviction policy step 1).
const MAX_EVICTION_ITERATIONS: usize = 1000;

impl ConversationMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// `ceil(len(content) / CHARS_PER_TOKEN)` (spec §4.1 token estimation).
    pub fn estimate_tokens(&self, content: &str) -> u32 {
        let len = content.chars().count() as f64;
        let estimate = (len / self.config.chars_per_token).ceil();
        if estimate < 0.0 {
            0
        } else {
            estimate as u32
        }
    }

    /// Append a message. Idempotent by `external_id` when supplied; never
    /// fails the caller — internal errors are logged and dropped.
    pub fn append(&self, user_id: &str, role: Role, content: &str, opts: AppendOptions) {
        let mut guard = match self.windows.lock() {
            Ok(g) => g,
            Err(e) => {
                warn!(user_id, error = %e, "conversation memory lock poisoned, dropping append");
                return;
            }
        };
        let window = guard.entry(user_id.to_string()).or_default();

        if let Some(ref id) = opts.external_id {
            if window.messages.iter().any(|m| m.external_id.as_deref() == Some(id.as_str())) {
                return;
            }
        }

        let message = Message {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            external_id: opts.external_id,
            reply_to_external_id: opts.reply_to_external_id,
            estimated_tokens: self.estimate_tokens(content),
            metadata: opts.metadata,
        };

        window.messages.push(message);
        self.enforce_caps(window);
    }

    /// Enforce the three memory invariants in the spec's eviction order.
    fn enforce_caps(&self, window: &mut ConversationWindow) {
        let new_msg_tokens = window.messages.last().map(|m| m.estimated_tokens).unwrap_or(0);

        // Step 1: drop oldest non-system messages while the context-message
        // cap is exceeded.
        let mut iterations = 0;
        while count_context(&window.messages) > self.config.max_context_msgs {
            iterations += 1;
            if iterations > MAX_EVICTION_ITERATIONS {
                warn!("conversation memory eviction guard tripped");
                break;
            }
            if let Some(idx) = window
                .messages
                .iter()
                .position(|m| m.role != Role::System)
            {
                window.messages.remove(idx);
            } else {
                break;
            }
        }

        // Step 2: importance-weighted eviction until the token cap holds,
        // leaving the just-appended message untouched.
        let protected_idx = window.messages.len().saturating_sub(1);
        let budget = self.config.max_total_tokens.saturating_sub(new_msg_tokens);
        let mut iterations = 0;
        while sum_tokens(&window.messages) > budget + new_msg_tokens {
            iterations += 1;
            if iterations > MAX_EVICTION_ITERATIONS || window.messages.len() <= 1 {
                break;
            }
            let Some(victim) = lowest_importance_index(&window.messages, protected_idx) else {
                break;
            };
            window.messages.remove(victim);
        }

        // Step 3: trim oldest system messages beyond the cap.
        let mut iterations = 0;
        while count_system(&window.messages) > self.config.max_system_msgs {
            iterations += 1;
            if iterations > MAX_EVICTION_ITERATIONS {
                break;
            }
            if let Some(idx) = window.messages.iter().position(|m| m.role == Role::System) {
                window.messages.remove(idx);
            } else {
                break;
            }
        }
    }

    /// Last `n` messages, chronological order. Never mutates.
    pub fn recent(&self, user_id: &str, n: usize) -> Vec<Message> {
        let guard = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get(user_id) {
            Some(window) => {
                let len = window.messages.len();
                let start = len.saturating_sub(n);
                window.messages[start..].to_vec()
            }
            None => vec![],
        }
    }

    /// Find a stored message by external id (used for reply-threading).
    pub fn find_by_external_id(&self, user_id: &str, id: &str) -> Option<Message> {
        let guard = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .get(user_id)?
            .messages
            .iter()
            .find(|m| m.external_id.as_deref() == Some(id))
            .cloned()
    }

    /// Add a system-role marker carrying a [`DisambiguationContext`] with
    /// the configured expiry (spec §4.1, default 5 minutes).
    pub fn store_disambiguation(
        &self,
        user_id: &str,
        candidates: Vec<ResolutionCandidate>,
        entity_type: &str,
    ) {
        let expires_at =
            Utc::now() + chrono::Duration::seconds(self.config.disambiguation_ttl_secs as i64);
        let ctx = DisambiguationContext {
            candidates,
            entity_type: entity_type.to_string(),
            expires_at,
        };
        self.append(
            user_id,
            Role::System,
            "[disambiguation pending]",
            AppendOptions {
                metadata: Some(MessageMetadata::Disambiguation(ctx)),
                ..Default::default()
            },
        );
    }

    /// The most recent unexpired disambiguation context, if any.
    pub fn last_disambiguation(&self, user_id: &str) -> Option<DisambiguationContext> {
        let guard = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = guard.get(user_id)?;
        let now = Utc::now();
        window.messages.iter().rev().find_map(|m| match &m.metadata {
            Some(MessageMetadata::Disambiguation(ctx)) if !ctx.is_expired(now) => {
                Some(ctx.clone())
            }
            _ => None,
        })
    }

    /// Strip disambiguation metadata from the most recent system marker.
    pub fn clear_disambiguation(&self, user_id: &str) {
        let mut guard = match self.windows.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if let Some(window) = guard.get_mut(user_id) {
            if let Some(msg) = window.messages.iter_mut().rev().find(|m| {
                matches!(m.metadata, Some(MessageMetadata::Disambiguation(_)))
            }) {
                msg.metadata = None;
            }
        }
    }

    /// Summary counts for a user's window.
    pub fn stats(&self, user_id: &str) -> MemoryStats {
        let guard = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let messages: &[Message] = guard
            .get(user_id)
            .map(|w| w.messages.as_slice())
            .unwrap_or(&[]);
        MemoryStats {
            user_msgs: messages.iter().filter(|m| m.role == Role::User).count(),
            assistant_msgs: messages.iter().filter(|m| m.role == Role::Assistant).count(),
            system_msgs: count_system(messages),
            total_tokens: sum_tokens(messages),
            msg_limit: self.config.max_context_msgs,
            token_limit: self.config.max_total_tokens,
        }
    }

    /// Drop the entire window for a user.
    pub fn clear(&self, user_id: &str) {
        let mut guard = match self.windows.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        guard.remove(user_id);
    }

    /// Drop windows whose last message is older than the configured TTL.
    pub fn cleanup_idle(&self) -> usize {
        let mut guard = match self.windows.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.config.conversation_ttl_secs as i64);
        let stale: Vec<String> = guard
            .iter()
            .filter(|(_, w)| match w.last_activity() {
                Some(ts) => now.signed_duration_since(ts) > ttl,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();
        let count = stale.len();
        for id in stale {
            guard.remove(&id);
        }
        count
    }
}

fn count_context(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| m.role == Role::User || m.role == Role::Assistant)
        .count()
}

fn count_system(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.role == Role::System).count()
}

fn sum_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(|m| m.estimated_tokens).sum()
}

/// Recency-weighted, role-weighted, metadata-weighted importance score.
/// Higher is more important; the caller evicts the lowest score first.
fn importance(index: usize, len: usize, message: &Message) -> f64 {
    let recency_weight = if len <= 1 {
        1.0
    } else {
        (index as f64 + 1.0) / len as f64
    };
    let role_weight = match message.role {
        Role::User | Role::Assistant => 1.0,
        Role::System => 0.3,
    };
    let metadata_weight = match &message.metadata {
        Some(MessageMetadata::Disambiguation(_)) => 0.5,
        Some(MessageMetadata::RecentEntities(_)) => 0.3,
        Some(MessageMetadata::Reply(_)) => 0.1,
        None => 0.0,
    };
    recency_weight + role_weight + metadata_weight
}

fn lowest_importance_index(messages: &[Message], protected_idx: usize) -> Option<usize> {
    let len = messages.len();
    messages
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != protected_idx)
        .min_by(|(i1, m1), (i2, m2)| {
            importance(*i1, len, m1)
                .partial_cmp(&importance(*i2, len, m2))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ConversationMemory {
        ConversationMemory::new(MemoryConfig::default())
    }

    #[test]
    fn append_and_recent_roundtrip() {
        let mem = memory();
        mem.append("u1", Role::User, "hi", AppendOptions::default());
        mem.append("u1", Role::Assistant, "hello", AppendOptions::default());
        let recent = mem.recent("u1", 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "hi");
    }

    #[test]
    fn duplicate_external_id_is_noop() {
        let mem = memory();
        let opts = AppendOptions {
            external_id: Some("ext-1".to_string()),
            ..Default::default()
        };
        mem.append("u1", Role::User, "first", opts.clone());
        mem.append("u1", Role::User, "second", opts);
        let recent = mem.recent("u1", 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "first");
    }

    #[test]
    fn context_cap_is_enforced() {
        let mut cfg = MemoryConfig::default();
        cfg.max_context_msgs = 3;
        cfg.max_total_tokens = 10_000;
        let mem = ConversationMemory::new(cfg);
        for i in 0..10 {
            mem.append("u1", Role::User, &format!("msg {i}"), AppendOptions::default());
        }
        let stats = mem.stats("u1");
        assert!(stats.user_msgs <= 3);
    }

    #[test]
    fn token_cap_is_enforced() {
        let mut cfg = MemoryConfig::default();
        cfg.max_context_msgs = 100;
        cfg.max_total_tokens = 20;
        cfg.chars_per_token = 1.0;
        let mem = ConversationMemory::new(cfg);
        for i in 0..10 {
            mem.append(
                "u1",
                Role::User,
                &format!("message number {i} with some length"),
                AppendOptions::default(),
            );
        }
        let stats = mem.stats("u1");
        assert!(stats.total_tokens <= 20, "total_tokens={}", stats.total_tokens);
    }

    #[test]
    fn system_cap_is_enforced() {
        let mut cfg = MemoryConfig::default();
        cfg.max_system_msgs = 2;
        cfg.max_context_msgs = 1000;
        cfg.max_total_tokens = 100_000;
        let mem = ConversationMemory::new(cfg);
        for i in 0..5 {
            mem.append("u1", Role::System, &format!("sys {i}"), AppendOptions::default());
        }
        let stats = mem.stats("u1");
        assert!(stats.system_msgs <= 2);
    }

    #[test]
    fn disambiguation_roundtrip() {
        let mem = memory();
        let candidates = vec![ResolutionCandidate {
            id: "1".to_string(),
            display_text: "Meeting with Dan".to_string(),
            entity: serde_json::json!({}),
            score: 0.9,
            metadata: crate::types::CandidateMetadata::Simple { start: None, end: None },
        }];
        mem.store_disambiguation("u1", candidates, "calendar_event");
        let ctx = mem.last_disambiguation("u1");
        assert!(ctx.is_some());
        assert_eq!(ctx.unwrap().candidates.len(), 1);

        mem.clear_disambiguation("u1");
        assert!(mem.last_disambiguation("u1").is_none());
    }

    #[test]
    fn expired_disambiguation_is_not_returned() {
        let mut cfg = MemoryConfig::default();
        cfg.disambiguation_ttl_secs = 0;
        let mem = ConversationMemory::new(cfg);
        mem.store_disambiguation("u1", vec![], "calendar_event");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(mem.last_disambiguation("u1").is_none());
    }

    #[test]
    fn clear_drops_window() {
        let mem = memory();
        mem.append("u1", Role::User, "hi", AppendOptions::default());
        mem.clear("u1");
        assert_eq!(mem.recent("u1", 10).len(), 0);
    }

    #[test]
    fn cleanup_idle_drops_stale_windows() {
        let mut cfg = MemoryConfig::default();
        cfg.conversation_ttl_secs = 0;
        let mem = ConversationMemory::new(cfg);
        mem.append("u1", Role::User, "hi", AppendOptions::default());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let removed = mem.cleanup_idle();
        assert_eq!(removed, 1);
        assert_eq!(mem.recent("u1", 10).len(), 0);
    }

    #[test]
    fn find_by_external_id_works() {
        let mem = memory();
        mem.append(
            "u1",
            Role::User,
            "hi",
            AppendOptions {
                external_id: Some("ext-7".to_string()),
                ..Default::default()
            },
        );
        let found = mem.find_by_external_id("u1", "ext-7");
        assert!(found.is_some());
        assert!(mem.find_by_external_id("u1", "missing").is_none());
    }
}
