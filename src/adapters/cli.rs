//! CLI adapter — stdin/stdout demo transport (spec §6.9-equivalent demo
//! surface; local development and manual walkthroughs of the scenarios in
//! spec §8).
//!
//! A single local user drives the whole session; each line of stdin
//! becomes one [`InboundMessage`], threaded through the orchestrator, and
//! the resulting [`TurnOutcome`] is rendered back to stdout.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::orchestrator::PipelineOrchestrator;
use crate::types::{InboundMessage, TurnOutcome};

/// Wrap one line of CLI input as an [`InboundMessage`]. Each line gets a
/// fresh external id, so re-running the same text twice is never treated
/// as a duplicate delivery.
pub fn inbound_from_line(user_id: &str, user_phone: &str, text: &str) -> InboundMessage {
    InboundMessage {
        user_id: user_id.to_string(),
        user_phone: user_phone.to_string(),
        message_external_id: Uuid::new_v4().to_string(),
        reply_to_external_id: None,
        text: text.to_string(),
        timestamp: Utc::now(),
        media_ref: None,
    }
}

/// Render a [`TurnOutcome`] the way a terminal session would display it.
pub fn render_outcome(outcome: &TurnOutcome) -> String {
    match outcome {
        TurnOutcome::Reply(reply) => reply.text.clone(),
        TurnOutcome::Interrupt(interrupt) => {
            let mut out = interrupt.question.clone();
            if let Some(options) = &interrupt.options {
                if !options.is_empty() && interrupt.metadata.candidates.is_none() {
                    out.push_str("\nOptions: ");
                    out.push_str(&options.join(", "));
                }
            }
            out
        }
    }
}

/// Read lines from stdin until EOF, feeding each through the
/// orchestrator and printing the result. The demo CLI always runs as a
/// single fixed local user.
pub async fn run(orchestrator: Arc<PipelineOrchestrator>) -> std::io::Result<()> {
    const DEMO_USER_ID: &str = "cli-user";
    const DEMO_USER_PHONE: &str = "+10000000000";

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    println!("Type a message and press enter. Ctrl-D to quit.");
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let inbound = inbound_from_line(DEMO_USER_ID, DEMO_USER_PHONE, trimmed);
        let outcome = orchestrator.handle_message(inbound).await;
        println!("{}", render_outcome(&outcome));
    }
    Ok(())
}
