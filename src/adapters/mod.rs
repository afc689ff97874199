//! Adapters — transport-facing front ends that turn raw input into
//! [`crate::types::InboundMessage`]s and render [`crate::types::TurnOutcome`]s
//! back out (spec §6).
//!
//! Only a CLI demo transport ships with this crate; a real deployment
//! would add one module per platform here, each doing nothing more than
//! this mapping — the orchestrator itself is transport-agnostic.

pub mod cli;
