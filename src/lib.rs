//! turnkeeper — a conversational request-processing pipeline.
//!
//! Turns a raw inbound chat message into a resolved, executed plan:
//! [`planner`] decomposes intent into capability steps, [`resolvers`]
//! translate each step into a typed domain operation, [`entities`]
//! matches natural-language references against live backend entities,
//! [`hitl`] decides when to pause for the user, and [`orchestrator`]
//! drives the whole turn with checkpointed interrupt/resume semantics.

pub mod checkpoint;
pub mod config;
pub mod entities;
pub mod executors;
pub mod fuzzy;
pub mod hitl;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod resolvers;
pub mod routing;
pub mod time;
pub mod types;

pub mod adapters;
