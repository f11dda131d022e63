//! Loom Engine Library
//!
//! Core of the Loom planning assistant: the learning orchestrator loop and
//! its tool-call dispatch. Used by the `loom` binary and integration tests.

/// Configuration management module
pub mod config;

/// Memory store and searcher
pub mod memory;

/// Web research
pub mod research;

/// LM transport seam
pub mod llm;

/// Agent roster (proposer, planner, executor, verifier, generator, checkpoint)
pub mod agents;

/// Tool-call dispatch and constraint enforcement
pub mod dispatch;

/// Approval gates
pub mod gates;

/// Learning tracker and append-only logs
pub mod learning;

/// Orchestrator state machine and iteration loop
pub mod orchestrator;

/// Session control surface (start / poll / respond / cancel)
pub mod session;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
