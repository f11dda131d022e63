//! Session state machine
//!
//! ```text
//! Init → Analysed → MemorySearched → [Researched] → Proposed → GateProposal
//! GateProposal → { Proposed (edit) | Planning (approve) | Aborted }
//! Planning → Executing → Verifying → Generating → GateCheckpoint
//! GateCheckpoint → { Done (approve) | Planning (revise, i+1) | Aborted }
//! ```
//!
//! `Researched` is skipped when memory coverage clears the threshold.
//! `Planning → Verifying` and `Verifying → GateCheckpoint` are the
//! fatal-failure short-circuits: the user always reaches a checkpoint
//! carrying a synthesised failure report instead of a silent crash. Any
//! non-terminal state may abort (user decision, timeout, cancellation, cap).

use serde::{Deserialize, Serialize};

/// States of a session, in machine order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Analysed,
    MemorySearched,
    Researched,
    Proposed,
    GateProposal,
    Planning,
    Executing,
    Verifying,
    Generating,
    GateCheckpoint,
    Done,
    Aborted,
}

impl SessionState {
    /// Stable lowercase name used in the execution log
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Analysed => "analysed",
            SessionState::MemorySearched => "memory_searched",
            SessionState::Researched => "researched",
            SessionState::Proposed => "proposed",
            SessionState::GateProposal => "gate_proposal",
            SessionState::Planning => "planning",
            SessionState::Executing => "executing",
            SessionState::Verifying => "verifying",
            SessionState::Generating => "generating",
            SessionState::GateCheckpoint => "gate_checkpoint",
            SessionState::Done => "done",
            SessionState::Aborted => "aborted",
        }
    }

    /// True for the two terminal states
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Aborted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended in `Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The user chose abort at a gate
    UserAbort,
    /// A gate timed out awaiting a decision
    TimedOut,
    /// The iteration cap was exceeded
    IterationCap,
    /// The session's cancellation flag was set
    Cancelled,
    /// Unrecoverable internal failure
    Internal,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::UserAbort => "user_abort",
            AbortReason::TimedOut => "timed_out",
            AbortReason::IterationCap => "iteration_cap",
            AbortReason::Cancelled => "cancelled",
            AbortReason::Internal => "internal",
        }
    }
}

/// Whether `from → to` is a legal transition
pub fn can_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    // Any live state may abort
    if to == Aborted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, Analysed)
            | (Analysed, MemorySearched)
            | (MemorySearched, Researched)
            | (MemorySearched, Proposed)
            | (Researched, Proposed)
            | (Proposed, GateProposal)
            | (GateProposal, Proposed)
            | (GateProposal, Planning)
            | (Planning, Executing)
            | (Planning, Verifying)
            | (Executing, Verifying)
            | (Verifying, Generating)
            | (Verifying, GateCheckpoint)
            | (Generating, GateCheckpoint)
            | (GateCheckpoint, Done)
            | (GateCheckpoint, Planning)
    )
}
