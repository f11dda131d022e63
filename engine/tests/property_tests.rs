//! Property-based tests for the core invariants

use loom_engine::learning::KeyGen;
use loom_engine::orchestrator::{can_transition, ContextBundle, SessionState};
use proptest::prelude::*;

const ALL_STATES: [SessionState; 13] = [
    SessionState::Init,
    SessionState::Analysed,
    SessionState::MemorySearched,
    SessionState::Researched,
    SessionState::Proposed,
    SessionState::GateProposal,
    SessionState::Planning,
    SessionState::Executing,
    SessionState::Verifying,
    SessionState::Generating,
    SessionState::GateCheckpoint,
    SessionState::Done,
    SessionState::Aborted,
];

fn arb_state() -> impl Strategy<Value = SessionState> {
    (0..ALL_STATES.len()).prop_map(|i| ALL_STATES[i])
}

proptest! {
    /// Terminal states never transition anywhere; Init is never re-entered
    #[test]
    fn prop_terminal_states_are_sinks(from in arb_state(), to in arb_state()) {
        if from.is_terminal() {
            prop_assert!(!can_transition(from, to));
        }
        prop_assert!(!can_transition(from, SessionState::Init));
    }

    /// Every live state can abort; abort is the only universal edge
    #[test]
    fn prop_abort_always_reachable(from in arb_state()) {
        if !from.is_terminal() {
            prop_assert!(can_transition(from, SessionState::Aborted));
        }
    }

    /// A random walk through legal edges starting at Init either makes
    /// progress or terminates; it can never leave a terminal state
    #[test]
    fn prop_walks_stay_on_legal_edges(choices in proptest::collection::vec(0..ALL_STATES.len(), 1..40)) {
        let mut state = SessionState::Init;
        for choice in choices {
            let next = ALL_STATES[choice];
            if can_transition(state, next) {
                prop_assert!(!state.is_terminal());
                state = next;
            }
        }
    }

    /// Keys issued by one generator sort in issue order, whatever the burst
    #[test]
    fn prop_keys_sort_in_issue_order(count in 1usize..200) {
        let keys = KeyGen::new();
        let issued: Vec<String> = (0..count).map(|_| keys.next_key()).collect();
        let mut sorted = issued.clone();
        sorted.sort();
        prop_assert_eq!(issued, sorted);
    }

    /// The rendered context bundle never exceeds its ceiling, and the
    /// truncation flag is set exactly when content was lost
    #[test]
    fn prop_bundle_respects_ceiling(
        goal in ".{0,300}",
        notes in proptest::collection::vec(".{0,120}", 0..10),
        ceiling in 64usize..4096,
    ) {
        let mut bundle = ContextBundle::new(goal, ceiling);
        for note in notes {
            bundle.push_note(note);
        }
        let rendered = bundle.render();
        prop_assert!(rendered.text.len() <= ceiling);
        if !rendered.truncated {
            // untruncated renders are byte-identical on repeat
            prop_assert_eq!(rendered.text, bundle.render().text);
        }
    }

}
