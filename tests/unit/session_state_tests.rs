//! Unit tests for session lifecycle transitions.

use maxima_bridge::session::SessionState;

const ALL: [SessionState; 8] = [
    SessionState::Idle,
    SessionState::Starting,
    SessionState::AwaitingConnection,
    SessionState::AwaitingFirstPrompt,
    SessionState::Ready,
    SessionState::Busy,
    SessionState::Closing,
    SessionState::Terminated,
];

fn sources_of(target: SessionState) -> Vec<SessionState> {
    ALL.into_iter()
        .filter(|from| from.can_transition_to(target))
        .collect()
}

// ── Reachability ────────────────────────────────────────────────────────────

#[test]
fn busy_is_reachable_only_from_ready() {
    assert_eq!(sources_of(SessionState::Busy), vec![SessionState::Ready]);
}

#[test]
fn ready_is_reachable_from_first_prompt_or_busy() {
    assert_eq!(
        sources_of(SessionState::Ready),
        vec![SessionState::AwaitingFirstPrompt, SessionState::Busy]
    );
}

#[test]
fn starting_is_reachable_from_idle_or_terminated() {
    assert_eq!(
        sources_of(SessionState::Starting),
        vec![SessionState::Idle, SessionState::Terminated]
    );
}

#[test]
fn terminated_follows_closing_or_failed_startup() {
    assert_eq!(
        sources_of(SessionState::Terminated),
        vec![
            SessionState::Starting,
            SessionState::AwaitingConnection,
            SessionState::Closing,
        ]
    );
}

#[test]
fn every_live_state_can_close() {
    for state in ALL {
        let can_close = state.can_transition_to(SessionState::Closing);
        let expected = !matches!(
            state,
            SessionState::Idle | SessionState::Closing | SessionState::Terminated
        );
        assert_eq!(can_close, expected, "{state:?} -> Closing");
    }
}

// ── Forbidden moves ─────────────────────────────────────────────────────────

#[test]
fn no_state_transitions_to_itself_or_back_to_idle() {
    for state in ALL {
        assert!(!state.can_transition_to(state), "{state:?} -> itself");
        assert!(!state.can_transition_to(SessionState::Idle), "{state:?} -> Idle");
    }
}

#[test]
fn only_idle_and_terminated_are_not_live() {
    let dead: Vec<_> = ALL.into_iter().filter(|s| !s.is_live()).collect();
    assert_eq!(dead, vec![SessionState::Idle, SessionState::Terminated]);
}
