//! Unit tests for the single-flight evaluation queue.

use maxima_bridge::queue::EvaluationQueue;
use maxima_bridge::session::SessionState;

// ── Admission ───────────────────────────────────────────────────────────────

/// With A, B and C queued, only A is handed out until it is acknowledged.
#[test]
fn only_front_command_is_dispatched_until_acknowledged() {
    let mut queue = EvaluationQueue::new();
    queue.enqueue("A", true);
    queue.enqueue("B", true);
    queue.enqueue("C", true);

    let first = queue
        .try_dispatch(SessionState::Ready)
        .expect("A must be dispatchable");
    assert_eq!(first.text, "A");

    for _ in 0..3 {
        assert!(
            queue.try_dispatch(SessionState::Ready).is_none(),
            "nothing else may be dispatched while A is in flight"
        );
    }
    assert_eq!(queue.in_flight().map(|c| c.text.as_str()), Some("A"));

    let done = queue.acknowledge_complete().expect("A must be in flight");
    assert_eq!(done.text, "A");

    let second = queue
        .try_dispatch(SessionState::Ready)
        .expect("B must follow A");
    assert_eq!(second.text, "B");
}

/// Nothing is dispatched unless the session is ready.
#[test]
fn dispatch_requires_ready_state() {
    let mut queue = EvaluationQueue::new();
    queue.enqueue("x", false);

    for state in [
        SessionState::Idle,
        SessionState::Starting,
        SessionState::AwaitingConnection,
        SessionState::AwaitingFirstPrompt,
        SessionState::Busy,
        SessionState::Closing,
        SessionState::Terminated,
    ] {
        assert!(queue.try_dispatch(state).is_none(), "dispatched in {state:?}");
    }
    assert!(queue.try_dispatch(SessionState::Ready).is_some());
}

/// An empty queue has nothing to hand out.
#[test]
fn empty_queue_dispatches_nothing() {
    let mut queue = EvaluationQueue::new();
    assert!(queue.try_dispatch(SessionState::Ready).is_none());
    assert!(queue.acknowledge_complete().is_none());
}

// ── Retirement ──────────────────────────────────────────────────────────────

/// Abandoning frees the slot for the next command.
#[test]
fn abandon_frees_the_in_flight_slot() {
    let mut queue = EvaluationQueue::new();
    queue.enqueue("slow()", true);
    queue.enqueue("fast()", true);
    queue.try_dispatch(SessionState::Ready);

    let abandoned = queue.abandon().expect("slow() must be in flight");
    assert_eq!(abandoned.text, "slow()");
    assert_eq!(queue.in_flight_count(), 0);
    assert!(queue.abandon().is_none(), "a second abandon has nothing to drop");

    let next = queue.try_dispatch(SessionState::Ready).expect("fast() next");
    assert_eq!(next.text, "fast()");
}

/// Clearing drops everything, in flight or not.
#[test]
fn clear_drops_all_entries() {
    let mut queue = EvaluationQueue::new();
    queue.enqueue("a", true);
    queue.enqueue("b", true);
    queue.try_dispatch(SessionState::Ready);

    let dropped = queue.clear();

    assert_eq!(dropped.len(), 2);
    assert!(queue.is_empty());
    assert_eq!(queue.in_flight_count(), 0);
    assert!(queue.in_flight().is_none());
}

// ── Ordering ────────────────────────────────────────────────────────────────

/// Sequence numbers follow submission order and survive a clear.
#[test]
fn sequences_are_strictly_increasing() {
    let mut queue = EvaluationQueue::new();
    let a = queue.enqueue("a", true);
    let b = queue.enqueue("b", true);
    queue.clear();
    let c = queue.enqueue("c", true);

    assert!(a < b && b < c);
    assert_eq!(queue.next_sequence(), c + 1);
}

/// Draining the queue visits commands in FIFO order with one in flight.
#[test]
fn commands_complete_in_submission_order() {
    let mut queue = EvaluationQueue::new();
    for text in ["1", "2", "3", "4"] {
        queue.enqueue(text, true);
    }

    let mut order = Vec::new();
    while let Some(command) = queue.try_dispatch(SessionState::Ready) {
        assert_eq!(queue.in_flight_count(), 1);
        order.push(command.text);
        queue.acknowledge_complete();
    }

    assert_eq!(order, ["1", "2", "3", "4"]);
    assert!(queue.is_empty());
}
