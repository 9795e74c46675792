//! Session lifecycle states.

use serde::Serialize;

/// Lifecycle state of a session.
///
/// ```text
/// Idle → Starting → AwaitingConnection → AwaitingFirstPrompt → Ready ⇄ Busy
///                          │                                      │
///                          └──────────────→ Terminated ← Closing ←┘ (from any state)
/// ```
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, nothing launched yet.
    Idle,
    /// Binding the listener and launching the engine.
    Starting,
    /// Engine launched, waiting for it to connect back.
    AwaitingConnection,
    /// Connected, waiting for the startup banner.
    AwaitingFirstPrompt,
    /// Engine idle; the next queued command may be sent.
    Ready,
    /// A command is being evaluated.
    Busy,
    /// Tearing down the engine.
    Closing,
    /// Engine gone. A new start is possible.
    Terminated,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Terminated, Self::Starting)
                | (Self::Starting, Self::AwaitingConnection)
                | (Self::AwaitingConnection, Self::AwaitingFirstPrompt)
                | (Self::AwaitingFirstPrompt | Self::Busy, Self::Ready)
                | (Self::Ready, Self::Busy)
                | (Self::Starting | Self::AwaitingConnection | Self::Closing, Self::Terminated)
                | (
                    Self::Starting
                        | Self::AwaitingConnection
                        | Self::AwaitingFirstPrompt
                        | Self::Ready
                        | Self::Busy,
                    Self::Closing
                )
        )
    }

    /// Whether an engine process may be alive in this state.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Idle | Self::Terminated)
    }
}
