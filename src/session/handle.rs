//! Thread-safe submission point into a running session.
//!
//! UI code typically lives on another thread than the session's event loop.
//! A [`SessionHandle`] is cheap to clone and `Send + Sync`; every call is a
//! message into the controller's request channel, so the queue and the
//! state machine are only ever touched by the controller itself.

use tokio::sync::mpsc;

use crate::session::SessionEvent;
use crate::{AppError, Result};

/// Requests accepted by the controller loop.
#[derive(Debug)]
pub enum Request {
    /// Queue a command for evaluation.
    Submit {
        /// Command text.
        text: String,
        /// Whether to record it in history once dispatched.
        record_in_history: bool,
    },
    /// Cancel the in-flight command.
    Interrupt,
    /// Reply to a question from the engine.
    Answer(String),
    /// Replace the engine; skipped when it never evaluated anything unless
    /// `force` is set.
    Restart {
        /// Restart even an unused engine.
        force: bool,
    },
    /// Tear the session down.
    Shutdown,
    /// Register an additional event sink.
    Subscribe(mpsc::UnboundedSender<SessionEvent>),
}

/// Cloneable handle for submitting work to a [`SessionController`].
///
/// [`SessionController`]: crate::session::SessionController
#[derive(Debug, Clone)]
pub struct SessionHandle {
    request_tx: mpsc::UnboundedSender<Request>,
}

impl SessionHandle {
    pub(crate) fn new(request_tx: mpsc::UnboundedSender<Request>) -> Self {
        Self { request_tx }
    }

    /// Queue `text` for evaluation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the controller no longer exists.
    pub fn submit(&self, text: impl Into<String>, record_in_history: bool) -> Result<()> {
        self.send(Request::Submit {
            text: text.into(),
            record_in_history,
        })
    }

    /// Ask the controller to interrupt the running command.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the controller no longer exists.
    pub fn interrupt(&self) -> Result<()> {
        self.send(Request::Interrupt)
    }

    /// Answer a question the engine asked.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the controller no longer exists.
    pub fn answer(&self, text: impl Into<String>) -> Result<()> {
        self.send(Request::Answer(text.into()))
    }

    /// Restart the engine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the controller no longer exists.
    pub fn restart(&self, force: bool) -> Result<()> {
        self.send(Request::Restart { force })
    }

    /// Shut the session down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the controller no longer exists.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Request::Shutdown)
    }

    /// Receive every event published from now on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Closed` if the controller no longer exists.
    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.send(Request::Subscribe(event_tx))?;
        Ok(event_rx)
    }

    fn send(&self, request: Request) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| AppError::Closed("session controller has stopped".into()))
    }
}
