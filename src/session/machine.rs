//! I/O-free session state machine.
//!
//! [`SessionCore`] decides *what* happens in response to protocol events and
//! caller requests; the controller decides *how*: it executes the
//! [`Directive`]s the core queues up (write to the socket, signal the
//! engine, publish an event). Keeping the two apart lets the admission and
//! guard rules run without sockets or processes.

use tracing::{debug, info, warn};

use crate::protocol::{MarkerTable, ProtocolEvent};
use crate::queue::{EvaluationQueue, PendingCommand};
use crate::session::command::normalize;
use crate::session::{InterruptReason, SessionEvent, SessionState};
use crate::{AppError, Result};

/// Work the controller must carry out on the core's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Publish an event to subscribers.
    Emit(SessionEvent),
    /// Write a statement (without line terminator) to the engine.
    Send(String),
    /// Deliver an out-of-band interrupt to the engine.
    Interrupt(InterruptReason),
}

/// Session state, evaluation queue and output guard.
#[derive(Debug)]
pub struct SessionCore {
    state: SessionState,
    queue: EvaluationQueue,
    markers: MarkerTable,
    setup_commands: Vec<String>,
    first_user_sequence: u64,
    max_output_per_command: usize,
    output_count: usize,
    suppress_output: bool,
    has_evaluated: bool,
    history: Vec<String>,
    directives: Vec<Directive>,
}

impl SessionCore {
    /// Create an idle core.
    #[must_use]
    pub fn new(
        markers: MarkerTable,
        setup_commands: Vec<String>,
        max_output_per_command: usize,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            queue: EvaluationQueue::new(),
            markers,
            setup_commands,
            first_user_sequence: 0,
            max_output_per_command,
            output_count: 0,
            suppress_output: false,
            has_evaluated: false,
            history: Vec::new(),
            directives: Vec::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The evaluation queue, for inspection.
    #[must_use]
    pub fn queue(&self) -> &EvaluationQueue {
        &self.queue
    }

    /// Whether a user command was ever sent to the current engine.
    #[must_use]
    pub fn has_evaluated(&self) -> bool {
        self.has_evaluated
    }

    /// Commands submitted with `record_in_history`, in dispatch order.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Take every directive queued since the last call.
    pub fn take_directives(&mut self) -> Vec<Directive> {
        std::mem::take(&mut self.directives)
    }

    /// Move to `next`, publishing a `StateChanged` event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the lifecycle forbids it;
    /// the state is left unchanged.
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        let from = self.state;
        if from == next {
            return Ok(());
        }
        if !from.can_transition_to(next) {
            warn!(?from, ?next, "rejected session state transition");
            return Err(AppError::InvalidTransition(format!("{from:?} -> {next:?}")));
        }
        info!(?from, to = ?next, "session state changed");
        self.state = next;
        self.emit(SessionEvent::StateChanged { from, to: next });
        Ok(())
    }

    /// Enter `Starting` for a fresh engine.
    ///
    /// Stale commands from a previous engine are dropped, never replayed;
    /// setup commands are queued ahead of anything submitted afterwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless the session is `Idle` or
    /// `Terminated`.
    pub fn begin_start(&mut self) -> Result<()> {
        self.transition(SessionState::Starting)?;

        let dropped = self.queue.clear();
        if !dropped.is_empty() {
            info!(count = dropped.len(), "dropped commands queued for the previous engine");
        }
        for command in &self.setup_commands {
            self.queue.enqueue(command.clone(), false);
        }
        self.first_user_sequence = self.queue.next_sequence();
        self.has_evaluated = false;
        self.output_count = 0;
        self.suppress_output = false;
        Ok(())
    }

    /// Queue a caller command and dispatch it if the engine is idle.
    pub fn submit(&mut self, text: impl Into<String>, record_in_history: bool) -> u64 {
        let sequence = self.queue.enqueue(text, record_in_history);
        self.pump();
        sequence
    }

    /// React to one event from the demuxer.
    pub fn on_protocol_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::FirstPromptMarker { pid } => {
                info!(?pid, "engine announced first prompt");
                if self.transition(SessionState::Ready).is_ok() {
                    self.pump();
                }
            }
            ProtocolEvent::Prompt { text } => self.on_prompt(text),
            ProtocolEvent::MathResult { xml_fragment } => {
                self.on_output(SessionEvent::MathResult { xml_fragment });
            }
            ProtocolEvent::PlainText { text } => {
                self.on_output(SessionEvent::PlainText { text });
            }
            ProtocolEvent::LispError { text } => {
                self.emit(SessionEvent::LispError { text });
            }
            ProtocolEvent::SymbolTemplates { entries } => {
                self.emit(SessionEvent::SymbolTemplates { entries });
            }
            ProtocolEvent::PeerDisconnected => {
                self.begin_close(InterruptReason::PeerDisconnected);
            }
        }
    }

    /// Cancel the in-flight command on the caller's behalf.
    ///
    /// The engine is signalled out of band; the queue resumes once it
    /// prompts again. Without a command in flight there is nothing to
    /// interrupt and the request is ignored.
    pub fn interrupt(&mut self) {
        if self.state != SessionState::Busy || self.queue.in_flight().is_none() {
            debug!(state = ?self.state, "interrupt ignored: nothing is being evaluated");
            return;
        }
        self.directives.push(Directive::Interrupt(InterruptReason::User));
        self.abandon_in_flight(InterruptReason::User);
    }

    /// Reply to a question the engine asked during evaluation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` when no command is running.
    pub fn answer(&mut self, text: &str) -> Result<()> {
        if self.state != SessionState::Busy {
            return Err(AppError::InvalidTransition(format!(
                "cannot answer while {:?}",
                self.state
            )));
        }
        if let Some(statement) = normalize(text) {
            self.directives.push(Directive::Send(statement));
        }
        Ok(())
    }

    /// Enter `Closing`, abandoning the in-flight command with `reason`.
    pub fn begin_close(&mut self, reason: InterruptReason) {
        if matches!(
            self.state,
            SessionState::Closing | SessionState::Terminated | SessionState::Idle
        ) {
            return;
        }
        self.abandon_in_flight(reason);
        if let Err(err) = self.transition(SessionState::Closing) {
            warn!(%err, "could not enter closing state");
        }
    }

    /// Finish tearing down: `Closing`, `Starting` or `AwaitingConnection`
    /// become `Terminated`.
    pub fn finish_close(&mut self) {
        if let Err(err) = self.transition(SessionState::Terminated) {
            warn!(%err, "could not enter terminated state");
        }
        self.suppress_output = false;
    }

    /// Publish a failure to subscribers.
    pub fn report_error(&mut self, err: &AppError) {
        self.emit(SessionEvent::Error {
            message: err.to_string(),
        });
    }

    /// Publish an event that did not originate from the protocol.
    pub fn emit(&mut self, event: SessionEvent) {
        self.directives.push(Directive::Emit(event));
    }

    fn on_prompt(&mut self, text: String) {
        if self.state == SessionState::Busy && !self.markers.is_input_prompt(&text) {
            debug!(question = %text, "engine asked a question");
            self.emit(SessionEvent::Question { text });
            return;
        }

        self.emit(SessionEvent::Prompt { text });
        if self.state != SessionState::Busy {
            return;
        }

        if let Some(done) = self.queue.acknowledge_complete() {
            self.emit(SessionEvent::EvaluationCompleted {
                sequence: done.sequence,
            });
        }
        self.suppress_output = false;
        if self.transition(SessionState::Ready).is_ok() {
            self.pump();
        }
    }

    fn on_output(&mut self, event: SessionEvent) {
        if self.suppress_output {
            debug!("output suppressed after output ceiling was reached");
            return;
        }
        self.emit(event);

        if self.state != SessionState::Busy || self.queue.in_flight().is_none() {
            return;
        }
        self.output_count += 1;
        if self.output_count >= self.max_output_per_command {
            warn!(
                limit = self.max_output_per_command,
                "command exceeded output ceiling, interrupting"
            );
            self.suppress_output = true;
            self.directives
                .push(Directive::Interrupt(InterruptReason::OutputLimit));
            self.abandon_in_flight(InterruptReason::OutputLimit);
        }
    }

    /// Send the next queued command if the engine is ready for it.
    fn pump(&mut self) {
        while let Some(command) = self.queue.try_dispatch(self.state) {
            let Some(statement) = normalize(&command.text) else {
                debug!(sequence = command.sequence, "skipping empty command");
                self.queue.acknowledge_complete();
                continue;
            };
            self.dispatch(&command, statement);
            return;
        }
    }

    fn dispatch(&mut self, command: &PendingCommand, statement: String) {
        if let Err(err) = self.transition(SessionState::Busy) {
            warn!(%err, "dispatch without busy transition");
        }
        if command.record_in_history {
            self.history.push(command.text.clone());
        }
        if command.sequence >= self.first_user_sequence {
            self.has_evaluated = true;
        }
        self.output_count = 0;
        self.suppress_output = false;
        self.emit(SessionEvent::EvaluationStarted {
            sequence: command.sequence,
            text: statement.clone(),
        });
        self.directives.push(Directive::Send(statement));
    }

    fn abandon_in_flight(&mut self, reason: InterruptReason) {
        if let Some(command) = self.queue.abandon() {
            info!(sequence = command.sequence, ?reason, "evaluation interrupted");
            self.emit(SessionEvent::EvaluationInterrupted {
                sequence: command.sequence,
                text: command.text,
                reason,
            });
        }
    }
}
