//! Session controller: the event loop around [`SessionCore`].
//!
//! The controller owns every resource of a session: the listener, the
//! engine process, the write half of the socket and the receiving ends of
//! the reader and diagnostic tasks. A single `tokio::select!` loop drains
//! all of them, so state transitions are serialized without locks:
//!
//! | Source                  | Handling                                        |
//! |-------------------------|-------------------------------------------------|
//! | socket chunks           | demuxed into protocol events for the core       |
//! | socket closed           | `MalformedStream` check, then teardown          |
//! | caller requests         | submit / interrupt / answer / restart / shutdown |
//! | engine stdout/stderr    | forwarded as `Diagnostic` events                |
//! | extra connect attempts  | accepted and dropped                            |
//! | exit poll tick          | teardown once the engine has exited             |

use std::future::pending;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::{
    spawn_drains, BackendCommand, BackendHandle, BackendProcess, DiagnosticLine,
};
use crate::config::BridgeConfig;
use crate::connection::{run_reader, AcceptOutcome, ChunkWriter, Inbound, Listener};
use crate::protocol::{MarkerTable, ProtocolEvent, StreamDemuxer};
use crate::session::{
    Directive, InterruptReason, Request, SessionCore, SessionEvent, SessionHandle, SessionState,
};
use crate::{AppError, Result};

/// Capacity of the reader and diagnostic channels.
const CHANNEL_CAPACITY: usize = 64;

/// How the wait for the engine's connect-back ended.
enum Startup {
    Accepted(Result<AcceptOutcome>),
    Exited(String),
    ShutdownRequested,
}

/// Result of a launch that did not fail.
enum Launch {
    Connected,
    ShutdownRequested,
}

/// Owner and event loop of one bridge session.
#[derive(Debug)]
pub struct SessionController {
    config: BridgeConfig,
    core: SessionCore,
    demux: StreamDemuxer,
    backend: Option<BackendProcess>,
    listener: Option<Listener>,
    writer: Option<ChunkWriter>,
    inbound_rx: Option<mpsc::Receiver<Inbound>>,
    diagnostic_rx: Option<mpsc::Receiver<DiagnosticLine>>,
    request_tx: mpsc::UnboundedSender<Request>,
    request_rx: mpsc::UnboundedReceiver<Request>,
    sinks: Vec<mpsc::UnboundedSender<SessionEvent>>,
    io_cancel: CancellationToken,
    generation: u32,
}

impl SessionController {
    /// Create an idle session for `config`.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        let markers = MarkerTable::from_config(&config.markers);
        let core = SessionCore::new(
            markers.clone(),
            config.engine.setup_commands.clone(),
            config.session.max_output_per_command,
        );
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        Self {
            config,
            core,
            demux: StreamDemuxer::new(markers),
            backend: None,
            listener: None,
            writer: None,
            inbound_rx: None,
            diagnostic_rx: None,
            request_tx,
            request_rx,
            sinks: Vec::new(),
            io_cancel: CancellationToken::new(),
            generation: 0,
        }
    }

    /// A handle for submitting work from any thread.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.request_tx.clone())
    }

    /// Receive every event published from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.sinks.push(event_tx);
        event_rx
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Commands recorded in history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[String] {
        self.core.history()
    }

    /// Identity of the running engine.
    #[must_use]
    pub fn backend_handle(&self) -> Option<BackendHandle> {
        self.backend.as_ref().map(BackendProcess::handle)
    }

    /// Port the engine was told to connect to.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.listener.as_ref().map(Listener::port)
    }

    /// Launch the engine and wait for it to connect back.
    ///
    /// On success the session is `AwaitingFirstPrompt`; the banner is
    /// processed by [`run`](Self::run). Requests keep being served while
    /// the engine connects; a shutdown received meanwhile closes the session
    /// and leaves it `Terminated` without an error.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidTransition` unless the session is `Idle` or
    ///   `Terminated`.
    /// - `AppError::Spawn` if the engine cannot be launched.
    /// - `AppError::StartupFailure` if it does not connect in time or exits
    ///   first. The session is `Terminated` afterwards and may be started
    ///   again.
    pub async fn start(&mut self) -> Result<()> {
        self.core.begin_start()?;
        self.demux.reset();
        self.io_cancel = CancellationToken::new();

        let span = info_span!("session_start", generation = self.generation);
        match self.launch().instrument(span).await {
            Ok(Launch::Connected) => {
                self.flush().await;
                Ok(())
            }
            Ok(Launch::ShutdownRequested) => {
                self.shutdown().await;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "engine startup failed");
                self.core.report_error(&err);
                self.release_engine().await;
                self.core.finish_close();
                self.flush().await;
                Err(err)
            }
        }
    }

    /// Drive the session until it terminates.
    ///
    /// Starts the engine first when the session is still `Idle`.
    ///
    /// # Errors
    ///
    /// Returns the startup error when the initial start fails. Failures
    /// after that are published as [`SessionEvent::Error`] and end the loop.
    pub async fn run(&mut self) -> Result<()> {
        if self.state() == SessionState::Idle {
            self.start().await?;
        }

        let mut tick = tokio::time::interval(self.config.session.exit_poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state().is_live() {
            tokio::select! {
                inbound = recv_or_pending(&mut self.inbound_rx) => {
                    self.on_inbound(inbound).await;
                }
                line = recv_or_pending(&mut self.diagnostic_rx) => {
                    self.on_diagnostic(line);
                }
                request = self.request_rx.recv() => {
                    if let Some(request) = request {
                        self.on_request(request).await;
                    }
                }
                rejected = reject_or_pending(self.listener.as_ref()) => {
                    if let Err(err) = rejected {
                        debug!(%err, "listener failed, no longer accepting extra peers");
                        self.listener = None;
                    }
                }
                _ = tick.tick() => {
                    self.check_exit().await;
                }
            }
            self.flush().await;
        }

        info!("session loop finished");
        Ok(())
    }

    /// Tear down the session and the engine.
    pub async fn shutdown(&mut self) {
        info!("session shutdown requested");
        self.core.begin_close(InterruptReason::Shutdown);
        self.flush().await;
        self.release_engine().await;
        self.core.finish_close();
        self.flush().await;
    }

    /// Replace the engine.
    ///
    /// An engine that never evaluated a user command is kept unless `force`
    /// is set; restarting it would change nothing.
    pub async fn restart(&mut self, force: bool) {
        if !force && !self.core.has_evaluated() {
            info!("restart skipped: engine has not evaluated anything");
            return;
        }
        info!(force, "restarting engine");
        self.core.begin_close(InterruptReason::Restart);
        self.flush().await;
        self.release_engine().await;
        self.core.finish_close();
        if let Err(err) = self.start().await {
            warn!(%err, "restart failed");
        }
    }

    async fn launch(&mut self) -> Result<Launch> {
        let conn_config = &self.config.connection;
        let listener = Listener::bind(conn_config.port_hint, conn_config.bind_attempts).await?;
        let port = listener.port();
        self.core.emit(SessionEvent::Listening { port });

        let command = BackendCommand::from_config(&self.config.engine, port);
        let mut backend = BackendProcess::start(&command, self.generation)?;
        self.generation += 1;

        if let Some(pipes) = backend.take_diagnostics() {
            let (line_tx, line_rx) = mpsc::channel(CHANNEL_CAPACITY);
            // Drains stop on EOF or cancellation; no join needed.
            drop(spawn_drains(pipes, line_tx, self.io_cancel.clone()));
            self.diagnostic_rx = Some(line_rx);
        }

        self.core.transition(SessionState::AwaitingConnection)?;
        self.flush().await;

        let timeout = self.config.connection.accept_timeout();
        let deadline = Instant::now() + timeout;
        let poll = self.config.session.exit_poll_interval();
        let startup = loop {
            tokio::select! {
                outcome = listener.accept_once(deadline.saturating_duration_since(Instant::now())) => {
                    break Startup::Accepted(outcome);
                }
                status = wait_for_exit(&mut backend, poll) => break Startup::Exited(status),
                request = self.request_rx.recv() => match request {
                    Some(Request::Shutdown) => break Startup::ShutdownRequested,
                    Some(Request::Restart { force }) => {
                        debug!(force, "restart ignored while the engine is starting");
                    }
                    Some(request) => self.on_plain_request(request),
                    None => {}
                },
                line = recv_or_pending(&mut self.diagnostic_rx) => self.on_diagnostic(line),
            }
            self.flush().await;
        };
        self.backend = Some(backend);
        self.listener = Some(listener);

        let connection = match startup {
            Startup::ShutdownRequested => {
                info!("shutdown requested while waiting for the engine to connect");
                return Ok(Launch::ShutdownRequested);
            }
            Startup::Accepted(Ok(AcceptOutcome::Connected(connection))) => connection,
            Startup::Accepted(Ok(AcceptOutcome::TimedOut)) => {
                return Err(AppError::StartupFailure(format!(
                    "engine did not connect within {timeout:?}"
                )));
            }
            Startup::Accepted(Err(err)) => {
                return Err(AppError::StartupFailure(err.to_string()));
            }
            Startup::Exited(status) => {
                return Err(AppError::StartupFailure(format!(
                    "engine exited before connecting: {status}"
                )));
            }
        };

        let (reader, writer) = connection.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run_reader(reader, inbound_tx, self.io_cancel.clone()));
        self.inbound_rx = Some(inbound_rx);
        self.writer = Some(writer);

        self.core.transition(SessionState::AwaitingFirstPrompt)?;
        Ok(Launch::Connected)
    }

    async fn on_inbound(&mut self, inbound: Option<Inbound>) {
        match inbound {
            Some(Inbound::Chunk(bytes)) => {
                for event in self.demux.feed(&bytes) {
                    self.on_protocol_event(event);
                }
            }
            Some(Inbound::Closed { reason }) => self.on_peer_closed(reason).await,
            None => self.on_peer_closed("reader task stopped".into()).await,
        }
    }

    fn on_protocol_event(&mut self, event: ProtocolEvent) {
        if let ProtocolEvent::FirstPromptMarker { pid } = event {
            if let Some(backend) = self.backend.as_mut() {
                backend.set_engine_pid(pid);
            }
        }
        self.core.on_protocol_event(event);
    }

    async fn on_peer_closed(&mut self, reason: String) {
        self.inbound_rx = None;
        info!(reason = %reason, "engine connection closed");

        if let Some(kind) = self.demux.unterminated_region() {
            let err = AppError::MalformedStream(format!(
                "{kind:?} region still open when the stream ended; partial content discarded"
            ));
            warn!(%err, "truncated engine output");
            self.core.report_error(&err);
        }
        let disconnected = self.demux.finish();
        self.core.report_error(&AppError::PeerDisconnected(reason));
        self.core.on_protocol_event(disconnected);

        self.flush().await;
        self.release_engine().await;
        self.core.finish_close();
    }

    fn on_diagnostic(&mut self, line: Option<DiagnosticLine>) {
        match line {
            Some(DiagnosticLine { stream, line }) => {
                self.core.emit(SessionEvent::Diagnostic { stream, line });
            }
            None => {
                debug!("diagnostic streams closed");
                self.diagnostic_rx = None;
            }
        }
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::Restart { force } => self.restart(force).await,
            Request::Shutdown => self.shutdown().await,
            request => self.on_plain_request(request),
        }
    }

    /// Requests that never block on the engine's lifecycle.
    fn on_plain_request(&mut self, request: Request) {
        match request {
            Request::Submit {
                text,
                record_in_history,
            } => {
                let sequence = self.core.submit(text, record_in_history);
                debug!(sequence, "command submitted");
            }
            Request::Interrupt => self.core.interrupt(),
            Request::Answer(text) => {
                if let Err(err) = self.core.answer(&text) {
                    self.core.report_error(&err);
                }
            }
            Request::Subscribe(event_tx) => self.sinks.push(event_tx),
            Request::Restart { .. } | Request::Shutdown => {
                debug!("lifecycle request routed to the plain handler, ignored");
            }
        }
    }

    async fn check_exit(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match backend.poll_exit() {
            Ok(Some(status)) => {
                info!(%status, "engine process exited");
                if !status.success() {
                    self.core.report_error(&AppError::PeerDisconnected(format!(
                        "engine exited: {status}"
                    )));
                }
                self.core.begin_close(InterruptReason::BackendExited);
                self.flush().await;
                self.release_engine().await;
                self.core.finish_close();
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "could not poll engine status"),
        }
    }

    /// Stop helper tasks, terminate the engine and drop the connection.
    async fn release_engine(&mut self) {
        self.io_cancel.cancel();

        if let Some(backend) = self.backend.as_mut() {
            backend
                .terminate(self.writer.as_mut(), self.config.engine.terminate_grace())
                .await;
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.shutdown().await;
        }

        self.backend = None;
        self.writer = None;
        self.listener = None;
        self.inbound_rx = None;
        self.diagnostic_rx = None;
    }

    /// Execute every directive the core has queued.
    async fn flush(&mut self) {
        loop {
            let directives = self.core.take_directives();
            if directives.is_empty() {
                break;
            }
            for directive in directives {
                match directive {
                    Directive::Emit(event) => self.publish(&event),
                    Directive::Send(statement) => self.send_statement(&statement).await,
                    Directive::Interrupt(reason) => self.signal_interrupt(reason),
                }
            }
        }
    }

    fn publish(&mut self, event: &SessionEvent) {
        self.sinks.retain(|sink| sink.send(event.clone()).is_ok());
    }

    async fn send_statement(&mut self, statement: &str) {
        let Some(writer) = self.writer.as_mut() else {
            self.core
                .report_error(&AppError::Closed("no engine connection to write to".into()));
            return;
        };

        debug!(statement, "sending statement");
        let mut line = String::with_capacity(statement.len() + 1);
        line.push_str(statement);
        line.push('\n');
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            warn!(%err, "failed to send statement");
            self.core.report_error(&err);
        }
    }

    fn signal_interrupt(&mut self, reason: InterruptReason) {
        let Some(backend) = self.backend.as_ref() else {
            debug!(?reason, "no engine to interrupt");
            return;
        };
        if let Err(err) = backend.interrupt() {
            warn!(%err, ?reason, "failed to interrupt engine");
            self.core.report_error(&err);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.io_cancel.cancel();
    }
}

/// Receive from an optional channel; pends forever when there is none.
async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

/// Turn away the next connection attempt; pends forever without a listener.
async fn reject_or_pending(listener: Option<&Listener>) -> Result<SocketAddr> {
    match listener {
        Some(listener) => listener.reject_next().await,
        None => pending().await,
    }
}

/// Resolve once the engine has exited, polling every `interval`.
async fn wait_for_exit(backend: &mut BackendProcess, interval: Duration) -> String {
    loop {
        match backend.poll_exit() {
            Ok(Some(status)) => return status.to_string(),
            Ok(None) => {}
            Err(err) => return err.to_string(),
        }
        tokio::time::sleep(interval).await;
    }
}
