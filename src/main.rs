#![forbid(unsafe_code)]

//! `maxima-bridge`: drive a Maxima engine from the terminal.
//!
//! Reads one command per line from stdin and prints every session event as
//! a JSON line on stdout. Logs go to stderr.
//!
//! Control words: `:interrupt`, `:restart`, `:restart!` (force),
//! `:answer <text>` and `:quit`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use maxima_bridge::session::{SessionController, SessionEvent, SessionHandle};
use maxima_bridge::{AppError, BridgeConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "maxima-bridge", about = "Interactive Maxima session bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the engine executable.
    #[arg(long)]
    maxima: Option<String>,

    /// Override the first port tried for the engine's connect-back.
    #[arg(long)]
    port: Option<u16>,
}

/// One parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum InputLine {
    Command(String),
    Interrupt,
    Restart { force: bool },
    Answer(String),
    Quit,
}

impl InputLine {
    fn parse(line: &str) -> Self {
        match line.trim() {
            ":interrupt" => Self::Interrupt,
            ":restart" => Self::Restart { force: false },
            ":restart!" => Self::Restart { force: true },
            ":quit" => Self::Quit,
            other => match other.strip_prefix(":answer ") {
                Some(answer) => Self::Answer(answer.to_owned()),
                None => Self::Command(line.to_owned()),
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("maxima-bridge bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // The stdin reader sits on a blocking thread that never returns on its own.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(program) = args.maxima {
        config.engine.program = program;
    }
    if let Some(port) = args.port {
        config.connection.port_hint = port;
    }
    config.validate()?;
    info!(program = %config.engine.program, "configuration loaded");

    // ── Start session ───────────────────────────────────
    let mut controller = SessionController::new(config);
    let handle = controller.handle();
    let events = controller.subscribe();
    let printer = tokio::spawn(print_events(events));

    let mut session = tokio::spawn(async move { controller.run().await });
    tokio::spawn(read_commands(handle.clone()));

    // ── Wait for the session or a signal ────────────────
    let joined = tokio::select! {
        joined = &mut session => joined,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            if let Err(err) = handle.shutdown() {
                debug!(%err, "session already stopped");
            }
            session.await
        }
    };

    let outcome = joined.map_err(|err| AppError::Io(format!("session task failed: {err}")))?;
    if let Err(err) = printer.await {
        warn!(%err, "event printer failed");
    }
    info!("maxima-bridge shut down");
    outcome
}

/// Forward stdin lines to the session until EOF or `:quit`.
async fn read_commands(handle: SessionHandle) {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                error!(%err, "failed to read stdin");
                break;
            }
        };

        let sent = match InputLine::parse(&line) {
            InputLine::Command(text) => handle.submit(text, true),
            InputLine::Interrupt => handle.interrupt(),
            InputLine::Restart { force } => handle.restart(force),
            InputLine::Answer(text) => handle.answer(text),
            InputLine::Quit => {
                if let Err(err) = handle.shutdown() {
                    debug!(%err, "session already stopped");
                }
                return;
            }
        };
        if let Err(err) = sent {
            debug!(%err, "session no longer accepts input");
            return;
        }
    }
    debug!("stdin closed");
}

/// Print each event as one JSON line on stdout.
async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => println!("{json}"),
            Err(err) => warn!(%err, "failed to serialize event"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
