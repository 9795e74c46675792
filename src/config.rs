//! Bridge configuration parsing and validation.
//!
//! Every field has a default so an empty `config.toml` yields a working
//! setup for a `maxima` binary found on `PATH`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How the engine process is launched and shut down.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct EngineConfig {
    /// Engine executable (looked up on `PATH` when not absolute).
    pub program: String,
    /// Arguments passed to the engine; `{port}` is replaced with the
    /// listening port the engine must connect back to.
    pub args: Vec<String>,
    /// Commands evaluated once the first prompt arrives, before any user
    /// command. They are never recorded in history.
    pub setup_commands: Vec<String>,
    /// Time the engine gets to honour the quit sequence before it is killed.
    pub terminate_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "maxima".into(),
            args: vec!["-s".into(), "{port}".into()],
            setup_commands: Vec::new(),
            terminate_grace_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Grace period granted on terminate.
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Listening socket settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ConnectionConfig {
    /// First port tried on `127.0.0.1`; `0` asks the OS directly.
    pub port_hint: u16,
    /// Number of consecutive ports tried before falling back to an
    /// OS-assigned one.
    pub bind_attempts: u16,
    /// How long to wait for the engine to connect back.
    pub accept_timeout_seconds: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_hint: 4010,
            bind_attempts: 50,
            accept_timeout_seconds: 30,
        }
    }
}

impl ConnectionConfig {
    /// Accept timeout as a [`Duration`].
    #[must_use]
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_seconds)
    }
}

/// Session-wide policies.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SessionConfig {
    /// Output events (math results and plain text) a single command may
    /// produce before it is interrupted.
    pub max_output_per_command: usize,
    /// Interval between non-blocking checks for engine exit.
    pub exit_poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_output_per_command: 800,
            exit_poll_interval_ms: 250,
        }
    }
}

impl SessionConfig {
    /// Exit poll interval as a [`Duration`].
    #[must_use]
    pub fn exit_poll_interval(&self) -> Duration {
        Duration::from_millis(self.exit_poll_interval_ms)
    }
}

/// Stream markers emitted by the engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct MarkerConfig {
    /// Start of an input prompt region.
    pub prompt_start: String,
    /// End of an input prompt region.
    pub prompt_end: String,
    /// Start of a math result region.
    pub math_start: String,
    /// End of a math result region.
    pub math_end: String,
    /// Start of an autocompletion template list.
    pub symbols_start: String,
    /// End of an autocompletion template list.
    pub symbols_end: String,
    /// Separator between templates inside the list.
    pub symbols_separator: String,
    /// Text that ends the startup banner (the first input prompt).
    pub banner_end: String,
    /// Start-of-line signatures of untagged lisp runtime errors.
    pub lisp_error_signatures: Vec<String>,
    /// Prefix distinguishing input prompts from questions asked by the engine.
    pub input_prompt_prefix: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            prompt_start: "<PROMPT-P/>".into(),
            prompt_end: "<PROMPT-S/>".into(),
            math_start: "<mth>".into(),
            math_end: "</mth>".into(),
            symbols_start: "<wxxml-symbols>".into(),
            symbols_end: "</wxxml-symbols>".into(),
            symbols_separator: "$".into(),
            banner_end: "(%i1) ".into(),
            lisp_error_signatures: vec!["MAXIMA>".into(), "(dbm:".into()],
            input_prompt_prefix: "(%i".into(),
        }
    }
}

/// Top-level configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct BridgeConfig {
    /// Engine launch settings.
    pub engine: EngineConfig,
    /// Listening socket settings.
    pub connection: ConnectionConfig,
    /// Session policies.
    pub session: SessionConfig,
    /// Stream markers.
    pub markers: MarkerConfig,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.engine.program.trim().is_empty() {
            return Err(AppError::Config("engine.program must not be empty".into()));
        }

        if self.connection.accept_timeout_seconds == 0 {
            return Err(AppError::Config(
                "connection.accept_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.session.max_output_per_command == 0 {
            return Err(AppError::Config(
                "session.max_output_per_command must be greater than zero".into(),
            ));
        }

        if self.session.exit_poll_interval_ms == 0 {
            return Err(AppError::Config(
                "session.exit_poll_interval_ms must be greater than zero".into(),
            ));
        }

        let m = &self.markers;
        let required = [
            ("prompt_start", &m.prompt_start),
            ("prompt_end", &m.prompt_end),
            ("math_start", &m.math_start),
            ("math_end", &m.math_end),
            ("symbols_start", &m.symbols_start),
            ("symbols_end", &m.symbols_end),
            ("symbols_separator", &m.symbols_separator),
            ("banner_end", &m.banner_end),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(AppError::Config(format!("markers.{name} must not be empty")));
            }
        }
        if m.lisp_error_signatures.iter().any(String::is_empty) {
            return Err(AppError::Config(
                "markers.lisp_error_signatures must not contain empty entries".into(),
            ));
        }

        Ok(())
    }
}
