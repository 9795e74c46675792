//! Unit tests for `AppError` display format and conversions.

use maxima_bridge::AppError;

#[test]
fn display_prefixes_the_error_kind() {
    let cases = [
        (AppError::Spawn("no such file".into()), "spawn: no such file"),
        (
            AppError::StartupFailure("timed out".into()),
            "startup failure: timed out",
        ),
        (
            AppError::PeerDisconnected("stream closed".into()),
            "peer disconnected: stream closed",
        ),
        (
            AppError::MalformedStream("Math region still open".into()),
            "malformed stream: Math region still open",
        ),
        (AppError::Closed("controller stopped".into()), "closed: controller stopped"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_message_no_trailing_period() {
    let err = AppError::Interrupt("failed to signal pid 12".into());
    let s = err.to_string();
    assert!(
        !s.ends_with('.'),
        "error message must not end with a period: {s}"
    );
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err = AppError::from(io);
    assert_eq!(err, AppError::Io("pipe closed".into()));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse = toml::from_str::<toml::Value>("= broken").expect_err("invalid toml");
    let err = AppError::from(parse);
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("invalid config")));
}

#[test]
fn implements_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&AppError::Io("x".into()));
}
