use sloggers::{Build, Config, LoggerConfig};

/// Builds the default terminal logger used when a caller doesn't wire up its
/// own `slog::Logger`, via a `sloggers`/`serdeconv` TOML config.
pub fn root_logger() -> slog::Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("built-in logging config must parse");

    config
        .build_logger()
        .unwrap_or_else(|_| null_logger())
}

/// A logger that discards everything written to it. Used as the default for
/// components constructed without an explicit logger.
pub fn null_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
