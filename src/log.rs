//! Logging setup, grounded on the way the `medea` root crate wires its
//! `slog` stack (`slog` + `slog-async` + `slog-envlogger` + `slog-json`).
//!
//! [`CoreClient`](crate::client::CoreClient) owns the root [`slog::Logger`]
//! built here and hands child loggers (keyed by room, by peer name) down to
//! [`PeerSession`](crate::session::PeerSession) and
//! [`MediaSubSession`](crate::media::MediaSubSession).

use slog::Drain;

/// Builds the root logger: JSON records on stdout, async-dispatched, with
/// level filtering driven by the `RUST_LOG` environment variable.
///
/// Also installs the `slog-stdlog`/`slog-scope` bridge so dependencies that
/// log through the `log` facade (rather than `slog` directly) are captured
/// by the same drain.
#[must_use]
pub fn build_root_logger() -> slog::Logger {
    let json_drain = slog_json::Json::new(std::io::stdout())
        .add_default_keys()
        .build()
        .fuse();
    let filtered = slog_envlogger::new(json_drain);
    let async_drain = slog_async::Async::new(filtered).build().fuse();
    let logger = slog::Logger::root(async_drain, slog::o!("crate" => "meshline"));

    let _guard = slog_scope::set_global_logger(logger.clone());
    // Leak the guard: the root logger is expected to live for the process,
    // and `GlobalLoggerGuard` resets the global logger to a no-op drain on
    // drop, which we never want mid-process.
    std::mem::forget(_guard);
    let _ = slog_stdlog::init();

    logger
}

/// A logger that discards every record; used by tests and by embedders that
/// opt out of the ambient `slog` stack entirely.
#[must_use]
pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
