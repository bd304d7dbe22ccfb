//! Logger construction.  Everything in objstream logs through an explicitly-passed
//! [`slog::Logger`]; these helpers build the common ones.
use slog::{o, Drain, Logger};

/// A logger that writes to the terminal through an async drain.
pub fn term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// A logger that discards everything.  This is the default for downloaders and uploaders that
/// were not given one.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Create a Logger for use in tests; output is captured by the test harness.
pub fn test_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!())
}
