//! Logging interface for the xenomai-rs nucleus.
//!
//! Provides [`kprint!`]/[`kprintln!`] for raw output and [`klog!`] plus the
//! per-level convenience macros (`kinfo!`, `kwarn!`, ...) for leveled,
//! timestamped logging, fanned out to every registered [`LogSink`]. There is
//! no external `log`/`tracing` dependency: a global function pointer plus a
//! sink list behind a [`SpinLock`](crate::sync::SpinLock). A kernel logger
//! typically needs a two-phase pre-heap/post-heap split for an early
//! serial console; this workspace has a heap (and a stack) from process
//! start, so there is no early phase to model.

use core::fmt;

use crate::sync::SpinLock;

/// Log severity level. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Unrecoverable error; the process will abort shortly after logging this.
    Fatal = 0,
    /// Something failed but the nucleus may continue.
    Error = 1,
    /// Unexpected condition, not necessarily an error.
    Warn = 2,
    /// High-level progress messages (mode switches, binds, teardown).
    Info = 3,
    /// Detailed diagnostic information.
    Debug = 4,
    /// Very verbose, per-syscall tracing.
    Trace = 5,
}

impl LogLevel {
    /// Fixed-width human-readable name for aligned output.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

/// An output sink for the nucleus logger.
pub trait LogSink: Send + Sync {
    /// Writes a string fragment to this sink.
    fn write_str(&self, s: &str);
    /// Maximum level accepted; messages with `level <= max_level` are written.
    fn max_level(&self) -> LogLevel;
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;
}

/// A [`LogSink`] that writes to standard error.
pub struct StderrSink {
    max_level: LogLevel,
}

impl StderrSink {
    /// Creates a new stderr sink accepting up to `max_level`.
    pub fn new(max_level: LogLevel) -> Self {
        Self { max_level }
    }
}

impl LogSink for StderrSink {
    fn write_str(&self, s: &str) {
        use std::io::Write as _;
        let _ = std::io::stderr().write_all(s.as_bytes());
    }

    fn max_level(&self) -> LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "stderr"
    }
}

struct LoggerInner {
    sinks: Vec<Box<dyn LogSink>>,
}

/// The nucleus-wide logger. Holds a `Vec<Box<dyn LogSink>>` behind a
/// [`SpinLock`]; output fans out to every registered sink.
pub struct Logger {
    inner: SpinLock<LoggerInner>,
}

impl Logger {
    /// Creates a logger with a single [`StderrSink`] at [`LogLevel::Info`].
    fn new() -> Self {
        Self {
            inner: SpinLock::new(LoggerInner {
                sinks: vec![Box::new(StderrSink::new(LogLevel::Info))],
            }),
        }
    }

    /// Registers an additional output sink.
    pub fn add_sink(&self, sink: Box<dyn LogSink>) {
        self.inner.lock().sinks.push(sink);
    }

    /// Raw write, fanned out to all sinks with no level filtering.
    fn write_fmt(&self, args: fmt::Arguments<'_>) {
        let guard = self.inner.lock();
        for sink in &guard.sinks {
            let mut w = SinkWriter(sink.as_ref());
            let _ = fmt::Write::write_fmt(&mut w, args);
        }
    }

    /// Leveled write: formats a level-tagged message, writes it only to
    /// sinks whose `max_level` accepts `level`.
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let guard = self.inner.lock();
        for sink in &guard.sinks {
            if level <= sink.max_level() {
                let mut w = SinkWriter(sink.as_ref());
                let _ = write!(w, "{} {}\n", level.name(), args);
            }
        }
    }
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

use std::sync::OnceLock;

static LOGGER: OnceLock<Logger> = OnceLock::new();

fn logger() -> &'static Logger {
    LOGGER.get_or_init(Logger::new)
}

/// Registers an additional output sink with the global logger.
pub fn add_sink(sink: Box<dyn LogSink>) {
    logger().add_sink(sink);
}

/// Implementation detail for [`kprint!`]/[`kprintln!`]. Not public API.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    logger().write_fmt(args);
}

/// Implementation detail for [`klog!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: LogLevel, args: fmt::Arguments<'_>) {
    logger().log(level, args);
}

/// Prints to the nucleus log sinks (raw, no level).
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => { $crate::log::_print(format_args!($($arg)*)) };
}

/// Prints to the nucleus log sinks with a trailing newline.
#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => { $crate::kprint!("{}\n", format_args!($($arg)*)) };
}

/// Logs a message at the given level.
#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::_log($level, format_args!($($arg)*))
    };
}

/// Logs a fatal-level message.
#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Fatal, $($arg)*) };
}

/// Logs an error-level message.
#[macro_export]
macro_rules! kerr {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Error, $($arg)*) };
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Warn, $($arg)*) };
}

/// Logs an info-level message.
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Info, $($arg)*) };
}

/// Logs a debug-level message.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Debug, $($arg)*) };
}

/// Logs a trace-level message.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        count: Arc<AtomicUsize>,
        max_level: LogLevel,
    }

    impl LogSink for CountingSink {
        fn write_str(&self, _s: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }

        fn max_level(&self) -> LogLevel {
            self.max_level
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn level_filtering_skips_sinks_below_threshold() {
        let logger = Logger::new();
        logger.inner.lock().sinks.clear();
        let count = Arc::new(AtomicUsize::new(0));
        logger.add_sink(Box::new(CountingSink {
            count: count.clone(),
            max_level: LogLevel::Warn,
        }));

        logger.log(LogLevel::Trace, format_args!("too verbose"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        logger.log(LogLevel::Error, format_args!("accepted"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn raw_write_bypasses_level_filter() {
        let logger = Logger::new();
        logger.inner.lock().sinks.clear();
        let count = Arc::new(AtomicUsize::new(0));
        logger.add_sink(Box::new(CountingSink {
            count: count.clone(),
            max_level: LogLevel::Fatal,
        }));

        logger.write_fmt(format_args!("raw"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
