//! Logging for the GPU core
//!
//! Every subsystem logs through the `engine_*` macros with a source tag such
//! as `"galaxy3d::vulkan"`. Entries go to one process-wide [`Logger`], the
//! colored console [`DefaultLogger`] unless replaced with [`set_logger`].
//! Entries below the threshold set by [`set_min_severity`] are dropped before
//! reaching the logger.

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use colored::Colorize;

static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();
static MIN_SEVERITY: AtomicU8 = AtomicU8::new(LogSeverity::Trace as u8);

/// Destination of log entries
///
/// ```no_run
/// use galaxy_3d_gpu::galaxy3d::log::{set_logger, LogEntry, Logger};
///
/// struct Stderr;
///
/// impl Logger for Stderr {
///     fn log(&self, entry: &LogEntry) {
///         eprintln!("{}: {}", entry.source, entry.message);
///     }
/// }
///
/// set_logger(Stderr);
/// ```
pub trait Logger: Send + Sync {
    fn log(&self, entry: &LogEntry);
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub timestamp: SystemTime,
    /// Subsystem tag, e.g. `"galaxy3d::CommandContext"`
    pub source: String,
    pub message: String,
    /// Call site, filled by `engine_error!` only
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

impl LogEntry {
    /// Call site when both file and line are known
    pub fn location(&self) -> Option<(&'static str, u32)> {
        self.file.zip(self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogSeverity {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogSeverity {
    /// Fixed-width label used by the console logger
    pub fn label(self) -> &'static str {
        match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO ",
            LogSeverity::Warn => "WARN ",
            LogSeverity::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogSeverity::Trace,
            1 => LogSeverity::Debug,
            2 => LogSeverity::Info,
            3 => LogSeverity::Warn,
            _ => LogSeverity::Error,
        }
    }
}

/// Console logger: `[time] [SEVERITY] [source] message (file:line)`
pub struct DefaultLogger;

impl DefaultLogger {
    /// The console line without colors
    pub fn format_plain(entry: &LogEntry) -> String {
        render(entry, entry.severity.label(), &entry.source)
    }
}

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        let label = entry.severity.label();
        let severity = match entry.severity {
            LogSeverity::Trace => label.bright_black(),
            LogSeverity::Debug => label.cyan(),
            LogSeverity::Info => label.green(),
            LogSeverity::Warn => label.yellow(),
            LogSeverity::Error => label.red().bold(),
        };
        println!("{}", render(entry, severity, entry.source.bright_blue()));
    }
}

fn render(entry: &LogEntry, severity: impl Display, source: impl Display) -> String {
    let time: DateTime<Local> = entry.timestamp.into();
    let mut line = format!("[{}] [{}] [{}] {}", time.format("%H:%M:%S%.3f"), severity, source, entry.message);
    if let Some((file, number)) = entry.location() {
        line.push_str(&format!(" ({}:{})", file, number));
    }
    line
}

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)))
}

pub fn set_logger<L: Logger + 'static>(logger_impl: L) {
    if let Ok(mut current) = logger().write() {
        *current = Box::new(logger_impl);
    }
}

/// Back to the console logger
pub fn reset_logger() {
    set_logger(DefaultLogger);
}

/// Drop entries less severe than `severity`
pub fn set_min_severity(severity: LogSeverity) {
    MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
}

pub fn min_severity() -> LogSeverity {
    LogSeverity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
}

#[doc(hidden)]
pub fn emit(severity: LogSeverity, source: &str, message: String, location: Option<(&'static str, u32)>) {
    if severity < min_severity() {
        return;
    }
    if let Ok(current) = logger().read() {
        current.log(&LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message,
            file: location.map(|(file, _)| file),
            line: location.map(|(_, line)| line),
        });
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __engine_log {
    ($severity:ident, $source:expr, $($arg:tt)*) => {
        $crate::log::emit($crate::log::LogSeverity::$severity, $source, format!($($arg)*), None)
    };
}

#[macro_export]
macro_rules! engine_trace {
    ($source:expr, $($arg:tt)*) => { $crate::__engine_log!(Trace, $source, $($arg)*) };
}

#[macro_export]
macro_rules! engine_debug {
    ($source:expr, $($arg:tt)*) => { $crate::__engine_log!(Debug, $source, $($arg)*) };
}

/// ```no_run
/// galaxy_3d_gpu::engine_info!("galaxy3d::Device", "Backend {} initialized", "Vulkan");
/// ```
#[macro_export]
macro_rules! engine_info {
    ($source:expr, $($arg:tt)*) => { $crate::__engine_log!(Info, $source, $($arg)*) };
}

#[macro_export]
macro_rules! engine_warn {
    ($source:expr, $($arg:tt)*) => { $crate::__engine_log!(Warn, $source, $($arg)*) };
}

/// Error entry carrying the call site
#[macro_export]
macro_rules! engine_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::emit(
            $crate::log::LogSeverity::Error,
            $source,
            format!($($arg)*),
            Some((file!(), line!())),
        )
    };
}

/// Logs an error and evaluates to `Error::BackendError` with the same text
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::galaxy3d::Error::BackendError(message)
    }};
}

/// `return Err(engine_err!(..))`
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
