//! Unit tests for log.rs
//!
//! Tests LogSeverity, LogEntry and the DefaultLogger formatting.

use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
use std::time::SystemTime;

fn entry(severity: LogSeverity, file: Option<&'static str>, line: Option<u32>) -> LogEntry {
    LogEntry {
        severity,
        timestamp: SystemTime::now(),
        source: "galaxy3d::Device".to_string(),
        message: "backend ready".to_string(),
        file,
        line,
    }
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_labels_are_fixed_width() {
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        assert_eq!(severity.label().len(), 5);
    }
    assert_eq!(LogSeverity::Error.label(), "ERROR");
}

// ============================================================================
// DEFAULT LOGGER TESTS
// ============================================================================

#[test]
fn test_format_plain_without_location() {
    let line = DefaultLogger::format_plain(&entry(LogSeverity::Info, None, None));
    assert!(line.contains("[INFO ]"));
    assert!(line.contains("[galaxy3d::Device]"));
    assert!(line.ends_with("backend ready"));
}

#[test]
fn test_format_plain_with_location() {
    let line = DefaultLogger::format_plain(&entry(LogSeverity::Error, Some("device.rs"), Some(42)));
    assert!(line.contains("[ERROR]"));
    assert!(line.ends_with("(device.rs:42)"));
}

#[test]
fn test_format_plain_needs_both_file_and_line() {
    let line = DefaultLogger::format_plain(&entry(LogSeverity::Warn, Some("device.rs"), None));
    assert!(!line.contains("device.rs"));
}

#[test]
fn test_location_requires_file_and_line() {
    assert_eq!(entry(LogSeverity::Error, Some("device.rs"), Some(7)).location(), Some(("device.rs", 7)));
    assert_eq!(entry(LogSeverity::Error, Some("device.rs"), None).location(), None);
    assert_eq!(entry(LogSeverity::Error, None, Some(7)).location(), None);
}

#[test]
fn test_default_logger_does_not_panic() {
    let logger = DefaultLogger;
    logger.log(&entry(LogSeverity::Trace, None, None));
    logger.log(&entry(LogSeverity::Error, Some("file.rs"), Some(1)));
}
