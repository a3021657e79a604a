//! Unit tests for validation.rs
//!
//! The hook and counters are process-wide, so every test is serialized.

use crate::validation::*;
use serial_test::serial;
use std::sync::{Arc, Mutex};

#[test]
#[serial]
fn test_callback_receives_message() {
    let messages = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = messages.clone();
    set_validation_callback(move |msg| sink.lock().unwrap().push(msg.to_string()));

    notify_validation_error("SetVertexBuffer need buffer with Vertex usage");
    clear_validation_callback();

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Vertex usage"));
}

#[test]
#[serial]
fn test_cleared_callback_is_not_called() {
    let calls = Arc::new(Mutex::new(0u32));
    let counter = calls.clone();
    set_validation_callback(move |_| *counter.lock().unwrap() += 1);
    clear_validation_callback();

    notify_validation_error("ignored");
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
#[serial]
fn test_callback_can_replace_itself() {
    set_validation_callback(|_| clear_validation_callback());
    notify_validation_error("first");
    // Second notification must not deadlock nor call anything.
    notify_validation_error("second");
}

#[test]
#[serial]
fn test_stats_count_errors() {
    reset_validation_stats();
    notify_validation_error("one");
    notify_validation_error("two");
    record_message(MessageLevel::Warning);
    record_message(MessageLevel::Verbose);

    // Unserialized tests may notify concurrently; counters only grow.
    let stats = validation_stats();
    assert!(stats.errors >= 2);
    assert!(stats.warnings >= 1);
    assert!(stats.verbose >= 1);
    assert!(stats.total() >= 4);

    reset_validation_stats();
    assert_eq!(validation_stats().warnings, 0);
}
