//! Process-wide validation hook
//!
//! Usage-contract violations (wrong buffer usage bound to a slot, invalid
//! attachment combination, state-machine misuse) are reported here. The hook
//! is advisory: it never unwinds on its own.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

type ValidationCallback = Arc<dyn Fn(&str) + Send + Sync>;

static CALLBACK: RwLock<Option<ValidationCallback>> = RwLock::new(None);

static VALIDATION_STATS: ValidationStatsTracker = ValidationStatsTracker::new();

/// Counters of validation messages, grouped by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

impl ValidationStats {
    pub fn total(&self) -> u32 {
        self.errors + self.warnings + self.info + self.verbose
    }
}

struct ValidationStatsTracker {
    errors: AtomicU32,
    warnings: AtomicU32,
    info: AtomicU32,
    verbose: AtomicU32,
}

impl ValidationStatsTracker {
    const fn new() -> Self {
        Self {
            errors: AtomicU32::new(0),
            warnings: AtomicU32::new(0),
            info: AtomicU32::new(0),
            verbose: AtomicU32::new(0),
        }
    }
}

/// Message severity reported by a native validation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageLevel {
    Error,
    Warning,
    Info,
    Verbose,
}

/// Install the hook, replacing any previous one
///
/// # Example
///
/// ```no_run
/// galaxy_3d_gpu::galaxy3d::set_validation_callback(|message| {
///     eprintln!("GPU validation: {}", message);
/// });
/// ```
pub fn set_validation_callback<F>(callback: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    if let Ok(mut lock) = CALLBACK.write() {
        *lock = Some(Arc::new(callback));
    }
}

/// Remove the hook
pub fn clear_validation_callback() {
    if let Ok(mut lock) = CALLBACK.write() {
        *lock = None;
    }
}

/// Report a usage-contract violation
///
/// Logs the message and forwards it to the installed hook.
pub fn notify_validation_error(message: &str) {
    VALIDATION_STATS.errors.fetch_add(1, Ordering::Relaxed);
    crate::engine_error!("galaxy3d::validation", "{}", message);

    // Clone out of the lock so the hook may replace itself.
    let callback = CALLBACK.read().ok().and_then(|lock| lock.clone());
    if let Some(callback) = callback {
        callback(message);
    }
}

/// Count a message coming from a native validation layer
pub(crate) fn record_message(level: MessageLevel) {
    let counter = match level {
        MessageLevel::Error => &VALIDATION_STATS.errors,
        MessageLevel::Warning => &VALIDATION_STATS.warnings,
        MessageLevel::Info => &VALIDATION_STATS.info,
        MessageLevel::Verbose => &VALIDATION_STATS.verbose,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of the message counters
pub fn validation_stats() -> ValidationStats {
    ValidationStats {
        errors: VALIDATION_STATS.errors.load(Ordering::Relaxed),
        warnings: VALIDATION_STATS.warnings.load(Ordering::Relaxed),
        info: VALIDATION_STATS.info.load(Ordering::Relaxed),
        verbose: VALIDATION_STATS.verbose.load(Ordering::Relaxed),
    }
}

/// Reset the message counters
pub fn reset_validation_stats() {
    VALIDATION_STATS.errors.store(0, Ordering::Relaxed);
    VALIDATION_STATS.warnings.store(0, Ordering::Relaxed);
    VALIDATION_STATS.info.store(0, Ordering::Relaxed);
    VALIDATION_STATS.verbose.store(0, Ordering::Relaxed);
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;
