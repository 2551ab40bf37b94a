//! Progress reporting interface.
//!
//! The core never renders anything itself; it calls a [`ProgressSink`] at
//! phase transitions and after each committed batch and moves on.

use tracing::info;

/// Receives state and per-table progress notifications.
///
/// Calls are synchronous and may come from several copy tasks, so
/// implementations must be `Send + Sync` and cheap.
pub trait ProgressSink: Send + Sync {
    /// A run-level phase transition ("Fetching tables", "Copying", ...).
    fn set_state(&self, state: &str);

    /// A table has been planned and is about to be copied.
    fn add_table(&self, table: &str, already_ported: i64, total: i64);

    /// Cumulative destination row count for a table after a committed batch.
    fn update(&self, table: &str, ported: i64);

    /// The whole run finished successfully.
    fn done(&self);
}

/// Discards all notifications.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_state(&self, _state: &str) {}
    fn add_table(&self, _table: &str, _already_ported: i64, _total: i64) {}
    fn update(&self, _table: &str, _ported: i64) {}
    fn done(&self) {}
}

/// Reports progress through the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn set_state(&self, state: &str) {
        info!("{}", state);
    }

    fn add_table(&self, table: &str, already_ported: i64, total: i64) {
        info!("{}: {}/{} rows already ported", table, already_ported, total);
    }

    fn update(&self, table: &str, ported: i64) {
        info!("{}: {} rows ported", table, ported);
    }

    fn done(&self) {
        info!("Port complete");
    }
}
