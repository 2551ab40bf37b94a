//! Per-table progress lines on stderr.

use sqlite_pg_port::ProgressSink;
use std::collections::HashMap;
use std::sync::Mutex;

struct TableState {
    total: i64,
}

/// Prints one line per phase change and per committed batch. Copy tasks for
/// different tables report concurrently, so state lives behind a mutex.
pub struct TerminalProgress {
    tables: Mutex<HashMap<String, TableState>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn set_state(&self, state: &str) {
        eprintln!("{}...", state);
    }

    fn add_table(&self, table: &str, already_ported: i64, total: i64) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(table.to_string(), TableState { total });
        }
        eprintln!(
            "{}: starting at {}/{} rows",
            table, already_ported, total
        );
    }

    fn update(&self, table: &str, ported: i64) {
        let total = match self.tables.lock() {
            Ok(tables) => tables.get(table).map(|t| t.total).unwrap_or(0),
            Err(_) => 0,
        };
        if total > 0 {
            let percent = ported * 100 / total;
            eprintln!("{}: {}% ({}/{})", table, percent, ported, total);
        } else {
            eprintln!("{}: {} rows", table, ported);
        }
    }

    fn done(&self) {
        eprintln!("Done.");
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}
