//! Per-table migration planning.
//!
//! Planning decides, for each table, where the copy starts and how much work
//! remains: resuming append-only tables from their stored cursor, purging and
//! restarting mutable tables, and applying the time-window seeding policy for
//! `sent_transactions`.

use crate::error::{PortError, Result};
use crate::source::{SourcePage, SqliteStore};
use crate::target::{insert_many_txn, PgStore};
use crate::transform;
use crate::value::SqlValue;
use chrono::Utc;
use tracing::{debug, info};

/// Tables whose rows are never mutated at the source after creation. Safe to
/// resume purely by cursor position. Anything else is recopied from scratch.
pub const APPEND_ONLY_TABLES: &[&str] = &[
    "event_content_hashes",
    "event_reference_hashes",
    "event_signatures",
    "event_edge_hashes",
    "events",
    "event_json",
    "state_events",
    "room_memberships",
    "feedback",
    "topics",
    "room_names",
    "rooms",
    "local_media_repository",
    "local_media_repository_thumbnails",
    "remote_media_cache",
    "remote_media_cache_thumbnails",
    "redactions",
    "event_edges",
    "event_auth",
    "received_transactions",
    "sent_transactions",
    "transaction_id_to_pdu",
    "users",
    "state_groups",
    "state_groups_state",
    "event_to_state_groups",
    "rejections",
];

/// The one table with time-windowed first-run seeding.
pub const SENT_TRANSACTIONS: &str = "sent_transactions";

const SENT_TXN_PARTITION_COL: &str = "destination";
const SENT_TXN_TS_COL: &str = "ts";

/// How far back the seeding window reaches, in milliseconds.
const RECENT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// The outcome of planning one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub table: String,
    /// Smallest source rowid the copy loop starts from.
    pub start_cursor: i64,
    /// Rows already present at the destination.
    pub already_ported: i64,
    /// Rows the finished table will hold, including `already_ported`.
    pub total: i64,
}

pub fn is_append_only(table: &str) -> bool {
    APPEND_ONLY_TABLES.contains(&table)
}

/// Decide the starting cursor and counts for `table`, initializing or
/// consulting its bookkeeping row.
pub async fn plan_table(
    source: &SqliteStore,
    target: &PgStore,
    table: &str,
) -> Result<TablePlan> {
    if is_append_only(table) {
        if let Some(cursor) = target.port_cursor(table).await? {
            debug!("{}: resuming from rowid {}", table, cursor);
            return recount(source, target, table, cursor).await;
        }
        if table == SENT_TRANSACTIONS {
            return setup_sent_transactions(source, target, Utc::now().timestamp_millis())
                .await;
        }
        target.insert_port_cursor(table, 1).await?;
        recount(source, target, table, 1).await
    } else {
        // Mutable tables cannot be trusted across runs. Purge and restart.
        info!("{}: mutable table, clearing destination copy", table);
        target.reset_table(table).await?;
        target.insert_port_cursor(table, 1).await?;
        recount(source, target, table, 1).await
    }
}

/// Re-derive counts from both stores. Counts are never cached across runs,
/// so progress after an interruption reflects what actually landed.
async fn recount(
    source: &SqliteStore,
    target: &PgStore,
    table: &str,
    cursor: i64,
) -> Result<TablePlan> {
    let (already, remaining) =
        tokio::join!(target.count_rows(table), source.count_from(table, cursor));
    let already = already?;
    let remaining = remaining?;
    Ok(TablePlan {
        table: table.to_string(),
        start_cursor: cursor,
        already_ported: already,
        total: already + remaining,
    })
}

/// First-run seeding for `sent_transactions`.
///
/// The table accumulates low-value historical churn, so only the last known
/// row per destination from the recent window is carried over. The seed set
/// is the max-rowid row per destination whose timestamp falls within the
/// window; everything from the resumption cursor onward is then copied by
/// the ordinary chunked loop.
async fn setup_sent_transactions(
    source: &SqliteStore,
    target: &PgStore,
    now_ms: i64,
) -> Result<TablePlan> {
    let cutoff = now_ms - RECENT_WINDOW_MS;

    let snapshot = source
        .latest_per_partition(SENT_TRANSACTIONS, SENT_TXN_PARTITION_COL)
        .await?;
    let (seed, max_seeded_rowid) = recent_snapshot(&snapshot, cutoff)?;

    let seeded = seed.rows.len() as i64;
    if !seed.is_empty() {
        let (columns, rows) = transform::convert_page(SENT_TRANSACTIONS, &seed);
        target
            .run_in_transaction("seed sent_transactions", move |txn| {
                let columns = columns.clone();
                let rows = rows.clone();
                Box::pin(async move {
                    insert_many_txn(txn, SENT_TRANSACTIONS, &columns, &rows).await
                })
            })
            .await?;
    }

    let window_start = source
        .first_rowid_in_window(SENT_TRANSACTIONS, SENT_TXN_TS_COL, cutoff)
        .await?
        .unwrap_or(1);
    let cursor = resume_cursor(max_seeded_rowid, window_start);

    target.insert_port_cursor(SENT_TRANSACTIONS, cursor).await?;

    let remaining = source.count_from(SENT_TRANSACTIONS, cursor).await?;

    info!(
        "{}: seeded {} recent rows, resuming copy at rowid {}",
        SENT_TRANSACTIONS, seeded, cursor
    );

    Ok(TablePlan {
        table: SENT_TRANSACTIONS.to_string(),
        start_cursor: cursor,
        already_ported: seeded,
        total: seeded + remaining,
    })
}

/// Filter a latest-per-partition snapshot down to rows whose timestamp is
/// within the window, returning the filtered page and the largest seeded
/// rowid (0 when nothing qualifies).
fn recent_snapshot(snapshot: &SourcePage, cutoff: i64) -> Result<(SourcePage, i64)> {
    let ts_idx = snapshot
        .headers
        .iter()
        .position(|name| name == SENT_TXN_TS_COL)
        .ok_or_else(|| {
            PortError::setup(SENT_TRANSACTIONS, format!("missing {} column", SENT_TXN_TS_COL))
        })?;

    let rows: Vec<Vec<SqlValue>> = snapshot
        .rows
        .iter()
        .filter(|row| matches!(row[ts_idx].as_integer(), Some(ts) if ts >= cutoff))
        .cloned()
        .collect();

    let max_rowid = rows
        .iter()
        .filter_map(|row| row[0].as_integer())
        .max()
        .unwrap_or(0);

    let last_rowid = if max_rowid > 0 { Some(max_rowid) } else { None };
    Ok((
        SourcePage {
            headers: snapshot.headers.clone(),
            rows,
            last_rowid,
        },
        max_rowid,
    ))
}

/// Where ordinary copying resumes after seeding: past every seeded row, but
/// never before the first row inside the window.
fn resume_cursor(max_seeded_rowid: i64, window_start: i64) -> i64 {
    (max_seeded_rowid + 1).max(window_start)
}
