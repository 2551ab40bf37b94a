//! The chunked copy loop for one table.

use crate::config::PortConfig;
use crate::error::Result;
use crate::plan::TablePlan;
use crate::progress::ProgressSink;
use crate::source::SqliteStore;
use crate::target::{insert_many_txn, update_port_cursor_txn, PgStore};
use crate::transform;
use tracing::{debug, info};

/// What one table's copy accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub table: String,
    /// Rows written by this run, excluding rows already present.
    pub rows_copied: i64,
}

/// Copy `plan.table` from `plan.start_cursor` until the source runs dry.
///
/// Each iteration reads one page ordered by rowid, transforms it, and lands
/// the rows and the advanced cursor in a single destination transaction. A
/// crash between iterations resumes from the last committed cursor without
/// re-applying any batch.
pub async fn copy_table(
    source: &SqliteStore,
    target: &PgStore,
    plan: &TablePlan,
    config: &PortConfig,
    progress: &dyn ProgressSink,
) -> Result<CopyOutcome> {
    let table = plan.table.as_str();
    let batch_size = config.get_batch_size();

    if plan.total == 0 {
        debug!("{}: nothing to copy", table);
        return Ok(CopyOutcome {
            table: table.to_string(),
            rows_copied: 0,
        });
    }

    progress.add_table(table, plan.already_ported, plan.total);

    let mut cursor = plan.start_cursor;
    let mut ported = plan.already_ported;
    let mut rows_copied = 0i64;

    loop {
        let page = source.read_page(table, cursor, batch_size).await?;
        let last_rowid = match page.last_rowid {
            Some(rowid) => rowid,
            None => break,
        };

        let next_cursor = last_rowid + 1;
        let (columns, rows) = transform::convert_page(table, &page);
        let batch_len = rows.len() as i64;

        let desc = format!("copy batch {}", table);
        let table_owned = table.to_string();
        target
            .run_in_transaction(&desc, move |txn| {
                let table = table_owned.clone();
                let columns = columns.clone();
                let rows = rows.clone();
                Box::pin(async move {
                    insert_many_txn(txn, &table, &columns, &rows).await?;
                    update_port_cursor_txn(txn, &table, next_cursor).await
                })
            })
            .await?;

        cursor = next_cursor;
        ported += batch_len;
        rows_copied += batch_len;
        progress.update(table, ported);
    }

    info!("{}: copied {} rows", table, rows_copied);

    Ok(CopyOutcome {
        table: table.to_string(),
        rows_copied,
    })
}
