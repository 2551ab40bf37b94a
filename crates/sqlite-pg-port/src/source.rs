//! SQLite source store operations.
//!
//! The source is a database snapshot read over exactly one connection: the
//! file is not safely shareable across concurrent writers, and reads are
//! dispatched through `spawn_blocking` so rusqlite calls never block the
//! async executor.

use crate::error::{PortError, Result};
use crate::value::SqlValue;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// One page of rows read from a source table, ordered by rowid ascending.
///
/// `headers` starts with the implicit `rowid` column, and every row carries
/// its rowid as the first value; the transform strips it before the write.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    /// Largest rowid in the page, None when the page is empty.
    pub last_rowid: Option<i64>,
}

impl SourcePage {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read-only SQLite source store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open the source database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Opened SQLite source: {}", path.as_ref().display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the shared connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| PortError::Task("sqlite connection mutex poisoned".into()))?;
            f(&conn)
        })
        .await
        .map_err(|e| PortError::Task(format!("sqlite worker failed: {}", e)))?
    }

    /// Connectivity/readability probe.
    pub async fn check(&self) -> Result<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    /// Names of all user tables in the source.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        self.call(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    /// Read up to `limit` rows with rowid >= `cursor`, ordered by rowid.
    pub async fn read_page(&self, table: &str, cursor: i64, limit: usize) -> Result<SourcePage> {
        let sql = format!(
            "SELECT rowid, * FROM {} WHERE rowid >= ?1 ORDER BY rowid LIMIT ?2",
            quote_ident(table)
        );
        let table = table.to_string();
        self.call(move |conn| {
            let page = collect_page(conn, &sql, params![cursor, limit as i64])?;
            debug!("{}: read page of {} rows from {}", table, page.rows.len(), cursor);
            Ok(page)
        })
        .await
    }

    /// Count source rows with rowid >= `cursor`.
    pub async fn count_from(&self, table: &str, cursor: i64) -> Result<i64> {
        let sql = format!(
            "SELECT count(*) FROM {} WHERE rowid >= ?1",
            quote_ident(table)
        );
        self.call(move |conn| {
            let count = conn.query_row(&sql, params![cursor], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }

    /// For each distinct value of `partition_col`, the row with the largest
    /// rowid. Used by the time-windowed table policy.
    pub async fn latest_per_partition(
        &self,
        table: &str,
        partition_col: &str,
    ) -> Result<SourcePage> {
        let sql = format!(
            "SELECT rowid, * FROM {table} WHERE rowid IN \
             (SELECT max(rowid) FROM {table} GROUP BY {part})",
            table = quote_ident(table),
            part = quote_ident(partition_col),
        );
        self.call(move |conn| collect_page(conn, &sql, [])).await
    }

    /// Rowid of the first row whose `ts_col` is at or after `cutoff`.
    pub async fn first_rowid_in_window(
        &self,
        table: &str,
        ts_col: &str,
        cutoff: i64,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT rowid FROM {} WHERE {} >= ?1 ORDER BY rowid ASC LIMIT 1",
            quote_ident(table),
            quote_ident(ts_col)
        );
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![cutoff])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
        .await
    }
}

/// Run `sql` and collect every row into a [`SourcePage`]. The first selected
/// column must be the rowid.
fn collect_page<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<SourcePage> {
    let mut stmt = conn.prepare(sql)?;
    let headers: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    let mut last_rowid = None;
    while let Some(row) = rows.next()? {
        let rowid: i64 = row.get(0)?;
        let mut values = Vec::with_capacity(headers.len());
        for idx in 0..headers.len() {
            values.push(SqlValue::from_sqlite(row.get_ref(idx)?));
        }
        last_rowid = Some(rowid);
        out.push(values);
    }
    Ok(SourcePage {
        headers,
        rows: out,
        last_rowid,
    })
}

/// Quote a SQLite identifier, escaping embedded double quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE events (event_id TEXT, processed INTEGER);
             INSERT INTO events VALUES ('$a', 1), ('$b', 0), ('$c', 1);
             CREATE TABLE sent_transactions (transaction_id TEXT, destination TEXT, ts INTEGER);
             INSERT INTO sent_transactions VALUES ('t1', 'a.example', 100);
             INSERT INTO sent_transactions VALUES ('t2', 'a.example', 200);
             INSERT INTO sent_transactions VALUES ('t3', 'b.example', 150);",
        )
        .unwrap();
        SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    #[tokio::test]
    async fn table_names_lists_user_tables() {
        let store = seeded_store();
        let mut names = store.table_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["events", "sent_transactions"]);
    }

    #[tokio::test]
    async fn read_page_orders_by_rowid_and_reports_last() {
        let store = seeded_store();
        let page = store.read_page("events", 1, 2).await.unwrap();
        assert_eq!(page.headers[0], "rowid");
        assert_eq!(page.headers[1..], ["event_id", "processed"]);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.last_rowid, Some(2));
        assert_eq!(page.rows[0][1], SqlValue::Text("$a".into()));
    }

    #[tokio::test]
    async fn read_page_resumes_from_cursor() {
        let store = seeded_store();
        let page = store.read_page("events", 3, 10).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.last_rowid, Some(3));

        let empty = store.read_page("events", 4, 10).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.last_rowid, None);
    }

    #[tokio::test]
    async fn count_from_honors_cursor() {
        let store = seeded_store();
        assert_eq!(store.count_from("events", 1).await.unwrap(), 3);
        assert_eq!(store.count_from("events", 3).await.unwrap(), 1);
        assert_eq!(store.count_from("events", 9).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn latest_per_partition_picks_max_rowid() {
        let store = seeded_store();
        let page = store
            .latest_per_partition("sent_transactions", "destination")
            .await
            .unwrap();
        let mut rowids: Vec<i64> = page
            .rows
            .iter()
            .filter_map(|row| row[0].as_integer())
            .collect();
        rowids.sort();
        // a.example -> rowid 2, b.example -> rowid 3
        assert_eq!(rowids, vec![2, 3]);
    }

    #[tokio::test]
    async fn first_rowid_in_window_finds_earliest_recent_row() {
        let store = seeded_store();
        let rowid = store
            .first_rowid_in_window("sent_transactions", "ts", 150)
            .await
            .unwrap();
        assert_eq!(rowid, Some(2));

        let none = store
            .first_rowid_in_window("sent_transactions", "ts", 10_000)
            .await
            .unwrap();
        assert_eq!(none, None);
    }
}
