//! PostgreSQL destination store operations.
//!
//! All writes go through [`PgStore::run_in_transaction`]; there is no
//! autocommit path. The store also owns the bookkeeping table recording each
//! table's resumption cursor, and a small library of generic single-table
//! helpers the bookkeeping operations are composed from.

use crate::error::{PortError, Result};
use crate::value::SqlValue;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::future::BoxFuture;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls, Transaction};
use tracing::{debug, error, info, warn};

/// Bookkeeping table holding one `{table_name, next_rowid}` row per ported
/// table. Created by the core; never dropped by it.
pub const PORT_TABLE: &str = "port_from_sqlite3";

/// Maximum retries for a transaction that fails with a lock conflict.
const TXN_MAX_RETRIES: u32 = 5;

/// PostgreSQL bind parameters are indexed by a 16-bit integer; a multi-row
/// insert must stay under this many parameters per statement.
const MAX_PARAMS_PER_STATEMENT: usize = u16::MAX as usize;

/// PostgreSQL destination store.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create a new destination pool and verify connectivity.
    pub async fn new(config: &crate::config::TargetConfig, max_conns: usize) -> Result<Self> {
        let pg_config: PgConfig = config.connection_string().parse()?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| PortError::pool(e.to_string(), "building destination pool"))?;

        let store = Self { pool };
        store.check().await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(store)
    }

    /// Connectivity probe.
    pub async fn check(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| PortError::pool(e.to_string(), "connectivity check"))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Execute `op` against a fresh transaction, committing on success.
    ///
    /// On a lock-conflict error the transaction is rolled back and `op` is
    /// retried on a re-acquired connection, up to [`TXN_MAX_RETRIES`] times
    /// with no further backoff; any other error (or exhaustion) is re-raised.
    pub async fn run_in_transaction<T, F>(&self, desc: &str, op: F) -> Result<T>
    where
        F: for<'t> Fn(&'t Transaction<'t>) -> BoxFuture<'t, Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| PortError::pool(e.to_string(), desc.to_string()))?;
            let client: &mut tokio_postgres::Client = &mut conn;
            let txn = client.transaction().await?;

            match op(&txn).await {
                // Commit can itself lose a lock race; it gets the same
                // retry treatment as failures inside `op`.
                Ok(value) => match txn.commit().await {
                    Ok(()) => return Ok(value),
                    Err(e) => {
                        let err = PortError::Target(e);
                        if is_lock_conflict(&err) && attempt < TXN_MAX_RETRIES {
                            attempt += 1;
                            warn!(
                                "[TXN DEADLOCK] {{{}}} {}/{}",
                                desc, attempt, TXN_MAX_RETRIES
                            );
                        } else {
                            return Err(err);
                        }
                    }
                },
                Err(err) if is_lock_conflict(&err) && attempt < TXN_MAX_RETRIES => {
                    attempt += 1;
                    warn!(
                        "[TXN DEADLOCK] {{{}}} {}/{}",
                        desc, attempt, TXN_MAX_RETRIES
                    );
                    txn.rollback().await.ok();
                }
                Err(err) => {
                    debug!("[TXN FAIL] {{{}}} {}", desc, err);
                    txn.rollback().await.ok();
                    return Err(err);
                }
            }
        }
    }

    /// Run a standalone read on a pooled connection. Every write goes
    /// through [`PgStore::run_in_transaction`].
    pub async fn query_sql(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| PortError::pool(e.to_string(), sql.to_string()))?;
        Ok(client.query(sql, params).await?)
    }

    /// Names of all user tables in the destination's public schema.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        self.select_onecol(
            "information_schema.tables",
            ("table_schema", SqlValue::Text("public".to_string())),
            "DISTINCT table_name",
        )
        .await
    }

    /// Count all rows currently in `table`.
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT count(*) FROM {}", quote_ident(table));
        let rows = self.query_sql(&sql, &[]).await?;
        Ok(rows
            .first()
            .map(|row| row.get(0))
            .unwrap_or(0))
    }

    // --- Bookkeeping table -------------------------------------------------

    /// Create the bookkeeping table, tolerating a previous run's copy.
    pub async fn create_port_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             table_name varchar(100) NOT NULL UNIQUE, \
             next_rowid bigint NOT NULL)",
            PORT_TABLE
        );
        self.run_in_transaction("create port table", move |txn| {
            let sql = sql.clone();
            Box::pin(async move {
                txn.execute(&sql, &[]).await?;
                Ok(())
            })
        })
        .await
    }

    /// The stored resumption cursor for `table`, if one exists.
    pub async fn port_cursor(&self, table: &str) -> Result<Option<i64>> {
        self.select_one_onecol(
            PORT_TABLE,
            ("table_name", SqlValue::Text(table.to_string())),
            "next_rowid",
        )
        .await
    }

    /// Record a fresh resumption cursor for `table`.
    pub async fn insert_port_cursor(&self, table: &str, next_rowid: i64) -> Result<()> {
        self.insert_one(
            PORT_TABLE,
            vec![
                ("table_name", SqlValue::Text(table.to_string())),
                ("next_rowid", SqlValue::Integer(next_rowid)),
            ],
        )
        .await
    }

    /// Purge a mutable/snapshot table: delete its bookkeeping row and every
    /// destination row (cascading to dependents), in one transaction.
    pub async fn reset_table(&self, table: &str) -> Result<()> {
        let delete_sql = format!("DELETE FROM {} WHERE table_name = $1", PORT_TABLE);
        let truncate_sql = format!("TRUNCATE {} CASCADE", quote_ident(table));
        let table = table.to_string();
        self.run_in_transaction("reset table", move |txn| {
            let delete_sql = delete_sql.clone();
            let truncate_sql = truncate_sql.clone();
            let table = table.clone();
            Box::pin(async move {
                txn.execute(&delete_sql, &[&table]).await?;
                txn.execute(&truncate_sql, &[]).await?;
                Ok(())
            })
        })
        .await
    }

    // --- Generic single-table helpers --------------------------------------

    /// Select `ret_col` for every row matching `key`.
    ///
    /// `from` and `ret_col` are spliced raw so schema-qualified relations and
    /// `DISTINCT col` projections stay expressible.
    async fn select_onecol<T>(
        &self,
        from: &str,
        key: (&str, SqlValue),
        ret_col: &str,
    ) -> Result<Vec<T>>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            ret_col,
            from,
            quote_ident(key.0)
        );
        let rows = self.query_sql(&sql, &[&key.1]).await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Select one column of the single row matching `key`, if any.
    async fn select_one_onecol<T>(
        &self,
        table: &str,
        key: (&str, SqlValue),
        ret_col: &str,
    ) -> Result<Option<T>>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            quote_ident(ret_col),
            quote_ident(table),
            quote_ident(key.0)
        );
        let rows = self.query_sql(&sql, &[&key.1]).await?;
        Ok(rows.first().map(|row| row.get(0)))
    }

    /// Insert one row given `(column, value)` pairs.
    async fn insert_one(&self, table: &str, values: Vec<(&str, SqlValue)>) -> Result<()> {
        let columns: Vec<String> = values.iter().map(|(col, _)| col.to_string()).collect();
        let row: Vec<SqlValue> = values.into_iter().map(|(_, value)| value).collect();
        let sql = build_insert_sql(table, &columns, 1);
        let table = table.to_string();
        self.run_in_transaction("insert one", move |txn| {
            let sql = sql.clone();
            let table = table.clone();
            let row = row.clone();
            Box::pin(async move {
                let params: Vec<&(dyn ToSql + Sync)> =
                    row.iter().map(|value| value as &(dyn ToSql + Sync)).collect();
                txn.execute(&sql, &params)
                    .await
                    .map_err(|e| PortError::insert(table, e.to_string()))?;
                Ok(())
            })
        })
        .await
    }
}

/// Update the single row of `table` matching `key`, inside `txn`.
pub async fn update_one_txn(
    txn: &Transaction<'_>,
    table: &str,
    key: (&str, SqlValue),
    updates: &[(&str, SqlValue)],
) -> Result<()> {
    let set_list: Vec<String> = updates
        .iter()
        .enumerate()
        .map(|(idx, (col, _))| format!("{} = ${}", quote_ident(col), idx + 2))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = $1",
        quote_ident(table),
        set_list.join(", "),
        quote_ident(key.0)
    );
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&key.1];
    params.extend(updates.iter().map(|(_, value)| value as &(dyn ToSql + Sync)));
    txn.execute(&sql, &params).await?;
    Ok(())
}

/// Advance the bookkeeping cursor for `table`, inside `txn`. Paired with the
/// batch insert so the cursor never runs ahead of committed data.
pub async fn update_port_cursor_txn(
    txn: &Transaction<'_>,
    table: &str,
    next_rowid: i64,
) -> Result<()> {
    update_one_txn(
        txn,
        PORT_TABLE,
        ("table_name", SqlValue::Text(table.to_string())),
        &[("next_rowid", SqlValue::Integer(next_rowid))],
    )
    .await
}

/// Insert a batch of rows into `table` with a parameterized multi-row
/// INSERT, inside `txn`. Failures are logged with the table name and
/// re-raised; there is no partial-success path, the enclosing transaction
/// stands or falls as a whole.
pub async fn insert_many_txn(
    txn: &Transaction<'_>,
    table: &str,
    columns: &[String],
    rows: &[Vec<SqlValue>],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    // One statement unless the wire-protocol parameter cap forces a split.
    let rows_per_stmt = (MAX_PARAMS_PER_STATEMENT / columns.len().max(1)).max(1);

    for chunk in rows.chunks(rows_per_stmt) {
        let sql = build_insert_sql(table, columns, chunk.len());
        let params: Vec<&(dyn ToSql + Sync)> = chunk
            .iter()
            .flatten()
            .map(|value| value as &(dyn ToSql + Sync))
            .collect();
        if let Err(e) = txn.execute(&sql, &params).await {
            error!("Failed to insert into {}: {}", table, e);
            return Err(PortError::insert(table, e.to_string()));
        }
    }

    Ok(())
}

/// Build a multi-row INSERT statement with `$n` placeholders.
fn build_insert_sql(table: &str, columns: &[String], row_count: usize) -> String {
    let col_list: Vec<String> = columns.iter().map(|col| quote_ident(col)).collect();

    let mut placeholders = Vec::with_capacity(row_count);
    let mut idx = 1;
    for _ in 0..row_count {
        let row: Vec<String> = columns
            .iter()
            .map(|_| {
                let p = format!("${}", idx);
                idx += 1;
                p
            })
            .collect();
        placeholders.push(format!("({})", row.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        col_list.join(", "),
        placeholders.join(", ")
    )
}

/// Whether an error is a destination lock conflict worth retrying.
fn is_lock_conflict(err: &PortError) -> bool {
    match err {
        PortError::Target(e) => matches!(
            e.code(),
            Some(code)
                if *code == SqlState::T_R_DEADLOCK_DETECTED
                    || *code == SqlState::T_R_SERIALIZATION_FAILURE
        ),
        _ => false,
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
