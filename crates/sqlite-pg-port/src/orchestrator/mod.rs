//! Run orchestration: discovers the table set, fans planning and copying out
//! across per-table tasks, and reports the first failure after everything
//! settles.

use crate::config::Config;
use crate::copy;
use crate::error::{PortError, Result};
use crate::plan::{self, TablePlan};
use crate::progress::{NullProgress, ProgressSink};
use crate::source::SqliteStore;
use crate::target::{PgStore, PORT_TABLE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct PortReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub tables_ported: usize,
    pub rows_ported: i64,
    pub elapsed_secs: f64,
}

/// Drives a whole port run.
pub struct Porter {
    config: Config,
    progress: Arc<dyn ProgressSink>,
}

impl Porter {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(config: Config, progress: Arc<dyn ProgressSink>) -> Self {
        Self { config, progress }
    }

    /// Run the port end to end.
    ///
    /// Planning and copying each fan out one task per table and join before
    /// the next phase. A single table's failure does not stop its siblings;
    /// the first failure is re-raised once all in-flight work has settled,
    /// leaving every unaffected table's cursor valid for a future resume.
    pub async fn run(&self) -> Result<PortReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();
        info!("Starting port run {}", run_id);

        self.progress.set_state("Preparing SQLite3");
        let source = Arc::new(SqliteStore::open(&self.config.source.database)?);
        source.check().await?;

        self.progress.set_state("Preparing PostgreSQL");
        let target = Arc::new(
            PgStore::new(
                &self.config.target,
                self.config.port.get_target_connections(),
            )
            .await?,
        );

        self.progress.set_state("Fetching tables");
        let (source_tables, target_tables) =
            tokio::join!(source.table_names(), target.table_names());
        let tables = eligible_tables(&source_tables?, &target_tables?);
        info!("Found {} tables", tables.len());

        self.progress.set_state("Creating port table");
        target.create_port_table().await?;

        self.progress.set_state("Setting up");
        let mut first_error: Option<PortError> = None;
        let plans = self.plan_tables(&source, &target, &tables, &mut first_error).await;

        self.progress.set_state("Copying");
        let outcomes = self.copy_tables(&source, &target, plans, &mut first_error).await;

        if let Some(err) = first_error {
            return Err(err);
        }

        self.progress.done();

        let report = PortReport {
            run_id,
            started_at,
            tables_ported: outcomes.len(),
            rows_ported: outcomes.iter().map(|o| o.rows_copied).sum(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            "Port run {} complete: {} tables, {} rows in {:.1}s",
            report.run_id, report.tables_ported, report.rows_ported, report.elapsed_secs
        );
        Ok(report)
    }

    async fn plan_tables(
        &self,
        source: &Arc<SqliteStore>,
        target: &Arc<PgStore>,
        tables: &[String],
        first_error: &mut Option<PortError>,
    ) -> Vec<TablePlan> {
        let mut tasks = Vec::with_capacity(tables.len());
        for table in tables {
            let source = Arc::clone(source);
            let target = Arc::clone(target);
            let table = table.clone();
            tasks.push((
                table.clone(),
                tokio::spawn(async move { plan::plan_table(&source, &target, &table).await }),
            ));
        }

        let mut plans = Vec::new();
        for (table, task) in tasks {
            match task.await {
                Ok(Ok(plan)) => plans.push(plan),
                Ok(Err(e)) => {
                    error!("{}: planning failed: {}", table, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("{}: planning task panicked: {}", table, e);
                    first_error.get_or_insert(PortError::Task(e.to_string()));
                }
            }
        }
        plans
    }

    async fn copy_tables(
        &self,
        source: &Arc<SqliteStore>,
        target: &Arc<PgStore>,
        plans: Vec<TablePlan>,
        first_error: &mut Option<PortError>,
    ) -> Vec<copy::CopyOutcome> {
        let mut tasks = Vec::with_capacity(plans.len());
        for plan in plans {
            let source = Arc::clone(source);
            let target = Arc::clone(target);
            let config = self.config.port.clone();
            let progress = Arc::clone(&self.progress);
            let table = plan.table.clone();
            tasks.push((
                table,
                tokio::spawn(async move {
                    copy::copy_table(&source, &target, &plan, &config, progress.as_ref()).await
                }),
            ));
        }

        let mut outcomes = Vec::new();
        for (table, task) in tasks {
            match task.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    error!("{}: copy failed: {}", table, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("{}: copy task panicked: {}", table, e);
                    first_error.get_or_insert(PortError::Task(e.to_string()));
                }
            }
        }
        outcomes
    }
}

/// Tables present in both stores and eligible for porting. Schema trackers,
/// SQLite internals, and the bookkeeping table are never copied.
fn eligible_tables(source: &[String], target: &[String]) -> Vec<String> {
    let target: HashSet<&str> = target.iter().map(String::as_str).collect();
    let mut tables: Vec<String> = source
        .iter()
        .filter(|name| target.contains(name.as_str()))
        .filter(|name| !name.starts_with("sqlite_"))
        .filter(|name| {
            name.as_str() != "schema_version"
                && name.as_str() != "applied_schema_deltas"
                && name.as_str() != PORT_TABLE
        })
        .cloned()
        .collect();
    tables.sort();
    tables
}
