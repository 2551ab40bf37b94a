//! # sqlite-pg-port
//!
//! Resumable, chunked bulk data porter from SQLite to PostgreSQL.
//!
//! The library copies the full contents of every table present in both
//! stores, with support for:
//!
//! - **Chunked copy** paginated on the SQLite rowid
//! - **Durable resume** via a bookkeeping table in the destination, updated
//!   in the same transaction as each batch insert
//! - **Row transforms** (integer-to-boolean coercion for declared columns)
//! - **Deadlock masking** with bounded transaction retry on the destination
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_port::{Config, Porter};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pg_port::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let porter = Porter::new(config);
//!     let report = porter.run().await?;
//!     println!("Ported {} rows", report.rows_ported);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod copy;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod source;
pub mod target;
pub mod transform;
pub mod value;

// Re-exports for convenient access
pub use config::{Config, PortConfig, SourceConfig, TargetConfig};
pub use error::{PortError, Result};
pub use orchestrator::{PortReport, Porter};
pub use plan::TablePlan;
pub use progress::{LogProgress, NullProgress, ProgressSink};
pub use source::SqliteStore;
pub use target::PgStore;
pub use value::SqlValue;
