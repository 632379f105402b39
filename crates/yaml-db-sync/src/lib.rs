//! # yaml-db-sync
//!
//! Configuration-driven data synchronization for MySQL.
//!
//! A YAML (or JSON) file declares task groups. Each group runs its tasks
//! sequentially or on a bounded worker pool, and every run produces a
//! structured [`RunReport`]. Supported task types:
//!
//! - **upsert**: copies rows from a source table or query into a target
//!   table, writing only rows whose checksum changed
//! - **stored_procedure**: calls a procedure with positional arguments
//! - **sql_query**: runs a statement, optionally returning its rows
//!
//! ## Example
//!
//! ```rust,no_run
//! use yaml_db_sync::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> yaml_db_sync::Result<()> {
//!     let config = Config::load("sync.yaml")?;
//!     let report = Orchestrator::new(config).run().await;
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod connection;
pub mod core;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod pool;
pub mod upsert;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use config::{
    Config, ConnectionConfig, ExecutionMode, ProcedureTask, QueryTask, TaskConfig,
    TaskGroupConfig, TaskKind, UpsertTask,
};
pub use connection::{ConnectionParams, CredentialResolver, EnvCredentialResolver};
pub use crate::core::{ConnectionProvider, Row, Session, SqlValue};
pub use drivers::MysqlConnectionProvider;
pub use error::{Result, SyncError};
pub use executor::{ProcedureExecutor, ProcedureOutcome, QueryOutcome};
pub use orchestrator::{
    GroupReport, HealthCheckResult, Orchestrator, RunReport, RunStatus, TaskDetails, TaskReport,
};
pub use upsert::{SmartUpsert, UpsertOutcome};
