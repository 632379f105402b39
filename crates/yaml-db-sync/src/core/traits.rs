//! Database seam used by the upsert engine and the procedure executor.
//!
//! - [`Session`]: one open connection, used for a single operation then closed
//! - [`ConnectionProvider`]: hands out fresh sessions from resolved credentials
//!
//! Nothing above this module knows which driver is in use. The MySQL
//! implementation lives in [`crate::drivers::mysql`].

use async_trait::async_trait;

use crate::error::Result;

use super::value::{Row, SqlValue};

/// A live database connection.
///
/// Sessions are not pooled. Callers open one per operation and must call
/// [`Session::close`] on every exit path, including after a failed statement.
#[async_trait]
pub trait Session: Send {
    /// Run a statement and materialize every returned row.
    ///
    /// Positional `?` placeholders in `sql` are bound from `params`.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a statement and return the affected-row count reported by the driver.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Invoke a stored routine with positional arguments.
    ///
    /// Any result sets the routine produces are drained and discarded.
    async fn call_procedure(&mut self, name: &str, args: &[SqlValue]) -> Result<()>;

    /// Release the connection.
    async fn close(self: Box<Self>);
}

/// Produce sessions against the configured database.
///
/// Implementations resolve credentials at most once per instance and reuse
/// them for every [`connect`](ConnectionProvider::connect) call.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<Box<dyn Session>>;

    /// Short description of the target for logs (never includes secrets).
    fn describe(&self) -> String {
        "database".to_string()
    }
}
