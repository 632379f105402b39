//! Database drivers implementing the [`crate::core::traits`] seam.

pub mod mysql;

pub use mysql::{MysqlConnectionProvider, MysqlSession};
