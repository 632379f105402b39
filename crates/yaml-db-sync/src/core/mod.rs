//! Core types shared across the sync engine.
//!
//! - [`value`]: owned SQL values and rows
//! - [`identifier`]: identifier validation and backtick quoting
//! - [`traits`]: the session/provider seam drivers implement

pub mod identifier;
pub mod traits;
pub mod value;

pub use identifier::{quote_ident, quote_qualified};
pub use traits::{ConnectionProvider, Session};
pub use value::{params_from_json, Row, SqlValue};
