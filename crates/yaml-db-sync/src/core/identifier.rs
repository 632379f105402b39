//! Identifier validation and quoting.
//!
//! Table, column, and routine names come straight from the config file and
//! cannot be bound as statement parameters, so every name that lands in
//! generated SQL goes through [`quote_ident`] or [`quote_qualified`].

use crate::error::{Result, SyncError};

/// MySQL caps identifiers at 64 characters.
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Validate an identifier.
///
/// Rejects empty names, names with null bytes, and names longer than
/// MySQL allows.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a single identifier with backticks, doubling embedded backticks.
///
/// ```ignore
/// assert_eq!(quote_ident("users")?, "`users`");
/// assert_eq!(quote_ident("odd`name")?, "`odd``name`");
/// ```
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Quote a possibly database-qualified name (`db.table`, `db.proc`).
///
/// Each dotted part is quoted on its own.
pub fn quote_qualified(name: &str) -> Result<String> {
    let parts = name
        .split('.')
        .map(quote_ident)
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("."))
}
