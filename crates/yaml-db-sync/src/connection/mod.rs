//! Connection resolution.
//!
//! The config only names a connection (`identifier` + `region`). A
//! [`CredentialResolver`] turns that name into concrete [`ConnectionParams`]:
//! host, port, and database from a JDBC URL, and user and password from a JSON
//! secret `{"username": ..., "password": ...}`.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::{Result, SyncError};

/// MySQL's default TCP port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Resolved connection parameters.
#[derive(Clone, PartialEq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub jdbc_url: String,
}

// Custom Debug implementation that redacts password
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("jdbc_url", &self.jdbc_url)
            .finish()
    }
}

impl ConnectionParams {
    /// `host:port/database`, safe for logs.
    pub fn describe(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Host, port, and database parsed from a JDBC URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JdbcTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
}

/// Parse `jdbc:mysql://host[:port]/database[?options]`.
///
/// The `jdbc:` prefix is optional and the port defaults to 3306.
pub fn parse_jdbc_url(url: &str) -> Result<JdbcTarget> {
    let invalid = |why: &str| SyncError::connection(format!("{}: {}", why, url), "parsing JDBC URL");

    let rest = url.trim().strip_prefix("jdbc:").unwrap_or(url.trim());
    let (_, rest) = rest
        .split_once("://")
        .ok_or_else(|| invalid("missing '://'"))?;
    let (authority, path) = rest
        .split_once('/')
        .ok_or_else(|| invalid("missing database name"))?;

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
            (host, port)
        }
        None => (authority, DEFAULT_MYSQL_PORT),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let database = path.split(['?', ';']).next().unwrap_or_default();
    if database.is_empty() {
        return Err(invalid("missing database name"));
    }

    Ok(JdbcTarget {
        host: host.to_string(),
        port,
        database: database.to_string(),
    })
}

/// Database credentials as stored in a secret.
#[derive(Deserialize)]
struct Secret {
    username: String,
    password: String,
}

/// Resolves a named connection into concrete parameters.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, connection: &ConnectionConfig) -> Result<ConnectionParams>;
}

/// Resolves connections from the config file and the process environment.
///
/// - JDBC URL: `connection.jdbc_url`, else env `<IDENT>_JDBC_URL`
/// - Secret JSON: file at `connection.secret_file`, else env `<IDENT>_SECRET`
///
/// `<IDENT>` is the identifier upper-cased with every non-alphanumeric
/// character replaced by `_` (`warehouse-mysql` becomes `WAREHOUSE_MYSQL`).
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialResolver;

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self
    }

    fn jdbc_url(&self, connection: &ConnectionConfig) -> Result<String> {
        if let Some(url) = &connection.jdbc_url {
            return Ok(url.clone());
        }
        let var = format!("{}_JDBC_URL", env_prefix(&connection.identifier));
        std::env::var(&var).map_err(|_| {
            SyncError::connection(
                format!("no JDBC URL configured; set connection.jdbc_url or {}", var),
                format!("resolving connection '{}'", connection.identifier),
            )
        })
    }

    async fn secret(&self, connection: &ConnectionConfig) -> Result<Secret> {
        let context = format!("resolving secret for '{}'", connection.identifier);
        let raw = match &connection.secret_file {
            Some(path) => read_secret_file(path).await.map_err(|e| {
                SyncError::connection(format!("{}: {}", path.display(), e), context.clone())
            })?,
            None => {
                let var = format!("{}_SECRET", env_prefix(&connection.identifier));
                std::env::var(&var).map_err(|_| {
                    SyncError::connection(
                        format!("no secret configured; set connection.secret_file or {}", var),
                        context.clone(),
                    )
                })?
            }
        };
        serde_json::from_str(&raw).map_err(|e| {
            SyncError::connection(format!("secret is not valid credentials JSON: {}", e), context)
        })
    }
}

async fn read_secret_file(path: &Path) -> std::io::Result<String> {
    tokio::fs::read_to_string(path).await
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, connection: &ConnectionConfig) -> Result<ConnectionParams> {
        let jdbc_url = self.jdbc_url(connection)?;
        let target = parse_jdbc_url(&jdbc_url)?;
        let secret = self.secret(connection).await?;

        debug!(
            "Resolved connection '{}' ({}) to {}:{}/{}",
            connection.identifier, connection.region, target.host, target.port, target.database
        );

        Ok(ConnectionParams {
            host: target.host,
            port: target.port,
            database: target.database,
            user: secret.username,
            password: secret.password,
            jdbc_url,
        })
    }
}

/// Environment variable prefix for a connection identifier.
pub fn env_prefix(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
