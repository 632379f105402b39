//! MySQL driver.
//!
//! [`MysqlConnectionProvider`] resolves credentials once per instance and
//! opens a new [`mysql_async::Conn`] for every session. There is no pool; each
//! operation owns its connection from open to close.

mod session;

pub use session::MysqlSession;

use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::{Conn, OptsBuilder};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionParams, CredentialResolver};
use crate::core::traits::{ConnectionProvider, Session};
use crate::error::{Result, SyncError};

/// Opens MySQL sessions for one configured connection.
pub struct MysqlConnectionProvider {
    connection: ConnectionConfig,
    resolver: Arc<dyn CredentialResolver>,
    params: OnceCell<ConnectionParams>,
}

impl MysqlConnectionProvider {
    /// Create a provider. Nothing is resolved until the first connect.
    pub fn new(connection: ConnectionConfig, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            connection,
            resolver,
            params: OnceCell::new(),
        }
    }

    /// Resolved connection parameters, looked up on first use.
    pub async fn params(&self) -> Result<&ConnectionParams> {
        self.params
            .get_or_try_init(|| async {
                let params = self.resolver.resolve(&self.connection).await?;
                info!(
                    "Resolved connection '{}' to {}",
                    self.connection.identifier,
                    params.describe()
                );
                Ok(params)
            })
            .await
    }
}

#[async_trait]
impl ConnectionProvider for MysqlConnectionProvider {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        let params = self.params().await?;

        let opts = OptsBuilder::default()
            .ip_or_hostname(params.host.as_str())
            .tcp_port(params.port)
            .db_name(Some(params.database.as_str()))
            .user(Some(params.user.as_str()))
            .pass(Some(params.password.as_str()))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        let conn = Conn::new(opts).await.map_err(|e| {
            SyncError::connection(e, format!("connecting to {}", params.describe()))
        })?;
        debug!("Opened MySQL session to {}", params.describe());

        Ok(Box::new(MysqlSession::new(conn)))
    }

    fn describe(&self) -> String {
        format!(
            "connection '{}' ({})",
            self.connection.identifier, self.connection.region
        )
    }
}
