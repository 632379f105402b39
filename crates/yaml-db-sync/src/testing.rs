//! Scripted in-memory database for unit tests.
//!
//! Statements are matched against rules by prefix, first match wins. Anything
//! unmatched succeeds with no rows and one affected row. Every statement is
//! logged, and sessions opened and closed are counted.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::traits::{ConnectionProvider, Session};
use crate::core::value::{Row, SqlValue};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(String),
    /// Panic inside the session call, after the statement is logged.
    Panic(String),
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    reply: Reply,
    delay: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    log: Vec<Executed>,
    opened: usize,
    closed: usize,
    refuse_connections: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockDb {
    state: Arc<Mutex<State>>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn on(&self, prefix: &str, reply: Reply) -> &Self {
        self.on_delayed(prefix, reply, None)
    }

    pub fn on_delayed(&self, prefix: &str, reply: Reply, delay: Option<Duration>) -> &Self {
        self.lock().rules.push(Rule {
            prefix: prefix.to_string(),
            reply,
            delay,
        });
        self
    }

    pub fn refuse_connections(&self) {
        self.lock().refuse_connections = true;
    }

    pub fn log(&self) -> Vec<Executed> {
        self.lock().log.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().log.iter().map(|e| e.sql.clone()).collect()
    }

    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.lock().closed
    }

    pub fn provider(&self) -> Arc<dyn ConnectionProvider> {
        Arc::new(self.clone())
    }

    async fn respond(&self, sql: &str, params: &[SqlValue]) -> Option<Reply> {
        let rule = {
            let mut state = self.lock();
            state.log.push(Executed {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
            state
                .rules
                .iter()
                .find(|r| sql.starts_with(&r.prefix))
                .cloned()
        };
        let rule = rule?;
        if let Some(delay) = rule.delay {
            tokio::time::sleep(delay).await;
        }
        Some(rule.reply)
    }
}

/// Build rows sharing one column list.
pub fn rows(columns: &[&str], data: Vec<Vec<SqlValue>>) -> Vec<Row> {
    let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
    data.into_iter()
        .map(|values| Row::new(columns.clone(), values))
        .collect()
}

struct MockSession {
    db: MockDb,
}

#[async_trait]
impl Session for MockSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        match self.db.respond(sql, params).await {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Affected(_)) | None => Ok(Vec::new()),
            Some(Reply::Fail(msg)) => Err(SyncError::statement(sql, msg)),
            Some(Reply::Panic(msg)) => panic!("{}", msg),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        match self.db.respond(sql, params).await {
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Rows(rows)) => Ok(rows.len() as u64),
            None => Ok(1),
            Some(Reply::Fail(msg)) => Err(SyncError::statement(sql, msg)),
            Some(Reply::Panic(msg)) => panic!("{}", msg),
        }
    }

    async fn call_procedure(&mut self, name: &str, args: &[SqlValue]) -> Result<()> {
        let sql = format!("CALL {}", name);
        match self.db.respond(&sql, args).await {
            Some(Reply::Fail(msg)) => Err(SyncError::statement(sql, msg)),
            Some(Reply::Panic(msg)) => panic!("{}", msg),
            _ => Ok(()),
        }
    }

    async fn close(self: Box<Self>) {
        self.db.lock().closed += 1;
    }
}

#[async_trait]
impl ConnectionProvider for MockDb {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(SyncError::connection("connection refused", "mock database"));
        }
        state.opened += 1;
        drop(state);
        Ok(Box::new(MockSession { db: self.clone() }))
    }

    fn describe(&self) -> String {
        "mock database".to_string()
    }
}
