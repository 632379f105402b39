//! Stored procedure and ad-hoc query execution.
//!
//! Each call opens its own session and closes it before returning, on success
//! and failure alike. Errors never escape: they come back as an outcome with
//! `success: false` and the error text.
//!
//! The batch helpers differ in how they treat `stop_on_failure`. Sequential
//! batches stop after the first failing item that sets it. Parallel batches
//! cannot: every item is dispatched up front and runs to completion.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use crate::config::{ProcedureTask, QueryTask};
use crate::core::traits::ConnectionProvider;
use crate::core::value::{params_from_json, Row, SqlValue};
use crate::error::Result;
use crate::pool::run_indexed;

/// Default parallel worker bound.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Result of one stored procedure call.
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureOutcome {
    pub success: bool,
    pub procedure: String,
    pub message: String,
    pub args: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcedureOutcome {
    fn failed(procedure: &str, args: &[serde_json::Value], message: String, error: Option<String>) -> Self {
        Self {
            success: false,
            procedure: procedure.to_string(),
            message,
            args: args.to_vec(),
            error,
        }
    }
}

/// Result of one SQL statement.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub query: String,
    pub message: String,
    pub params: Vec<serde_json::Value>,
    /// Fetched rows, present only when results were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    /// Fetched row count, or the driver's affected-row count.
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    fn failed(query: &str, params: &[serde_json::Value], message: String, error: Option<String>) -> Self {
        Self {
            success: false,
            query: query.to_string(),
            message,
            params: params.to_vec(),
            rows: None,
            row_count: 0,
            error,
        }
    }
}

/// Executes procedures and queries, one session per call.
#[derive(Clone)]
pub struct ProcedureExecutor {
    provider: Arc<dyn ConnectionProvider>,
}

impl ProcedureExecutor {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Call a stored procedure with positional arguments.
    pub async fn call_procedure(&self, name: &str, args: &[serde_json::Value]) -> ProcedureOutcome {
        if name.trim().is_empty() {
            return ProcedureOutcome::failed(
                "unknown",
                args,
                "Procedure name is required".to_string(),
                None,
            );
        }

        let result = self.run_call(name, &params_from_json(args)).await;

        match result {
            Ok(()) => {
                debug!("Executed procedure {}", name);
                ProcedureOutcome {
                    success: true,
                    procedure: name.to_string(),
                    message: format!("Successfully executed {}", name),
                    args: args.to_vec(),
                    error: None,
                }
            }
            Err(e) => {
                error!("Procedure {} failed: {}", name, e);
                ProcedureOutcome::failed(
                    name,
                    args,
                    format!("Error executing {}: {}", name, e),
                    Some(e.to_string()),
                )
            }
        }
    }

    /// Run one statement. With `fetch_results`, rows are materialized and
    /// counted; otherwise `row_count` is the affected-row count.
    pub async fn execute_query(
        &self,
        query: &str,
        params: &[serde_json::Value],
        fetch_results: bool,
    ) -> QueryOutcome {
        if query.trim().is_empty() {
            return QueryOutcome::failed("unknown", params, "Query is required".to_string(), None);
        }

        let result = self
            .run_statement(query, &params_from_json(params), fetch_results)
            .await;

        match result {
            Ok((row_count, rows)) => {
                debug!("Query affected/returned {} rows", row_count);
                QueryOutcome {
                    success: true,
                    query: query.to_string(),
                    message: "Query executed successfully".to_string(),
                    params: params.to_vec(),
                    rows,
                    row_count,
                    error: None,
                }
            }
            Err(e) => {
                error!("Query failed: {}", e);
                QueryOutcome::failed(
                    query,
                    params,
                    format!("Error executing query: {}", e),
                    Some(e.to_string()),
                )
            }
        }
    }

    /// Call procedures in order, stopping after a failure whose task sets
    /// `stop_on_failure`. Results for items never run are absent.
    pub async fn execute_procedures_sequential(&self, tasks: &[ProcedureTask]) -> Vec<ProcedureOutcome> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let outcome = self.call_procedure(&task.name, &task.args).await;
            let stop = !outcome.success && task.stop_on_failure;
            results.push(outcome);
            if stop {
                break;
            }
        }
        results
    }

    /// Call procedures concurrently. `stop_on_failure` is ignored; results are
    /// in input order.
    pub async fn execute_procedures_parallel(
        &self,
        tasks: Vec<ProcedureTask>,
        max_workers: Option<usize>,
    ) -> Vec<ProcedureOutcome> {
        let workers = max_workers.unwrap_or_else(|| default_workers(tasks.len()));
        let fallback: Vec<(String, Vec<serde_json::Value>)> =
            tasks.iter().map(|t| (t.name.clone(), t.args.clone())).collect();

        let executor = self.clone();
        let slots = run_indexed(tasks, workers, move |task| {
            let executor = executor.clone();
            async move { executor.call_procedure(&task.name, &task.args).await }
        })
        .await;

        slots
            .into_iter()
            .zip(fallback)
            .map(|(slot, (name, args))| {
                slot.unwrap_or_else(|| {
                    let message = "Error in parallel execution: worker panicked".to_string();
                    ProcedureOutcome::failed(&name, &args, message.clone(), Some(message))
                })
            })
            .collect()
    }

    /// Run queries in order, stopping after a failure whose task sets
    /// `stop_on_failure`.
    pub async fn execute_queries_sequential(&self, tasks: &[QueryTask]) -> Vec<QueryOutcome> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let outcome = self
                .execute_query(&task.query, &task.params, task.fetch_results)
                .await;
            let stop = !outcome.success && task.stop_on_failure;
            results.push(outcome);
            if stop {
                break;
            }
        }
        results
    }

    /// Run queries concurrently. `stop_on_failure` is ignored; results are in
    /// input order.
    pub async fn execute_queries_parallel(
        &self,
        tasks: Vec<QueryTask>,
        max_workers: Option<usize>,
    ) -> Vec<QueryOutcome> {
        let workers = max_workers.unwrap_or_else(|| default_workers(tasks.len()));
        let fallback: Vec<(String, Vec<serde_json::Value>)> =
            tasks.iter().map(|t| (t.query.clone(), t.params.clone())).collect();

        let executor = self.clone();
        let slots = run_indexed(tasks, workers, move |task| {
            let executor = executor.clone();
            async move {
                executor
                    .execute_query(&task.query, &task.params, task.fetch_results)
                    .await
            }
        })
        .await;

        slots
            .into_iter()
            .zip(fallback)
            .map(|(slot, (query, params))| {
                slot.unwrap_or_else(|| {
                    let message = "Error in parallel execution: worker panicked".to_string();
                    QueryOutcome::failed(&query, &params, message.clone(), Some(message))
                })
            })
            .collect()
    }

    async fn run_call(&self, name: &str, args: &[SqlValue]) -> Result<()> {
        let mut session = self.provider.connect().await?;
        let result = session.call_procedure(name, args).await;
        session.close().await;
        result
    }

    async fn run_statement(
        &self,
        query: &str,
        params: &[SqlValue],
        fetch_results: bool,
    ) -> Result<(u64, Option<Vec<Row>>)> {
        let mut session = self.provider.connect().await?;
        let result = if fetch_results {
            session
                .query(query, params)
                .await
                .map(|rows| (rows.len() as u64, Some(rows)))
        } else {
            session.execute(query, params).await.map(|n| (n, None))
        };
        session.close().await;
        result
    }
}

/// min(task count, 10), never below one.
pub fn default_workers(task_count: usize) -> usize {
    task_count.clamp(1, DEFAULT_MAX_WORKERS)
}
