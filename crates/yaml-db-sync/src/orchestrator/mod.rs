//! Task orchestrator - runs task groups and builds the run report.
//!
//! Groups run in declared order. Disabled groups are skipped, and the first
//! failed group ends the run. Within a group, tasks run one at a time
//! (sequential) or on a bounded worker pool (parallel); parallel results are
//! still reported in declaration order.
//!
//! Task failures never escape as errors. [`Orchestrator::run`] always returns
//! a complete [`RunReport`].

mod report;

pub use report::{GroupReport, RunReport, RunStatus, TaskDetails, TaskReport};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{Config, ExecutionMode, TaskConfig, TaskGroupConfig, TaskKind};
use crate::connection::EnvCredentialResolver;
use crate::core::traits::ConnectionProvider;
use crate::drivers::mysql::MysqlConnectionProvider;
use crate::error::{Result, SyncError};
use crate::executor::{default_workers, ProcedureExecutor};
use crate::pool::run_indexed;
use crate::upsert::SmartUpsert;

/// Runs a configuration against a database.
pub struct Orchestrator {
    config: Config,
    provider: Arc<dyn ConnectionProvider>,
    runner: TaskRunner,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub target: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator backed by MySQL, resolving the connection from
    /// the config and environment on first use.
    pub fn new(config: Config) -> Self {
        let provider = Arc::new(MysqlConnectionProvider::new(
            config.connection.clone(),
            Arc::new(EnvCredentialResolver::new()),
        ));
        Self::with_provider(config, provider)
    }

    /// Create an orchestrator over any connection provider.
    pub fn with_provider(config: Config, provider: Arc<dyn ConnectionProvider>) -> Self {
        let runner = TaskRunner {
            upsert: SmartUpsert::new(provider.clone()),
            executor: ProcedureExecutor::new(provider.clone()),
        };
        Self {
            config,
            provider,
            runner,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute every enabled group and return the run report.
    pub async fn run(&self) -> RunReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = RunReport::new(run_id, self.config.hash());
        let start = Instant::now();

        report.status = RunStatus::Running;
        info!(
            "Starting run {} ({} groups, {} tasks) against {}",
            report.run_id,
            self.config.task_groups.len(),
            self.config.task_count(),
            self.provider.describe()
        );

        let outcome = AssertUnwindSafe(self.run_groups(&mut report))
            .catch_unwind()
            .await;

        match outcome {
            Ok(success) => report.success = success,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Run {} aborted: {}", report.run_id, message);
                report.success = false;
                report.error = Some(message);
            }
        }

        report.status = if report.success {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        report.completed_at = Some(Utc::now());
        report.duration = start.elapsed().as_secs_f64();

        info!(
            "Run {} {}: {}/{} tasks succeeded in {:.2}s",
            report.run_id,
            if report.success { "succeeded" } else { "failed" },
            report.successful_tasks,
            report.total_tasks,
            report.duration
        );

        report
    }

    /// Open a session and run `SELECT 1`.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = self.ping().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!("Health check passed in {}ms", latency_ms);
                HealthCheckResult {
                    healthy: true,
                    target: self.provider.describe(),
                    latency_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
                HealthCheckResult {
                    healthy: false,
                    target: self.provider.describe(),
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut session = self.provider.connect().await?;
        let result = session.query("SELECT 1", &[]).await;
        session.close().await;
        result.map(|_| ())
    }

    /// Returns whether every processed group succeeded.
    async fn run_groups(&self, report: &mut RunReport) -> bool {
        for group in &self.config.task_groups {
            if !group.enabled {
                info!("Skipping disabled group '{}'", group.name);
                continue;
            }

            let result = self.process_group(group).await;
            let success = result.success;
            report.add_group(result);

            if !success {
                warn!(
                    "Group '{}' failed; skipping remaining groups",
                    group.name
                );
                return false;
            }
        }
        true
    }

    async fn process_group(&self, group: &TaskGroupConfig) -> GroupReport {
        let start = Instant::now();
        let tasks: Vec<TaskConfig> = group.enabled_tasks().cloned().collect();

        if tasks.is_empty() {
            info!("Group '{}' has no enabled tasks", group.name);
            let mut report = GroupReport::from_results(
                group.name.clone(),
                group.execution_mode,
                0,
                Vec::new(),
                start.elapsed().as_secs_f64(),
            );
            report.message = Some("No enabled tasks in group".to_string());
            return report;
        }

        info!(
            "Processing group '{}': {} tasks, {} mode",
            group.name,
            tasks.len(),
            group.execution_mode
        );

        let total = tasks.len();
        let results = match group.execution_mode {
            ExecutionMode::Sequential => self.run_sequential(&tasks).await,
            ExecutionMode::Parallel => self.run_parallel(tasks, group.max_workers).await,
        };

        let report = GroupReport::from_results(
            group.name.clone(),
            group.execution_mode,
            total,
            results,
            start.elapsed().as_secs_f64(),
        );
        info!(
            "Group '{}' finished: {} succeeded, {} failed in {:.2}s",
            report.name, report.successful_tasks, report.failed_tasks, report.duration
        );
        report
    }

    async fn run_sequential(&self, tasks: &[TaskConfig]) -> Vec<TaskReport> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = match AssertUnwindSafe(self.runner.execute_task(task))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!("Task '{}' panicked: {}", task.name, reason);
                    TaskReport::panicked(
                        task.name.clone(),
                        task.kind.type_name().to_string(),
                        format!("Error executing task: {}", reason),
                    )
                }
            };
            let stop = !result.success && task.kind.stop_on_failure();
            results.push(result);
            if stop {
                warn!(
                    "Task '{}' failed with stop_on_failure; skipping the rest of the group",
                    task.name
                );
                break;
            }
        }
        results
    }

    async fn run_parallel(&self, tasks: Vec<TaskConfig>, max_workers: Option<usize>) -> Vec<TaskReport> {
        let workers = max_workers.unwrap_or_else(|| default_workers(tasks.len()));
        let labels: Vec<(String, String)> = tasks
            .iter()
            .map(|t| (t.name.clone(), t.kind.type_name().to_string()))
            .collect();

        let runner = self.runner.clone();
        let slots = run_indexed(tasks, workers, move |task| {
            let runner = runner.clone();
            async move { runner.execute_task(&task).await }
        })
        .await;

        slots
            .into_iter()
            .zip(labels)
            .map(|(slot, (name, kind))| {
                slot.unwrap_or_else(|| {
                    let message = "Error in parallel execution: task panicked".to_string();
                    TaskReport::panicked(name, kind, message)
                })
            })
            .collect()
    }
}

/// Dispatches a single task to the engine for its kind.
#[derive(Clone)]
struct TaskRunner {
    upsert: SmartUpsert,
    executor: ProcedureExecutor,
}

impl TaskRunner {
    async fn execute_task(&self, task: &TaskConfig) -> TaskReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let (success, message, error, details) = match &task.kind {
            TaskKind::Upsert(upsert) => {
                let source = upsert.source_label();
                let target_table = upsert.target_table.clone();
                match self.upsert.execute(upsert).await {
                    Ok(outcome) => (
                        true,
                        outcome.message,
                        None,
                        TaskDetails::Upsert {
                            source,
                            target_table,
                            rows_processed: Some(outcome.rows_processed),
                            rows_upserted: Some(outcome.rows_upserted),
                        },
                    ),
                    Err(e) => (
                        false,
                        format!("Error executing task: {}", e),
                        Some(e.to_string()),
                        TaskDetails::Upsert {
                            source,
                            target_table,
                            rows_processed: None,
                            rows_upserted: None,
                        },
                    ),
                }
            }
            TaskKind::StoredProcedure(proc) => {
                let outcome = self.executor.call_procedure(&proc.name, &proc.args).await;
                (
                    outcome.success,
                    outcome.message,
                    outcome.error,
                    TaskDetails::StoredProcedure {
                        procedure: outcome.procedure,
                        args: outcome.args,
                    },
                )
            }
            TaskKind::SqlQuery(query) => {
                let outcome = self
                    .executor
                    .execute_query(&query.query, &query.params, query.fetch_results)
                    .await;
                (
                    outcome.success,
                    outcome.message,
                    outcome.error,
                    TaskDetails::SqlQuery {
                        query: outcome.query,
                        params: outcome.params,
                        row_count: outcome.row_count,
                        results: outcome.rows,
                    },
                )
            }
            TaskKind::Unknown(kind) => {
                let err = SyncError::UnknownTaskType(kind.clone());
                (
                    false,
                    err.to_string(),
                    Some(err.to_string()),
                    TaskDetails::Unknown { kind: kind.clone() },
                )
            }
        };

        let duration = start.elapsed().as_secs_f64();
        if success {
            info!("Task '{}' completed in {:.2}s: {}", task.name, duration, message);
        } else {
            error!("Task '{}' failed in {:.2}s: {}", task.name, duration, message);
        }

        TaskReport {
            task_name: task.name.clone(),
            task_type: task.kind.type_name().to_string(),
            success,
            message,
            error,
            started_at,
            duration,
            details,
        }
    }
}

impl TaskReport {
    /// Failed result for a task whose execution panicked.
    fn panicked(task_name: String, task_type: String, message: String) -> Self {
        TaskReport {
            details: TaskDetails::Unknown {
                kind: task_type.clone(),
            },
            task_name,
            task_type,
            success: false,
            error: Some(message.clone()),
            message,
            started_at: Utc::now(),
            duration: 0.0,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "run aborted by an unexpected panic".to_string()
    }
}
