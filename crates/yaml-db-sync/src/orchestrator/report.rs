//! Run, group, and task results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ExecutionMode;
use crate::core::value::Row;
use crate::error::Result;

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

/// Result of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    pub status: RunStatus,

    /// True only if every processed group succeeded.
    pub success: bool,

    /// SHA256 of the configuration that was run.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Total duration in seconds.
    pub duration: f64,

    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,

    /// Set when the run loop itself failed unexpectedly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub task_group_results: Vec<GroupReport>,
}

impl RunReport {
    pub fn new(run_id: String, config_hash: String) -> Self {
        Self {
            run_id,
            status: RunStatus::NotStarted,
            success: false,
            config_hash,
            started_at: Utc::now(),
            completed_at: None,
            duration: 0.0,
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            error: None,
            task_group_results: Vec::new(),
        }
    }

    /// Fold a finished group into the run totals.
    pub fn add_group(&mut self, group: GroupReport) {
        self.total_tasks += group.total_tasks;
        self.successful_tasks += group.successful_tasks;
        self.failed_tasks += group.failed_tasks;
        self.task_group_results.push(group);
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of one task group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub name: String,

    /// AND of every task result.
    pub success: bool,

    pub execution_mode: ExecutionMode,

    /// Enabled tasks in the group, including any skipped by stop-on-failure.
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,

    /// Duration in seconds.
    pub duration: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// A stop-on-failure task halted the rest of the group.
    pub stopped_early: bool,

    pub task_results: Vec<TaskReport>,
}

impl GroupReport {
    /// Build a group result from its task results.
    pub fn from_results(
        name: String,
        execution_mode: ExecutionMode,
        total_tasks: usize,
        task_results: Vec<TaskReport>,
        duration: f64,
    ) -> Self {
        let successful_tasks = task_results.iter().filter(|r| r.success).count();
        let failed_tasks = task_results.len() - successful_tasks;
        Self {
            name,
            success: failed_tasks == 0,
            execution_mode,
            total_tasks,
            successful_tasks,
            failed_tasks,
            duration,
            message: None,
            stopped_early: task_results.len() < total_tasks,
            task_results,
        }
    }
}

/// Result of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_name: String,
    pub task_type: String,
    pub success: bool,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Duration in seconds.
    pub duration: f64,

    #[serde(flatten)]
    pub details: TaskDetails,
}

/// Kind-specific task fields, flattened into the task result.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskDetails {
    Upsert {
        source: String,
        target_table: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rows_processed: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rows_upserted: Option<usize>,
    },
    StoredProcedure {
        procedure: String,
        args: Vec<serde_json::Value>,
    },
    SqlQuery {
        query: String,
        params: Vec<serde_json::Value>,
        row_count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        results: Option<Vec<Row>>,
    },
    Unknown {
        kind: String,
    },
}
