//! Configuration types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config format version (default: "1.0").
    #[serde(default = "default_version")]
    pub version: String,

    /// Where the target database lives.
    pub connection: ConnectionConfig,

    /// Groups of tasks, run in declared order.
    #[serde(default)]
    pub task_groups: Vec<TaskGroupConfig>,
}

/// Database connection reference.
///
/// The connection itself is resolved at run time from `identifier` (see
/// [`crate::connection`]); the config only names it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Name of the stored connection definition.
    #[serde(alias = "glue_connection_name", default)]
    pub identifier: String,

    /// Region the connection definition and its secret live in.
    #[serde(default)]
    pub region: String,

    /// JDBC URL override (`jdbc:mysql://host:port/db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jdbc_url: Option<String>,

    /// Path to a JSON secret file with `username` and `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_file: Option<PathBuf>,
}

/// How the tasks of a group are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time, in declared order.
    #[default]
    Sequential,

    /// Up to `max_workers` tasks at once.
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// A named group of tasks sharing an execution mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroupConfig {
    /// Group name.
    #[serde(default)]
    pub name: String,

    /// Scheduling for this group's tasks (default: sequential).
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Worker bound for parallel mode (default: min(task count, 10)).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Disabled groups are skipped entirely (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tasks in declared order.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl TaskGroupConfig {
    /// Tasks with `enabled: true`, in declared order.
    pub fn enabled_tasks(&self) -> impl Iterator<Item = &TaskConfig> {
        self.tasks.iter().filter(|t| t.enabled)
    }
}

/// A single unit of work.
///
/// On disk a task is `{name, type, enabled, config}`; the `type` string
/// selects how `config` is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTask", into = "RawTask")]
pub struct TaskConfig {
    pub name: String,
    pub enabled: bool,
    pub kind: TaskKind,
}

/// What a task does.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    Upsert(UpsertTask),
    StoredProcedure(ProcedureTask),
    SqlQuery(QueryTask),
    /// A `type` this build does not know. Reported as a failed task at run time.
    Unknown(String),
}

impl TaskKind {
    /// The `type` string used on disk and in reports.
    pub fn type_name(&self) -> &str {
        match self {
            TaskKind::Upsert(_) => "upsert",
            TaskKind::StoredProcedure(_) => "stored_procedure",
            TaskKind::SqlQuery(_) => "sql_query",
            TaskKind::Unknown(kind) => kind,
        }
    }

    /// Whether a failure of this task halts the rest of a sequential group.
    pub fn stop_on_failure(&self) -> bool {
        match self {
            TaskKind::StoredProcedure(p) => p.stop_on_failure,
            TaskKind::SqlQuery(q) => q.stop_on_failure,
            TaskKind::Upsert(_) | TaskKind::Unknown(_) => false,
        }
    }
}

/// Change-detection upsert from a source table or query into a target table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertTask {
    /// Read the whole table (exclusive with `source_query`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,

    /// Read with a custom query (exclusive with `source_table`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_query: Option<String>,

    #[serde(default)]
    pub target_table: String,

    #[serde(default)]
    pub primary_key: String,

    /// Ordered columns the checksum is computed over.
    #[serde(default)]
    pub checksum_columns: Vec<String>,

    /// Target column holding the stored checksum (default: "checksum_val").
    #[serde(default = "default_checksum_column")]
    pub checksum_column_name: String,
}

impl UpsertTask {
    /// Human-readable source for logs and reports.
    pub fn source_label(&self) -> String {
        match (&self.source_table, &self.source_query) {
            (Some(table), _) => table.clone(),
            (None, Some(_)) => "custom query".to_string(),
            (None, None) => String::new(),
        }
    }
}

/// Call a stored routine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureTask {
    #[serde(default)]
    pub name: String,

    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,

    #[serde(default)]
    pub stop_on_failure: bool,
}

/// Run one SQL statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTask {
    #[serde(default)]
    pub query: String,

    /// Values bound to `?` placeholders.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,

    /// Materialize and return the result rows.
    #[serde(default)]
    pub fetch_results: bool,

    #[serde(default)]
    pub stop_on_failure: bool,
}

/// On-disk task shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTask {
    #[serde(default)]
    name: String,

    #[serde(rename = "type", default = "default_task_type")]
    kind: String,

    #[serde(default = "default_true")]
    enabled: bool,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    config: serde_json::Value,
}

impl TryFrom<RawTask> for TaskConfig {
    type Error = String;

    fn try_from(raw: RawTask) -> std::result::Result<Self, Self::Error> {
        // A missing `config:` block reads as null; treat it as an empty map
        let body = if raw.config.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            raw.config
        };

        let parse_err = |e: serde_json::Error| format!("task '{}': {}", raw.name, e);

        let kind = match raw.kind.as_str() {
            "upsert" => TaskKind::Upsert(serde_json::from_value(body).map_err(parse_err)?),
            "stored_procedure" => {
                TaskKind::StoredProcedure(serde_json::from_value(body).map_err(parse_err)?)
            }
            "sql_query" => TaskKind::SqlQuery(serde_json::from_value(body).map_err(parse_err)?),
            other => TaskKind::Unknown(other.to_string()),
        };

        Ok(TaskConfig {
            name: raw.name,
            enabled: raw.enabled,
            kind,
        })
    }
}

impl From<TaskConfig> for RawTask {
    fn from(task: TaskConfig) -> Self {
        let kind = task.kind.type_name().to_string();
        let config = match &task.kind {
            TaskKind::Upsert(c) => serde_json::to_value(c),
            TaskKind::StoredProcedure(c) => serde_json::to_value(c),
            TaskKind::SqlQuery(c) => serde_json::to_value(c),
            TaskKind::Unknown(_) => Ok(serde_json::Value::Null),
        }
        .unwrap_or(serde_json::Value::Null);

        RawTask {
            name: task.name,
            kind,
            enabled: task.enabled,
            config,
        }
    }
}

// Default value functions for serde
fn default_version() -> String {
    "1.0".to_string()
}

fn default_checksum_column() -> String {
    "checksum_val".to_string()
}

fn default_task_type() -> String {
    "sql_query".to_string()
}

fn default_true() -> bool {
    true
}
