//! Configuration validation.
//!
//! Every problem is collected so a broken config can be fixed in one pass.

use super::{Config, TaskConfig, TaskKind, UpsertTask};
use crate::error::{Result, SyncError};

/// Validate the configuration.
pub(crate) fn validate(config: &Config) -> Result<()> {
    let errors = collect_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SyncError::InvalidConfig(errors))
    }
}

/// Return every validation problem found, in document order.
fn collect_errors(config: &Config) -> Vec<String> {
    let mut errors = Vec::new();

    // Connection validation
    if config.connection.identifier.trim().is_empty() {
        errors.push("connection.identifier is required".to_string());
    }
    if config.connection.region.trim().is_empty() {
        errors.push("connection.region is required".to_string());
    }

    // Task group validation
    if config.task_groups.is_empty() {
        errors.push("At least one task group is required".to_string());
    }

    for (i, group) in config.task_groups.iter().enumerate() {
        if group.name.trim().is_empty() {
            errors.push(format!("Task group {} must have a name", i));
        }
        if group.tasks.is_empty() {
            errors.push(format!(
                "Task group '{}' must have at least one task",
                group.name
            ));
        }
        if let Some(0) = group.max_workers {
            errors.push(format!(
                "Task group '{}': max_workers must be at least 1",
                group.name
            ));
        }

        for (j, task) in group.tasks.iter().enumerate() {
            let context = format!("Task group '{}', task {}", group.name, j);
            validate_task(task, &context, &mut errors);
        }
    }

    errors
}

fn validate_task(task: &TaskConfig, context: &str, errors: &mut Vec<String>) {
    if task.name.trim().is_empty() {
        errors.push(format!("{}: Task must have a name", context));
    }

    match &task.kind {
        TaskKind::Upsert(upsert) => validate_upsert(upsert, context, errors),
        TaskKind::StoredProcedure(proc) => {
            if proc.name.trim().is_empty() {
                errors.push(format!("{}: Stored procedure name is required", context));
            }
        }
        TaskKind::SqlQuery(query) => {
            if query.query.trim().is_empty() {
                errors.push(format!("{}: SQL query is required", context));
            }
        }
        // Reported when the task runs
        TaskKind::Unknown(_) => {}
    }
}

fn validate_upsert(config: &UpsertTask, context: &str, errors: &mut Vec<String>) {
    let has_table = config.source_table.as_deref().is_some_and(|s| !s.is_empty());
    let has_query = config.source_query.as_deref().is_some_and(|s| !s.is_empty());

    if !has_table && !has_query {
        errors.push(format!(
            "{}: Either source_table or source_query is required",
            context
        ));
    }
    if has_table && has_query {
        errors.push(format!(
            "{}: Cannot specify both source_table and source_query",
            context
        ));
    }
    if config.target_table.is_empty() {
        errors.push(format!("{}: target_table is required", context));
    }
    if config.primary_key.is_empty() {
        errors.push(format!("{}: primary_key is required", context));
    }
    if config.checksum_columns.is_empty() {
        errors.push(format!("{}: checksum_columns is required", context));
    }
    if config.checksum_column_name.is_empty() {
        errors.push(format!("{}: checksum_column_name cannot be empty", context));
    } else if config.checksum_column_name == config.primary_key {
        errors.push(format!(
            "{}: checksum_column_name cannot be the primary key",
            context
        ));
    }
}
