//! Checksum-based change-detection upsert.
//!
//! For each invocation:
//!
//! 1. Read every source row (whole table or custom query).
//! 2. Fingerprint each row over the configured checksum columns and store the
//!    result under the checksum column.
//! 3. Read `(primary_key, checksum)` pairs from the target into a [`TargetIndex`].
//! 4. Keep only rows whose key is new or whose checksum differs.
//! 5. Write each kept row with its own `INSERT ... ON DUPLICATE KEY UPDATE`.
//!
//! Unchanged rows cost no writes. Writes are independent statements; a failure
//! partway leaves earlier rows written and is reported as a failed upsert.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::checksum::row_checksum;
use crate::config::UpsertTask;
use crate::core::identifier::{quote_ident, quote_qualified};
use crate::core::traits::{ConnectionProvider, Session};
use crate::core::value::{Row, SqlValue};
use crate::error::{Result, SyncError};

/// Counts from a completed upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    /// Rows read from the source.
    pub rows_processed: usize,
    /// Rows written to the target.
    pub rows_upserted: usize,
    pub message: String,
}

/// Stored checksums keyed by the canonical text of the primary key.
///
/// Built fresh from the target on every invocation.
#[derive(Debug, Default)]
pub struct TargetIndex {
    entries: HashMap<String, Option<String>>,
}

impl TargetIndex {
    /// Index target rows carrying `primary_key` and `checksum_column`.
    pub fn from_rows(rows: &[Row], primary_key: &str, checksum_column: &str) -> Result<Self> {
        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            let key = key_text(row.require(primary_key)?);
            let checksum = row.require(checksum_column)?.canonical_text();
            entries.insert(key, checksum);
        }
        Ok(Self { entries })
    }

    /// Whether a source row with this key and checksum must be written.
    ///
    /// A missing key or a NULL stored checksum always needs a write.
    pub fn needs_write(&self, key: &str, checksum: &str) -> bool {
        match self.entries.get(key) {
            Some(Some(stored)) => stored != checksum,
            Some(None) | None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key_text(value: &SqlValue) -> String {
    value.canonical_text().unwrap_or_default()
}

/// Source rows with their checksum column filled in.
#[derive(Debug)]
pub struct PreparedRows {
    pub columns: Arc<[String]>,
    pub rows: Vec<Row>,
    checksum_idx: usize,
    key_idx: usize,
}

impl PreparedRows {
    /// Fingerprint every source row.
    ///
    /// All rows must share the first row's columns. An existing column named
    /// like the checksum column is overwritten; otherwise one is appended.
    pub fn build(source: Vec<Row>, task: &UpsertTask) -> Result<Self> {
        let Some(first) = source.first() else {
            return Ok(Self {
                columns: Arc::from(Vec::new()),
                rows: Vec::new(),
                checksum_idx: 0,
                key_idx: 0,
            });
        };
        let source_columns = first.column_handle().clone();

        if let Some((idx, row)) = source
            .iter()
            .enumerate()
            .find(|(_, row)| !row.same_shape(first))
        {
            return Err(SyncError::RowShape {
                row: idx,
                message: format!(
                    "expected columns [{}], found [{}]",
                    source_columns.join(", "),
                    row.columns().join(", ")
                ),
            });
        }

        let key_idx = source_columns
            .iter()
            .position(|c| *c == task.primary_key)
            .ok_or_else(|| SyncError::MissingColumn {
                column: task.primary_key.clone(),
            })?;

        let existing = source_columns
            .iter()
            .position(|c| *c == task.checksum_column_name);
        let (columns, checksum_idx): (Arc<[String]>, usize) = match existing {
            Some(idx) => (source_columns.clone(), idx),
            None => {
                let mut cols = source_columns.to_vec();
                cols.push(task.checksum_column_name.clone());
                let idx = cols.len() - 1;
                (cols.into(), idx)
            }
        };

        let mut rows = Vec::with_capacity(source.len());
        for row in source {
            let checksum = row_checksum(&row, &task.checksum_columns)?;
            let mut values = row.into_values();
            if checksum_idx < values.len() {
                values[checksum_idx] = SqlValue::Text(checksum);
            } else {
                values.push(SqlValue::Text(checksum));
            }
            rows.push(Row::new(columns.clone(), values));
        }

        Ok(Self {
            columns,
            rows,
            checksum_idx,
            key_idx,
        })
    }

    /// Rows whose key is absent from the target or whose checksum differs.
    pub fn plan<'a>(&'a self, target: &TargetIndex) -> Vec<&'a Row> {
        self.rows
            .iter()
            .filter(|row| {
                let values = row.values();
                let key = key_text(&values[self.key_idx]);
                let checksum = values[self.checksum_idx]
                    .canonical_text()
                    .unwrap_or_default();
                target.needs_write(&key, &checksum)
            })
            .collect()
    }
}

/// Source read statement for a task.
pub fn source_statement(task: &UpsertTask) -> Result<String> {
    match (&task.source_table, &task.source_query) {
        (Some(table), _) if !table.is_empty() => {
            Ok(format!("SELECT * FROM {}", quote_qualified(table)?))
        }
        (_, Some(query)) if !query.is_empty() => Ok(query.clone()),
        _ => Err(SyncError::Config(
            "Either source_table or source_query is required".to_string(),
        )),
    }
}

/// Target index read statement.
pub fn target_statement(task: &UpsertTask) -> Result<String> {
    Ok(format!(
        "SELECT {}, {} FROM {}",
        quote_ident(&task.primary_key)?,
        quote_ident(&task.checksum_column_name)?,
        quote_qualified(&task.target_table)?
    ))
}

/// `INSERT ... ON DUPLICATE KEY UPDATE` overwriting every non-key column.
pub fn upsert_statement(table: &str, columns: &[String], primary_key: &str) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?;
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates: Vec<String> = columns
        .iter()
        .zip(&quoted)
        .filter(|(c, _)| c.as_str() != primary_key)
        .map(|(_, q)| format!("{q} = VALUES({q})"))
        .collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
        quote_qualified(table)?,
        quoted.join(", "),
        placeholders,
        updates.join(", ")
    ))
}

/// Runs upsert tasks against a connection provider.
#[derive(Clone)]
pub struct SmartUpsert {
    provider: Arc<dyn ConnectionProvider>,
}

impl SmartUpsert {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }

    /// Run one upsert on its own session, closing it on every path.
    pub async fn execute(&self, task: &UpsertTask) -> Result<UpsertOutcome> {
        let mut session = self.provider.connect().await?;
        let result = self.run(session.as_mut(), task).await;
        session.close().await;
        result
    }

    async fn run(&self, session: &mut dyn Session, task: &UpsertTask) -> Result<UpsertOutcome> {
        let source_sql = source_statement(task)?;
        let source = session.query(&source_sql, &[]).await?;
        let rows_processed = source.len();

        if source.is_empty() {
            let message = if task.source_table.is_some() {
                "No data found in source table"
            } else {
                "No data found from source query"
            };
            info!("Upsert into {}: {}", task.target_table, message);
            return Ok(UpsertOutcome {
                rows_processed: 0,
                rows_upserted: 0,
                message: message.to_string(),
            });
        }

        let prepared = PreparedRows::build(source, task)?;

        let target_rows = session.query(&target_statement(task)?, &[]).await?;
        let index = TargetIndex::from_rows(
            &target_rows,
            &task.primary_key,
            &task.checksum_column_name,
        )?;
        if index.is_empty() {
            debug!("Target {} is empty; every source row is new", task.target_table);
        } else {
            debug!(
                "Target {} holds {} checksummed rows",
                task.target_table,
                index.len()
            );
        }

        let plan = prepared.plan(&index);
        if plan.is_empty() {
            info!(
                "Upsert {} -> {}: {} rows unchanged",
                task.source_label(),
                task.target_table,
                rows_processed
            );
            return Ok(UpsertOutcome {
                rows_processed,
                rows_upserted: 0,
                message: "No new or changed records to upsert".to_string(),
            });
        }

        let sql = upsert_statement(&task.target_table, &prepared.columns, &task.primary_key)?;
        for row in &plan {
            session.execute(&sql, row.values()).await?;
        }

        info!(
            "Upsert {} -> {}: {} of {} rows written",
            task.source_label(),
            task.target_table,
            plan.len(),
            rows_processed
        );

        Ok(UpsertOutcome {
            rows_processed,
            rows_upserted: plan.len(),
            message: format!("Upserted {} records", plan.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_str;
    use crate::testing::{rows, MockDb, Reply};

    const SOURCE_SQL: &str = "SELECT * FROM `staging`.`customers`";
    const TARGET_SQL: &str = "SELECT `id`, `checksum_val` FROM `customers`";

    fn task() -> UpsertTask {
        UpsertTask {
            source_table: Some("staging.customers".to_string()),
            source_query: None,
            target_table: "customers".to_string(),
            primary_key: "id".to_string(),
            checksum_columns: vec!["name".to_string(), "city".to_string()],
            checksum_column_name: "checksum_val".to_string(),
        }
    }

    fn source_rows() -> Vec<Row> {
        rows(
            &["id", "name", "city"],
            vec![
                vec![SqlValue::Int(1), "Ann".into(), "Oslo".into()],
                vec![SqlValue::Int(2), "Bob".into(), SqlValue::Null],
            ],
        )
    }

    fn inserts(db: &MockDb) -> Vec<Vec<SqlValue>> {
        db.log()
            .into_iter()
            .filter(|e| e.sql.starts_with("INSERT"))
            .map(|e| e.params)
            .collect()
    }

    #[test]
    fn test_statements() {
        assert_eq!(source_statement(&task()).unwrap(), SOURCE_SQL);
        assert_eq!(target_statement(&task()).unwrap(), TARGET_SQL);
        let cols = vec!["id".to_string(), "name".to_string(), "checksum_val".to_string()];
        assert_eq!(
            upsert_statement("customers", &cols, "id").unwrap(),
            "INSERT INTO `customers` (`id`, `name`, `checksum_val`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `checksum_val` = VALUES(`checksum_val`)"
        );
    }

    #[test]
    fn test_custom_query_source() {
        let mut t = task();
        t.source_table = None;
        t.source_query = Some("SELECT id, name, city FROM v_customers".to_string());
        assert_eq!(
            source_statement(&t).unwrap(),
            "SELECT id, name, city FROM v_customers"
        );
    }

    #[test]
    fn test_plan_only_contains_new_or_changed() {
        let prepared = PreparedRows::build(source_rows(), &task()).unwrap();
        let ann_checksum = checksum_str("Ann||Oslo");
        let target = rows(
            &["id", "checksum_val"],
            vec![vec![SqlValue::Int(1), ann_checksum.as_str().into()]],
        );
        let index = TargetIndex::from_rows(&target, "id", "checksum_val").unwrap();

        let plan = prepared.plan(&index);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].get("id"), Some(&SqlValue::Int(2)));
    }

    #[test]
    fn test_null_target_checksum_needs_write() {
        let target = rows(
            &["id", "checksum_val"],
            vec![vec![SqlValue::Int(1), SqlValue::Null]],
        );
        let index = TargetIndex::from_rows(&target, "id", "checksum_val").unwrap();
        assert!(index.needs_write("1", "ANY"));
        assert!(index.needs_write("2", "ANY"));
    }

    #[test]
    fn test_empty_target_plans_every_row() {
        let prepared = PreparedRows::build(source_rows(), &task()).unwrap();
        let index = TargetIndex::from_rows(&[], "id", "checksum_val").unwrap();
        assert!(index.is_empty());
        assert_eq!(prepared.plan(&index).len(), 2);
    }

    #[test]
    fn test_existing_checksum_column_is_overwritten() {
        let source = rows(
            &["id", "name", "city", "checksum_val"],
            vec![vec![SqlValue::Int(1), "Ann".into(), "Oslo".into(), "STALE".into()]],
        );
        let prepared = PreparedRows::build(source, &task()).unwrap();
        assert_eq!(prepared.columns.len(), 4);
        assert_eq!(
            prepared.rows[0].get("checksum_val"),
            Some(&SqlValue::Text(checksum_str("Ann||Oslo")))
        );
    }

    #[test]
    fn test_heterogeneous_rows_rejected() {
        let mut source = source_rows();
        source.push(Row::from_pairs([("id", SqlValue::Int(3))]));
        let err = PreparedRows::build(source, &task()).unwrap_err();
        assert!(matches!(err, SyncError::RowShape { row: 2, .. }));
    }

    #[test]
    fn test_missing_primary_key_column() {
        let mut t = task();
        t.primary_key = "customer_id".to_string();
        let err = PreparedRows::build(source_rows(), &t).unwrap_err();
        assert!(matches!(err, SyncError::MissingColumn { column } if column == "customer_id"));
    }

    #[tokio::test]
    async fn test_empty_source_never_touches_target() {
        let db = MockDb::new();
        db.on(SOURCE_SQL, Reply::Rows(vec![]));

        let outcome = SmartUpsert::new(db.provider()).execute(&task()).await.unwrap();
        assert_eq!(outcome.rows_processed, 0);
        assert_eq!(outcome.rows_upserted, 0);
        assert_eq!(outcome.message, "No data found in source table");
        assert_eq!(db.statements(), vec![SOURCE_SQL.to_string()]);
        assert_eq!((db.opened(), db.closed()), (1, 1));
    }

    #[tokio::test]
    async fn test_writes_only_changed_rows() {
        let db = MockDb::new();
        db.on(SOURCE_SQL, Reply::Rows(source_rows()));
        db.on(
            TARGET_SQL,
            Reply::Rows(rows(
                &["id", "checksum_val"],
                vec![vec![SqlValue::Int(1), checksum_str("Ann||Oslo").into()]],
            )),
        );

        let outcome = SmartUpsert::new(db.provider()).execute(&task()).await.unwrap();
        assert_eq!(outcome.rows_processed, 2);
        assert_eq!(outcome.rows_upserted, 1);
        assert_eq!(outcome.message, "Upserted 1 records");

        let written = inserts(&db);
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0],
            vec![
                SqlValue::Int(2),
                "Bob".into(),
                SqlValue::Null,
                SqlValue::Text(checksum_str("Bob||")),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let first = MockDb::new();
        first.on(SOURCE_SQL, Reply::Rows(source_rows()));
        let outcome = SmartUpsert::new(first.provider()).execute(&task()).await.unwrap();
        assert_eq!(outcome.rows_upserted, 2);

        // Feed what was written back in as the target contents
        let target: Vec<Vec<SqlValue>> = inserts(&first)
            .into_iter()
            .map(|params| vec![params[0].clone(), params[3].clone()])
            .collect();
        let second = MockDb::new();
        second.on(SOURCE_SQL, Reply::Rows(source_rows()));
        second.on(TARGET_SQL, Reply::Rows(rows(&["id", "checksum_val"], target)));

        let outcome = SmartUpsert::new(second.provider()).execute(&task()).await.unwrap();
        assert_eq!(outcome.rows_processed, 2);
        assert_eq!(outcome.rows_upserted, 0);
        assert_eq!(outcome.message, "No new or changed records to upsert");
        assert!(inserts(&second).is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_fails_whole_upsert_and_closes_session() {
        let db = MockDb::new();
        db.on(SOURCE_SQL, Reply::Rows(source_rows()));
        db.on("INSERT", Reply::Fail("Duplicate entry".to_string()));

        let err = SmartUpsert::new(db.provider())
            .execute(&task())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate entry"));
        // Stops at the first failed write
        assert_eq!(inserts(&db).len(), 1);
        assert_eq!((db.opened(), db.closed()), (1, 1));
    }

    #[tokio::test]
    async fn test_shape_error_before_target_read() {
        let mut source = source_rows();
        source.push(Row::from_pairs([("id", SqlValue::Int(3))]));
        let db = MockDb::new();
        db.on(SOURCE_SQL, Reply::Rows(source));

        let err = SmartUpsert::new(db.provider()).execute(&task()).await.unwrap_err();
        assert!(matches!(err, SyncError::RowShape { .. }));
        assert_eq!(db.statements().len(), 1);
    }
}
