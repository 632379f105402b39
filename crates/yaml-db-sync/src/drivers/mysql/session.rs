//! A single MySQL connection implementing [`Session`].

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, Params, Value};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::identifier::quote_qualified;
use crate::core::traits::Session;
use crate::core::value::{Row, SqlValue};
use crate::error::{Result, SyncError};

/// Character set id MySQL reports for binary columns.
const BINARY_CHARSET: u16 = 63;

/// One open MySQL connection.
pub struct MysqlSession {
    conn: Conn,
}

impl MysqlSession {
    pub fn new(conn: Conn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Session for MysqlSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        debug!("query: {}", sql);
        let rows: Vec<mysql_async::Row> = if params.is_empty() {
            self.conn.query(sql).await
        } else {
            self.conn.exec(sql, to_params(params)).await
        }
        .map_err(|e| SyncError::statement(sql, e))?;

        Ok(convert_rows(rows))
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        debug!("execute: {}", sql);
        if params.is_empty() {
            self.conn.query_drop(sql).await
        } else {
            self.conn.exec_drop(sql, to_params(params)).await
        }
        .map_err(|e| SyncError::statement(sql, e))?;

        Ok(self.conn.affected_rows())
    }

    async fn call_procedure(&mut self, name: &str, args: &[SqlValue]) -> Result<()> {
        let sql = call_statement(name, args.len())?;
        debug!("call: {}", sql);
        if args.is_empty() {
            self.conn.query_drop(&sql).await
        } else {
            self.conn.exec_drop(&sql, to_params(args)).await
        }
        .map_err(|e| SyncError::statement(sql.as_str(), e))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.disconnect().await {
            warn!("Error while closing MySQL session: {}", e);
        }
    }
}

/// Build `CALL name(?, ?, ...)` with the routine name quoted.
fn call_statement(name: &str, arg_count: usize) -> Result<String> {
    let placeholders = vec!["?"; arg_count].join(", ");
    Ok(format!("CALL {}({})", quote_qualified(name)?, placeholders))
}

fn to_params(values: &[SqlValue]) -> Params {
    Params::Positional(values.iter().map(sql_value_to_mysql).collect())
}

/// Convert SqlValue to mysql_async::Value.
fn sql_value_to_mysql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(*b)),
        SqlValue::Int(i) => Value::Int(*i),
        SqlValue::UInt(u) => Value::UInt(*u),
        SqlValue::Float(f) => Value::Double(*f),
        SqlValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.clone()),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::DateTime(dt) => Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        SqlValue::Time(t) => time_to_mysql(t),
    }
}

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

fn time_to_mysql(delta: &Duration) -> Value {
    let total = delta.num_microseconds().unwrap_or_default();
    let neg = total < 0;
    let total = total.unsigned_abs();
    let days = total / MICROS_PER_DAY as u64;
    let secs = total % MICROS_PER_DAY as u64 / 1_000_000;
    Value::Time(
        neg,
        days as u32,
        (secs / 3600) as u8,
        (secs / 60 % 60) as u8,
        (secs % 60) as u8,
        (total % 1_000_000) as u32,
    )
}

/// What a result column holds, as far as decoding is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    SignedInt,
    UnsignedInt,
    Float,
    Decimal,
    Date,
    DateTime,
    Time,
    Binary,
    Text,
}

fn column_kind(column: &Column) -> ColumnKind {
    let unsigned = column.flags().contains(ColumnFlags::UNSIGNED_FLAG);
    match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            if unsigned {
                ColumnKind::UnsignedInt
            } else {
                ColumnKind::SignedInt
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => ColumnKind::Float,
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => ColumnKind::Decimal,
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => ColumnKind::Date,
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => ColumnKind::DateTime,
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => ColumnKind::Time,
        ColumnType::MYSQL_TYPE_BIT | ColumnType::MYSQL_TYPE_GEOMETRY => ColumnKind::Binary,
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_STRING
        | ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_VARCHAR
            if column.character_set() == BINARY_CHARSET =>
        {
            ColumnKind::Binary
        }
        _ => ColumnKind::Text,
    }
}

fn convert_rows(rows: Vec<mysql_async::Row>) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let meta = first.columns();
    let names: Arc<[String]> = meta.iter().map(|c| c.name_str().into_owned()).collect();
    let kinds: Vec<ColumnKind> = meta.iter().map(column_kind).collect();

    rows.into_iter()
        .map(|mut row| {
            let values = kinds
                .iter()
                .enumerate()
                .map(|(idx, kind)| {
                    let raw = row.take::<Value, usize>(idx).unwrap_or(Value::NULL);
                    decode_value(raw, *kind)
                })
                .collect();
            Row::new(names.clone(), values)
        })
        .collect()
}

/// Decode a driver value. Binary-protocol results arrive typed; text-protocol
/// results arrive as bytes and are parsed according to the column kind.
fn decode_value(value: Value, kind: ColumnKind) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(i) => SqlValue::Int(i),
        Value::UInt(u) => SqlValue::UInt(u),
        Value::Float(f) => SqlValue::Float(f64::from(f)),
        Value::Double(d) => SqlValue::Float(d),
        Value::Date(y, m, d, h, i, s, us) => decode_date(y, m, d, h, i, s, us, kind),
        Value::Time(neg, days, h, i, s, us) => {
            let magnitude = Duration::days(i64::from(days))
                + Duration::hours(i64::from(h))
                + Duration::minutes(i64::from(i))
                + Duration::seconds(i64::from(s))
                + Duration::microseconds(i64::from(us));
            SqlValue::Time(if neg { -magnitude } else { magnitude })
        }
        Value::Bytes(bytes) => decode_bytes(bytes, kind),
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_date(y: u16, m: u8, d: u8, h: u8, i: u8, s: u8, us: u32, kind: ColumnKind) -> SqlValue {
    let date = NaiveDate::from_ymd_opt(i32::from(y), u32::from(m), u32::from(d));
    match (date, kind) {
        (Some(date), ColumnKind::Date) => SqlValue::Date(date),
        (Some(date), _) => date
            .and_hms_micro_opt(u32::from(h), u32::from(i), u32::from(s), us)
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        // Zero dates ('0000-00-00') have no calendar value; keep the text
        (None, ColumnKind::Date) => SqlValue::Text(format!("{:04}-{:02}-{:02}", y, m, d)),
        (None, _) => SqlValue::Text(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            y, m, d, h, i, s
        )),
    }
}

fn decode_bytes(bytes: Vec<u8>, kind: ColumnKind) -> SqlValue {
    if kind == ColumnKind::Binary {
        return SqlValue::Bytes(bytes);
    }
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return SqlValue::Bytes(e.into_bytes()),
    };

    let parsed = match kind {
        ColumnKind::SignedInt => text.parse().ok().map(SqlValue::Int),
        ColumnKind::UnsignedInt => text.parse().ok().map(SqlValue::UInt),
        ColumnKind::Float => text.parse().ok().map(SqlValue::Float),
        ColumnKind::Decimal => Decimal::from_str(&text).ok().map(SqlValue::Decimal),
        ColumnKind::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        ColumnKind::DateTime => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(SqlValue::DateTime),
        ColumnKind::Time => parse_time(&text).map(SqlValue::Time),
        ColumnKind::Text | ColumnKind::Binary => None,
    };
    parsed.unwrap_or(SqlValue::Text(text))
}

/// Parse the text form of a TIME column, `[-]H:MM:SS[.ffffff]`. Hours may
/// exceed 23.
fn parse_time(text: &str) -> Option<Duration> {
    let (neg, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (clock, fraction) = match body.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (body, None),
    };
    let mut parts = clock.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    let micros = match fraction {
        Some(f) if !f.is_empty() && f.len() <= 6 && f.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{:0<6}", f).parse::<i64>().ok()?
        }
        Some(_) => return None,
        None => 0,
    };

    let magnitude = Duration::hours(hours)
        + Duration::minutes(minutes)
        + Duration::seconds(seconds)
        + Duration::microseconds(micros);
    Some(if neg { -magnitude } else { magnitude })
}
