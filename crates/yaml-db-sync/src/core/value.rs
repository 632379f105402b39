//! SQL value and row types shared by the upsert engine and the executor.
//!
//! Values are fully owned: rows are materialized once per call, fingerprinted,
//! and either written back or reported, so there is no source buffer to borrow
//! from.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::{Result, SyncError};

/// A single scalar read from, or bound into, a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value (bound from config parameters).
    Bool(bool),

    /// Signed integer of any width.
    Int(i64),

    /// Unsigned integer (BIGINT UNSIGNED and friends).
    UInt(u64),

    /// FLOAT / DOUBLE.
    Float(f64),

    /// DECIMAL / NUMERIC, scale preserved.
    Decimal(Decimal),

    /// Character data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// DATE.
    Date(NaiveDate),

    /// DATETIME / TIMESTAMP.
    DateTime(NaiveDateTime),

    /// TIME, a signed duration that may exceed 24 hours.
    Time(Duration),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Canonical string form used for checksums and key comparison.
    ///
    /// Returns `None` for NULL so callers decide how absence is rendered.
    /// Renderings match the Python `str()` of the value the existing sync
    /// jobs read, so checksums already stored in target tables stay valid:
    ///
    /// - floats use shortest round-trip digits, with exponent form outside
    ///   `1e-4..1e16` (`1e-05`, `1e+20`) and a trailing `.0` when integral
    /// - decimals keep their scale and switch to `E` notation for very small
    ///   magnitudes (`0E-10`)
    /// - TIME renders like a `timedelta` (`9:30:00`, `1 day, 2:03:04`)
    /// - binary data renders as a bytes literal (`b'\xde\xad'`)
    /// - datetimes only show fractional seconds when present
    #[must_use]
    pub fn canonical_text(&self) -> Option<String> {
        let text = match self {
            SqlValue::Null => return None,
            SqlValue::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::UInt(n) => n.to_string(),
            SqlValue::Float(f) => format_float(*f),
            SqlValue::Decimal(d) => format_decimal(d),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => format_bytes(b),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::DateTime(dt) => format_datetime(dt),
            SqlValue::Time(t) => format_time(t),
        };
        Some(text)
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // `{:e}` gives the shortest round-trip mantissa, e.g. "1.5e-5"
    let sci = format!("{:e}", f);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if f == 0.0 || (-4..16).contains(&exp) {
        let plain = f.to_string();
        if plain.contains('.') {
            plain
        } else {
            format!("{}.0", plain)
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

fn format_decimal(d: &Decimal) -> String {
    let digits = d.mantissa().unsigned_abs().to_string();
    let exponent = -(d.scale() as i64);
    let leftdigits = exponent + digits.len() as i64;

    let dotplace = if exponent <= 0 && leftdigits > -6 {
        leftdigits
    } else {
        1
    };

    let (intpart, fracpart) = if dotplace <= 0 {
        (
            "0".to_string(),
            format!(".{}{}", "0".repeat((-dotplace) as usize), digits),
        )
    } else if dotplace as usize >= digits.len() {
        (
            format!("{}{}", digits, "0".repeat(dotplace as usize - digits.len())),
            String::new(),
        )
    } else {
        let (int, frac) = digits.split_at(dotplace as usize);
        (int.to_string(), format!(".{}", frac))
    };

    let exp = if leftdigits == dotplace {
        String::new()
    } else {
        format!("E{:+}", leftdigits - dotplace)
    };
    let sign = if d.is_sign_negative() { "-" } else { "" };
    format!("{}{}{}{}", sign, intpart, fracpart, exp)
}

fn format_bytes(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            _ if b as char == quote => {
                out.push('\\');
                out.push(quote);
            }
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push(quote);
    out
}

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

fn format_time(delta: &Duration) -> String {
    let total = delta.num_microseconds().unwrap_or_default();
    // Days carry the sign; the clock part is always positive
    let days = total.div_euclid(MICROS_PER_DAY);
    let rem = total.rem_euclid(MICROS_PER_DAY);
    let secs = rem / 1_000_000;
    let micros = rem % 1_000_000;

    let mut out = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        out.push_str(&format!("{} day{}, ", days, plural));
    }
    out.push_str(&format!(
        "{}:{:02}:{:02}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60
    ));
    if micros != 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(n) => serializer.serialize_i64(*n),
            SqlValue::UInt(n) => serializer.serialize_u64(*n),
            SqlValue::Float(f) => serializer.serialize_f64(*f),
            other => match other.canonical_text() {
                Some(text) => serializer.serialize_str(&text),
                None => serializer.serialize_none(),
            },
        }
    }
}

// From implementations for common types
impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::UInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<Duration> for SqlValue {
    fn from(v: Duration) -> Self {
        SqlValue::Time(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Config parameters arrive as untyped YAML/JSON scalars.
impl From<&serde_json::Value> for SqlValue {
    fn from(v: &serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SqlValue::UInt(u)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            // Nested structures are bound as their JSON text
            other => SqlValue::Text(other.to_string()),
        }
    }
}

/// Convert a list of config parameters into bindable values.
pub fn params_from_json(params: &[serde_json::Value]) -> Vec<SqlValue> {
    params.iter().map(SqlValue::from).collect()
}

/// One tuple read from a table or query.
///
/// Column names are shared between all rows of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        let (columns, values): (Vec<String>, Vec<SqlValue>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Column names in result-set order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Shared handle to the column list.
    pub fn column_handle(&self) -> &Arc<[String]> {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Look up a value by column name, failing if the column is absent.
    pub fn require(&self, column: &str) -> Result<&SqlValue> {
        self.get(column).ok_or_else(|| SyncError::MissingColumn {
            column: column.to_string(),
        })
    }

    /// Check whether two rows carry the same column names in the same order.
    pub fn same_shape(&self, other: &Row) -> bool {
        Arc::ptr_eq(&self.columns, &other.columns) || self.columns == other.columns
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_canonical_text() {
        assert_eq!(SqlValue::Null.canonical_text(), None);
        assert_eq!(SqlValue::Int(-7).canonical_text().as_deref(), Some("-7"));
        assert_eq!(SqlValue::Float(2.0).canonical_text().as_deref(), Some("2.0"));
        assert_eq!(SqlValue::Float(0.25).canonical_text().as_deref(), Some("0.25"));
        assert_eq!(
            SqlValue::Decimal(Decimal::from_str("10.50").unwrap())
                .canonical_text()
                .as_deref(),
            Some("10.50")
        );
        assert_eq!(SqlValue::Bool(true).canonical_text().as_deref(), Some("True"));
    }

    fn text(value: impl Into<SqlValue>) -> String {
        value.into().canonical_text().unwrap()
    }

    #[test]
    fn test_float_rendering_matches_python_repr() {
        assert_eq!(text(1.0), "1.0");
        assert_eq!(text(-0.0), "-0.0");
        assert_eq!(text(0.1), "0.1");
        assert_eq!(text(0.0001), "0.0001");
        assert_eq!(text(0.00001), "1e-05");
        assert_eq!(text(1.5e-7), "1.5e-07");
        assert_eq!(text(1e15), "1000000000000000.0");
        assert_eq!(text(1e16), "1e+16");
        assert_eq!(text(1e20), "1e+20");
        assert_eq!(text(-1.2345e100), "-1.2345e+100");
        assert_eq!(text(f64::NAN), "nan");
        assert_eq!(text(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_decimal_rendering_matches_python_str() {
        let dec = |s: &str| text(Decimal::from_str(s).unwrap());
        assert_eq!(dec("10.50"), "10.50");
        assert_eq!(dec("-3"), "-3");
        assert_eq!(dec("0.000001"), "0.000001");
        assert_eq!(dec("0.0000001"), "1E-7");
        assert_eq!(dec("0.0000000100"), "1.00E-8");
        assert_eq!(dec("0.0000000000"), "0E-10");
        assert_eq!(dec("0.00"), "0.00");
    }

    #[test]
    fn test_time_rendering_matches_timedelta() {
        let hms = |h: i64, m: i64, s: i64| {
            Duration::hours(h) + Duration::minutes(m) + Duration::seconds(s)
        };
        assert_eq!(text(hms(9, 30, 0)), "9:30:00");
        assert_eq!(text(hms(0, 0, 0)), "0:00:00");
        assert_eq!(text(hms(26, 3, 4)), "1 day, 2:03:04");
        assert_eq!(text(hms(838, 59, 59)), "34 days, 22:59:59");
        assert_eq!(text(-Duration::seconds(1)), "-1 day, 23:59:59");
        assert_eq!(
            text(hms(9, 30, 0) + Duration::microseconds(250)),
            "9:30:00.000250"
        );
    }

    #[test]
    fn test_bytes_rendering_matches_python_literal() {
        assert_eq!(text(SqlValue::Bytes(vec![0xde, 0xad])), r"b'\xde\xad'");
        assert_eq!(text(SqlValue::Bytes(b"ab\n\\".to_vec())), r"b'ab\n\\'");
        assert_eq!(text(SqlValue::Bytes(b"it's".to_vec())), r#"b"it's""#);
        assert_eq!(
            text(SqlValue::Bytes(b"'\"".to_vec())),
            r#"b'\'"'"#
        );
        assert_eq!(text(SqlValue::Bytes(Vec::new())), "b''");
    }

    #[test]
    fn test_datetime_rendering() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let whole = date.and_hms_opt(9, 5, 0).unwrap();
        let fractional = date.and_hms_micro_opt(9, 5, 0, 250).unwrap();

        assert_eq!(SqlValue::Date(date).to_string(), "2024-03-01");
        assert_eq!(SqlValue::DateTime(whole).to_string(), "2024-03-01 09:05:00");
        assert_eq!(
            SqlValue::DateTime(fractional).to_string(),
            "2024-03-01 09:05:00.000250"
        );
    }

    #[test]
    fn test_from_json_params() {
        let params = vec![
            serde_json::json!(42),
            serde_json::json!("abc"),
            serde_json::json!(null),
            serde_json::json!(true),
            serde_json::json!(1.5),
        ];
        let values = params_from_json(&params);
        assert_eq!(
            values,
            vec![
                SqlValue::Int(42),
                SqlValue::Text("abc".to_string()),
                SqlValue::Null,
                SqlValue::Bool(true),
                SqlValue::Float(1.5),
            ]
        );
    }

    #[test]
    fn test_row_lookup_and_shape() {
        let a = Row::from_pairs([("id", SqlValue::Int(1)), ("name", SqlValue::from("x"))]);
        let b = Row::from_pairs([("id", SqlValue::Int(2)), ("name", SqlValue::Null)]);
        let c = Row::from_pairs([("id", SqlValue::Int(3))]);

        assert_eq!(a.get("name"), Some(&SqlValue::Text("x".to_string())));
        assert!(a.get("missing").is_none());
        assert!(matches!(
            a.require("missing"),
            Err(SyncError::MissingColumn { .. })
        ));
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn test_row_serializes_in_column_order() {
        let row = Row::from_pairs([
            ("z", SqlValue::Int(1)),
            ("a", SqlValue::Null),
            ("m", SqlValue::from("text")),
        ]);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"z":1,"a":null,"m":"text"}"#);
    }
}
