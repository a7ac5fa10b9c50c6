//! Static column descriptor for the event table, value coercion and DDL.
//!
//! The event API returns loosely typed JSON: numeric fields usually arrive as
//! strings and optional fields as empty strings. [`Column::coerce`] turns each
//! value into a typed [`SqlValue`] against fixed bounds declared here; a value
//! that does not fit is reported as a [`FieldError`] instead of widening the
//! column at runtime.

use crate::error::{Error, Result};
use crate::source::EventRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;

/// Textual event date column the derived date is computed from.
pub const EVENT_DATE_COLUMN: &str = "event_date";

/// Derived date column refreshed after each append.
pub const DATE_COLUMN: &str = "date";

/// Unix timestamp column used for the "most recent record" statistic.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Ordered column descriptor for the event table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSchema {
    /// Columns in table order
    pub columns: Vec<Column>,
    /// Natural identifier column
    pub id_column: String,
}

impl EventSchema {
    /// Create a schema from columns.
    pub fn new(columns: Vec<Column>, id_column: impl Into<String>) -> Self {
        Self {
            columns,
            id_column: id_column.into(),
        }
    }

    /// The ACLED event table.
    pub fn acled() -> Self {
        use ColumnType::*;

        let varchar = |n| Varchar { max_length: n };
        let columns = vec![
            Column::new("event_id_cnty", varchar(32)).nullable(false),
            Column::new(EVENT_DATE_COLUMN, varchar(10)).nullable(false),
            Column::new("year", Integer),
            Column::new("time_precision", Integer),
            Column::new("disorder_type", varchar(128)),
            Column::new("event_type", varchar(128)),
            Column::new("sub_event_type", varchar(128)),
            Column::new("actor1", varchar(512)),
            Column::new("assoc_actor_1", Text),
            Column::new("inter1", varchar(128)),
            Column::new("actor2", varchar(512)),
            Column::new("assoc_actor_2", Text),
            Column::new("inter2", varchar(128)),
            Column::new("interaction", varchar(128)),
            Column::new("civilian_targeting", varchar(64)),
            Column::new("iso", Integer),
            Column::new("region", varchar(128)),
            Column::new("country", varchar(128)),
            Column::new("admin1", varchar(256)),
            Column::new("admin2", varchar(256)),
            Column::new("admin3", varchar(256)),
            Column::new("location", varchar(512)),
            Column::new("latitude", Double),
            Column::new("longitude", Double),
            Column::new("geo_precision", Integer),
            Column::new("source", Text),
            Column::new("source_scale", varchar(512)),
            Column::new("notes", Text),
            Column::new("fatalities", Integer),
            Column::new("tags", Text),
            Column::new(TIMESTAMP_COLUMN, BigInt),
            Column::new(DATE_COLUMN, Date).derived(true),
        ];

        Self::new(columns, "event_id_cnty")
    }

    /// Use a different identifier column.
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Check the descriptor is usable. Runs once when a session is built.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::schema("schema has no columns"));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(Error::schema("column with empty name"));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::schema(format!("duplicate column '{}'", column.name)));
            }
            if let ColumnType::Varchar { max_length: 0 } = column.column_type {
                return Err(Error::schema(format!("column '{}' has zero length", column.name)));
            }
            if column.derived && column.column_type != ColumnType::Date {
                return Err(Error::schema(format!(
                    "derived column '{}' must be a date",
                    column.name
                )));
            }
        }

        match self.get_column(&self.id_column) {
            Some(c) if !c.derived => {}
            Some(_) => {
                return Err(Error::schema(format!(
                    "identifier column '{}' cannot be derived",
                    self.id_column
                )));
            }
            None => {
                return Err(Error::schema(format!(
                    "identifier column '{}' is not in the schema",
                    self.id_column
                )));
            }
        }

        if self.columns.iter().any(|c| c.derived) && self.get_column(EVENT_DATE_COLUMN).is_none() {
            return Err(Error::schema(format!(
                "derived date needs a '{}' column",
                EVENT_DATE_COLUMN
            )));
        }

        Ok(())
    }

    /// Get column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns written by an append, in order.
    pub fn appendable_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.derived)
    }

    /// Coerce records into typed rows.
    ///
    /// Records with any field that does not fit its column are returned as
    /// rejected and left out of the batch. Fields not in the schema are ignored.
    /// The identifier is stored in the normalized form [`EventRecord::id`]
    /// returns, so it matches what deduplication compared.
    pub fn prepare_batch(&self, records: &[EventRecord]) -> (PreparedBatch, Vec<RejectedRecord>) {
        let columns: Vec<Column> = self.appendable_columns().cloned().collect();
        let mut rows = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();

        for record in records {
            let mut row = Vec::with_capacity(columns.len());
            let mut errors = Vec::new();
            let id = record.id(&self.id_column).map(JsonValue::String);

            for column in &columns {
                let value = if column.name == self.id_column {
                    id.as_ref()
                } else {
                    record.get(&column.name)
                };
                match column.coerce(value) {
                    Ok(v) => row.push(v),
                    Err(e) => errors.push(e),
                }
            }

            if errors.is_empty() {
                rows.push(row);
            } else {
                rejected.push(RejectedRecord {
                    id: record.id(&self.id_column),
                    errors,
                });
            }
        }

        (PreparedBatch { columns, rows }, rejected)
    }

    /// Generate CREATE TABLE DDL for PostgreSQL.
    pub fn to_postgres_ddl(&self, schema: &str, table: &str) -> String {
        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", qualified_name(schema, table));

        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                format!(
                    "    {} {}{}",
                    quote_ident(&c.name),
                    c.column_type.to_postgres(),
                    c.constraints_ddl()
                )
            })
            .collect();

        ddl.push_str(&col_defs.join(",\n"));
        ddl.push_str(&format!(",\n    PRIMARY KEY ({})", quote_ident(&self.id_column)));
        ddl.push_str("\n)");
        ddl
    }
}

impl Default for EventSchema {
    fn default() -> Self {
        Self::acled()
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column type
    pub column_type: ColumnType,
    /// Is nullable
    pub nullable: bool,
    /// Computed in the database rather than appended
    pub derived: bool,
}

impl Column {
    /// Create a new column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            derived: false,
        }
    }

    /// Set nullable.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set derived.
    pub fn derived(mut self, derived: bool) -> Self {
        self.derived = derived;
        self
    }

    fn constraints_ddl(&self) -> String {
        if self.nullable {
            String::new()
        } else {
            " NOT NULL".to_string()
        }
    }

    /// Convert a JSON field into a typed value for this column.
    pub fn coerce(&self, value: Option<&JsonValue>) -> std::result::Result<SqlValue, FieldError> {
        let err = |kind| FieldError {
            column: self.name.clone(),
            kind,
        };

        let value = match value {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) if s.is_empty() && !self.column_type.is_textual() => None,
            Some(v) => Some(v),
        };

        let Some(value) = value else {
            return if self.nullable {
                Ok(SqlValue::Null)
            } else {
                Err(err(FieldErrorKind::Missing))
            };
        };

        match self.column_type {
            ColumnType::Varchar { max_length } => {
                let s = scalar_text(value).ok_or_else(|| err(FieldErrorKind::Unsupported))?;
                let len = s.chars().count();
                if len > max_length as usize {
                    return Err(err(FieldErrorKind::TooLong { max_length, len }));
                }
                Ok(SqlValue::Text(s))
            }
            ColumnType::Text => match value {
                JsonValue::Array(_) | JsonValue::Object(_) => Ok(SqlValue::Text(value.to_string())),
                other => scalar_text(other)
                    .map(SqlValue::Text)
                    .ok_or_else(|| err(FieldErrorKind::Unsupported)),
            },
            ColumnType::Integer => {
                let n = integer_value(value).ok_or_else(|| err(FieldErrorKind::NotNumeric))?;
                i32::try_from(n)
                    .map(SqlValue::Int)
                    .map_err(|_| err(FieldErrorKind::OutOfRange))
            }
            ColumnType::BigInt => integer_value(value)
                .map(SqlValue::BigInt)
                .ok_or_else(|| err(FieldErrorKind::NotNumeric)),
            ColumnType::Double => float_value(value)
                .map(SqlValue::Double)
                .ok_or_else(|| err(FieldErrorKind::NotNumeric)),
            ColumnType::Date => match value {
                JsonValue::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(SqlValue::Date)
                    .map_err(|_| err(FieldErrorKind::InvalidDate)),
                _ => Err(err(FieldErrorKind::InvalidDate)),
            },
        }
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn integer_value(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Column types used by the event table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Bounded string
    Varchar {
        /// Maximum length in characters
        max_length: u32,
    },
    /// Unbounded string
    Text,
    /// 4-byte integer
    Integer,
    /// 8-byte integer
    BigInt,
    /// Double precision float
    Double,
    /// Calendar date
    Date,
}

impl ColumnType {
    /// Convert to PostgreSQL type string.
    pub fn to_postgres(&self) -> String {
        match self {
            ColumnType::Varchar { max_length } => format!("VARCHAR({})", max_length),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Double => "DOUBLE PRECISION".into(),
            ColumnType::Date => "DATE".into(),
        }
    }

    /// Parameter cast used when binding values of this type.
    pub fn param_cast(&self) -> &'static str {
        match self {
            ColumnType::Varchar { .. } | ColumnType::Text => "text",
            ColumnType::Integer => "int4",
            ColumnType::BigInt => "int8",
            ColumnType::Double => "float8",
            ColumnType::Date => "date",
        }
    }

    fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Varchar { .. } | ColumnType::Text)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_postgres())
    }
}

/// A typed value ready to be bound as a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Text
    Text(String),
    /// 4-byte integer
    Int(i32),
    /// 8-byte integer
    BigInt(i64),
    /// Double precision float
    Double(f64),
    /// Calendar date
    Date(NaiveDate),
}

/// Why a field could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldErrorKind {
    /// Required value absent
    #[error("missing required value")]
    Missing,
    /// String longer than the declared bound
    #[error("length {len} exceeds maximum {max_length}")]
    TooLong {
        /// Declared bound
        max_length: u32,
        /// Observed length
        len: usize,
    },
    /// Not a number
    #[error("not a number")]
    NotNumeric,
    /// Number does not fit the column
    #[error("number out of range")]
    OutOfRange,
    /// Not a YYYY-MM-DD date
    #[error("not a YYYY-MM-DD date")]
    InvalidDate,
    /// Value shape not storable in the column
    #[error("unsupported value")]
    Unsupported,
}

/// A field that failed coercion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("column '{column}': {kind}")]
pub struct FieldError {
    /// Column name
    pub column: String,
    /// Failure kind
    pub kind: FieldErrorKind,
}

/// A record left out of an append.
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    /// Record identifier, when present
    pub id: Option<String>,
    /// Field errors
    pub errors: Vec<FieldError>,
}

/// Typed rows ready for a bulk append.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    /// Appended columns, in order
    pub columns: Vec<Column>,
    /// One value per column per row
    pub rows: Vec<Vec<SqlValue>>,
}

impl PreparedBatch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Quote a SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quoted `schema.table`.
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> EventRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_acled_schema_is_valid() {
        let schema = EventSchema::acled();
        schema.validate().unwrap();
        assert_eq!(schema.appendable_columns().count(), schema.columns.len() - 1);
        assert!(schema.appendable_columns().all(|c| c.name != DATE_COLUMN));
    }

    #[test]
    fn test_validate_rejects_unknown_id_column() {
        let err = EventSchema::acled()
            .with_id_column("event_id")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("event_id"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let schema = EventSchema::new(
            vec![
                Column::new("id", ColumnType::Text),
                Column::new("id", ColumnType::Integer),
            ],
            "id",
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_derived_without_event_date() {
        let schema = EventSchema::new(
            vec![
                Column::new("id", ColumnType::Text),
                Column::new("date", ColumnType::Date).derived(true),
            ],
            "id",
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_table_ddl() {
        let ddl = EventSchema::acled().to_postgres_ddl("public", "acled");
        assert!(ddl.contains(r#"CREATE TABLE IF NOT EXISTS "public"."acled""#));
        assert!(ddl.contains(r#""event_id_cnty" VARCHAR(32) NOT NULL"#));
        assert!(ddl.contains(r#""latitude" DOUBLE PRECISION"#));
        assert!(ddl.contains(r#""date" DATE"#));
        assert!(ddl.contains(r#"PRIMARY KEY ("event_id_cnty")"#));
    }

    #[test]
    fn test_coerce_numeric_strings() {
        let year = Column::new("year", ColumnType::Integer);
        assert_eq!(year.coerce(Some(&json!("2023"))).unwrap(), SqlValue::Int(2023));
        assert_eq!(year.coerce(Some(&json!(2023))).unwrap(), SqlValue::Int(2023));
        assert_eq!(year.coerce(Some(&json!(""))).unwrap(), SqlValue::Null);
        assert_eq!(
            year.coerce(Some(&json!("abc"))).unwrap_err().kind,
            FieldErrorKind::NotNumeric
        );
        assert_eq!(
            year.coerce(Some(&json!("9999999999"))).unwrap_err().kind,
            FieldErrorKind::OutOfRange
        );

        let lat = Column::new("latitude", ColumnType::Double);
        assert_eq!(lat.coerce(Some(&json!("12.5"))).unwrap(), SqlValue::Double(12.5));

        let ts = Column::new("timestamp", ColumnType::BigInt);
        assert_eq!(
            ts.coerce(Some(&json!("1700000000"))).unwrap(),
            SqlValue::BigInt(1_700_000_000)
        );
    }

    #[test]
    fn test_coerce_varchar_bounds() {
        let col = Column::new("iso3", ColumnType::Varchar { max_length: 3 });
        assert_eq!(col.coerce(Some(&json!("NGA"))).unwrap(), SqlValue::Text("NGA".into()));
        assert_eq!(col.coerce(Some(&json!(""))).unwrap(), SqlValue::Text(String::new()));
        assert_eq!(
            col.coerce(Some(&json!("NGAX"))).unwrap_err().kind,
            FieldErrorKind::TooLong { max_length: 3, len: 4 }
        );
        // Bounds count characters, not bytes.
        assert!(col.coerce(Some(&json!("Côt"))).is_ok());
    }

    #[test]
    fn test_coerce_required_and_date() {
        let id = Column::new("id", ColumnType::Text).nullable(false);
        assert_eq!(id.coerce(None).unwrap_err().kind, FieldErrorKind::Missing);

        let date = Column::new("date", ColumnType::Date);
        assert_eq!(
            date.coerce(Some(&json!("2024-02-29"))).unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            date.coerce(Some(&json!("29/02/2024"))).unwrap_err().kind,
            FieldErrorKind::InvalidDate
        );
    }

    #[test]
    fn test_prepare_batch_rejects_bad_records() {
        let schema = EventSchema::acled();
        let good = record(json!({
            "event_id_cnty": "NIG1",
            "event_date": "2024-01-02",
            "year": "2024",
            "fatalities": "3",
            "latitude": "9.08",
            "timestamp": "1704200000",
            "unknown_field": "ignored"
        }));
        let bad = record(json!({
            "event_id_cnty": "NIG2",
            "event_date": "2024-01-02",
            "year": "twenty"
        }));

        let (batch, rejected) = schema.prepare_batch(&[good, bad]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.columns.len(), schema.appendable_columns().count());
        assert_eq!(batch.rows[0][0], SqlValue::Text("NIG1".into()));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].id.as_deref(), Some("NIG2"));
        assert_eq!(rejected[0].errors[0].column, "year");
    }

    #[test]
    fn test_prepare_batch_stores_normalized_id() {
        let schema = EventSchema::acled();
        let padded = record(json!({
            "event_id_cnty": "  KEN1 ",
            "event_date": "2024-01-02"
        }));
        let blank = record(json!({
            "event_id_cnty": "   ",
            "event_date": "2024-01-02"
        }));

        let (batch, rejected) = schema.prepare_batch(&[padded, blank]);
        assert_eq!(batch.rows[0][0], SqlValue::Text("KEN1".into()));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].errors[0].kind, FieldErrorKind::Missing);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("acled"), "\"acled\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified_name("public", "acled"), "\"public\".\"acled\"");
    }
}
