//! Field specifications and row validation
//!
//! Staging rows are untyped text ([`StagingRecord`]). [`Schema::validate`] is
//! the only way to obtain a [`ValidRecord`], whose values carry their Postgres
//! types so every column binds correctly, NULLs included.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::fmt;

/// Name of the deletion flag column present in every staging table
pub const DELETION_FLAG: &str = "IsDeleted";

/// Characters stripped from both ends of a deletion flag
pub const FLAG_PADDING: [char; 4] = [' ', '\t', '\r', '\n'];

/// Accepted date layouts, tried in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Text limited to `max_len` characters
    Text { max_len: usize },
    Integer,
    Date,
    Boolean,
    /// One of a fixed set of labels
    Enum(&'static [&'static str]),
}

/// One field of a record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, required: false }
    }

    /// Column name used in both staging and authoritative tables
    pub fn column(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    /// Coerce one raw staging value into its typed form
    pub fn coerce(&self, raw: Option<&str>) -> Result<Value, FieldError> {
        let present = raw.filter(|s| !s.trim().is_empty());

        let Some(input) = present else {
            if self.required {
                return Err(FieldError::new(self.name, ErrorKind::Missing, "field required", raw));
            }
            return Ok(Value::null(self.kind));
        };

        match self.kind {
            FieldKind::Text { max_len } => {
                let len = input.chars().count();
                if len > max_len {
                    return Err(FieldError::new(
                        self.name,
                        ErrorKind::StringTooLong,
                        format!("ensure this value has at most {max_len} characters (got {len})"),
                        raw,
                    ));
                }
                Ok(Value::Text(Some(input.to_string())))
            },
            FieldKind::Integer => input
                .trim()
                .parse::<i64>()
                .map(|v| Value::Integer(Some(v)))
                .map_err(|_| {
                    FieldError::new(self.name, ErrorKind::IntParsing, "value is not a valid integer", raw)
                }),
            FieldKind::Date => parse_date(input)
                .map(|d| Value::Date(Some(d)))
                .ok_or_else(|| {
                    FieldError::new(
                        self.name,
                        ErrorKind::DateParsing,
                        "value is not a valid date (expected YYYY-MM-DD or MM/DD/YYYY)",
                        raw,
                    )
                }),
            FieldKind::Boolean => parse_bool(input)
                .map(|b| Value::Bool(Some(b)))
                .ok_or_else(|| {
                    FieldError::new(self.name, ErrorKind::BoolParsing, "value could not be parsed to a boolean", raw)
                }),
            FieldKind::Enum(labels) => {
                let trimmed = input.trim();
                labels
                    .iter()
                    .find(|label| label.eq_ignore_ascii_case(trimmed))
                    .map(|label| Value::Text(Some((*label).to_string())))
                    .ok_or_else(|| {
                        FieldError::new(
                            self.name,
                            ErrorKind::Enum,
                            format!("value is not a valid enumeration member; permitted: {}", labels.join(", ")),
                            raw,
                        )
                    })
            },
        }
    }
}

fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Interpret a staging row's deletion flag
///
/// `true` (any case, [`FLAG_PADDING`] ignored at either end) marks a deletion.
/// Empty and `false` mark an insert candidate. Anything else is invalid.
pub fn parse_deletion_flag(raw: Option<&str>) -> Result<bool, FieldError> {
    match raw.map(|s| s.trim_matches(&FLAG_PADDING[..]).to_ascii_lowercase()) {
        None => Ok(false),
        Some(flag) if flag.is_empty() || flag == "false" => Ok(false),
        Some(flag) if flag == "true" => Ok(true),
        Some(_) => Err(FieldError::new(
            DELETION_FLAG,
            ErrorKind::BoolParsing,
            "deletion flag must be 'true', 'false' or empty",
            raw,
        )),
    }
}

/// Ordered field list of one record type
#[derive(Debug)]
pub struct Schema {
    pub fields: &'static [FieldSpec],
}

impl Schema {
    /// Lower-cased column names in schema order
    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(FieldSpec::column).collect()
    }

    /// Validate an insert candidate, collecting every field failure
    pub fn validate(&self, record: &StagingRecord) -> Result<ValidRecord, ValidationErrors> {
        let mut values = Vec::with_capacity(self.fields.len());
        let mut errors = Vec::new();

        for (index, field) in self.fields.iter().enumerate() {
            match field.coerce(record.value(index)) {
                Ok(value) => values.push(value),
                Err(e) => errors.push(e),
            }
        }

        if let Err(e) = parse_deletion_flag(record.is_deleted.as_deref()) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(ValidRecord { values })
        } else {
            Err(ValidationErrors(errors))
        }
    }
}

/// One pending staging row, values in schema order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingRecord {
    pub id: i64,
    pub values: Vec<Option<String>>,
    pub is_deleted: Option<String>,
}

impl StagingRecord {
    /// Read a row selected as `id, <schema columns...>, isdeleted`
    pub fn from_row(row: &PgRow, width: usize) -> Result<Self, sqlx::Error> {
        let id: i64 = row.try_get(0)?;
        let values = (1..=width)
            .map(|i| row.try_get::<Option<String>, _>(i))
            .collect::<Result<Vec<_>, _>>()?;
        let is_deleted = row.try_get(width + 1)?;

        Ok(Self { id, values, is_deleted })
    }

    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }
}

/// A typed column value ready to bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(Option<String>),
    Integer(Option<i64>),
    Date(Option<NaiveDate>),
    Bool(Option<bool>),
}

impl Value {
    fn null(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text { .. } | FieldKind::Enum(_) => Value::Text(None),
            FieldKind::Integer => Value::Integer(None),
            FieldKind::Date => Value::Date(None),
            FieldKind::Boolean => Value::Bool(None),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(Some(v)) => f.write_str(v),
            Value::Integer(Some(v)) => write!(f, "{v}"),
            Value::Date(Some(v)) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Bool(Some(v)) => write!(f, "{v}"),
            _ => f.write_str("NULL"),
        }
    }
}

/// A staging row that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRecord {
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Missing,
    StringTooLong,
    IntParsing,
    DateParsing,
    BoolParsing,
    Enum,
}

/// Failure of a single field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub kind: ErrorKind,
    pub message: String,
    pub input: Option<String>,
}

impl FieldError {
    pub fn new(field: &str, kind: ErrorKind, message: impl Into<String>, input: Option<&str>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            message: message.into(),
            input: input.map(str::to_string),
        }
    }
}

/// All field failures of one row; serialized as the row's error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.0)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| format!("{}: {}", e.field, e.message)).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}
