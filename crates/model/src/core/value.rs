use crate::core::column_type::ColumnType;
use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A single typed cell flowing through the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Decimal(BigDecimal),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Datetime(NaiveDateTime),
    Date(NaiveDate),
    Json(serde_json::Value),
    Binary(Vec<u8>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Int(_) => Some(ColumnType::Integer),
            Value::Decimal(_) => Some(ColumnType::Decimal),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Datetime(_) => Some(ColumnType::Datetime),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Json(_) => Some(ColumnType::Json),
            Value::Binary(_) => Some(ColumnType::Binary),
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(*v as i64),
            Value::Int(v) => Some(*v),
            Value::Decimal(v) => v.to_i64(),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(v) => v.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(*v as f64),
            Value::Decimal(v) => v.to_f64(),
            Value::Float(v) => Some(*v),
            Value::Text(v) => v.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_big_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Bool(v) => Some(BigDecimal::from(*v as i64)),
            Value::Int(v) => Some(BigDecimal::from(*v)),
            Value::Decimal(v) => Some(v.clone()),
            Value::Float(v) => BigDecimal::from_f64(*v),
            Value::Text(v) => BigDecimal::from_str(v.trim()).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::Text(v) => match v.trim().to_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(true),
                "false" | "f" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Plain string form, without SQL quoting. `None` for binary and NULL.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Decimal(v) => Some(v.normalized().to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Timestamp(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            Value::Datetime(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            Value::Date(v) => Some(v.to_string()),
            Value::Json(v) => Some(v.to_string()),
            Value::Binary(_) => None,
            Value::Null => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(v) => Some(*v),
            Value::Datetime(v) => Some(Utc.from_utc_datetime(v)),
            Value::Date(v) => v.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt)),
            Value::Text(v) => parse_temporal_text(v).and_then(|p| p.as_timestamp()),
            _ => None,
        }
    }

    /// Ordering across values of compatible type classes; `None` when
    /// the classes cannot be compared.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        if let (Some(a), Some(b)) = (self.as_big_decimal(), other.as_big_decimal()) {
            return Some(a.cmp(&b));
        }
        if let (Some(a), Some(b)) = (self.as_timestamp(), other.as_timestamp()) {
            return Some(a.cmp(&b));
        }
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Approximate in-memory footprint, used for flow byte counters.
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Bool(_) => 1,
            Value::Int(_) => 8,
            Value::Decimal(v) => v.to_string().len(),
            Value::Float(_) => 8,
            Value::Text(v) => v.len(),
            Value::Timestamp(_) | Value::Datetime(_) => 8,
            Value::Date(_) => 4,
            Value::Json(v) => v.to_string().len(),
            Value::Binary(v) => v.len(),
            Value::Null => 0,
        }
    }

    /// CSV cell encoding; NULL becomes the empty cell.
    pub fn encode_csv(&self) -> String {
        match self {
            Value::Binary(v) => hex_encode(v),
            Value::Null => String::new(),
            other => other.as_string().unwrap_or_default(),
        }
    }
}

/// Parses a text cell into the most specific temporal value it matches.
pub fn parse_temporal_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(Value::Timestamp(ts.with_timezone(&Utc)));
    }
    for layout in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(Value::Datetime(dt));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(Value::Date(d));
    }
    None
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            acc.push_str(&format!("{b:02x}"));
            acc
        })
}

impl fmt::Display for Value {
    /// SQL literal form with embedded single quotes doubled.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{}", v.normalized()),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Value::Timestamp(v) => write!(f, "'{}'", v.format("%Y-%m-%d %H:%M:%S%.6f")),
            Value::Datetime(v) => write!(f, "'{}'", v.format("%Y-%m-%d %H:%M:%S%.6f")),
            Value::Date(v) => write!(f, "'{v}'"),
            Value::Json(v) => write!(f, "'{}'", v.to_string().replace('\'', "''")),
            Value::Binary(v) => write!(f, "'{}'", hex_encode(v)),
            Value::Null => write!(f, "NULL"),
        }
    }
}
