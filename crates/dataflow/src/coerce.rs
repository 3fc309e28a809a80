use crate::error::FlowError;
use bigdecimal::BigDecimal;
use model::core::{
    column::Columns,
    column_type::ColumnType,
    value::{parse_temporal_text, Value},
};
use model::records::row::Row;
use std::str::FromStr;

/// Casts a value to the given column type. NULL passes through; a value
/// that cannot be represented in the target type without loss is an
/// error rather than a silent coercion.
pub fn cast_value(value: Value, target: ColumnType) -> Result<Value, FlowError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if value.column_type() == Some(target) {
        return Ok(value);
    }

    match target {
        ColumnType::Bool => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| FlowError::cast(&value, target)),
        ColumnType::Integer => value
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| FlowError::cast(&value, target)),
        ColumnType::Decimal => match &value {
            Value::Text(s) => BigDecimal::from_str(s.trim())
                .map(Value::Decimal)
                .map_err(|_| FlowError::cast(&value, target)),
            _ => value
                .as_big_decimal()
                .map(Value::Decimal)
                .ok_or_else(|| FlowError::cast(&value, target)),
        },
        ColumnType::Float => value
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| FlowError::cast(&value, target)),
        ColumnType::Text => value
            .as_string()
            .map(Value::Text)
            .ok_or_else(|| FlowError::cast(&value, target)),
        ColumnType::Timestamp => value
            .as_timestamp()
            .map(Value::Timestamp)
            .ok_or_else(|| FlowError::cast(&value, target)),
        ColumnType::Datetime => match &value {
            Value::Timestamp(ts) => Ok(Value::Datetime(ts.naive_utc())),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(Value::Datetime)
                .ok_or_else(|| FlowError::cast(&value, target)),
            Value::Text(s) => match parse_temporal_text(s) {
                Some(parsed) => cast_value(parsed, target),
                None => Err(FlowError::cast(&value, target)),
            },
            _ => Err(FlowError::cast(&value, target)),
        },
        ColumnType::Date => match &value {
            Value::Timestamp(ts) => Ok(Value::Date(ts.date_naive())),
            Value::Datetime(dt) => Ok(Value::Date(dt.date())),
            Value::Text(s) => match parse_temporal_text(s) {
                Some(parsed) => cast_value(parsed, target),
                None => Err(FlowError::cast(&value, target)),
            },
            _ => Err(FlowError::cast(&value, target)),
        },
        ColumnType::Json => match &value {
            Value::Text(s) => serde_json::from_str(s)
                .map(Value::Json)
                .map_err(|_| FlowError::cast(&value, target)),
            _ => Err(FlowError::cast(&value, target)),
        },
        ColumnType::Binary => match value {
            Value::Text(s) => Ok(Value::Binary(s.into_bytes())),
            other => Err(FlowError::cast(&other, target)),
        },
    }
}

/// Casts every cell of `row` to its column's type in place.
pub fn cast_row(row: &mut Row, columns: &Columns) -> Result<(), FlowError> {
    for (idx, column) in columns.iter().enumerate() {
        if let Some(cell) = row.get_mut(idx) {
            let taken = std::mem::replace(cell, Value::Null);
            *cell = cast_value(taken, column.ctype)?;
        }
    }
    // short rows pad with NULL
    while row.len() < columns.len() {
        row.push(Value::Null);
    }
    Ok(())
}
