use model::core::{
    column::Columns,
    column_type::ColumnType,
    value::{parse_temporal_text, Value},
};
use model::records::row::Row;

/// Determines the most specific type a text cell still fits.
pub fn infer_from_text(cell: &str) -> ColumnType {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return ColumnType::Text;
    }

    if matches!(
        trimmed.to_ascii_lowercase().as_str(),
        "true" | "false" | "t" | "f"
    ) {
        return ColumnType::Bool;
    }

    // numeric strings with leading zeros are identifiers, not numbers
    if looks_numeric(trimmed) && !has_leading_zero(trimmed) {
        if trimmed.parse::<i64>().is_ok() {
            return ColumnType::Integer;
        }
        if trimmed.parse::<f64>().is_ok() {
            return if trimmed.contains(['e', 'E']) {
                ColumnType::Float
            } else {
                ColumnType::Decimal
            };
        }
    }

    if let Some(parsed) = parse_temporal_text(trimmed) {
        return parsed.column_type().unwrap_or(ColumnType::Text);
    }

    let bytes = trimmed.as_bytes();
    if (bytes.first() == Some(&b'{') && bytes.last() == Some(&b'}'))
        || (bytes.first() == Some(&b'[') && bytes.last() == Some(&b']'))
    {
        if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
            return ColumnType::Json;
        }
    }

    ColumnType::Text
}

/// The widening join of two inferred types: the narrowest type that can
/// represent values of both without loss.
pub fn widen(a: ColumnType, b: ColumnType) -> ColumnType {
    use ColumnType::*;

    if a == b {
        return a;
    }
    match (a, b) {
        (Bool, Integer) | (Integer, Bool) => Integer,
        (Bool, Decimal) | (Decimal, Bool) => Decimal,
        (Integer, Decimal) | (Decimal, Integer) => Decimal,
        (Integer, Float) | (Float, Integer) => Float,
        (Decimal, Float) | (Float, Decimal) => Decimal,
        (Date, Datetime) | (Datetime, Date) => Datetime,
        (Date, Timestamp) | (Timestamp, Date) => Timestamp,
        (Datetime, Timestamp) | (Timestamp, Datetime) => Timestamp,
        _ => Text,
    }
}

/// Infers the schema of `columns` from a sample of rows, updating each
/// column's type, nullability, and max length in place. Columns whose
/// sample is entirely NULL stay text.
pub fn infer_columns(columns: &mut Columns, rows: &[Row], safe: bool) {
    for (idx, column) in columns.0.iter_mut().enumerate() {
        let mut inferred: Option<ColumnType> = None;
        let mut nullable = false;
        let mut max_length = 0usize;

        for row in rows {
            let value = match row.get(idx) {
                Some(v) => v,
                None => {
                    nullable = true;
                    continue;
                }
            };
            let cell_type = match value {
                Value::Null => {
                    nullable = true;
                    continue;
                }
                Value::Text(s) => {
                    max_length = max_length.max(s.chars().count());
                    infer_from_text(s)
                }
                other => {
                    max_length = max_length.max(other.size_bytes());
                    other.column_type().unwrap_or(ColumnType::Text)
                }
            };
            inferred = Some(match inferred {
                Some(t) => widen(t, cell_type),
                None => cell_type,
            });
        }

        column.ctype = inferred.unwrap_or(ColumnType::Text);
        column.nullable = nullable || rows.is_empty() || column.nullable;
        column.max_length = Some(if safe {
            // leave headroom for rows beyond the sample
            (max_length * 2).max(255)
        } else {
            max_length
        });
    }
}

fn looks_numeric(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'))
        && body.chars().any(|c| c.is_ascii_digit())
}

fn has_leading_zero(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    body.len() > 1 && body.starts_with('0') && !body.starts_with("0.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::column::Column;

    #[test]
    fn text_inference_picks_specific_types() {
        assert_eq!(infer_from_text("42"), ColumnType::Integer);
        assert_eq!(infer_from_text("42.5"), ColumnType::Decimal);
        assert_eq!(infer_from_text("1e10"), ColumnType::Float);
        assert_eq!(infer_from_text("true"), ColumnType::Bool);
        assert_eq!(infer_from_text("2024-05-01"), ColumnType::Date);
        assert_eq!(infer_from_text("2024-05-01 10:00:00"), ColumnType::Datetime);
        assert_eq!(infer_from_text(r#"{"a":1}"#), ColumnType::Json);
        assert_eq!(infer_from_text("hello"), ColumnType::Text);
    }

    #[test]
    fn leading_zeros_stay_text() {
        assert_eq!(infer_from_text("00123"), ColumnType::Text);
        assert_eq!(infer_from_text("0.5"), ColumnType::Decimal);
        assert_eq!(infer_from_text("0"), ColumnType::Integer);
    }

    #[test]
    fn widening_lattice() {
        assert_eq!(widen(ColumnType::Integer, ColumnType::Decimal), ColumnType::Decimal);
        assert_eq!(widen(ColumnType::Date, ColumnType::Timestamp), ColumnType::Timestamp);
        assert_eq!(widen(ColumnType::Integer, ColumnType::Text), ColumnType::Text);
        assert_eq!(widen(ColumnType::Bool, ColumnType::Bool), ColumnType::Bool);
    }

    #[test]
    fn column_inference_from_sample() {
        let mut columns = Columns::new(vec![
            Column::new("id", ColumnType::Text),
            Column::new("amount", ColumnType::Text),
            Column::new("note", ColumnType::Text),
        ]);
        let rows = vec![
            Row::new(vec![
                Value::Text("1".into()),
                Value::Text("10.5".into()),
                Value::Text("ok".into()),
            ]),
            Row::new(vec![
                Value::Text("2".into()),
                Value::Text("11".into()),
                Value::Null,
            ]),
        ];
        infer_columns(&mut columns, &rows, false);
        assert_eq!(columns.0[0].ctype, ColumnType::Integer);
        assert_eq!(columns.0[1].ctype, ColumnType::Decimal);
        assert_eq!(columns.0[2].ctype, ColumnType::Text);
        assert!(columns.0[2].nullable);
    }

    #[test]
    fn safe_inference_leaves_length_headroom() {
        let mut columns = Columns::new(vec![Column::new("name", ColumnType::Text)]);
        let rows = vec![Row::new(vec![Value::Text("abc".into())])];
        infer_columns(&mut columns, &rows, true);
        assert_eq!(columns.0[0].max_length, Some(255));
    }
}
