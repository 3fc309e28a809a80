use model::core::{column_type::ColumnType, value::Value};

/// Per-column aggregate carried by a stream, mirrored by the target
/// driver after load so both sides can be compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnStats {
    pub total_count: u64,
    pub null_count: u64,
    pub max_length: usize,
    pub checksum: u64,
}

impl ColumnStats {
    pub fn observe(&mut self, ctype: ColumnType, value: &Value) {
        self.total_count += 1;
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        self.max_length = self.max_length.max(value_length(value));
        self.checksum = self.checksum.wrapping_add(checksum_component(ctype, value));
    }

    pub fn merge(&mut self, other: &ColumnStats) {
        self.total_count += other.total_count;
        self.null_count += other.null_count;
        self.max_length = self.max_length.max(other.max_length);
        self.checksum = self.checksum.wrapping_add(other.checksum);
    }
}

/// The additive checksum contribution of one non-null value, keyed by
/// the column's type class. Both the stream side and the driver side
/// must agree on this function for comparison to be meaningful.
pub fn checksum_component(ctype: ColumnType, value: &Value) -> u64 {
    match ctype {
        ColumnType::Bool => value.as_bool().map(u64::from).unwrap_or(0),
        ColumnType::Integer => value.as_i64().map(|v| v.unsigned_abs()).unwrap_or(0),
        ColumnType::Decimal | ColumnType::Float => value
            .as_f64()
            .map(|v| v.abs().round() as u64)
            .unwrap_or(0),
        ColumnType::Timestamp | ColumnType::Datetime | ColumnType::Date => value
            .as_timestamp()
            .map(|ts| ts.timestamp().unsigned_abs())
            .unwrap_or(0),
        ColumnType::Text | ColumnType::Json | ColumnType::Binary => value_length(value) as u64,
    }
}

fn value_length(value: &Value) -> usize {
    match value {
        Value::Text(s) => s.chars().count(),
        Value::Json(j) => j.to_string().len(),
        Value::Binary(b) => b.len(),
        other => other.as_string().map(|s| s.len()).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_checksum_tracks_length() {
        let mut stats = ColumnStats::default();
        stats.observe(ColumnType::Text, &Value::Text("hello".into()));
        stats.observe(ColumnType::Text, &Value::Text("hi".into()));
        stats.observe(ColumnType::Text, &Value::Null);
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.max_length, 5);
        assert_eq!(stats.checksum, 7);
    }

    #[test]
    fn truncation_changes_checksum() {
        let full = checksum_component(ColumnType::Text, &Value::Text("a".repeat(100)));
        let cut = checksum_component(ColumnType::Text, &Value::Text("a".repeat(10)));
        assert_ne!(full, cut);
    }

    #[test]
    fn numeric_checksum_is_sign_insensitive_magnitude() {
        assert_eq!(checksum_component(ColumnType::Integer, &Value::Int(-5)), 5);
        assert_eq!(
            checksum_component(ColumnType::Float, &Value::Float(2.6)),
            3
        );
    }
}
