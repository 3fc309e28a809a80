use crate::core::column::Columns;
use crate::records::row::Row;
use serde::{Deserialize, Serialize};

/// A fully-materialized slice of rows with its schema. Used for the
/// leading sample buffer handed to schema inference and DDL generation,
/// and as the result shape of small driver queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Columns,
    pub rows: Vec<Row>,
    /// When set, inference widens conservatively instead of picking the
    /// narrowest type the sample happens to fit.
    #[serde(default)]
    pub safe_inference: bool,
    /// Set once the columns reflect an inference pass (or were read from
    /// a source that already knows its types).
    #[serde(default)]
    pub inferred: bool,
}

impl Dataset {
    pub fn new(columns: Columns) -> Self {
        Dataset {
            columns,
            rows: Vec::new(),
            safe_inference: false,
            inferred: false,
        }
    }

    pub fn from_rows(columns: Columns, rows: Vec<Row>) -> Self {
        Dataset {
            columns,
            rows,
            safe_inference: false,
            inferred: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}
