use crate::core::column_type::ColumnType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named, typed column of a stream or table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ctype: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Longest observed/declared text or binary length, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: &str, ctype: ColumnType) -> Self {
        Column {
            name: name.to_string(),
            ctype,
            nullable: true,
            max_length: None,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ctype)
    }
}

/// Ordered column schema. Name lookups are case-insensitive, matching
/// how identifier comparison behaves across target dialects.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Columns(pub Vec<Column>);

impl Columns {
    pub fn new(columns: Vec<Column>) -> Self {
        Columns(columns)
    }

    pub fn from_names(names: &[&str], ctype: ColumnType) -> Self {
        Columns(names.iter().map(|n| Column::new(n, ctype)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|c| c.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.0.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Returns the stored spelling of `name` under case-insensitive
    /// comparison, or `name` itself when absent.
    pub fn normalize<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).map(|c| c.name.as_str()).unwrap_or(name)
    }

    /// Case-insensitive name intersection, preserving `self` order and
    /// spelling.
    pub fn common(&self, other: &Columns) -> Vec<String> {
        self.0
            .iter()
            .filter(|c| other.get(&c.name).is_some())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Placeholder schemas produced by headerless sources name columns
    /// `col_0001`, `col_0002`, ...
    pub fn is_dummy(&self) -> bool {
        !self.0.is_empty()
            && self.0.iter().enumerate().all(|(i, c)| {
                c.name
                    .strip_prefix("col_")
                    .and_then(|n| n.parse::<usize>().ok())
                    == Some(i + 1)
            })
    }

    pub fn dummy(count: usize) -> Self {
        Columns(
            (1..=count)
                .map(|i| Column::new(&format!("col_{i:04}"), ColumnType::Text))
                .collect(),
        )
    }
}

impl IntoIterator for Columns {
    type Item = Column;
    type IntoIter = std::vec::IntoIter<Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Columns {
        Columns::from_names(names, ColumnType::Text)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let c = cols(&["Id", "Name"]);
        assert!(c.get("id").is_some());
        assert_eq!(c.normalize("NAME"), "Name");
        assert_eq!(c.normalize("missing"), "missing");
    }

    #[test]
    fn common_preserves_left_order_and_spelling() {
        let left = cols(&["Id", "Email", "Created_At"]);
        let right = cols(&["created_at", "id"]);
        assert_eq!(left.common(&right), vec!["Id", "Created_At"]);
    }

    #[test]
    fn dummy_detection() {
        assert!(Columns::dummy(3).is_dummy());
        assert!(!cols(&["id", "col_0002"]).is_dummy());
        assert!(!Columns::default().is_dummy());
    }
}
