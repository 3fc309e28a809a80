use lazy_static::lazy_static;
use model::core::column_type::{ColumnType, SqlFamily};
use std::collections::HashMap;

/// Dialect-specific SQL shapes: quoting, statement templates, literal
/// layouts, identifier limits. The engine renders every piece of SQL it
/// issues through this table so drivers stay free of string assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Oracle,
    Snowflake,
    Generic,
}

lazy_static! {
    static ref TEMPLATES: HashMap<(Dialect, &'static str), &'static str> = build_templates();
}

impl Dialect {
    pub fn family(self) -> SqlFamily {
        match self {
            Dialect::Postgres => SqlFamily::Postgres,
            Dialect::MySql => SqlFamily::MySql,
            Dialect::Oracle => SqlFamily::Oracle,
            Dialect::Snowflake => SqlFamily::Snowflake,
            Dialect::Generic => SqlFamily::Generic,
        }
    }

    /// Wraps an identifier in the dialect's quoting characters.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{ident}`"),
            _ => format!(r#""{ident}""#),
        }
    }

    /// Looks up a statement or variable template by key. Falls back to
    /// the generic table for keys a dialect does not override.
    pub fn template(self, key: &'static str) -> Option<&'static str> {
        TEMPLATES
            .get(&(self, key))
            .or_else(|| TEMPLATES.get(&(Dialect::Generic, key)))
            .copied()
    }

    pub fn render_type(self, ctype: ColumnType, max_length: Option<usize>) -> String {
        let base = ctype.db_name(self.family()).into_owned();
        match max_length {
            Some(len) if len > 0 && ctype.supports_length(self.family()) => {
                // length-qualified base types already carry one
                if base.contains('(') {
                    base
                } else {
                    format!("{base}({len})")
                }
            }
            _ => base,
        }
    }

    /// Hard cap on identifier length, where the dialect has one.
    pub fn max_identifier_length(self) -> Option<usize> {
        match self {
            Dialect::Oracle => Some(30),
            _ => None,
        }
    }

    /// Longest base name a reserved temp-table identifier may keep
    /// before its random suffix is appended.
    pub fn temp_base_limit(self) -> Option<usize> {
        match self {
            Dialect::Oracle => Some(24),
            _ => None,
        }
    }

    /// Whether the promotion transaction may request SERIALIZABLE
    /// isolation. Warehouses that reject explicit isolation levels get
    /// the driver default.
    pub fn serializable_promotion(self) -> bool {
        !matches!(self, Dialect::Snowflake)
    }

    /// Conventional view names are folded upper-case on dialects with
    /// upper-cased catalogs.
    pub fn fold_identifier(self, ident: &str) -> String {
        match self {
            Dialect::Oracle | Dialect::Snowflake => ident.to_uppercase(),
            _ => ident.to_string(),
        }
    }
}

/// Substitutes `{key}` placeholders in a template.
pub fn render(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Keys of any `{placeholder}` left unresolved in a SQL string.
pub fn unresolved_placeholders(sql: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = sql;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start + 1..];
        match tail.find('}') {
            Some(end) => {
                let key = &tail[..end];
                if !key.is_empty()
                    && key
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
                {
                    found.push(key.to_string());
                }
                rest = &tail[end + 1..];
            }
            None => break,
        }
    }
    found
}

fn build_templates() -> HashMap<(Dialect, &'static str), &'static str> {
    use Dialect::*;

    let entries: &[(Dialect, &str, &str)] = &[
        // generic statement shapes
        (Generic, "core.limit", "select {fields} from {table} limit {limit}"),
        (Generic, "core.truncate_table", "truncate table {table}"),
        (
            Generic,
            "core.insert_from_table",
            "insert into {tgt_table} ({tgt_fields}) select {src_fields} from {src_table}",
        ),
        (Generic, "core.drop_view", "drop view if exists {view}"),
        (Generic, "core.max_value", "select max({field}) as max_val from {table}"),
        (Generic, "variable.timestamp_layout", "%Y-%m-%d %H:%M:%S%.3f"),
        (Generic, "variable.timestamp_layout_str", "'{value}'"),
        (Generic, "variable.date_layout", "%Y-%m-%d"),
        (Generic, "variable.date_layout_str", "'{value}'"),
        (Generic, "variable.error_filter_table_exists", "already exists"),
        // postgres
        (Postgres, "variable.timestamp_layout_str", "'{value}'::timestamp"),
        // mysql
        (MySql, "core.drop_view", "drop view if exists {view}"),
        // oracle
        (
            Oracle,
            "core.limit",
            "select {fields} from {table} where rownum <= {limit}",
        ),
        (Oracle, "core.drop_view", "drop view {view}"),
        (
            Oracle,
            "variable.timestamp_layout_str",
            "to_timestamp('{value}', 'YYYY-MM-DD HH24:MI:SS.FF3')",
        ),
        (
            Oracle,
            "variable.date_layout_str",
            "to_date('{value}', 'YYYY-MM-DD')",
        ),
        (Oracle, "variable.error_filter_table_exists", "ORA-00955"),
        // snowflake
        (
            Snowflake,
            "variable.timestamp_layout_str",
            "'{value}'::timestamp",
        ),
    ];

    let mut map = HashMap::new();
    for (dialect, key, template) in entries {
        map.insert((*dialect, *key), *template);
    }
    map
}
