use crate::error::TaskError;
use connectors::dialect::{render, unresolved_placeholders};

/// Resolves a stream or pre/post-sql value: when it names an existing
/// file, the file's contents replace it; otherwise the text itself is
/// the SQL.
pub fn get_sql_text(value: &str) -> Result<String, std::io::Error> {
    if std::path::Path::new(value).is_file() {
        return std::fs::read_to_string(value);
    }
    Ok(value.to_string())
}

/// Rejects SQL that still carries `{placeholder}` keys at execution
/// time.
pub fn assert_resolved(sql: &str) -> Result<(), TaskError> {
    match unresolved_placeholders(sql).into_iter().next() {
        Some(key) => Err(TaskError::UnresolvedPlaceholder(key)),
        None => Ok(()),
    }
}

/// Substitutes the conventional `{drop_view}` placeholder against the
/// final table's companion view name.
pub fn substitute_drop_view(
    sql: &str,
    dialect: connectors::Dialect,
    final_table: &str,
) -> String {
    if !sql.contains("{drop_view}") {
        return sql.to_string();
    }
    let view = dialect.fold_identifier(&format!("{final_table}_vw"));
    let drop_view = render(
        dialect.template("core.drop_view").unwrap_or_default(),
        &[("view", view.as_str())],
    );
    sql.replace("{drop_view}", &drop_view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::Dialect;

    #[test]
    fn file_contents_replace_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.sql");
        std::fs::write(&path, "select 1 from t").unwrap();
        assert_eq!(
            get_sql_text(path.to_str().unwrap()).unwrap(),
            "select 1 from t"
        );
        assert_eq!(get_sql_text("select 2 from t").unwrap(), "select 2 from t");
    }

    #[test]
    fn unresolved_placeholder_is_fatal() {
        assert!(assert_resolved("select * from t").is_ok());
        match assert_resolved("select * from t where {upsert_where_cond}") {
            Err(TaskError::UnresolvedPlaceholder(key)) => {
                assert_eq!(key, "upsert_where_cond")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn drop_view_renders_conventional_name() {
        let sql = substitute_drop_view("{drop_view}; analyze t", Dialect::Generic, "public.t");
        assert_eq!(sql, "drop view if exists public.t_vw; analyze t");

        let upper = substitute_drop_view("{drop_view}", Dialect::Snowflake, "t");
        assert!(upper.contains("T_VW"));
    }
}
