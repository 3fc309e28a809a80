use crate::{
    config::{Config, Mode},
    error::TaskError,
    sqltext,
};
use connectors::{
    dialect::render,
    filesystem::FileOptions,
    local,
    registry, ConnKind, DatabaseDriver,
};
use dataflow::Dataflow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Builds the source dataflow for a database stream: resolves the
/// stream to SQL, narrows to columns shared with an existing target,
/// applies the watermark predicate for upsert, and opens the export.
pub async fn read_from_db(
    cfg: &mut Config,
    src: &Arc<dyn DatabaseDriver>,
    cancel: CancellationToken,
) -> Result<Dataflow, TaskError> {
    let mut fields_str = "*".to_string();
    let mut src_table = String::new();
    let mut sql;

    if cfg.source.stream.chars().any(char::is_whitespace) {
        sql = cfg.source.stream.clone();
    } else {
        src_table = match cfg.source.conn.schema() {
            Some(schema) if !cfg.source.stream.contains('.') => {
                format!("{schema}.{}", cfg.source.stream)
            }
            _ => cfg.source.stream.clone(),
        };
        sql = format!("select {fields_str} from {src_table}");
    }

    // a stream ending in .sql names a query file; a table of the same
    // spelling still wins when the file is absent
    if cfg.source.stream.to_lowercase().ends_with(".sql") {
        if std::path::Path::new(&cfg.source.stream).is_file() {
            sql = sqltext::get_sql_text(&cfg.source.stream)?;
            src_table.clear();
        } else if src_table.is_empty() {
            return Err(TaskError::InvalidConfig(format!(
                "stream '{}' names a sql file that does not exist",
                cfg.source.stream
            )));
        } else {
            warn!(stream = %cfg.source.stream, "sql file not found, treating stream as a table");
        }
    }

    // not dropping into an existing target: select only the columns the
    // two sides share
    if !src_table.is_empty() && !cfg.mode.is_drop() && !cfg.target.columns.is_empty() {
        if let Ok(columns) = src
            .get_sql_columns(&format!("select * from {src_table}"))
            .await
        {
            if !columns.is_empty() {
                let common = columns.common(&cfg.target.columns);
                if common.is_empty() {
                    return Err(TaskError::SchemaMismatch(format!(
                        "source [{}] vs target [{}]",
                        columns.names().join(", "),
                        cfg.target.columns.names().join(", ")
                    )));
                }
                fields_str = common.join(", ");
                sql = format!("select {fields_str} from {src_table}");
            }
        }
    }

    // zero-row shape probe
    let probe = render(&sql, &[("upsert_where_cond", "1=0")]);
    cfg.source.columns = src
        .get_sql_columns(&probe)
        .await
        .map_err(|e| TaskError::Db(e))?;

    if cfg.mode == Mode::Upsert {
        let upsert_where_cond = match &cfg.upsert_value {
            Some(value) => render(
                "{update_key} >= {value}",
                &[
                    (
                        "update_key",
                        src.quote(cfg.source.columns.normalize(&cfg.target.update_key))
                            .as_str(),
                    ),
                    ("value", value.as_str()),
                ],
            ),
            None => "1=1".to_string(),
        };

        if !src_table.is_empty() {
            sql = render(
                "select {fields} from {table} where {upsert_where_cond}",
                &[
                    ("fields", fields_str.as_str()),
                    ("table", src_table.as_str()),
                    ("upsert_where_cond", upsert_where_cond.as_str()),
                ],
            );
        } else {
            if !sql.contains("{upsert_where_cond}") {
                return Err(TaskError::MissingUpsertPlaceholder);
            }
            sql = render(&sql, &[("upsert_where_cond", upsert_where_cond.as_str())]);
        }
    } else if cfg.source.limit > 0 && !src_table.is_empty() {
        let template = src
            .template("core.limit")
            .unwrap_or("select {fields} from {table} limit {limit}");
        sql = render(
            template,
            &[
                ("fields", fields_str.as_str()),
                ("table", src_table.as_str()),
                ("limit", cfg.source.limit.to_string().as_str()),
            ],
        );
    }

    sqltext::assert_resolved(&sql)?;
    debug!(sql, "exporting source stream");

    let flow = src.bulk_export_flow(&sql, cancel).await?;
    Ok(flow)
}

/// Builds the source dataflow for a file stream, or standard input when
/// no URL is set.
pub async fn read_from_file(
    cfg: &mut Config,
    cancel: CancellationToken,
) -> Result<Dataflow, TaskError> {
    if cfg.options.stdin || cfg.source.conn.url.is_empty() {
        debug!("reading csv from standard input");
        let flow = local::stdin_dataflow(cancel).await?;
        return Ok(flow);
    }

    let info = &cfg.source.conn;
    let fs = registry::filesystem(info)
        .map_err(|e| TaskError::connect("could not obtain filesystem client", e))?;
    let options = FileOptions::infer(info.base_url(), &cfg.source.options.0)?;

    let mut flow = fs.read_dataflow(info.base_url(), &options, cancel).await?;

    // a single plain file can be handed to targets with a direct load path
    if info.kind == ConnKind::File && local::url_to_path(info.base_url()).is_file() {
        let path = local::url_to_path(info.base_url());
        flow.fs_url = Some(format!("file://{}", path.display()));
    }

    Ok(flow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::memory::MemoryDriver;
    use model::core::{column::Columns, column_type::ColumnType};

    async fn seeded_driver(url: &str) -> Arc<dyn DatabaseDriver> {
        let driver = MemoryDriver::connect(url);
        let _ = driver.drop_table("t1").await;
        driver
            .exec("create table t1 (\"id\" bigint, \"name\" text, \"extra\" text)")
            .await
            .unwrap();
        Arc::new(driver)
    }

    fn base_config(url: &str) -> Config {
        let mut cfg = Config::from_str(&format!(
            "source: {{conn: '{url}', stream: t1}}\ntarget: {{conn: '{url}', object: t2}}"
        ))
        .unwrap();
        cfg.prepare().unwrap();
        cfg
    }

    #[tokio::test]
    async fn table_stream_selects_common_columns() {
        let url = "memory://read_common";
        let src = seeded_driver(url).await;
        let mut cfg = base_config(url);
        cfg.target.columns = Columns::from_names(&["ID", "NAME"], ColumnType::Text);

        let flow = read_from_db(&mut cfg, &src, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(flow.columns.names(), vec!["id", "name"]);
        assert_eq!(cfg.source.columns.len(), 2);
    }

    #[tokio::test]
    async fn disjoint_columns_fail_schema_mismatch() {
        let url = "memory://read_disjoint";
        let src = seeded_driver(url).await;
        let mut cfg = base_config(url);
        cfg.target.columns = Columns::from_names(&["other"], ColumnType::Text);

        match read_from_db(&mut cfg, &src, CancellationToken::new()).await {
            Err(TaskError::SchemaMismatch(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn custom_sql_upsert_requires_placeholder() {
        let url = "memory://read_placeholder";
        let src = seeded_driver(url).await;
        let mut cfg = base_config(url);
        cfg.mode = Mode::Upsert;
        cfg.target.primary_key = vec!["id".to_string()];
        cfg.target.update_key = "id".to_string();
        cfg.source.stream = "select id, name from t1".to_string();

        match read_from_db(&mut cfg, &src, CancellationToken::new()).await {
            Err(TaskError::MissingUpsertPlaceholder) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upsert_with_watermark_filters_rows() {
        let url = "memory://read_watermark";
        let src = seeded_driver(url).await;
        src.exec("insert into t1 (\"id\", \"name\", \"extra\") select \"id\", \"name\", \"extra\" from t1")
            .await
            .ok();
        let mut cfg = base_config(url);
        cfg.mode = Mode::Upsert;
        cfg.target.primary_key = vec!["id".to_string()];
        cfg.target.update_key = "id".to_string();
        cfg.upsert_value = Some("5".to_string());

        let mut flow = read_from_db(&mut cfg, &src, CancellationToken::new())
            .await
            .unwrap();
        // seeded table is empty; the predicate still has to parse and run
        assert!(flow.next_row().await.is_none());
    }
}
