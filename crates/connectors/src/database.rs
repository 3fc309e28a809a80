use crate::{
    conn::ConnKind,
    dialect::Dialect,
    error::DbError,
};
use async_trait::async_trait;
use dataflow::{checksum::ColumnStats, infer, Dataflow};
use model::core::column::Columns;
use model::records::dataset::Dataset;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Capability bundle every database endpoint offers the engine. The
/// engine composes these into read paths, staged loads, and promotions;
/// drivers never see task semantics.
#[async_trait]
pub trait DatabaseDriver: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ConnKind;

    fn dialect(&self) -> Dialect {
        self.kind().dialect()
    }

    /// Driver tuning properties (`use_bulk`, `allow_bulk_import`, ...).
    fn set_prop(&self, key: &str, value: &str);
    fn prop(&self, key: &str) -> Option<String>;

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    /// Executes a statement, returning the affected row count.
    async fn exec(&self, sql: &str) -> Result<u64, DbError>;

    /// Runs a query and materializes the full result.
    async fn query(&self, sql: &str) -> Result<Dataset, DbError>;

    /// Resolves the column shape of a query without materializing rows.
    async fn get_sql_columns(&self, sql: &str) -> Result<Columns, DbError> {
        Ok(self.query(sql).await?.columns)
    }

    async fn get_columns(&self, table: &str) -> Result<Columns, DbError>;
    async fn get_count(&self, table: &str) -> Result<u64, DbError>;
    async fn table_exists(&self, table: &str) -> Result<bool, DbError>;
    async fn drop_table(&self, table: &str) -> Result<(), DbError>;

    /// Streams a query result as a lazy dataflow tied to the task's
    /// cancellation context.
    async fn bulk_export_flow(
        &self,
        sql: &str,
        cancel: CancellationToken,
    ) -> Result<Dataflow, DbError>;

    /// Streams a dataflow into a table, returning rows written.
    async fn bulk_import_flow(&self, table: &str, flow: &mut Dataflow) -> Result<u64, DbError>;

    /// Computes per-column checksums over `table` and compares them to
    /// the stream-side stats, index-aligned with `columns`.
    async fn compare_checksums(
        &self,
        table: &str,
        columns: &Columns,
        stats: &[ColumnStats],
    ) -> Result<(), DbError>;

    /// Merges `src_table` into `tgt_table` keyed by `primary_key`,
    /// returning the number of rows actually inserted or changed.
    async fn upsert(
        &self,
        src_table: &str,
        tgt_table: &str,
        primary_key: &[String],
    ) -> Result<u64, DbError>;

    /// Atomically renames `src_table` over `tgt_table`.
    async fn swap_table(&self, src_table: &str, tgt_table: &str) -> Result<(), DbError>;

    /// Widens existing column types to fit the given schema.
    async fn optimize_table(&self, table: &str, columns: &Columns) -> Result<(), DbError>;

    async fn begin(&self, serializable: bool) -> Result<(), DbError>;
    async fn commit(&self) -> Result<(), DbError>;
    async fn rollback(&self) -> Result<(), DbError>;

    async fn list_schemata(&self) -> Result<Vec<String>, DbError>;
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DbError>;

    /// Whether the driver can ingest directly from an object-store URL
    /// of the given scheme, bypassing the row pipe.
    fn supports_direct_copy(&self, _scheme: &str) -> bool {
        false
    }

    /// Direct ingestion from a filesystem URL. Only called after
    /// `supports_direct_copy` returned true for the URL's scheme.
    async fn copy_direct(
        &self,
        _table: &str,
        _url: &str,
        _credentials: &HashMap<String, String>,
    ) -> Result<u64, DbError> {
        Err(DbError::Unsupported("direct copy".to_string()))
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect().quote(ident)
    }

    fn template(&self, key: &'static str) -> Option<&'static str> {
        self.dialect().template(key)
    }

    /// Renders CREATE TABLE DDL from a sample dataset, inferring the
    /// schema first when the sample has not been typed yet.
    fn generate_ddl(&self, table: &str, dataset: &Dataset) -> Result<String, DbError> {
        let mut columns = dataset.columns.clone();
        if !dataset.inferred {
            infer::infer_columns(&mut columns, &dataset.rows, dataset.safe_inference);
        }
        if columns.is_empty() {
            return Err(DbError::Schema(format!(
                "no columns to create table '{table}' from"
            )));
        }

        let dialect = self.dialect();
        let cols = columns
            .iter()
            .map(|c| {
                let rendered = dialect.render_type(c.ctype, c.max_length);
                let null = if c.nullable { "" } else { " not null" };
                format!("{} {rendered}{null}", dialect.quote(&c.name))
            })
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("create table {table} ({cols})"))
    }

    /// Matches target field names against staged field names
    /// case-insensitively, returning the target spellings in staged
    /// order. A target column with no staged counterpart is an error.
    fn validate_column_names(
        &self,
        target: &Columns,
        staged: &Columns,
    ) -> Result<Vec<String>, DbError> {
        let mut fields = Vec::with_capacity(staged.len());
        for column in staged.iter() {
            match target.get(&column.name) {
                Some(tgt) => fields.push(tgt.name.clone()),
                None => {
                    return Err(DbError::ColumnMissing(format!(
                        "'{}' has no match among target columns [{}]",
                        column.name,
                        target.names().join(", ")
                    )))
                }
            }
        }
        Ok(fields)
    }

    /// Renders the select-list that moves staged columns into the final
    /// table, casting where the staged type differs from the target's.
    fn cast_columns_for_select(&self, staged: &Columns, target: &Columns) -> Vec<String> {
        let dialect = self.dialect();
        staged
            .iter()
            .map(|src| match target.get(&src.name) {
                Some(tgt) if tgt.ctype != src.ctype => format!(
                    "cast({} as {})",
                    dialect.quote(&src.name),
                    dialect.render_type(tgt.ctype, tgt.max_length)
                ),
                _ => dialect.quote(&src.name),
            })
            .collect()
    }
}
