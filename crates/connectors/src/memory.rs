use crate::{
    conn::ConnKind,
    database::DatabaseDriver,
    error::DbError,
};
use async_trait::async_trait;
use dataflow::{checksum::{checksum_component, ColumnStats}, coerce, Dataflow, Datastream};
use lazy_static::lazy_static;
use model::core::{
    column::{Column, Columns},
    column_type::ColumnType,
    value::Value,
};
use model::records::{dataset::Dataset, row::Row};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// In-process database endpoint. Tables live in a process-wide store
/// keyed by connection URL, so separate "connections" to the same URL
/// observe the same data. Carries the full capability bundle, which
/// makes whole-task runs possible without a server.
#[derive(Debug)]
pub struct MemoryDriver {
    url: String,
    store: Store,
    props: Mutex<HashMap<String, String>>,
    snapshot: Mutex<Option<HashMap<String, MemTable>>>,
}

#[derive(Debug, Clone)]
struct MemTable {
    columns: Columns,
    rows: Vec<Row>,
}

type Store = Arc<RwLock<HashMap<String, MemTable>>>;

lazy_static! {
    static ref STORES: Mutex<HashMap<String, Store>> = Mutex::new(HashMap::new());
}

fn table_key(name: &str) -> String {
    name.trim().trim_matches('"').trim_matches('`').to_lowercase()
}

impl MemoryDriver {
    pub fn connect(url: &str) -> Self {
        let mut stores = STORES.lock().unwrap_or_else(|p| p.into_inner());
        let store = stores
            .entry(url.split('?').next().unwrap_or(url).to_string())
            .or_default()
            .clone();

        // tuning and failure-injection knobs ride in on the query string
        let mut props = HashMap::new();
        if let Some((_, query)) = url.split_once('?') {
            for pair in query.split('&') {
                if let Some((k, v)) = pair.split_once('=') {
                    props.insert(k.to_string(), v.to_string());
                }
            }
        }

        MemoryDriver {
            url: url.to_string(),
            store,
            props: Mutex::new(props),
            snapshot: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn prop_usize(&self, key: &str) -> Option<usize> {
        self.prop(key).and_then(|v| v.parse().ok())
    }

    fn read_table(&self, name: &str) -> Result<MemTable, DbError> {
        let tables = self.store.read().unwrap_or_else(|p| p.into_inner());
        tables
            .get(&table_key(name))
            .cloned()
            .ok_or_else(|| DbError::TableMissing(table_key(name)))
    }

    fn evaluate_select(&self, stmt: &Select) -> Result<Dataset, DbError> {
        let table = self.read_table(&stmt.table)?;

        let mut rows: Vec<Row> = Vec::new();
        for row in &table.rows {
            if stmt.condition.matches(&table.columns, row)? {
                rows.push(row.clone());
            }
        }
        if let Some(limit) = stmt.limit {
            rows.truncate(limit);
        }

        match &stmt.fields {
            Fields::All => {
                let mut dataset = Dataset::from_rows(table.columns.clone(), rows);
                dataset.inferred = true;
                Ok(dataset)
            }
            Fields::Max(field) => {
                let idx = table
                    .columns
                    .position(field)
                    .ok_or_else(|| DbError::ColumnMissing(field.clone()))?;
                let mut max: Option<Value> = None;
                for row in &rows {
                    let value = row.get(idx).cloned().unwrap_or(Value::Null);
                    if value.is_null() {
                        continue;
                    }
                    max = match max {
                        None => Some(value),
                        Some(cur) => {
                            if value.compare(&cur) == Some(std::cmp::Ordering::Greater) {
                                Some(value)
                            } else {
                                Some(cur)
                            }
                        }
                    };
                }
                let column = table.columns.0[idx].clone();
                let mut dataset = Dataset::from_rows(
                    Columns::new(vec![Column {
                        name: "max_val".to_string(),
                        ..column
                    }]),
                    match max {
                        Some(v) => vec![Row::new(vec![v])],
                        None => Vec::new(),
                    },
                );
                dataset.inferred = true;
                Ok(dataset)
            }
            Fields::Named(exprs) => {
                let mut out_columns = Vec::with_capacity(exprs.len());
                let mut indices = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    let idx = table
                        .columns
                        .position(&expr.name)
                        .ok_or_else(|| DbError::ColumnMissing(expr.name.clone()))?;
                    let mut column = table.columns.0[idx].clone();
                    if let Some(cast) = expr.cast_to {
                        column.ctype = cast;
                    }
                    out_columns.push(column);
                    indices.push((idx, expr.cast_to));
                }
                let mut out_rows = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut values = Vec::with_capacity(indices.len());
                    for (idx, cast) in &indices {
                        let value = row.get(*idx).cloned().unwrap_or(Value::Null);
                        let value = match cast {
                            Some(ctype) => coerce::cast_value(value, *ctype)
                                .map_err(|e| DbError::Schema(e.to_string()))?,
                            None => value,
                        };
                        values.push(value);
                    }
                    out_rows.push(Row::new(values));
                }
                let mut dataset = Dataset::from_rows(Columns::new(out_columns), out_rows);
                dataset.inferred = true;
                Ok(dataset)
            }
        }
    }

    fn exec_statement(&self, sql: &str) -> Result<u64, DbError> {
        let stmt = parse_statement(sql)?;
        match stmt {
            Statement::Select(_) => {
                let dataset = self.query_blocking(sql)?;
                Ok(dataset.len() as u64)
            }
            Statement::CreateTable { table, columns } => {
                let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
                let key = table_key(&table);
                if tables.contains_key(&key) {
                    return Err(DbError::sql(
                        format!("table '{key}' already exists"),
                        sql,
                    ));
                }
                tables.insert(key, MemTable { columns, rows: Vec::new() });
                Ok(0)
            }
            Statement::DropTable { table, if_exists } => {
                let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
                let removed = tables.remove(&table_key(&table)).is_some();
                if !removed && !if_exists {
                    return Err(DbError::TableMissing(table_key(&table)));
                }
                Ok(0)
            }
            Statement::Truncate { table } => {
                let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
                let entry = tables
                    .get_mut(&table_key(&table))
                    .ok_or_else(|| DbError::TableMissing(table_key(&table)))?;
                let count = entry.rows.len() as u64;
                entry.rows.clear();
                Ok(count)
            }
            Statement::InsertSelect { target, target_fields, select } => {
                let source = self.evaluate_select(&select)?;
                let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
                let entry = tables
                    .get_mut(&table_key(&target))
                    .ok_or_else(|| DbError::TableMissing(table_key(&target)))?;

                let mut positions = Vec::with_capacity(target_fields.len());
                for field in &target_fields {
                    let pos = entry
                        .columns
                        .position(field)
                        .ok_or_else(|| DbError::ColumnMissing(field.clone()))?;
                    positions.push(pos);
                }

                let width = entry.columns.len();
                let mut inserted = 0u64;
                for row in source.rows {
                    let mut values = vec![Value::Null; width];
                    for (i, pos) in positions.iter().enumerate() {
                        values[*pos] = row.get(i).cloned().unwrap_or(Value::Null);
                    }
                    entry.rows.push(Row::new(values));
                    inserted += 1;
                }
                Ok(inserted)
            }
        }
    }

    fn query_blocking(&self, sql: &str) -> Result<Dataset, DbError> {
        match parse_statement(sql)? {
            Statement::Select(select) => self.evaluate_select(&select),
            _ => Err(DbError::sql("not a query", sql)),
        }
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn kind(&self) -> ConnKind {
        ConnKind::Memory
    }

    fn set_prop(&self, key: &str, value: &str) {
        self.props
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    fn prop(&self, key: &str) -> Option<String> {
        self.props
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    async fn exec(&self, sql: &str) -> Result<u64, DbError> {
        debug!(sql, "memory exec");
        self.exec_statement(sql)
    }

    async fn query(&self, sql: &str) -> Result<Dataset, DbError> {
        debug!(sql, "memory query");
        self.query_blocking(sql)
    }

    async fn get_sql_columns(&self, sql: &str) -> Result<Columns, DbError> {
        // shape probe: evaluate without touching rows
        match parse_statement(sql)? {
            Statement::Select(mut select) => {
                select.condition = Condition::False;
                Ok(self.evaluate_select(&select)?.columns)
            }
            _ => Err(DbError::sql("not a query", sql)),
        }
    }

    async fn get_columns(&self, table: &str) -> Result<Columns, DbError> {
        Ok(self.read_table(table)?.columns)
    }

    async fn get_count(&self, table: &str) -> Result<u64, DbError> {
        Ok(self.read_table(table)?.rows.len() as u64)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        let tables = self.store.read().unwrap_or_else(|p| p.into_inner());
        Ok(tables.contains_key(&table_key(table)))
    }

    async fn drop_table(&self, table: &str) -> Result<(), DbError> {
        let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
        tables.remove(&table_key(table));
        Ok(())
    }

    async fn bulk_export_flow(
        &self,
        sql: &str,
        cancel: CancellationToken,
    ) -> Result<Dataflow, DbError> {
        let dataset = self.query_blocking(sql)?;
        let delay = self.prop_usize("export_delay_us");

        let flow = match delay {
            // trickle the rows through a channel to model a slow source
            Some(us) if us > 0 => {
                let (tx, rx) = mpsc::channel(64);
                let rows = dataset.rows;
                let pause = Duration::from_micros(us as u64);
                tokio::spawn(async move {
                    for row in rows {
                        tokio::time::sleep(pause).await;
                        if tx.send(Ok(row)).await.is_err() {
                            break;
                        }
                    }
                });
                let mut stream = Datastream::new(dataset.columns, rx, cancel.clone());
                stream.set_inferred();
                Dataflow::from_streams(vec![stream], cancel)?
            }
            _ => {
                let stream = Datastream::from_rows(dataset.columns, dataset.rows);
                Dataflow::from_streams(vec![stream], cancel)?
            }
        };
        Ok(flow)
    }

    async fn bulk_import_flow(&self, table: &str, flow: &mut Dataflow) -> Result<u64, DbError> {
        let target_columns = self.get_columns(table).await?;
        let mut positions = Vec::with_capacity(flow.columns.len());
        for column in flow.columns.iter() {
            positions.push(target_columns.position(&column.name));
        }

        let truncate_at = self.prop_usize("simulate_text_truncation");
        let lose_every = self.prop_usize("simulate_row_loss");

        let width = target_columns.len();
        let mut count = 0u64;
        let mut staged: Vec<Row> = Vec::new();
        while let Some(next) = flow.next_row().await {
            let row = next?;
            count += 1;
            if let Some(n) = lose_every {
                if n > 0 && count % n as u64 == 0 {
                    continue;
                }
            }
            let mut values = vec![Value::Null; width];
            for (src_idx, pos) in positions.iter().enumerate() {
                if let Some(pos) = pos {
                    let mut value = row.get(src_idx).cloned().unwrap_or(Value::Null);
                    if let (Some(limit), Value::Text(s)) = (truncate_at, &value) {
                        if s.chars().count() > limit {
                            value = Value::Text(s.chars().take(limit).collect());
                        }
                    }
                    values[*pos] = value;
                }
            }
            staged.push(Row::new(values));
        }

        let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
        let entry = tables
            .get_mut(&table_key(table))
            .ok_or_else(|| DbError::TableMissing(table_key(table)))?;
        entry.rows.extend(staged);
        Ok(count)
    }

    async fn compare_checksums(
        &self,
        table: &str,
        columns: &Columns,
        stats: &[ColumnStats],
    ) -> Result<(), DbError> {
        let stored = self.read_table(table)?;
        for (idx, column) in columns.iter().enumerate() {
            let Some(stream_stats) = stats.get(idx) else { continue };
            let Some(pos) = stored.columns.position(&column.name) else {
                continue;
            };
            let mut table_checksum = 0u64;
            for row in &stored.rows {
                if let Some(value) = row.get(pos) {
                    if !value.is_null() {
                        table_checksum =
                            table_checksum.wrapping_add(checksum_component(column.ctype, value));
                    }
                }
            }
            if table_checksum != stream_stats.checksum {
                return Err(DbError::ChecksumMismatch {
                    column: column.name.clone(),
                    stream_checksum: stream_stats.checksum,
                    table_checksum,
                });
            }
        }
        Ok(())
    }

    async fn upsert(
        &self,
        src_table: &str,
        tgt_table: &str,
        primary_key: &[String],
    ) -> Result<u64, DbError> {
        let source = self.read_table(src_table)?;
        let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
        let target = tables
            .get_mut(&table_key(tgt_table))
            .ok_or_else(|| DbError::TableMissing(table_key(tgt_table)))?;

        let mut src_key_idx = Vec::new();
        let mut tgt_key_idx = Vec::new();
        for key in primary_key {
            src_key_idx.push(
                source
                    .columns
                    .position(key)
                    .ok_or_else(|| DbError::ColumnMissing(key.clone()))?,
            );
            tgt_key_idx.push(
                target
                    .columns
                    .position(key)
                    .ok_or_else(|| DbError::ColumnMissing(key.clone()))?,
            );
        }

        // map source columns onto target positions by name
        let mut positions = Vec::with_capacity(source.columns.len());
        for column in source.columns.iter() {
            positions.push(target.columns.position(&column.name));
        }

        let width = target.columns.len();
        let mut affected = 0u64;
        for row in &source.rows {
            let key: Vec<Value> = src_key_idx
                .iter()
                .map(|i| row.get(*i).cloned().unwrap_or(Value::Null))
                .collect();

            let mut incoming = vec![Value::Null; width];
            for (src_idx, pos) in positions.iter().enumerate() {
                if let Some(pos) = pos {
                    incoming[*pos] = row.get(src_idx).cloned().unwrap_or(Value::Null);
                }
            }
            let incoming = Row::new(incoming);

            let existing = target.rows.iter_mut().find(|candidate| {
                tgt_key_idx
                    .iter()
                    .zip(&key)
                    .all(|(idx, kv)| candidate.get(*idx).map(|v| v == kv).unwrap_or(false))
            });

            match existing {
                Some(current) => {
                    // identical rows count as untouched, like native merge
                    if *current != incoming {
                        *current = incoming;
                        affected += 1;
                    }
                }
                None => {
                    target.rows.push(incoming);
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn swap_table(&self, src_table: &str, tgt_table: &str) -> Result<(), DbError> {
        let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
        let src_key = table_key(src_table);
        let tgt_key = table_key(tgt_table);
        let src = tables
            .remove(&src_key)
            .ok_or_else(|| DbError::TableMissing(src_key.clone()))?;
        if let Some(old) = tables.remove(&tgt_key) {
            tables.insert(src_key, old);
        }
        tables.insert(tgt_key, src);
        Ok(())
    }

    async fn optimize_table(&self, table: &str, columns: &Columns) -> Result<(), DbError> {
        let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
        let entry = tables
            .get_mut(&table_key(table))
            .ok_or_else(|| DbError::TableMissing(table_key(table)))?;
        for incoming in columns.iter() {
            if let Some(pos) = entry.columns.position(&incoming.name) {
                let current = &mut entry.columns.0[pos];
                let widened = dataflow::infer::widen(current.ctype, incoming.ctype);
                if widened != current.ctype {
                    debug!(
                        column = %current.name,
                        from = %current.ctype,
                        to = %widened,
                        "widening column type"
                    );
                    current.ctype = widened;
                }
                let incoming_len = incoming.max_length.unwrap_or(0);
                if incoming_len > current.max_length.unwrap_or(0) {
                    current.max_length = Some(incoming_len);
                }
            }
        }
        Ok(())
    }

    async fn begin(&self, _serializable: bool) -> Result<(), DbError> {
        let tables = self.store.read().unwrap_or_else(|p| p.into_inner()).clone();
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|p| p.into_inner());
        if snapshot.is_some() {
            return Err(DbError::Tx("transaction already open".to_string()));
        }
        *snapshot = Some(tables);
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbError> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|p| p.into_inner());
        snapshot.take();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(saved) = snapshot.take() {
            let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
            *tables = saved;
        }
        Ok(())
    }

    async fn list_schemata(&self) -> Result<Vec<String>, DbError> {
        let tables = self.store.read().unwrap_or_else(|p| p.into_inner());
        let mut schemata: Vec<String> = tables
            .keys()
            .map(|name| match name.split_once('.') {
                Some((schema, _)) => schema.to_string(),
                None => "main".to_string(),
            })
            .collect();
        schemata.sort();
        schemata.dedup();
        Ok(schemata)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DbError> {
        let tables = self.store.read().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = tables
            .keys()
            .filter(|name| {
                if schema.is_empty() {
                    true
                } else {
                    match name.split_once('.') {
                        Some((s, _)) => s.eq_ignore_ascii_case(schema),
                        None => schema.eq_ignore_ascii_case("main"),
                    }
                }
            })
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn supports_direct_copy(&self, scheme: &str) -> bool {
        self.prop("direct_copy_schemes")
            .map(|schemes| schemes.split(',').any(|s| s.trim() == scheme))
            .unwrap_or(false)
    }

    async fn copy_direct(
        &self,
        table: &str,
        url: &str,
        _credentials: &HashMap<String, String>,
    ) -> Result<u64, DbError> {
        let path = url.strip_prefix("file://").unwrap_or(url).to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| DbError::Unsupported(format!("direct copy from {path}: {e}")))?;

        let target_columns = self.get_columns(table).await?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(content.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DbError::Schema(e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut positions = Vec::with_capacity(headers.len());
        for header in &headers {
            positions.push(target_columns.position(header));
        }

        let width = target_columns.len();
        let mut staged = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| DbError::Schema(e.to_string()))?;
            let mut values = vec![Value::Null; width];
            for (i, pos) in positions.iter().enumerate() {
                if let Some(pos) = pos {
                    let cell = record.get(i).unwrap_or("");
                    let ctype = target_columns.0[*pos].ctype;
                    let raw = if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(cell.to_string())
                    };
                    values[*pos] = coerce::cast_value(raw, ctype)
                        .map_err(|e| DbError::Schema(e.to_string()))?;
                }
            }
            staged.push(Row::new(values));
        }

        let count = staged.len() as u64;
        let mut tables = self.store.write().unwrap_or_else(|p| p.into_inner());
        let entry = tables
            .get_mut(&table_key(table))
            .ok_or_else(|| DbError::TableMissing(table_key(table)))?;
        entry.rows.extend(staged);
        Ok(count)
    }
}

// --- minimal statement grammar -----------------------------------------

#[derive(Debug)]
enum Statement {
    Select(Select),
    CreateTable { table: String, columns: Columns },
    DropTable { table: String, if_exists: bool },
    Truncate { table: String },
    InsertSelect {
        target: String,
        target_fields: Vec<String>,
        select: Select,
    },
}

#[derive(Debug)]
struct Select {
    fields: Fields,
    table: String,
    condition: Condition,
    limit: Option<usize>,
}

#[derive(Debug)]
enum Fields {
    All,
    Max(String),
    Named(Vec<FieldExpr>),
}

#[derive(Debug)]
struct FieldExpr {
    name: String,
    cast_to: Option<ColumnType>,
}

#[derive(Debug)]
enum Condition {
    True,
    False,
    Ge(String, String),
}

impl Condition {
    fn matches(&self, columns: &Columns, row: &Row) -> Result<bool, DbError> {
        match self {
            Condition::True => Ok(true),
            Condition::False => Ok(false),
            Condition::Ge(field, literal) => {
                let idx = columns
                    .position(field)
                    .ok_or_else(|| DbError::ColumnMissing(field.clone()))?;
                let value = row.get(idx).cloned().unwrap_or(Value::Null);
                if value.is_null() {
                    return Ok(false);
                }
                let bound = Value::Text(literal.clone());
                Ok(matches!(
                    value.compare(&bound),
                    Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                ))
            }
        }
    }
}

fn strip_ident(raw: &str) -> String {
    raw.trim().trim_matches('"').trim_matches('`').to_string()
}

fn parse_statement(sql: &str) -> Result<Statement, DbError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let lower = trimmed.to_lowercase();

    if lower.starts_with("select") {
        return Ok(Statement::Select(parse_select(trimmed)?));
    }
    if lower.starts_with("create table") {
        return parse_create_table(trimmed);
    }
    if let Some(rest) = lower.strip_prefix("drop table if exists") {
        return Ok(Statement::DropTable {
            table: strip_ident(rest),
            if_exists: true,
        });
    }
    if lower.starts_with("drop table") {
        return Ok(Statement::DropTable {
            table: strip_ident(&trimmed["drop table".len()..]),
            if_exists: false,
        });
    }
    if let Some(rest) = lower.strip_prefix("drop view if exists") {
        return Ok(Statement::DropTable {
            table: strip_ident(rest),
            if_exists: true,
        });
    }
    if lower.starts_with("drop view") {
        return Ok(Statement::DropTable {
            table: strip_ident(&trimmed["drop view".len()..]),
            if_exists: true,
        });
    }
    if lower.starts_with("truncate table") {
        return Ok(Statement::Truncate {
            table: strip_ident(&trimmed["truncate table".len()..]),
        });
    }
    if lower.starts_with("truncate") {
        return Ok(Statement::Truncate {
            table: strip_ident(&trimmed["truncate".len()..]),
        });
    }
    if lower.starts_with("insert into") {
        return parse_insert_select(trimmed);
    }

    Err(DbError::sql("unsupported statement", sql))
}

fn parse_select(sql: &str) -> Result<Select, DbError> {
    let lower = sql.to_lowercase();
    let from_pos = lower
        .find(" from ")
        .ok_or_else(|| DbError::sql("select without from", sql))?;
    let fields_part = sql["select".len()..from_pos].trim();
    let mut rest = sql[from_pos + " from ".len()..].trim();

    let mut limit = None;
    let rest_lower = rest.to_lowercase();
    if let Some(pos) = rest_lower.rfind(" limit ") {
        limit = rest[pos + " limit ".len()..].trim().parse::<usize>().ok();
        rest = rest[..pos].trim();
    }

    let (table_part, condition) = {
        let rest_lower = rest.to_lowercase();
        match rest_lower.find(" where ") {
            Some(pos) => {
                let cond = parse_condition(rest[pos + " where ".len()..].trim(), rest)?;
                (rest[..pos].trim(), cond)
            }
            None => (rest, Condition::True),
        }
    };

    // rownum predicates arrive as conditions on dialects without LIMIT
    let fields = parse_fields(fields_part)?;
    Ok(Select {
        fields,
        table: strip_ident(table_part),
        condition,
        limit,
    })
}

fn parse_fields(fields: &str) -> Result<Fields, DbError> {
    let trimmed = fields.trim();
    if trimmed == "*" {
        return Ok(Fields::All);
    }
    let lower = trimmed.to_lowercase();
    if let Some(inner) = lower.strip_prefix("max(") {
        if let Some(end) = inner.find(')') {
            return Ok(Fields::Max(strip_ident(&inner[..end])));
        }
    }

    let mut exprs = Vec::new();
    for part in split_top_level(trimmed) {
        let part = part.trim();
        let part_lower = part.to_lowercase();
        if let Some(inner) = part_lower.strip_prefix("cast(") {
            let inner_orig = &part[5..part.len() - 1];
            let as_pos = inner
                .find(" as ")
                .ok_or_else(|| DbError::sql("malformed cast", part))?;
            let name = strip_ident(&inner_orig[..as_pos]);
            let type_name = inner_orig[as_pos + 4..].trim();
            let ctype = ColumnType::from_db_type(type_name)
                .map_err(DbError::Schema)?;
            exprs.push(FieldExpr {
                name,
                cast_to: Some(ctype),
            });
        } else {
            exprs.push(FieldExpr {
                name: strip_ident(part),
                cast_to: None,
            });
        }
    }
    if exprs.is_empty() {
        return Err(DbError::sql("empty field list", fields));
    }
    Ok(Fields::Named(exprs))
}

fn split_top_level(fields: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in fields.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_condition(cond: &str, sql: &str) -> Result<Condition, DbError> {
    let compact: String = cond.chars().filter(|c| !c.is_whitespace()).collect();
    if compact == "1=0" {
        return Ok(Condition::False);
    }
    if compact == "1=1" {
        return Ok(Condition::True);
    }
    if let Some(pos) = cond.find(">=") {
        let field = strip_ident(&cond[..pos]);
        let literal = cond[pos + 2..].trim();
        let literal = literal
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .map(|s| s.replace("''", "'"))
            .unwrap_or_else(|| literal.to_string());
        return Ok(Condition::Ge(field, literal));
    }
    Err(DbError::sql(format!("unsupported condition: {cond}"), sql))
}

fn parse_create_table(sql: &str) -> Result<Statement, DbError> {
    let open = sql
        .find('(')
        .ok_or_else(|| DbError::sql("create table without column list", sql))?;
    let close = sql
        .rfind(')')
        .ok_or_else(|| DbError::sql("create table without closing paren", sql))?;
    let table = strip_ident(&sql["create table".len()..open]);

    let mut columns = Vec::new();
    for def in split_top_level(&sql[open + 1..close]) {
        let def = def.trim();
        if def.is_empty() {
            continue;
        }
        let (name_raw, type_raw) = match def.strip_prefix('"') {
            Some(rest) => {
                let end = rest
                    .find('"')
                    .ok_or_else(|| DbError::sql("unterminated identifier", def))?;
                (&rest[..end], rest[end + 1..].trim())
            }
            None => match def.strip_prefix('`') {
                Some(rest) => {
                    let end = rest
                        .find('`')
                        .ok_or_else(|| DbError::sql("unterminated identifier", def))?;
                    (&rest[..end], rest[end + 1..].trim())
                }
                None => {
                    let mut split = def.splitn(2, char::is_whitespace);
                    let name = split.next().unwrap_or_default();
                    (name, split.next().unwrap_or("text").trim())
                }
            },
        };

        let lower = type_raw.to_lowercase();
        let nullable = !lower.contains("not null");
        let type_name = lower
            .replace("not null", "")
            .replace("primary key", "")
            .trim()
            .to_string();

        let mut max_length = None;
        if let (Some(open), Some(close)) = (type_name.find('('), type_name.find(')')) {
            if let Ok(len) = type_name[open + 1..close].split(',').next().unwrap_or("").trim().parse() {
                max_length = Some(len);
            }
        }

        let ctype = ColumnType::from_db_type(&type_name).map_err(DbError::Schema)?;
        columns.push(Column {
            name: name_raw.to_string(),
            ctype,
            nullable,
            max_length,
        });
    }

    Ok(Statement::CreateTable {
        table,
        columns: Columns::new(columns),
    })
}

fn parse_insert_select(sql: &str) -> Result<Statement, DbError> {
    let lower = sql.to_lowercase();
    let select_pos = lower
        .find("select")
        .ok_or_else(|| DbError::sql("only insert..select is supported", sql))?;
    let head = &sql["insert into".len()..select_pos];
    let open = head
        .find('(')
        .ok_or_else(|| DbError::sql("insert without field list", sql))?;
    let close = head
        .rfind(')')
        .ok_or_else(|| DbError::sql("insert without closing paren", sql))?;

    let target = strip_ident(&head[..open]);
    let target_fields = split_top_level(&head[open + 1..close])
        .into_iter()
        .map(|f| strip_ident(&f))
        .collect();

    let select = parse_select(sql[select_pos..].trim())?;
    Ok(Statement::InsertSelect {
        target,
        target_fields,
        select,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(name: &str) -> MemoryDriver {
        let driver = MemoryDriver::connect(&format!("memory://{name}"));
        // isolate repeated test runs within one process
        {
            let mut tables = driver.store.write().unwrap();
            tables.clear();
        }
        driver
    }

    async fn seed(driver: &MemoryDriver, table: &str, n: i64) {
        driver
            .exec(&format!(
                "create table {table} (\"id\" bigint not null, \"name\" text)"
            ))
            .await
            .unwrap();
        let rows: Vec<Row> = (0..n)
            .map(|i| Row::new(vec![Value::Int(i), Value::Text(format!("name{i}"))]))
            .collect();
        {
            let mut tables = driver.store.write().unwrap();
            tables.get_mut(&table_key(table)).unwrap().rows = rows;
        }
    }

    #[tokio::test]
    async fn select_with_probe_condition_returns_shape_only() {
        let driver = driver("probe");
        seed(&driver, "t1", 5).await;
        let shape = driver.query("select * from t1 where 1=0").await.unwrap();
        assert_eq!(shape.columns.len(), 2);
        assert!(shape.rows.is_empty());
    }

    #[tokio::test]
    async fn insert_select_with_casts() {
        let driver = driver("insert");
        seed(&driver, "src", 3).await;
        driver
            .exec("create table dst (\"id\" text, \"name\" text)")
            .await
            .unwrap();
        let n = driver
            .exec(
                "insert into dst (\"id\", \"name\") select cast(\"id\" as TEXT), \"name\" from src",
            )
            .await
            .unwrap();
        assert_eq!(n, 3);
        let rows = driver.query("select * from dst").await.unwrap();
        assert_eq!(rows.rows[0].0[0], Value::Text("0".to_string()));
    }

    #[tokio::test]
    async fn max_query_and_watermark_predicate() {
        let driver = driver("max");
        seed(&driver, "t", 10).await;
        let max = driver.query("select max(\"id\") as max_val from t").await.unwrap();
        assert_eq!(max.rows[0].0[0], Value::Int(9));

        let filtered = driver
            .query("select * from t where \"id\" >= 8")
            .await
            .unwrap();
        assert_eq!(filtered.rows.len(), 2);
    }

    #[tokio::test]
    async fn transaction_rollback_restores_tables() {
        let driver = driver("tx");
        seed(&driver, "t", 2).await;
        driver.begin(true).await.unwrap();
        driver.exec("truncate table t").await.unwrap();
        assert_eq!(driver.get_count("t").await.unwrap(), 0);
        driver.rollback().await.unwrap();
        assert_eq!(driver.get_count("t").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_counts_only_changed_rows() {
        let driver = driver("upsert");
        seed(&driver, "stage", 3).await;
        seed(&driver, "final", 0).await;
        let pk = vec!["id".to_string()];

        let first = driver.upsert("stage", "final", &pk).await.unwrap();
        assert_eq!(first, 3);
        let second = driver.upsert("stage", "final", &pk).await.unwrap();
        assert_eq!(second, 0, "identical rows must not count as affected");
    }

    #[tokio::test]
    async fn swap_table_exchanges_contents() {
        let driver = driver("swap");
        seed(&driver, "a", 1).await;
        seed(&driver, "b", 5).await;
        driver.swap_table("a", "b").await.unwrap();
        assert_eq!(driver.get_count("b").await.unwrap(), 1);
        assert_eq!(driver.get_count("a").await.unwrap(), 5);
    }
}
