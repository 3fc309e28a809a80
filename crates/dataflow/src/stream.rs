use crate::{
    checksum::ColumnStats,
    coerce,
    error::FlowError,
    flow::FlowCounters,
    infer,
};
use model::core::column::Columns;
use model::records::row::Row;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Rows pulled into the leading buffer before schema inference runs.
pub const SAMPLE_SIZE: usize = 900;

/// Default bound of the reader/consumer channel.
pub const CHANNEL_CAPACITY: usize = 1024;

/// A lazy, single-pass sequence of typed rows. Rows arrive from a
/// producer task through a bounded channel; the leading rows are held in
/// a buffer so the schema can be inferred before anything is consumed.
/// Not restartable.
pub struct Datastream {
    pub columns: Columns,
    buffer: VecDeque<Row>,
    rx: Option<mpsc::Receiver<Result<Row, FlowError>>>,
    counters: Arc<FlowCounters>,
    stats: Vec<ColumnStats>,
    cancel: CancellationToken,
    inferred: bool,
    buffered: bool,
    rows_out: u64,
}

impl Datastream {
    pub fn new(
        columns: Columns,
        rx: mpsc::Receiver<Result<Row, FlowError>>,
        cancel: CancellationToken,
    ) -> Self {
        let stats = vec![ColumnStats::default(); columns.len()];
        Datastream {
            columns,
            buffer: VecDeque::new(),
            rx: Some(rx),
            counters: Arc::new(FlowCounters::default()),
            stats,
            cancel,
            inferred: false,
            buffered: false,
            rows_out: 0,
        }
    }

    /// A stream over already-materialized rows whose types are known.
    pub fn from_rows(columns: Columns, rows: Vec<Row>) -> Self {
        let stats = vec![ColumnStats::default(); columns.len()];
        Datastream {
            columns,
            buffer: rows.into(),
            rx: None,
            counters: Arc::new(FlowCounters::default()),
            stats,
            cancel: CancellationToken::new(),
            inferred: true,
            buffered: true,
            rows_out: 0,
        }
    }

    /// Marks the schema as authoritative; inference will not run.
    pub fn set_inferred(&mut self) {
        self.inferred = true;
    }

    pub fn is_inferred(&self) -> bool {
        self.inferred
    }

    pub(crate) fn attach_counters(&mut self, counters: Arc<FlowCounters>) {
        self.counters = counters;
    }

    /// Pulls rows into the leading buffer, up to `SAMPLE_SIZE` or until
    /// the producer closes.
    pub async fn fill_buffer(&mut self) -> Result<(), FlowError> {
        if self.buffered {
            return Ok(());
        }
        while self.buffer.len() < SAMPLE_SIZE {
            let Some(rx) = self.rx.as_mut() else { break };
            let next = tokio::select! {
                row = rx.recv() => row,
                _ = self.cancel.cancelled() => return Err(FlowError::Cancelled),
            };
            match next {
                Some(Ok(row)) => self.buffer.push_back(row),
                Some(Err(err)) => return Err(err),
                None => {
                    self.rx = None;
                    break;
                }
            }
        }
        self.buffered = true;
        Ok(())
    }

    /// Runs schema inference over the leading buffer. A no-op when the
    /// source already declared its types.
    pub fn infer_schema(&mut self, safe: bool) {
        if self.inferred {
            return;
        }
        let rows: Vec<Row> = self.buffer.iter().cloned().collect();
        infer::infer_columns(&mut self.columns, &rows, safe);
        self.inferred = true;
    }

    pub fn buffer_rows(&self) -> Vec<Row> {
        self.buffer.iter().cloned().collect()
    }

    /// Yields the next row, buffered rows first, cast to the inferred
    /// column types. Returns `None` once the producer closes and the
    /// buffer drains.
    pub async fn next_row(&mut self) -> Option<Result<Row, FlowError>> {
        let raw = if let Some(row) = self.buffer.pop_front() {
            row
        } else {
            let rx = self.rx.as_mut()?;
            let next = tokio::select! {
                row = rx.recv() => row,
                _ = self.cancel.cancelled() => return Some(Err(FlowError::Cancelled)),
            };
            match next {
                Some(Ok(row)) => row,
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    self.rx = None;
                    return None;
                }
            }
        };

        let mut row = raw;
        if let Err(err) = coerce::cast_row(&mut row, &self.columns) {
            return Some(Err(err));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if let Some(value) = row.get(idx) {
                self.stats[idx].observe(column.ctype, value);
            }
        }
        self.rows_out += 1;
        self.counters.add(1, row.size_bytes() as u64);
        Some(Ok(row))
    }

    pub fn count(&self) -> u64 {
        self.rows_out
    }

    pub fn stats(&self) -> &[ColumnStats] {
        &self.stats
    }

    /// Closes the inbound channel; any rows still queued are discarded.
    pub fn close(&mut self) {
        self.rx = None;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::{column::Column, column_type::ColumnType, value::Value};

    fn text_columns(names: &[&str]) -> Columns {
        Columns::new(names.iter().map(|n| Column::new(n, ColumnType::Text)).collect())
    }

    #[tokio::test]
    async fn buffer_then_infer_then_drain() {
        let (tx, rx) = mpsc::channel(8);
        let mut ds = Datastream::new(text_columns(&["id", "name"]), rx, CancellationToken::new());

        for i in 0..3 {
            tx.send(Ok(Row::new(vec![
                Value::Text(i.to_string()),
                Value::Text(format!("row{i}")),
            ])))
            .await
            .unwrap();
        }
        drop(tx);

        ds.fill_buffer().await.unwrap();
        ds.infer_schema(false);
        assert_eq!(ds.columns.0[0].ctype, ColumnType::Integer);

        let mut rows = Vec::new();
        while let Some(row) = ds.next_row().await {
            rows.push(row.unwrap());
        }
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0[0], Value::Int(0));
        assert_eq!(ds.count(), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_recv() {
        let (_tx, rx) = mpsc::channel::<Result<Row, FlowError>>(1);
        let cancel = CancellationToken::new();
        let mut ds = Datastream::new(text_columns(&["a"]), rx, cancel.clone());
        ds.set_inferred();
        cancel.cancel();
        match ds.next_row().await {
            Some(Err(FlowError::Cancelled)) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
