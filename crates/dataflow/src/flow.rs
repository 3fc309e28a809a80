use crate::{checksum::ColumnStats, error::FlowError, stream::Datastream};
use model::core::column::Columns;
use model::records::{dataset::Dataset, row::Row};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Shared row/byte counters, readable while the flow is being drained
/// on another task.
#[derive(Debug, Default)]
pub struct FlowCounters {
    rows: AtomicU64,
    bytes: AtomicU64,
}

impl FlowCounters {
    pub fn add(&self, rows: u64, bytes: u64) {
        self.rows.fetch_add(rows, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// An ordered composition of datastreams sharing one schema and one
/// cancellation context. Rows keep their order within a stream; streams
/// are drained in sequence. Closing runs any deferred cleanup exactly
/// once.
pub struct Dataflow {
    streams: Vec<Datastream>,
    pub columns: Columns,
    counters: Arc<FlowCounters>,
    cancel: CancellationToken,
    error: Mutex<Option<FlowError>>,
    /// Set when the rows were spooled through a filesystem location a
    /// target may ingest directly.
    pub fs_url: Option<String>,
    deferred: Vec<Cleanup>,
    current: usize,
}

impl std::fmt::Debug for Dataflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataflow")
            .field("columns", &self.columns)
            .field("fs_url", &self.fs_url)
            .field("current", &self.current)
            .field("streams_len", &self.streams.len())
            .finish()
    }
}

impl Dataflow {
    pub fn new(cancel: CancellationToken) -> Self {
        Dataflow {
            streams: Vec::new(),
            columns: Columns::default(),
            counters: Arc::new(FlowCounters::default()),
            cancel,
            error: Mutex::new(None),
            fs_url: None,
            deferred: Vec::new(),
            current: 0,
        }
    }

    pub fn from_streams(
        mut streams: Vec<Datastream>,
        cancel: CancellationToken,
    ) -> Result<Self, FlowError> {
        let mut flow = Dataflow::new(cancel);
        if let Some(first) = streams.first() {
            flow.columns = first.columns.clone();
        }
        for stream in &streams {
            if stream.columns.len() != flow.columns.len() {
                return Err(FlowError::SchemaMisaligned(format!(
                    "stream has {} columns, flow has {}",
                    stream.columns.len(),
                    flow.columns.len()
                )));
            }
        }
        for stream in &mut streams {
            stream.attach_counters(flow.counters.clone());
        }
        flow.streams = streams;
        Ok(flow)
    }

    /// A single-stream flow over materialized rows whose schema is
    /// already authoritative.
    pub fn from_dataset(dataset: Dataset, cancel: CancellationToken) -> Result<Self, FlowError> {
        let stream = Datastream::from_rows(dataset.columns.clone(), dataset.rows);
        Dataflow::from_streams(vec![stream], cancel)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fills the leading buffer of the first stream, runs inference when
    /// the source did not declare types, and returns the sample with the
    /// (possibly updated) schema. The sampled rows still flow through
    /// `next_row` afterwards.
    pub async fn sample(&mut self, safe: bool) -> Result<Dataset, FlowError> {
        let (columns, buffer) = {
            let Some(first) = self.streams.first_mut() else {
                return Err(FlowError::EmptySchema);
            };
            first.fill_buffer().await?;
            first.infer_schema(safe);
            (first.columns.clone(), first.buffer_rows())
        };
        self.columns = columns;
        // follower streams adopt the schema inferred from the first
        for stream in self.streams.iter_mut().skip(1) {
            stream.columns = self.columns.clone();
            stream.set_inferred();
        }
        if self.columns.is_empty() {
            return Err(FlowError::EmptySchema);
        }

        let mut dataset = Dataset::from_rows(self.columns.clone(), buffer);
        dataset.safe_inference = safe;
        dataset.inferred = true;
        Ok(dataset)
    }

    /// Yields the next row across the composed streams. Order within a
    /// stream is preserved; no order holds across streams.
    pub async fn next_row(&mut self) -> Option<Result<Row, FlowError>> {
        loop {
            if self.cancel.is_cancelled() {
                self.set_error(FlowError::Cancelled);
                return Some(Err(FlowError::Cancelled));
            }
            let stream = self.streams.get_mut(self.current)?;
            match stream.next_row().await {
                Some(Ok(row)) => return Some(Ok(row)),
                Some(Err(err)) => {
                    self.set_error(FlowError::Read(err.to_string()));
                    return Some(Err(err));
                }
                None => {
                    self.current += 1;
                    if self.current >= self.streams.len() {
                        return None;
                    }
                }
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.counters.rows()
    }

    pub fn bytes(&self) -> u64 {
        self.counters.bytes()
    }

    pub fn counters(&self) -> Arc<FlowCounters> {
        self.counters.clone()
    }

    pub fn set_error(&self, err: FlowError) {
        let mut slot = self.error.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|e| e.to_string())
    }

    /// Registers cleanup to run when the flow closes (e.g. spooled file
    /// removal).
    pub fn defer(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.deferred.push(Box::new(cleanup));
    }

    /// Drops all streams without draining them and runs deferred
    /// cleanup. Used when a direct-copy path consumed the data outside
    /// the row pipe.
    pub fn set_empty(&mut self) {
        for stream in &mut self.streams {
            stream.close();
        }
        self.streams.clear();
        self.run_deferred();
    }

    /// Folds per-stream column stats into the schema (max lengths) and
    /// returns the merged stats, index-aligned with `columns`.
    pub fn sync_stats(&mut self) -> Vec<ColumnStats> {
        let mut merged = vec![ColumnStats::default(); self.columns.len()];
        for stream in &self.streams {
            for (idx, stats) in stream.stats().iter().enumerate() {
                if let Some(slot) = merged.get_mut(idx) {
                    slot.merge(stats);
                }
            }
        }
        for (idx, column) in self.columns.0.iter_mut().enumerate() {
            let observed = merged[idx].max_length;
            if observed > column.max_length.unwrap_or(0) {
                column.max_length = Some(observed);
            }
        }
        merged
    }

    pub fn close(&mut self) {
        for stream in &mut self.streams {
            stream.close();
        }
        self.run_deferred();
    }

    fn run_deferred(&mut self) {
        for cleanup in self.deferred.drain(..) {
            cleanup();
        }
    }
}

impl Drop for Dataflow {
    fn drop(&mut self) {
        if !self.deferred.is_empty() {
            warn!("dataflow dropped with pending cleanup; running it now");
            self.run_deferred();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::{column::Column, column_type::ColumnType, value::Value};

    fn int_rows(n: i64) -> Vec<Row> {
        (0..n).map(|i| Row::new(vec![Value::Int(i)])).collect()
    }

    fn int_columns() -> Columns {
        Columns::new(vec![Column::new("n", ColumnType::Integer)])
    }

    #[tokio::test]
    async fn drains_streams_in_order() {
        let streams = vec![
            Datastream::from_rows(int_columns(), int_rows(2)),
            Datastream::from_rows(int_columns(), int_rows(3)),
        ];
        let mut flow = Dataflow::from_streams(streams, CancellationToken::new()).unwrap();
        let mut total = 0;
        while let Some(row) = flow.next_row().await {
            row.unwrap();
            total += 1;
        }
        assert_eq!(total, 5);
        assert_eq!(flow.count(), 5);
    }

    #[tokio::test]
    async fn sample_of_empty_flow_is_empty_schema() {
        let mut flow = Dataflow::new(CancellationToken::new());
        assert!(matches!(flow.sample(false).await, Err(FlowError::EmptySchema)));
    }

    #[tokio::test]
    async fn set_empty_runs_deferred_cleanup() {
        let streams = vec![Datastream::from_rows(int_columns(), int_rows(2))];
        let mut flow = Dataflow::from_streams(streams, CancellationToken::new()).unwrap();
        let flag = Arc::new(AtomicU64::new(0));
        let seen = flag.clone();
        flow.defer(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        flow.set_empty();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
        assert!(flow.next_row().await.is_none());
        // closing again must not re-run cleanup
        flow.close();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mismatched_stream_arity_is_rejected() {
        let two = Columns::new(vec![
            Column::new("a", ColumnType::Integer),
            Column::new("b", ColumnType::Integer),
        ]);
        let streams = vec![
            Datastream::from_rows(int_columns(), int_rows(1)),
            Datastream::from_rows(two, vec![]),
        ];
        assert!(Dataflow::from_streams(streams, CancellationToken::new()).is_err());
    }
}
