use crate::{
    config::Config,
    error::TaskError,
    planner::{self, Topology},
};
use chrono::{DateTime, Utc};
use dataflow::FlowCounters;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Success,
    Error,
}

/// Latest progress message, the append-only history, and the sampled
/// counters used for stall detection and rate reporting. Cloned into
/// the progress ticker, so every field is shareable.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<ProgressInner>,
}

struct ProgressInner {
    current: Mutex<String>,
    history: Mutex<Vec<String>>,
    counters: Mutex<Option<Arc<FlowCounters>>>,
    prev_count: AtomicU64,
    last_increment: Mutex<Instant>,
    started: Mutex<Option<Instant>>,
    ended: Mutex<Option<Instant>>,
}

impl Progress {
    pub fn new() -> Self {
        Progress {
            inner: Arc::new(ProgressInner {
                current: Mutex::new(String::new()),
                history: Mutex::new(Vec::new()),
                counters: Mutex::new(None),
                prev_count: AtomicU64::new(0),
                last_increment: Mutex::new(Instant::now()),
                started: Mutex::new(None),
                ended: Mutex::new(None),
            }),
        }
    }

    pub fn set(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        let mut history = self.lock(&self.inner.history);
        history.push(message.clone());
        *self.lock(&self.inner.current) = message;
    }

    pub fn current(&self) -> String {
        self.lock(&self.inner.current).clone()
    }

    pub fn history(&self) -> Vec<String> {
        self.lock(&self.inner.history).clone()
    }

    pub fn attach_counters(&self, counters: Arc<FlowCounters>) {
        *self.lock(&self.inner.counters) = Some(counters);
    }

    pub fn mark_started(&self) {
        let now = Instant::now();
        *self.lock(&self.inner.started) = Some(now);
        *self.lock(&self.inner.last_increment) = now;
    }

    pub fn mark_ended(&self) {
        *self.lock(&self.inner.ended) = Some(Instant::now());
    }

    /// Rows seen so far; zero before the task produced a flow.
    pub fn count(&self) -> u64 {
        self.lock(&self.inner.counters)
            .as_ref()
            .map(|c| c.rows())
            .unwrap_or(0)
    }

    pub fn bytes(&self) -> u64 {
        self.lock(&self.inner.counters)
            .as_ref()
            .map(|c| c.bytes())
            .unwrap_or(0)
    }

    /// Windowed rows/sec. A zero or negative window measures since
    /// start. Window sampling also advances the stall clock whenever
    /// the count moved.
    pub fn rate(&self, window_secs: u64) -> u64 {
        let started = match *self.lock(&self.inner.started) {
            Some(t) => t,
            None => return 0,
        };
        let count = self.count();

        if let Some(ended) = *self.lock(&self.inner.ended) {
            let elapsed = ended.duration_since(started).as_secs_f64();
            return if elapsed > 0.0 {
                (count as f64 / elapsed).round() as u64
            } else {
                0
            };
        }

        if window_secs == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            return if elapsed > 0.0 {
                (count as f64 / elapsed).round() as u64
            } else {
                0
            };
        }

        let prev = self.inner.prev_count.swap(count, Ordering::Relaxed);
        if count > prev {
            *self.lock(&self.inner.last_increment) = Instant::now();
        }
        count.saturating_sub(prev) / window_secs
    }

    /// Whether the row count has not advanced within `window` seconds.
    /// Long-pause phases (pre-sql, post-sql) never count as stalled.
    pub fn is_stalled(&self, window: f64) -> bool {
        let current = self.current();
        if current.contains("pre-sql") || current.contains("post-sql") {
            return false;
        }
        self.lock(&self.inner.last_increment).elapsed().as_secs_f64() > window
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress::new()
    }
}

/// Cleanup handles shared with the worker so interruption can still
/// drop the staged table best-effort.
#[derive(Default)]
pub struct TaskShared {
    tmp_table_created: AtomicBool,
    temp_table: Mutex<String>,
}

impl TaskShared {
    pub fn set_temp(&self, table: &str) {
        *self.temp_table.lock().unwrap_or_else(|p| p.into_inner()) = table.to_string();
        self.tmp_table_created.store(true, Ordering::SeqCst);
    }

    pub fn clear_temp(&self) {
        self.tmp_table_created.store(false, Ordering::SeqCst);
    }

    pub fn pending_temp(&self) -> Option<String> {
        if self.tmp_table_created.load(Ordering::SeqCst) {
            Some(
                self.temp_table
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .clone(),
            )
        } else {
            None
        }
    }
}

/// One ELT task run. Owns its config, its dataflow (through the worker)
/// and its cancellation handle; destroyed when the caller releases it.
pub struct Task {
    pub config: Config,
    pub topology: Topology,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress: Progress,
    pub shared: Arc<TaskShared>,
    pub(crate) cancel: CancellationToken,
}

impl Task {
    /// Prepares and classifies a config into a runnable task.
    pub fn new(mut config: Config) -> Result<Self, TaskError> {
        config.prepare()?;
        let topology = planner::classify(&config)?;
        if config.target.conn.kind.is_db() {
            let dialect = config.target.conn.kind.dialect();
            planner::reserve_temp_name(&mut config, dialect);
        }

        Ok(Task {
            config,
            topology,
            status: TaskStatus::Created,
            start_time: None,
            end_time: None,
            progress: Progress::new(),
            shared: Arc::new(TaskShared::default()),
            cancel: CancellationToken::new(),
        })
    }

    /// Handle the caller keeps to cancel the run.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_progress(&self, message: impl Into<String>) {
        self.progress.set(message);
    }

    pub fn count(&self) -> u64 {
        if self.start_time.is_none() {
            return 0;
        }
        self.progress.count()
    }

    pub fn rate(&self, window_secs: u64) -> u64 {
        self.progress.rate(window_secs)
    }

    pub fn is_stalled(&self, window: f64) -> bool {
        self.progress.is_stalled(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_reserves_temp_name_for_db_targets() {
        let cfg = Config::from_str(
            "source: {conn: 'memory://s', stream: t}\ntarget: {conn: 'memory://d', object: t1}",
        )
        .unwrap();
        let task = Task::new(cfg).unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.topology, Topology::DbToDb);
        assert!(task.config.target.options.table_tmp.starts_with("t1_tmp"));
    }

    #[test]
    fn rate_is_zero_before_start() {
        let progress = Progress::new();
        assert_eq!(progress.rate(1), 0);
        assert_eq!(progress.count(), 0);
    }

    #[test]
    fn stall_detection_ignores_sql_phases() {
        let progress = Progress::new();
        progress.mark_started();
        progress.set("executing pre-sql");
        assert!(!progress.is_stalled(0.0));
        progress.set("streaming inserts");
        assert!(progress.is_stalled(0.0));
    }
}
