use crate::{
    config::{Config, Mode},
    discover::{discover, DiscoverOptions, Discovery},
    error::TaskError,
    planner::Topology,
    read, sqltext, stage,
    task::{Progress, Task, TaskShared, TaskStatus},
    watermark, write,
};
use chrono::Utc;
use connectors::{registry, ConnectorError};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How long a cancelled worker gets to observe the signal before it is
/// torn down.
pub const CANCEL_GRACE: Duration = Duration::from_secs(3);

impl Task {
    /// Runs the classified pipeline to completion, honoring
    /// cancellation with a grace period and sampling progress on a
    /// one-second ticker.
    pub async fn execute(&mut self) -> Result<(), TaskError> {
        self.status = TaskStatus::Running;
        self.start_time = Some(Utc::now());
        self.progress.mark_started();

        let ticker_stop = CancellationToken::new();
        spawn_progress_ticker(self.progress.clone(), ticker_stop.clone());

        let mut handle: JoinHandle<Result<(Config, u64), TaskError>> = tokio::spawn(run_topology(
            self.topology,
            self.config.clone(),
            self.progress.clone(),
            self.shared.clone(),
            self.cancel.clone(),
        ));

        let result = tokio::select! {
            res = &mut handle => collapse(res),
            _ = self.cancel.cancelled() => {
                match tokio::time::timeout(CANCEL_GRACE, &mut handle).await {
                    Ok(res) => match collapse(res) {
                        // a worker that still finished was interrupted
                        // as far as the caller is concerned
                        Ok(_) => Err(TaskError::Interrupted),
                        Err(err) if err.is_interrupted() => Err(err),
                        Err(err) => {
                            debug!(error = %err, "worker failed while cancelling");
                            Err(TaskError::Interrupted)
                        }
                    },
                    Err(_) => {
                        warn!("worker did not observe cancellation in time");
                        handle.abort();
                        best_effort_cleanup(&self.config, &self.shared).await;
                        Err(TaskError::Interrupted)
                    }
                }
            }
        };

        ticker_stop.cancel();
        self.progress.mark_ended();
        self.end_time = Some(Utc::now());

        match result {
            Ok((config, _count)) => {
                self.config = config;
                self.progress.set("execution succeeded");
                self.status = TaskStatus::Success;
                Ok(())
            }
            Err(err) => {
                self.progress.set("execution failed");
                self.status = TaskStatus::Error;
                error!(error = %err, topology = %self.topology, "task failed");
                Err(err)
            }
        }
    }
}

fn collapse(
    res: Result<Result<(Config, u64), TaskError>, tokio::task::JoinError>,
) -> Result<(Config, u64), TaskError> {
    match res {
        Ok(inner) => inner,
        // panics stop at the worker boundary and become errors
        Err(join_err) if join_err.is_panic() => {
            Err(TaskError::Worker(format!("worker panicked: {join_err}")))
        }
        Err(join_err) => Err(TaskError::Worker(join_err.to_string())),
    }
}

fn spawn_progress_ticker(progress: Progress, stop: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let rate = progress.rate(1);
                    let count = progress.count();
                    if count > 0 {
                        debug!(rows = count, bytes = progress.bytes(), rate, "progress");
                    }
                }
                _ = stop.cancelled() => break,
            }
        }
    });
}

/// Drops a staged table a torn-down worker left behind.
async fn best_effort_cleanup(cfg: &Config, shared: &Arc<TaskShared>) {
    if let Some(tmp_table) = shared.pending_temp() {
        match registry::connect_database(&cfg.target.conn).await {
            Ok(driver) => {
                if let Err(err) = driver.drop_table(&tmp_table).await {
                    warn!(table = %tmp_table, error = %err, "cleanup drop failed");
                } else {
                    debug!(table = %tmp_table, "dropped staged table after interruption");
                }
                shared.clear_temp();
            }
            Err(err) => warn!(error = %err, "could not reconnect for cleanup"),
        }
    }
}

async fn run_topology(
    topology: Topology,
    mut cfg: Config,
    progress: Progress,
    shared: Arc<TaskShared>,
    cancel: CancellationToken,
) -> Result<(Config, u64), TaskError> {
    let started = Instant::now();
    let count = match topology {
        Topology::DbToDb => run_db_to_db(&mut cfg, &progress, &shared, cancel).await?,
        Topology::FileToDb => run_file_to_db(&mut cfg, &progress, &shared, cancel).await?,
        Topology::DbToFile => run_db_to_file(&mut cfg, &progress, cancel).await?,
        Topology::FileToFile => run_file_to_file(&mut cfg, &progress, cancel).await?,
        Topology::DbSql => run_db_sql(&cfg, &progress).await?,
        Topology::Discover => {
            run_discover(&cfg, &progress, cancel).await?;
            0
        }
        Topology::ApiToDb | Topology::ApiToFile => {
            return Err(TaskError::Connector(ConnectorError::DriverUnavailable(
                "api".to_string(),
            )))
        }
        Topology::DbTransform => return Err(TaskError::TransformUnsupported),
    };

    debug!(
        topology = %topology,
        count,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "topology routine finished"
    );
    Ok((cfg, count))
}

async fn run_db_to_db(
    cfg: &mut Config,
    progress: &Progress,
    shared: &Arc<TaskShared>,
    cancel: CancellationToken,
) -> Result<u64, TaskError> {
    let started = Instant::now();

    progress.set("connecting to source database");
    let src = registry::connect_database(&cfg.source.conn)
        .await
        .map_err(|e| TaskError::connect("could not initialize source connection", e))?;

    progress.set("connecting to target database");
    let tgt = registry::connect_database(&cfg.target.conn)
        .await
        .map_err(|e| TaskError::connect("could not initialize target connection", e))?;

    // an existing final table narrows the read to shared columns
    cfg.target.columns = tgt
        .get_sql_columns(&format!("select * from {}", cfg.target.object))
        .await
        .unwrap_or_default();

    if cfg.mode == Mode::Upsert {
        progress.set("getting checkpoint value");
        cfg.upsert_value =
            watermark::get_upsert_value(cfg, tgt.as_ref(), cfg.source.conn.kind.dialect()).await?;
    }

    progress.set("reading from source database");
    let mut flow = read::read_from_db(cfg, &src, cancel).await?;
    progress.attach_counters(flow.counters());

    progress.set("writing to target database");
    let count = stage::write_to_db(cfg, &mut flow, tgt, progress, shared).await?;

    report_insert(progress, count, started);
    if let Some(err) = flow.error() {
        return Err(TaskError::Worker(err));
    }
    flow.close();
    Ok(count)
}

async fn run_file_to_db(
    cfg: &mut Config,
    progress: &Progress,
    shared: &Arc<TaskShared>,
    cancel: CancellationToken,
) -> Result<u64, TaskError> {
    let started = Instant::now();

    progress.set("connecting to target database");
    let tgt = registry::connect_database(&cfg.target.conn)
        .await
        .map_err(|e| TaskError::connect("could not initialize target connection", e))?;

    if cfg.mode == Mode::Upsert {
        progress.set("getting checkpoint value");
        cfg.upsert_value =
            watermark::get_upsert_value(cfg, tgt.as_ref(), cfg.target.conn.kind.dialect()).await?;
    }

    progress.set("reading from source file system");
    let mut flow = read::read_from_file(cfg, cancel).await?;
    progress.attach_counters(flow.counters());

    progress.set("writing to target database");
    let count = stage::write_to_db(cfg, &mut flow, tgt, progress, shared).await?;

    report_insert(progress, count, started);
    if let Some(err) = flow.error() {
        return Err(TaskError::Worker(err));
    }
    flow.close();
    Ok(count)
}

async fn run_db_to_file(
    cfg: &mut Config,
    progress: &Progress,
    cancel: CancellationToken,
) -> Result<u64, TaskError> {
    progress.set("connecting to source database");
    let src = registry::connect_database(&cfg.source.conn)
        .await
        .map_err(|e| TaskError::connect("could not initialize source connection", e))?;

    progress.set("reading from source database");
    let mut flow = read::read_from_db(cfg, &src, cancel).await?;
    progress.attach_counters(flow.counters());

    progress.set("writing to target file system");
    let (count, _bytes) = write::write_to_file(cfg, &mut flow).await?;
    progress.set(format!("wrote {count} rows [{} r/s]", progress.rate(0)));

    if let Some(err) = flow.error() {
        return Err(TaskError::Worker(err));
    }
    flow.close();
    Ok(count)
}

async fn run_file_to_file(
    cfg: &mut Config,
    progress: &Progress,
    cancel: CancellationToken,
) -> Result<u64, TaskError> {
    progress.set("reading from source file system");
    let mut flow = read::read_from_file(cfg, cancel).await?;
    progress.attach_counters(flow.counters());

    progress.set("writing to target file system");
    let (count, _bytes) = write::write_to_file(cfg, &mut flow).await?;
    progress.set(format!("wrote {count} rows [{} r/s]", progress.rate(0)));

    if let Some(err) = flow.error() {
        return Err(TaskError::Worker(err));
    }
    flow.close();
    Ok(count)
}

async fn run_db_sql(cfg: &Config, progress: &Progress) -> Result<u64, TaskError> {
    progress.set("connecting to target database");
    let tgt = registry::connect_database(&cfg.target.conn)
        .await
        .map_err(|e| TaskError::connect("could not initialize target connection", e))?;

    progress.set("executing sql on target database");
    let sql = sqltext::get_sql_text(&cfg.target.options.post_sql)?;
    let sql = sqltext::substitute_drop_view(&sql, tgt.dialect(), &cfg.target.object);
    sqltext::assert_resolved(&sql)?;

    let affected = tgt.exec(&sql).await?;
    progress.set(format!("{affected} rows affected"));
    Ok(affected)
}

async fn run_discover(
    cfg: &Config,
    progress: &Progress,
    cancel: CancellationToken,
) -> Result<Discovery, TaskError> {
    let conn = if !cfg.target.conn.url.is_empty() {
        &cfg.target.conn
    } else {
        &cfg.source.conn
    };

    let options = DiscoverOptions {
        filter: cfg.source.options.get("filter").map(str::to_string).or_else(|| {
            if cfg.target.object.is_empty() {
                None
            } else {
                Some(cfg.target.object.clone())
            }
        }),
        column_level: cfg.source.options.get("column_level") == Some("true"),
        recursive: cfg.source.options.get("recursive") == Some("true"),
    };

    progress.set("discovering objects");
    let found = discover(conn, &options, cancel).await?;
    progress.set(format!(
        "discovered {} objects, {} files",
        found.schemata.len(),
        found.files.len()
    ));
    Ok(found)
}

fn report_insert(progress: &Progress, count: u64, started: Instant) {
    let elapsed = started.elapsed().as_secs();
    progress.set(format!(
        "inserted {count} rows in {elapsed} secs [{} r/s]",
        progress.rate(0)
    ));
}
