use crate::{config::Config, error::TaskError};
use chrono::{DateTime, Datelike, Timelike, Utc};
use connectors::{filesystem::FileOptions, local, registry};
use dataflow::{Dataflow, FlowError};
use tracing::debug;

/// Drains a dataflow into the target filesystem (or standard output),
/// returning `(rows, bytes)` written.
pub async fn write_to_file(cfg: &Config, flow: &mut Dataflow) -> Result<(u64, u64), TaskError> {
    if !cfg.target.conn.url.is_empty() {
        let url = date_map_substitute(cfg.target.conn.base_url(), Utc::now());

        let fs = registry::filesystem(&cfg.target.conn)
            .map_err(|e| TaskError::connect("could not obtain filesystem client", e))?;
        let options = FileOptions::infer(&url, &cfg.target.options.file_overrides())?;

        // resolve the schema before the header row goes out
        match flow.sample(false).await {
            Ok(_) => {}
            Err(FlowError::EmptySchema) => return Ok((0, 0)),
            Err(err) => return Err(err.into()),
        }

        let bytes = fs.write_dataflow(flow, &url, &options).await?;
        debug!(url, bytes, rows = flow.count(), "wrote target objects");
        return Ok((flow.count(), bytes));
    }

    if cfg.options.stdout {
        match flow.sample(false).await {
            Ok(_) => {}
            Err(FlowError::EmptySchema) => return Ok((0, 0)),
            Err(err) => return Err(err.into()),
        }
        let bytes = local::write_stdout(flow).await?;
        return Ok((flow.count(), bytes));
    }

    Err(TaskError::InvalidConfig(
        "target for output is not specified".to_string(),
    ))
}

/// Replaces calendar tokens (`{YYYY}`, `{MM}`, `{DD}`, `{HH}`) in a
/// target URL so date-partitioned prefixes need no external templating.
pub fn date_map_substitute(url: &str, now: DateTime<Utc>) -> String {
    url.replace("{YYYY}", &format!("{:04}", now.year()))
        .replace("{YY}", &format!("{:02}", now.year() % 100))
        .replace("{MM}", &format!("{:02}", now.month()))
        .replace("{DD}", &format!("{:02}", now.day()))
        .replace("{HH}", &format!("{:02}", now.hour()))
}
