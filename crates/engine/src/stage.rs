use crate::{
    config::{Config, Mode},
    env,
    error::TaskError,
    planner, sqltext,
    task::{Progress, TaskShared},
};
use connectors::{dialect::render, error::DbError, DatabaseDriver};
use dataflow::Dataflow;
use model::records::dataset::Dataset;
use std::sync::Arc;
use tracing::{debug, warn};

/// Loads a dataflow into the target database through a staged table:
/// create temp from the inferred schema, stream rows in, validate
/// counts and checksums, then promote to the final object inside a
/// transaction under the task's mode. The staged table is dropped on
/// every exit path.
pub async fn write_to_db(
    cfg: &mut Config,
    flow: &mut Dataflow,
    tgt: Arc<dyn DatabaseDriver>,
    progress: &Progress,
    shared: &TaskShared,
) -> Result<u64, TaskError> {
    let final_table = cfg.target.object.clone();
    if final_table.is_empty() {
        return Err(TaskError::InvalidConfig(
            "target object is not set".to_string(),
        ));
    }

    if !cfg.target.options.use_bulk {
        tgt.set_prop("use_bulk", "false");
        tgt.set_prop("allow_bulk_import", "false");
    }

    if cfg.target.options.table_tmp.is_empty() {
        planner::reserve_temp_name(cfg, tgt.dialect());
    }
    let tmp_table = cfg.target.options.table_tmp.clone();

    // pre-sql runs before anything is staged; failure aborts cleanly
    if !cfg.target.options.pre_sql.is_empty() {
        progress.set("executing pre-sql");
        let sql = sqltext::get_sql_text(&cfg.target.options.pre_sql)?;
        let sql = sqltext::substitute_drop_view(&sql, tgt.dialect(), &final_table);
        sqltext::assert_resolved(&sql)?;
        tgt.exec(&sql).await?;
    }

    // a staged table leaked by a prior run is dead weight
    tgt.drop_table(&tmp_table).await?;

    let mut sample = flow.sample(true).await?;
    create_table_if_not_exists(tgt.as_ref(), &sample, &tmp_table, "").await?;
    cfg.target.tmp_table_created = true;
    shared.set_temp(&tmp_table);

    let result = stage_and_promote(
        cfg,
        flow,
        tgt.as_ref(),
        progress,
        &final_table,
        &tmp_table,
        &mut sample,
    )
    .await;

    if let Err(err) = tgt.drop_table(&tmp_table).await {
        warn!(table = %tmp_table, error = %err, "could not drop staged table");
    }
    shared.clear_temp();
    cfg.target.tmp_table_created = false;

    result
}

async fn stage_and_promote(
    cfg: &mut Config,
    flow: &mut Dataflow,
    tgt: &dyn DatabaseDriver,
    progress: &Progress,
    final_table: &str,
    tmp_table: &str,
    sample: &mut Dataset,
) -> Result<u64, TaskError> {
    let cnt = load_staged(cfg, flow, tgt, progress, tmp_table).await?;

    if flow.cancel_token().is_cancelled() {
        return Err(TaskError::Interrupted);
    }

    // the final object changes only inside this transaction
    let serializable = tgt.dialect().serializable_promotion();
    tgt.begin(serializable)
        .await
        .map_err(TaskError::Promotion)?;

    match promote(cfg, flow, tgt, progress, final_table, tmp_table, sample, cnt).await {
        Ok(()) => {
            tgt.commit().await.map_err(TaskError::Promotion)?;
            Ok(cnt)
        }
        Err(err) => {
            if let Err(rollback_err) = tgt.rollback().await {
                warn!(error = %rollback_err, "rollback failed after promotion error");
            }
            Err(err)
        }
    }
}

/// Phase B: move the rows into the staged table, either through the
/// driver's direct-copy path or the streaming import, then validate.
async fn load_staged(
    cfg: &Config,
    flow: &mut Dataflow,
    tgt: &dyn DatabaseDriver,
    progress: &Progress,
    tmp_table: &str,
) -> Result<u64, TaskError> {
    if let Some(fs_url) = flow.fs_url.clone() {
        let scheme = fs_url.split("://").next().unwrap_or("file");
        if tgt.supports_direct_copy(scheme) {
            // credentials come from the source connection, not the flow
            let credentials = cfg.source.conn.data.clone();
            tgt.copy_direct(tmp_table, &fs_url, &credentials).await?;
            flow.set_empty();
            debug!(url = %fs_url, "copied directly from source filesystem");
            let cnt = tgt.get_count(tmp_table).await?;
            return Ok(cnt);
        }
    }

    progress.set("streaming inserts");
    let cnt = tgt.bulk_import_flow(tmp_table, flow).await.map_err(|e| match e {
        DbError::Flow(flow_err) => TaskError::from(flow_err),
        other => TaskError::Db(other),
    })?;

    let table_cnt = tgt.get_count(tmp_table).await?;
    if cnt != table_cnt {
        return Err(TaskError::RowCountMismatch {
            stream: cnt,
            table: table_cnt,
        });
    }

    let stats = flow.sync_stats();
    if let Err(err) = tgt.compare_checksums(tmp_table, &flow.columns, &stats).await {
        if env_flag_checksum(cfg) {
            return Err(TaskError::ChecksumFailure(err));
        }
        debug!(error = %err, "checksum comparison failed");
    }

    Ok(cnt)
}

fn env_flag_checksum(cfg: &Config) -> bool {
    env::env_flag(env::ERROR_ON_CHECKSUM_FAILURE, &cfg.env)
}

/// Phase C: resolve the final table and apply the mode, then post-sql.
/// Runs inside the promotion transaction.
#[allow(clippy::too_many_arguments)]
async fn promote(
    cfg: &mut Config,
    flow: &mut Dataflow,
    tgt: &dyn DatabaseDriver,
    progress: &Progress,
    final_table: &str,
    tmp_table: &str,
    sample: &mut Dataset,
    cnt: u64,
) -> Result<(), TaskError> {
    if cnt == 0 {
        progress.set("0 rows inserted. nothing to do.");
    }

    if cnt > 0 && cfg.mode.is_drop() {
        tgt.drop_table(final_table)
            .await
            .map_err(TaskError::Promotion)?;
        progress.set(format!("dropped table {final_table}"));
    }

    // final schema reflects the stats the full stream accumulated
    sample.columns = flow.columns.clone();
    sample.inferred = true;
    let created = create_table_if_not_exists(
        tgt,
        sample,
        final_table,
        &cfg.target.options.table_ddl,
    )
    .await?;
    if created {
        progress.set(format!("created table {final_table}"));
    } else if cfg.target.options.adjust_column_type {
        tgt.optimize_table(final_table, &flow.columns)
            .await
            .map_err(TaskError::Promotion)?;
    }

    if cnt > 0 {
        if cfg.mode.is_drop() && cfg.target.options.use_swap {
            // the old final lands under the staged name and is dropped
            // with it
            tgt.swap_table(tmp_table, final_table)
                .await
                .map_err(TaskError::Promotion)?;
            progress.set(format!("swapped staged table into {final_table}"));
        } else if cfg.mode.is_append() || cfg.mode.is_drop() {
            insert_from_staged(tgt, final_table, tmp_table).await?;
        } else if cfg.mode == Mode::Truncate {
            let truncate_sql = render(
                tgt.template("core.truncate_table")
                    .unwrap_or("truncate table {table}"),
                &[("table", final_table)],
            );
            tgt.exec(&truncate_sql).await.map_err(TaskError::Promotion)?;
            progress.set(format!("truncated table {final_table}"));
            insert_from_staged(tgt, final_table, tmp_table).await?;
        } else if cfg.mode == Mode::Upsert {
            let affected = tgt
                .upsert(tmp_table, final_table, &cfg.target.primary_key)
                .await
                .map_err(TaskError::Promotion)?;
            progress.set(format!("{affected} inserts / updates"));
        }
    }

    if !cfg.target.options.post_sql.is_empty() {
        progress.set("executing post-sql");
        let sql = sqltext::get_sql_text(&cfg.target.options.post_sql)?;
        let sql = sqltext::substitute_drop_view(&sql, tgt.dialect(), final_table);
        sqltext::assert_resolved(&sql)?;
        tgt.exec(&sql).await.map_err(TaskError::Promotion)?;
    }

    Ok(())
}

/// Moves rows from the staged table into the final one, reconciling
/// column names case-insensitively and casting where the types differ.
async fn insert_from_staged(
    tgt: &dyn DatabaseDriver,
    final_table: &str,
    tmp_table: &str,
) -> Result<(), TaskError> {
    let mut staged_columns = tgt.get_columns(tmp_table).await.map_err(TaskError::Promotion)?;
    let target_columns = tgt
        .get_columns(final_table)
        .await
        .map_err(TaskError::Promotion)?;

    // placeholder-named staged columns adopt the target's names in order
    if staged_columns.is_dummy() && staged_columns.len() == target_columns.len() {
        for (staged, target) in staged_columns.0.iter_mut().zip(target_columns.iter()) {
            staged.name = target.name.clone();
        }
    }

    let target_fields = tgt
        .validate_column_names(&target_columns, &staged_columns)
        .map_err(TaskError::Promotion)?;
    let source_fields = tgt.cast_columns_for_select(&staged_columns, &target_columns);

    let quoted_targets: Vec<String> = target_fields.iter().map(|f| tgt.quote(f)).collect();
    let sql = render(
        tgt.template("core.insert_from_table").unwrap_or(
            "insert into {tgt_table} ({tgt_fields}) select {src_fields} from {src_table}",
        ),
        &[
            ("tgt_table", final_table),
            ("src_table", tmp_table),
            ("tgt_fields", quoted_targets.join(", ").as_str()),
            ("src_fields", source_fields.join(", ").as_str()),
        ],
    );
    tgt.exec(&sql).await.map_err(TaskError::Promotion)?;
    debug!(
        target = final_table,
        staged = tmp_table,
        "inserted rows from staged table"
    );
    Ok(())
}

/// Creates `table` from the sample's inferred DDL (or the given DDL)
/// unless it already exists. Returns whether it was created.
async fn create_table_if_not_exists(
    tgt: &dyn DatabaseDriver,
    sample: &Dataset,
    table: &str,
    table_ddl: &str,
) -> Result<bool, TaskError> {
    if tgt.table_exists(table).await? {
        return Ok(false);
    }

    let ddl = if table_ddl.is_empty() {
        tgt.generate_ddl(table, sample)?
    } else {
        sqltext::get_sql_text(table_ddl)?
    };

    match tgt.exec(&ddl).await {
        Ok(_) => Ok(true),
        Err(err) => {
            let filter = tgt
                .template("variable.error_filter_table_exists")
                .unwrap_or("already exists");
            if err.to_string().contains(filter) {
                // lost a create race; the table is there
                warn!(table, "table appeared while creating it");
                return Ok(false);
            }
            Err(TaskError::Db(err))
        }
    }
}
