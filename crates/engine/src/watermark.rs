use crate::{config::Config, error::TaskError};
use connectors::{dialect::render, DatabaseDriver, Dialect};
use model::core::{column_type::ColumnType, value::Value};
use tracing::debug;

/// Computes the incremental lower bound for upsert mode: the maximum
/// `update_key` currently in the final object, rendered as a source-
/// dialect literal. `None` means full load (target absent or empty).
pub async fn get_upsert_value(
    cfg: &Config,
    tgt: &dyn DatabaseDriver,
    src_dialect: Dialect,
) -> Result<Option<String>, TaskError> {
    let sql = render(
        tgt.template("core.max_value")
            .unwrap_or("select max({field}) as max_val from {table}"),
        &[
            ("field", cfg.target.update_key.as_str()),
            ("table", cfg.target.object.as_str()),
        ],
    );

    let data = match tgt.query(&sql).await {
        Ok(data) => data,
        // the final object not existing yet means a full load
        Err(err) if err.to_string().contains("exist") => return Ok(None),
        Err(err) => return Err(TaskError::Db(err)),
    };

    let value = data
        .rows
        .first()
        .and_then(|row| row.first())
        .cloned()
        .unwrap_or(Value::Null);
    if value.is_null() {
        return Ok(None);
    }

    let ctype = data
        .columns
        .0
        .first()
        .map(|c| c.ctype)
        .unwrap_or(ColumnType::Text);

    let literal = match ctype {
        ColumnType::Timestamp | ColumnType::Datetime => {
            let ts = value
                .as_timestamp()
                .ok_or_else(|| TaskError::UnrepresentableWatermark(ctype.to_string()))?;
            let layout = src_dialect
                .template("variable.timestamp_layout")
                .unwrap_or("%Y-%m-%d %H:%M:%S%.3f");
            render(
                src_dialect
                    .template("variable.timestamp_layout_str")
                    .unwrap_or("'{value}'"),
                &[("value", ts.format(layout).to_string().as_str())],
            )
        }
        ColumnType::Date => {
            let ts = value
                .as_timestamp()
                .ok_or_else(|| TaskError::UnrepresentableWatermark(ctype.to_string()))?;
            let layout = src_dialect
                .template("variable.date_layout")
                .unwrap_or("%Y-%m-%d");
            render(
                src_dialect
                    .template("variable.date_layout_str")
                    .unwrap_or("'{value}'"),
                &[("value", ts.format(layout).to_string().as_str())],
            )
        }
        ColumnType::Integer | ColumnType::Decimal | ColumnType::Float => value
            .as_string()
            .ok_or_else(|| TaskError::UnrepresentableWatermark(ctype.to_string()))?,
        ColumnType::Binary => {
            return Err(TaskError::UnrepresentableWatermark(ctype.to_string()))
        }
        _ => {
            let text = value
                .as_string()
                .ok_or_else(|| TaskError::UnrepresentableWatermark(ctype.to_string()))?;
            format!("'{}'", text.replace('\'', "''"))
        }
    };

    debug!(watermark = %literal, "resolved incremental lower bound");
    Ok(Some(literal))
}
