use crate::{
    config::{Config, Mode},
    error::TaskError,
};
use connectors::Dialect;
use rand::Rng;
use std::fmt;
use tracing::trace;

/// Transfer topology a config classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    DbToDb,
    DbToFile,
    FileToDb,
    FileToFile,
    ApiToDb,
    ApiToFile,
    DbSql,
    DbTransform,
    Discover,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::DbToDb => "db-db",
            Topology::DbToFile => "db-file",
            Topology::FileToDb => "file-db",
            Topology::FileToFile => "file-file",
            Topology::ApiToDb => "api-db",
            Topology::ApiToFile => "api-file",
            Topology::DbSql => "db-sql",
            Topology::DbTransform => "db-transform",
            Topology::Discover => "discover",
        };
        f.write_str(name)
    }
}

/// Validates the mode/key prerequisites and classifies the config into
/// a topology. First match wins; anything unmatched is an invalid
/// configuration.
pub fn classify(cfg: &Config) -> Result<Topology, TaskError> {
    if let Mode::Other(raw) = &cfg.mode {
        return Err(TaskError::InvalidMode(raw.clone()));
    }
    if cfg.mode == Mode::Upsert {
        if cfg.target.primary_key.is_empty() || cfg.target.update_key.is_empty() {
            return Err(TaskError::MissingUpsertKeys);
        }
        // custom sql must carry the watermark placeholder; catch it
        // before any connection is opened (.sql files resolve later)
        let stream = &cfg.source.stream;
        if stream.chars().any(char::is_whitespace)
            && !stream.to_lowercase().ends_with(".sql")
            && !stream.contains("{upsert_where_cond}")
        {
            return Err(TaskError::MissingUpsertPlaceholder);
        }
    }

    let src_file = cfg.options.stdin || cfg.source.conn.kind.is_file();
    let tgt_file = cfg.options.stdout || cfg.target.conn.kind.is_file();
    let src_db = cfg.source.conn.kind.is_db();
    let tgt_db = cfg.target.conn.kind.is_db();
    let src_api = cfg.source.conn.kind.is_api();
    let src_stream = !cfg.source.stream.is_empty();
    let transform = !cfg.target.transform.is_empty();

    trace!(
        src_file,
        tgt_file,
        src_db,
        tgt_db,
        src_api,
        src_stream,
        "classifying task"
    );

    if cfg.mode == Mode::Discover {
        return Ok(Topology::Discover);
    }

    let topology = if src_db && tgt_db && !transform {
        Some(Topology::DbToDb)
    } else if src_file && tgt_db && !transform {
        Some(Topology::FileToDb)
    } else if src_db && src_stream && !tgt_db && tgt_file {
        Some(Topology::DbToFile)
    } else if src_file && !src_db && !tgt_db && tgt_file {
        Some(Topology::FileToFile)
    } else if src_api && src_stream && tgt_db {
        Some(Topology::ApiToDb)
    } else if src_api && src_stream && tgt_file {
        Some(Topology::ApiToFile)
    } else if tgt_db && transform {
        Some(Topology::DbTransform)
    } else if tgt_db && !cfg.target.options.post_sql.is_empty() {
        Some(Topology::DbSql)
    } else {
        None
    };

    topology.ok_or_else(|| {
        TaskError::InvalidConfig(format!(
            "cannot determine a transfer topology \
             (src_file: {src_file}, tgt_file: {tgt_file}, src_db: {src_db}, \
             tgt_db: {tgt_db}, src_api: {src_api}, src_stream: {src_stream})"
        ))
    })
}

/// Reserves a temp-table name when the config does not pin one: the
/// final object name, truncated for dialects with short identifier
/// limits, plus `_tmp`, one digit, and one lowercase alphanumeric.
pub fn reserve_temp_name(cfg: &mut Config, dialect: Dialect) {
    if !cfg.target.options.table_tmp.is_empty() {
        return;
    }

    let mut base = cfg.target.object.clone();
    if let Some(cap) = dialect.temp_base_limit() {
        if base.len() > cap {
            base.truncate(cap);
        }
    }

    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let digit = char::from(b'0' + rng.gen_range(0..10));
    let alnum = char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]);

    cfg.target.options.table_tmp = format!("{base}_tmp{digit}{alnum}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config(doc: &str) -> Config {
        let mut cfg = Config::from_str(doc).unwrap();
        cfg.prepare().unwrap();
        cfg
    }

    #[test]
    fn classification_table() {
        let cases: &[(&str, Topology)] = &[
            (
                "source: {conn: 'memory://s', stream: t}\ntarget: {conn: 'memory://d', object: t}",
                Topology::DbToDb,
            ),
            (
                "source: {conn: '/tmp/in.csv'}\ntarget: {conn: 'memory://d', object: t}",
                Topology::FileToDb,
            ),
            (
                "source: {conn: 'memory://s', stream: t}\ntarget: {conn: 's3://b/p/', object: out}",
                Topology::DbToFile,
            ),
            (
                "source: {conn: '/tmp/in.csv'}\ntarget: {conn: 'file:///tmp/out.csv'}",
                Topology::FileToFile,
            ),
            (
                "source: {conn: 'https://api.example.com', stream: events}\ntarget: {conn: 'memory://d', object: t}",
                Topology::ApiToDb,
            ),
            (
                "source: {conn: 'https://api.example.com', stream: events}\ntarget: {conn: '/tmp/out/'}",
                Topology::ApiToFile,
            ),
            (
                "target: {conn: 'memory://d', transform: models/run}",
                Topology::DbTransform,
            ),
            (
                "target: {conn: 'memory://d', options: {post_sql: 'vacuum'}}",
                Topology::DbSql,
            ),
        ];
        for (doc, expected) in cases {
            let cfg = config(doc);
            assert_eq!(classify(&cfg).unwrap(), *expected, "doc: {doc}");
        }
    }

    #[test]
    fn unmatched_config_is_invalid() {
        let cfg = config("source: {conn: 'memory://s'}");
        assert!(matches!(classify(&cfg), Err(TaskError::InvalidConfig(_))));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let cfg = config("mode: sideways\nsource: {conn: 'memory://s', stream: t}\ntarget: {conn: 'memory://d', object: t}");
        match classify(&cfg) {
            Err(TaskError::InvalidMode(mode)) => assert_eq!(mode, "sideways"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn upsert_custom_sql_needs_placeholder_before_any_io() {
        let cfg = config(
            "mode: upsert\n\
             source: {conn: 'memory://s', stream: 'select * from t', primary_key: [id], update_key: id}\n\
             target: {conn: 'memory://d', object: t}",
        );
        assert!(matches!(
            classify(&cfg),
            Err(TaskError::MissingUpsertPlaceholder)
        ));

        let cfg = config(
            "mode: upsert\n\
             source: {conn: 'memory://s', stream: 'select * from t where {upsert_where_cond}', primary_key: [id], update_key: id}\n\
             target: {conn: 'memory://d', object: t}",
        );
        assert_eq!(classify(&cfg).unwrap(), Topology::DbToDb);
    }

    #[test]
    fn upsert_requires_keys() {
        let cfg = config("mode: upsert\nsource: {conn: 'memory://s', stream: t}\ntarget: {conn: 'memory://d', object: t}");
        assert!(matches!(classify(&cfg), Err(TaskError::MissingUpsertKeys)));
    }

    #[test]
    fn temp_names_respect_short_identifier_dialects() {
        let mut cfg = config(
            "source: {conn: 'memory://s', stream: t}\ntarget: {conn: 'memory://d', object: a_rather_long_final_table_name}",
        );
        reserve_temp_name(&mut cfg, Dialect::Oracle);
        let tmp = &cfg.target.options.table_tmp;
        assert!(tmp.len() <= 30, "oracle temp name too long: {tmp}");
        assert!(tmp.contains("_tmp"));

        let mut cfg2 = config(
            "source: {conn: 'memory://s', stream: t}\ntarget: {conn: 'memory://d', object: orders}",
        );
        reserve_temp_name(&mut cfg2, Dialect::Postgres);
        assert!(cfg2.target.options.table_tmp.starts_with("orders_tmp"));
    }
}
