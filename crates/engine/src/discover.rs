use crate::error::TaskError;
use connectors::{
    filesystem::{validate_object_path, FileOptions},
    registry, ConnInfo,
};
use model::core::column::Columns;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Knobs of the read-only discover mode.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Glob over table or file names (`*` and `?`).
    pub filter: Option<String>,
    /// Also enumerate columns (per-file schema probing on filesystems).
    pub column_level: bool,
    /// Expand nested schemata instead of only the connection default.
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaEntry {
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "Columns::is_empty")]
    pub columns: Columns,
}

/// Result pair of a discovery run: object paths for filesystems,
/// schema/table entries for databases.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub files: Vec<String>,
    pub schemata: Vec<SchemaEntry>,
}

/// Enumerates what lives behind a connection. Never writes.
pub async fn discover(
    conn: &ConnInfo,
    options: &DiscoverOptions,
    cancel: CancellationToken,
) -> Result<Discovery, TaskError> {
    if conn.kind.is_db() {
        discover_database(conn, options).await
    } else if conn.kind.is_file() {
        discover_filesystem(conn, options, cancel).await
    } else {
        Err(TaskError::InvalidConfig(format!(
            "cannot discover over a '{}' connection",
            conn.kind
        )))
    }
}

async fn discover_database(
    conn: &ConnInfo,
    options: &DiscoverOptions,
) -> Result<Discovery, TaskError> {
    let driver = registry::connect_database(conn)
        .await
        .map_err(|e| TaskError::connect("could not initialize connection for discovery", e))?;

    let schemata = if options.recursive {
        driver.list_schemata().await?
    } else {
        match conn.schema() {
            Some(schema) => vec![schema.to_string()],
            None => driver.list_schemata().await?,
        }
    };

    let mut discovery = Discovery::default();
    for schema in schemata {
        for table in driver.list_tables(&schema).await? {
            let bare = table.split_once('.').map(|(_, t)| t).unwrap_or(&table);
            if let Some(pattern) = &options.filter {
                if !glob_match(pattern, bare) && !glob_match(pattern, &table) {
                    continue;
                }
            }
            let columns = if options.column_level {
                driver.get_columns(&table).await?
            } else {
                Columns::default()
            };
            discovery.schemata.push(SchemaEntry {
                schema: schema.clone(),
                table: table.clone(),
                columns,
            });
        }
    }

    debug!(tables = discovery.schemata.len(), "database discovery done");
    Ok(discovery)
}

async fn discover_filesystem(
    conn: &ConnInfo,
    options: &DiscoverOptions,
    cancel: CancellationToken,
) -> Result<Discovery, TaskError> {
    let fs = registry::filesystem(conn)
        .map_err(|e| TaskError::connect("could not obtain filesystem client", e))?;

    let mut discovery = Discovery::default();
    for path in fs.list(conn.base_url()).await? {
        validate_object_path(&path)?;
        let name = path.rsplit('/').next().unwrap_or(&path);
        if let Some(pattern) = &options.filter {
            if !glob_match(pattern, name) {
                continue;
            }
        }

        let columns = if options.column_level {
            probe_file_columns(&fs, &path, cancel.clone()).await
        } else {
            Columns::default()
        };
        if options.column_level {
            discovery.schemata.push(SchemaEntry {
                schema: String::new(),
                table: name.to_string(),
                columns,
            });
        }
        discovery.files.push(path);
    }

    debug!(files = discovery.files.len(), "filesystem discovery done");
    Ok(discovery)
}

async fn probe_file_columns(
    fs: &std::sync::Arc<dyn connectors::FileSystemDriver>,
    path: &str,
    cancel: CancellationToken,
) -> Columns {
    let options = match FileOptions::infer(path, &Default::default()) {
        Ok(options) => options,
        Err(_) => return Columns::default(),
    };
    match fs.read_dataflow(path, &options, cancel).await {
        Ok(mut flow) => match flow.sample(false).await {
            Ok(sample) => {
                flow.close();
                sample.columns
            }
            Err(_) => Columns::default(),
        },
        Err(_) => Columns::default(),
    }
}

/// Minimal glob: `*` matches any run, `?` matches one character.
/// Comparison is case-insensitive like the identifier rules elsewhere.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::DatabaseDriver;

    #[test]
    fn glob_forms() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("t1*", "t1k"));
        assert!(glob_match("T?K", "t1k"));
        assert!(!glob_match("t2*", "t1k"));
        assert!(glob_match("*.csv", "data.csv"));
    }

    #[tokio::test]
    async fn database_discovery_with_columns() {
        let url = "memory://discover_db";
        let conn = ConnInfo::from_url(url).unwrap();
        let driver = connectors::memory::MemoryDriver::connect(url);
        let _ = driver.drop_table("sales.orders").await;
        let _ = driver.drop_table("sales.skip_me").await;
        driver
            .exec("create table sales.orders (\"id\" bigint, \"total\" numeric)")
            .await
            .unwrap();
        driver
            .exec("create table sales.skip_me (\"x\" text)")
            .await
            .unwrap();

        let options = DiscoverOptions {
            filter: Some("orders*".to_string()),
            column_level: true,
            recursive: true,
        };
        let found = discover(&conn, &options, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.schemata.len(), 1);
        assert_eq!(found.schemata[0].table, "sales.orders");
        let names = found.schemata[0].columns.names();
        assert!(names.contains(&"id".to_string()));
        assert!(names.contains(&"total".to_string()));
    }

    #[tokio::test]
    async fn filesystem_discovery_probes_columns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "x,y\n1,2\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "not csv").unwrap();

        let conn = ConnInfo::from_url(dir.path().to_str().unwrap()).unwrap();
        let options = DiscoverOptions {
            filter: Some("*.csv".to_string()),
            column_level: true,
            recursive: false,
        };
        let found = discover(&conn, &options, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.files.len(), 1);
        assert_eq!(found.schemata[0].columns.names(), vec!["x", "y"]);
    }
}
