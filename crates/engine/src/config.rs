use crate::error::TaskError;
use connectors::ConnInfo;
use model::core::column::Columns;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

/// Load mode of a task. Unknown strings survive parsing and are
/// rejected at prepare time, so the caller sees which mode was wrong
/// rather than a generic parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Append,
    Drop,
    Truncate,
    Upsert,
    FullRefresh,
    Snapshot,
    Discover,
    Other(String),
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Append => "append",
            Mode::Drop => "drop",
            Mode::Truncate => "truncate",
            Mode::Upsert => "upsert",
            Mode::FullRefresh => "full-refresh",
            Mode::Snapshot => "snapshot",
            Mode::Discover => "discover",
            Mode::Other(s) => s,
        }
    }

    /// Drop-style modes recreate the final table from scratch.
    pub fn is_drop(&self) -> bool {
        matches!(self, Mode::Drop | Mode::FullRefresh)
    }

    /// Append-style modes insert without touching existing rows.
    pub fn is_append(&self) -> bool {
        matches!(self, Mode::Append | Mode::Snapshot)
    }

    fn from_raw(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "append" => Mode::Append,
            "drop" => Mode::Drop,
            "truncate" => Mode::Truncate,
            "upsert" => Mode::Upsert,
            "full-refresh" | "full_refresh" => Mode::FullRefresh,
            "snapshot" => Mode::Snapshot,
            "discover" => Mode::Discover,
            other => Mode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Mode::from_raw(s))
    }
}

impl Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Mode::from_raw(&raw))
    }
}

/// Free-form stream options. Accepts a strict JSON object, a map, or a
/// relaxed `k: v` form with bareword keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamOptions(pub HashMap<String, String>);

impl StreamOptions {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for StreamOptions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Map(HashMap<String, serde_json::Value>),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Map(map) => Ok(StreamOptions(stringify_map(map))),
            Repr::Text(text) => {
                parse_relaxed_options(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}

fn stringify_map(map: HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        })
        .collect()
}

/// Parses `{"k": "v"}` or the relaxed `k: v, k2: v2` form. The error
/// carries the fragment that failed.
pub fn parse_relaxed_options(text: &str) -> Result<StreamOptions, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(StreamOptions::default());
    }

    if trimmed.starts_with('{') {
        if let Ok(map) = serde_json::from_str::<HashMap<String, serde_json::Value>>(trimmed) {
            return Ok(StreamOptions(stringify_map(map)));
        }
    }

    let body = trimmed.trim_start_matches('{').trim_end_matches('}');
    let mut map = HashMap::new();
    for fragment in body.split([',', '\n']) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        let (key, value) = fragment
            .split_once([':', '='])
            .ok_or_else(|| format!("could not parse options near '{fragment}'"))?;
        let key = key.trim().trim_matches('"');
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if key.is_empty() {
            return Err(format!("could not parse options near '{fragment}'"));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(StreamOptions(map))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub conn: ConnInfo,
    /// Table/view name, raw SQL, or a `.sql` file path.
    pub stream: String,
    pub primary_key: Vec<String>,
    pub update_key: String,
    pub limit: u64,
    pub options: StreamOptions,
    #[serde(skip)]
    pub columns: Columns,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetOptions {
    pub table_ddl: String,
    pub table_tmp: String,
    pub pre_sql: String,
    pub post_sql: String,
    pub use_bulk: bool,
    /// Permits widening existing final-table columns to fit incoming
    /// data.
    pub adjust_column_type: bool,
    /// Promote drop-mode loads by swapping the staged table into place
    /// instead of copying rows out of it.
    pub use_swap: bool,
    /// File-target tuning (format, delimiter, header, compression, ...).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for TargetOptions {
    fn default() -> Self {
        TargetOptions {
            table_ddl: String::new(),
            table_tmp: String::new(),
            pre_sql: String::new(),
            post_sql: String::new(),
            use_bulk: true,
            adjust_column_type: false,
            use_swap: false,
            extra: HashMap::new(),
        }
    }
}

impl TargetOptions {
    pub fn file_overrides(&self) -> HashMap<String, String> {
        self.extra
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetConfig {
    pub conn: ConnInfo,
    /// Final object name (or output URL for file targets).
    pub object: String,
    pub primary_key: Vec<String>,
    pub update_key: String,
    /// External transform directive; running it is delegated to a
    /// transform runner.
    pub transform: String,
    pub options: TargetOptions,
    #[serde(skip)]
    pub columns: Columns,
    #[serde(skip)]
    pub tmp_table_created: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub limit: u64,
}

/// The declarative task document. Immutable after `prepare`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub mode: Mode,
    pub options: GlobalOptions,
    /// Unknown top-level keys are preserved here, alongside validation
    /// hints and per-task environment overrides.
    #[serde(flatten)]
    pub env: HashMap<String, serde_json::Value>,
    #[serde(skip)]
    pub upsert_value: Option<String>,
    #[serde(skip)]
    prepared: bool,
}

impl Config {
    /// Parses a YAML or JSON task document.
    pub fn from_str(document: &str) -> Result<Self, TaskError> {
        serde_yaml::from_str(document).map_err(|e| TaskError::Parse(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, TaskError> {
        serde_yaml::to_string(self).map_err(|e| TaskError::Parse(e.to_string()))
    }

    /// Normalizes the document: defaults the mode, mirrors source keys
    /// onto the target, applies schema prefixes, and copies the global
    /// row limit into the source. Validation beyond normalization lives
    /// in the planner.
    pub fn prepare(&mut self) -> Result<(), TaskError> {
        if self.prepared {
            return Ok(());
        }

        if self.target.primary_key.is_empty() {
            self.target.primary_key = self.source.primary_key.clone();
        }
        if self.target.update_key.is_empty() {
            self.target.update_key = self.source.update_key.clone();
        }

        if self.options.limit > 0 && self.source.limit == 0 {
            self.source.limit = self.options.limit;
        }

        if let Some(schema) = self.target.conn.schema().map(str::to_string) {
            self.target.object = qualify(&schema, &self.target.object);
            self.target.options.table_tmp = qualify(&schema, &self.target.options.table_tmp);
        }

        self.prepared = true;
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }
}

/// Prefixes `name` with `schema.` when unqualified.
fn qualify(schema: &str, name: &str) -> String {
    if name.is_empty() || name.contains('.') || schema.is_empty() {
        name.to_string()
    } else {
        format!("{schema}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::ConnKind;

    #[test]
    fn parses_yaml_document() {
        let doc = r#"
source:
  conn: memory://src
  stream: public.orders
  primary_key: [id]
  update_key: id
target:
  conn: memory://dst
  object: public.orders
  options:
    pre_sql: "select 1"
    use_bulk: false
mode: upsert
options:
  limit: 10
custom_hint: 42
"#;
        let mut cfg = Config::from_str(doc).unwrap();
        assert_eq!(cfg.mode, Mode::Upsert);
        assert_eq!(cfg.source.conn.kind, ConnKind::Memory);
        assert!(!cfg.target.options.use_bulk);
        assert_eq!(cfg.env.get("custom_hint"), Some(&serde_json::json!(42)));

        cfg.prepare().unwrap();
        assert_eq!(cfg.target.primary_key, vec!["id"]);
        assert_eq!(cfg.source.limit, 10);
    }

    #[test]
    fn parses_json_document() {
        let doc = r#"{"source": {"conn": "memory://s", "stream": "t"},
                      "target": {"conn": "memory://d", "object": "t"},
                      "mode": "append"}"#;
        let cfg = Config::from_str(doc).unwrap();
        assert_eq!(cfg.mode, Mode::Append);
        assert_eq!(cfg.source.stream, "t");
    }

    #[test]
    fn unknown_mode_survives_parse() {
        let cfg = Config::from_str("mode: sideways").unwrap();
        assert_eq!(cfg.mode, Mode::Other("sideways".to_string()));
    }

    #[test]
    fn roundtrip_preserves_equivalence() {
        let doc = r#"
source:
  conn: memory://src
  stream: t1
  options: {delimiter: "|", header: "false"}
target:
  conn: memory://dst
  object: t1
mode: truncate
"#;
        let cfg = Config::from_str(doc).unwrap();
        let serialized = cfg.to_yaml().unwrap();
        let reparsed = Config::from_str(&serialized).unwrap();
        assert_eq!(cfg.mode, reparsed.mode);
        assert_eq!(cfg.source, reparsed.source);
        assert_eq!(cfg.target, reparsed.target);
    }

    #[test]
    fn relaxed_options_forms() {
        let opts = parse_relaxed_options(r#"{"delimiter": "|", "header": true}"#).unwrap();
        assert_eq!(opts.get("delimiter"), Some("|"));
        assert_eq!(opts.get("header"), Some("true"));

        let opts = parse_relaxed_options("delimiter: |, header: false").unwrap();
        assert_eq!(opts.get("delimiter"), Some("|"));
        assert_eq!(opts.get("header"), Some("false"));

        let err = parse_relaxed_options("delimiter |").unwrap_err();
        assert!(err.contains("delimiter |"), "error carries fragment: {err}");
    }

    #[test]
    fn schema_prefix_applies_to_unqualified_names() {
        let mut cfg = Config::from_str(
            "source: {conn: 'memory://s', stream: t}\ntarget: {conn: 'memory://d?schema=sales', object: orders}",
        )
        .unwrap();
        cfg.prepare().unwrap();
        assert_eq!(cfg.target.object, "sales.orders");
    }
}
