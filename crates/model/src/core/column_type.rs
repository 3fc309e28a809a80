use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::HashMap, fmt};

/// Logical column type shared by every endpoint. Each driver maps its
/// native types into this set on read and renders them back out on DDL
/// generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Integer,
    Decimal,
    Float,
    Text,
    Timestamp,
    Datetime,
    Date,
    Json,
    Binary,
}

/// SQL dialect family, used where rendering differs by target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFamily {
    Postgres,
    MySql,
    Oracle,
    Snowflake,
    Generic,
}

lazy_static! {
    static ref DB_TYPE_MAP: HashMap<&'static str, ColumnType> = build_db_type_map();
}

impl ColumnType {
    /// Parses a native database type name (`BIGINT`, `character varying`,
    /// `NUMBER`, ...) into the logical type.
    pub fn from_db_type(type_name: &str) -> Result<Self, String> {
        let normalized = normalize_type_name(type_name);
        DB_TYPE_MAP
            .get(normalized.as_str())
            .copied()
            .ok_or_else(|| format!("unknown column type: {type_name}"))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Decimal | ColumnType::Float
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Timestamp | ColumnType::Datetime | ColumnType::Date
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Json)
    }

    /// Whether a length qualifier (`VARCHAR(n)`) is meaningful for the
    /// rendered type.
    pub fn supports_length(&self, family: SqlFamily) -> bool {
        match family {
            SqlFamily::MySql | SqlFamily::Oracle | SqlFamily::Snowflake => {
                matches!(self, ColumnType::Text)
            }
            SqlFamily::Postgres | SqlFamily::Generic => false,
        }
    }

    pub fn db_name(&self, family: SqlFamily) -> Cow<'static, str> {
        match family {
            SqlFamily::Postgres | SqlFamily::Generic => Cow::Borrowed(match self {
                ColumnType::Bool => "BOOLEAN",
                ColumnType::Integer => "BIGINT",
                ColumnType::Decimal => "NUMERIC",
                ColumnType::Float => "DOUBLE PRECISION",
                ColumnType::Text => "TEXT",
                ColumnType::Timestamp => "TIMESTAMPTZ",
                ColumnType::Datetime => "TIMESTAMP",
                ColumnType::Date => "DATE",
                ColumnType::Json => "JSONB",
                ColumnType::Binary => "BYTEA",
            }),
            SqlFamily::MySql => Cow::Borrowed(match self {
                ColumnType::Bool => "BOOLEAN",
                ColumnType::Integer => "BIGINT",
                ColumnType::Decimal => "DECIMAL(38,9)",
                ColumnType::Float => "DOUBLE",
                ColumnType::Text => "TEXT",
                ColumnType::Timestamp => "DATETIME",
                ColumnType::Datetime => "DATETIME",
                ColumnType::Date => "DATE",
                ColumnType::Json => "JSON",
                ColumnType::Binary => "BLOB",
            }),
            SqlFamily::Oracle => Cow::Borrowed(match self {
                ColumnType::Bool => "NUMBER(1)",
                ColumnType::Integer => "NUMBER(19)",
                ColumnType::Decimal => "NUMBER(38,9)",
                ColumnType::Float => "BINARY_DOUBLE",
                ColumnType::Text => "VARCHAR2(4000)",
                ColumnType::Timestamp => "TIMESTAMP",
                ColumnType::Datetime => "TIMESTAMP",
                ColumnType::Date => "DATE",
                ColumnType::Json => "CLOB",
                ColumnType::Binary => "BLOB",
            }),
            SqlFamily::Snowflake => Cow::Borrowed(match self {
                ColumnType::Bool => "BOOLEAN",
                ColumnType::Integer => "NUMBER(38,0)",
                ColumnType::Decimal => "NUMBER(38,9)",
                ColumnType::Float => "FLOAT",
                ColumnType::Text => "VARCHAR",
                ColumnType::Timestamp => "TIMESTAMP_TZ",
                ColumnType::Datetime => "TIMESTAMP_NTZ",
                ColumnType::Date => "DATE",
                ColumnType::Json => "VARIANT",
                ColumnType::Binary => "BINARY",
            }),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bool => "bool",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Datetime => "datetime",
            ColumnType::Date => "date",
            ColumnType::Json => "json",
            ColumnType::Binary => "binary",
        };
        f.write_str(name)
    }
}

fn normalize_type_name(type_name: &str) -> String {
    let trimmed = type_name.trim().to_uppercase();
    // strip length/precision qualifiers: VARCHAR(255) -> VARCHAR
    match trimmed.find('(') {
        Some(idx) => trimmed[..idx].trim().to_string(),
        None => trimmed,
    }
}

fn build_db_type_map() -> HashMap<&'static str, ColumnType> {
    use ColumnType::*;

    let entries = [
        ("BOOLEAN", Bool),
        ("BOOL", Bool),
        ("BIT", Bool),
        ("TINYINT", Integer),
        ("SMALLINT", Integer),
        ("INT2", Integer),
        ("MEDIUMINT", Integer),
        ("INT", Integer),
        ("INT4", Integer),
        ("INTEGER", Integer),
        ("BIGINT", Integer),
        ("INT8", Integer),
        ("NUMBER", Decimal),
        ("NUMERIC", Decimal),
        ("DECIMAL", Decimal),
        ("NEWDECIMAL", Decimal),
        ("FLOAT", Float),
        ("FLOAT4", Float),
        ("FLOAT8", Float),
        ("REAL", Float),
        ("DOUBLE", Float),
        ("DOUBLE PRECISION", Float),
        ("BINARY_DOUBLE", Float),
        ("CHAR", Text),
        ("BPCHAR", Text),
        ("CHARACTER", Text),
        ("NCHAR", Text),
        ("VARCHAR", Text),
        ("VARCHAR2", Text),
        ("NVARCHAR", Text),
        ("CHARACTER VARYING", Text),
        ("TEXT", Text),
        ("TINYTEXT", Text),
        ("MEDIUMTEXT", Text),
        ("LONGTEXT", Text),
        ("CLOB", Text),
        ("NAME", Text),
        ("STRING", Text),
        ("UUID", Text),
        ("XML", Text),
        ("TIMESTAMP", Datetime),
        ("DATETIME", Datetime),
        ("TIMESTAMP WITHOUT TIME ZONE", Datetime),
        ("TIMESTAMP_NTZ", Datetime),
        ("TIMESTAMPTZ", Timestamp),
        ("TIMESTAMP WITH TIME ZONE", Timestamp),
        ("TIMESTAMP_TZ", Timestamp),
        ("DATE", Date),
        ("JSON", Json),
        ("JSONB", Json),
        ("VARIANT", Json),
        ("BYTEA", Binary),
        ("BINARY", Binary),
        ("VARBINARY", Binary),
        ("BLOB", Binary),
        ("TINYBLOB", Binary),
        ("MEDIUMBLOB", Binary),
        ("LONGBLOB", Binary),
        ("RAW", Binary),
    ];

    let mut map = HashMap::new();
    for (name, column_type) in entries {
        map.insert(name, column_type);
    }
    map
}
