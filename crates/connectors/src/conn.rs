use crate::{dialect::Dialect, error::ConnectorError};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

/// Connection type tag, derived from the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnKind {
    Postgres,
    MySql,
    Oracle,
    Snowflake,
    Memory,
    File,
    S3,
    Api,
    /// No connection given; stdin/stdout tasks and partially-built
    /// configs carry this tag.
    Unspecified,
}

impl ConnKind {
    pub fn is_db(self) -> bool {
        matches!(
            self,
            ConnKind::Postgres
                | ConnKind::MySql
                | ConnKind::Oracle
                | ConnKind::Snowflake
                | ConnKind::Memory
        )
    }

    pub fn is_file(self) -> bool {
        matches!(self, ConnKind::File | ConnKind::S3)
    }

    pub fn is_api(self) -> bool {
        matches!(self, ConnKind::Api)
    }

    pub fn dialect(self) -> Dialect {
        match self {
            ConnKind::Postgres => Dialect::Postgres,
            ConnKind::MySql => Dialect::MySql,
            ConnKind::Oracle => Dialect::Oracle,
            ConnKind::Snowflake => Dialect::Snowflake,
            _ => Dialect::Generic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnKind::Postgres => "postgres",
            ConnKind::MySql => "mysql",
            ConnKind::Oracle => "oracle",
            ConnKind::Snowflake => "snowflake",
            ConnKind::Memory => "memory",
            ConnKind::File => "file",
            ConnKind::S3 => "s3",
            ConnKind::Api => "api",
            ConnKind::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for ConnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(ConnKind::Postgres),
            "mysql" | "mariadb" => Ok(ConnKind::MySql),
            "oracle" => Ok(ConnKind::Oracle),
            "snowflake" => Ok(ConnKind::Snowflake),
            "memory" | "mem" => Ok(ConnKind::Memory),
            "file" => Ok(ConnKind::File),
            "s3" => Ok(ConnKind::S3),
            "api" | "http" | "https" => Ok(ConnKind::Api),
            other => Err(format!("unknown connection scheme: {other}")),
        }
    }
}

/// Parsed connection info: type tag, the raw URL, and a free-form
/// credentials/properties map merged from the URL query string and the
/// task document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnInfo {
    #[serde(rename = "type")]
    pub kind: ConnKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
}

impl ConnInfo {
    pub fn from_url(url: &str) -> Result<Self, ConnectorError> {
        if url.trim().is_empty() {
            return Err(ConnectorError::InvalidUrl {
                url: url.to_string(),
                reason: "empty url".to_string(),
            });
        }

        // a bare path is a local file reference
        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("file", url),
        };

        let kind = ConnKind::from_str(scheme).map_err(|reason| ConnectorError::InvalidUrl {
            url: url.to_string(),
            reason,
        })?;

        let mut data = HashMap::new();
        if let Some((_, query)) = rest.split_once('?') {
            for pair in query.split('&') {
                if let Some((k, v)) = pair.split_once('=') {
                    data.insert(k.to_string(), v.to_string());
                }
            }
        }
        if let Some((userinfo, _)) = rest.split_once('@') {
            match userinfo.split_once(':') {
                Some((user, password)) => {
                    data.insert("user".to_string(), user.to_string());
                    data.insert("password".to_string(), password.to_string());
                }
                None => {
                    data.insert("user".to_string(), userinfo.to_string());
                }
            }
        }

        Ok(ConnInfo {
            kind,
            url: url.to_string(),
            data,
        })
    }

    /// Schema qualifier carried in the connection properties, if any.
    pub fn schema(&self) -> Option<&str> {
        self.data.get("schema").map(|s| s.as_str())
    }

    /// The URL with the query string stripped.
    pub fn base_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    pub fn scheme(&self) -> &str {
        self.url.split("://").next().unwrap_or("file")
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.data.insert(key.to_string(), value.to_string());
    }
}

impl<'de> Deserialize<'de> for ConnInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Url(String),
            Full {
                url: String,
                #[serde(default)]
                data: HashMap<String, String>,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Url(url) => ConnInfo::from_url(&url).map_err(serde::de::Error::custom),
            Repr::Full { url, data } => {
                let mut info = ConnInfo::from_url(&url).map_err(serde::de::Error::custom)?;
                info.data.extend(data);
                Ok(info)
            }
        }
    }
}

impl Default for ConnInfo {
    fn default() -> Self {
        ConnInfo {
            kind: ConnKind::Unspecified,
            url: String::new(),
            data: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_database_url() {
        let info = ConnInfo::from_url("postgres://u:p@localhost:5432/db?schema=public").unwrap();
        assert_eq!(info.kind, ConnKind::Postgres);
        assert_eq!(info.data.get("user").map(String::as_str), Some("u"));
        assert_eq!(info.data.get("password").map(String::as_str), Some("p"));
        assert_eq!(info.schema(), Some("public"));
        assert!(info.kind.is_db());
    }

    #[test]
    fn bare_path_is_local_file() {
        let info = ConnInfo::from_url("/tmp/data.csv").unwrap();
        assert_eq!(info.kind, ConnKind::File);
        assert!(info.kind.is_file());
    }

    #[test]
    fn object_store_url() {
        let info = ConnInfo::from_url("s3://bucket/prefix/out/").unwrap();
        assert_eq!(info.kind, ConnKind::S3);
        assert_eq!(info.scheme(), "s3");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(ConnInfo::from_url("carrier://x").is_err());
    }
}
