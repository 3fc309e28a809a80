use crate::error::FileError;
use async_trait::async_trait;
use dataflow::Dataflow;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// On-disk serialization format of a file stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    JsonLines,
    Parquet,
    Avro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

/// Read/write options resolved from the URL's extension and the stream
/// or target option maps.
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub format: FileFormat,
    pub compression: Compression,
    pub delimiter: u8,
    pub header: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        FileOptions {
            format: FileFormat::Csv,
            compression: Compression::None,
            delimiter: b',',
            header: true,
        }
    }
}

impl FileOptions {
    /// Infers format and compression from the URL's extension, then
    /// applies explicit overrides from an options map.
    pub fn infer(url: &str, overrides: &HashMap<String, String>) -> Result<Self, FileError> {
        let mut options = FileOptions::default();

        let path = url.split('?').next().unwrap_or(url);
        let mut stem = path.to_ascii_lowercase();
        if let Some(base) = stem.strip_suffix(".gz") {
            options.compression = Compression::Gzip;
            stem = base.to_string();
        }
        if stem.ends_with(".jsonl") || stem.ends_with(".ndjson") || stem.ends_with(".json") {
            options.format = FileFormat::JsonLines;
        } else if stem.ends_with(".parquet") {
            options.format = FileFormat::Parquet;
        } else if stem.ends_with(".avro") {
            options.format = FileFormat::Avro;
        } else if stem.ends_with(".tsv") {
            options.delimiter = b'\t';
        }

        if let Some(fmt) = overrides.get("format") {
            options.format = match fmt.to_ascii_lowercase().as_str() {
                "csv" => FileFormat::Csv,
                "jsonl" | "json" => FileFormat::JsonLines,
                "parquet" => FileFormat::Parquet,
                "avro" => FileFormat::Avro,
                other => return Err(FileError::UnsupportedFormat(other.to_string())),
            };
        }
        if let Some(delim) = overrides.get("delimiter") {
            options.delimiter = delim.bytes().next().unwrap_or(b',');
        }
        if let Some(header) = overrides.get("header") {
            options.header = matches!(header.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(compression) = overrides.get("compression") {
            options.compression = match compression.to_ascii_lowercase().as_str() {
                "none" => Compression::None,
                "gzip" | "gz" => Compression::Gzip,
                other => return Err(FileError::UnsupportedFormat(other.to_string())),
            };
        }

        Ok(options)
    }
}

/// Capability bundle for a filesystem endpoint keyed by URL scheme.
#[async_trait]
pub trait FileSystemDriver: Send + Sync {
    fn scheme(&self) -> &'static str;

    /// Opens every object under `url` (a file or a prefix) as one
    /// composite dataflow.
    async fn read_dataflow(
        &self,
        url: &str,
        options: &FileOptions,
        cancel: CancellationToken,
    ) -> Result<Dataflow, FileError>;

    /// Drains `flow` into objects under `url`, returning bytes written.
    async fn write_dataflow(
        &self,
        flow: &mut Dataflow,
        url: &str,
        options: &FileOptions,
    ) -> Result<u64, FileError>;

    /// Lists object paths under a prefix.
    async fn list(&self, url: &str) -> Result<Vec<String>, FileError>;
}

/// Normalizes a path joined from URL segments, rejecting empty segments
/// after the scheme.
pub fn validate_object_path(url: &str) -> Result<(), FileError> {
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    if rest.contains("//") {
        return Err(FileError::DoubleSlash(url.to_string()));
    }
    Ok(())
}

/// Joins a prefix and a file name without introducing doubled slashes.
pub fn join_object_path(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_format_from_extension() {
        let none = HashMap::new();
        let opts = FileOptions::infer("s3://bucket/data/out.csv.gz", &none).unwrap();
        assert_eq!(opts.format, FileFormat::Csv);
        assert_eq!(opts.compression, Compression::Gzip);

        let opts = FileOptions::infer("/tmp/rows.jsonl", &none).unwrap();
        assert_eq!(opts.format, FileFormat::JsonLines);

        let opts = FileOptions::infer("/tmp/rows.tsv", &none).unwrap();
        assert_eq!(opts.delimiter, b'\t');
    }

    #[test]
    fn overrides_win_over_extension() {
        let mut over = HashMap::new();
        over.insert("format".to_string(), "jsonl".to_string());
        over.insert("header".to_string(), "false".to_string());
        let opts = FileOptions::infer("/tmp/file.csv", &over).unwrap();
        assert_eq!(opts.format, FileFormat::JsonLines);
        assert!(!opts.header);
    }

    #[test]
    fn double_slash_paths_are_rejected() {
        assert!(validate_object_path("s3://bucket/a/b.csv").is_ok());
        assert!(validate_object_path("s3://bucket/a//b.csv").is_err());
        assert_eq!(join_object_path("s3://bucket/out/", "part.csv"), "s3://bucket/out/part.csv");
    }
}
