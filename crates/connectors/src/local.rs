use crate::{
    error::FileError,
    filesystem::{validate_object_path, Compression, FileFormat, FileOptions, FileSystemDriver},
};
use async_trait::async_trait;
use dataflow::{Dataflow, Datastream, FlowError};
use flate2::{read::GzDecoder, write::GzEncoder, Compression as GzLevel};
use model::core::{
    column::Columns,
    value::Value,
};
use model::records::row::Row;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Local filesystem endpoint for `file://` URLs and bare paths.
pub struct LocalFs;

pub fn url_to_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

fn path_to_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[async_trait]
impl FileSystemDriver for LocalFs {
    fn scheme(&self) -> &'static str {
        "file"
    }

    async fn read_dataflow(
        &self,
        url: &str,
        options: &FileOptions,
        cancel: CancellationToken,
    ) -> Result<Dataflow, FileError> {
        validate_object_path(url)?;
        let root = url_to_path(url);

        let files = if root.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&root)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            entries
        } else if root.is_file() {
            vec![root.clone()]
        } else {
            return Err(FileError::NoInput(format!(
                "no file or directory at {}",
                root.display()
            )));
        };

        if files.is_empty() {
            return Err(FileError::NoInput(format!(
                "no files under {}",
                root.display()
            )));
        }

        let mut streams = Vec::with_capacity(files.len());
        for file in files {
            debug!(path = %file.display(), "opening source file");
            let stream = open_file_stream(&file, options, cancel.clone()).await?;
            streams.push(stream);
        }

        let flow = Dataflow::from_streams(streams, cancel)?;
        Ok(flow)
    }

    async fn write_dataflow(
        &self,
        flow: &mut Dataflow,
        url: &str,
        options: &FileOptions,
    ) -> Result<u64, FileError> {
        validate_object_path(url)?;
        let target = url_to_path(url);

        let path = if url.ends_with('/') || target.is_dir() {
            std::fs::create_dir_all(&target)?;
            let name = match (options.format, options.compression) {
                (FileFormat::JsonLines, Compression::Gzip) => "part.0001.jsonl.gz",
                (FileFormat::JsonLines, Compression::None) => "part.0001.jsonl",
                (_, Compression::Gzip) => "part.0001.csv.gz",
                (_, Compression::None) => "part.0001.csv",
            };
            target.join(name)
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            target
        };

        let file = File::create(&path)?;
        let mut counter = CountingWriter::new(BufWriter::new(file));
        let bytes = match options.compression {
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(counter, GzLevel::default());
                write_rows(flow, &mut encoder, options).await?;
                let mut counter = encoder.finish()?;
                counter.flush()?;
                counter.bytes
            }
            Compression::None => {
                write_rows(flow, &mut counter, options).await?;
                counter.flush()?;
                counter.bytes
            }
        };

        debug!(path = %path.display(), bytes, "wrote target file");
        Ok(bytes)
    }

    async fn list(&self, url: &str) -> Result<Vec<String>, FileError> {
        validate_object_path(url)?;
        let root = url_to_path(url);
        if root.is_file() {
            return Ok(vec![path_to_url(&root)]);
        }
        let mut found = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    found.push(path_to_url(&path));
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

/// Opens one file as a lazy datastream; a blocking task parses records
/// and feeds the bounded channel.
async fn open_file_stream(
    path: &Path,
    options: &FileOptions,
    cancel: CancellationToken,
) -> Result<Datastream, FileError> {
    match options.format {
        FileFormat::Csv => {}
        FileFormat::JsonLines => return open_jsonl_stream(path, options, cancel).await,
        other => {
            return Err(FileError::UnsupportedFormat(format!("{other:?}")));
        }
    }

    let (tx, rx) = mpsc::channel::<Result<Row, FlowError>>(dataflow::stream::CHANNEL_CAPACITY);
    let (columns_tx, columns_rx) = oneshot::channel::<Result<Columns, FileError>>();

    let path = path.to_path_buf();
    let delimiter = options.delimiter;
    let header = options.header;
    let gzip = options.compression == Compression::Gzip;

    tokio::task::spawn_blocking(move || {
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                let _ = columns_tx.send(Err(FileError::Io(e)));
                return;
            }
        };
        let reader: Box<dyn Read + Send> = if gzip {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(header)
            .flexible(true)
            .from_reader(reader);

        let mut columns_tx = Some(columns_tx);
        if header {
            let columns = match csv_reader.headers() {
                Ok(headers) => Columns::from_names(
                    &headers.iter().collect::<Vec<_>>(),
                    model::core::column_type::ColumnType::Text,
                ),
                Err(e) => {
                    if let Some(tx) = columns_tx.take() {
                        let _ = tx.send(Err(FileError::Csv(e)));
                    }
                    return;
                }
            };
            if let Some(tx) = columns_tx.take() {
                if tx.send(Ok(columns)).is_err() {
                    return;
                }
            }
        }

        for record in csv_reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.blocking_send(Err(FlowError::Read(e.to_string())));
                    return;
                }
            };
            // headerless files resolve their shape from the first record
            if let Some(tx) = columns_tx.take() {
                if tx.send(Ok(Columns::dummy(record.len()))).is_err() {
                    return;
                }
            }
            let row: Row = record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(cell.to_string())
                    }
                })
                .collect();
            if tx.blocking_send(Ok(row)).is_err() {
                return;
            }
        }
        // an empty headerless file never resolved its shape
        if let Some(tx) = columns_tx.take() {
            let _ = tx.send(Ok(Columns::default()));
        }
    });

    let columns = columns_rx
        .await
        .map_err(|_| FileError::NoInput("reader task exited before headers".to_string()))??;

    Ok(Datastream::new(columns, rx, cancel))
}

async fn open_jsonl_stream(
    path: &Path,
    options: &FileOptions,
    cancel: CancellationToken,
) -> Result<Datastream, FileError> {
    use std::io::BufRead;

    let (tx, rx) = mpsc::channel::<Result<Row, FlowError>>(dataflow::stream::CHANNEL_CAPACITY);
    let (columns_tx, columns_rx) = oneshot::channel::<Result<Columns, FileError>>();

    let path = path.to_path_buf();
    let gzip = options.compression == Compression::Gzip;

    tokio::task::spawn_blocking(move || {
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                let _ = columns_tx.send(Err(FileError::Io(e)));
                return;
            }
        };
        let reader: Box<dyn Read + Send> = if gzip {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let buffered = BufReader::new(reader);

        let mut columns: Option<Columns> = None;
        let mut columns_tx = Some(columns_tx);
        for line in buffered.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    let _ = tx.blocking_send(Err(FlowError::Read(e.to_string())));
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let object: serde_json::Map<String, serde_json::Value> =
                match serde_json::from_str(&line) {
                    Ok(o) => o,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(FlowError::Read(e.to_string())));
                        return;
                    }
                };
            let cols = columns.get_or_insert_with(|| {
                let names: Vec<&str> = object.keys().map(|k| k.as_str()).collect();
                let cols =
                    Columns::from_names(&names, model::core::column_type::ColumnType::Text);
                if let Some(tx) = columns_tx.take() {
                    let _ = tx.send(Ok(cols.clone()));
                }
                cols
            });
            let row: Row = cols
                .iter()
                .map(|c| match object.get(&c.name) {
                    Some(serde_json::Value::Null) | None => Value::Null,
                    Some(serde_json::Value::Bool(b)) => Value::Bool(*b),
                    Some(serde_json::Value::Number(n)) => match n.as_i64() {
                        Some(i) => Value::Int(i),
                        None => Value::Float(n.as_f64().unwrap_or_default()),
                    },
                    Some(serde_json::Value::String(s)) => Value::Text(s.clone()),
                    Some(other) => Value::Json(other.clone()),
                })
                .collect();
            if tx.blocking_send(Ok(row)).is_err() {
                return;
            }
        }
        if let Some(tx) = columns_tx.take() {
            let _ = tx.send(Ok(Columns::default()));
        }
    });

    let columns = columns_rx
        .await
        .map_err(|_| FileError::NoInput("reader task exited before first record".to_string()))??;

    Ok(Datastream::new(columns, rx, cancel))
}

/// Reads CSV rows from standard input as a single-stream dataflow.
pub async fn stdin_dataflow(cancel: CancellationToken) -> Result<Dataflow, FileError> {
    let (tx, rx) = mpsc::channel::<Result<Row, FlowError>>(dataflow::stream::CHANNEL_CAPACITY);
    let (columns_tx, columns_rx) = oneshot::channel::<Result<Columns, FileError>>();

    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(stdin.lock());
        let columns = match csv_reader.headers() {
            Ok(headers) => Columns::from_names(
                &headers.iter().collect::<Vec<_>>(),
                model::core::column_type::ColumnType::Text,
            ),
            Err(e) => {
                let _ = columns_tx.send(Err(FileError::Csv(e)));
                return;
            }
        };
        if columns_tx.send(Ok(columns)).is_err() {
            return;
        }
        for record in csv_reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.blocking_send(Err(FlowError::Read(e.to_string())));
                    return;
                }
            };
            let row: Row = record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(cell.to_string())
                    }
                })
                .collect();
            if tx.blocking_send(Ok(row)).is_err() {
                return;
            }
        }
    });

    let columns = columns_rx
        .await
        .map_err(|_| FileError::NoInput("stdin reader exited before headers".to_string()))??;
    let stream = Datastream::new(columns, rx, cancel.clone());
    Ok(Dataflow::from_streams(vec![stream], cancel)?)
}

/// Drains a dataflow as CSV onto standard output.
pub async fn write_stdout(flow: &mut Dataflow) -> Result<u64, FileError> {
    let stdout = std::io::stdout();
    let mut counter = CountingWriter::new(stdout);
    write_rows(flow, &mut counter, &FileOptions::default()).await?;
    Ok(counter.bytes)
}

async fn write_rows<W: Write>(
    flow: &mut Dataflow,
    writer: W,
    options: &FileOptions,
) -> Result<(), FileError> {
    match options.format {
        FileFormat::Csv => write_rows_csv(flow, writer, options).await,
        FileFormat::JsonLines => write_rows_jsonl(flow, writer).await,
        other => Err(FileError::UnsupportedFormat(format!("{other:?}"))),
    }
}

async fn write_rows_csv<W: Write>(
    flow: &mut Dataflow,
    writer: W,
    options: &FileOptions,
) -> Result<(), FileError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_writer(writer);

    if options.header {
        csv_writer.write_record(flow.columns.names())?;
    }
    while let Some(next) = flow.next_row().await {
        let row = next?;
        let record: Vec<String> = row.iter().map(|v| v.encode_csv()).collect();
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

async fn write_rows_jsonl<W: Write>(flow: &mut Dataflow, mut writer: W) -> Result<(), FileError> {
    let names = flow.columns.names();
    while let Some(next) = flow.next_row().await {
        let row = next?;
        let mut object = serde_json::Map::new();
        for (name, value) in names.iter().zip(row.iter()) {
            let json = match value {
                Value::Null => serde_json::Value::Null,
                Value::Bool(b) => serde_json::Value::Bool(*b),
                Value::Int(i) => serde_json::Value::Number((*i).into()),
                Value::Float(f) => serde_json::Number::from_f64(*f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                Value::Json(j) => j.clone(),
                other => other
                    .as_string()
                    .map(serde_json::Value::String)
                    .unwrap_or(serde_json::Value::Null),
            };
            object.insert(name.clone(), json);
        }
        serde_json::to_writer(&mut writer, &serde_json::Value::Object(object))
            .map_err(|e| FileError::NoInput(e.to_string()))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

struct CountingWriter<W> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        CountingWriter { inner, bytes: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::column_type::ColumnType;

    #[tokio::test]
    async fn csv_roundtrip_through_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.csv");
        std::fs::write(&src, "id,name\n1,alpha\n2,beta\n").unwrap();

        let cancel = CancellationToken::new();
        let options = FileOptions::default();
        let mut flow = LocalFs
            .read_dataflow(src.to_str().unwrap(), &options, cancel.clone())
            .await
            .unwrap();

        let sample = flow.sample(false).await.unwrap();
        assert_eq!(sample.columns.0[0].ctype, ColumnType::Integer);

        let out = dir.path().join("out.csv");
        let bytes = LocalFs
            .write_dataflow(&mut flow, out.to_str().unwrap(), &options)
            .await
            .unwrap();
        assert!(bytes > 0);
        assert_eq!(flow.count(), 2);

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.starts_with("id,name\n"));
        assert!(written.contains("1,alpha"));
    }

    #[tokio::test]
    async fn directory_write_creates_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.csv");
        std::fs::write(&src, "a\nx\ny\n").unwrap();

        let cancel = CancellationToken::new();
        let options = FileOptions::default();
        let mut flow = LocalFs
            .read_dataflow(src.to_str().unwrap(), &options, cancel)
            .await
            .unwrap();
        flow.sample(false).await.unwrap();

        let out_dir = format!("{}/out/", dir.path().display());
        LocalFs
            .write_dataflow(&mut flow, &out_dir, &options)
            .await
            .unwrap();

        let listed = LocalFs.list(&out_dir).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].ends_with("part.0001.csv"));
        assert!(!listed[0]
            .strip_prefix("file://")
            .unwrap()
            .contains("//"));
    }

    #[tokio::test]
    async fn gzip_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.csv");
        std::fs::write(&src, "n\n5\n6\n").unwrap();

        let cancel = CancellationToken::new();
        let mut flow = LocalFs
            .read_dataflow(src.to_str().unwrap(), &FileOptions::default(), cancel.clone())
            .await
            .unwrap();
        flow.sample(false).await.unwrap();

        let out = dir.path().join("out.csv.gz");
        let gz_options = FileOptions::infer(out.to_str().unwrap(), &Default::default()).unwrap();
        LocalFs
            .write_dataflow(&mut flow, out.to_str().unwrap(), &gz_options)
            .await
            .unwrap();

        let mut back = LocalFs
            .read_dataflow(out.to_str().unwrap(), &gz_options, cancel)
            .await
            .unwrap();
        let mut rows = 0;
        while let Some(row) = back.next_row().await {
            row.unwrap();
            rows += 1;
        }
        assert_eq!(rows, 2);
    }
}
