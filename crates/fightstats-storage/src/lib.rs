//! Append-only CSV record stores, page fetching and the worker fan-out pool.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fightstats_core::{Record, RecordError, TableSpec};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub mod fetch;
pub mod pool;

pub use fetch::{FetchError, HttpClientConfig, HttpSession, HttpSessionFactory, PageFetch};
pub use pool::{
    fetch_pages, FanOut, PoolConfig, RetryPolicy, SessionFactory, TaskHandler, TaskResult,
};

pub const CRATE_NAME: &str = "fightstats-storage";

pub type Row = Vec<String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path}: header {found:?} does not match schema {expected:?}")]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("{table}: row has {actual} columns, schema has {expected}")]
    RowWidth {
        table: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Schema-tagged CSV table: deduplicated on every load, appended to in place.
#[derive(Debug, Clone)]
pub struct RecordStore {
    spec: TableSpec,
    path: PathBuf,
    rows: Vec<Row>,
}

impl RecordStore {
    /// Create the file with a header if needed, dedupe it on disk, then load it.
    pub fn open(data_folder: impl AsRef<Path>, spec: TableSpec) -> Result<Self, StoreError> {
        let path = data_folder.as_ref().join(spec.file_name);
        let mut store = Self {
            spec,
            path,
            rows: Vec::new(),
        };
        store.ensure_file()?;
        store.remove_duplicates()?;
        store.load()?;
        Ok(store)
    }

    pub fn spec(&self) -> TableSpec {
        self.spec
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn ensure_file(&self) -> Result<(), StoreError> {
        if self.path.is_file() {
            info!(path = %self.path.display(), "using existing file");
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.write_rows(&[])?;
        info!(path = %self.path.display(), "using new file");
        Ok(())
    }

    /// Re-read the file into memory, dropping exact duplicates.
    pub fn load(&mut self) -> Result<(), StoreError> {
        self.rows = dedupe_rows(self.read_rows()?);
        Ok(())
    }

    /// Rewrite the file without duplicate rows. Returns how many were dropped.
    pub fn remove_duplicates(&self) -> Result<usize, StoreError> {
        let rows = self.read_rows()?;
        let before = rows.len();
        let rows = dedupe_rows(rows);
        let dropped = before - rows.len();
        if dropped > 0 {
            self.write_rows(&rows)?;
            debug!(path = %self.path.display(), dropped, "removed duplicate rows");
        }
        Ok(dropped)
    }

    pub fn contains(&self, row: &[String]) -> bool {
        self.rows.iter().any(|r| r.as_slice() == row)
    }

    pub fn column_values<'a>(&'a self, column: &str) -> impl Iterator<Item = &'a str> + 'a {
        let index = self.spec.column_index(column);
        self.rows
            .iter()
            .filter_map(move |row| index.and_then(|i| row.get(i)).map(String::as_str))
    }

    /// Decode every in-memory row as `T`.
    pub fn records<T: Record>(&self) -> Result<Vec<T>, StoreError> {
        debug_assert_eq!(T::TABLE, self.spec);
        self.rows
            .iter()
            .map(|row| T::from_row(row).map_err(StoreError::from))
            .collect()
    }

    /// Open a streaming writer that appends to the backing file.
    pub fn appender(&self) -> Result<RecordAppender, StoreError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(RecordAppender {
            spec: self.spec,
            path: self.path.clone(),
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
            written: 0,
        })
    }

    /// Serialise header plus in-memory rows exactly as they would be persisted.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, StoreError> {
        encode_table(&self.path, self.spec, &self.rows)
    }

    fn read_rows(&self) -> Result<Vec<Row>, StoreError> {
        let csv_err = |source| StoreError::Csv {
            path: self.path.clone(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_path(&self.path)
            .map_err(csv_err)?;

        let header = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if header != self.spec.columns {
            return Err(StoreError::SchemaMismatch {
                path: self.path.clone(),
                expected: self.spec.columns.iter().map(|c| c.to_string()).collect(),
                found: header,
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    fn write_rows(&self, rows: &[Row]) -> Result<(), StoreError> {
        let bytes = encode_table(&self.path, self.spec, rows)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = parent.join(format!(".{}.{}.tmp", self.spec.file_name, Uuid::new_v4()));
        let mut file = File::create(&temp_path).map_err(io_err(&temp_path))?;
        file.write_all(&bytes).map_err(io_err(&temp_path))?;
        file.sync_all().map_err(io_err(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::Io {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }
}

/// Keep the first occurrence of every distinct row, preserving order.
pub fn dedupe_rows(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|row| seen.insert(row.clone()))
        .collect()
}

fn encode_table(path: &Path, spec: TableSpec, rows: &[Row]) -> Result<Vec<u8>, StoreError> {
    let csv_err = |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(spec.columns).map_err(csv_err)?;
    for row in rows {
        writer.write_record(row).map_err(csv_err)?;
    }
    writer.into_inner().map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e.into_error(),
    })
}

/// Row writer over a store's file; every row is flushed as soon as it is written.
pub struct RecordAppender {
    spec: TableSpec,
    path: PathBuf,
    writer: csv::Writer<File>,
    written: usize,
}

impl RecordAppender {
    pub fn append_row(&mut self, row: &[String]) -> Result<(), StoreError> {
        if row.len() != self.spec.width() {
            return Err(StoreError::RowWidth {
                table: self.spec.file_name,
                expected: self.spec.width(),
                actual: row.len(),
            });
        }
        self.writer
            .write_record(row)
            .map_err(|source| StoreError::Csv {
                path: self.path.clone(),
                source,
            })?;
        self.writer.flush().map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.written += 1;
        Ok(())
    }

    pub fn append<T: Record>(&mut self, record: &T) -> Result<(), StoreError> {
        self.append_row(&record.to_row())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}
