//! Buffered append-only table engine
//!
//! Rows are appended to an in-memory buffer and encoded into a CSV-with-
//! single-quote-quoting staging file; when the buffer reaches
//! `buffer_size` (and the table is not already flushing) the staging file
//! is closed and handed to the worker pool for bulk load, while a fresh
//! staging file is opened immediately so `record` never blocks.

pub mod keytable;
pub mod registry;

use crate::backend::pool::WorkerPool;
use crate::errors::{ArchiverError, ArchiverResult};
use crate::value::{ColumnSpec, Value};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

pub struct Table {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub buffer_size: usize,
    pub indices: Vec<String>,
    staging_dir: PathBuf,
    next_id: u64,
    buffer: Vec<Vec<Value>>,
    staging_file: Option<std::fs::File>,
    staging_path: Option<PathBuf>,
    busy: bool,
    last_activity: Instant,
    trace: Option<std::fs::File>,
    trace_started: Instant,
    /// Cumulative rows recorded since tracing started; the `IN` trace line.
    trace_rows_in: u64,
    /// Cumulative rows flushed since tracing started; the `OUT` trace line,
    /// which is written before the batch is added (the line reports the
    /// count as of the *start* of this flush, not including it).
    trace_rows_out: u64,
}

impl Table {
    /// Attaches to (or, if absent, creates) a table with the given schema.
    /// `next_id` is the first unused primary-key value, reconstructed by
    /// the registry scan or zero for a brand-new table.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnSpec>,
        buffer_size: usize,
        indices: Vec<String>,
        staging_dir: PathBuf,
        next_id: u64,
        traced: bool,
    ) -> ArchiverResult<Self> {
        std::fs::create_dir_all(&staging_dir)?;
        let name = name.into();
        let trace = if traced {
            let path = staging_dir.join(format!("{name}.trace"));
            Some(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            )
        } else {
            None
        };
        Ok(Self {
            name,
            columns,
            buffer_size,
            indices,
            staging_dir,
            next_id,
            buffer: Vec::new(),
            staging_file: None,
            staging_path: None,
            busy: false,
            last_activity: Instant::now(),
            trace,
            trace_started: Instant::now(),
            trace_rows_in: 0,
            trace_rows_out: 0,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Appends one row; fewer values than columns pads with NULL. Returns
    /// the row's assigned id (the pre-increment `next_id`) and whether the
    /// buffer crossed `buffer_size`, signaling the caller to flush.
    pub fn record(&mut self, mut values: Vec<Value>) -> ArchiverResult<u64> {
        values.resize(self.columns.len(), Value::Invalid);
        self.open_staging_if_needed()?;
        let line: Vec<String> = values.iter().map(|v| v.to_csv_field()).collect();
        if let Some(file) = self.staging_file.as_mut() {
            writeln!(file, "{}", line.join(","))?;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.buffer.push(values);
        self.last_activity = Instant::now();
        self.trace_rows_in += 1;
        self.write_trace_line("IN", self.trace_rows_in);
        Ok(id)
    }

    fn write_trace_line(&mut self, tag: &str, count: u64) {
        if let Some(trace) = self.trace.as_mut() {
            let elapsed = self.trace_started.elapsed().as_secs_f64();
            let _ = writeln!(trace, "{tag} {count} {elapsed:.3}");
        }
    }

    /// Whether the in-memory buffer has crossed `buffer_size` and the
    /// table is idle enough to start a new flush. The caller is expected
    /// to retry the check after every `record` and after a flush
    /// completes, since backpressure during a busy flush is intentional.
    pub fn should_flush(&self) -> bool {
        !self.busy && self.buffer.len() >= self.buffer_size
    }

    pub fn has_buffered_rows(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// The rows currently held in memory, in the order they were recorded.
    /// `KeyTable` keeps a parallel `(raw_id, tai)` vector in lock-step with
    /// this buffer so it can serve `recent`/`byDate` without a database
    /// round trip.
    pub fn buffered(&self) -> &[Vec<Value>] {
        &self.buffer
    }

    fn open_staging_if_needed(&mut self) -> ArchiverResult<()> {
        if self.staging_file.is_some() {
            return Ok(());
        }
        let path = self.staging_dir.join(format!("{}-{}.csv", self.name, std::process::id()));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        self.staging_file = Some(file);
        self.staging_path = Some(path);
        Ok(())
    }

    /// Closes the current staging file and dispatches a bulk load to the
    /// worker pool. Sets `busy` until the worker's result is applied via
    /// `finish_flush`. The caller must not call `flush` again on this
    /// table until `finish_flush` (or `apply_flush_result`) returns.
    pub fn begin_flush(&mut self) -> Option<(PathBuf, usize)> {
        if self.busy || self.buffer.is_empty() {
            return None;
        }
        self.staging_file = None;
        let path = self.staging_path.take()?;
        let rows = self.buffer.len();
        self.buffer.clear();
        self.busy = true;
        Some((path, rows))
    }

    /// Applies the worker pool's flush result: clears `busy`, logs, and on
    /// success removes the staging file (on failure the file is retained
    /// for manual recovery per the error-handling design).
    pub async fn finish_flush(&mut self, pool: &WorkerPool, path: PathBuf, rows: usize) {
        let path_str = path.to_string_lossy().to_string();
        let result = pool.bulk_load(self.name.clone(), path_str).await;
        self.busy = false;
        match result {
            Ok(_) => {
                info!(table = %self.name, rows, "flushed table");
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(table = %self.name, error = %e, "failed to remove staging file after flush");
                }
                self.record_trace_out(rows);
            }
            Err(e) => {
                warn!(table = %self.name, error = %e, path = %path.display(), "flush failed; staging file retained");
            }
        }
    }

    /// Writes the `OUT` trace line with the cumulative count as of the
    /// start of this flush, then folds `rows` into the running total.
    fn record_trace_out(&mut self, rows: usize) {
        self.write_trace_line("OUT", self.trace_rows_out);
        self.trace_rows_out += rows as u64;
    }

    /// Synchronously flushes every buffered row; used during shutdown to
    /// guarantee durability. Differs from `begin_flush`/`finish_flush`
    /// only in that the caller awaits completion inline.
    pub async fn flush_now(&mut self, pool: &WorkerPool) -> ArchiverResult<()> {
        if let Some((path, rows)) = self.begin_flush() {
            self.finish_flush(pool, path, rows).await;
        }
        Ok(())
    }

    pub async fn ensure_created(&self, pool: &WorkerPool) -> ArchiverResult<()> {
        pool.create_table(self.name.clone(), self.columns.clone(), self.indices.clone())
            .await
    }

    /// Validates that a freshly attached table's on-disk column list
    /// matches the declared one; mismatch is a fatal configuration error.
    pub fn validate_columns(name: &str, declared: &[ColumnSpec], existing: &[String]) -> ArchiverResult<()> {
        let declared_names: Vec<&str> = declared.iter().map(|c| c.name.as_str()).collect();
        if declared_names != existing.iter().map(|s| s.as_str()).collect::<Vec<_>>() {
            return Err(ArchiverError::config(format!(
                "table {name} has incompatible column list: declared {declared_names:?}, existing {existing:?}"
            )));
        }
        Ok(())
    }
}
