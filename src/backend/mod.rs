//! Database backend abstraction
//!
//! Bulk loads reference a staging file by path and are executed as an
//! ordinary blocking SQL statement (`COPY ... FROM '<file>'` for Postgres,
//! `LOAD DATA INFILE '<file>'` for MySQL) rather than a streaming protocol,
//! so a synchronous client pooled with `r2d2` and dispatched through
//! `tokio::task::spawn_blocking` is sufficient: each worker owns one
//! connection and runs one transaction to completion before returning.

pub mod mysql_backend;
pub mod pool;
pub mod postgres_backend;

use crate::config::DbEngine;
use crate::errors::ArchiverResult;
use crate::value::ColumnSpec;

/// Row as returned by a key-table query: the TAI timestamp followed by one
/// value per selected column, in column order.
pub type QueryRow = (f64, Vec<crate::value::Value>);

/// Existing-table inventory entry produced by the startup scan.
#[derive(Debug, Clone)]
pub struct ExistingTable {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: u64,
}

/// A backend connection capable of running the blocking operations the
/// table engine needs. Implemented once per supported database; dispatched
/// exclusively from worker-pool threads, never from the event loop.
pub trait Backend: Send {
    fn engine(&self) -> DbEngine;

    /// Scans all existing archiver tables: name, ordered column list, and
    /// current row count, used to reconstruct next-ID counters on startup.
    fn scan_existing_tables(&mut self) -> ArchiverResult<Vec<ExistingTable>>;

    fn create_table(&mut self, name: &str, columns: &[ColumnSpec], indices: &[&str]) -> ArchiverResult<()>;

    /// Executes the backend's bulk-load statement against a staging file.
    fn bulk_load(&mut self, table: &str, staging_path: &str) -> ArchiverResult<u64>;

    /// Runs the key-table SQL shape described in the key-table layer and
    /// returns rows ordered by `raw_id DESC`, most-recent first. Each
    /// returned value is decoded per its declared `ColumnSpec::ty` rather
    /// than a single fixed type, matching the mixed int/float/text columns
    /// a keyword schema can declare.
    fn query_rows(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        min_buffered_raw_id: Option<u64>,
        begin_mjd_sec: Option<f64>,
        end_mjd_sec: Option<f64>,
        limit: u64,
    ) -> ArchiverResult<Vec<QueryRow>>;

    /// Inserts a single row and returns any assigned auto-increment id.
    fn insert_row(&mut self, table: &str, columns: &[&str], values: &[String]) -> ArchiverResult<u64>;

    fn max_id(&mut self, table: &str, id_column: &str) -> ArchiverResult<u64>;

    /// Loads the full `actors` table for registry seeding at startup:
    /// `(id, name, major, minor, checksum)` per row.
    fn load_actors(&mut self) -> ArchiverResult<Vec<(u32, String, i32, i32, String)>>;
}

/// Quotes an identifier for inclusion in generated SQL. Table/column names
/// in this system are always derived from actor/keyword names validated by
/// the actor dictionary, but we quote defensively rather than trust that.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
