//! Startup inventory of existing archiver tables
//!
//! Scans the backend for every existing table's name, ordered column
//! list, and row count, so the engine can reconstruct next-id counters
//! and detect column-list incompatibilities before the first row is
//! recorded.

use crate::backend::pool::WorkerPool;
use crate::backend::ExistingTable;
use crate::errors::ArchiverResult;
use std::collections::HashMap;

#[derive(Default)]
pub struct TableRegistry {
    existing: HashMap<String, ExistingTable>,
}

impl TableRegistry {
    pub async fn scan(pool: &WorkerPool) -> ArchiverResult<Self> {
        let tables = pool.scan_existing_tables().await?;
        let existing = tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        Ok(Self { existing })
    }

    pub fn get(&self, name: &str) -> Option<&ExistingTable> {
        self.existing.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.existing.contains_key(name)
    }

    /// The next unused id for a table keyed by `id_column`: `row_count`
    /// when the backend assigns ids densely from zero, which holds for
    /// every table this engine creates (no deletes, append-only).
    pub fn next_id(&self, name: &str) -> u64 {
        self.existing.get(name).map(|t| t.row_count).unwrap_or(0)
    }
}
