//! Bounded worker pool dispatch
//!
//! Wraps a `Backend` behind `tokio::task::spawn_blocking`, giving the
//! cooperative event loop a bounded pool of background workers each
//! servicing one database connection, matching the concurrency model: at
//! most `max_size` flushes/queries run concurrently, and each worker
//! executes exactly one transaction to completion before returning its
//! result to the scheduler.

use crate::backend::{Backend, ExistingTable, QueryRow};
use crate::config::{Config, DbEngine};
use crate::errors::ArchiverResult;
use crate::value::ColumnSpec;
use std::sync::{Arc, Mutex};

/// Number of concurrent background database workers.
pub const DEFAULT_POOL_SIZE: u32 = 4;

#[derive(Clone)]
pub struct WorkerPool {
    backend: Option<Arc<Mutex<dyn Backend>>>,
}

impl WorkerPool {
    /// Builds a worker pool for the configured backend. `DbEngine::None`
    /// disables persistence entirely; every dispatch then becomes a no-op
    /// returning zero rows, which lets the rest of the engine run
    /// unconditionally against a test or dry-run configuration.
    pub fn connect(config: &Config) -> ArchiverResult<Self> {
        let backend: Option<Arc<Mutex<dyn Backend>>> = match config.db_engine {
            DbEngine::None => None,
            DbEngine::Postgres => {
                let conninfo = format!(
                    "host={} user={} password={} dbname={}",
                    config.db_host, config.db_user, config.db_password, config.db_name
                );
                let pool = crate::backend::postgres_backend::build_pool(&conninfo, DEFAULT_POOL_SIZE)?;
                Some(Arc::new(Mutex::new(crate::backend::postgres_backend::PostgresBackend::new(pool))))
            }
            DbEngine::Mysql => {
                let url = format!(
                    "mysql://{}:{}@{}/{}",
                    config.db_user, config.db_password, config.db_host, config.db_name
                );
                let pool = crate::backend::mysql_backend::build_pool(&url, DEFAULT_POOL_SIZE)?;
                Some(Arc::new(Mutex::new(crate::backend::mysql_backend::MysqlBackend::new(pool))))
            }
        };
        Ok(Self { backend })
    }

    pub fn enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn scan_existing_tables(&self) -> ArchiverResult<Vec<ExistingTable>> {
        let Some(backend) = self.backend.clone() else {
            return Ok(Vec::new());
        };
        tokio::task::spawn_blocking(move || backend.lock().unwrap().scan_existing_tables()).await?
    }

    pub async fn create_table(&self, name: String, columns: Vec<ColumnSpec>, indices: Vec<String>) -> ArchiverResult<()> {
        let Some(backend) = self.backend.clone() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = indices.iter().map(|s| s.as_str()).collect();
            backend.lock().unwrap().create_table(&name, &columns, &refs)
        })
        .await?
    }

    pub async fn bulk_load(&self, table: String, staging_path: String) -> ArchiverResult<u64> {
        let Some(backend) = self.backend.clone() else {
            return Ok(0);
        };
        tokio::task::spawn_blocking(move || backend.lock().unwrap().bulk_load(&table, &staging_path)).await?
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn query_rows(
        &self,
        table: String,
        columns: Vec<ColumnSpec>,
        min_buffered_raw_id: Option<u64>,
        begin_mjd_sec: Option<f64>,
        end_mjd_sec: Option<f64>,
        limit: u64,
    ) -> ArchiverResult<Vec<QueryRow>> {
        let Some(backend) = self.backend.clone() else {
            return Ok(Vec::new());
        };
        tokio::task::spawn_blocking(move || {
            backend.lock().unwrap().query_rows(
                &table,
                &columns,
                min_buffered_raw_id,
                begin_mjd_sec,
                end_mjd_sec,
                limit,
            )
        })
        .await?
    }

    pub async fn insert_row(&self, table: String, columns: Vec<String>, values: Vec<String>) -> ArchiverResult<u64> {
        let Some(backend) = self.backend.clone() else {
            return Ok(0);
        };
        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = columns.iter().map(|s| s.as_str()).collect();
            backend.lock().unwrap().insert_row(&table, &refs, &values)
        })
        .await?
    }

    pub async fn max_id(&self, table: String, id_column: String) -> ArchiverResult<u64> {
        let Some(backend) = self.backend.clone() else {
            return Ok(0);
        };
        tokio::task::spawn_blocking(move || backend.lock().unwrap().max_id(&table, &id_column)).await?
    }

    pub async fn load_actors(&self) -> ArchiverResult<Vec<(u32, String, i32, i32, String)>> {
        let Some(backend) = self.backend.clone() else {
            return Ok(Vec::new());
        };
        tokio::task::spawn_blocking(move || backend.lock().unwrap().load_actors()).await?
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerPool(enabled={})", self.enabled())
    }
}
