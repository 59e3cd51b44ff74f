//! Per-(actor, keyword) table: adds a TAI cache and `recent`/`byDate`
//! read-back over the buffered rows plus the database, matching the
//! cache-scan-then-DB-query algorithm and SQL shape of the key-table layer.

use super::Table;
use crate::backend::pool::WorkerPool;
use crate::errors::ArchiverResult;
use crate::time::{now_tai_mjd, SystemClock};
use crate::value::{ColumnSpec, Value};
use std::path::PathBuf;

/// A tag identifying a keyword table as `actor.keyword`, lowercase.
pub type KeyTag = String;

pub struct KeyTable {
    pub table: Table,
    /// `actor.keyword`, lowercase; used as the watch-set tag in the
    /// expression engine.
    pub tag: KeyTag,
    /// Column names in order, including the leading `raw_id` alias, used
    /// by the monitor service to resolve a `.member` reference to an
    /// index offset by one for `raw_id`.
    pub aliases: Vec<String>,
    /// `(raw_id, tai)` in lock-step with `table.buffered()`; the TAI
    /// cache. Cleared whenever the underlying table's staging file
    /// rotates (i.e. on flush).
    tai_cache: Vec<(u64, f64)>,
}

const MAX_RANGE_ROWS: u64 = 1000;

impl KeyTable {
    pub fn attach(
        actor: &str,
        keyword: &str,
        value_columns: Vec<ColumnSpec>,
        buffer_size: usize,
        staging_dir: PathBuf,
        next_id: u64,
        traced: bool,
    ) -> ArchiverResult<Self> {
        let name = format!("{actor}__{keyword}");
        let mut aliases = vec!["raw_id".to_string()];
        aliases.extend(value_columns.iter().map(|c| c.name.clone()));
        let mut columns = vec![ColumnSpec {
            name: "raw_id".to_string(),
            ty: crate::value::ColumnType::Int8,
        }];
        columns.extend(value_columns);
        let table = Table::new(name, columns, buffer_size, vec![], staging_dir, next_id, traced)?;
        Ok(Self {
            table,
            tag: format!("{}.{}", actor.to_lowercase(), keyword.to_lowercase()),
            aliases,
            tai_cache: Vec::new(),
        })
    }

    /// Records one row: `raw_id` plus the keyword's typed values; caches
    /// `raw_id -> tai` for fast `recent`/`byDate` reads before the next
    /// flush.
    pub fn record(&mut self, tai: f64, raw_id: u64, mut values: Vec<Value>) -> ArchiverResult<()> {
        let mut row = vec![Value::Int(raw_id as i64)];
        row.append(&mut values);
        self.table.record(row)?;
        self.tai_cache.push((raw_id, tai));
        Ok(())
    }

    pub async fn begin_flush_and_clear_cache(&mut self, pool: &WorkerPool) {
        if let Some((path, rows)) = self.table.begin_flush() {
            self.tai_cache.clear();
            self.table.finish_flush(pool, path, rows).await;
        }
    }

    /// Returns up to `n` most recent rows as `(tai, values)`, most-recent
    /// first: cached buffered rows first, then a database query for the
    /// remainder, with a `raw_id < min(buffered)` predicate so the two
    /// segments never overlap.
    pub async fn recent(&self, n: usize, pool: &WorkerPool) -> ArchiverResult<Vec<(f64, Vec<Value>)>> {
        let buffered = self.table.buffered();
        let mut indexed: Vec<usize> = (0..self.tai_cache.len()).collect();
        indexed.sort_by(|&a, &b| self.tai_cache[b].0.cmp(&self.tai_cache[a].0));

        let mut result: Vec<(f64, Vec<Value>)> = indexed
            .into_iter()
            .take(n)
            .map(|i| {
                let (_, tai) = self.tai_cache[i];
                let values = buffered[i][1..].to_vec();
                (tai, values)
            })
            .collect();

        if result.len() < n {
            let remaining = (n - result.len()) as u64;
            let min_buffered = self.tai_cache.iter().map(|(id, _)| *id).min();
            let value_cols: Vec<ColumnSpec> = self.table.columns[1..].to_vec();
            let rows = pool
                .query_rows(self.table.name.clone(), value_cols, min_buffered, None, None, remaining)
                .await?;
            result.extend(rows);
        }
        Ok(result)
    }

    /// Returns all rows whose timestamp falls in `(end - interval, end]`,
    /// capped at 1000 rows, most-recent first. `end = None` means "now".
    pub async fn by_date(
        &self,
        interval_secs: f64,
        end_at: Option<f64>,
        clock: SystemClock,
        pool: &WorkerPool,
    ) -> ArchiverResult<Vec<(f64, Vec<Value>)>> {
        let end = end_at.unwrap_or_else(|| now_tai_mjd(clock));
        let begin = end - interval_secs;

        let oldest_cached = self
            .tai_cache
            .iter()
            .map(|(_, tai)| *tai)
            .fold(f64::INFINITY, f64::min);
        let cache_covers_range = oldest_cached.is_finite() && oldest_cached <= begin;

        let mut rows: Vec<(f64, Vec<Value>)> = Vec::new();
        if !cache_covers_range {
            let min_buffered = self.tai_cache.iter().map(|(id, _)| *id).min();
            let value_cols: Vec<ColumnSpec> = self.table.columns[1..].to_vec();
            rows = pool
                .query_rows(
                    self.table.name.clone(),
                    value_cols,
                    min_buffered,
                    Some(begin),
                    Some(end),
                    MAX_RANGE_ROWS,
                )
                .await?;
        }

        let buffered = self.table.buffered();
        let mut cached: Vec<(f64, Vec<Value>)> = self
            .tai_cache
            .iter()
            .enumerate()
            .filter(|(_, (_, tai))| *tai > begin && *tai <= end)
            .map(|(i, (_, tai))| (*tai, buffered[i][1..].to_vec()))
            .collect();
        rows.append(&mut cached);
        rows.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        rows.truncate(MAX_RANGE_ROWS as usize);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::value::ColumnType;

    fn test_pool() -> WorkerPool {
        WorkerPool::connect(&Config::for_test()).unwrap()
    }

    #[tokio::test]
    async fn recent_returns_buffered_rows_in_reverse_order() {
        let dir = std::env::temp_dir().join(format!("archiver-test-{}", std::process::id()));
        let mut kt = KeyTable::attach(
            "tcc",
            "alivat",
            vec![ColumnSpec {
                name: "val".into(),
                ty: ColumnType::Int4,
            }],
            100,
            dir,
            0,
            false,
        )
        .unwrap();
        kt.record(1.0, 0, vec![Value::Int(10)]).unwrap();
        kt.record(2.0, 1, vec![Value::Int(20)]).unwrap();
        kt.record(3.0, 2, vec![Value::Int(30)]).unwrap();
        let pool = test_pool();
        let rows = kt.recent(2, &pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 3.0);
        assert_eq!(rows[1].0, 2.0);
    }
}
