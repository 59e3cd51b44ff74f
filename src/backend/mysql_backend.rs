//! MySQL backend, pooled with `r2d2_mysql` the same way the Postgres
//! backend is pooled with `r2d2_postgres` — identical shape, different
//! bulk-load statement and identifier quoting.

use super::{Backend, ExistingTable, QueryRow};
use crate::config::DbEngine;
use crate::errors::{ArchiverError, ArchiverResult};
use crate::value::{ColumnSpec, ColumnType, Value};
use mysql::prelude::Queryable;
use mysql::{Opts, Row};
use r2d2_mysql::MySqlConnectionManager;

pub type MysqlPool = r2d2::Pool<MySqlConnectionManager>;

pub fn build_pool(url: &str, max_size: u32) -> ArchiverResult<MysqlPool> {
    let opts = Opts::from_url(url).map_err(|e| ArchiverError::config(format!("invalid mysql url: {e}")))?;
    let manager = MySqlConnectionManager::new(mysql::OptsBuilder::from_opts(opts));
    r2d2::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| ArchiverError::connection(format!("building mysql pool: {e}")))
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub struct MysqlBackend {
    pool: MysqlPool,
}

impl MysqlBackend {
    pub fn new(pool: MysqlPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> ArchiverResult<r2d2::PooledConnection<MySqlConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| ArchiverError::connection(format!("checking out mysql connection: {e}")))
    }
}

impl Backend for MysqlBackend {
    fn engine(&self) -> DbEngine {
        DbEngine::Mysql
    }

    fn scan_existing_tables(&mut self) -> ArchiverResult<Vec<ExistingTable>> {
        let mut conn = self.conn()?;
        let names: Vec<String> = conn
            .query("SHOW TABLES")
            .map_err(|e| ArchiverError::backend(format!("scanning tables: {e}")))?;
        let mut out = Vec::new();
        for name in names {
            let columns: Vec<String> = conn
                .query(format!(
                    "SELECT column_name FROM information_schema.columns \
                     WHERE table_name = '{name}' ORDER BY ordinal_position"
                ))
                .map_err(|e| ArchiverError::backend(format!("scanning columns of {name}: {e}")))?;
            let row_count: u64 = conn
                .query_first(format!("SELECT count(*) FROM {}", quote_ident(&name)))
                .map_err(|e| ArchiverError::backend(format!("counting {name}: {e}")))?
                .unwrap_or(0);
            out.push(ExistingTable {
                name,
                columns,
                row_count,
            });
        }
        Ok(out)
    }

    fn create_table(&mut self, name: &str, columns: &[ColumnSpec], indices: &[&str]) -> ArchiverResult<()> {
        let mut conn = self.conn()?;
        let cols_sql: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let pk = if i == 0 { " PRIMARY KEY" } else { "" };
                format!("{} {}{}", quote_ident(&c.name), c.ty.sql_type(), pk)
            })
            .collect();
        let create = format!("CREATE TABLE {} ({})", quote_ident(name), cols_sql.join(", "));
        conn.query_drop(create)
            .map_err(|e| ArchiverError::backend(format!("creating table {name}: {e}")))?;
        for idx_col in indices {
            let idx_name = format!("{name}_{idx_col}_idx");
            let sql = format!(
                "CREATE INDEX {} ON {} ({})",
                quote_ident(&idx_name),
                quote_ident(name),
                quote_ident(idx_col)
            );
            conn.query_drop(sql)
                .map_err(|e| ArchiverError::backend(format!("creating index on {name}.{idx_col}: {e}")))?;
        }
        Ok(())
    }

    fn bulk_load(&mut self, table: &str, staging_path: &str) -> ArchiverResult<u64> {
        let mut conn = self.conn()?;
        let sql = format!(
            "LOAD DATA INFILE '{}' INTO TABLE {} FIELDS TERMINATED BY ',' ENCLOSED BY ''''",
            staging_path.replace('\'', "''"),
            quote_ident(table)
        );
        conn.query_drop(sql)
            .map_err(|e| ArchiverError::backend(format!("bulk loading {table}: {e}")))?;
        Ok(conn.affected_rows())
    }

    fn query_rows(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        min_buffered_raw_id: Option<u64>,
        begin_mjd_sec: Option<f64>,
        end_mjd_sec: Option<f64>,
        limit: u64,
    ) -> ArchiverResult<Vec<QueryRow>> {
        let mut conn = self.conn()?;
        let col_list: Vec<String> = columns.iter().map(|c| format!("key.{}", quote_ident(&c.name))).collect();
        let mut sql = format!(
            "SELECT raw.tai, {} FROM reply_raw raw, {} key WHERE raw.id = key.raw_id",
            col_list.join(", "),
            quote_ident(table)
        );
        if let Some(min_id) = min_buffered_raw_id {
            sql.push_str(&format!(" AND key.raw_id < {min_id}"));
        }
        if let Some(begin) = begin_mjd_sec {
            sql.push_str(&format!(" AND raw.tai > {begin}"));
        }
        if let Some(end) = end_mjd_sec {
            sql.push_str(&format!(" AND raw.tai <= {end}"));
        }
        sql.push_str(&format!(" ORDER BY key.raw_id DESC LIMIT {limit}"));
        let rows: Vec<Row> = conn
            .query(sql)
            .map_err(|e| ArchiverError::backend(format!("querying {table}: {e}")))?;
        let mut out = Vec::with_capacity(rows.len());
        for mut row in rows {
            let tai: f64 = row.take(0).unwrap_or(0.0);
            let mut values = Vec::with_capacity(columns.len());
            for (i, col) in columns.iter().enumerate() {
                let idx = i + 1;
                let value = match col.ty {
                    ColumnType::Int2 => {
                        let v: Option<i16> = row.take(idx).flatten();
                        v.map(|x| Value::Int(x as i64))
                    }
                    ColumnType::Int4 => {
                        let v: Option<i32> = row.take(idx).flatten();
                        v.map(|x| Value::Int(x as i64))
                    }
                    ColumnType::Int8 => {
                        let v: Option<i64> = row.take(idx).flatten();
                        v.map(Value::Int)
                    }
                    ColumnType::Flt4 => {
                        let v: Option<f32> = row.take(idx).flatten();
                        v.map(|x| Value::Float(x as f64))
                    }
                    ColumnType::Flt8 => {
                        let v: Option<f64> = row.take(idx).flatten();
                        v.map(Value::Float)
                    }
                    ColumnType::Text => {
                        let v: Option<String> = row.take(idx).flatten();
                        v.map(Value::Text)
                    }
                };
                values.push(value.unwrap_or(Value::Invalid));
            }
            out.push((tai, values));
        }
        Ok(out)
    }

    fn insert_row(&mut self, table: &str, columns: &[&str], values: &[String]) -> ArchiverResult<u64> {
        let mut conn = self.conn()?;
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            cols.join(", "),
            values.join(", ")
        );
        conn.query_drop(sql)
            .map_err(|e| ArchiverError::backend(format!("inserting into {table}: {e}")))?;
        Ok(conn.last_insert_id())
    }

    fn max_id(&mut self, table: &str, id_column: &str) -> ArchiverResult<u64> {
        let mut conn = self.conn()?;
        let sql = format!(
            "SELECT COALESCE(MAX({}), -1) FROM {}",
            quote_ident(id_column),
            quote_ident(table)
        );
        let max: i64 = conn
            .query_first(sql)
            .map_err(|e| ArchiverError::backend(format!("max id of {table}: {e}")))?
            .unwrap_or(-1);
        Ok((max + 1).max(0) as u64)
    }

    fn load_actors(&mut self) -> ArchiverResult<Vec<(u32, String, i32, i32, String)>> {
        let mut conn = self.conn()?;
        let rows: Vec<Row> = match conn.query("SELECT id, name, major, minor, checksum FROM actors") {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };
        Ok(rows
            .into_iter()
            .map(|mut row| {
                let id: u32 = row.take(0).unwrap_or(0);
                let name: String = row.take(1).unwrap_or_default();
                let major: i32 = row.take(2).unwrap_or(0);
                let minor: i32 = row.take(3).unwrap_or(0);
                let checksum: String = row.take(4).unwrap_or_default();
                (id, name, major, minor, checksum)
            })
            .collect())
    }
}
