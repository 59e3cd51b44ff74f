//! PostgreSQL backend, grounded on the `postgres` sync client pooled with
//! `r2d2_postgres` the same way `r2d2_sqlite` pools connections for
//! blocking workers elsewhere in the corpus.

use super::{Backend, ExistingTable, QueryRow};
use crate::config::DbEngine;
use crate::errors::{ArchiverError, ArchiverResult};
use crate::value::{ColumnSpec, ColumnType, Value};
use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;

pub type PgPool = r2d2::Pool<PostgresConnectionManager<NoTls>>;

pub fn build_pool(conninfo: &str, max_size: u32) -> ArchiverResult<PgPool> {
    let manager = PostgresConnectionManager::new(
        conninfo
            .parse()
            .map_err(|e| ArchiverError::config(format!("invalid postgres conninfo: {e}")))?,
        NoTls,
    );
    r2d2::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| ArchiverError::connection(format!("building postgres pool: {e}")))
}

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn client(&self) -> ArchiverResult<r2d2::PooledConnection<PostgresConnectionManager<NoTls>>> {
        self.pool
            .get()
            .map_err(|e| ArchiverError::connection(format!("checking out postgres connection: {e}")))
    }
}

impl Backend for PostgresBackend {
    fn engine(&self) -> DbEngine {
        DbEngine::Postgres
    }

    fn scan_existing_tables(&mut self) -> ArchiverResult<Vec<ExistingTable>> {
        let mut client = self.client()?;
        let rows = client
            .query(
                "SELECT tablename FROM pg_tables WHERE schemaname = 'public'",
                &[],
            )
            .map_err(|e| ArchiverError::backend(format!("scanning tables: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            let name: String = row.get(0);
            let col_rows = client
                .query(
                    "SELECT column_name FROM information_schema.columns \
                     WHERE table_name = $1 ORDER BY ordinal_position",
                    &[&name],
                )
                .map_err(|e| ArchiverError::backend(format!("scanning columns of {name}: {e}")))?;
            let columns: Vec<String> = col_rows.iter().map(|r| r.get(0)).collect();
            let count_row = client
                .query_one(&format!("SELECT count(*) FROM {}", super::quote_ident(&name)), &[])
                .map_err(|e| ArchiverError::backend(format!("counting {name}: {e}")))?;
            let row_count: i64 = count_row.get(0);
            out.push(ExistingTable {
                name,
                columns,
                row_count: row_count as u64,
            });
        }
        Ok(out)
    }

    fn create_table(&mut self, name: &str, columns: &[ColumnSpec], indices: &[&str]) -> ArchiverResult<()> {
        let mut client = self.client()?;
        let cols_sql: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let pk = if i == 0 { " PRIMARY KEY" } else { "" };
                format!("{} {}{}", super::quote_ident(&c.name), c.ty.sql_type(), pk)
            })
            .collect();
        let create = format!("CREATE TABLE {} ({})", super::quote_ident(name), cols_sql.join(", "));
        client
            .execute(&create, &[])
            .map_err(|e| ArchiverError::backend(format!("creating table {name}: {e}")))?;
        for idx_col in indices {
            let idx_name = format!("{name}_{idx_col}_idx");
            let sql = format!(
                "CREATE INDEX {} ON {} ({})",
                super::quote_ident(&idx_name),
                super::quote_ident(name),
                super::quote_ident(idx_col)
            );
            client
                .execute(&sql, &[])
                .map_err(|e| ArchiverError::backend(format!("creating index on {name}.{idx_col}: {e}")))?;
        }
        Ok(())
    }

    fn bulk_load(&mut self, table: &str, staging_path: &str) -> ArchiverResult<u64> {
        let mut client = self.client()?;
        let sql = format!(
            "COPY {} FROM '{}' CSV QUOTE ''''",
            super::quote_ident(table),
            staging_path.replace('\'', "''")
        );
        client
            .execute(&sql, &[])
            .map_err(|e| ArchiverError::backend(format!("bulk loading {table}: {e}")))
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
        let mut client = self.client()?;
        let col_list: Vec<String> = columns.iter().map(|c| format!("key.{}", super::quote_ident(&c.name))).collect();
        let mut sql = format!(
            "SELECT raw.tai, {} FROM reply_raw raw, {} key WHERE raw.id = key.raw_id",
            col_list.join(", "),
            super::quote_ident(table)
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
        let rows = client
            .query(&sql, &[])
            .map_err(|e| ArchiverError::backend(format!("querying {table}: {e}")))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let tai: f64 = row.get(0);
            let mut values = Vec::with_capacity(columns.len());
            for (i, col) in columns.iter().enumerate() {
                let idx = i + 1;
                let value = match col.ty {
                    ColumnType::Int2 => row.try_get::<_, Option<i16>>(idx).ok().flatten().map(|v| Value::Int(v as i64)),
                    ColumnType::Int4 => row.try_get::<_, Option<i32>>(idx).ok().flatten().map(|v| Value::Int(v as i64)),
                    ColumnType::Int8 => row.try_get::<_, Option<i64>>(idx).ok().flatten().map(Value::Int),
                    ColumnType::Flt4 => row.try_get::<_, Option<f32>>(idx).ok().flatten().map(|v| Value::Float(v as f64)),
                    ColumnType::Flt8 => row.try_get::<_, Option<f64>>(idx).ok().flatten().map(Value::Float),
                    ColumnType::Text => row.try_get::<_, Option<String>>(idx).ok().flatten().map(Value::Text),
                };
                values.push(value.unwrap_or(Value::Invalid));
            }
            out.push((tai, values));
        }
        Ok(out)
    }

    fn insert_row(&mut self, table: &str, columns: &[&str], values: &[String]) -> ArchiverResult<u64> {
        let mut client = self.client()?;
        let cols: Vec<String> = columns.iter().map(|c| super::quote_ident(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            super::quote_ident(table),
            cols.join(", "),
            values.join(", "),
            super::quote_ident(columns[0])
        );
        let row = client
            .query_one(&sql, &[])
            .map_err(|e| ArchiverError::backend(format!("inserting into {table}: {e}")))?;
        let id: i64 = row.get(0);
        Ok(id as u64)
    }

    fn max_id(&mut self, table: &str, id_column: &str) -> ArchiverResult<u64> {
        let mut client = self.client()?;
        let sql = format!(
            "SELECT COALESCE(MAX({}), -1) FROM {}",
            super::quote_ident(id_column),
            super::quote_ident(table)
        );
        let row = client
            .query_one(&sql, &[])
            .map_err(|e| ArchiverError::backend(format!("max id of {table}: {e}")))?;
        let max: i64 = row.get(0);
        Ok((max + 1).max(0) as u64)
    }

    fn load_actors(&mut self) -> ArchiverResult<Vec<(u32, String, i32, i32, String)>> {
        let mut client = self.client()?;
        let rows = match client.query("SELECT id, name, major, minor, checksum FROM actors", &[]) {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };
        Ok(rows
            .iter()
            .map(|row| {
                let id: i32 = row.get(0);
                let name: String = row.get(1);
                let major: i32 = row.get(2);
                let minor: i32 = row.get(3);
                let checksum: String = row.get(4);
                (id as u32, name, major, minor, checksum)
            })
            .collect())
    }
}
