//! The archiver's central handle
//!
//! Replaces the module-level globals of `database.py`/`actors.py`/
//! `monitor.py` (`Table.registry`, `Actor.existing`, the `lines`/
//! `subscriptions`/`subscribers` dicts) with a single struct owning all of
//! it, constructed once at startup and shared behind an `Arc` with every
//! connection task.

use crate::actor::{Actor, ActorRegistry, DictionaryProvider};
use crate::backend::pool::WorkerPool;
use crate::config::Config;
use crate::errors::{ArchiverError, ArchiverResult};
use crate::monitor::MonitorService;
use crate::table::keytable::KeyTable;
use crate::table::registry::TableRegistry;
use crate::table::Table;
use crate::time::{now_tai_mjd, SystemClock};
use crate::value::{ColumnSpec, ColumnType, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Dictionary provider used when no external schema source is configured:
/// every actor is treated as dictionary-less, matching the "unknown actor"
/// scenario — every incoming keyword for it counts as a `key_errors`.
pub struct NullDictionaryProvider;

impl DictionaryProvider for NullDictionaryProvider {
    fn load(&self, _actor_name: &str) -> Option<crate::actor::ActorDictionary> {
        None
    }
}

fn reply_raw_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec { name: "id".into(), ty: ColumnType::Int8 },
        ColumnSpec { name: "tai".into(), ty: ColumnType::Flt8 },
        ColumnSpec { name: "msg".into(), ty: ColumnType::Text },
    ]
}

fn reply_hdr_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec { name: "raw_id".into(), ty: ColumnType::Int8 },
        ColumnSpec { name: "actor_id".into(), ty: ColumnType::Int4 },
        ColumnSpec { name: "program".into(), ty: ColumnType::Text },
        ColumnSpec { name: "username".into(), ty: ColumnType::Text },
        ColumnSpec { name: "cmd_num".into(), ty: ColumnType::Int4 },
        ColumnSpec { name: "code".into(), ty: ColumnType::Text },
        ColumnSpec { name: "key_errors".into(), ty: ColumnType::Int4 },
    ]
}

fn actors_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec { name: "id".into(), ty: ColumnType::Int4 },
        ColumnSpec { name: "name".into(), ty: ColumnType::Text },
        ColumnSpec { name: "major".into(), ty: ColumnType::Int4 },
        ColumnSpec { name: "minor".into(), ty: ColumnType::Int4 },
        ColumnSpec { name: "checksum".into(), ty: ColumnType::Text },
    ]
}

/// One fully parsed reply line, per the wire format in the external
/// interfaces section: `program.user cmdNum actor code [keyword[=value[,value…]];…]`.
pub struct ReplyMessage {
    pub program: String,
    pub user: String,
    pub cmd_id: i64,
    pub actor: String,
    pub code: String,
    pub keywords: Vec<(String, Vec<String>)>,
}

pub fn parse_reply_line(line: &str) -> ArchiverResult<ReplyMessage> {
    let mut parts = line.splitn(4, ' ');
    let prog_user = parts.next().filter(|s| !s.is_empty());
    let cmd_id = parts.next();
    let actor = parts.next();
    let rest = parts.next().unwrap_or("").trim_start();
    let (Some(prog_user), Some(cmd_id), Some(actor)) = (prog_user, cmd_id, actor) else {
        return Err(ArchiverError::parse("reply line missing program.user, cmdNum, or actor"));
    };
    let (program, user) = prog_user
        .split_once('.')
        .ok_or_else(|| ArchiverError::parse("reply line's first token must be program.user"))?;
    let cmd_id: i64 = cmd_id
        .parse()
        .map_err(|_| ArchiverError::parse(format!("invalid command id: {cmd_id}")))?;
    let (code, keyword_text) = match rest.split_once(' ') {
        Some((code, tail)) => (code, tail),
        None => (rest, ""),
    };
    if code.is_empty() {
        return Err(ArchiverError::parse("reply line missing status code"));
    }
    let keywords = keyword_text
        .split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|kw| match kw.split_once('=') {
            Some((name, values)) => (
                name.trim().to_string(),
                values.split(',').map(|v| v.trim().to_string()).collect(),
            ),
            None => (kw.to_string(), Vec::new()),
        })
        .collect();
    Ok(ReplyMessage {
        program: program.to_string(),
        user: user.to_string(),
        cmd_id,
        actor: actor.to_string(),
        code: code.to_string(),
        keywords,
    })
}

/// Coerces raw keyword value strings into the typed carrier per the
/// keyword's declared column type; an unparseable value becomes `Invalid`,
/// which the caller counts as a key error.
fn coerce_value(raw: &str, ty: ColumnType) -> Value {
    match ty {
        ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8 => {
            raw.parse::<i64>().map(Value::Int).unwrap_or(Value::Invalid)
        }
        ColumnType::Flt4 | ColumnType::Flt8 => raw.parse::<f64>().map(Value::Float).unwrap_or(Value::Invalid),
        ColumnType::Text => Value::Text(raw.to_string()),
    }
}

pub struct Engine {
    pub config: Config,
    pub pool: WorkerPool,
    pub clock: SystemClock,
    staging_dir: PathBuf,
    tables: Mutex<TableRegistry>,
    reply_raw: Mutex<Table>,
    reply_hdr: Mutex<Table>,
    actors: Mutex<ActorRegistry>,
    keytables: Mutex<HashMap<String, KeyTable>>,
    pub monitor: Mutex<MonitorService>,
    dict_provider: Box<dyn DictionaryProvider>,
}

impl Engine {
    pub async fn start(config: Config, dict_provider: Box<dyn DictionaryProvider>) -> ArchiverResult<Self> {
        let pool = WorkerPool::connect(&config)?;
        let tables = TableRegistry::scan(&pool).await?;
        let staging_dir = PathBuf::from(&config.tmp_path);
        if staging_dir.exists() {
            return Err(ArchiverError::config(format!(
                "staging directory already exists: {}",
                staging_dir.display()
            )));
        }
        std::fs::create_dir_all(&staging_dir)?;

        let clock = config.system_clock();

        let reply_raw_cols = reply_raw_columns();
        if let Some(existing) = tables.get("reply_raw") {
            let names: Vec<String> = reply_raw_cols.iter().map(|c| c.name.clone()).collect();
            Table::validate_columns("reply_raw", &reply_raw_cols, &existing.columns)
                .map_err(|_| ArchiverError::config(format!("reply_raw column mismatch: expected {names:?}")))?;
        }
        let traced_raw = config.trace_list.iter().any(|t| t == "raw");
        let mut reply_raw = Table::new(
            "reply_raw",
            reply_raw_cols,
            config.raw_buffer_size,
            vec![],
            staging_dir.clone(),
            tables.next_id("reply_raw"),
            traced_raw,
        )?;
        if !tables.exists("reply_raw") {
            reply_raw.ensure_created(&pool).await?;
        }

        if let Some(existing) = tables.get("reply_hdr") {
            Table::validate_columns("reply_hdr", &reply_hdr_columns(), &existing.columns)?;
        }
        let traced_hdr = config.trace_list.iter().any(|t| t == "hdr");
        let mut reply_hdr = Table::new(
            "reply_hdr",
            reply_hdr_columns(),
            config.hdr_buffer_size,
            vec!["raw_id".to_string()],
            staging_dir.clone(),
            tables.next_id("reply_hdr"),
            traced_hdr,
        )?;
        if !tables.exists("reply_hdr") {
            reply_hdr.ensure_created(&pool).await?;
        }

        let actors_cols = actors_columns();
        if let Some(existing) = tables.get("actors") {
            Table::validate_columns("actors", &actors_cols, &existing.columns)?;
        } else {
            pool.create_table("actors".to_string(), actors_cols, vec![]).await?;
        }

        let mut actor_registry = ActorRegistry::new(tables.next_id("actors") as u32);
        let seeded = pool.load_actors().await?;
        actor_registry.seed(seeded);

        Ok(Self {
            config,
            pool,
            clock,
            staging_dir,
            tables: Mutex::new(tables),
            reply_raw: Mutex::new(reply_raw),
            reply_hdr: Mutex::new(reply_hdr),
            actors: Mutex::new(actor_registry),
            keytables: Mutex::new(HashMap::new()),
            monitor: Mutex::new(MonitorService::default()),
            dict_provider,
        })
    }

    /// Ingests one reply line per §4.6/§8 scenarios 1 and 2: timestamp,
    /// record the raw message unconditionally, then parse/resolve/dispatch
    /// per keyword, and finally append one `reply_hdr` row.
    pub async fn ingest_reply(&self, message: &str) -> ArchiverResult<()> {
        let tai = now_tai_mjd(self.clock);
        let raw_id = {
            let mut raw = self.reply_raw.lock().await;
            let id = raw.record(vec![Value::Float(tai), Value::Text(message.to_string())])?;
            self.maybe_flush(&mut raw).await;
            id
        };

        let parsed = match parse_reply_line(message) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unable to parse reply line");
                return Ok(());
            }
        };

        let actor = self
            .actors
            .lock()
            .await
            .attach(&parsed.actor, false, self.dict_provider.as_ref(), &self.pool)
            .await?;

        let mut key_errors = 0u32;
        if actor.dictionary.is_none() {
            key_errors += parsed.keywords.len() as u32;
        } else {
            for (kw_name, raw_values) in &parsed.keywords {
                match self.dispatch_keyword(&actor, kw_name, raw_values, tai, raw_id).await {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(actor = %actor.name, keyword = %kw_name, error = %e, "keyword write failed");
                        key_errors += 1;
                    }
                }
            }
        }

        let mut hdr = self.reply_hdr.lock().await;
        hdr.record(vec![
            Value::Int(raw_id as i64),
            Value::Int(actor.id as i64),
            Value::Text(parsed.program.clone()),
            Value::Text(parsed.user.clone()),
            Value::Int(parsed.cmd_id),
            Value::Text(parsed.code.clone()),
            Value::Int(key_errors as i64),
        ])?;
        self.maybe_flush(&mut hdr).await;
        Ok(())
    }

    async fn dispatch_keyword(
        &self,
        actor: &Actor,
        keyword: &str,
        raw_values: &[String],
        tai: f64,
        raw_id: u64,
    ) -> ArchiverResult<()> {
        let schema = actor
            .keyword(keyword)
            .ok_or_else(|| ArchiverError::parse(format!("unknown keyword {keyword}")))?
            .clone();

        // Missing trailing values pad to Invalid here rather than erroring;
        // `Table::record` resizes short rows the same way on the way in, so
        // this only matters for the key_errors accounting below. A value
        // that was present but failed to parse is a genuine key error.
        let mut values = Vec::with_capacity(schema.columns.len());
        let mut malformed = false;
        for (i, col) in schema.columns.iter().enumerate() {
            let value = match raw_values.get(i) {
                Some(raw) => coerce_value(raw, col.ty),
                None => Value::Invalid,
            };
            if value.is_invalid() && i < raw_values.len() {
                malformed = true;
            }
            values.push(value);
        }
        if malformed {
            return Err(ArchiverError::parse(format!("invalid values for keyword {keyword}")));
        }

        let tag = format!("{}.{}", actor.name.to_lowercase(), keyword.to_lowercase());
        {
            let mut keytables = self.keytables.lock().await;
            if !keytables.contains_key(&tag) {
                let table_name = format!("{}__{}", actor.name.to_lowercase(), keyword.to_lowercase());
                let registry = self.tables.lock().await;
                let existing = registry.get(&table_name).cloned();
                let next_id = registry.next_id(&table_name);
                drop(registry);

                let kt = KeyTable::attach(
                    &actor.name.to_lowercase(),
                    &keyword.to_lowercase(),
                    schema.columns.clone(),
                    self.config.key_buffer_size,
                    self.staging_dir.clone(),
                    next_id,
                    self.config.trace_list.iter().any(|t| t == &tag),
                )?;
                match &existing {
                    Some(e) => Table::validate_columns(&table_name, &kt.table.columns, &e.columns)?,
                    None => kt.table.ensure_created(&self.pool).await?,
                }
                keytables.insert(tag.clone(), kt);
            }
            let kt = keytables.get_mut(&tag).unwrap();
            kt.record(tai, raw_id, values.clone())?;
            if kt.table.should_flush() {
                kt.begin_flush_and_clear_cache(&self.pool).await;
            }
        }

        self.monitor.lock().await.dispatch(&tag, tai, &values)?;
        Ok(())
    }

    async fn maybe_flush(&self, table: &mut Table) {
        if table.should_flush() {
            if let Some((path, rows)) = table.begin_flush() {
                table.finish_flush(&self.pool, path, rows).await;
            }
        }
    }

    /// Finds the longest-idle non-busy table with buffered rows past
    /// `idle_time` and flushes it; called once per ping-interval tick.
    pub async fn idle_flush_tick(&self) {
        let idle_time = self.config.idle_time;
        let mut oldest: Option<(String, std::time::Instant)> = None;

        {
            let raw = self.reply_raw.lock().await;
            if !raw.is_busy() && raw.has_buffered_rows() {
                oldest = Some(("reply_raw".to_string(), raw.last_activity()));
            }
        }
        {
            let hdr = self.reply_hdr.lock().await;
            if !hdr.is_busy() && hdr.has_buffered_rows() {
                if oldest.as_ref().map(|(_, t)| hdr.last_activity() < *t).unwrap_or(true) {
                    oldest = Some(("reply_hdr".to_string(), hdr.last_activity()));
                }
            }
        }
        {
            let keytables = self.keytables.lock().await;
            for (tag, kt) in keytables.iter() {
                if !kt.table.is_busy() && kt.table.has_buffered_rows() {
                    if oldest.as_ref().map(|(_, t)| kt.table.last_activity() < *t).unwrap_or(true) {
                        oldest = Some((tag.clone(), kt.table.last_activity()));
                    }
                }
            }
        }

        let Some((name, last_activity)) = oldest else {
            return;
        };
        if last_activity.elapsed().as_secs_f64() < idle_time {
            return;
        }

        if name == "reply_raw" {
            let mut raw = self.reply_raw.lock().await;
            if let Some((path, rows)) = raw.begin_flush() {
                raw.finish_flush(&self.pool, path, rows).await;
            }
        } else if name == "reply_hdr" {
            let mut hdr = self.reply_hdr.lock().await;
            if let Some((path, rows)) = hdr.begin_flush() {
                hdr.finish_flush(&self.pool, path, rows).await;
            }
        } else {
            let mut keytables = self.keytables.lock().await;
            if let Some(kt) = keytables.get_mut(&name) {
                kt.begin_flush_and_clear_cache(&self.pool).await;
            }
        }
    }

    /// Orderly drain: synchronously flush every non-empty buffer,
    /// regardless of `busy`/idle state, so a shutdown never silently
    /// drops buffered rows.
    pub async fn shutdown_drain(&self) {
        info!("draining buffers before shutdown");
        let _ = self.reply_raw.lock().await.flush_now(&self.pool).await;
        let _ = self.reply_hdr.lock().await.flush_now(&self.pool).await;
        let mut keytables = self.keytables.lock().await;
        for (tag, kt) in keytables.iter_mut() {
            kt.begin_flush_and_clear_cache(&self.pool).await;
            info!(table = %tag, "drained");
        }
    }

    pub async fn create_monitor(&self, name: &str, expr: &str, help: Option<String>) -> ArchiverResult<()> {
        let mut root = crate::expr::Parser::parse(expr)?;
        let provider = self.dict_provider.as_ref();
        root.resolve_value_indices(&|tag: &str| {
            let (actor, keyword) = tag.split_once('.')?;
            let dict = provider.load(actor)?;
            let schema = dict.keywords.get(keyword)?;
            Some(schema.columns.iter().map(|c| c.name.to_lowercase()).collect())
        })?;
        let tables = root.watch_set();
        self.monitor.lock().await.create(name, expr, help, root, tables)
    }

    pub async fn drop_monitor(&self, name: &str) -> ArchiverResult<()> {
        self.monitor.lock().await.drop(name)
    }

    pub async fn subscribe(&self, name: &str, timeout_secs: Option<f64>, history_secs: Option<f64>) -> ArchiverResult<String> {
        let id = self.monitor.lock().await.subscribe(name, timeout_secs)?;
        if let Some(history_secs) = history_secs {
            self.preload_history(&id, name, history_secs).await?;
        }
        Ok(id)
    }

    /// Replays buffered history through the newly created subscription by
    /// merging `by_date` results from every key table the expression
    /// references, sorted ascending, per the monitor service's history
    /// preload behavior.
    async fn preload_history(&self, sub_id: &str, monitor_name: &str, history_secs: f64) -> ArchiverResult<()> {
        let tags = {
            let monitor = self.monitor.lock().await;
            monitor.get(monitor_name).map(|m| m.tables.clone()).unwrap_or_default()
        };
        let keytables = self.keytables.lock().await;
        let referenced: Vec<(String, &KeyTable)> = tags
            .iter()
            .filter_map(|tag| keytables.get(tag).map(|kt| (tag.clone(), kt)))
            .collect();
        let merged = crate::monitor::merged_history(&referenced, history_secs, None, self.clock, &self.pool).await?;
        drop(keytables);

        let updates: Vec<(f64, String, Vec<Value>)> = merged.into_iter().map(|(tag, tai, values)| (tai, tag, values)).collect();
        self.monitor.lock().await.preload_buffer(sub_id, monitor_name, updates)
    }

    pub async fn flush_subscription(&self, sub_id: &str) -> ArchiverResult<Vec<(f64, Value)>> {
        self.monitor.lock().await.flush(sub_id)
    }

    pub async fn monitor_info(&self) -> Vec<crate::monitor::MonitorInfo> {
        self.monitor.lock().await.info()
    }

    pub async fn subscriber_info(&self) -> Vec<crate::monitor::SubscriberInfo> {
        self.monitor.lock().await.subscriber_info()
    }

    pub fn tmp_path(&self) -> &std::path::Path {
        &self.staging_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorDictionary, DictionaryProvider, KeywordSchema};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    struct FakeProvider(HashMap<String, ActorDictionary>);

    impl DictionaryProvider for FakeProvider {
        fn load(&self, actor_name: &str) -> Option<ActorDictionary> {
            self.0.get(actor_name).cloned()
        }
    }

    fn test_config() -> Config {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut config = Config::for_test();
        config.tmp_path = std::env::temp_dir()
            .join(format!("archiver-enginetest-{}-{n}", std::process::id()))
            .to_string_lossy()
            .to_string();
        config
    }

    fn col(name: &str) -> ColumnSpec {
        ColumnSpec { name: name.to_string(), ty: ColumnType::Flt8 }
    }

    fn dict(keywords: &[(&str, &[&str])]) -> ActorDictionary {
        let mut map = HashMap::new();
        for (kw, members) in keywords {
            map.insert(
                kw.to_string(),
                KeywordSchema {
                    name: kw.to_string(),
                    columns: members.iter().map(|m| col(m)).collect(),
                },
            );
        }
        ActorDictionary {
            major: 1,
            minor: 0,
            checksum: "c".to_string(),
            keywords: map,
        }
    }

    async fn start(provider: HashMap<String, ActorDictionary>) -> Engine {
        Engine::start(test_config(), Box::new(FakeProvider(provider))).await.unwrap()
    }

    /// Scenario 1: single raw ingest with no keywords.
    #[tokio::test]
    async fn scenario1_single_raw_ingest() {
        let engine = start(HashMap::new()).await;
        engine.ingest_reply("prog.user 1 tcc i ").await.unwrap();

        let raw = engine.reply_raw.lock().await;
        assert_eq!(raw.buffered_rows(), 1);
        let row = &raw.buffered()[0];
        assert!(matches!(row[0], Value::Float(_)));
        assert_eq!(row[1], Value::Text("prog.user 1 tcc i ".to_string()));
        drop(raw);

        let hdr = engine.reply_hdr.lock().await;
        assert_eq!(hdr.buffered_rows(), 1);
        let hrow = &hdr.buffered()[0];
        assert_eq!(hrow[0], Value::Int(0)); // raw_id
        assert_eq!(hrow[6], Value::Int(0)); // key_errors
    }

    /// Scenario 2: unknown actor with no dictionary records key_errors and
    /// creates no keyword table.
    #[tokio::test]
    async fn scenario2_unknown_actor_counts_key_errors() {
        let engine = start(HashMap::new()).await;
        engine.ingest_reply("p.u 1 XYZ i k=1").await.unwrap();

        let hdr = engine.reply_hdr.lock().await;
        let hrow = &hdr.buffered()[0];
        assert_eq!(hrow[6], Value::Int(1));
        drop(hdr);

        let keytables = engine.keytables.lock().await;
        assert!(!keytables.contains_key("xyz.k"));
    }

    /// Scenario 3: keyBufferSize=3 over 7 rows flushes exactly twice and
    /// leaves one row buffered, with no leftover staging files from the
    /// completed flushes (the currently-open staging file for the one
    /// buffered row is the only one left on disk).
    #[tokio::test]
    async fn scenario3_buffered_flush_every_3_rows() {
        let mut provider = HashMap::new();
        provider.insert("tcc".to_string(), dict(&[("aliveat", &["val"])]));
        let mut config = test_config();
        config.key_buffer_size = 3;
        let engine = Engine::start(config, Box::new(FakeProvider(provider))).await.unwrap();

        for _ in 0..7 {
            engine.ingest_reply("tcc.user 1 tcc i aliveAt=1240512177").await.unwrap();
        }

        let keytables = engine.keytables.lock().await;
        let kt = keytables.get("tcc.aliveat").unwrap();
        assert_eq!(kt.table.buffered_rows(), 1);
        drop(keytables);

        let files: Vec<_> = std::fs::read_dir(engine.tmp_path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("tcc__aliveat-"))
            .collect();
        assert_eq!(files.len(), 1, "only the in-flight staging file should remain");
        let contents = std::fs::read_to_string(files[0].path()).unwrap();
        assert_eq!(contents.lines().count(), 1, "the 2 flushed batches were removed from disk");
    }

    /// Scenario 4: `x.y.val0 + pow(a.b.val2, x.y.val2)` with
    /// a.b={0,1,2}, x.y={9,8,7} evaluates to 9 + 2^7 = 137.
    #[tokio::test]
    async fn scenario4_expression_arithmetic() {
        let mut provider = HashMap::new();
        provider.insert("a".to_string(), dict(&[("b", &["val0", "val1", "val2"])]));
        provider.insert("x".to_string(), dict(&[("y", &["val0", "val1", "val2"])]));
        let engine = start(provider).await;

        engine
            .create_monitor("M", "x.y.val0 + pow(a.b.val2, x.y.val2)", None)
            .await
            .unwrap();
        let sub_id = engine.subscribe("M", None, None).await.unwrap();

        engine.ingest_reply("p.u 1 a i b=0,1,2").await.unwrap();
        engine.ingest_reply("p.u 2 x i y=9,8,7").await.unwrap();

        let rows = engine.flush_subscription(&sub_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        let (_, value) = &rows[0];
        assert_eq!(*value, Value::Float(9.0 + 2f64.powf(7.0)));
    }

    /// Scenario 5: `x.y.val when a.b.val` latches on the true transition,
    /// tracks while true, and freezes on the false transition.
    #[tokio::test]
    async fn scenario5_when_latch_buffer() {
        let mut provider = HashMap::new();
        provider.insert("a".to_string(), dict(&[("b", &["val"])]));
        provider.insert("x".to_string(), dict(&[("y", &["val"])]));
        let engine = start(provider).await;

        engine.create_monitor("M", "x.y.val when a.b.val", None).await.unwrap();
        let sub_id = engine.subscribe("M", None, None).await.unwrap();

        engine.ingest_reply("p.u 1 a i b=0").await.unwrap();
        engine.ingest_reply("p.u 2 x i y=999").await.unwrap();
        engine.ingest_reply("p.u 3 a i b=1").await.unwrap();
        engine.ingest_reply("p.u 4 x i y=123").await.unwrap();
        engine.ingest_reply("p.u 5 a i b=0").await.unwrap();
        engine.ingest_reply("p.u 6 x i y=7").await.unwrap();

        let rows = engine.flush_subscription(&sub_id).await.unwrap();
        let values: Vec<Value> = rows.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![Value::Float(999.0), Value::Float(123.0)]);
    }
}
