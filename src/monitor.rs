//! Monitor service: named expressions, subscriptions, buffering, and
//! timeout-based expiry
//!
//! Grounded on `python/archiver/monitor.py`'s `create`/`drop`/`subscribe`/
//! `flush` module functions and `MonitorExpression`/`MonitorSubscription`
//! classes, generalized behind an engine handle instead of module-level
//! globals (`lines`, `subscriptions`, `subscribers`).

use crate::backend::pool::WorkerPool;
use crate::errors::{ArchiverError, ArchiverResult};
use crate::expr::ast::Node;
use crate::table::keytable::KeyTable;
use crate::time::SystemClock;
use crate::value::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct MonitorExpression {
    pub name: String,
    pub expr: String,
    pub help: Option<String>,
    pub root: Node,
    /// Tags of every key table this expression's `KeyValue` leaves
    /// reference, used for history preload via `by_date`.
    pub tables: Vec<String>,
}

impl MonitorExpression {
    pub fn value(&self) -> &Value {
        self.root.value()
    }

    pub fn update(&mut self, tag: &str, values: &[Value]) -> ArchiverResult<bool> {
        self.root.update(tag, values)
    }
}

pub struct Subscription {
    pub id: String,
    pub monitor_name: String,
    pub timeout: Duration,
    pub buffer: Vec<(f64, Value)>,
    pub last_flush: Instant,
}

impl Subscription {
    /// Buffers `(timestamp, value)` if the expression's value changed and
    /// is non-null and the subscription hasn't timed out; otherwise (per
    /// the inferred fix for the expiry branch's undefined-local bug)
    /// signals the caller to drop the subscription from both indices and
    /// silently discard the update.
    pub fn on_update(&mut self, timestamp: f64, changed: bool, new_value: &Value) -> SubscriptionOutcome {
        if self.last_flush.elapsed() >= self.timeout {
            return SubscriptionOutcome::Expired;
        }
        if changed && !new_value.is_invalid() {
            self.buffer.push((timestamp, new_value.clone()));
        }
        SubscriptionOutcome::Ok
    }

    pub fn flush(&mut self) -> Vec<(f64, Value)> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.buffer)
    }
}

pub enum SubscriptionOutcome {
    Ok,
    Expired,
}

#[derive(Debug, Clone)]
pub struct MonitorInfo {
    pub name: String,
    pub expr: String,
    pub help: Option<String>,
    pub subscriber_count: usize,
}

#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    pub id: String,
    pub monitor_name: String,
    pub timeout_secs: f64,
    pub age_secs: f64,
}

#[derive(Default)]
pub struct MonitorService {
    lines: HashMap<String, MonitorExpression>,
    subscriptions: HashMap<String, Vec<String>>, // monitor lowercase name -> subscription ids
    subscribers: HashMap<String, Subscription>,
}

impl MonitorService {
    pub fn create(&mut self, name: &str, expr: &str, help: Option<String>, root: Node, tables: Vec<String>) -> ArchiverResult<()> {
        let lcname = name.to_lowercase();
        if self.lines.contains_key(&lcname) {
            return Err(ArchiverError::monitor(format!("name already in use: {name}")));
        }
        self.lines.insert(
            lcname.clone(),
            MonitorExpression {
                name: name.to_string(),
                expr: expr.to_string(),
                help,
                root,
                tables,
            },
        );
        self.subscriptions.insert(lcname, Vec::new());
        Ok(())
    }

    pub fn drop(&mut self, name: &str) -> ArchiverResult<()> {
        let lcname = name.to_lowercase();
        if !self.lines.contains_key(&lcname) {
            return Err(ArchiverError::monitor(format!("no such monitor: {name}")));
        }
        if !self.subscriptions.get(&lcname).map(|v| v.is_empty()).unwrap_or(true) {
            return Err(ArchiverError::monitor("cannot drop monitor with subscribers"));
        }
        self.lines.remove(&lcname);
        self.subscriptions.remove(&lcname);
        Ok(())
    }

    /// Subscribes to `name`. History preload (via `by_date` on every
    /// table the expression references, merged and replayed in TAI order)
    /// is performed by the caller, which has access to the key tables;
    /// see `Engine::subscribe`.
    pub fn subscribe(&mut self, name: &str, timeout_secs: Option<f64>) -> ArchiverResult<String> {
        let lcname = name.to_lowercase();
        if !self.lines.contains_key(&lcname) {
            return Err(ArchiverError::monitor(format!("no such monitor to subscribe to: {name}")));
        }
        let id = format!("{:08x}", Uuid::new_v4().as_u128() as u32);
        let sub = Subscription {
            id: id.clone(),
            monitor_name: lcname.clone(),
            timeout: Duration::from_secs_f64(timeout_secs.unwrap_or(3600.0)),
            buffer: Vec::new(),
            last_flush: Instant::now(),
        };
        self.subscriptions.entry(lcname).or_default().push(id.clone());
        self.subscribers.insert(id.clone(), sub);
        Ok(id)
    }

    pub fn flush(&mut self, sub_id: &str) -> ArchiverResult<Vec<(f64, Value)>> {
        self.subscribers
            .get_mut(sub_id)
            .map(|s| s.flush())
            .ok_or_else(|| ArchiverError::monitor(format!("no such subscriber with id {sub_id}")))
    }

    pub fn info(&self) -> Vec<MonitorInfo> {
        let mut names: Vec<&String> = self.lines.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|lcname| {
                let line = &self.lines[lcname];
                MonitorInfo {
                    name: line.name.clone(),
                    expr: line.expr.clone(),
                    help: line.help.clone(),
                    subscriber_count: self.subscriptions.get(lcname).map(|v| v.len()).unwrap_or(0),
                }
            })
            .collect()
    }

    pub fn subscriber_info(&self) -> Vec<SubscriberInfo> {
        self.subscribers
            .values()
            .map(|s| SubscriberInfo {
                id: s.id.clone(),
                monitor_name: self.lines.get(&s.monitor_name).map(|l| l.name.clone()).unwrap_or_default(),
                timeout_secs: s.timeout.as_secs_f64(),
                age_secs: s.last_flush.elapsed().as_secs_f64(),
            })
            .collect()
    }

    /// Dispatches a keyword update to every monitor expression (updating
    /// their DAGs) and every subscriber of an affected monitor, removing
    /// expired subscriptions from both indices.
    pub fn dispatch(&mut self, tag: &str, timestamp: f64, values: &[Value]) -> ArchiverResult<()> {
        let mut expired: Vec<(String, String)> = Vec::new(); // (monitor lcname, sub id)
        for (lcname, expr) in self.lines.iter_mut() {
            let changed = expr.update(tag, values)?;
            let Some(sub_ids) = self.subscriptions.get(lcname) else {
                continue;
            };
            for sub_id in sub_ids {
                if let Some(sub) = self.subscribers.get_mut(sub_id) {
                    match sub.on_update(timestamp, changed, expr.value()) {
                        SubscriptionOutcome::Ok => {}
                        SubscriptionOutcome::Expired => expired.push((lcname.clone(), sub_id.clone())),
                    }
                }
            }
        }
        for (lcname, sub_id) in expired {
            if let Some(list) = self.subscriptions.get_mut(&lcname) {
                list.retain(|id| id != &sub_id);
            }
            self.subscribers.remove(&sub_id);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MonitorExpression> {
        self.lines.get(&name.to_lowercase())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut MonitorExpression> {
        self.lines.get_mut(&name.to_lowercase())
    }

    /// Replays merged history rows (ascending TAI) through `monitor_name`'s
    /// expression DAG and appends every changed, non-null result directly
    /// into `sub_id`'s buffer, mirroring `Subscription::on_update` without
    /// its timeout-expiry check (a freshly created subscription cannot
    /// already be expired).
    pub fn preload_buffer(
        &mut self,
        sub_id: &str,
        monitor_name: &str,
        updates: Vec<(f64, String, Vec<Value>)>,
    ) -> ArchiverResult<()> {
        let lcname = monitor_name.to_lowercase();
        let Some(expr) = self.lines.get_mut(&lcname) else {
            return Err(ArchiverError::monitor(format!("no such monitor: {monitor_name}")));
        };
        let Some(sub) = self.subscribers.get_mut(sub_id) else {
            return Err(ArchiverError::monitor(format!("no such subscriber with id {sub_id}")));
        };
        for (tai, tag, values) in updates {
            let changed = expr.update(&tag, &values)?;
            if changed && !expr.value().is_invalid() {
                sub.buffer.push((tai, expr.value().clone()));
            }
        }
        Ok(())
    }
}

/// Merges multiple tables' `by_date` results keyed by TAI timestamp and
/// returns them sorted ascending, ready for sequential replay through the
/// expression DAG.
pub async fn merged_history(
    tables: &[(String, &KeyTable)],
    interval_secs: f64,
    end_at: Option<f64>,
    clock: SystemClock,
    pool: &WorkerPool,
) -> ArchiverResult<Vec<(String, f64, Vec<Value>)>> {
    let mut merged: Vec<(String, f64, Vec<Value>)> = Vec::new();
    for (tag, table) in tables {
        let rows = table.by_date(interval_secs, end_at, clock, pool).await?;
        for (tai, values) in rows {
            merged.push((tag.clone(), tai, values));
        }
    }
    merged.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Parser;

    #[test]
    fn create_rejects_duplicate_names() {
        let mut svc = MonitorService::default();
        let node = Parser::parse("1 + 1").unwrap();
        svc.create("m", "1+1", None, node, vec![]).unwrap();
        let node2 = Parser::parse("2 + 2").unwrap();
        assert!(svc.create("M", "2+2", None, node2, vec![]).is_err());
    }

    #[test]
    fn drop_fails_with_active_subscribers() {
        let mut svc = MonitorService::default();
        let node = Parser::parse("1 + 1").unwrap();
        svc.create("m", "1+1", None, node, vec![]).unwrap();
        svc.subscribe("m", None).unwrap();
        assert!(svc.drop("m").is_err());
    }

    #[test]
    fn flush_returns_and_clears_buffer() {
        let mut svc = MonitorService::default();
        let node = Parser::parse("a.b").unwrap();
        svc.create("m", "a.b", None, node, vec!["a.b".into()]).unwrap();
        let id = svc.subscribe("m", None).unwrap();
        svc.dispatch("a.b", 100.0, &[Value::Int(5)]).unwrap();
        let updates = svc.flush(&id).unwrap();
        assert_eq!(updates, vec![(100.0, Value::Int(5))]);
        assert!(svc.flush(&id).unwrap().is_empty());
    }
}
