//! Actor registry and schema dictionary reconciliation
//!
//! Grounded on `python/archiver/actors.py`'s `Actor.attach`/reconciliation
//! matrix: same version+checksum reuses the existing id, same version with
//! a different checksum is fatal (schema mutated without a version bump),
//! an older version is fatal (stale dictionary), and a newer version
//! inserts a fresh row.

use crate::backend::pool::WorkerPool;
use crate::errors::{ArchiverError, ArchiverResult};
use std::collections::HashMap;

/// A keyword validator as supplied by the (external) schema dictionary
/// provider: a name and the keyword's flattened column schema.
#[derive(Debug, Clone)]
pub struct KeywordSchema {
    pub name: String,
    pub columns: Vec<crate::value::ColumnSpec>,
}

/// The external actor-schema dictionary contract. A real deployment wires
/// this to whatever keyword-dictionary source is configured; tests use an
/// in-memory fake.
pub trait DictionaryProvider: Send + Sync {
    fn load(&self, actor_name: &str) -> Option<ActorDictionary>;
}

#[derive(Debug, Clone)]
pub struct ActorDictionary {
    pub major: i32,
    pub minor: i32,
    pub checksum: String,
    pub keywords: HashMap<String, KeywordSchema>,
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: u32,
    pub name: String,
    pub major: i32,
    pub minor: i32,
    pub checksum: String,
    pub dictionary: Option<ActorDictionary>,
}

impl Actor {
    pub fn keyword(&self, name: &str) -> Option<&KeywordSchema> {
        self.dictionary.as_ref()?.keywords.get(&name.to_lowercase())
    }
}

#[derive(Default)]
pub struct ActorRegistry {
    by_name: HashMap<String, Actor>,
    next_id: u32,
}

impl ActorRegistry {
    pub fn new(next_id: u32) -> Self {
        Self {
            by_name: HashMap::new(),
            next_id,
        }
    }

    /// Seeds the registry from a prior scan of the `actors` table: the
    /// newest recorded version of each name wins for reconciliation.
    pub fn seed(&mut self, rows: Vec<(u32, String, i32, i32, String)>) {
        for (id, name, major, minor, checksum) in rows {
            let entry = self.by_name.entry(name.clone()).or_insert_with(|| Actor {
                id,
                name: name.clone(),
                major,
                minor,
                checksum: checksum.clone(),
                dictionary: None,
            });
            if (major, minor) >= (entry.major, entry.minor) {
                entry.id = id;
                entry.major = major;
                entry.minor = minor;
                entry.checksum = checksum;
            }
        }
    }

    /// Attaches an actor by name, loading its dictionary and reconciling
    /// against any existing `actors` row. If `dictionary_required` and no
    /// dictionary is available, returns an error; otherwise the actor is
    /// usable read-only and every incoming keyword for it counts as a
    /// `key_errors` increment.
    pub async fn attach(
        &mut self,
        name: &str,
        dictionary_required: bool,
        provider: &dyn DictionaryProvider,
        pool: &WorkerPool,
    ) -> ArchiverResult<Actor> {
        let lower = name.to_lowercase();
        if let Some(actor) = self.by_name.get(&lower) {
            if actor.dictionary.is_some() || !dictionary_required {
                return Ok(actor.clone());
            }
        }

        let dict = provider.load(&lower);
        if dict.is_none() && dictionary_required {
            return Err(ArchiverError::actor(format!("no dictionary available for actor {name}")));
        }

        let existing = self.by_name.get(&lower).cloned();
        let actor = match (&dict, &existing) {
            (Some(d), Some(existing)) => {
                if (d.major, d.minor) == (existing.major, existing.minor) {
                    if d.checksum == existing.checksum {
                        Actor {
                            dictionary: dict,
                            ..existing.clone()
                        }
                    } else {
                        return Err(ArchiverError::actor(format!(
                            "dictionary for {name} has changed without a version update"
                        )));
                    }
                } else if (d.major, d.minor) > (existing.major, existing.minor) {
                    let id = self.next_id;
                    self.next_id += 1;
                    let new_actor = Actor {
                        id,
                        name: name.to_string(),
                        major: d.major,
                        minor: d.minor,
                        checksum: d.checksum.clone(),
                        dictionary: dict,
                    };
                    Self::insert_row(pool, &new_actor).await?;
                    new_actor
                } else {
                    return Err(ArchiverError::actor(format!("found old dictionary for {name}")));
                }
            }
            (Some(d), None) => {
                let id = self.next_id;
                self.next_id += 1;
                let new_actor = Actor {
                    id,
                    name: name.to_string(),
                    major: d.major,
                    minor: d.minor,
                    checksum: d.checksum.clone(),
                    dictionary: dict,
                };
                Self::insert_row(pool, &new_actor).await?;
                new_actor
            }
            (None, Some(existing)) => existing.clone(),
            (None, None) => {
                let id = self.next_id;
                self.next_id += 1;
                let new_actor = Actor {
                    id,
                    name: name.to_string(),
                    major: 0,
                    minor: 0,
                    checksum: String::new(),
                    dictionary: None,
                };
                Self::insert_row(pool, &new_actor).await?;
                new_actor
            }
        };

        self.by_name.insert(lower, actor.clone());
        Ok(actor)
    }

    async fn insert_row(pool: &WorkerPool, actor: &Actor) -> ArchiverResult<()> {
        pool.insert_row(
            "actors".to_string(),
            vec!["id".into(), "name".into(), "major".into(), "minor".into(), "checksum".into()],
            vec![
                actor.id.to_string(),
                crate::backend::quote_literal(&actor.name),
                actor.major.to_string(),
                actor.minor.to_string(),
                crate::backend::quote_literal(&actor.checksum),
            ],
        )
        .await?;
        Ok(())
    }

    pub fn all_names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider(HashMap<String, ActorDictionary>);
    impl DictionaryProvider for FakeProvider {
        fn load(&self, actor_name: &str) -> Option<ActorDictionary> {
            self.0.get(actor_name).cloned()
        }
    }

    fn dict(major: i32, minor: i32, checksum: &str) -> ActorDictionary {
        ActorDictionary {
            major,
            minor,
            checksum: checksum.to_string(),
            keywords: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn same_version_same_checksum_reuses_id() {
        let mut provider_map = HashMap::new();
        provider_map.insert("tcc".to_string(), dict(1, 0, "abc"));
        let provider = FakeProvider(provider_map);
        let pool = WorkerPool::connect(&crate::config::Config::for_test()).unwrap();

        let mut registry = ActorRegistry::new(0);
        let a1 = registry.attach("tcc", true, &provider, &pool).await.unwrap();
        let a2 = registry.attach("tcc", true, &provider, &pool).await.unwrap();
        assert_eq!(a1.id, a2.id);
    }

    #[tokio::test]
    async fn same_version_different_checksum_is_fatal() {
        let mut first = HashMap::new();
        first.insert("tcc".to_string(), dict(1, 0, "abc"));
        let provider1 = FakeProvider(first);
        let pool = WorkerPool::connect(&crate::config::Config::for_test()).unwrap();
        let mut registry = ActorRegistry::new(0);
        registry.attach("tcc", true, &provider1, &pool).await.unwrap();

        let mut second = HashMap::new();
        second.insert("tcc".to_string(), dict(1, 0, "xyz"));
        let provider2 = FakeProvider(second);
        let result = registry.attach("tcc", true, &provider2, &pool).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn older_version_is_fatal() {
        let mut first = HashMap::new();
        first.insert("tcc".to_string(), dict(2, 0, "abc"));
        let provider1 = FakeProvider(first);
        let pool = WorkerPool::connect(&crate::config::Config::for_test()).unwrap();
        let mut registry = ActorRegistry::new(0);
        registry.attach("tcc", true, &provider1, &pool).await.unwrap();

        let mut second = HashMap::new();
        second.insert("tcc".to_string(), dict(1, 9, "abc"));
        let provider2 = FakeProvider(second);
        let result = registry.attach("tcc", true, &provider2, &pool).await;
        assert!(result.is_err());
    }
}
