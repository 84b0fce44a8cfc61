use std::collections::HashMap as StdHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::debug;

use super::CacheStore;
use crate::error::AppResult;

#[derive(Clone)]
struct Entry {
    value: JsonValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool { self.expires_at.map(|exp| now < exp).unwrap_or(true) }
}

/// A named in-memory JSON cache with per-key TTL. Expired keys are dropped on read.
#[derive(Clone)]
pub struct KvStore {
    name: String,
    map: Arc<parking_lot::RwLock<StdHashMap<String, Entry>>>,
}

impl KvStore {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), map: Arc::new(parking_lot::RwLock::new(StdHashMap::new())) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
    pub fn keys(&self) -> Vec<String> { self.map.read().keys().cloned().collect() }

    fn put(&self, key: &str, value: JsonValue, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.map.write().insert(key.to_string(), Entry { value, expires_at });
    }
}

impl CacheStore for KvStore {
    fn get(&self, key: &str) -> AppResult<Option<JsonValue>> {
        let now = Instant::now();
        {
            let r = self.map.read();
            match r.get(key) {
                None => return Ok(None),
                Some(ent) if ent.live(now) => return Ok(Some(ent.value.clone())),
                Some(_) => {}
            }
        }
        let mut w = self.map.write();
        if w.get(key).map(|e| !e.live(now)).unwrap_or(false) {
            w.remove(key);
            debug!(target: "docweave::cache", "{}: {} expired", self.name, key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: JsonValue) -> AppResult<()> {
        self.put(key, value, None);
        Ok(())
    }

    fn set_with_ttl(&self, key: &str, value: JsonValue, ttl: Duration) -> AppResult<()> {
        self.put(key, value, Some(ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<bool> { Ok(self.map.write().remove(key).is_some()) }
}
