use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::CacheStore;
use crate::error::AppResult;
use crate::schema::ModelSchema;
use crate::store::value::id_string;
use crate::store::Document;

/// Canonical cache key for "documents of `model` whose `prop` equals `value`".
pub fn cache_key(model: &str, prop: &str, value: &Value) -> String {
    let v = id_string(value).unwrap_or_else(|| value.to_string());
    format!("{}|{}={}", model, prop, v)
}

/// Request-scoped relation result cache. Lives for one resolution call tree; misses fall
/// through to the external store named by the related model's cache policy.
#[derive(Default)]
pub struct RelationCache {
    local: HashMap<String, Value>,
    local_hits: u64,
    external_hits: u64,
}

impl RelationCache {
    pub fn new() -> Self { Self::default() }

    pub fn get(&mut self, key: &str, external: Option<&dyn CacheStore>) -> AppResult<Option<Value>> {
        if let Some(v) = self.local.get(key) {
            self.local_hits += 1;
            debug!(target: "docweave::cache", "local hit {}", key);
            return Ok(Some(v.clone()));
        }
        let Some(ext) = external else { return Ok(None) };
        match ext.get(key)? {
            Some(v) => {
                self.external_hits += 1;
                debug!(target: "docweave::cache", "external hit {}", key);
                self.local.insert(key.to_string(), v.clone());
                Ok(Some(v))
            }
            None => {
                debug!(target: "docweave::cache", "miss {}", key);
                Ok(None)
            }
        }
    }

    pub fn put(&mut self, key: &str, value: Value, external: Option<&dyn CacheStore>, ttl: Duration) -> AppResult<()> {
        if let Some(ext) = external {
            ext.set_with_ttl(key, value.clone(), ttl)?;
        }
        self.local.insert(key.to_string(), value);
        Ok(())
    }

    pub fn local_hits(&self) -> u64 { self.local_hits }
    pub fn external_hits(&self) -> u64 { self.external_hits }
    pub fn len(&self) -> usize { self.local.len() }
    pub fn is_empty(&self) -> bool { self.local.is_empty() }
}

/// Delete external entries that a write to `doc` may have made stale. Only single-field key
/// groups produce keys, so only those are evicted.
pub fn invalidate(external: &dyn CacheStore, model: &ModelSchema, doc: &Document) -> AppResult<usize> {
    let Some(policy) = model.cache.as_ref() else { return Ok(0) };
    let mut removed = 0;
    for group in policy.key_groups.iter().filter(|g| g.len() == 1) {
        let field = &group[0];
        let Some(v) = doc.get(field) else { continue };
        if external.delete(&cache_key(&model.name, field, v))? { removed += 1; }
    }
    if removed > 0 {
        debug!(target: "docweave::cache", "invalidated {} {} entries", removed, model.name);
    }
    Ok(removed)
}
