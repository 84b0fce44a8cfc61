use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::object_id::ObjectId;
use super::pipeline::{self, Collections, Vars};
use super::value::{oid_value, values_equal};
use super::{Document, DocumentStore};
use crate::error::{AppError, AppResult};
use crate::filter::Stage;
use crate::tprintln;

/// In-memory datasource. Cheap to clone; clones share the same collections.
#[derive(Clone, Default)]
pub struct MemoryStore {
    name: String,
    collections: Arc<RwLock<Collections>>,
    pipelines_run: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    /// Seed a collection, assigning `_id` where missing. Returns the ids in input order.
    pub fn seed(&self, collection: &str, docs: Vec<Document>) -> Vec<Value> {
        let mut ids = Vec::with_capacity(docs.len());
        let mut w = self.collections.write();
        let coll = w.entry(collection.to_string()).or_default();
        for mut d in docs {
            let id = d.get("_id").cloned().unwrap_or_else(|| oid_value(&ObjectId::new().to_hex()));
            d.insert("_id".to_string(), id.clone());
            ids.push(id);
            coll.push(d);
        }
        ids
    }

    /// Load `{collection: [docs]}` fixtures.
    pub fn seed_all(&self, fixtures: HashMap<String, Vec<Document>>) {
        for (coll, docs) in fixtures { self.seed(&coll, docs); }
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool { self.len(collection) == 0 }

    /// Number of `execute_pipeline` calls served; lets tests observe cache hits.
    pub fn pipelines_run(&self) -> u64 { self.pipelines_run.load(Ordering::Relaxed) }

    /// Simulate an unreachable datasource.
    pub fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::Relaxed); }

    fn check_online(&self) -> AppResult<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(AppError::io("store_unavailable".to_string(), format!("datasource '{}' is unreachable", self.name)));
        }
        Ok(())
    }
}

fn same_id(doc: &Document, id: &Value) -> bool {
    doc.get("_id").map(|v| values_equal(v, id)).unwrap_or(false)
}

impl DocumentStore for MemoryStore {
    fn execute_pipeline(&self, collection: &str, stages: &[Stage]) -> AppResult<Vec<Document>> {
        self.check_online()?;
        self.pipelines_run.fetch_add(1, Ordering::Relaxed);
        let db = self.collections.read();
        let input = db.get(collection).cloned().unwrap_or_default();
        tprintln!("memory.pipeline store={} coll={} stages={} rows_in={}", self.name, collection, stages.len(), input.len());
        let out = pipeline::run(stages, input, &db, &Vars::new())?;
        debug!(target: "docweave::store", "pipeline on {}.{} returned {} rows", self.name, collection, out.len());
        Ok(out)
    }

    fn find_by_id(&self, collection: &str, id: &Value) -> AppResult<Option<Document>> {
        self.check_online()?;
        Ok(self.collections.read().get(collection).and_then(|c| c.iter().find(|d| same_id(d, id)).cloned()))
    }

    fn insert(&self, collection: &str, doc: Document) -> AppResult<Value> {
        self.check_online()?;
        let mut w = self.collections.write();
        let coll = w.entry(collection.to_string()).or_default();
        if let Some(id) = doc.get("_id") {
            if coll.iter().any(|d| same_id(d, id)) {
                return Err(AppError::conflict("duplicate_id".to_string(), format!("{} already holds _id {}", collection, id)));
            }
        }
        let mut doc = doc;
        let id = doc.get("_id").cloned().unwrap_or_else(|| oid_value(&ObjectId::new().to_hex()));
        doc.insert("_id".to_string(), id.clone());
        coll.push(doc);
        Ok(id)
    }

    fn update_by_id(&self, collection: &str, id: &Value, patch: Document) -> AppResult<u64> {
        self.check_online()?;
        let mut w = self.collections.write();
        let Some(coll) = w.get_mut(collection) else { return Ok(0) };
        let Some(target) = coll.iter_mut().find(|d| same_id(d, id)) else { return Ok(0) };
        for (k, v) in patch {
            if k == "_id" { continue; }
            target.insert(k, v);
        }
        Ok(1)
    }

    fn delete_by_id(&self, collection: &str, id: &Value) -> AppResult<u64> {
        self.check_online()?;
        let mut w = self.collections.write();
        let Some(coll) = w.get_mut(collection) else { return Ok(0) };
        let before = coll.len();
        coll.retain(|d| !same_id(d, id));
        Ok((before - coll.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document { v.as_object().cloned().unwrap() }

    #[test]
    fn crud_roundtrip() {
        let s = MemoryStore::new("mem");
        let id = s.insert("Note", doc(json!({"title": "a"}))).unwrap();
        assert!(s.find_by_id("Note", &id).unwrap().is_some());
        assert_eq!(s.update_by_id("Note", &id, doc(json!({"title": "b"}))).unwrap(), 1);
        assert_eq!(s.find_by_id("Note", &id).unwrap().unwrap()["title"], json!("b"));
        assert_eq!(s.delete_by_id("Note", &id).unwrap(), 1);
        assert_eq!(s.delete_by_id("Note", &id).unwrap(), 0);
        assert_eq!(s.update_by_id("Note", &id, Document::new()).unwrap(), 0);
    }

    #[test]
    fn duplicate_ids_conflict() {
        let s = MemoryStore::new("mem");
        s.insert("A", doc(json!({"_id": "x"}))).unwrap();
        assert!(matches!(s.insert("A", doc(json!({"_id": "x"}))), Err(AppError::Conflict { .. })));
    }

    #[test]
    fn offline_store_is_infrastructure_error() {
        let s = MemoryStore::new("mem");
        s.set_offline(true);
        assert!(matches!(s.execute_pipeline("A", &[]), Err(AppError::Io { .. })));
    }

    #[test]
    fn empty_pipeline_returns_everything() {
        let s = MemoryStore::new("mem");
        s.seed("A", vec![doc(json!({"v": 1})), doc(json!({"v": 2}))]);
        assert_eq!(s.execute_pipeline("A", &[]).unwrap().len(), 2);
        assert_eq!(s.pipelines_run(), 1);
    }
}
