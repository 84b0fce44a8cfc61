//!
//! docweave instance module
//! ------------------------
//! Materialized documents. An `Instance` owns its raw data and its resolved relations; the
//! builder turns raw store documents (with embedded relation data) into instance graphs and
//! fires the `loaded` hook once per distinct document.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::schema::ModelSchema;
use crate::store::Document;

pub mod builder;
pub mod hooks;

pub use builder::InstanceBuilder;
pub use hooks::{ops, operation_event, EventContext, Handler, HookRegistry, SaveOverride, LOADED};

/// Resolved value of one relation, shaped by the relation's cardinality.
#[derive(Debug, Clone, Default)]
pub enum RelationValue {
    #[default]
    None,
    One(Arc<Instance>),
    Many(Vec<Arc<Instance>>),
}

impl RelationValue {
    pub fn to_json(&self) -> Value {
        match self {
            RelationValue::None => Value::Null,
            RelationValue::One(i) => Value::Object(i.to_json()),
            RelationValue::Many(v) => Value::Array(v.iter().map(|i| Value::Object(i.to_json())).collect()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationValue::None => 0,
            RelationValue::One(_) => 1,
            RelationValue::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[derive(Debug, Clone)]
pub struct Instance {
    id: String,
    data: Document,
    relations: BTreeMap<String, RelationValue>,
    model: Arc<ModelSchema>,
    serialized: OnceCell<Vec<u8>>,
}

impl Instance {
    pub fn new(model: Arc<ModelSchema>, id: String, data: Document, relations: BTreeMap<String, RelationValue>) -> Self {
        Instance { id, data, relations, model, serialized: OnceCell::new() }
    }

    pub fn id(&self) -> &str { &self.id }

    pub fn model(&self) -> &Arc<ModelSchema> { &self.model }

    pub fn data(&self) -> &Document { &self.data }

    pub fn get(&self, field: &str) -> Option<&Value> { self.data.get(field) }

    /// `None` when the relation was not loaded; `Some(RelationValue::None)` when it resolved empty.
    pub fn relation(&self, name: &str) -> Option<&RelationValue> { self.relations.get(name) }

    pub fn relations(&self) -> &BTreeMap<String, RelationValue> { &self.relations }

    pub fn set_relation(&mut self, name: &str, value: RelationValue) {
        self.relations.insert(name.to_string(), value);
        self.serialized = OnceCell::new();
    }

    /// Replace the stored fields after a write. Loaded relations are kept.
    pub(crate) fn replace_data(&mut self, data: Document) {
        self.data = data;
        self.serialized = OnceCell::new();
    }

    /// Shallow copy of the fields with hidden properties removed and relations rendered.
    pub fn to_json(&self) -> Document {
        let mut out = self.data.clone();
        self.model.strip_hidden(&mut out);
        for (name, rel) in &self.relations {
            out.insert(name.clone(), rel.to_json());
        }
        out
    }

    /// Serialized `to_json()`, computed once per state.
    pub fn to_bytes(&self) -> AppResult<&[u8]> {
        let bytes = self
            .serialized
            .get_or_try_init(|| serde_json::to_vec(&self.to_json()))
            .map_err(|e| AppError::internal("serialize".to_string(), e.to_string()))?;
        Ok(bytes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model() -> Arc<ModelSchema> {
        let mut m = ModelSchema::new("User");
        m.hidden = vec!["password".into()];
        Arc::new(m)
    }

    fn doc(v: Value) -> Document { v.as_object().cloned().unwrap() }

    #[test]
    fn to_json_strips_hidden_and_renders_relations() {
        let m = model();
        let child = Arc::new(Instance::new(m.clone(), "c".into(), doc(json!({"_id": "c"})), BTreeMap::new()));
        let mut rels = BTreeMap::new();
        rels.insert("friends".to_string(), RelationValue::Many(vec![child]));
        rels.insert("manager".to_string(), RelationValue::None);
        let i = Instance::new(m, "u".into(), doc(json!({"_id": "u", "password": "x", "name": "n"})), rels);
        assert_eq!(Value::Object(i.to_json()), json!({"_id": "u", "name": "n", "friends": [{"_id": "c"}], "manager": null}));
        assert_eq!(i.relation("friends").map(|r| r.len()), Some(1));
        assert!(i.relation("other").is_none());
    }

    #[test]
    fn bytes_are_cached_until_mutation() {
        let mut i = Instance::new(model(), "u".into(), doc(json!({"_id": "u", "name": "a"})), BTreeMap::new());
        let first = i.to_bytes().unwrap().to_vec();
        assert_eq!(i.to_bytes().unwrap(), first.as_slice());
        i.replace_data(doc(json!({"_id": "u", "name": "b"})));
        let second: Value = serde_json::from_slice(i.to_bytes().unwrap()).unwrap();
        assert_eq!(second["name"], json!("b"));
    }
}
