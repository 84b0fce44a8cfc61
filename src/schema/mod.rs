//!
//! docweave schema module
//! ----------------------
//! Static model schemas, loaded once at startup: properties, relations, hidden fields, the
//! access-policy block and the relation cache policy. `SchemaRegistry` owns the fixed-up
//! schemas behind `Arc` so every request shares them without copying.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::store::Document;

pub mod registry;
pub mod relation;

pub use registry::SchemaRegistry;
pub use relation::{conventional_foreign_key, lower_camel, Relation, RelationKind, RelationOptions};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Date,
    #[serde(alias = "objectId")]
    ObjectId,
    Object,
    Array,
    #[default]
    Any,
}

impl PropertyType {
    pub fn accepts(self, v: &Value) -> bool {
        if v.is_null() { return true; }
        match self {
            PropertyType::String => v.is_string(),
            PropertyType::Number => v.is_number(),
            PropertyType::Boolean => v.is_boolean(),
            PropertyType::Array => v.is_array(),
            PropertyType::Object => v.is_object(),
            PropertyType::Date | PropertyType::ObjectId | PropertyType::Any => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    #[serde(rename = "type", default)]
    pub kind: PropertyType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Relation result caching for documents of this model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    /// Name of the registered cache store.
    pub datasource_name: String,
    /// Seconds; engine default when absent.
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Each group is a set of properties that together identify a cached lookup.
    #[serde(default)]
    pub key_groups: Vec<Vec<String>>,
}

impl CachePolicy {
    /// A lookup on `field` alone is cacheable when some key group is exactly that field.
    pub fn covers(&self, field: &str) -> bool {
        self.key_groups.iter().any(|g| g.len() == 1 && g[0] == field)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    /// Storage collection; defaults to the model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Base type (`User`, `App`, ...). Defaults to the model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default)]
    pub datasource: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
    #[serde(default)]
    pub relations: BTreeMap<String, Relation>,
    #[serde(default)]
    pub hidden: Vec<String>,
    /// Policy lines: `subject,object,action,effect[,priority]`.
    #[serde(default)]
    pub acls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
}

impl ModelSchema {
    pub fn new(name: &str) -> Self {
        ModelSchema {
            name: name.to_string(),
            plural: None,
            collection: None,
            base: None,
            datasource: String::new(),
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
            hidden: Vec::new(),
            acls: Vec::new(),
            cache: None,
        }
    }

    pub fn collection_name(&self) -> &str { self.collection.as_deref().unwrap_or(&self.name) }

    pub fn plural_name(&self) -> String {
        self.plural.clone().unwrap_or_else(|| format!("{}s", lower_camel(&self.name)))
    }

    pub fn base_type(&self) -> &str { self.base.as_deref().unwrap_or(&self.name) }

    pub fn relation(&self, name: &str) -> Option<&Relation> { self.relations.get(name) }

    pub fn is_relation(&self, key: &str) -> bool { self.relations.contains_key(key) }

    pub fn has_hidden(&self) -> bool { !self.hidden.is_empty() }

    pub fn is_hidden(&self, field: &str) -> bool { self.hidden.iter().any(|h| h == field) }

    /// Remove hidden properties from a raw document.
    pub fn strip_hidden(&self, doc: &mut Document) {
        for h in &self.hidden { doc.remove(h); }
    }

    /// Drop relation-named keys; relations are never persisted as embedded documents.
    pub fn strip_relations(&self, doc: &mut Document) -> Vec<String> {
        let mut dropped = Vec::new();
        for name in self.relations.keys() {
            if doc.remove(name).is_some() { dropped.push(name.clone()); }
        }
        dropped
    }

    /// Fill declared defaults and reject missing required or mistyped properties.
    pub fn apply_defaults(&self, doc: &mut Document) -> AppResult<()> {
        for (name, def) in &self.properties {
            if !doc.contains_key(name) {
                if let Some(d) = &def.default { doc.insert(name.clone(), d.clone()); }
            }
            match doc.get(name) {
                None | Some(Value::Null) if def.required => {
                    return Err(AppError::user("missing_property".to_string(), format!("{}.{} is required", self.name, name)));
                }
                Some(v) if !def.kind.accepts(v) => {
                    return Err(AppError::user("invalid_property".to_string(), format!("{}.{} expects {:?}", self.name, name, def.kind)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note() -> ModelSchema {
        serde_json::from_value(json!({
            "name": "Note",
            "properties": {
                "title": {"type": "string", "required": true},
                "pinned": {"type": "boolean", "default": false}
            },
            "relations": {"owner": {"type": "belongsTo", "model": "User"}},
            "hidden": ["secret"]
        })).unwrap()
    }

    #[test]
    fn defaults_and_required() {
        let m = note();
        let mut doc = json!({"title": "t"}).as_object().cloned().unwrap();
        m.apply_defaults(&mut doc).unwrap();
        assert_eq!(doc["pinned"], json!(false));

        let mut missing = Document::new();
        let err = m.apply_defaults(&mut missing).unwrap_err();
        assert!(err.is_user_input());

        let mut wrong = json!({"title": 3}).as_object().cloned().unwrap();
        assert!(m.apply_defaults(&mut wrong).is_err());
    }

    #[test]
    fn strips_relations_and_hidden() {
        let m = note();
        let mut doc = json!({"title": "t", "owner": {"_id": "u"}, "secret": 1}).as_object().cloned().unwrap();
        assert_eq!(m.strip_relations(&mut doc), vec!["owner".to_string()]);
        m.strip_hidden(&mut doc);
        assert_eq!(Value::Object(doc), json!({"title": "t"}));
    }

    #[test]
    fn names_default_sensibly() {
        let m = note();
        assert_eq!(m.collection_name(), "Note");
        assert_eq!(m.plural_name(), "notes");
        assert_eq!(m.base_type(), "Note");
    }

    #[test]
    fn cache_policy_covers_single_field_groups() {
        let p = CachePolicy { datasource_name: "redis".into(), ttl: None, key_groups: vec![vec!["_id".into()], vec!["a".into(), "b".into()]] };
        assert!(p.covers("_id"));
        assert!(!p.covers("a"));
    }
}
