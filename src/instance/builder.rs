use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::hooks::{EventContext, HookRegistry, LOADED};
use super::{Instance, RelationValue};
use crate::auth::Bearer;
use crate::error::AppResult;
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::store::value::id_string;
use crate::store::Document;

/// Builds instance graphs for one request. Documents seen twice (same model and id) are built
/// once, so `loaded` fires once per distinct document.
pub struct InstanceBuilder<'a> {
    registry: &'a SchemaRegistry,
    hooks: &'a HookRegistry,
    bearer: Option<&'a Bearer>,
    built: HashMap<String, Arc<Instance>>,
}

impl<'a> InstanceBuilder<'a> {
    pub fn new(registry: &'a SchemaRegistry, hooks: &'a HookRegistry, bearer: Option<&'a Bearer>) -> Self {
        InstanceBuilder { registry, hooks, bearer, built: HashMap::new() }
    }

    pub fn built_count(&self) -> usize { self.built.len() }

    pub fn build(&mut self, model: &Arc<ModelSchema>, raw: Document) -> AppResult<Arc<Instance>> {
        self.cached_or_build(model, raw)
    }

    /// Build without consulting or filling the cache. Used for the write paths where the
    /// caller needs a uniquely owned instance.
    pub fn build_owned(&mut self, model: &Arc<ModelSchema>, mut raw: Document) -> AppResult<Instance> {
        normalize_id(&mut raw);
        let id = raw.get("_id").and_then(id_string).unwrap_or_default();

        let mut relations = BTreeMap::new();
        for (name, rel) in &model.relations {
            let Some(value) = raw.remove(name) else { continue };
            let Some(target) = self.registry.get(&rel.model).cloned() else {
                warn!(target: "docweave::instance", "{}.{} targets unregistered model {}; dropped", model.name, name, rel.model);
                continue;
            };
            let built = self.build_value(&target, value)?;
            relations.insert(name.clone(), shape(built, rel.kind.is_singular()));
        }

        let mut ctx = EventContext::new(&model.name, LOADED, self.bearer).with_data(raw);
        if !id.is_empty() { ctx = ctx.with_instance_id(&id); }
        self.hooks.dispatch(&mut ctx)?;
        Ok(Instance::new(model.clone(), id, ctx.data, relations))
    }

    fn cached_or_build(&mut self, model: &Arc<ModelSchema>, raw: Document) -> AppResult<Arc<Instance>> {
        let key = raw.get("_id").or_else(|| raw.get("id")).and_then(id_string).map(|id| format!("{}:{}", model.name, id));
        if let Some(hit) = key.as_ref().and_then(|k| self.built.get(k)) {
            return Ok(hit.clone());
        }
        let inst = Arc::new(self.build_owned(model, raw)?);
        if let Some(k) = key { self.built.insert(k, inst.clone()); }
        Ok(inst)
    }

    /// Embedded relation data arrives as an object, an array of objects or an array of arrays.
    fn build_value(&mut self, target: &Arc<ModelSchema>, value: Value) -> AppResult<Vec<Arc<Instance>>> {
        let mut out = Vec::new();
        match value {
            Value::Object(m) => out.push(self.cached_or_build(target, m)?),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(m) => out.push(self.cached_or_build(target, m)?),
                        Value::Array(inner) => {
                            for v in inner {
                                if let Value::Object(m) = v { out.push(self.cached_or_build(target, m)?); }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(out)
    }
}

fn shape(mut built: Vec<Arc<Instance>>, singular: bool) -> RelationValue {
    if singular {
        return if built.is_empty() { RelationValue::None } else { RelationValue::One(built.swap_remove(0)) };
    }
    RelationValue::Many(built)
}

/// Accept `id` as an alias of the primary key.
fn normalize_id(raw: &mut Document) {
    if !raw.contains_key("_id") {
        if let Some(id) = raw.remove("id") { raw.insert("_id".to_string(), id); }
    }
}
