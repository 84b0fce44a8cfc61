//! Filter -> pipeline compilation.
//!
//! Stage order: match, caller aggregation stages, sort, skip, limit, then one correlated lookup
//! (plus a null-preserving unwind for singular relations) per same-store include. Includes that
//! cross a datasource boundary or go through an intermediate model are left to the merge engine.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::convert::WhereConverter;
use super::stage::{Lookup, SortDirection, Stage};
use super::{Filter, IncludeItem};
use crate::error::{AppError, AppResult};
use crate::schema::{ModelSchema, SchemaRegistry};

pub struct FilterCompiler<'a> {
    registry: &'a SchemaRegistry,
    disable_type_conversions: bool,
    now: DateTime<Utc>,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(registry: &'a SchemaRegistry, disable_type_conversions: bool) -> Self {
        Self { registry, disable_type_conversions, now: Utc::now() }
    }

    /// Pin the instant relative-time tokens are evaluated against.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// `None` filter compiles to `None` (no constraints); any filter compiles to a stage list.
    pub fn compile(&self, model: &ModelSchema, filter: Option<&Filter>) -> AppResult<Option<Vec<Stage>>> {
        let Some(f) = filter else { return Ok(None) };
        let mut stages = Vec::new();
        if let Some(w) = f.where_.as_ref().filter(|w| !w.is_empty()) {
            stages.push(Stage::Match(self.convert_where(w)));
        }
        for raw in &f.aggregation_stages {
            stages.push(Stage::from_json(raw)?);
        }
        if !f.order.is_empty() {
            stages.push(Stage::Sort(parse_order(&f.order)?));
        }
        if f.skip > 0 { stages.push(Stage::Skip(f.skip as u64)); }
        if f.limit > 0 { stages.push(Stage::Limit(f.limit as u64)); }
        for inc in &f.include {
            self.compile_include(model, inc, &mut stages)?;
        }
        Ok(Some(stages))
    }

    pub fn convert_where(&self, w: &Map<String, Value>) -> Map<String, Value> {
        if self.disable_type_conversions { return w.clone(); }
        WhereConverter::new(self.now).convert(w)
    }

    fn compile_include(&self, model: &ModelSchema, inc: &IncludeItem, stages: &mut Vec<Stage>) -> AppResult<()> {
        let rel = model.relation(&inc.relation).ok_or_else(|| {
            AppError::user("unknown_relation".to_string(), format!("{} has no relation named '{}'", model.name, inc.relation))
        })?;
        let Some(target) = self.registry.get(&rel.model) else {
            debug!(target: "docweave::filter", "include {}.{} targets unregistered model; deferred", model.name, rel.name);
            return Ok(());
        };
        if rel.kind.is_through() || target.datasource != model.datasource {
            debug!(target: "docweave::filter", "include {}.{} resolves outside the pipeline ({} -> {})", model.name, rel.name, model.datasource, target.datasource);
            return Ok(());
        }

        let var = rel.foreign_key.clone();
        let mut pipeline = vec![Stage::Match(correlation_match(rel.remote_field(), &var))];
        if target.has_hidden() {
            let mut proj = Map::new();
            for h in &target.hidden { proj.insert(h.clone(), json!(0)); }
            pipeline.push(Stage::Project(proj));
        }
        if let Some(scope) = inc.scope.as_deref() {
            if let Some(nested) = self.compile(target, Some(scope))? {
                pipeline.extend(nested);
            }
        }
        stages.push(Stage::Lookup(Lookup {
            from: target.collection_name().to_string(),
            let_vars: vec![(var, rel.local_field().to_string())],
            pipeline,
            as_field: rel.name.clone(),
        }));
        if rel.kind.is_singular() {
            stages.push(Stage::Unwind { path: rel.name.clone(), preserve_null_and_empty: true });
        }
        Ok(())
    }
}

fn correlation_match(remote_field: &str, var: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("$expr".to_string(), json!({ "$eq": [format!("${}", remote_field), format!("$${}", var)] }));
    m
}

/// Parse `"<field> <ASC|DESC>"` entries. A bare field sorts ascending.
pub fn parse_order(entries: &[String]) -> AppResult<Vec<(String, SortDirection)>> {
    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        let parts: Vec<&str> = entry.split_whitespace().collect();
        let (field, dir) = match parts.as_slice() {
            [field] => (*field, SortDirection::Asc),
            [field, dir] => {
                let d = match dir.to_ascii_uppercase().as_str() {
                    "ASC" => SortDirection::Asc,
                    "DESC" => SortDirection::Desc,
                    _ => {
                        return Err(AppError::user("invalid_order".to_string(), format!("unknown sort direction '{}' in '{}'", dir, entry)));
                    }
                };
                (*field, d)
            }
            _ => return Err(AppError::user("invalid_order".to_string(), format!("malformed order entry '{}'", entry))),
        };
        keys.push((field.to_string(), dir));
    }
    Ok(keys)
}

/// Convenience wrapper over `FilterCompiler` evaluated at the current instant.
pub fn compile(
    registry: &SchemaRegistry,
    model: &ModelSchema,
    filter: Option<&Filter>,
    disable_type_conversions: bool,
) -> AppResult<Option<Vec<Stage>>> {
    FilterCompiler::new(registry, disable_type_conversions).compile(model, filter)
}
