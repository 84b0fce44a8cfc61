//! Typed aggregation pipeline stages.
//!
//! The compiler emits `Stage` values; stores either execute them directly (see `MemoryStore`)
//! or render them with `to_json` for a native driver.

use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Correlated sub-query joining `from` into each input row under `as_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: String,
    /// (variable name, local field path) pairs bound for the sub-pipeline.
    pub let_vars: Vec<(String, String)>,
    pub pipeline: Vec<Stage>,
    pub as_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Map<String, Value>),
    Sort(Vec<(String, SortDirection)>),
    Skip(u64),
    Limit(u64),
    Lookup(Lookup),
    Unwind { path: String, preserve_null_and_empty: bool },
    Project(Map<String, Value>),
    Count(String),
    /// Caller-supplied stage passed through untouched.
    Raw(Value),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Lookup(_) => "$lookup",
            Stage::Unwind { .. } => "$unwind",
            Stage::Project(_) => "$project",
            Stage::Count(_) => "$count",
            Stage::Raw(_) => "raw",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Stage::Match(m) => json!({ "$match": m }),
            Stage::Sort(keys) => {
                let mut m = Map::new();
                for (k, d) in keys { m.insert(k.clone(), json!(d.as_i32())); }
                json!({ "$sort": m })
            }
            Stage::Skip(n) => json!({ "$skip": n }),
            Stage::Limit(n) => json!({ "$limit": n }),
            Stage::Lookup(l) => {
                let mut lets = Map::new();
                for (var, field) in &l.let_vars { lets.insert(var.clone(), json!(format!("${}", field))); }
                let pipeline: Vec<Value> = l.pipeline.iter().map(|s| s.to_json()).collect();
                json!({ "$lookup": { "from": l.from, "let": lets, "pipeline": pipeline, "as": l.as_field } })
            }
            Stage::Unwind { path, preserve_null_and_empty } => json!({
                "$unwind": { "path": format!("${}", path), "preserveNullAndEmptyArrays": preserve_null_and_empty }
            }),
            Stage::Project(p) => json!({ "$project": p }),
            Stage::Count(field) => json!({ "$count": field }),
            Stage::Raw(v) => v.clone(),
        }
    }

    /// Parse a single-key JSON stage. Unknown operators stay `Raw`.
    pub fn from_json(v: &Value) -> AppResult<Stage> {
        let obj = v.as_object().filter(|m| m.len() == 1).ok_or_else(|| {
            AppError::user("invalid_stage".to_string(), format!("pipeline stage must be a single-key object: {}", v))
        })?;
        let (op, body) = match obj.iter().next() {
            Some(pair) => pair,
            None => return Err(AppError::user("invalid_stage", "empty pipeline stage")),
        };
        let bad = |what: &str| AppError::user("invalid_stage".to_string(), format!("{} expects {}", op, what));
        let stage = match op.as_str() {
            "$match" => Stage::Match(body.as_object().cloned().ok_or_else(|| bad("an object"))?),
            "$project" => Stage::Project(body.as_object().cloned().ok_or_else(|| bad("an object"))?),
            "$skip" => Stage::Skip(body.as_u64().ok_or_else(|| bad("a non-negative integer"))?),
            "$limit" => Stage::Limit(body.as_u64().ok_or_else(|| bad("a non-negative integer"))?),
            "$count" => Stage::Count(body.as_str().ok_or_else(|| bad("a field name"))?.to_string()),
            "$sort" => {
                let m = body.as_object().ok_or_else(|| bad("an object"))?;
                let mut keys = Vec::with_capacity(m.len());
                for (k, d) in m {
                    let dir = match d.as_i64() {
                        Some(1) => SortDirection::Asc,
                        Some(-1) => SortDirection::Desc,
                        _ => return Err(bad("1 or -1 per key")),
                    };
                    keys.push((k.clone(), dir));
                }
                Stage::Sort(keys)
            }
            "$unwind" => match body {
                Value::String(p) => Stage::Unwind { path: p.trim_start_matches('$').to_string(), preserve_null_and_empty: false },
                Value::Object(m) => {
                    let path = m.get("path").and_then(|p| p.as_str()).ok_or_else(|| bad("a path"))?;
                    let keep = m.get("preserveNullAndEmptyArrays").and_then(|b| b.as_bool()).unwrap_or(false);
                    Stage::Unwind { path: path.trim_start_matches('$').to_string(), preserve_null_and_empty: keep }
                }
                _ => return Err(bad("a path or object")),
            },
            _ => Stage::Raw(v.clone()),
        };
        Ok(stage)
    }
}
