//! Relation Merge Engine.
//!
//! Runs once per top-level include after the primary pipeline has executed. Same-store
//! relations are already embedded by the compiled lookup; this pass applies the relation's
//! get-action gate, resolves cross-store and through relations with secondary reads (optionally
//! cached), and recurses into nested scopes.
//!
//! The relation cache only ever holds raw related rows read without a narrowing scope. Nested
//! includes are resolved after every cache read, under the caller's own auth.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::embedded;
use crate::auth::{AuthContext, WILDCARD};
use crate::cache::relation::cache_key;
use crate::cache::{CacheStore, RelationCache};
use crate::engine::Engine;
use crate::error::{AppError, AppResult};
use crate::filter::{Filter, IncludeItem};
use crate::schema::{ModelSchema, Relation};
use crate::store::value::id_string;
use crate::store::Document;

/// Resolve `include` for every document in `docs`, in input order.
///
/// `depth` is 1 for the first level below the root and only feeds diagnostics.
pub fn merge_related(
    engine: &Engine,
    depth: usize,
    docs: &mut [Document],
    owner: &ModelSchema,
    include: &IncludeItem,
    auth: &AuthContext,
    cache: &mut RelationCache,
) -> AppResult<()> {
    merge_into(engine, depth, docs, owner, include, auth, cache, true)
}

/// `pipelined` is false for rows that did not come out of a compiled pipeline (cached rows, or
/// rows read by a secondary query); same-store relations then need a secondary read too.
#[allow(clippy::too_many_arguments)]
fn merge_into(
    engine: &Engine,
    depth: usize,
    docs: &mut [Document],
    owner: &ModelSchema,
    include: &IncludeItem,
    auth: &AuthContext,
    cache: &mut RelationCache,
    pipelined: bool,
) -> AppResult<()> {
    if docs.is_empty() { return Ok(()); }
    let rel = owner.relation(&include.relation).ok_or_else(|| {
        AppError::user("unknown_relation".to_string(), format!("{} has no relation named '{}'", owner.name, include.relation))
    })?;
    let Some(related) = engine.registry().get(&rel.model).cloned() else {
        warn!(target: "docweave::merge", "{}.{} targets unregistered model {}; treated as absent", owner.name, rel.name, rel.model);
        return Ok(());
    };
    debug!(target: "docweave::merge", "depth={} {}.{} over {} docs", depth, owner.name, rel.name, docs.len());

    if !rel.options.skip_auth && !gate(engine, docs, owner, rel, auth)? {
        for d in docs.iter_mut() { d.remove(&rel.name); }
        return Ok(());
    }

    if rel.kind.is_through() {
        for doc in docs.iter_mut() {
            let rows = load_through(engine, depth, doc, rel, &related, include, auth, cache)?;
            doc.insert(rel.name.clone(), shape_rows(rel, rows));
        }
    } else if related.datasource != owner.datasource || !pipelined {
        for doc in docs.iter_mut() {
            let rows = load_secondary(engine, depth, doc, rel, &related, include, auth, cache)?;
            doc.insert(rel.name.clone(), shape_rows(rel, rows));
        }
    } else if !include.nested_includes().is_empty() {
        for doc in docs.iter_mut() {
            let (mut embedded_docs, shape) = embedded::take(doc, &rel.name);
            for nested in include.nested_includes() {
                merge_related(engine, depth + 1, &mut embedded_docs, &related, nested, auth, cache)?;
            }
            embedded::restore(doc, &rel.name, embedded_docs, shape);
        }
    }
    Ok(())
}

/// Evaluate `__get__<relation>` once for the batch: against the document id when the batch is
/// a single document, against the wildcard otherwise. Denials (decided or raised) close the gate.
fn gate(engine: &Engine, docs: &[Document], owner: &ModelSchema, rel: &Relation, auth: &AuthContext) -> AppResult<bool> {
    let object = match docs {
        [only] => only.get("_id").and_then(id_string).unwrap_or_else(|| WILDCARD.to_string()),
        _ => WILDCARD.to_string(),
    };
    match engine.enforce_model(owner, auth.bearer.as_ref(), &object, &rel.get_action()) {
        Ok(true) => Ok(true),
        Ok(false) => {
            debug!(target: "docweave::merge", "{} hidden from {} ({}) request={}", rel.name, auth.subject(), object, auth.request_id);
            Ok(false)
        }
        Err(e) if e.is_auth_denied() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Rows of `related` whose remote field matches `doc`'s local field. Served from the relation
/// cache when the related model caches that field and the scope leaves the row set alone.
#[allow(clippy::too_many_arguments)]
fn load_secondary(
    engine: &Engine,
    depth: usize,
    doc: &Document,
    rel: &Relation,
    related: &Arc<ModelSchema>,
    include: &IncludeItem,
    auth: &AuthContext,
    cache: &mut RelationCache,
) -> AppResult<Vec<Value>> {
    let Some(value) = doc.get(rel.local_field()).filter(|v| !v.is_null()).cloned() else { return Ok(Vec::new()) };
    let key = cache_key(&related.name, rel.remote_field(), &value);
    let mut cond = Map::new();
    cond.insert(rel.remote_field().to_string(), value);

    let policy = related.cache.as_ref().filter(|p| p.covers(rel.remote_field()) && !include.scope_narrows_rows());
    let Some(policy) = policy else {
        return fetch(engine, depth, related, &scoped(include, cond), auth, cache);
    };
    let external: Arc<dyn CacheStore> = engine.cache_store(&policy.datasource_name)?.clone();

    let rows = match cache.get(&key, Some(&*external))? {
        Some(Value::Array(rows)) => rows,
        _ => {
            let rows = fetch(engine, depth, related, &Filter::with_where(cond), auth, cache)?;
            let ttl = Duration::from_secs(policy.ttl.unwrap_or(engine.config().default_cache_ttl_secs));
            cache.put(&key, Value::Array(rows.clone()), Some(&*external), ttl)?;
            rows
        }
    };
    attach_nested(engine, depth, rows, related, include, auth, cache)
}

/// Resolve the scope's nested includes over detached rows.
fn attach_nested(
    engine: &Engine,
    depth: usize,
    rows: Vec<Value>,
    related: &ModelSchema,
    include: &IncludeItem,
    auth: &AuthContext,
    cache: &mut RelationCache,
) -> AppResult<Vec<Value>> {
    if include.nested_includes().is_empty() { return Ok(rows); }
    let mut docs: Vec<Document> = rows
        .into_iter()
        .filter_map(|r| match r {
            Value::Object(m) => Some(m),
            _ => None,
        })
        .collect();
    for nested in include.nested_includes() {
        merge_into(engine, depth + 1, &mut docs, related, nested, auth, cache, false)?;
    }
    Ok(docs.into_iter().map(Value::Object).collect())
}

/// Join documents where `foreignKey == owner pk`, then related documents keyed by `keyThrough`.
#[allow(clippy::too_many_arguments)]
fn load_through(
    engine: &Engine,
    depth: usize,
    doc: &Document,
    rel: &Relation,
    related: &Arc<ModelSchema>,
    include: &IncludeItem,
    auth: &AuthContext,
    cache: &mut RelationCache,
) -> AppResult<Vec<Value>> {
    let Some(through_name) = rel.through.as_deref() else {
        warn!(target: "docweave::merge", "{} has no through model; treated as absent", rel.name);
        return Ok(Vec::new());
    };
    let Some(through) = engine.registry().get(through_name).cloned() else {
        warn!(target: "docweave::merge", "{} goes through unregistered model {}; treated as absent", rel.name, through_name);
        return Ok(Vec::new());
    };
    let Some(pk) = doc.get(&rel.primary_key).cloned() else { return Ok(Vec::new()) };
    let key_through = rel.key_through.as_deref().unwrap_or("");

    let mut join_cond = Map::new();
    join_cond.insert(rel.foreign_key.clone(), pk);
    let joins = engine.load_documents(depth, &through, Some(&Filter::with_where(join_cond)), auth, cache)?;
    let ids: Vec<Value> = joins.iter().filter_map(|j| j.get(key_through).cloned()).collect();
    if ids.is_empty() { return Ok(Vec::new()); }

    let mut cond = Map::new();
    cond.insert("_id".to_string(), json!({ "$in": ids }));
    fetch(engine, depth, related, &scoped(include, cond), auth, cache)
}

fn fetch(engine: &Engine, depth: usize, related: &ModelSchema, filter: &Filter, auth: &AuthContext, cache: &mut RelationCache) -> AppResult<Vec<Value>> {
    let rows = engine.load_documents(depth, related, Some(filter), auth, cache)?;
    Ok(rows
        .into_iter()
        .map(|mut d| {
            related.strip_hidden(&mut d);
            Value::Object(d)
        })
        .collect())
}

/// The include's scope with `cond` and-ed onto its where clause.
fn scoped(include: &IncludeItem, cond: Map<String, Value>) -> Filter {
    let mut f = include.scope.as_deref().cloned().unwrap_or_default();
    f.where_ = Some(match f.where_.take().filter(|w| !w.is_empty()) {
        Some(w) => {
            let mut m = Map::new();
            m.insert("$and".to_string(), json!([Value::Object(w), Value::Object(cond)]));
            m
        }
        None => cond,
    });
    f
}

fn shape_rows(rel: &Relation, rows: Vec<Value>) -> Value {
    if rel.kind.is_singular() {
        rows.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::Array(rows)
    }
}
