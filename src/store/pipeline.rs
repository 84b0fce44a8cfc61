//! In-process evaluation of pipeline stages against in-memory collections.
//! Supports the operator subset the filter compiler and typical where clauses produce.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::RegexBuilder;
use serde_json::{json, Value};

use super::value::{compare_values, get_path, is_extended, sort_order, values_equal};
use super::Document;
use crate::error::{AppError, AppResult};
use crate::filter::{SortDirection, Stage};

pub type Collections = HashMap<String, Vec<Document>>;
pub type Vars = HashMap<String, Value>;

pub fn run(stages: &[Stage], input: Vec<Document>, db: &Collections, vars: &Vars) -> AppResult<Vec<Document>> {
    let mut docs = input;
    for st in stages {
        docs = apply(st, docs, db, vars)?;
    }
    Ok(docs)
}

fn apply(stage: &Stage, docs: Vec<Document>, db: &Collections, vars: &Vars) -> AppResult<Vec<Document>> {
    match stage {
        Stage::Match(cond) => {
            let mut out = Vec::with_capacity(docs.len());
            for d in docs {
                if matches(&d, cond, vars)? { out.push(d); }
            }
            Ok(out)
        }
        Stage::Sort(keys) => {
            let mut docs = docs;
            docs.sort_by(|a, b| {
                for (k, dir) in keys {
                    let ord = sort_order(get_path(a, k), get_path(b, k));
                    let ord = if *dir == SortDirection::Desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal { return ord; }
                }
                Ordering::Equal
            });
            Ok(docs)
        }
        Stage::Skip(n) => Ok(docs.into_iter().skip(*n as usize).collect()),
        Stage::Limit(n) => Ok(docs.into_iter().take(*n as usize).collect()),
        Stage::Lookup(l) => {
            let foreign = db.get(&l.from).cloned().unwrap_or_default();
            let mut out = Vec::with_capacity(docs.len());
            for mut d in docs {
                let mut scoped = vars.clone();
                for (var, field) in &l.let_vars {
                    scoped.insert(var.clone(), get_path(&d, field).cloned().unwrap_or(Value::Null));
                }
                let joined = run(&l.pipeline, foreign.clone(), db, &scoped)?;
                d.insert(l.as_field.clone(), Value::Array(joined.into_iter().map(Value::Object).collect()));
                out.push(d);
            }
            Ok(out)
        }
        Stage::Unwind { path, preserve_null_and_empty } => {
            let mut out = Vec::with_capacity(docs.len());
            for mut d in docs {
                match d.get(path).cloned() {
                    Some(Value::Array(items)) if !items.is_empty() => {
                        for item in items {
                            let mut copy = d.clone();
                            copy.insert(path.clone(), item);
                            out.push(copy);
                        }
                    }
                    Some(Value::Array(_)) => {
                        if *preserve_null_and_empty {
                            d.remove(path);
                            out.push(d);
                        }
                    }
                    None | Some(Value::Null) => {
                        if *preserve_null_and_empty { out.push(d); }
                    }
                    Some(_) => out.push(d),
                }
            }
            Ok(out)
        }
        Stage::Project(p) => {
            let exclusion = p.values().all(|v| v == &json!(0) || v == &json!(false));
            Ok(docs
                .into_iter()
                .map(|mut d| {
                    if exclusion {
                        for k in p.keys() { d.remove(k); }
                        d
                    } else {
                        let keep_id = !matches!(p.get("_id"), Some(v) if v == &json!(0) || v == &json!(false));
                        d.into_iter().filter(|(k, _)| p.contains_key(k) || (keep_id && k == "_id")).collect()
                    }
                })
                .collect())
        }
        Stage::Count(field) => {
            let mut d = Document::new();
            d.insert(field.clone(), json!(docs.len()));
            Ok(vec![d])
        }
        Stage::Raw(v) => Err(AppError::user("unsupported_stage".to_string(), format!("memory store cannot execute {}", v))),
    }
}

pub fn matches(doc: &Document, cond: &Document, vars: &Vars) -> AppResult<bool> {
    for (k, v) in cond {
        let ok = match k.as_str() {
            "$and" => {
                let mut all = true;
                for c in clauses(v)? {
                    if !matches(doc, c, vars)? { all = false; break; }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for c in clauses(v)? {
                    if matches(doc, c, vars)? { any = true; break; }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for c in clauses(v)? {
                    if matches(doc, c, vars)? { none = false; break; }
                }
                none
            }
            "$expr" => truthy(&eval_expr(v, doc, vars)?),
            field => field_matches(get_path(doc, field), v)?,
        };
        if !ok { return Ok(false); }
    }
    Ok(true)
}

fn clauses(v: &Value) -> AppResult<Vec<&Document>> {
    let items = v.as_array().ok_or_else(|| AppError::user("invalid_where", "logical operators expect an array"))?;
    items
        .iter()
        .map(|i| i.as_object().ok_or_else(|| AppError::user("invalid_where", "logical operator clauses must be objects")))
        .collect()
}

fn is_operator_map(v: &Value) -> bool {
    match v.as_object() {
        Some(m) => !m.is_empty() && !is_extended(m) && m.keys().all(|k| k.starts_with('$')),
        None => false,
    }
}

fn eq_match(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) => values_equal(&Value::Array(items.clone()), expected) || items.iter().any(|i| values_equal(i, expected)),
        Some(v) => values_equal(v, expected),
    }
}

fn range_match(actual: Option<&Value>, arg: &Value, accept: fn(Ordering) -> bool) -> bool {
    match actual {
        None => false,
        Some(Value::Array(items)) => items.iter().any(|i| compare_values(i, arg).map(accept).unwrap_or(false)),
        Some(v) => compare_values(v, arg).map(accept).unwrap_or(false),
    }
}

fn field_matches(actual: Option<&Value>, cond: &Value) -> AppResult<bool> {
    if !is_operator_map(cond) { return Ok(eq_match(actual, cond)); }
    let ops = cond.as_object().cloned().unwrap_or_default();
    for (op, arg) in &ops {
        let ok = match op.as_str() {
            "$eq" => eq_match(actual, arg),
            "$ne" => !eq_match(actual, arg),
            "$gt" => range_match(actual, arg, |o| o == Ordering::Greater),
            "$gte" => range_match(actual, arg, |o| o != Ordering::Less),
            "$lt" => range_match(actual, arg, |o| o == Ordering::Less),
            "$lte" => range_match(actual, arg, |o| o != Ordering::Greater),
            "$in" => list(op, arg)?.iter().any(|x| eq_match(actual, x)),
            "$nin" => !list(op, arg)?.iter().any(|x| eq_match(actual, x)),
            "$exists" => actual.is_some() == truthy(arg),
            "$not" => !field_matches(actual, arg)?,
            "$size" => match (actual, arg.as_u64()) {
                (Some(Value::Array(items)), Some(n)) => items.len() as u64 == n,
                _ => false,
            },
            "$regex" => {
                let pattern = arg.as_str().ok_or_else(|| AppError::user("invalid_where", "$regex expects a string"))?;
                let insensitive = ops.get("$options").and_then(|o| o.as_str()).map(|o| o.contains('i')).unwrap_or(false);
                let rx = RegexBuilder::new(pattern)
                    .case_insensitive(insensitive)
                    .build()
                    .map_err(|e| AppError::user("invalid_where".to_string(), format!("bad $regex: {}", e)))?;
                matches!(actual, Some(Value::String(s)) if rx.is_match(s))
            }
            "$options" => true,
            other => return Err(AppError::user("unsupported_operator".to_string(), format!("operator {} is not supported", other))),
        };
        if !ok { return Ok(false); }
    }
    Ok(true)
}

fn list<'v>(op: &str, arg: &'v Value) -> AppResult<&'v Vec<Value>> {
    arg.as_array().ok_or_else(|| AppError::user("invalid_where".to_string(), format!("{} expects an array", op)))
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    }
}

/// Evaluate an aggregation expression (`$expr` body).
fn eval_expr(expr: &Value, doc: &Document, vars: &Vars) -> AppResult<Value> {
    match expr {
        Value::String(s) if s.starts_with("$$") => Ok(vars.get(&s[2..]).cloned().unwrap_or(Value::Null)),
        Value::String(s) if s.starts_with('$') => Ok(get_path(doc, &s[1..]).cloned().unwrap_or(Value::Null)),
        Value::Array(items) => Ok(Value::Array(items.iter().map(|i| eval_expr(i, doc, vars)).collect::<AppResult<Vec<_>>>()?)),
        Value::Object(m) if m.len() == 1 && !is_extended(m) => {
            let (op, args) = match m.iter().next() {
                Some(pair) => pair,
                None => return Ok(Value::Null),
            };
            let args = match eval_expr(args, doc, vars)? {
                Value::Array(a) => a,
                single => vec![single],
            };
            let pair = |args: &[Value]| -> AppResult<(Value, Value)> {
                match args {
                    [a, b] => Ok((a.clone(), b.clone())),
                    _ => Err(AppError::user("invalid_expr".to_string(), format!("{} expects two operands", op))),
                }
            };
            let out = match op.as_str() {
                "$eq" => { let (a, b) = pair(&args)?; values_equal(&a, &b) }
                "$ne" => { let (a, b) = pair(&args)?; !values_equal(&a, &b) }
                "$gt" => { let (a, b) = pair(&args)?; compare_values(&a, &b) == Some(Ordering::Greater) }
                "$gte" => { let (a, b) = pair(&args)?; matches!(compare_values(&a, &b), Some(Ordering::Greater | Ordering::Equal)) }
                "$lt" => { let (a, b) = pair(&args)?; compare_values(&a, &b) == Some(Ordering::Less) }
                "$lte" => { let (a, b) = pair(&args)?; matches!(compare_values(&a, &b), Some(Ordering::Less | Ordering::Equal)) }
                "$in" => {
                    let (needle, hay) = pair(&args)?;
                    hay.as_array().map(|h| h.iter().any(|x| values_equal(x, &needle))).unwrap_or(false)
                }
                "$and" => args.iter().all(truthy),
                "$or" => args.iter().any(truthy),
                other => return Err(AppError::user("unsupported_operator".to_string(), format!("expression operator {} is not supported", other))),
            };
            Ok(Value::Bool(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Lookup;

    fn doc(v: Value) -> Document { v.as_object().cloned().unwrap() }

    #[test]
    fn match_operators() {
        let d = doc(json!({"n": 5, "tags": ["a", "b"], "name": "Alpha"}));
        let v = Vars::new();
        assert!(matches(&d, &doc(json!({"n": {"$gte": 5, "$lt": 6}})), &v).unwrap());
        assert!(matches(&d, &doc(json!({"tags": "b"})), &v).unwrap());
        assert!(matches(&d, &doc(json!({"name": {"$regex": "^al", "$options": "i"}})), &v).unwrap());
        assert!(matches(&d, &doc(json!({"$or": [{"n": 1}, {"missing": {"$exists": false}}]})), &v).unwrap());
        assert!(!matches(&d, &doc(json!({"n": {"$in": [1, 2]}})), &v).unwrap());
        assert!(matches(&d, &doc(json!({"n": {"$bogus": 1}})), &v).is_err());
    }

    #[test]
    fn lookup_then_preserving_unwind() {
        let mut db = Collections::new();
        db.insert("User".into(), vec![doc(json!({"_id": "u1", "name": "ann"}))]);
        let notes = vec![doc(json!({"_id": "n1", "userId": "u1"})), doc(json!({"_id": "n2", "userId": "nobody"}))];
        let stages = vec![
            Stage::Lookup(Lookup {
                from: "User".into(),
                let_vars: vec![("userId".into(), "userId".into())],
                pipeline: vec![Stage::Match(doc(json!({"$expr": {"$eq": ["$_id", "$$userId"]}})))],
                as_field: "owner".into(),
            }),
            Stage::Unwind { path: "owner".into(), preserve_null_and_empty: true },
        ];
        let out = run(&stages, notes, &db, &Vars::new()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["owner"]["name"], json!("ann"));
        assert!(!out[1].contains_key("owner"));
    }

    #[test]
    fn sort_skip_limit_project_count() {
        let docs = vec![doc(json!({"a": 2, "s": 1})), doc(json!({"a": 1, "s": 1})), doc(json!({"a": 3, "s": 1}))];
        let stages = vec![
            Stage::Sort(vec![("a".into(), SortDirection::Desc)]),
            Stage::Skip(1),
            Stage::Limit(1),
            Stage::Project(doc(json!({"s": 0}))),
        ];
        let out = run(&stages, docs.clone(), &Collections::new(), &Vars::new()).unwrap();
        assert_eq!(out, vec![doc(json!({"a": 2}))]);
        let counted = run(&[Stage::Count("count".into())], docs, &Collections::new(), &Vars::new()).unwrap();
        assert_eq!(counted[0]["count"], json!(3));
    }
}
