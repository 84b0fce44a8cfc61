//! Extended-JSON helpers and value comparison.
//!
//! Native identifiers travel as `{"$oid": "<hex>"}` and timestamps as `{"$date": "<rfc3339>"}`.
//! Comparison treats an `$oid` and its bare hex string as the same value so documents written
//! by clients that never went through type conversion still correlate.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::object_id::ObjectId;
use super::Document;

pub const OID_KEY: &str = "$oid";
pub const DATE_KEY: &str = "$date";

pub fn oid_value(hex: &str) -> Value { json!({ OID_KEY: hex.to_lowercase() }) }

pub fn date_value(ts: DateTime<Utc>) -> Value {
    json!({ DATE_KEY: ts.to_rfc3339_opts(SecondsFormat::Millis, true) })
}

pub fn as_oid(v: &Value) -> Option<&str> {
    v.as_object().filter(|m| m.len() == 1).and_then(|m| m.get(OID_KEY)).and_then(|s| s.as_str())
}

pub fn as_date(v: &Value) -> Option<DateTime<Utc>> {
    let raw = v.as_object().filter(|m| m.len() == 1).and_then(|m| m.get(DATE_KEY))?;
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// True for `{"$oid": ..}` / `{"$date": ..}` wrappers, which must be treated as scalars.
pub fn is_extended(map: &Map<String, Value>) -> bool {
    map.len() == 1 && (map.contains_key(OID_KEY) || map.contains_key(DATE_KEY))
}

/// Render an identifier value as the string form used for ids, cache keys and policy objects.
pub fn id_string(v: &Value) -> Option<String> {
    if let Some(h) = as_oid(v) { return Some(h.to_string()); }
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Inverse of `id_string` for store lookups.
pub fn id_value(id: &str) -> Value {
    if ObjectId::is_valid_hex(id) { oid_value(id) } else { Value::String(id.to_string()) }
}

/// Resolve a dotted path inside a document.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut cur = doc.get(first)?;
    for p in parts {
        cur = match cur {
            Value::Object(m) => m.get(p)?,
            Value::Array(items) => items.get(p.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

#[derive(Debug, PartialEq)]
enum Scalar<'a> {
    Null,
    Num(f64),
    Text(&'a str),
    Bool(bool),
    Date(i64),
    Composite,
}

impl Scalar<'_> {
    fn rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Num(_) => 1,
            Scalar::Text(_) => 2,
            Scalar::Composite => 3,
            Scalar::Bool(_) => 4,
            Scalar::Date(_) => 5,
        }
    }
}

fn scalar(v: &Value) -> Scalar<'_> {
    if let Some(h) = as_oid(v) { return Scalar::Text(h); }
    if let Some(d) = as_date(v) { return Scalar::Date(d.timestamp_millis()); }
    match v {
        Value::Null => Scalar::Null,
        Value::Bool(b) => Scalar::Bool(*b),
        Value::Number(n) => Scalar::Num(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Scalar::Text(s.as_str()),
        Value::Array(_) | Value::Object(_) => Scalar::Composite,
    }
}

/// Same-type comparison used by range operators; `None` when the types differ.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (scalar(a), scalar(b)) {
        (Scalar::Null, Scalar::Null) => Some(Ordering::Equal),
        (Scalar::Num(x), Scalar::Num(y)) => x.partial_cmp(&y),
        (Scalar::Text(x), Scalar::Text(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(&y)),
        (Scalar::Date(x), Scalar::Date(y)) => Some(x.cmp(&y)),
        _ => None,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (scalar(a), scalar(b)) {
        (Scalar::Composite, Scalar::Composite) => a == b,
        (x, y) => x == y,
    }
}

/// Total order for sorting: type rank first, then value. Missing sorts as null.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let null = Value::Null;
    let a = a.unwrap_or(&null);
    let b = b.unwrap_or(&null);
    let (sa, sb) = (scalar(a), scalar(b));
    match sa.rank().cmp(&sb.rank()) {
        Ordering::Equal => compare_values(a, b).unwrap_or(Ordering::Equal),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn oid_equals_bare_hex() {
        let h = "5f1d7a2b3c4d5e6f70819203";
        assert!(values_equal(&oid_value(h), &json!(h)));
        assert_eq!(id_string(&oid_value(h)).as_deref(), Some(h));
    }

    #[test]
    fn dates_compare_chronologically() {
        let early = date_value(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let late = date_value(Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap());
        assert_eq!(compare_values(&early, &late), Some(Ordering::Less));
        assert_eq!(compare_values(&early, &json!(3)), None);
    }

    #[test]
    fn dotted_paths() {
        let doc = json!({"a": {"b": [10, 20]}}).as_object().cloned().unwrap();
        assert_eq!(get_path(&doc, "a.b.1"), Some(&json!(20)));
        assert_eq!(get_path(&doc, "a.c"), None);
    }

    #[test]
    fn missing_sorts_first() {
        assert_eq!(sort_order(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
    }

    #[test]
    fn extended_wrappers_are_detected() {
        assert!(is_extended(oid_value("5f1d7a2b3c4d5e6f70819203").as_object().unwrap()));
        assert!(!is_extended(json!({"$oid": "x", "other": 1}).as_object().unwrap()));
    }
}
