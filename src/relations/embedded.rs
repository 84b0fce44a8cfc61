//! Embedded relation payloads as attached by a same-store lookup.
//!
//! Three shapes occur: a single object (after an unwind), an array of objects, and an array of
//! arrays when a lookup result was itself grouped. `take` flattens any of them into a document
//! list and remembers the shape so `restore` can put the documents back unchanged in layout.

use serde_json::Value;

use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Key missing, null, or not document-shaped; left alone.
    Absent,
    Single,
    List,
    /// Lengths of each inner array.
    Nested(Vec<usize>),
}

/// Remove and flatten the documents held under `key`.
pub fn take(doc: &mut Document, key: &str) -> (Vec<Document>, Shape) {
    let Some(value) = doc.remove(key) else { return (Vec::new(), Shape::Absent) };
    match value {
        Value::Object(m) => (vec![m], Shape::Single),
        Value::Array(items) if items.iter().any(|v| v.is_array()) => {
            let mut out = Vec::new();
            let mut lens = Vec::with_capacity(items.len());
            for item in items {
                let inner: Vec<Document> = match item {
                    Value::Array(v) => v.into_iter().filter_map(into_doc).collect(),
                    other => into_doc(other).into_iter().collect(),
                };
                lens.push(inner.len());
                out.extend(inner);
            }
            (out, Shape::Nested(lens))
        }
        Value::Array(items) => (items.into_iter().filter_map(into_doc).collect(), Shape::List),
        other => {
            doc.insert(key.to_string(), other);
            (Vec::new(), Shape::Absent)
        }
    }
}

/// Inverse of `take`.
pub fn restore(doc: &mut Document, key: &str, docs: Vec<Document>, shape: Shape) {
    let value = match shape {
        Shape::Absent => return,
        Shape::Single => docs.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
        Shape::List => Value::Array(docs.into_iter().map(Value::Object).collect()),
        Shape::Nested(lens) => {
            let mut it = docs.into_iter();
            let groups = lens
                .into_iter()
                .map(|n| Value::Array(it.by_ref().take(n).map(Value::Object).collect()))
                .collect();
            Value::Array(groups)
        }
    };
    doc.insert(key.to_string(), value);
}

fn into_doc(v: Value) -> Option<Document> {
    match v {
        Value::Object(m) => Some(m),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document { v.as_object().cloned().unwrap() }

    #[test]
    fn single_object_round_trips() {
        let mut d = doc(json!({"owner": {"_id": 1}}));
        let (docs, shape) = take(&mut d, "owner");
        assert_eq!(shape, Shape::Single);
        assert!(!d.contains_key("owner"));
        restore(&mut d, "owner", docs, shape);
        assert_eq!(d["owner"], json!({"_id": 1}));
    }

    #[test]
    fn nested_arrays_keep_grouping() {
        let mut d = doc(json!({"tags": [[{"n": 1}, {"n": 2}], [], [{"n": 3}]]}));
        let (mut docs, shape) = take(&mut d, "tags");
        assert_eq!(docs.len(), 3);
        assert_eq!(shape, Shape::Nested(vec![2, 0, 1]));
        docs[2].insert("seen".into(), json!(true));
        restore(&mut d, "tags", docs, shape);
        assert_eq!(d["tags"], json!([[{"n": 1}, {"n": 2}], [], [{"n": 3, "seen": true}]]));
    }

    #[test]
    fn scalars_and_missing_are_untouched() {
        let mut d = doc(json!({"owner": null}));
        let (docs, shape) = take(&mut d, "owner");
        assert!(docs.is_empty());
        assert_eq!(shape, Shape::Absent);
        assert_eq!(d["owner"], Value::Null);
        let (_, shape) = take(&mut d, "missing");
        assert_eq!(shape, Shape::Absent);
    }
}
