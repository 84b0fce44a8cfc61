//! Declarative query descriptors and their compilation into pipeline stages.
//!
//! A `Filter` is `{where, order, skip, limit, include, aggregationStages}`. `include` items may
//! carry a nested `scope` filter of their own, to any depth.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::AppResult;

pub mod compile;
pub mod convert;
pub mod stage;

pub use compile::FilterCompiler;
pub use stage::{Lookup, SortDirection, Stage};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default)]
    pub limit: i64,
    #[serde(default, deserialize_with = "one_or_many_include", skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<IncludeItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregation_stages: Vec<Value>,
}

impl Filter {
    pub fn from_json(s: &str) -> AppResult<Self> { Ok(serde_json::from_str(s)?) }

    pub fn with_where(where_: Map<String, Value>) -> Self { Filter { where_: Some(where_), ..Default::default() } }

    pub fn include(mut self, item: IncludeItem) -> Self {
        self.include.push(item);
        self
    }

    /// The include item for `relation`, if requested.
    pub fn include_for(&self, relation: &str) -> Option<&IncludeItem> {
        self.include.iter().find(|i| i.relation == relation)
    }
}

/// A request to embed a named relation, optionally narrowed by its own filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IncludeRepr")]
pub struct IncludeItem {
    pub relation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Box<Filter>>,
}

impl IncludeItem {
    pub fn new(relation: impl Into<String>) -> Self { Self { relation: relation.into(), scope: None } }

    pub fn with_scope(relation: impl Into<String>, scope: Filter) -> Self {
        Self { relation: relation.into(), scope: Some(Box::new(scope)) }
    }

    /// True when the scope changes which related rows come back or in what order: a where
    /// clause, paging, ordering or extra aggregation stages. Nested includes do not count.
    pub fn scope_narrows_rows(&self) -> bool {
        let Some(s) = self.scope.as_deref() else { return false };
        s.where_.as_ref().map(|w| !w.is_empty()).unwrap_or(false)
            || s.skip > 0
            || s.limit > 0
            || !s.order.is_empty()
            || !s.aggregation_stages.is_empty()
    }

    pub fn nested_includes(&self) -> &[IncludeItem] {
        self.scope.as_deref().map(|s| s.include.as_slice()).unwrap_or(&[])
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IncludeRepr {
    Name(String),
    Full {
        relation: String,
        #[serde(default)]
        scope: Option<Box<Filter>>,
    },
}

impl From<IncludeRepr> for IncludeItem {
    fn from(r: IncludeRepr) -> Self {
        match r {
            IncludeRepr::Name(relation) => IncludeItem { relation, scope: None },
            IncludeRepr::Full { relation, scope } => IncludeItem { relation, scope },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany<String>>::deserialize(d)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        Some(OneOrMany::Many(v)) => v,
    })
}

fn one_or_many_include<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<IncludeItem>, D::Error> {
    Ok(match Option::<OneOrMany<IncludeItem>>::deserialize(d)? {
        None => Vec::new(),
        Some(OneOrMany::One(i)) => vec![i],
        Some(OneOrMany::Many(v)) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loose_include_and_order_shapes() {
        let f = Filter::from_json(r#"{
            "where": {"title": "x"},
            "order": "title ASC, created DESC",
            "limit": 5,
            "include": ["owner", {"relation": "comments", "scope": {"limit": 2, "include": "author"}}]
        }"#).unwrap();
        assert_eq!(f.order, vec!["title ASC", "created DESC"]);
        assert_eq!(f.limit, 5);
        assert_eq!(f.include.len(), 2);
        assert_eq!(f.include[0], IncludeItem::new("owner"));
        let nested = f.include[1].nested_includes();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].relation, "author");
    }

    #[test]
    fn single_include_object() {
        let f = Filter::from_json(r#"{"include": {"relation": "owner"}}"#).unwrap();
        assert_eq!(f.include, vec![IncludeItem::new("owner")]);
        assert!(!f.include[0].scope_narrows_rows());
    }

    #[test]
    fn paging_and_order_narrow_but_nested_includes_do_not() {
        let f = Filter::from_json(r#"{"include": [
            {"relation": "a", "scope": {"limit": 1}},
            {"relation": "b", "scope": {"order": "title"}},
            {"relation": "c", "scope": {"include": "d"}},
            {"relation": "e", "scope": {"where": {}}}
        ]}"#).unwrap();
        let narrows: Vec<bool> = f.include.iter().map(|i| i.scope_narrows_rows()).collect();
        assert_eq!(narrows, vec![true, true, false, false]);
    }

    #[test]
    fn aggregation_stages_camel_case() {
        let f = Filter::from_json(r#"{"aggregationStages": [{"$sample": {"size": 3}}]}"#).unwrap();
        assert_eq!(f.aggregation_stages.len(), 1);
    }
}
