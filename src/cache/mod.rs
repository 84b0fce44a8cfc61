//!
//! docweave cache module
//! ---------------------
//! Two caches sit in front of the expensive paths: the relation result cache (a request-local
//! map backed by an external TTL store) and the authorization decision cache. Both are explicit
//! components owned by the `Engine` with invalidation entry points, not ambient statics.

use std::time::Duration;

use serde_json::Value;

use crate::error::AppResult;

pub mod decision;
pub mod kv;
pub mod relation;

pub use decision::DecisionCache;
pub use kv::KvStore;
pub use relation::RelationCache;

/// External key/value cache used for cross-store relation results.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> AppResult<()>;
    fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> AppResult<()>;
    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> AppResult<bool>;
}
