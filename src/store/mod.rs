//!
//! docweave store module
//! ---------------------
//! The boundary to the document database. A datasource implements `DocumentStore`: an
//! aggregation-pipeline execution primitive plus id-keyed find/insert/update/delete. Wire
//! protocol and driver concerns live behind this trait.
//!
//! `MemoryStore` is an in-process implementation that evaluates the stage subset the filter
//! compiler emits. It backs the CLI and the test-suite.

use serde_json::{Map, Value};

use crate::error::AppResult;
use crate::filter::Stage;

pub mod memory;
pub mod object_id;
pub mod pipeline;
pub mod value;

pub use memory::MemoryStore;
pub use object_id::ObjectId;

/// A raw document as stored.
pub type Document = Map<String, Value>;

pub trait DocumentStore: Send + Sync {
    /// Run `stages` against `collection`. An empty stage list returns every document.
    fn execute_pipeline(&self, collection: &str, stages: &[Stage]) -> AppResult<Vec<Document>>;

    fn find_by_id(&self, collection: &str, id: &Value) -> AppResult<Option<Document>>;

    /// Insert and return the document's `_id` (assigned when absent).
    fn insert(&self, collection: &str, doc: Document) -> AppResult<Value>;

    /// Merge `patch` into the document; returns the number of matched documents.
    fn update_by_id(&self, collection: &str, id: &Value, patch: Document) -> AppResult<u64>;

    /// Returns the number of deleted documents.
    fn delete_by_id(&self, collection: &str, id: &Value) -> AppResult<u64>;
}
