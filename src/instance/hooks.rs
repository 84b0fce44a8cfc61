//! Lifecycle hook registry.
//!
//! Each `(model, event)` key holds an ordered list of handlers. Dispatch runs them in
//! registration order and stops at the first error.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::Instance;
use crate::auth::Bearer;
use crate::error::AppResult;
use crate::filter::Filter;
use crate::store::Document;

pub const LOADED: &str = "loaded";
pub const OPERATION_PREFIX: &str = "__operation__";

/// Built-in operation names; registered under `__operation__<name>`.
pub mod ops {
    pub const CREATE: &str = "create";
    pub const BEFORE_SAVE: &str = "before save";
    pub const AFTER_SAVE: &str = "after save";
    pub const FIND_MANY: &str = "findMany";
    pub const FIND_BY_ID: &str = "findById";
    pub const COUNT: &str = "count";
    pub const UPDATE_ATTRIBUTES: &str = "instance_updateAttributes";
    pub const DELETE: &str = "instance_delete";
}

pub fn operation_event(op: &str) -> String { format!("{}{}", OPERATION_PREFIX, op) }

/// Replacement result a `before save` handler may install instead of the stored document.
#[derive(Debug, Clone)]
pub enum SaveOverride {
    Document(Document),
    Instance(Instance),
    Shared(Arc<Instance>),
}

#[derive(Debug, Clone)]
pub struct EventContext {
    pub model: String,
    pub event: String,
    pub bearer: Option<Bearer>,
    /// Payload: the document being saved or loaded. Handlers may edit it in place.
    pub data: Document,
    pub filter: Option<Filter>,
    pub instance_id: Option<String>,
    pub is_new: bool,
    pub result: Option<SaveOverride>,
}

impl EventContext {
    pub fn new(model: &str, event: &str, bearer: Option<&Bearer>) -> Self {
        EventContext {
            model: model.to_string(),
            event: event.to_string(),
            bearer: bearer.cloned(),
            data: Document::new(),
            filter: None,
            instance_id: None,
            is_new: false,
            result: None,
        }
    }

    pub fn with_data(mut self, data: Document) -> Self {
        self.data = data;
        self
    }

    pub fn with_filter(mut self, filter: Option<&Filter>) -> Self {
        self.filter = filter.cloned();
        self
    }

    pub fn with_instance_id(mut self, id: &str) -> Self {
        self.instance_id = Some(id.to_string());
        self
    }

    /// Reuse for the next event in the same operation, keeping the payload.
    pub fn next(mut self, event: &str) -> Self {
        self.event = event.to_string();
        self
    }
}

pub type Handler = Arc<dyn Fn(&mut EventContext) -> AppResult<()> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<(String, String), Vec<Handler>>>,
}

impl HookRegistry {
    pub fn new() -> Self { Self::default() }

    /// Append `f` to the chain for `event`; it runs after every earlier registration.
    pub fn on<F>(&self, model: &str, event: &str, f: F)
    where
        F: Fn(&mut EventContext) -> AppResult<()> + Send + Sync + 'static,
    {
        self.handlers.write().entry((model.to_string(), event.to_string())).or_default().push(Arc::new(f));
    }

    /// Register on a built-in operation, e.g. `observe("Note", ops::BEFORE_SAVE, ..)`.
    pub fn observe<F>(&self, model: &str, op: &str, f: F)
    where
        F: Fn(&mut EventContext) -> AppResult<()> + Send + Sync + 'static,
    {
        self.on(model, &operation_event(op), f);
    }

    pub fn handler_count(&self, model: &str, event: &str) -> usize {
        self.handlers.read().get(&(model.to_string(), event.to_string())).map(|v| v.len()).unwrap_or(0)
    }

    pub fn dispatch(&self, ctx: &mut EventContext) -> AppResult<()> {
        // clone the chain so handlers may register further hooks without deadlocking
        let chain: Vec<Handler> = match self.handlers.read().get(&(ctx.model.clone(), ctx.event.clone())) {
            Some(v) => v.clone(),
            None => return Ok(()),
        };
        debug!(target: "docweave::instance", "dispatch {}.{} ({} handlers)", ctx.model, ctx.event, chain.len());
        for h in chain {
            h(ctx)?;
        }
        Ok(())
    }
}
