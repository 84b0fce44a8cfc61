//! Per-model data access: reads return built instances, writes run the save hook chain.
//!
//! Writes are single-document. The store write is the commit point; relation cache
//! invalidation and `after save` run afterwards and report their errors without undoing it.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::AuthContext;
use crate::cache::relation::invalidate;
use crate::cache::RelationCache;
use crate::engine::Engine;
use crate::error::{AppError, AppResult};
use crate::filter::{Filter, Stage};
use crate::instance::{operation_event, ops, EventContext, Instance, InstanceBuilder, SaveOverride};
use crate::schema::ModelSchema;
use crate::store::value::id_value;
use crate::store::Document;

const COUNT_FIELD: &str = "count";

pub struct Repository<'e> {
    engine: &'e Engine,
    model: Arc<ModelSchema>,
}

impl<'e> Repository<'e> {
    pub fn new(engine: &'e Engine, model: Arc<ModelSchema>) -> Self { Repository { engine, model } }

    pub fn model(&self) -> &Arc<ModelSchema> { &self.model }

    pub fn find_many(&self, filter: Option<&Filter>, auth: &AuthContext) -> AppResult<Vec<Arc<Instance>>> {
        let mut ctx = self.context(ops::FIND_MANY, auth).with_filter(filter);
        self.engine.hooks().dispatch(&mut ctx)?;
        self.load(ctx.filter.as_ref(), auth)
    }

    pub fn find_one(&self, filter: Option<&Filter>, auth: &AuthContext) -> AppResult<Option<Arc<Instance>>> {
        let mut f = filter.cloned().unwrap_or_default();
        f.limit = 1;
        Ok(self.find_many(Some(&f), auth)?.into_iter().next())
    }

    /// `filter` contributes includes; its where clause is replaced by the id match.
    pub fn find_by_id(&self, id: &str, filter: Option<&Filter>, auth: &AuthContext) -> AppResult<Option<Arc<Instance>>> {
        let mut f = filter.cloned().unwrap_or_default();
        let mut w = Map::new();
        w.insert("_id".to_string(), id_value(id));
        f.where_ = Some(w);
        f.limit = 1;
        let mut ctx = self.context(ops::FIND_BY_ID, auth).with_filter(Some(&f)).with_instance_id(id);
        self.engine.hooks().dispatch(&mut ctx)?;
        Ok(self.load(ctx.filter.as_ref(), auth)?.into_iter().next())
    }

    pub fn count(&self, where_: Option<Map<String, Value>>, auth: &AuthContext) -> AppResult<u64> {
        let filter = Filter { where_, ..Default::default() };
        let mut ctx = self.context(ops::COUNT, auth).with_filter(Some(&filter));
        self.engine.hooks().dispatch(&mut ctx)?;

        let mut stages = self.engine.compiler().compile(&self.model, ctx.filter.as_ref())?.unwrap_or_default();
        stages.push(Stage::Count(COUNT_FIELD.to_string()));
        let rows = self.engine.store_for(&self.model)?.execute_pipeline(self.model.collection_name(), &stages)?;
        Ok(rows.first().and_then(|r| r.get(COUNT_FIELD)).and_then(Value::as_u64).unwrap_or(0))
    }

    pub fn create(&self, mut data: Document, auth: &AuthContext) -> AppResult<Arc<Instance>> {
        self.model.strip_relations(&mut data);
        self.model.apply_defaults(&mut data)?;

        let mut ctx = self.context(ops::CREATE, auth).with_data(data);
        ctx.is_new = true;
        self.engine.hooks().dispatch(&mut ctx)?;
        let mut ctx = ctx.next(&operation_event(ops::BEFORE_SAVE));
        self.engine.hooks().dispatch(&mut ctx)?;
        if let Some(result) = ctx.result.take() {
            debug!(target: "docweave::repo", "{} create answered by before save hook", self.model.name);
            return self.resolve_override(result, auth);
        }

        let mut data = std::mem::take(&mut ctx.data);
        self.model.strip_relations(&mut data);
        let store = self.engine.store_for(&self.model)?;
        let id = store.insert(self.model.collection_name(), data)?;
        let fresh = store
            .find_by_id(self.model.collection_name(), &id)?
            .ok_or_else(|| AppError::not_found("not_found".to_string(), format!("{} vanished after insert", self.model.name)))?;
        self.invalidate(&fresh)?;

        let mut builder = InstanceBuilder::new(self.engine.registry(), self.engine.hooks(), auth.bearer.as_ref());
        let inst = builder.build_owned(&self.model, fresh)?;
        self.after_save(&inst, true, auth)?;
        Ok(Arc::new(inst))
    }

    /// Write `patch`, then reload the stored fields into `instance`. Loaded relations are kept.
    pub fn update_attributes(&self, instance: &mut Instance, mut patch: Document, auth: &AuthContext) -> AppResult<()> {
        self.model.strip_relations(&mut patch);
        patch.remove("_id");
        for (k, v) in &patch {
            if let Some(def) = self.model.properties.get(k) {
                if !def.kind.accepts(v) {
                    return Err(AppError::user("invalid_property".to_string(), format!("{}.{} expects {:?}", self.model.name, k, def.kind)));
                }
            }
        }

        let id = instance.id().to_string();
        let mut ctx = self.context(ops::UPDATE_ATTRIBUTES, auth).with_data(patch).with_instance_id(&id);
        self.engine.hooks().dispatch(&mut ctx)?;
        let mut ctx = ctx.next(&operation_event(ops::BEFORE_SAVE));
        self.engine.hooks().dispatch(&mut ctx)?;
        if let Some(result) = ctx.result.take() {
            match result {
                SaveOverride::Document(d) => instance.replace_data(d),
                SaveOverride::Instance(i) => *instance = i,
                SaveOverride::Shared(a) => *instance = (*a).clone(),
            }
            return Ok(());
        }

        let mut patch = std::mem::take(&mut ctx.data);
        self.model.strip_relations(&mut patch);
        let store = self.engine.store_for(&self.model)?;
        let key = id_value(&id);
        if store.update_by_id(self.model.collection_name(), &key, patch)? == 0 {
            return Err(AppError::not_found("not_found".to_string(), format!("{} {} does not exist", self.model.name, id)));
        }
        let fresh = store
            .find_by_id(self.model.collection_name(), &key)?
            .ok_or_else(|| AppError::not_found("not_found".to_string(), format!("{} {} does not exist", self.model.name, id)))?;
        self.invalidate(instance.data())?;
        self.invalidate(&fresh)?;
        instance.replace_data(fresh);
        self.after_save(instance, false, auth)
    }

    pub fn delete_by_id(&self, id: &str, auth: &AuthContext) -> AppResult<()> {
        let mut ctx = self.context(ops::DELETE, auth).with_instance_id(id);
        self.engine.hooks().dispatch(&mut ctx)?;

        let store = self.engine.store_for(&self.model)?;
        let key = id_value(id);
        let existing = store.find_by_id(self.model.collection_name(), &key)?;
        if store.delete_by_id(self.model.collection_name(), &key)? == 0 {
            return Err(AppError::not_found("not_found".to_string(), format!("{} {} does not exist", self.model.name, id)));
        }
        if let Some(doc) = existing { self.invalidate(&doc)?; }
        Ok(())
    }

    fn load(&self, filter: Option<&Filter>, auth: &AuthContext) -> AppResult<Vec<Arc<Instance>>> {
        let mut cache = RelationCache::new();
        let docs = self.engine.load_documents(0, &self.model, filter, auth, &mut cache)?;
        let mut builder = InstanceBuilder::new(self.engine.registry(), self.engine.hooks(), auth.bearer.as_ref());
        docs.into_iter().map(|d| builder.build(&self.model, d)).collect()
    }

    fn context(&self, op: &str, auth: &AuthContext) -> EventContext {
        EventContext::new(&self.model.name, &operation_event(op), auth.bearer.as_ref())
    }

    fn after_save(&self, inst: &Instance, is_new: bool, auth: &AuthContext) -> AppResult<()> {
        let mut ctx = self.context(ops::AFTER_SAVE, auth).with_data(inst.data().clone()).with_instance_id(inst.id());
        ctx.is_new = is_new;
        self.engine.hooks().dispatch(&mut ctx)
    }

    fn invalidate(&self, doc: &Document) -> AppResult<()> {
        let Some(policy) = self.model.cache.as_ref() else { return Ok(()) };
        let ext = self.engine.cache_store(&policy.datasource_name)?;
        invalidate(ext.as_ref(), &self.model, doc)?;
        Ok(())
    }

    fn resolve_override(&self, result: SaveOverride, auth: &AuthContext) -> AppResult<Arc<Instance>> {
        match result {
            SaveOverride::Shared(a) => Ok(a),
            SaveOverride::Instance(i) => Ok(Arc::new(i)),
            SaveOverride::Document(d) => {
                let mut builder = InstanceBuilder::new(self.engine.registry(), self.engine.hooks(), auth.bearer.as_ref());
                Ok(Arc::new(builder.build_owned(&self.model, d)?))
            }
        }
    }
}
