//! Engine wiring: schema registry, datasources, cache stores, authorizer and hooks.
//!
//! The engine is built once at startup and shared; repositories borrow it per request.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::auth::{AuthContext, Authorizer, Bearer, DocumentSource, MemoryRoleStore, RoleManager, RoleStore};
use crate::cache::{CacheStore, DecisionCache, RelationCache};
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::filter::{Filter, FilterCompiler, Stage};
use crate::instance::HookRegistry;
use crate::relations::merge_related;
use crate::repository::Repository;
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::store::value::id_value;
use crate::store::{Document, DocumentStore};

pub struct EngineBuilder {
    config: EngineConfig,
    registry: SchemaRegistry,
    datasources: HashMap<String, Arc<dyn DocumentStore>>,
    caches: HashMap<String, Arc<dyn CacheStore>>,
    role_store: Option<Arc<dyn RoleStore>>,
}

impl EngineBuilder {
    pub fn new(registry: SchemaRegistry) -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            registry,
            datasources: HashMap::new(),
            caches: HashMap::new(),
            role_store: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn datasource(mut self, name: &str, store: Arc<dyn DocumentStore>) -> Self {
        self.datasources.insert(name.to_string(), store);
        self
    }

    pub fn cache_store(mut self, name: &str, store: Arc<dyn CacheStore>) -> Self {
        self.caches.insert(name.to_string(), store);
        self
    }

    pub fn role_store(mut self, store: Arc<dyn RoleStore>) -> Self {
        self.role_store = Some(store);
        self
    }

    pub fn build(self) -> AppResult<Engine> {
        let config = Arc::new(self.config);
        let decisions = Arc::new(DecisionCache::new());
        let role_store = self.role_store.unwrap_or_else(|| Arc::new(MemoryRoleStore::new()));
        let roles = Arc::new(RoleManager::new(role_store, decisions.clone())?);
        let authorizer = Authorizer::new(&self.registry, roles, decisions, config.clone())?;
        info!(
            target: "docweave::config",
            "engine ready: {} models, {} datasources, {} cache stores",
            self.registry.len(), self.datasources.len(), self.caches.len()
        );
        Ok(Engine {
            config,
            registry: Arc::new(self.registry),
            datasources: self.datasources,
            caches: self.caches,
            authorizer,
            hooks: HookRegistry::new(),
        })
    }
}

pub struct Engine {
    config: Arc<EngineConfig>,
    registry: Arc<SchemaRegistry>,
    datasources: HashMap<String, Arc<dyn DocumentStore>>,
    caches: HashMap<String, Arc<dyn CacheStore>>,
    authorizer: Authorizer,
    hooks: HookRegistry,
}

impl Engine {
    pub fn builder(registry: SchemaRegistry) -> EngineBuilder { EngineBuilder::new(registry) }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn registry(&self) -> &SchemaRegistry { &self.registry }

    pub fn hooks(&self) -> &HookRegistry { &self.hooks }

    pub fn authorizer(&self) -> &Authorizer { &self.authorizer }

    pub fn roles(&self) -> &RoleManager { self.authorizer.roles() }

    pub fn decisions(&self) -> &DecisionCache { self.authorizer.decisions() }

    pub fn repository(&self, model: &str) -> AppResult<Repository<'_>> {
        let m = self.registry.require(model)?.clone();
        Ok(Repository::new(self, m))
    }

    pub fn store_for(&self, model: &ModelSchema) -> AppResult<&Arc<dyn DocumentStore>> {
        self.datasources.get(&model.datasource).ok_or_else(|| {
            AppError::io("datasource_missing".to_string(), format!("model {} uses unregistered datasource '{}'", model.name, model.datasource))
        })
    }

    pub fn cache_store(&self, name: &str) -> AppResult<&Arc<dyn CacheStore>> {
        self.caches
            .get(name)
            .ok_or_else(|| AppError::io("cache_missing".to_string(), format!("cache store '{}' is not registered", name)))
    }

    /// Compile `filter` for `model` with the engine's conversion settings.
    pub fn compile(&self, model: &str, filter: Option<&Filter>) -> AppResult<Option<Vec<Stage>>> {
        let m = self.registry.require(model)?;
        self.compiler().compile(m, filter)
    }

    pub(crate) fn compiler(&self) -> FilterCompiler<'_> {
        FilterCompiler::new(&self.registry, self.config.disable_type_conversions)
    }

    /// Decide whether `bearer` may perform `action` on `object` of `model`.
    pub fn enforce(&self, model: &str, bearer: Option<&Bearer>, object: &str, action: &str) -> AppResult<bool> {
        let m = self.registry.require(model)?.clone();
        self.enforce_model(&m, bearer, object, action)
    }

    pub(crate) fn enforce_model(&self, model: &ModelSchema, bearer: Option<&Bearer>, object: &str, action: &str) -> AppResult<bool> {
        self.authorizer.enforce(model, bearer, object, action, self)
    }

    /// Compile, execute and merge relations. `depth` is the nesting level of `model` below the
    /// root query (0 for the root).
    pub(crate) fn load_documents(
        &self,
        depth: usize,
        model: &ModelSchema,
        filter: Option<&Filter>,
        auth: &AuthContext,
        cache: &mut RelationCache,
    ) -> AppResult<Vec<Document>> {
        let stages = self.compiler().compile(model, filter)?;
        let store = self.store_for(model)?;
        let mut docs = store.execute_pipeline(model.collection_name(), stages.as_deref().unwrap_or(&[]))?;
        debug!(target: "docweave::repo", "depth={} {} -> {} docs", depth, model.name, docs.len());
        if let Some(f) = filter {
            for inc in &f.include {
                merge_related(self, depth + 1, &mut docs, model, inc, auth, cache)?;
            }
        }
        Ok(docs)
    }
}

impl DocumentSource for Engine {
    fn registry(&self) -> &SchemaRegistry { &self.registry }

    fn fetch_by_id(&self, model: &ModelSchema, id: &str) -> AppResult<Option<Document>> {
        self.store_for(model)?.find_by_id(model.collection_name(), &id_value(id))
    }
}
