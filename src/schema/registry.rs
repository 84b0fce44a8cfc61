use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::ModelSchema;
use crate::error::{AppError, AppResult};

/// Fixed-up model schemas keyed by model name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: HashMap<String, Arc<ModelSchema>>,
}

impl SchemaRegistry {
    /// Fix up relations and datasources, then freeze the schemas.
    pub fn new(models: Vec<ModelSchema>, default_datasource: &str) -> AppResult<Self> {
        let mut staged: HashMap<String, ModelSchema> = HashMap::with_capacity(models.len());
        for mut m in models {
            if m.name.trim().is_empty() {
                return Err(AppError::user("invalid_schema", "model schema without a name"));
            }
            if staged.contains_key(&m.name) {
                return Err(AppError::user("duplicate_model".to_string(), format!("model '{}' registered twice", m.name)));
            }
            if m.datasource.is_empty() { m.datasource = default_datasource.to_string(); }
            let owner = m.name.clone();
            for (name, rel) in m.relations.iter_mut() { rel.fixup(name, &owner); }
            staged.insert(m.name.clone(), m);
        }
        for m in staged.values() {
            for rel in m.relations.values() {
                if !staged.contains_key(&rel.model) {
                    warn!(target: "docweave::schema", "relation {}.{} targets unregistered model '{}'; it will resolve as absent", m.name, rel.name, rel.model);
                }
                if let Some(t) = &rel.through {
                    if !staged.contains_key(t) {
                        warn!(target: "docweave::schema", "relation {}.{} goes through unregistered model '{}'", m.name, rel.name, t);
                    }
                }
            }
        }
        debug!(target: "docweave::schema", "registered {} model schemas", staged.len());
        Ok(Self { models: staged.into_iter().map(|(k, v)| (k, Arc::new(v))).collect() })
    }

    /// Parse one model object or an array of them.
    pub fn parse_models(text: &str) -> AppResult<Vec<ModelSchema>> {
        let v: Value = serde_json::from_str(text)?;
        let models = match v {
            Value::Array(_) => serde_json::from_value::<Vec<ModelSchema>>(v)?,
            other => vec![serde_json::from_value::<ModelSchema>(other)?],
        };
        Ok(models)
    }

    pub fn from_json(text: &str, default_datasource: &str) -> AppResult<Self> {
        Self::new(Self::parse_models(text)?, default_datasource)
    }

    /// Load every `*.json` file in `dir` (sorted by name).
    pub fn load_dir(dir: &Path, default_datasource: &str) -> AppResult<Self> {
        let rd = std::fs::read_dir(dir)
            .map_err(|e| AppError::io("schema_dir_unreadable".to_string(), format!("{}: {}", dir.display(), e)))?;
        let mut files: Vec<_> = rd
            .flatten()
            .map(|ent| ent.path())
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .collect();
        files.sort();
        let mut models = Vec::new();
        for f in files {
            let text = std::fs::read_to_string(&f)
                .map_err(|e| AppError::io("schema_file_unreadable".to_string(), format!("{}: {}", f.display(), e)))?;
            models.extend(Self::parse_models(&text)?);
        }
        Self::new(models, default_datasource)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelSchema>> { self.models.get(name) }

    pub fn require(&self, name: &str) -> AppResult<&Arc<ModelSchema>> {
        self.models.get(name).ok_or_else(|| AppError::not_found("unknown_model".to_string(), format!("model '{}' is not registered", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.models.keys().cloned().collect();
        v.sort();
        v
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelSchema>> { self.models.values() }

    pub fn len(&self) -> usize { self.models.len() }

    pub fn is_empty(&self) -> bool { self.models.is_empty() }
}
