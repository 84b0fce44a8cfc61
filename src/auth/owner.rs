//! Ownership predicate.
//!
//! A subject owns an object when it is registered in the object's `<Model>:<id>$owners` role.
//! Registration happens lazily: principal-typed objects own themselves, anything else is
//! resolved by walking `belongsTo` relations towards the principal type.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::principal::WILDCARD;
use super::roles::RoleManager;
use crate::config::EngineConfig;
use crate::error::AppResult;
use crate::schema::{conventional_foreign_key, ModelSchema, Relation, RelationKind, SchemaRegistry};
use crate::store::value::id_string;
use crate::store::Document;

/// Read access the ownership walk needs. Reads are performed with system privileges.
pub trait DocumentSource {
    fn registry(&self) -> &SchemaRegistry;
    fn fetch_by_id(&self, model: &ModelSchema, id: &str) -> AppResult<Option<Document>>;
}

pub fn owners_role(model: &str, id: &str) -> String { format!("{}:{}$owners", model, id) }

pub struct Ownership<'a> {
    pub roles: &'a RoleManager,
    pub source: &'a dyn DocumentSource,
    pub config: &'a EngineConfig,
}

impl<'a> Ownership<'a> {
    pub fn is_owner(&self, model: &ModelSchema, subject: &str, object: &str) -> AppResult<bool> {
        if is_blank(subject) || is_blank(object) { return Ok(false); }
        let role = owners_role(&model.name, object);
        if self.roles.has_role(subject, &role) { return Ok(true); }

        let mut visited = HashSet::new();
        let owners = self.resolve(model, object, 0, &mut visited)?;
        if owners.is_empty() {
            debug!(target: "docweave::auth", "no owner found for {}:{}", model.name, object);
        }
        Ok(owners.iter().any(|o| o == subject))
    }

    /// Collect (and register) the owners of `model:id`.
    fn resolve(&self, model: &ModelSchema, id: &str, depth: usize, visited: &mut HashSet<(String, String)>) -> AppResult<Vec<String>> {
        if depth > self.config.max_ownership_depth {
            debug!(target: "docweave::auth", "ownership walk for {}:{} exceeded depth {}", model.name, id, self.config.max_ownership_depth);
            return Ok(Vec::new());
        }
        if !visited.insert((model.name.clone(), id.to_string())) { return Ok(Vec::new()); }

        let role = owners_role(&model.name, id);
        if model.base_type() == self.config.principal_model {
            self.roles.assign_role(id, &role)?;
            return Ok(vec![id.to_string()]);
        }

        let Some(doc) = self.source.fetch_by_id(model, id)? else { return Ok(Vec::new()) };
        let mut owners = Vec::new();
        for rel in self.belongs_to_ordered(model) {
            let Some(fk) = doc.get(&rel.foreign_key).and_then(id_string) else { continue };
            let Some(related) = self.source.registry().get(&rel.model) else {
                warn!(target: "docweave::auth", "{}.{} points at unregistered model {}", model.name, rel.name, rel.model);
                continue;
            };
            let Some(related_doc) = self.source.fetch_by_id(related, &fk)? else { continue };
            let Some(related_id) = related_doc.get(&rel.primary_key).and_then(id_string) else { continue };

            let base = related.base_type();
            if base == self.config.principal_model && rel.foreign_key == conventional_foreign_key(&related.name) {
                self.roles.assign_role(&related_id, &role)?;
                owners.push(related_id);
            } else if !self.config.is_terminal(base) {
                for o in self.resolve(related, &related_id, depth + 1, visited)? {
                    self.roles.assign_role(&o, &role)?;
                    owners.push(o);
                }
            }
        }
        Ok(owners)
    }

    /// `belongsTo` relations, those pointing straight at the principal type first.
    fn belongs_to_ordered<'m>(&self, model: &'m ModelSchema) -> Vec<&'m Relation> {
        let reg = self.source.registry();
        let mut rels: Vec<&Relation> = model.relations.values().filter(|r| r.kind == RelationKind::BelongsTo).collect();
        rels.sort_by_key(|r| {
            let direct = reg.get(&r.model).map(|m| m.base_type() == self.config.principal_model).unwrap_or(false);
            !direct
        });
        rels
    }
}

fn is_blank(id: &str) -> bool { id.trim().is_empty() || id == WILDCARD }
