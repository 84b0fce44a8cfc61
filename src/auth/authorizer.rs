use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::owner::{DocumentSource, Ownership};
use super::policy::{parse_policies, Policy};
use super::principal::{Bearer, AUTHENTICATED, EVERYONE, OWNER, WILDCARD};
use super::roles::RoleManager;
use crate::cache::DecisionCache;
use crate::config::EngineConfig;
use crate::error::AppResult;
use crate::schema::{ModelSchema, SchemaRegistry};

/// Policy decision point: decision cache, role bookkeeping and first-match policy evaluation.
pub struct Authorizer {
    policies: HashMap<String, Vec<Policy>>,
    roles: Arc<RoleManager>,
    decisions: Arc<DecisionCache>,
    config: Arc<EngineConfig>,
    evaluations: AtomicU64,
}

impl Authorizer {
    /// Parses every model's policy block up front; a malformed line fails construction.
    pub fn new(
        registry: &SchemaRegistry,
        roles: Arc<RoleManager>,
        decisions: Arc<DecisionCache>,
        config: Arc<EngineConfig>,
    ) -> AppResult<Self> {
        let mut policies = HashMap::new();
        for m in registry.iter() {
            policies.insert(m.name.clone(), parse_policies(&m.acls)?);
        }
        Ok(Authorizer { policies, roles, decisions, config, evaluations: AtomicU64::new(0) })
    }

    pub fn roles(&self) -> &Arc<RoleManager> { &self.roles }

    pub fn decisions(&self) -> &Arc<DecisionCache> { &self.decisions }

    /// Number of times the policy list was actually scanned (cache misses).
    pub fn evaluations(&self) -> u64 { self.evaluations.load(Ordering::Relaxed) }

    pub fn enforce(
        &self,
        model: &ModelSchema,
        bearer: Option<&Bearer>,
        object: &str,
        action: &str,
        source: &dyn DocumentSource,
    ) -> AppResult<bool> {
        let (subject, object) = match bearer {
            Some(b) if b.system => return Ok(true),
            Some(b) => (b.subject_id.as_str(), object),
            None => (EVERYONE, WILDCARD),
        };

        if let Some(hit) = self.decisions.get(&model.name, subject, object, action) {
            debug!(target: "docweave::auth", "cached {} {} {} {} -> {}", model.name, subject, object, action, hit);
            return Ok(hit);
        }

        if let Some(b) = bearer {
            let mut groups: Vec<&str> = vec![EVERYONE, AUTHENTICATED];
            groups.extend(b.roles.iter().map(|r| r.as_str()));
            self.roles.ensure_roles(subject, &groups)?;
        }

        let allowed = self.evaluate(model, subject, object, action, source)?;
        self.decisions.put(&model.name, subject, object, action, allowed);
        if !allowed {
            debug!(target: "docweave::auth", "denied {} {} on {}:{}", subject, action, model.name, object);
        }
        Ok(allowed)
    }

    fn evaluate(&self, model: &ModelSchema, subject: &str, object: &str, action: &str, source: &dyn DocumentSource) -> AppResult<bool> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let Some(policies) = self.policies.get(&model.name) else { return Ok(false) };
        for p in policies {
            if !p.matches_action(action) || !p.matches_object(object) { continue; }
            if self.subject_matches(p, model, subject, object, source)? {
                return Ok(p.allows());
            }
        }
        Ok(false)
    }

    fn subject_matches(&self, p: &Policy, model: &ModelSchema, subject: &str, object: &str, source: &dyn DocumentSource) -> AppResult<bool> {
        if p.subject == WILDCARD || p.subject == subject { return Ok(true); }
        if p.subject == OWNER {
            let ownership = Ownership { roles: &self.roles, source, config: &self.config };
            return ownership.is_owner(model, subject, object);
        }
        Ok(self.roles.has_role(subject, &p.subject))
    }
}
