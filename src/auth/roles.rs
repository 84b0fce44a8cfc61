use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::DecisionCache;
use crate::error::AppResult;

/// Persistence for role assignments (`member -> roles`). Members may themselves be roles,
/// which is how group inheritance is expressed.
pub trait RoleStore: Send + Sync {
    fn load(&self) -> AppResult<HashMap<String, BTreeSet<String>>>;
    fn persist(&self, member: &str, roles: &BTreeSet<String>) -> AppResult<()>;
}

/// In-process `RoleStore`; counts writes so callers can observe persistence.
#[derive(Default)]
pub struct MemoryRoleStore {
    data: RwLock<HashMap<String, BTreeSet<String>>>,
    writes: AtomicU64,
}

impl MemoryRoleStore {
    pub fn new() -> Self { Self::default() }

    pub fn writes(&self) -> u64 { self.writes.load(Ordering::Relaxed) }

    pub fn assignments(&self, member: &str) -> Vec<String> {
        self.data.read().get(member).map(|r| r.iter().cloned().collect()).unwrap_or_default()
    }
}

impl RoleStore for MemoryRoleStore {
    fn load(&self) -> AppResult<HashMap<String, BTreeSet<String>>> { Ok(self.data.read().clone()) }

    fn persist(&self, member: &str, roles: &BTreeSet<String>) -> AppResult<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.data.write().insert(member.to_string(), roles.clone());
        Ok(())
    }
}

/// Role membership with transitive lookup. Every mutation is written through to the
/// `RoleStore` and evicts the member's cached authorization decisions.
pub struct RoleManager {
    grants: RwLock<HashMap<String, BTreeSet<String>>>,
    store: Arc<dyn RoleStore>,
    decisions: Arc<DecisionCache>,
}

impl RoleManager {
    pub fn new(store: Arc<dyn RoleStore>, decisions: Arc<DecisionCache>) -> AppResult<Self> {
        let grants = store.load()?;
        Ok(RoleManager { grants: RwLock::new(grants), store, decisions })
    }

    /// Assign `roles` to `member`, persisting once if anything changed. Returns whether it did.
    pub fn ensure_roles<S: AsRef<str>>(&self, member: &str, roles: &[S]) -> AppResult<bool> {
        let snapshot = {
            let mut w = self.grants.write();
            let entry = w.entry(member.to_string()).or_default();
            let mut changed = false;
            for r in roles {
                changed |= entry.insert(r.as_ref().to_string());
            }
            if !changed { return Ok(false); }
            entry.clone()
        };
        self.store.persist(member, &snapshot)?;
        self.decisions.invalidate_subject(member);
        debug!(target: "docweave::auth", "roles of {} now {:?}", member, snapshot);
        Ok(true)
    }

    pub fn assign_role(&self, member: &str, role: &str) -> AppResult<bool> { self.ensure_roles(member, &[role]) }

    pub fn revoke_role(&self, member: &str, role: &str) -> AppResult<bool> {
        let snapshot = {
            let mut w = self.grants.write();
            let Some(entry) = w.get_mut(member) else { return Ok(false) };
            if !entry.remove(role) { return Ok(false); }
            entry.clone()
        };
        self.store.persist(member, &snapshot)?;
        self.decisions.invalidate_subject(member);
        Ok(true)
    }

    /// Direct assignments only.
    pub fn roles_of(&self, member: &str) -> Vec<String> {
        self.grants.read().get(member).map(|r| r.iter().cloned().collect()).unwrap_or_default()
    }

    /// True when `member` holds `role` directly or through any chain of role assignments.
    pub fn has_role(&self, member: &str, role: &str) -> bool {
        let g = self.grants.read();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([member]);
        while let Some(m) = queue.pop_front() {
            if !seen.insert(m) { continue; }
            let Some(direct) = g.get(m) else { continue };
            if direct.contains(role) { return true; }
            queue.extend(direct.iter().map(|s| s.as_str()));
        }
        false
    }
}
