use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

type DecisionKey = (String, String, String);

/// Per-model `(subject, object, action) -> allowed` memo.
///
/// Lookups take the read lock only; the write lock is held for the insert itself.
#[derive(Default)]
pub struct DecisionCache {
    models: RwLock<HashMap<String, HashMap<DecisionKey, bool>>>,
}

impl DecisionCache {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, model: &str, subject: &str, object: &str, action: &str) -> Option<bool> {
        let r = self.models.read();
        let per_model = r.get(model)?;
        per_model.get(&(subject.to_string(), object.to_string(), action.to_string())).copied()
    }

    pub fn put(&self, model: &str, subject: &str, object: &str, action: &str, allowed: bool) {
        let mut w = self.models.write();
        w.entry(model.to_string())
            .or_default()
            .insert((subject.to_string(), object.to_string(), action.to_string()), allowed);
    }

    /// Drop every cached decision made for `subject`, across all models.
    pub fn invalidate_subject(&self, subject: &str) -> usize {
        let mut w = self.models.write();
        let mut removed = 0;
        for per_model in w.values_mut() {
            let before = per_model.len();
            per_model.retain(|(s, _, _), _| s != subject);
            removed += before - per_model.len();
        }
        if removed > 0 {
            debug!(target: "docweave::cache", "evicted {} decisions for subject {}", removed, subject);
        }
        removed
    }

    pub fn clear(&self) { self.models.write().clear(); }

    pub fn len(&self) -> usize { self.models.read().values().map(|m| m.len()).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_per_model() {
        let c = DecisionCache::new();
        c.put("Note", "u1", "n1", "__get__owner", true);
        assert_eq!(c.get("Note", "u1", "n1", "__get__owner"), Some(true));
        assert_eq!(c.get("Footnote", "u1", "n1", "__get__owner"), None);
        assert_eq!(c.get("Note", "u1", "n2", "__get__owner"), None);
    }

    #[test]
    fn invalidation_is_per_subject() {
        let c = DecisionCache::new();
        c.put("Note", "u1", "*", "read", false);
        c.put("User", "u1", "u1", "read", true);
        c.put("Note", "u2", "*", "read", true);
        assert_eq!(c.invalidate_subject("u1"), 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("Note", "u2", "*", "read"), Some(true));
    }
}
