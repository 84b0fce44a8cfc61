use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Subject used for callers that present no bearer.
pub const EVERYONE: &str = "$everyone";
/// Group every authenticated subject is placed in.
pub const AUTHENTICATED: &str = "$authenticated";
/// Policy subject pattern resolved through the ownership predicate.
pub const OWNER: &str = "$owner";
pub const WILDCARD: &str = "*";

/// A resolved bearer token. Token parsing and verification happen upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bearer {
    pub subject_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Internal principal; bypasses policy evaluation.
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Bearer {
    pub fn new(subject_id: &str) -> Self {
        Bearer { subject_id: subject_id.to_string(), ..Default::default() }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn system() -> Self {
        Bearer { subject_id: "$system".to_string(), system: true, ..Default::default() }
    }
}

/// Per-request authorization context threaded through repository calls.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub bearer: Option<Bearer>,
    pub request_id: Uuid,
}

impl AuthContext {
    pub fn anonymous() -> Self { AuthContext { bearer: None, request_id: Uuid::new_v4() } }

    pub fn bearer(bearer: Bearer) -> Self { AuthContext { bearer: Some(bearer), request_id: Uuid::new_v4() } }

    pub fn system() -> Self { Self::bearer(Bearer::system()) }

    pub fn is_system(&self) -> bool { self.bearer.as_ref().map(|b| b.system).unwrap_or(false) }

    /// Subject id used in logs and decision-cache keys.
    pub fn subject(&self) -> &str {
        self.bearer.as_ref().map(|b| b.subject_id.as_str()).unwrap_or(EVERYONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_json_shape() {
        let b: Bearer = serde_json::from_str(r#"{"subjectId": "u1", "roles": ["editor"]}"#).unwrap();
        assert_eq!(b.subject_id, "u1");
        assert!(!b.system);
        assert_eq!(AuthContext::bearer(b).subject(), "u1");
        assert_eq!(AuthContext::anonymous().subject(), EVERYONE);
        assert!(AuthContext::system().is_system());
    }
}
