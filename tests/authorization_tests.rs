mod common;

use docweave::auth::{owners_role, Bearer, AUTHENTICATED, EVERYONE};
use docweave::config::EngineConfig;
use docweave::schema::SchemaRegistry;
use docweave::Engine;

use common::{fixture, fixture_with};

#[test]
fn system_bearer_bypasses_policies() {
    let fx = fixture();
    assert!(fx.engine.enforce("Source", Some(&Bearer::system()), "*", "delete").unwrap());
    assert_eq!(fx.engine.authorizer().evaluations(), 0);
}

#[test]
fn anonymous_callers_hit_the_catch_all_deny() {
    let fx = fixture();
    assert!(!fx.engine.enforce("User", None, "u1", "__get__notes").unwrap());
    assert!(!fx.engine.enforce("User", None, "u1", "__get__profile").unwrap());
    // anonymous decisions are keyed on the wildcard object, whatever was asked
    assert_eq!(fx.engine.decisions().get("User", EVERYONE, "*", "__get__notes"), Some(false));
}

#[test]
fn no_matching_policy_denies() {
    let fx = fixture();
    assert!(!fx.engine.enforce("Tag", Some(&Bearer::new("u1")), "t1", "read").unwrap());
}

#[test]
fn priority_orders_evaluation() {
    let fx = fixture();
    let u1 = Bearer::new("u1");
    // allow lines outrank the priority-100 deny
    assert!(fx.engine.enforce("User", Some(&u1), "u2", "__get__profile").unwrap());
    assert!(fx.engine.enforce("User", Some(&u1), "u1", "__get__notes").unwrap());
    assert!(!fx.engine.enforce("User", Some(&u1), "u2", "__get__notes").unwrap());
}

#[test]
fn decisions_are_cached_per_subject_object_action() {
    let fx = fixture();
    let u1 = Bearer::new("u1");
    assert!(fx.engine.enforce("Note", Some(&u1), "n1", "read").unwrap());
    let after_first = fx.engine.authorizer().evaluations();
    assert!(fx.engine.enforce("Note", Some(&u1), "n1", "read").unwrap());
    assert_eq!(fx.engine.authorizer().evaluations(), after_first);

    assert!(!fx.engine.enforce("Note", Some(&u1), "n3", "read").unwrap());
    assert_eq!(fx.engine.authorizer().evaluations(), after_first + 1);
}

#[test]
fn ownership_follows_belongs_to_chain() {
    let fx = fixture();
    assert!(fx.engine.enforce("Footnote", Some(&Bearer::new("u1")), "f1", "read").unwrap());
    assert!(!fx.engine.enforce("Footnote", Some(&Bearer::new("u2")), "f1", "read").unwrap());
    assert!(fx.engine.enforce("Footnote", Some(&Bearer::new("u2")), "f3", "read").unwrap());

    // owners are registered along the way
    let roles = fx.roles.assignments("u1");
    assert!(roles.contains(&owners_role("Footnote", "f1")));
    assert!(roles.contains(&owners_role("Note", "n1")));
}

#[test]
fn non_conventional_foreign_keys_do_not_confer_ownership() {
    let fx = fixture();
    // u2 reviews n1 through `reviewerId`, which is not the owner key
    assert!(!fx.engine.enforce("Note", Some(&Bearer::new("u2")), "n1", "read").unwrap());
}

#[test]
fn ownership_walk_is_depth_bounded() {
    let fx = fixture_with(EngineConfig { max_ownership_depth: 0, ..Default::default() });
    let u1 = Bearer::new("u1");
    assert!(fx.engine.enforce("Note", Some(&u1), "n1", "read").unwrap());
    assert!(!fx.engine.enforce("Footnote", Some(&u1), "f1", "read").unwrap());
}

#[test]
fn missing_objects_have_no_owner() {
    let fx = fixture();
    assert!(!fx.engine.enforce("Note", Some(&Bearer::new("u1")), "nope", "read").unwrap());
    assert!(!fx.engine.enforce("Note", Some(&Bearer::new("u1")), "*", "read").unwrap());
}

#[test]
fn default_groups_are_persisted_once() {
    let fx = fixture();
    let u2 = Bearer::new("u2");
    fx.engine.enforce("Tag", Some(&u2), "t1", "read").unwrap();
    let writes = fx.roles.writes();
    assert_eq!(fx.roles.assignments("u2"), vec![AUTHENTICATED.to_string(), EVERYONE.to_string()]);

    fx.engine.enforce("Tag", Some(&u2), "t2", "read").unwrap();
    assert_eq!(fx.roles.writes(), writes);
}

#[test]
fn bearer_roles_grant_group_policies() {
    let fx = fixture();
    let editor = Bearer::new("u9").with_roles(["editors"]);
    assert!(fx.engine.enforce("Note", Some(&editor), "n1", "write").unwrap());
    assert!(fx.engine.roles().has_role("u9", "editors"));
}

#[test]
fn role_change_invalidates_cached_decisions() {
    let fx = fixture();
    let u2 = Bearer::new("u2");
    assert!(!fx.engine.enforce("Note", Some(&u2), "n3", "write").unwrap());
    assert_eq!(fx.engine.decisions().get("Note", "u2", "n3", "write"), Some(false));

    fx.engine.roles().assign_role("u2", "editors").unwrap();
    assert_eq!(fx.engine.decisions().get("Note", "u2", "n3", "write"), None);
    assert!(fx.engine.enforce("Note", Some(&u2), "n3", "write").unwrap());

    // inherited through a group of groups
    fx.engine.roles().assign_role("u1", "staff").unwrap();
    fx.engine.roles().assign_role("staff", "editors").unwrap();
    assert!(fx.engine.enforce("Note", Some(&Bearer::new("u1")), "n3", "write").unwrap());
}

#[test]
fn malformed_policy_line_fails_engine_build() {
    let registry = SchemaRegistry::from_json(r#"[{"name": "Widget", "acls": ["$everyone,*,read"]}]"#, "db").unwrap();
    let err = Engine::builder(registry).build().err().expect("build should fail");
    assert!(err.is_user_input());
    assert_eq!(err.code_str(), "invalid_policy");

    let registry = SchemaRegistry::from_json(r#"[{"name": "Widget", "acls": ["$everyone,*,read,maybe"]}]"#, "db").unwrap();
    assert!(Engine::builder(registry).build().is_err());
}

#[test]
fn ownership_walk_terminates_on_belongs_to_cycles() {
    use std::sync::Arc;
    use docweave::store::{DocumentStore, MemoryStore};
    use serde_json::json;

    // Folder and Shelf point at each other; neither ever reaches a User
    let registry = SchemaRegistry::from_json(r#"[
      {"name": "User"},
      {"name": "Folder", "relations": {"shelf": {"type": "belongsTo", "model": "Shelf"}}, "acls": ["$owner,*,read,allow"]},
      {"name": "Shelf", "relations": {"folder": {"type": "belongsTo", "model": "Folder"}}}
    ]"#, "db").unwrap();
    let db = MemoryStore::new("db");
    db.seed("User", vec![common::doc(json!({"_id": "u1"}))]);
    db.seed("Folder", vec![common::doc(json!({"_id": "a1", "shelfId": "b1"}))]);
    db.seed("Shelf", vec![common::doc(json!({"_id": "b1", "folderId": "a1"}))]);
    let engine = Engine::builder(registry)
        .config(EngineConfig { max_ownership_depth: usize::MAX, ..Default::default() })
        .datasource("db", Arc::new(db) as Arc<dyn DocumentStore>)
        .build()
        .unwrap();

    assert!(!engine.enforce("Folder", Some(&Bearer::new("u1")), "a1", "read").unwrap());
    assert!(!engine.roles().has_role("u1", &owners_role("Folder", "a1")));
}
