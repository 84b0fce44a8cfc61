#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use docweave::auth::{AuthContext, Bearer, MemoryRoleStore};
use docweave::cache::{CacheStore, KvStore};
use docweave::config::EngineConfig;
use docweave::schema::SchemaRegistry;
use docweave::store::{Document, DocumentStore, MemoryStore};
use docweave::Engine;

/// Notes app: users own notes, notes carry footnotes and tags, profiles live in a second
/// datasource behind a relation cache.
pub const SCHEMAS: &str = r#"[
  {
    "name": "User",
    "hidden": ["password"],
    "relations": {
      "notes": {"type": "hasMany", "model": "Note"},
      "profile": {"type": "hasOne", "model": "Profile"},
      "ghost": {"type": "hasOne", "model": "Nowhere"}
    },
    "acls": [
      "$owner,*,__get__notes,allow",
      "$authenticated,*,__get__profile,allow",
      "$everyone,*,*,deny,100"
    ]
  },
  {
    "name": "Note",
    "properties": {
      "title": {"type": "string", "required": true},
      "pinned": {"type": "boolean", "default": false}
    },
    "relations": {
      "owner": {"type": "belongsTo", "model": "User"},
      "footnotes": {"type": "hasMany", "model": "Footnote"},
      "tags": {"type": "hasManyThrough", "model": "Tag", "through": "NoteTag"},
      "reviewer": {"type": "belongsTo", "model": "User", "foreignKey": "reviewerId"}
    },
    "acls": [
      "$everyone,*,__get__footnotes,allow",
      "$everyone,*,__get__tags,allow",
      "$authenticated,*,__get__owner,allow",
      "$owner,*,read,allow",
      "editors,*,write,allow"
    ]
  },
  {
    "name": "Footnote",
    "relations": {
      "note": {"type": "belongsTo", "model": "Note"},
      "source": {"type": "belongsTo", "model": "Source", "options": {"skipAuth": true}}
    },
    "acls": ["$owner,*,read,allow", "*,*,__get__note,allow"]
  },
  {
    "name": "Source",
    "datasource": "archive",
    "hidden": ["internal"]
  },
  {
    "name": "Profile",
    "datasource": "profiles",
    "hidden": ["internal"],
    "cache": {"datasourceName": "redis", "ttl": 60, "keyGroups": [["userId"]]}
  },
  {"name": "Tag"},
  {"name": "NoteTag"}
]"#;

pub struct Fixture {
    pub engine: Engine,
    pub db: MemoryStore,
    pub profiles: MemoryStore,
    pub archive: MemoryStore,
    pub redis: Arc<KvStore>,
    pub roles: Arc<MemoryRoleStore>,
}

pub fn doc(v: Value) -> Document { v.as_object().cloned().expect("object literal") }

pub fn registry() -> SchemaRegistry { SchemaRegistry::from_json(SCHEMAS, "db").expect("fixture schemas parse") }

pub fn fixture() -> Fixture { fixture_with(EngineConfig::default()) }

pub fn fixture_with(config: EngineConfig) -> Fixture {
    let db = MemoryStore::new("db");
    db.seed("User", vec![
        doc(json!({"_id": "u1", "name": "ann", "password": "hash-1"})),
        doc(json!({"_id": "u2", "name": "bob", "password": "hash-2"})),
    ]);
    db.seed("Note", vec![
        doc(json!({"_id": "n1", "title": "alpha", "userId": "u1", "reviewerId": "u2"})),
        doc(json!({"_id": "n2", "title": "beta", "userId": "u1"})),
        doc(json!({"_id": "n3", "title": "gamma", "userId": "u2"})),
    ]);
    db.seed("Footnote", vec![
        doc(json!({"_id": "f1", "text": "see also", "noteId": "n1", "sourceId": "s1"})),
        doc(json!({"_id": "f2", "text": "ibid", "noteId": "n1"})),
        doc(json!({"_id": "f3", "text": "cf.", "noteId": "n3"})),
    ]);
    db.seed("Tag", vec![doc(json!({"_id": "t1", "label": "work"})), doc(json!({"_id": "t2", "label": "home"}))]);
    db.seed("NoteTag", vec![
        doc(json!({"_id": "nt1", "noteId": "n1", "tagId": "t1"})),
        doc(json!({"_id": "nt2", "noteId": "n1", "tagId": "t2"})),
        doc(json!({"_id": "nt3", "noteId": "n2", "tagId": "t2"})),
    ]);

    let profiles = MemoryStore::new("profiles");
    profiles.seed("Profile", vec![
        doc(json!({"_id": "p1", "userId": "u1", "bio": "writes notes", "internal": "x"})),
        doc(json!({"_id": "p2", "userId": "u2", "bio": "reviews notes", "internal": "y"})),
    ]);

    let archive = MemoryStore::new("archive");
    archive.seed("Source", vec![doc(json!({"_id": "s1", "title": "Encyclopedia", "internal": "z"}))]);

    let redis = Arc::new(KvStore::new("redis"));
    let roles = Arc::new(MemoryRoleStore::new());
    let engine = Engine::builder(registry())
        .config(config)
        .datasource("db", Arc::new(db.clone()) as Arc<dyn DocumentStore>)
        .datasource("profiles", Arc::new(profiles.clone()) as Arc<dyn DocumentStore>)
        .datasource("archive", Arc::new(archive.clone()) as Arc<dyn DocumentStore>)
        .cache_store("redis", redis.clone() as Arc<dyn CacheStore>)
        .role_store(roles.clone())
        .build()
        .expect("engine builds");
    Fixture { engine, db, profiles, archive, redis, roles }
}

pub fn as_user(id: &str) -> AuthContext { AuthContext::bearer(Bearer::new(id)) }
