use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    HasAndBelongsToMany,
    HasManyThrough,
}

impl RelationKind {
    /// hasOne / belongsTo resolve to at most one related document.
    pub fn is_singular(self) -> bool { matches!(self, RelationKind::BelongsTo | RelationKind::HasOne) }

    /// Relations that go through an intermediate model and never compile to a single lookup.
    pub fn is_through(self) -> bool { matches!(self, RelationKind::HasAndBelongsToMany | RelationKind::HasManyThrough) }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelationOptions {
    #[serde(default)]
    pub skip_auth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Filled from the map key at fixup.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RelationKind,
    pub model: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Derived at fixup when absent.
    #[serde(default)]
    pub foreign_key: String,
    /// Intermediate model for through relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    /// Field on the through model pointing at the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_through: Option<String>,
    #[serde(default)]
    pub options: RelationOptions,
}

fn default_primary_key() -> String { "_id".to_string() }

impl Relation {
    pub fn new(name: &str, kind: RelationKind, model: &str) -> Self {
        Relation {
            name: name.to_string(),
            kind,
            model: model.to_string(),
            primary_key: default_primary_key(),
            foreign_key: String::new(),
            through: None,
            key_through: None,
            options: RelationOptions::default(),
        }
    }

    pub fn with_foreign_key(mut self, fk: &str) -> Self {
        self.foreign_key = fk.to_string();
        self
    }

    pub fn through(mut self, model: &str) -> Self {
        self.through = Some(model.to_string());
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.options.skip_auth = true;
        self
    }

    /// Fill defaulted keys. Runs once per relation when the registry is built.
    pub fn fixup(&mut self, name: &str, owner: &str) {
        self.name = name.to_string();
        if self.primary_key.is_empty() { self.primary_key = default_primary_key(); }
        if self.foreign_key.is_empty() {
            self.foreign_key = match self.kind {
                RelationKind::BelongsTo => conventional_foreign_key(&self.model),
                _ => conventional_foreign_key(owner),
            };
        }
        if self.kind.is_through() && self.key_through.is_none() {
            self.key_through = Some(conventional_foreign_key(&self.model));
        }
    }

    /// Field on the owner document holding the correlation value.
    pub fn local_field(&self) -> &str {
        match self.kind {
            RelationKind::BelongsTo => &self.foreign_key,
            _ => &self.primary_key,
        }
    }

    /// Field on the related document matched against the correlation value.
    pub fn remote_field(&self) -> &str {
        match self.kind {
            RelationKind::BelongsTo => &self.primary_key,
            _ => &self.foreign_key,
        }
    }

    /// The get-action evaluated before the relation is exposed.
    pub fn get_action(&self) -> String { format!("__get__{}", self.name) }
}

/// `NoteItem` -> `noteItem`.
pub fn lower_camel(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `User` -> `userId`.
pub fn conventional_foreign_key(model: &str) -> String { format!("{}Id", lower_camel(model)) }
