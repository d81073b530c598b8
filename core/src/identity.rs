use serde::{Deserialize, Serialize};
use std::any::{TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Readable name for a type: every path is cut to its last segment, generic
/// arguments included (`Stateless<Checkout>`).
pub fn short_type_name<T: ?Sized>() -> String {
    shorten(type_name::<T>())
}

fn shorten(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut start = 0;
    for (index, c) in full.char_indices() {
        if matches!(c, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' | '*') {
            short.push_str(last_segment(&full[start..index]));
            short.push(c);
            start = index + c.len_utf8();
        }
    }
    short.push_str(last_segment(&full[start..]));
    short
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Identity of a declared child workflow or worker: its declared type plus an
/// explicit string key chosen by the parent.
///
/// Equality and hashing use the `TypeId`, so two distinct types that happen to
/// share a short name never collide. Snapshots store the persisted name,
/// which defaults to the full type name.
#[derive(Clone)]
pub struct Identity {
    type_id: TypeId,
    type_name: &'static str,
    persisted_name: Cow<'static, str>,
    key: String,
}

impl Identity {
    pub fn of<T: ?Sized + 'static>(key: impl Into<String>) -> Self {
        let type_name = type_name::<T>();
        Self {
            type_id: TypeId::of::<T>(),
            type_name,
            persisted_name: Cow::Borrowed(type_name),
            key: key.into(),
        }
    }

    /// Replaces the type name written into snapshots.
    pub fn with_persisted_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.persisted_name = name.into();
        self
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn persisted_name(&self) -> &str {
        &self.persisted_name
    }

    pub fn short_name(&self) -> String {
        shorten(self.type_name)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn snapshot_key(&self) -> SnapshotKey {
        SnapshotKey {
            workflow_type: self.persisted_name.to_string(),
            key: self.key.clone(),
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.key == other.key
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.short_name(), self.key)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("type", &self.type_name)
            .field("persisted_as", &self.persisted_name)
            .field("key", &self.key)
            .finish()
    }
}

/// The persisted form of an [`Identity`], as stored in a tree snapshot's
/// child table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub workflow_type: String,
    pub key: String,
}

impl SnapshotKey {
    pub fn new(workflow_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            key: key.into(),
        }
    }
}
