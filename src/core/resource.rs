//! Resources produced during a run and the append-only store holding them.

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable artifact. The content is an opaque reference (inline text,
/// a path, a URI); the engine never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Task whose completion produced this resource. `None` for resources the
    /// manager created directly.
    pub producing_task: Option<TaskId>,
    pub name: String,
    pub content: String,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            producing_task: None,
            name: name.into(),
            content: content.into(),
            mime_type: None,
            created_at: Utc::now(),
        }
    }

    pub fn produced_by(mut self, task: TaskId) -> Self {
        self.producing_task = Some(task);
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }
}

/// Append-only registry of resources, keyed by id.
///
/// There is no update or remove operation; inserting an id twice is an
/// engine fatal error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceStore {
    resources: BTreeMap<ResourceId, Resource>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: Resource) -> Result<ResourceId> {
        let id = resource.id;
        if self.resources.contains_key(&id) {
            return Err(Error::fatal(
                "resource_store",
                id,
                "resource id already registered",
            ));
        }
        self.resources.insert(id, resource);
        Ok(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Resources produced by the given task.
    pub fn produced_by(&self, task: &TaskId) -> Vec<&Resource> {
        self.resources
            .values()
            .filter(|r| r.producing_task.as_ref() == Some(task))
            .collect()
    }
}
