//! Persistence interface
//!
//! The engine never touches storage directly. Each request obtains one
//! [`PersistenceManager`] session from a [`PersistenceManagerFactory`],
//! uses it exclusively, and always ends it with `commit` or `rollback`
//! followed by `close`.

pub mod json_patch;

pub use json_patch::{JsonPatch, PatchOperation};

use crate::core::error::StaResult;
use crate::model::{Entity, EntityType, NavigationPropertyMain, PkValue};
use crate::path::{EntityElement, ResourcePath};
use crate::query::Query;
use async_trait::async_trait;
use serde_json::Value;

/// One page of an entity set
#[derive(Debug, Clone, Default)]
pub struct EntitySetResult {
    pub entities: Vec<Entity>,
    /// Total matching rows, when `$count=true`
    pub count: Option<usize>,
    /// First row of the following page, if there is one
    pub next: Option<Entity>,
}

impl EntitySetResult {
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }
}

/// Whatever a path resolves to
#[derive(Debug, Clone)]
pub enum ResultValue {
    Entity(Entity),
    EntitySet(EntitySetResult),
    /// A fixed or custom property, or an array element, by name
    Property { name: String, value: Value },
}

/// A store session owned by one request
#[async_trait]
pub trait PersistenceManager: Send {
    /// Whether every identified entity along the path exists and is
    /// connected as the path claims
    async fn validate_path(&mut self, path: &ResourcePath) -> StaResult<bool>;

    /// Resolve the path; `None` when nothing is there
    async fn get(&mut self, path: &ResourcePath, query: &Query) -> StaResult<Option<ResultValue>>;

    /// Store a new entity and its new nested entities, assigning ids
    async fn insert(&mut self, entity: &mut Entity) -> StaResult<bool>;

    /// Apply the set properties of `entity` to the identified entity
    async fn update(&mut self, element: &EntityElement, entity: &Entity) -> StaResult<bool>;

    /// Apply a JSON patch to the identified entity
    async fn patch(&mut self, element: &EntityElement, patch: &JsonPatch) -> StaResult<bool>;

    async fn delete(&mut self, element: &EntityElement) -> StaResult<bool>;

    /// Delete every entity of the path's entity set matching the query filter
    async fn delete_by_query(&mut self, path: &ResourcePath, query: &Query) -> StaResult<usize>;

    /// Remove the link `source.navigation -> target`
    async fn delete_relation(
        &mut self,
        source: &EntityElement,
        navigation: &NavigationPropertyMain,
        target: &EntityElement,
    ) -> StaResult<()>;

    async fn entity_exists(&mut self, entity_type: &EntityType, id: &PkValue) -> StaResult<bool>;

    /// Mark the current state so one call's work can be undone on its own
    async fn savepoint(&mut self) -> StaResult<()>;

    /// Undo everything since the latest savepoint and drop it
    async fn rollback_to_savepoint(&mut self) -> StaResult<()>;

    /// Drop the latest savepoint, keeping its work
    async fn release_savepoint(&mut self) -> StaResult<()>;

    async fn commit(&mut self) -> StaResult<()>;

    async fn rollback(&mut self) -> StaResult<()>;

    /// End the session; uncommitted work is discarded
    async fn close(&mut self);
}

/// Hands out sessions
#[async_trait]
pub trait PersistenceManagerFactory: Send + Sync {
    async fn create(&self) -> StaResult<Box<dyn PersistenceManager>>;
}
