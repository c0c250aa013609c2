//! In-memory persistence for testing and development
//!
//! Rows live in per-type tables; relations are a uniform set of directed
//! edges, stored once per direction. A session works on a private copy of
//! the tables taken on first use and publishes it on commit. Commits are
//! optimistic: a session whose snapshot is stale fails instead of
//! overwriting a newer state.

use crate::core::error::{EntityError, StaError, StaResult, StorageError};
use crate::model::{
    Entity, EntityType, ModelRegistry, NavigationPropertyMain, NavigationValue, PkValue,
};
use crate::path::{EntityElement, PathElement, ResourcePath};
use crate::persistence::{
    EntitySetResult, JsonPatch, PersistenceManager, PersistenceManagerFactory, ResultValue,
};
use crate::query::{OrderBy, Query, compare_values};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt::Display;
use std::sync::{Arc, RwLock};

const BACKEND: &str = "in-memory";

fn backend_error(e: impl Display) -> StaError {
    StorageError::Backend {
        backend: BACKEND.to_string(),
        message: e.to_string(),
    }
    .into()
}

fn key(id: &PkValue) -> String {
    id.to_url_string()
}

#[derive(Debug, Clone)]
struct Row {
    id: PkValue,
    properties: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Edge {
    source_type: String,
    source_key: String,
    navigation: String,
    target_type: String,
    target_key: String,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: IndexMap<String, IndexMap<String, Row>>,
    edges: IndexSet<Edge>,
    next_id: i64,
}

impl Tables {
    fn row(&self, entity_type: &str, key: &str) -> Option<&Row> {
        self.rows.get(entity_type)?.get(key)
    }

    fn contains(&self, entity_type: &str, key: &str) -> bool {
        self.row(entity_type, key).is_some()
    }

    fn keys(&self, entity_type: &str) -> Vec<String> {
        self.rows
            .get(entity_type)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn related(&self, source_type: &str, source_key: &str, navigation: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| {
                e.source_type == source_type
                    && e.source_key == source_key
                    && e.navigation == navigation
            })
            .map(|e| e.target_key.clone())
            .collect()
    }

    fn allocate_id(&mut self, entity_type: &str) -> PkValue {
        loop {
            self.next_id += 1;
            let id = PkValue::single(self.next_id);
            if !self.contains(entity_type, &key(&id)) {
                return id;
            }
        }
    }

    fn edge(nav: &NavigationPropertyMain, source_key: &str, target_key: &str) -> Edge {
        Edge {
            source_type: nav.source_type().to_string(),
            source_key: source_key.to_string(),
            navigation: nav.name().to_string(),
            target_type: nav.target_type().to_string(),
            target_key: target_key.to_string(),
        }
    }

    fn inverse_edge(nav: &NavigationPropertyMain, source_key: &str, target_key: &str) -> Edge {
        Edge {
            source_type: nav.target_type().to_string(),
            source_key: target_key.to_string(),
            navigation: nav.inverse_name().to_string(),
            target_type: nav.source_type().to_string(),
            target_key: source_key.to_string(),
        }
    }

    /// Remove both directions of a link; true when it existed
    fn unlink(&mut self, nav: &NavigationPropertyMain, source_key: &str, target_key: &str) -> bool {
        let removed = self
            .edges
            .shift_remove(&Self::edge(nav, source_key, target_key));
        self.edges
            .shift_remove(&Self::inverse_edge(nav, source_key, target_key));
        removed
    }

    fn unlink_all(&mut self, nav: &NavigationPropertyMain, source_key: &str) {
        for target in self.related(nav.source_type(), source_key, nav.name()) {
            self.unlink(nav, source_key, &target);
        }
    }

    /// Link `source.nav -> target`, replacing the previous partner on any
    /// to-one end
    fn link(
        &mut self,
        registry: &ModelRegistry,
        nav: &NavigationPropertyMain,
        source_key: &str,
        target_key: &str,
    ) {
        if nav.is_to_one() {
            self.unlink_all(nav, source_key);
        }
        let inverse = registry
            .navigation_target(nav)
            .and_then(|t| t.navigation_property(nav.inverse_name()))
            .cloned();
        if let Some(inverse) = inverse.filter(NavigationPropertyMain::is_to_one) {
            self.unlink_all(&inverse, target_key);
        }
        self.edges.insert(Self::edge(nav, source_key, target_key));
        self.edges
            .insert(Self::inverse_edge(nav, source_key, target_key));
    }

    /// Delete a row, its links and every entity that cannot exist without it
    fn remove_entity(
        &mut self,
        registry: &ModelRegistry,
        entity_type: &Arc<EntityType>,
        key: &str,
    ) -> bool {
        let removed = self
            .rows
            .get_mut(entity_type.name())
            .and_then(|t| t.shift_remove(key));
        if removed.is_none() {
            return false;
        }
        let navs: Vec<NavigationPropertyMain> = entity_type
            .navigation_to_one()
            .iter()
            .chain(entity_type.navigation_to_many())
            .cloned()
            .collect();
        for nav in navs {
            let targets = self.related(entity_type.name(), key, nav.name());
            self.unlink_all(&nav, key);
            let Some(target_type) = registry.navigation_target(&nav).cloned() else {
                continue;
            };
            let dependent = target_type
                .navigation_property(nav.inverse_name())
                .is_some_and(NavigationPropertyMain::is_required);
            if dependent {
                for target in targets {
                    tracing::debug!(
                        entity_type = target_type.name(),
                        key = %target,
                        "cascading delete"
                    );
                    self.remove_entity(registry, &target_type, &target);
                }
            }
        }
        true
    }
}

fn to_entity(entity_type: &Arc<EntityType>, row: &Row) -> Entity {
    let mut entity = Entity::new(entity_type.clone()).with_id(row.id.clone());
    for (name, value) in &row.properties {
        entity.set_property(name, value.clone());
    }
    entity
}

fn check_required(entity_type: &EntityType, row: &Row) -> StaResult<()> {
    for p in entity_type.entity_properties() {
        if p.is_id() || !entity_type.is_required(p.name()) {
            continue;
        }
        if row.properties.get(p.name()).is_none_or(Value::is_null) {
            return Err(EntityError::Incomplete {
                entity_type: entity_type.name().to_string(),
                field: p.name().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Insert `entity` and its new nested entities; returns the row key
fn insert_entity(
    tables: &mut Tables,
    registry: &ModelRegistry,
    entity: &mut Entity,
) -> StaResult<String> {
    let entity_type = entity.entity_type().clone();
    let id = match entity.id() {
        Some(id) => {
            if tables.contains(entity_type.name(), &key(id)) {
                return Err(EntityError::illegal(format!(
                    "{}({}) already exists",
                    entity_type.plural(),
                    id
                ))
                .into());
            }
            id.clone()
        }
        None => {
            let id = tables.allocate_id(entity_type.name());
            entity.set_id(id.clone());
            id
        }
    };
    let row_key = key(&id);
    let properties = entity_type
        .entity_properties()
        .iter()
        .filter(|p| !p.is_id())
        .filter_map(|p| {
            entity
                .property(p.name())
                .map(|v| (p.name().to_string(), v.clone()))
        })
        .collect();
    tables
        .rows
        .entry(entity_type.name().to_string())
        .or_default()
        .insert(row_key.clone(), Row { id, properties });

    link_navigations(tables, registry, &entity_type, &row_key, entity)?;
    Ok(row_key)
}

/// Link (and deep-insert) every navigation value set on `entity`
fn link_navigations(
    tables: &mut Tables,
    registry: &ModelRegistry,
    entity_type: &EntityType,
    row_key: &str,
    entity: &mut Entity,
) -> StaResult<()> {
    for (name, value) in entity.navigations_mut() {
        let Some(nav) = entity_type.navigation_property(name).cloned() else {
            continue;
        };
        let related: Vec<&mut Entity> = match value {
            NavigationValue::One(e) => vec![e.as_mut()],
            NavigationValue::Many(list) => list.iter_mut().collect(),
        };
        for related in related {
            let target_key = match related.id() {
                Some(id) => {
                    let target_key = key(id);
                    if !tables.contains(related.entity_type().name(), &target_key) {
                        return Err(EntityError::NoSuchEntity {
                            entity_type: related.entity_type().name().to_string(),
                            id: id.to_string(),
                        }
                        .into());
                    }
                    target_key
                }
                None => insert_entity(tables, registry, related)?,
            };
            tables.link(registry, &nav, row_key, &target_key);
        }
    }
    Ok(())
}

enum Node {
    One(Option<String>),
    Set(Vec<String>),
    Value(Option<Value>),
}

fn parent_key(nodes: &[Node], parent: Option<usize>) -> Option<String> {
    match parent.and_then(|p| nodes.get(p)) {
        Some(Node::One(Some(k))) => Some(k.clone()),
        _ => None,
    }
}

fn parent_value(nodes: &[Node], parent: Option<usize>) -> Option<&Value> {
    match parent.and_then(|p| nodes.get(p)) {
        Some(Node::Value(Some(v))) => Some(v),
        _ => None,
    }
}

/// Resolve every element of the path against the tables
fn resolve_nodes(tables: &Tables, path: &ResourcePath) -> Vec<Node> {
    let mut nodes: Vec<Node> = Vec::with_capacity(path.len());
    for element in path.elements() {
        let node = match element {
            PathElement::EntitySet(set) => match (set.parent(), set.navigation()) {
                (None, _) => Node::Set(tables.keys(set.entity_type().name())),
                (Some(p), Some(nav)) => Node::Set(
                    parent_key(&nodes, Some(p))
                        .map(|k| tables.related(nav.source_type(), &k, nav.name()))
                        .unwrap_or_default(),
                ),
                (Some(_), None) => Node::Set(Vec::new()),
            },
            PathElement::Entity(entity) => {
                let found = match (entity.parent(), entity.navigation()) {
                    (Some(p), Some(nav)) => {
                        let related = parent_key(&nodes, Some(p))
                            .map(|k| tables.related(nav.source_type(), &k, nav.name()))
                            .unwrap_or_default();
                        match entity.id() {
                            Some(id) => {
                                let k = key(id);
                                related.contains(&k).then_some(k)
                            }
                            None => related.into_iter().next(),
                        }
                    }
                    _ => entity
                        .id()
                        .map(key)
                        .filter(|k| tables.contains(entity.entity_type().name(), k)),
                };
                Node::One(found)
            }
            PathElement::Property { property, parent } => {
                let owner = parent
                    .and_then(|p| path.element(p))
                    .and_then(PathElement::entity_type);
                let value = match (owner, parent_key(&nodes, *parent)) {
                    (Some(ty), Some(k)) => tables.row(ty.name(), &k).and_then(|row| {
                        if property.is_id() {
                            Some(row.id.to_json())
                        } else {
                            row.properties.get(property.name()).cloned()
                        }
                    }),
                    _ => None,
                };
                Node::Value(value)
            }
            PathElement::CustomProperty { name, parent } => Node::Value(
                parent_value(&nodes, *parent)
                    .and_then(|v| v.as_object())
                    .and_then(|m| m.get(name))
                    .cloned(),
            ),
            PathElement::ArrayIndex { index, parent } => Node::Value(
                parent_value(&nodes, *parent)
                    .and_then(|v| v.as_array())
                    .and_then(|a| a.get(*index))
                    .cloned(),
            ),
        };
        nodes.push(node);
    }
    nodes
}

fn null_aware_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn order_cmp(order_by: &[OrderBy], a: &Entity, b: &Entity) -> Ordering {
    for clause in order_by {
        let va = clause.expression.value(a).unwrap_or(Value::Null);
        let vb = clause.expression.value(b).unwrap_or(Value::Null);
        let ord = null_aware_cmp(&va, &vb);
        let ord = if clause.ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn filtered(tables: &Tables, entity_type: &Arc<EntityType>, keys: &[String], query: &Query) -> Vec<Entity> {
    let mut entities: Vec<Entity> = keys
        .iter()
        .filter_map(|k| tables.row(entity_type.name(), k))
        .map(|row| to_entity(entity_type, row))
        .collect();
    if let Some(filter) = &query.filter {
        entities.retain(|e| filter.matches(e));
    }
    if let Some(filter) = &query.skip_filter {
        entities.retain(|e| filter.matches(e));
    }
    entities
}

fn expand(tables: &Tables, registry: &ModelRegistry, entity: &mut Entity, names: &[String]) {
    let Some(source_key) = entity.id().map(key) else {
        return;
    };
    let entity_type = entity.entity_type().clone();
    for name in names {
        let Some(nav) = entity_type.navigation_property(name) else {
            continue;
        };
        let Some(target_type) = registry.navigation_target(nav) else {
            continue;
        };
        let mut related: Vec<Entity> = tables
            .related(entity_type.name(), &source_key, nav.name())
            .iter()
            .filter_map(|k| tables.row(target_type.name(), k))
            .map(|row| to_entity(target_type, row))
            .collect();
        if nav.is_to_one() {
            if let Some(one) = related.pop() {
                entity.set_navigation(name, NavigationValue::One(Box::new(one)));
            }
        } else {
            entity.set_navigation(name, NavigationValue::Many(related));
        }
    }
}

fn page(
    tables: &Tables,
    registry: &ModelRegistry,
    entity_type: &Arc<EntityType>,
    keys: &[String],
    query: &Query,
) -> EntitySetResult {
    let mut entities = filtered(tables, entity_type, keys, query);
    if !query.order_by.is_empty() {
        entities.sort_by(|a, b| order_cmp(&query.order_by, a, b));
    }
    let count = query.is_count().then_some(entities.len());
    let top = query.top.unwrap_or(usize::MAX);
    let mut rest = entities.into_iter().skip(query.effective_skip());
    let mut page: Vec<Entity> = rest.by_ref().take(top).collect();
    let next = rest.next();
    for entity in &mut page {
        expand(tables, registry, entity, &query.expand);
    }
    EntitySetResult {
        entities: page,
        count,
        next,
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    version: u64,
}

/// Shared in-memory store; hands out [`InMemorySession`]s
#[derive(Clone)]
pub struct InMemoryPersistence {
    shared: Arc<RwLock<Shared>>,
    registry: Arc<ModelRegistry>,
}

impl InMemoryPersistence {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            shared: Arc::new(RwLock::new(Shared::default())),
            registry,
        }
    }

    pub fn session(&self) -> InMemorySession {
        InMemorySession {
            shared: self.shared.clone(),
            registry: self.registry.clone(),
            working: None,
            base_version: 0,
            dirty: false,
            savepoints: Vec::new(),
        }
    }

    /// Committed rows of a type
    pub fn count(&self, entity_type: &str) -> usize {
        self.shared
            .read()
            .map(|s| s.tables.rows.get(entity_type).map_or(0, IndexMap::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl PersistenceManagerFactory for InMemoryPersistence {
    async fn create(&self) -> StaResult<Box<dyn PersistenceManager>> {
        Ok(Box::new(self.session()))
    }
}

/// One session on an [`InMemoryPersistence`]
pub struct InMemorySession {
    shared: Arc<RwLock<Shared>>,
    registry: Arc<ModelRegistry>,
    working: Option<Tables>,
    base_version: u64,
    dirty: bool,
    savepoints: Vec<(Tables, bool)>,
}

impl InMemorySession {
    fn tables(&mut self) -> StaResult<&mut Tables> {
        if self.working.is_none() {
            let shared = self.shared.read().map_err(backend_error)?;
            self.base_version = shared.version;
            self.working = Some(shared.tables.clone());
        }
        Ok(self.working.get_or_insert_with(Tables::default))
    }

    fn reset(&mut self) {
        self.working = None;
        self.dirty = false;
        self.savepoints.clear();
    }

    fn identified_key(element: &EntityElement) -> StaResult<String> {
        element
            .id()
            .map(key)
            .ok_or_else(|| EntityError::illegal("the entity is not identified by an id").into())
    }
}

#[async_trait]
impl PersistenceManager for InMemorySession {
    async fn validate_path(&mut self, path: &ResourcePath) -> StaResult<bool> {
        let tables = self.tables()?;
        let nodes = resolve_nodes(tables, path);
        Ok(path
            .elements()
            .iter()
            .zip(&nodes)
            .all(|(element, node)| {
                !element.is_identified_entity() || matches!(node, Node::One(Some(_)))
            }))
    }

    async fn get(&mut self, path: &ResourcePath, query: &Query) -> StaResult<Option<ResultValue>> {
        let registry = self.registry.clone();
        let tables = self.tables()?;
        let nodes = resolve_nodes(tables, path);
        let (Some(last), Some(node)) = (path.last_element(), nodes.last()) else {
            return Ok(None);
        };
        Ok(match (last, node) {
            (PathElement::EntitySet(set), Node::Set(keys)) => Some(ResultValue::EntitySet(page(
                tables,
                &registry,
                set.entity_type(),
                keys,
                query,
            ))),
            (PathElement::Entity(element), Node::One(Some(k))) => tables
                .row(element.entity_type().name(), k)
                .map(|row| {
                    let mut entity = to_entity(element.entity_type(), row);
                    expand(tables, &registry, &mut entity, &query.expand);
                    ResultValue::Entity(entity)
                }),
            (_, Node::Value(Some(value))) if !value.is_null() => Some(ResultValue::Property {
                name: last.segment_name(),
                value: value.clone(),
            }),
            _ => None,
        })
    }

    async fn insert(&mut self, entity: &mut Entity) -> StaResult<bool> {
        let registry = self.registry.clone();
        let tables = self.tables()?;
        insert_entity(tables, &registry, entity)?;
        self.dirty = true;
        Ok(true)
    }

    async fn update(&mut self, element: &EntityElement, entity: &Entity) -> StaResult<bool> {
        let registry = self.registry.clone();
        let entity_type = element.entity_type().clone();
        let row_key = Self::identified_key(element)?;
        if entity.id().is_some_and(|id| key(id) != row_key) {
            return Err(EntityError::illegal("the id in the body does not match the path").into());
        }
        let tables = self.tables()?;
        {
            let Some(row) = tables
                .rows
                .get_mut(entity_type.name())
                .and_then(|t| t.get_mut(&row_key))
            else {
                return Ok(false);
            };
            let mut updated = row.clone();
            for p in entity_type.entity_properties() {
                if !p.is_id() && entity.is_set(p.name()) {
                    let value = entity.property(p.name()).cloned().unwrap_or(Value::Null);
                    updated.properties.insert(p.name().to_string(), value);
                }
            }
            check_required(&entity_type, &updated)?;
            *row = updated;
        }
        let mut entity = entity.clone();
        link_navigations(tables, &registry, &entity_type, &row_key, &mut entity)?;
        self.dirty = true;
        Ok(true)
    }

    async fn patch(&mut self, element: &EntityElement, patch: &JsonPatch) -> StaResult<bool> {
        let registry = self.registry.clone();
        let entity_type = element.entity_type().clone();
        let row_key = Self::identified_key(element)?;
        let tables = self.tables()?;
        let Some(row) = tables
            .rows
            .get_mut(entity_type.name())
            .and_then(|t| t.get_mut(&row_key))
        else {
            return Ok(false);
        };

        let mut doc = Value::Object(to_entity(&entity_type, row).to_json_properties());
        patch.apply(&mut doc)?;
        if doc.get(crate::model::property::ID_JSON) != Some(&row.id.to_json()) {
            return Err(EntityError::illegal("a patch must not change the id").into());
        }
        let patched = Entity::from_json(&registry, &entity_type, &doc)?;
        let mut updated = row.clone();
        updated.properties = entity_type
            .entity_properties()
            .iter()
            .filter(|p| !p.is_id())
            .filter_map(|p| {
                patched
                    .property(p.name())
                    .map(|v| (p.name().to_string(), v.clone()))
            })
            .collect();
        check_required(&entity_type, &updated)?;
        *row = updated;
        self.dirty = true;
        Ok(true)
    }

    async fn delete(&mut self, element: &EntityElement) -> StaResult<bool> {
        let registry = self.registry.clone();
        let row_key = Self::identified_key(element)?;
        let tables = self.tables()?;
        let removed = tables.remove_entity(&registry, element.entity_type(), &row_key);
        self.dirty |= removed;
        Ok(removed)
    }

    async fn delete_by_query(&mut self, path: &ResourcePath, query: &Query) -> StaResult<usize> {
        let registry = self.registry.clone();
        let tables = self.tables()?;
        let nodes = resolve_nodes(tables, path);
        let (Some(PathElement::EntitySet(set)), Some(Node::Set(keys))) =
            (path.last_element(), nodes.last())
        else {
            return Err(StorageError::Unsupported {
                message: "delete by query needs an entity set".to_string(),
            }
            .into());
        };
        let entity_type = set.entity_type().clone();
        let doomed: Vec<String> = filtered(tables, &entity_type, keys, query)
            .iter()
            .filter_map(|e| e.id().map(key))
            .collect();
        let mut count = 0;
        for k in doomed {
            if tables.remove_entity(&registry, &entity_type, &k) {
                count += 1;
            }
        }
        self.dirty |= count > 0;
        Ok(count)
    }

    async fn delete_relation(
        &mut self,
        source: &EntityElement,
        navigation: &NavigationPropertyMain,
        target: &EntityElement,
    ) -> StaResult<()> {
        let inverse_required = self
            .registry
            .navigation_target(navigation)
            .and_then(|t| t.navigation_property(navigation.inverse_name()))
            .is_some_and(NavigationPropertyMain::is_required);
        if navigation.is_required() || inverse_required {
            return Err(EntityError::illegal(format!(
                "the relation {}.{} is required and cannot be removed",
                navigation.source_type(),
                navigation.name()
            ))
            .into());
        }
        let source_key = Self::identified_key(source)?;
        let target_key = Self::identified_key(target)?;
        let tables = self.tables()?;
        if !tables.unlink(navigation, &source_key, &target_key) {
            return Err(EntityError::NotFound {
                path: format!(
                    "{}({source_key})/{}({target_key})",
                    source.entity_type().plural(),
                    navigation.name()
                ),
            }
            .into());
        }
        self.dirty = true;
        Ok(())
    }

    async fn entity_exists(&mut self, entity_type: &EntityType, id: &PkValue) -> StaResult<bool> {
        let tables = self.tables()?;
        Ok(tables.contains(entity_type.name(), &key(id)))
    }

    async fn savepoint(&mut self) -> StaResult<()> {
        let snapshot = self.tables()?.clone();
        self.savepoints.push((snapshot, self.dirty));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> StaResult<()> {
        let (tables, dirty) = self.savepoints.pop().ok_or_else(|| StorageError::Transaction {
            message: "no savepoint to roll back to".to_string(),
        })?;
        self.working = Some(tables);
        self.dirty = dirty;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> StaResult<()> {
        self.savepoints.pop().map(|_| ()).ok_or_else(|| {
            StorageError::Transaction {
                message: "no savepoint to release".to_string(),
            }
            .into()
        })
    }

    async fn commit(&mut self) -> StaResult<()> {
        if self.dirty {
            if let Some(tables) = self.working.take() {
                let stale = {
                    let mut shared = self.shared.write().map_err(backend_error)?;
                    if shared.version == self.base_version {
                        shared.tables = tables;
                        shared.version += 1;
                        false
                    } else {
                        true
                    }
                };
                if stale {
                    self.reset();
                    return Err(StorageError::Transaction {
                        message: "the store changed since this session started".to_string(),
                    }
                    .into());
                }
            }
        }
        self.reset();
        Ok(())
    }

    async fn rollback(&mut self) -> StaResult<()> {
        self.reset();
        Ok(())
    }

    async fn close(&mut self) {
        self.reset();
    }
}
