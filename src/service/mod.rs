//! Request execution
//!
//! A [`Service`] executes [`ServiceRequest`]s against one persistence
//! session obtained lazily from the shared [`ServerHost`]. It holds
//! per-request state and must not be shared between concurrent callers:
//! build one per request, or one per explicit transaction.
//!
//! Without an explicit transaction every call commits on success and rolls
//! back on failure. After [`Service::start_transaction`] calls share one
//! session; a failing call only undoes its own work and the transaction
//! ends with [`Service::commit_transaction`] or
//! [`Service::rollback_transaction`].

pub mod auth;
pub mod format;

pub use auth::PolicyAuthorizer;
pub use format::{FormatContext, FormatterRegistry, JsonFormatter, ResultFormatter};

use crate::config::CoreSettings;
use crate::core::auth::AuthContext;
use crate::core::error::{EntityError, RequestError, StaError, StaResult, StorageError};
use crate::core::events::{ChangeEvent, EntityEvent, LinkEvent};
use crate::core::version::Version;
use crate::links::{Continuation, next_link, parse_prefer, self_link};
use crate::model::{Entity, NavigationValue, PkValue};
use crate::path::{EntityElement, EntitySetElement, PathElement, ResourcePath};
use crate::persistence::{JsonPatch, PersistenceManager, ResultValue};
use crate::query::{Metadata, Query};
use crate::server::host::ServerHost;
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    GetCapabilities,
    Read,
    Create,
    /// Full replacement (PUT)
    UpdateAll,
    /// Partial update (PATCH with an entity body)
    UpdateChanges,
    /// PATCH with a JSON-patch document
    UpdateChangeset,
    Delete,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::GetCapabilities => "getCapabilities",
            RequestType::Read => "read",
            RequestType::Create => "create",
            RequestType::UpdateAll => "updateAll",
            RequestType::UpdateChanges => "updateChanges",
            RequestType::UpdateChangeset => "updateChangeset",
            RequestType::Delete => "delete",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, RequestType::GetCapabilities | RequestType::Read)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transport-independent request
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub request_type: RequestType,
    pub version: Version,
    /// Percent-encoded path below the version segment: `/Things(1)/Datastreams`
    pub url_path: String,
    /// Raw query string, without `?`
    pub url_query: String,
    pub content: Option<String>,
    /// Raw `Prefer` header
    pub prefer: Option<String>,
    pub auth: AuthContext,
}

impl ServiceRequest {
    pub fn new(request_type: RequestType, version: Version, url_path: impl Into<String>) -> Self {
        Self {
            request_type,
            version,
            url_path: url_path.into(),
            url_query: String::new(),
            content: None,
            prefer: None,
            auth: AuthContext::Anonymous,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.url_query = query.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_prefer(mut self, prefer: impl Into<String>) -> Self {
        self.prefer = Some(prefer.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }
}

/// A transport-independent response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceResponse {
    pub code: u16,
    pub message: Option<String>,
    pub headers: IndexMap<String, String>,
    pub body: Option<Value>,
}

impl ServiceResponse {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Error response with a `{code, message}` body
    pub fn error(code: u16, error_code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            body: Some(json!({ "code": error_code, "message": message })),
            message: Some(message),
            headers: IndexMap::new(),
        }
    }

    pub fn from_error(err: &StaError) -> Self {
        let response = err.to_response();
        Self::error(err.status_code().as_u16(), &response.code, response.message)
    }

    /// The canned response for paths that do not resolve
    pub fn not_found(version: Version) -> Self {
        let (code, message) = version.not_found();
        Self::error(code, "NOT_FOUND", message)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Log a failure at the level its kind deserves and turn it into a response
fn error_response(err: &StaError) -> ServiceResponse {
    if err.is_fatal() {
        error!(error = %err, "store invariant violated");
    } else if err.status_code().is_server_error() {
        debug!(error = ?err, "request failed unexpectedly");
    } else {
        debug!(error = %err, "request rejected");
    }
    ServiceResponse::from_error(err)
}

/// Executes requests for one caller
pub struct Service {
    host: Arc<ServerHost>,
    session: Option<Box<dyn PersistenceManager>>,
    transaction: bool,
    events: Vec<ChangeEvent>,
}

impl Service {
    pub fn new(host: Arc<ServerHost>) -> Self {
        Self {
            host,
            session: None,
            transaction: false,
            events: Vec::new(),
        }
    }

    pub fn host(&self) -> &ServerHost {
        &self.host
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction
    }

    /// Open a transaction that spans the following calls
    pub async fn start_transaction(&mut self) -> StaResult<()> {
        if self.transaction {
            return Err(StorageError::Transaction {
                message: "a transaction is already active".to_string(),
            }
            .into());
        }
        self.ensure_session().await?;
        self.transaction = true;
        debug!("transaction started");
        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> StaResult<()> {
        self.end_transaction()?;
        self.commit_and_close().await
    }

    pub async fn rollback_transaction(&mut self) -> StaResult<()> {
        self.end_transaction()?;
        warn!("transaction rolled back");
        self.rollback_and_close().await;
        Ok(())
    }

    fn end_transaction(&mut self) -> StaResult<()> {
        if !self.transaction {
            return Err(StorageError::Transaction {
                message: "no transaction is active".to_string(),
            }
            .into());
        }
        self.transaction = false;
        Ok(())
    }

    async fn ensure_session(&mut self) -> StaResult<()> {
        if self.session.is_none() {
            self.session = Some(self.host.persistence.create().await?);
        }
        Ok(())
    }

    async fn commit_and_close(&mut self) -> StaResult<()> {
        let Some(mut session) = self.session.take() else {
            self.events.clear();
            return Ok(());
        };
        let result = session.commit().await;
        if result.is_err() {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "rollback after failed commit failed");
            }
        }
        session.close().await;
        match result {
            Ok(()) => {
                self.publish_events();
                Ok(())
            }
            Err(e) => {
                self.events.clear();
                warn!(error = %e, "commit failed, changes rolled back");
                Err(e)
            }
        }
    }

    async fn rollback_and_close(&mut self) {
        self.events.clear();
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "rollback failed");
            }
            session.close().await;
        }
    }

    fn publish_events(&mut self) {
        let events = std::mem::take(&mut self.events);
        if let Some(bus) = self.host.event_bus() {
            for event in events {
                bus.publish(event);
            }
        }
    }

    /// Execute one request; every failure becomes an error response
    pub async fn execute(&mut self, request: ServiceRequest) -> ServiceResponse {
        debug!(
            request_type = %request.request_type,
            path = %request.url_path,
            principal = request.auth.principal(),
            "executing request"
        );
        if let Err(e) = self
            .host
            .authorizer
            .authorize(request.request_type, &request.auth)
        {
            return error_response(&e);
        }
        if request.request_type == RequestType::GetCapabilities {
            return self.get_capabilities(request.version);
        }

        let explicit = self.transaction;
        let mark = self.events.len();
        if explicit {
            if let Err(e) = self.savepoint().await {
                return error_response(&e);
            }
        }
        let response = match self.run_call(&request).await {
            Ok(response) => response,
            Err(e) => error_response(&e),
        };
        self.end_call(explicit, mark, request.request_type, response)
            .await
    }

    async fn savepoint(&mut self) -> StaResult<()> {
        self.ensure_session().await?;
        match self.session.as_deref_mut() {
            Some(pm) => pm.savepoint().await,
            None => Err(StaError::Internal("no persistence session".to_string())),
        }
    }

    async fn run_call(&mut self, request: &ServiceRequest) -> StaResult<ServiceResponse> {
        self.ensure_session().await?;
        let Some(pm) = self.session.as_deref_mut() else {
            return Err(StaError::Internal("no persistence session".to_string()));
        };
        let mut call = Call {
            host: &self.host,
            pm,
            events: &mut self.events,
            request,
        };
        call.dispatch().await
    }

    /// Commit, release or undo the work of one call
    async fn end_call(
        &mut self,
        explicit: bool,
        mark: usize,
        request_type: RequestType,
        response: ServiceResponse,
    ) -> ServiceResponse {
        let success = response.is_success();
        if !success && request_type.is_mutation() {
            warn!(request_type = %request_type, code = response.code, "rolling back failed call");
        }

        if !explicit {
            if !success {
                self.rollback_and_close().await;
                return response;
            }
            return match self.commit_and_close().await {
                Ok(()) => response,
                Err(e) => error_response(&e),
            };
        }

        let Some(pm) = self.session.as_deref_mut() else {
            return response;
        };
        let outcome = if success {
            pm.release_savepoint().await
        } else {
            self.events.truncate(mark);
            pm.rollback_to_savepoint().await
        };
        match outcome {
            Ok(()) => response,
            Err(e) => error_response(&e),
        }
    }

    /// Run `requests` in one transaction; the first failure rolls back all
    /// of them and ends the batch
    pub async fn execute_changeset(
        &mut self,
        requests: Vec<ServiceRequest>,
    ) -> StaResult<Vec<ServiceResponse>> {
        self.start_transaction().await?;
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let response = self.execute(request).await;
            let failed = !response.is_success();
            responses.push(response);
            if failed {
                self.rollback_transaction().await?;
                return Ok(responses);
            }
        }
        self.commit_transaction().await?;
        Ok(responses)
    }

    /// The service document: one entry per entity set
    pub fn get_capabilities(&self, version: Version) -> ServiceResponse {
        let root = self.host.settings.service_root();
        let sets: Vec<Value> = self
            .host
            .registry
            .entity_types()
            .iter()
            .map(|t| {
                json!({
                    "name": t.plural(),
                    "url": format!("{root}/{version}/{}", t.plural()),
                })
            })
            .collect();
        ServiceResponse::new(200)
            .with_header("Content-Type", "application/json")
            .with_body(json!({ "value": sets }))
    }
}

/// Walk an entity and everything expanded below it
fn visit_entities(entity: &mut Entity, f: &mut impl FnMut(&mut Entity)) {
    f(entity);
    for value in entity.navigations_mut().values_mut() {
        match value {
            NavigationValue::One(related) => visit_entities(related, f),
            NavigationValue::Many(list) => {
                for related in list {
                    visit_entities(related, f);
                }
            }
        }
    }
}

fn for_each_entity(result: &mut ResultValue, mut f: impl FnMut(&mut Entity)) {
    match result {
        ResultValue::Entity(entity) => visit_entities(entity, &mut f),
        ResultValue::EntitySet(set) => {
            for entity in &mut set.entities {
                visit_entities(entity, &mut f);
            }
        }
        ResultValue::Property { .. } => {}
    }
}

/// One request against one session
struct Call<'a> {
    host: &'a ServerHost,
    pm: &'a mut dyn PersistenceManager,
    events: &'a mut Vec<ChangeEvent>,
    request: &'a ServiceRequest,
}

impl Call<'_> {
    async fn dispatch(&mut self) -> StaResult<ServiceResponse> {
        match self.request.request_type {
            RequestType::Read => self.read().await,
            RequestType::Create => self.create().await,
            RequestType::UpdateAll | RequestType::UpdateChanges | RequestType::UpdateChangeset => {
                self.update().await
            }
            RequestType::Delete => self.delete().await,
            RequestType::GetCapabilities => Err(RequestError::not_allowed(
                "capabilities are not served inside a call",
            )
            .into()),
        }
    }

    fn settings(&self) -> &CoreSettings {
        &self.host.settings
    }

    fn version(&self) -> Version {
        self.request.version
    }

    fn parse_path(&self) -> StaResult<ResourcePath> {
        self.host.parser.parse(self.version(), &self.request.url_path)
    }

    fn parse_query(&self, path: &ResourcePath) -> StaResult<Query> {
        Query::parse(
            &self.request.url_query,
            path.main_entity_type().map(|t| t.as_ref()),
            self.settings(),
        )
    }

    /// Absolute request URL, without query
    fn request_url(&self) -> String {
        let path = &self.request.url_path;
        let separator = if path.starts_with('/') { "" } else { "/" };
        format!(
            "{}/{}{separator}{path}",
            self.settings().service_root(),
            self.version()
        )
    }

    fn body(&self) -> StaResult<Value> {
        let text = self
            .request
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| RequestError::body("the request has no body"))?;
        Ok(serde_json::from_str(text)?)
    }

    fn prefers_minimal(&self) -> bool {
        self.request
            .prefer
            .as_deref()
            .map(parse_prefer)
            .is_some_and(|p| p.get("return").is_some_and(|v| v == "minimal"))
    }

    fn not_found(&self) -> ServiceResponse {
        ServiceResponse::not_found(self.version())
    }

    /// The key of the entity element at `index`, fetching it when the path
    /// reaches the entity through a to-one navigation
    async fn resolve_element(&mut self, path: &ResourcePath, index: usize) -> StaResult<EntityElement> {
        let Some(PathElement::Entity(element)) = path.element(index) else {
            return Err(EntityError::illegal("the path does not address an entity").into());
        };
        if element.id().is_some() {
            return Ok(element.clone());
        }
        let head = path.truncated(index + 1);
        match self.pm.get(&head, &Query::default()).await? {
            Some(ResultValue::Entity(entity)) => match entity.id() {
                Some(id) => Ok(element.clone().with_id(id.clone())),
                None => Err(EntityError::NotFound { path: head.full_path() }.into()),
            },
            _ => Err(EntityError::NotFound { path: head.full_path() }.into()),
        }
    }

    async fn read(&mut self) -> StaResult<ServiceResponse> {
        let mut path = self.parse_path()?;
        let mut query = self.parse_query(&path)?;
        let formatter = self.host.formatters.get(query.format.as_deref())?;
        if !self.pm.validate_path(&path).await? {
            return Ok(self.not_found());
        }
        let request_url = self.request_url();
        path.compress();

        let top = query.effective_top(self.settings());
        if matches!(path.last_element(), Some(PathElement::EntitySet(_))) {
            query.top = Some(top);
            if let Some(entity_type) = path.main_entity_type().cloned() {
                query.add_pk_order(&entity_type);
            }
        }

        let Some(mut result) = self.pm.get(&path, &query).await? else {
            if path.is_value() || path.is_entity_property() {
                return Ok(ServiceResponse::new(204));
            }
            return Ok(self.not_found());
        };

        let expander = &self.host.custom_links;
        if expander.is_enabled() {
            let root = self.settings().service_root();
            let version = self.version();
            for_each_entity(&mut result, |e| expander.expand_custom_links(e, root, version));
        }

        let next = match &result {
            // an empty page has no position to continue from
            ResultValue::EntitySet(set) if top == 0 || set.entities.is_empty() => None,
            ResultValue::EntitySet(set) => set.next.as_ref().map(|next| {
                let continuation =
                    Continuation::for_page(&query, top, set.entities.last(), Some(next));
                next_link(&request_url, &self.request.url_query, &continuation)
            }),
            _ => None,
        };
        let ctx = FormatContext {
            path: &path,
            query: &query,
            request_url: &request_url,
            next_link: next.as_deref(),
            use_absolute_links: self.settings().use_absolute_navigation_links,
        };
        let body = formatter.format(&ctx, &result)?;
        let content_type = if path.is_value() && body.is_string() {
            "text/plain"
        } else {
            formatter.content_type()
        };
        Ok(ServiceResponse::new(200)
            .with_header("Content-Type", content_type)
            .with_body(body))
    }

    async fn create(&mut self) -> StaResult<ServiceResponse> {
        let path = self.parse_path()?;
        let query = self.parse_query(&path)?;
        let set = match (path.main_element(), path.last_element()) {
            (Some(PathElement::EntitySet(set)), Some(PathElement::EntitySet(_))) if !path.is_ref() => {
                set.clone()
            }
            _ => {
                return Err(
                    RequestError::not_allowed("entities can only be created in entity sets").into(),
                );
            }
        };
        let formatter = self.host.formatters.get(query.format.as_deref())?;
        if !self.pm.validate_path(&path).await? {
            return Ok(self.not_found());
        }

        let mut entity = Entity::from_json(&self.host.registry, set.entity_type(), &self.body()?)?;
        self.complete_parent(&path, &set, &mut entity).await?;
        self.host.custom_links.clean_properties_map(&mut entity);
        entity.validate_create()?;
        if !self.pm.insert(&mut entity).await? {
            return Err(StaError::Internal(format!(
                "the store did not insert the {}",
                set.entity_type().name()
            )));
        }
        let id = entity.id().map(PkValue::to_json).unwrap_or(Value::Null);
        debug!(entity_type = set.entity_type().name(), id = %id, "entity created");
        self.events.push(ChangeEvent::Entity(EntityEvent::Created {
            entity_type: set.entity_type().name().to_string(),
            id,
            data: Value::Object(entity.to_json_properties()),
        }));

        let root = self.settings().service_root();
        let link = self_link(root, self.version(), &entity);
        let mut response = ServiceResponse::new(201);
        if query.metadata != Metadata::Off {
            if let Some(link) = &link {
                response = response.with_header("Location", link.clone());
            }
        }
        if self.prefers_minimal() {
            return Ok(response);
        }

        entity.navigations_mut().clear();
        let request_url = link.unwrap_or_else(|| self.request_url());
        let ctx = FormatContext {
            path: &path,
            query: &query,
            request_url: &request_url,
            next_link: None,
            use_absolute_links: self.settings().use_absolute_navigation_links,
        };
        let body = formatter.format(&ctx, &ResultValue::Entity(entity))?;
        Ok(response
            .with_header("Content-Type", formatter.content_type())
            .with_body(body))
    }

    /// Link a new entity to the entity its set hangs off in the path:
    /// `POST Things(1)/Datastreams` creates a Datastream of Thing 1
    async fn complete_parent(
        &mut self,
        path: &ResourcePath,
        set: &EntitySetElement,
        entity: &mut Entity,
    ) -> StaResult<()> {
        let (Some(parent), Some(nav)) = (set.parent(), set.navigation()) else {
            return Ok(());
        };
        let parent_element = self.resolve_element(path, parent).await?;
        let Some(parent_id) = parent_element.id().cloned() else {
            return Ok(());
        };
        let inverse_name = nav.inverse_name();
        let inverse = entity
            .entity_type()
            .navigation_property(inverse_name)
            .cloned()
            .ok_or_else(|| {
                EntityError::illegal(format!(
                    "{} has no navigation property {inverse_name}",
                    entity.entity_type().name()
                ))
            })?;
        let reference =
            Entity::new(parent_element.entity_type().clone()).with_id(parent_id.clone());

        if inverse.is_to_one() {
            if let Some(NavigationValue::One(existing)) = entity.navigation(inverse_name) {
                if existing.id().is_some_and(|id| id != &parent_id) {
                    return Err(EntityError::illegal(format!(
                        "{inverse_name} in the body conflicts with the path"
                    ))
                    .into());
                }
            }
            entity.set_navigation(inverse_name, NavigationValue::One(Box::new(reference)));
        } else {
            match entity.navigations_mut().get_mut(inverse_name) {
                Some(NavigationValue::Many(list)) => {
                    if !list.iter().any(|e| e.id() == Some(&parent_id)) {
                        list.push(reference);
                    }
                }
                _ => entity.set_navigation(inverse_name, NavigationValue::Many(vec![reference])),
            }
        }
        Ok(())
    }

    async fn update(&mut self) -> StaResult<ServiceResponse> {
        if !self.request.url_query.trim().is_empty() {
            return Err(RequestError::not_allowed("query options are not allowed on updates").into());
        }
        let path = self.parse_path()?;
        let last = path.len().checked_sub(1);
        let targets_entity = matches!(path.last_element(), Some(PathElement::Entity(_)))
            && path.main_index() == last
            && !path.is_ref();
        let Some(last) = last.filter(|_| targets_entity) else {
            return Err(RequestError::not_allowed("updates need a path to a single entity").into());
        };
        if !self.pm.validate_path(&path).await? {
            return Ok(self.not_found());
        }

        let element = self.resolve_element(&path, last).await?;
        let body = self.body()?;
        let updated = match self.request.request_type {
            RequestType::UpdateChangeset => {
                let patch = JsonPatch::from_json(&body)?;
                self.pm.patch(&element, &patch).await?
            }
            kind => {
                let mut entity = Entity::from_json(&self.host.registry, element.entity_type(), &body)?;
                self.host.custom_links.clean_properties_map(&mut entity);
                if kind == RequestType::UpdateAll {
                    entity.set_all_properties_set();
                    entity.validate_replace()?;
                }
                self.pm.update(&element, &entity).await?
            }
        };
        if !updated {
            return Ok(self.not_found());
        }
        self.events.push(ChangeEvent::Entity(EntityEvent::Updated {
            entity_type: element.entity_type().name().to_string(),
            id: element.id().map(PkValue::to_json).unwrap_or(Value::Null),
        }));
        Ok(ServiceResponse::new(200))
    }

    async fn delete(&mut self) -> StaResult<ServiceResponse> {
        let path = self.parse_path()?;
        if path.is_ref() {
            return self.delete_ref(&path).await;
        }
        let last = path.len().checked_sub(1);
        match path.last_element() {
            Some(PathElement::Entity(_)) if path.main_index() == last => {
                if !self.pm.validate_path(&path).await? {
                    return Ok(self.not_found());
                }
                let Some(last) = last else {
                    return Ok(self.not_found());
                };
                let element = self.resolve_element(&path, last).await?;
                if !self.pm.delete(&element).await? {
                    return Ok(self.not_found());
                }
                self.events.push(ChangeEvent::Entity(EntityEvent::Deleted {
                    entity_type: element.entity_type().name().to_string(),
                    id: element.id().map(PkValue::to_json).unwrap_or(Value::Null),
                }));
                Ok(ServiceResponse::new(200))
            }
            Some(PathElement::EntitySet(_)) => {
                if !self.settings().filter_delete_enabled {
                    return Err(RequestError::not_allowed("deleting by query is not enabled").into());
                }
                let query = self.parse_query(&path)?;
                query.check_bulk_delete()?;
                if !self.pm.validate_path(&path).await? {
                    return Ok(self.not_found());
                }
                let count = self.pm.delete_by_query(&path, &query).await?;
                debug!(count, path = %path.path(), "deleted by query");
                Ok(ServiceResponse::new(200))
            }
            _ => Err(RequestError::not_allowed(
                "only entities, filtered entity sets and references can be deleted",
            )
            .into()),
        }
    }

    /// Remove a relation addressed by one of the three `$ref` shapes:
    /// `Set/$ref?$id=..`, `Set(id)/$ref` and `ToOne/$ref`
    async fn delete_ref(&mut self, path: &ResourcePath) -> StaResult<ServiceResponse> {
        let last = path.len().saturating_sub(1);
        let (source, navigation, target) = match path.last_element() {
            Some(PathElement::EntitySet(set)) => {
                let query = self.parse_query(path)?;
                let ref_id = query
                    .ref_id
                    .ok_or_else(|| RequestError::query("$id is required to delete a set reference"))?;
                let navigation = set
                    .navigation()
                    .cloned()
                    .ok_or_else(|| RequestError::not_allowed("$ref needs a navigation property"))?;
                let source = set
                    .parent()
                    .ok_or_else(|| RequestError::not_allowed("$ref needs a source entity"))?;
                let target_path = self.host.parser.parse_url(&ref_id, self.version())?;
                let target = match target_path.last_element() {
                    Some(PathElement::Entity(target))
                        if target.id().is_some() && !target_path.is_ref() =>
                    {
                        target.clone()
                    }
                    _ => {
                        return Err(RequestError::query(format!(
                            "$id '{ref_id}' does not identify an entity"
                        ))
                        .into());
                    }
                };
                (source, navigation, target)
            }
            Some(PathElement::Entity(entity)) => {
                let navigation = entity
                    .navigation()
                    .cloned()
                    .ok_or_else(|| RequestError::not_allowed("$ref needs a navigation property"))?;
                let source = entity
                    .parent()
                    .ok_or_else(|| RequestError::not_allowed("$ref needs a source entity"))?;
                (source, navigation, entity.clone())
            }
            _ => return Err(RequestError::not_allowed("$ref must follow an entity or entity set").into()),
        };

        if !self.pm.validate_path(path).await? {
            return Ok(self.not_found());
        }
        let source = self.resolve_element(path, source).await?;
        let target = if target.id().is_some() {
            target
        } else {
            self.resolve_element(path, last).await?
        };
        if navigation.target_type() != target.entity_type().name() {
            return Err(EntityError::illegal(format!(
                "{} points to {}, not {}",
                navigation.name(),
                navigation.target_type(),
                target.entity_type().name()
            ))
            .into());
        }
        let (Some(source_id), Some(target_id)) = (source.id(), target.id()) else {
            return Err(EntityError::illegal("both ends of a reference need an id").into());
        };
        if !self.pm.entity_exists(target.entity_type(), target_id).await? {
            return Err(EntityError::NotFound {
                path: format!("{}({})", target.entity_type().plural(), target_id),
            }
            .into());
        }

        self.pm.delete_relation(&source, &navigation, &target).await?;
        self.events.push(ChangeEvent::Link(LinkEvent::Deleted {
            source_type: source.entity_type().name().to_string(),
            source_id: source_id.to_json(),
            navigation: navigation.name().to_string(),
            target_id: target_id.to_json(),
        }));
        Ok(ServiceResponse::new(204))
    }
}
